//! Driver registry and device/driver matching.
//!
//! Matching is eager and per-device: a device is matched against the
//! drivers registered at the time it is added; registering a driver later
//! does not rescan devices that are already in the tree. A device without a
//! matching driver stays registered but inert.

use std::sync::{Arc, RwLock};

use crate::device::{Device, DeviceError};
use crate::uid::{device_id_match, DeviceId, TypeTag};

/// A client-device driver. Implementations supply an identity table and the
/// probe/remove lifecycle callbacks; `remove` is optional.
pub trait Driver: Send + Sync {
    fn name(&self) -> &str;

    fn match_table(&self) -> &[DeviceId];

    fn probe(&self, dev: &Arc<Device>) -> Result<(), DeviceError>;

    fn remove(&self, _dev: &Arc<Device>) {}
}

#[derive(Default)]
pub struct Bus {
    drivers: RwLock<Vec<Arc<dyn Driver>>>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a driver. Does not scan the existing device tree.
    pub fn register(&self, driver: Arc<dyn Driver>) {
        log::info!("bus: registered driver {}", driver.name());
        self.drivers.write().unwrap().push(driver);
    }

    /// Unregisters a driver by name. Devices already bound to it stay bound;
    /// detaching them is their owner's responsibility.
    pub fn unregister(&self, name: &str) {
        self.drivers.write().unwrap().retain(|d| d.name() != name);
    }

    /// First registered driver whose identity table matches `tag`.
    pub fn match_device(&self, tag: TypeTag) -> Option<Arc<dyn Driver>> {
        let drivers = self.drivers.read().unwrap();
        drivers
            .iter()
            .find(|drv| device_id_match(drv.match_table(), tag).is_some())
            .cloned()
    }

    /// Matches and probes `dev`. Returns `Ok(true)` when a driver was bound,
    /// `Ok(false)` when no driver matched (the device stays inert), and the
    /// probe error, with the binding undone, when probing failed.
    pub fn probe_device(&self, dev: &Arc<Device>) -> Result<bool, DeviceError> {
        let Some(driver) = self.match_device(dev.tag()) else {
            log::debug!("{}: no driver for type {}", dev.name(), dev.tag());
            return Ok(false);
        };

        dev.bind_driver(driver.clone());
        match driver.probe(dev) {
            Ok(()) => {
                log::info!("{}: bound to driver {}", dev.name(), driver.name());
                Ok(true)
            }
            Err(err) => {
                dev.unbind_driver();
                Err(err)
            }
        }
    }

    /// Invokes the bound driver's remove callback and unbinds it.
    pub fn remove_device(&self, dev: &Arc<Device>) {
        if let Some(driver) = dev.driver() {
            driver.remove(dev);
            dev.unbind_driver();
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::controller::Controller;
    use crate::request::{Request, RequestChannel, RequestError};
    use crate::uid::DeviceUid;

    struct DeadChannel;

    impl RequestChannel for DeadChannel {
        fn execute(&self, _req: &Request) -> Result<Vec<u8>, RequestError> {
            Err(RequestError::NoSuchDevice)
        }
    }

    struct CountingDriver {
        name: &'static str,
        table: Vec<DeviceId>,
        probes: AtomicUsize,
        removes: AtomicUsize,
        fail_probe: bool,
    }

    impl CountingDriver {
        fn new(name: &'static str, uid: &str) -> Arc<Self> {
            let uid: DeviceUid = uid.parse().unwrap();
            Arc::new(CountingDriver {
                name,
                table: vec![DeviceId::new(TypeTag::from_uid(&uid))],
                probes: AtomicUsize::new(0),
                removes: AtomicUsize::new(0),
                fail_probe: false,
            })
        }
    }

    impl Driver for CountingDriver {
        fn name(&self) -> &str {
            self.name
        }

        fn match_table(&self) -> &[DeviceId] {
            &self.table
        }

        fn probe(&self, _dev: &Arc<Device>) -> Result<(), DeviceError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.fail_probe {
                Err(DeviceError::Probe("nope".into()))
            } else {
                Ok(())
            }
        }

        fn remove(&self, _dev: &Arc<Device>) {
            self.removes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn started_controller() -> Arc<Controller> {
        let ctrl = Controller::new("sam0", Box::new(DeadChannel));
        ctrl.start();
        ctrl
    }

    fn add_device(ctrl: &Arc<Controller>, uid: &str) -> Arc<Device> {
        let uid: DeviceUid = uid.parse().unwrap();
        let dev = Device::alloc(ctrl.clone(), uid, TypeTag::from_uid(&uid));
        Device::add(&dev, None).unwrap();
        dev
    }

    #[test]
    fn matched_device_probes_exactly_once() {
        let ctrl = started_controller();
        let driver = CountingDriver::new("sam_psy", "sam:01:02:01:01:00");
        ctrl.bus().register(driver.clone());

        let dev = add_device(&ctrl, "sam:01:02:01:01:00");
        assert!(ctrl.bus().probe_device(&dev).unwrap());
        assert_eq!(driver.probes.load(Ordering::SeqCst), 1);
        assert!(dev.driver().is_some());
    }

    #[test]
    fn unmatched_device_stays_inert() {
        let ctrl = started_controller();
        let dev = add_device(&ctrl, "sam:01:03:01:00:01");

        assert!(!ctrl.bus().probe_device(&dev).unwrap());
        assert!(dev.driver().is_none());
        // Still present in the tree, just unbound.
        assert_eq!(ctrl.clients().len(), 1);
    }

    #[test]
    fn first_registered_driver_wins() {
        let ctrl = started_controller();
        let first = CountingDriver::new("sam_first", "sam:01:15:02:01:00");
        let second = CountingDriver::new("sam_second", "sam:01:15:02:01:00");
        ctrl.bus().register(first.clone());
        ctrl.bus().register(second.clone());

        let dev = add_device(&ctrl, "sam:01:15:02:01:00");
        ctrl.bus().probe_device(&dev).unwrap();

        assert_eq!(first.probes.load(Ordering::SeqCst), 1);
        assert_eq!(second.probes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn probe_failure_unbinds() {
        let ctrl = started_controller();
        let uid: DeviceUid = "sam:01:11:01:00:00".parse().unwrap();
        let driver = Arc::new(CountingDriver {
            name: "sam_dtx",
            table: vec![DeviceId::new(TypeTag::from_uid(&uid))],
            probes: AtomicUsize::new(0),
            removes: AtomicUsize::new(0),
            fail_probe: true,
        });
        ctrl.bus().register(driver.clone());

        let dev = add_device(&ctrl, "sam:01:11:01:00:00");
        assert!(matches!(
            ctrl.bus().probe_device(&dev),
            Err(DeviceError::Probe(_))
        ));
        assert!(dev.driver().is_none());
    }

    #[test]
    fn driver_remove_runs_on_device_removal() {
        let ctrl = started_controller();
        let driver = CountingDriver::new("sam_psy", "sam:01:02:01:01:00");
        ctrl.bus().register(driver.clone());

        let dev = add_device(&ctrl, "sam:01:02:01:01:00");
        ctrl.bus().probe_device(&dev).unwrap();

        Device::remove(&dev);
        assert_eq!(driver.removes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregister_leaves_bound_devices_alone() {
        let ctrl = started_controller();
        let driver = CountingDriver::new("sam_psy", "sam:01:02:01:01:00");
        ctrl.bus().register(driver.clone());

        let dev = add_device(&ctrl, "sam:01:02:01:01:00");
        ctrl.bus().probe_device(&dev).unwrap();

        ctrl.bus().unregister("sam_psy");
        assert!(dev.driver().is_some());
        assert!(ctrl
            .bus()
            .match_device(TypeTag::from_uid(&"sam:01:02:01:01:00".parse().unwrap()))
            .is_none());
    }
}
