//! Logical client devices and their lifecycle.
//!
//! A device holds a strong reference to its controller for its whole
//! registered lifetime, so the controller outlives every device registered
//! under it. The tree itself is owned parent-to-child: the controller owns
//! its direct children, a hub device owns the children it materialized.

use std::any::Any;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use thiserror::Error;

use crate::bus::Driver;
use crate::controller::{Controller, ControllerState};
use crate::request::RequestError;
use crate::uid::{DeviceUid, TypeTag};

#[derive(Debug, Error)]
pub enum DeviceError {
    /// The controller is not in the started state; nothing was mutated.
    #[error("controller not ready")]
    NotReady,

    /// A device of the same type already exists under this parent.
    #[error("device {0} already registered under this parent")]
    DuplicateDevice(String),

    /// The node does not name a device of this framework.
    #[error("node does not name a client device")]
    NoMatch,

    /// Driver probe failed; the device was backed out of the tree.
    #[error("probe failed: {0}")]
    Probe(String),

    #[error(transparent)]
    Request(#[from] RequestError),
}

pub struct Device {
    uid: DeviceUid,
    tag: TypeTag,
    ctrl: Arc<Controller>,
    name: OnceLock<String>,
    parent: Mutex<Weak<Device>>,
    children: Mutex<Vec<Arc<Device>>>,
    driver: Mutex<Option<Arc<dyn Driver>>>,
    drvdata: Mutex<Option<Box<dyn Any + Send>>>,
    removed: AtomicBool,
}

impl Device {
    /// Allocates a device bound to `ctrl`. The device participates in the
    /// tree only after a successful [`Device::add`].
    pub fn alloc(ctrl: Arc<Controller>, uid: DeviceUid, tag: TypeTag) -> Arc<Device> {
        Arc::new(Device {
            uid,
            tag,
            ctrl,
            name: OnceLock::new(),
            parent: Mutex::new(Weak::new()),
            children: Mutex::new(Vec::new()),
            driver: Mutex::new(None),
            drvdata: Mutex::new(None),
            removed: AtomicBool::new(false),
        })
    }

    pub fn uid(&self) -> DeviceUid {
        self.uid
    }

    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    pub fn ctrl(&self) -> &Arc<Controller> {
        &self.ctrl
    }

    pub fn name(&self) -> &str {
        self.name.get().map(String::as_str).unwrap_or("(unregistered)")
    }

    /// Snapshot of this device's children.
    pub fn children(&self) -> Vec<Arc<Device>> {
        self.children.lock().unwrap().clone()
    }

    pub fn driver(&self) -> Option<Arc<dyn Driver>> {
        self.driver.lock().unwrap().clone()
    }

    /// Inserts `dev` into the tree under `parent`, or directly under the
    /// controller when `parent` is `None`.
    ///
    /// The started-check and the insertion happen under the controller
    /// state lock as one unit; if the controller is not started, this fails
    /// with [`DeviceError::NotReady`] and performs no tree mutation. The
    /// device name is derived from the parent name and the type tag, and a
    /// name collision (same type under the same parent) is rejected.
    pub fn add(dev: &Arc<Device>, parent: Option<&Arc<Device>>) -> Result<(), DeviceError> {
        let mut inner = dev.ctrl.lock_inner();
        if inner.state != ControllerState::Started {
            return Err(DeviceError::NotReady);
        }

        let parent_name = match parent {
            Some(p) => p.name().to_owned(),
            None => dev.ctrl.name().to_owned(),
        };
        let name = format!("{}-{}:00", parent_name, dev.tag);

        let siblings_have = |siblings: &[Arc<Device>]| {
            siblings.iter().any(|c| c.name() == name)
        };

        match parent {
            Some(p) => {
                let mut children = p.children.lock().unwrap();
                if siblings_have(&children) {
                    return Err(DeviceError::DuplicateDevice(name));
                }
                let _ = dev.name.set(name);
                *dev.parent.lock().unwrap() = Arc::downgrade(p);
                children.push(dev.clone());
            }
            None => {
                if siblings_have(&inner.children) {
                    return Err(DeviceError::DuplicateDevice(name));
                }
                let _ = dev.name.set(name);
                inner.children.push(dev.clone());
            }
        }

        log::debug!("{}: device added", dev.name());
        Ok(())
    }

    /// Detaches `dev` from the tree and tears it down: driver remove, then
    /// teardown of any remaining children. Idempotent; teardown is
    /// best-effort and never fails.
    pub fn remove(dev: &Arc<Device>) {
        if dev.removed.swap(true, Ordering::AcqRel) {
            return;
        }

        match dev.parent.lock().unwrap().upgrade() {
            Some(parent) => {
                let mut children = parent.children.lock().unwrap();
                children.retain(|c| !Arc::ptr_eq(c, dev));
            }
            None => dev.ctrl.detach_child(dev),
        }

        Self::finalize(dev);
        log::debug!("{}: device removed", dev.name());
    }

    /// Removes every child device of `parent`. Used by hubs on disconnect.
    pub fn remove_clients(parent: &Arc<Device>) {
        let children = parent.children.lock().unwrap().clone();
        for dev in children {
            Device::remove(&dev);
        }
    }

    /// Teardown entry for devices already moved out of the tree (controller
    /// shutdown takes the whole child list in one critical section).
    pub(crate) fn finalize_detached(dev: &Arc<Device>) {
        if dev.removed.swap(true, Ordering::AcqRel) {
            return;
        }
        Self::finalize(dev);
    }

    fn finalize(dev: &Arc<Device>) {
        let driver = dev.driver.lock().unwrap().take();
        if let Some(drv) = driver {
            drv.remove(dev);
        }

        // Anything the driver's remove did not already take down.
        let children = mem::take(&mut *dev.children.lock().unwrap());
        for child in children {
            Self::finalize_detached(&child);
        }

        dev.drvdata.lock().unwrap().take();
    }

    pub(crate) fn bind_driver(&self, driver: Arc<dyn Driver>) {
        *self.driver.lock().unwrap() = Some(driver);
    }

    pub(crate) fn unbind_driver(&self) {
        self.driver.lock().unwrap().take();
    }

    pub fn set_drvdata<T: Any + Send>(&self, data: T) {
        *self.drvdata.lock().unwrap() = Some(Box::new(data));
    }

    pub fn with_drvdata<T: Any + Send, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let guard = self.drvdata.lock().unwrap();
        guard.as_ref().and_then(|d| d.downcast_ref::<T>()).map(f)
    }

    pub fn take_drvdata<T: Any + Send>(&self) -> Option<Box<T>> {
        let mut guard = self.drvdata.lock().unwrap();
        match guard.take() {
            Some(data) => match data.downcast::<T>() {
                Ok(data) => Some(data),
                Err(other) => {
                    *guard = Some(other);
                    None
                }
            },
            None => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::request::{Request, RequestChannel};
    use crate::uid::TypeTag;

    struct DeadChannel;

    impl RequestChannel for DeadChannel {
        fn execute(&self, _req: &Request) -> Result<Vec<u8>, RequestError> {
            Err(RequestError::NoSuchDevice)
        }
    }

    fn controller() -> Arc<Controller> {
        Controller::new("sam0", Box::new(DeadChannel))
    }

    fn device(ctrl: &Arc<Controller>, name: &str) -> Arc<Device> {
        let uid: DeviceUid = name.parse().unwrap();
        Device::alloc(ctrl.clone(), uid, TypeTag::from_uid(&uid))
    }

    #[test]
    fn add_fails_when_not_started() {
        let ctrl = controller();
        let dev = device(&ctrl, "sam:01:02:01:01:00");

        assert!(matches!(
            Device::add(&dev, None),
            Err(DeviceError::NotReady)
        ));
        assert!(ctrl.clients().is_empty());
    }

    #[test]
    fn add_names_device_from_parent_and_tag() {
        let ctrl = controller();
        ctrl.start();

        let dev = device(&ctrl, "sam:01:02:01:01:00");
        Device::add(&dev, None).unwrap();

        assert!(dev.name().starts_with("sam0-"));
        assert!(dev.name().ends_with(":00"));
        assert_eq!(ctrl.clients().len(), 1);
    }

    #[test]
    fn duplicate_type_under_same_parent_rejected() {
        let ctrl = controller();
        ctrl.start();

        let first = device(&ctrl, "sam:01:02:01:01:00");
        let second = device(&ctrl, "sam:01:02:01:01:00");
        Device::add(&first, None).unwrap();

        assert!(matches!(
            Device::add(&second, None),
            Err(DeviceError::DuplicateDevice(_))
        ));
        assert_eq!(ctrl.clients().len(), 1);
    }

    #[test]
    fn remove_is_idempotent_and_recursive() {
        let ctrl = controller();
        ctrl.start();

        let hub = device(&ctrl, "sam:01:0e:01:00:00");
        Device::add(&hub, None).unwrap();
        let child = device(&ctrl, "sam:01:02:02:01:00");
        Device::add(&child, Some(&hub)).unwrap();

        Device::remove(&hub);
        assert!(ctrl.clients().is_empty());
        assert!(hub.children().is_empty());

        // Second remove is a no-op.
        Device::remove(&hub);
        Device::remove(&child);
    }

    #[test]
    fn shutdown_blocks_further_adds() {
        let ctrl = controller();
        ctrl.start();

        let resident = device(&ctrl, "sam:01:03:01:00:01");
        Device::add(&resident, None).unwrap();

        ctrl.shutdown();
        assert!(ctrl.clients().is_empty());

        let late = device(&ctrl, "sam:01:02:01:01:00");
        assert!(matches!(
            Device::add(&late, None),
            Err(DeviceError::NotReady)
        ));
    }
}
