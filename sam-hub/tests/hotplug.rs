//! End-to-end hot-plug behavior against a mock aggregator.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sam_core::device::{Device, DeviceError};
use sam_core::notifier::Event;
use sam_core::request::{Request, RequestChannel, RequestError};
use sam_core::uid::{DeviceId, DeviceUid, TypeTag};
use sam_core::{Controller, Driver};
use sam_hub::topology::{NODE_GROUP_SP8, NODE_HUB_KIP};
use sam_hub::{hub_state_text, HubDriver, PlatformHub, CID_CONNECTION, TC_HUB};

const SETTLE: Duration = Duration::from_millis(50);

struct MockEc {
    connected: AtomicBool,
    queries: AtomicUsize,
}

struct EcChannel(Arc<MockEc>);

impl RequestChannel for EcChannel {
    fn execute(&self, req: &Request) -> Result<Vec<u8>, RequestError> {
        if req.target_category == TC_HUB && req.command_id == CID_CONNECTION {
            self.0.queries.fetch_add(1, Ordering::SeqCst);
            return Ok(vec![self.0.connected.load(Ordering::SeqCst) as u8]);
        }
        Err(RequestError::NoSuchDevice)
    }
}

struct ProbeCounter {
    table: Vec<DeviceId>,
    probes: AtomicUsize,
    removes: AtomicUsize,
    fail: bool,
}

impl ProbeCounter {
    fn new(uid: &str, fail: bool) -> Arc<Self> {
        let uid: DeviceUid = uid.parse().unwrap();
        Arc::new(ProbeCounter {
            table: vec![DeviceId::new(TypeTag::from_uid(&uid))],
            probes: AtomicUsize::new(0),
            removes: AtomicUsize::new(0),
            fail,
        })
    }
}

impl Driver for ProbeCounter {
    fn name(&self) -> &str {
        "probe_counter"
    }

    fn match_table(&self) -> &[DeviceId] {
        &self.table
    }

    fn probe(&self, _dev: &Arc<Device>) -> Result<(), DeviceError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(DeviceError::Probe("mock probe failure".into()))
        } else {
            Ok(())
        }
    }

    fn remove(&self, _dev: &Arc<Device>) {
        self.removes.fetch_add(1, Ordering::SeqCst);
    }
}

struct Fixture {
    ec: Arc<MockEc>,
    ctrl: Arc<Controller>,
    hub_dev: Arc<Device>,
}

fn setup(extra_drivers: &[Arc<dyn Driver>]) -> Fixture {
    let ec = Arc::new(MockEc {
        connected: AtomicBool::new(false),
        queries: AtomicUsize::new(0),
    });

    let ctrl = Controller::new("sam0", Box::new(EcChannel(ec.clone())));
    ctrl.start();

    ctrl.bus().register(Arc::new(
        HubDriver::new(NODE_GROUP_SP8).with_connect_delay(SETTLE),
    ));
    for driver in extra_drivers {
        ctrl.bus().register(driver.clone());
    }

    let hub = PlatformHub::register(&ctrl, "MSHW0263").unwrap();
    let hub_uid = NODE_HUB_KIP.uid().unwrap();
    let hub_dev = hub
        .devices()
        .iter()
        .find(|dev| dev.uid() == hub_uid)
        .cloned()
        .unwrap();

    // Let the initial probe-time re-evaluation settle (disconnected).
    thread::sleep(Duration::from_millis(20));

    Fixture { ec, ctrl, hub_dev }
}

fn connect_event(connected: bool) -> Event {
    Event {
        target_category: TC_HUB,
        command_id: CID_CONNECTION,
        instance_id: 0x00,
        channel: 0x01,
        data: vec![connected as u8],
    }
}

#[test]
fn connect_populates_after_settle_delay() {
    let keyboard = ProbeCounter::new("sam:01:15:02:01:00", false);
    let fx = setup(&[keyboard.clone() as Arc<dyn Driver>]);

    assert_eq!(hub_state_text(&fx.hub_dev), Some("disconnected"));
    assert!(fx.hub_dev.children().is_empty());

    fx.ec.connected.store(true, Ordering::SeqCst);
    fx.ctrl.notifiers().dispatch(&connect_event(true));

    // The settle delay has not elapsed yet.
    assert!(fx.hub_dev.children().is_empty());

    thread::sleep(SETTLE + Duration::from_millis(100));

    // All four KIP template children materialized, the keyboard probed once.
    assert_eq!(fx.hub_dev.children().len(), 4);
    assert_eq!(hub_state_text(&fx.hub_dev), Some("connected"));
    assert_eq!(keyboard.probes.load(Ordering::SeqCst), 1);
}

#[test]
fn disconnect_leaves_no_residual_children() {
    let fx = setup(&[]);

    fx.ec.connected.store(true, Ordering::SeqCst);
    fx.ctrl.notifiers().dispatch(&connect_event(true));
    thread::sleep(SETTLE + Duration::from_millis(100));
    assert_eq!(fx.hub_dev.children().len(), 4);

    fx.ec.connected.store(false, Ordering::SeqCst);
    fx.ctrl.notifiers().dispatch(&connect_event(false));
    thread::sleep(Duration::from_millis(100));

    assert!(fx.hub_dev.children().is_empty());
    assert_eq!(hub_state_text(&fx.hub_dev), Some("disconnected"));
}

#[test]
fn redundant_state_is_a_no_op() {
    let fx = setup(&[]);

    fx.ec.connected.store(true, Ordering::SeqCst);
    fx.ctrl.notifiers().dispatch(&connect_event(true));
    thread::sleep(SETTLE + Duration::from_millis(100));
    assert_eq!(fx.hub_dev.children().len(), 4);

    // Same state again: no child adds or removes, just another query.
    fx.ctrl.notifiers().dispatch(&connect_event(true));
    thread::sleep(SETTLE + Duration::from_millis(100));

    let children = fx.hub_dev.children();
    assert_eq!(children.len(), 4);
    let mut names: Vec<_> = children.iter().map(|c| c.name().to_owned()).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 4);
}

#[test]
fn failed_child_probe_spares_its_siblings() {
    let keyboard = ProbeCounter::new("sam:01:15:02:01:00", true);
    let touchpad = ProbeCounter::new("sam:01:15:02:03:00", false);
    let fx = setup(&[
        keyboard.clone() as Arc<dyn Driver>,
        touchpad.clone() as Arc<dyn Driver>,
    ]);

    fx.ec.connected.store(true, Ordering::SeqCst);
    fx.ctrl.notifiers().dispatch(&connect_event(true));
    thread::sleep(SETTLE + Duration::from_millis(100));

    // The keyboard was backed out; the remaining three children stand.
    assert_eq!(fx.hub_dev.children().len(), 3);
    assert_eq!(keyboard.probes.load(Ordering::SeqCst), 1);
    assert_eq!(touchpad.probes.load(Ordering::SeqCst), 1);
}

#[test]
fn hub_removal_tears_down_children_and_worker() {
    let keyboard = ProbeCounter::new("sam:01:15:02:01:00", false);
    let fx = setup(&[keyboard.clone() as Arc<dyn Driver>]);

    fx.ec.connected.store(true, Ordering::SeqCst);
    fx.ctrl.notifiers().dispatch(&connect_event(true));
    thread::sleep(SETTLE + Duration::from_millis(100));
    assert_eq!(fx.hub_dev.children().len(), 4);

    let queries_before_removal = fx.ec.queries.load(Ordering::SeqCst);
    Device::remove(&fx.hub_dev);

    assert!(fx.hub_dev.children().is_empty());
    assert_eq!(keyboard.removes.load(Ordering::SeqCst), 1);

    // The worker is gone: further events schedule nothing.
    fx.ctrl.notifiers().dispatch(&connect_event(false));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(fx.ec.queries.load(Ordering::SeqCst), queries_before_removal);
}

#[test]
fn removal_during_settle_delay_cancels_the_update() {
    let fx = setup(&[]);

    fx.ec.connected.store(true, Ordering::SeqCst);
    fx.ctrl.notifiers().dispatch(&connect_event(true));

    // Remove the hub while the connect settle delay is still running: the
    // queued re-evaluation is dropped, removal does not wait out the delay,
    // and no children ever materialize.
    let queries_before_removal = fx.ec.queries.load(Ordering::SeqCst);
    let start = std::time::Instant::now();
    Device::remove(&fx.hub_dev);
    assert!(start.elapsed() < SETTLE);

    thread::sleep(SETTLE + Duration::from_millis(100));
    assert!(fx.hub_dev.children().is_empty());
    assert_eq!(fx.ec.queries.load(Ordering::SeqCst), queries_before_removal);
}

#[test]
fn controller_shutdown_clears_the_tree() {
    let fx = setup(&[]);

    fx.ec.connected.store(true, Ordering::SeqCst);
    fx.ctrl.notifiers().dispatch(&connect_event(true));
    thread::sleep(SETTLE + Duration::from_millis(100));

    fx.ctrl.shutdown();
    assert!(fx.ctrl.clients().is_empty());
    assert!(fx.hub_dev.children().is_empty());
}
