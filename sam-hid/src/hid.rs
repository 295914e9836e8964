//! HID client driver: probes transfer-capable peripherals, routes host
//! report traffic to the right command ids, and forwards input events to
//! a consumer once one has opened the device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use sam_core::bus::Driver;
use sam_core::device::{Device, DeviceError};
use sam_core::notifier::{Event, EventMask, EventStatus, Notifier, NotifierHandle};
use sam_core::request::Request;
use sam_core::uid::DeviceId;

use crate::transfer::{self, TransferError, HID_CHANNEL, TC_HID};

/// Direction and kind of a host-initiated report exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportType {
    Output,
    FeatureGet,
    FeatureSet,
}

impl ReportType {
    fn command_id(self) -> u8 {
        match self {
            ReportType::Output => 0x01,
            ReportType::FeatureGet => 0x02,
            ReportType::FeatureSet => 0x03,
        }
    }
}

/// Report numbers whose feature-get the remote side does not implement.
/// Requests for these complete immediately with an empty reply instead of
/// timing out on the wire.
const FEATURE_GET_SKIP: [u8; 5] = [0x06, 0x07, 0x08, 0x09, 0x0b];

/// Command ids carrying input reports in event payloads.
const INPUT_EVENT_CIDS: [u8; 3] = [0x00, 0x03, 0x04];

/// Consumer callback for input reports. The payload starts with the
/// report number.
pub type InputHandler = Box<dyn Fn(&[u8]) + Send + Sync>;

/// Per-device state, stored as driver data on the bound [`Device`].
pub struct HidCore {
    dev: Arc<Device>,
    instance: u8,
    vendor: u16,
    product: u16,
    descriptor: Vec<u8>,
    notifier: NotifierHandle,
    started: AtomicBool,
    consumer: Mutex<Option<InputHandler>>,
}

impl HidCore {
    /// Vendor/product identity as reported by the device metadata record.
    pub fn device_info(&self) -> (u16, u16) {
        (self.vendor, self.product)
    }

    pub fn descriptor(&self) -> &[u8] {
        &self.descriptor
    }

    /// Starts input delivery. Events arriving before this are dropped.
    pub fn open(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    pub fn close(&self) {
        self.started.store(false, Ordering::SeqCst);
    }

    pub fn set_input_handler(&self, handler: InputHandler) {
        *self.consumer.lock().unwrap() = Some(handler);
    }

    /// Synchronous host-initiated report exchange. Returns the reply
    /// payload for feature-get, an empty vec otherwise.
    pub fn raw_request(
        &self,
        ty: ReportType,
        report_num: u8,
        data: &[u8],
    ) -> Result<Vec<u8>, DeviceError> {
        if ty == ReportType::FeatureGet && FEATURE_GET_SKIP.contains(&report_num) {
            return Ok(Vec::new());
        }

        let payload = match ty {
            ReportType::FeatureGet => vec![report_num],
            _ => {
                let mut buf = Vec::with_capacity(data.len() + 1);
                buf.push(report_num);
                buf.extend_from_slice(data);
                buf
            }
        };

        let mut req = Request::new(TC_HID, ty.command_id(), self.instance, HID_CHANNEL)
            .with_payload(payload);
        if ty == ReportType::FeatureGet {
            req = req.expect_response();
        }

        Ok(self.dev.ctrl().request(&req)?)
    }

    fn handle_event(&self, event: &Event) -> EventStatus {
        if event.channel != HID_CHANNEL || !INPUT_EVENT_CIDS.contains(&event.command_id) {
            return EventStatus::empty();
        }
        if !self.started.load(Ordering::SeqCst) {
            // Ours, but nobody is listening yet.
            return EventStatus::HANDLED;
        }
        if let Some(handler) = self.consumer.lock().unwrap().as_ref() {
            handler(&event.data);
        }
        EventStatus::HANDLED
    }
}

/// Bus driver binding HID peripherals by their identity table.
pub struct HidDriver {
    table: Vec<DeviceId>,
}

impl HidDriver {
    pub fn new(table: Vec<DeviceId>) -> Self {
        HidDriver { table }
    }
}

impl Driver for HidDriver {
    fn name(&self) -> &str {
        "sam_hid"
    }

    fn match_table(&self) -> &[DeviceId] {
        &self.table
    }

    fn probe(&self, dev: &Arc<Device>) -> Result<(), DeviceError> {
        let instance = dev.uid().instance;
        let ctrl = dev.ctrl().clone();

        let meta = transfer::device_metadata(ctrl.channel(), instance).map_err(probe_error)?;
        let descriptor = transfer::fetch_descriptor(ctrl.channel(), instance).map_err(probe_error)?;

        let core = Arc::new_cyclic(|weak: &Weak<HidCore>| {
            let hook = weak.clone();
            let notifier = ctrl.notifiers().register(Notifier {
                target_category: TC_HID,
                instance,
                mask: EventMask::TargetAndInstance,
                priority: 0,
                handler: Box::new(move |event| match hook.upgrade() {
                    Some(core) => core.handle_event(event),
                    None => EventStatus::empty(),
                }),
            });

            HidCore {
                dev: dev.clone(),
                instance,
                vendor: meta.vendor,
                product: meta.product,
                descriptor,
                notifier,
                started: AtomicBool::new(false),
                consumer: Mutex::new(None),
            }
        });

        log::info!(
            "{}: bound hid device {:04x}:{:04x}, {} descriptor bytes",
            dev.name(),
            core.vendor,
            core.product,
            core.descriptor.len()
        );

        dev.set_drvdata(core);
        Ok(())
    }

    fn remove(&self, dev: &Arc<Device>) {
        if let Some(core) = dev.take_drvdata::<Arc<HidCore>>() {
            core.close();
            dev.ctrl().notifiers().unregister(core.notifier);
        }
    }
}

fn probe_error(err: TransferError) -> DeviceError {
    match err {
        TransferError::Request(e) => DeviceError::Request(e),
        other => DeviceError::Probe(other.to_string()),
    }
}

/// Runs `f` against the [`HidCore`] bound to `dev`, if any.
pub fn with_hid_core<R>(dev: &Arc<Device>, f: impl FnOnce(&HidCore) -> R) -> Option<R> {
    dev.with_drvdata(|core: &Arc<HidCore>| f(core))
}
