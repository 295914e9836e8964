//! The shared controller handle.
//!
//! The controller owns the request channel, the driver registry and the
//! notifier registry. A single state lock guards both the operational state
//! word and the list of direct children, so the started-check and a tree
//! insertion form one critical section: once a device is registered under a
//! started controller, the controller cannot leave the started state before
//! that device has been removed.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::bus::Bus;
use crate::device::Device;
use crate::notifier::NotifierRegistry;
use crate::request::{Request, RequestChannel, RequestError};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ControllerState {
    Initialized,
    Started,
    Stopped,
}

pub struct Controller {
    name: String,
    channel: Box<dyn RequestChannel>,
    bus: Bus,
    notifiers: NotifierRegistry,
    inner: Mutex<ControllerInner>,
}

pub(crate) struct ControllerInner {
    pub state: ControllerState,
    pub children: Vec<Arc<Device>>,
}

impl Controller {
    pub fn new(name: impl Into<String>, channel: Box<dyn RequestChannel>) -> Arc<Self> {
        Arc::new(Controller {
            name: name.into(),
            channel,
            bus: Bus::new(),
            notifiers: NotifierRegistry::new(),
            inner: Mutex::new(ControllerInner {
                state: ControllerState::Initialized,
                children: Vec::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn notifiers(&self) -> &NotifierRegistry {
        &self.notifiers
    }

    pub fn channel(&self) -> &dyn RequestChannel {
        &*self.channel
    }

    /// Executes a request, failing fast with `NotReady` unless started.
    pub fn request(&self, req: &Request) -> Result<Vec<u8>, RequestError> {
        if self.state() != ControllerState::Started {
            return Err(RequestError::NotReady);
        }
        self.channel.execute(req)
    }

    pub fn state(&self) -> ControllerState {
        self.inner.lock().unwrap().state
    }

    pub fn start(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == ControllerState::Initialized {
            inner.state = ControllerState::Started;
            log::info!("{}: controller started", self.name);
        }
    }

    /// Snapshot of the direct children.
    pub fn clients(&self) -> Vec<Arc<Device>> {
        self.inner.lock().unwrap().children.clone()
    }

    /// Stops the controller and tears down every registered client device.
    ///
    /// The state is moved out of `Started` under the state lock, so no new
    /// device can be added once teardown has begun; the children collected
    /// in the same critical section are then finalized best-effort.
    pub fn shutdown(self: &Arc<Self>) {
        let children = {
            let mut inner = self.inner.lock().unwrap();
            inner.state = ControllerState::Stopped;
            std::mem::take(&mut inner.children)
        };

        for dev in children {
            Device::finalize_detached(&dev);
        }
        log::info!("{}: controller stopped", self.name);
    }

    pub(crate) fn lock_inner(&self) -> MutexGuard<'_, ControllerInner> {
        self.inner.lock().unwrap()
    }

    pub(crate) fn detach_child(&self, dev: &Arc<Device>) {
        let mut inner = self.inner.lock().unwrap();
        inner.children.retain(|c| !Arc::ptr_eq(c, dev));
    }
}
