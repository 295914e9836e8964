//! The hot-plug hub driver.
//!
//! A hub owns a sub-tree of template nodes and keeps the materialized
//! child devices in sync with the physical connection state of its
//! subsystem. Connection-state changes arrive as asynchronous events; the
//! handler only schedules a debounced re-evaluation task, which queries
//! the current state from the aggregator and populates or tears down the
//! children accordingly.

use std::str;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sam_core::device::{Device, DeviceError};
use sam_core::notifier::{Event, EventMask, EventStatus, Notifier, NotifierHandle};
use sam_core::request::{request_retry, Request, RequestError, REQUEST_MAX_RETRIES};
use sam_core::uid::DeviceId;
use sam_core::{Driver, TypeTag};
use thiserror::Error;

use crate::enumerate::hub_register_clients;
use crate::topology::{children_of, node_for_uid, NodeGroup, SoftwareNode};
use crate::worker::UpdateWorker;

/// Target category of the detachable-subsystem (hub) controller.
pub const TC_HUB: u8 = 0x0e;

/// Command id of both the connection-state query and the connection event.
pub const CID_CONNECTION: u8 = 0x2c;

/// Settle delay before re-evaluating after a connect event. Newly attached
/// sub-devices need some time to become addressable; determined
/// experimentally in the firmware this was written against.
pub const HUB_CONNECT_DELAY: Duration = Duration::from_millis(250);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HubState {
    Uninitialized,
    Connected,
    Disconnected,
}

impl HubState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

#[derive(Debug, Error)]
#[error("invalid hub state")]
pub struct InvalidHubState;

impl str::FromStr for HubState {
    type Err = InvalidHubState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "uninitialized" => Self::Uninitialized,
            "connected" => Self::Connected,
            "disconnected" => Self::Disconnected,
            _ => return Err(InvalidHubState),
        })
    }
}

struct HubCore {
    dev: Arc<Device>,
    group: NodeGroup,
    node: &'static SoftwareNode,
    state: Mutex<HubState>,
}

impl HubCore {
    fn query_state(&self) -> Result<HubState, RequestError> {
        let req = Request::new(TC_HUB, CID_CONNECTION, 0x00, 0x01).expect_response();
        let resp = request_retry(self.dev.ctrl().channel(), &req, REQUEST_MAX_RETRIES)?;

        match resp.first() {
            Some(&connected) => Ok(if connected != 0 {
                HubState::Connected
            } else {
                HubState::Disconnected
            }),
            None => Err(RequestError::Protocol("empty connection-state response")),
        }
    }

    /// The debounced re-evaluation task. Only ever runs on the hub's
    /// worker thread, so state transitions cannot race each other.
    fn update(&self) {
        let queried = match self.query_state() {
            Ok(state) => state,
            Err(err) => {
                log::error!("{}: failed to query connection state: {}", self.dev.name(), err);
                return;
            }
        };

        {
            let mut state = self.state.lock().unwrap();
            if *state == queried {
                return;
            }
            *state = queried;
        }

        log::info!("{}: hub is now {}", self.dev.name(), queried.as_str());

        if queried == HubState::Connected {
            // The state transition stands even if population partially
            // fails; "link up" and "children populated" are decoupled.
            if let Err(err) =
                hub_register_clients(Some(&self.dev), self.dev.ctrl(), self.group, self.node)
            {
                log::error!("{}: failed to populate hub devices: {}", self.dev.name(), err);
            }
        } else {
            Device::remove_clients(&self.dev);
        }
    }
}

struct HubData {
    core: Arc<HubCore>,
    worker: Arc<UpdateWorker>,
    notifier: NotifierHandle,
}

/// Driver for the hot-plug hub devices of a node group. Matches every node
/// in the group that has template children of its own.
pub struct HubDriver {
    group: NodeGroup,
    table: Vec<DeviceId>,
    connect_delay: Duration,
}

impl HubDriver {
    pub fn new(group: NodeGroup) -> Self {
        let table = group
            .iter()
            .filter(|node| node.uid().is_some())
            .filter(|node| children_of(group, node).next().is_some())
            .filter_map(|node| node.uid())
            .map(|uid| DeviceId::new(TypeTag::from_uid(&uid)))
            .collect();

        HubDriver {
            group,
            table,
            connect_delay: HUB_CONNECT_DELAY,
        }
    }

    /// Overrides the connect settle delay. Intended for tests.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    fn handle_event(
        worker: &UpdateWorker,
        connect_delay: Duration,
        dev: &Arc<Device>,
        event: &Event,
    ) -> EventStatus {
        if event.command_id != CID_CONNECTION {
            return EventStatus::empty();
        }

        let Some(&connected) = event.data.first() else {
            log::error!("{}: unexpected event payload size: {}", dev.name(), event.data.len());
            return EventStatus::empty();
        };

        let delay = if connected != 0 {
            connect_delay
        } else {
            Duration::ZERO
        };
        worker.schedule(delay);

        EventStatus::HANDLED
    }
}

impl Driver for HubDriver {
    fn name(&self) -> &str {
        "sam_hub"
    }

    fn match_table(&self) -> &[DeviceId] {
        &self.table
    }

    fn probe(&self, dev: &Arc<Device>) -> Result<(), DeviceError> {
        let node = node_for_uid(self.group, dev.uid()).ok_or(DeviceError::NoMatch)?;

        let core = Arc::new(HubCore {
            dev: dev.clone(),
            group: self.group,
            node,
            state: Mutex::new(HubState::Uninitialized),
        });

        let worker = {
            let core = core.clone();
            Arc::new(UpdateWorker::spawn(move || core.update()))
        };

        // Repopulating the tree must precede every other listener for this
        // event class, so this notifier registers at the lowest (earliest)
        // priority value.
        let ctrl = dev.ctrl().clone();
        let notifier = {
            let worker = worker.clone();
            let dev = dev.clone();
            let connect_delay = self.connect_delay;
            ctrl.notifiers().register(Notifier {
                target_category: TC_HUB,
                instance: 0x00,
                mask: EventMask::Target,
                priority: i32::MIN,
                handler: Box::new(move |event| {
                    Self::handle_event(&worker, connect_delay, &dev, event)
                }),
            })
        };

        dev.set_drvdata(HubData {
            core,
            worker: worker.clone(),
            notifier,
        });

        // Pick up the current state without waiting for the first event.
        worker.schedule(Duration::ZERO);
        Ok(())
    }

    fn remove(&self, dev: &Arc<Device>) {
        let Some(data) = dev.take_drvdata::<HubData>() else {
            return;
        };

        dev.ctrl().notifiers().unregister(data.notifier);
        // Waits for an in-flight re-evaluation, so none runs against a
        // partially destroyed hub.
        data.worker.shutdown();
        Device::remove_clients(dev);
    }
}

/// Current hub state as diagnostic text, if `dev` is a registered hub.
pub fn hub_state_text(dev: &Arc<Device>) -> Option<&'static str> {
    dev.with_drvdata::<HubData, _>(|data| data.core.state.lock().unwrap().as_str())
}

/// Re-evaluates the hub's connection state immediately. Called on
/// resume-from-suspend, using the same mechanism as hot-plug events.
pub fn hub_resume(dev: &Arc<Device>) {
    dev.with_drvdata::<HubData, _>(|data| data.worker.schedule(Duration::ZERO));
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn state_text_round_trip() {
        for state in [
            HubState::Uninitialized,
            HubState::Connected,
            HubState::Disconnected,
        ] {
            assert_eq!(state.as_str().parse::<HubState>().unwrap(), state);
        }
        assert!("attached".parse::<HubState>().is_err());
    }

    #[test]
    fn driver_table_covers_exactly_the_hub_nodes() {
        use crate::topology::{NODE_GROUP_SP8, NODE_HUB_KIP};

        let driver = HubDriver::new(NODE_GROUP_SP8);
        let hub_uid = NODE_HUB_KIP.uid().unwrap();

        assert_eq!(driver.match_table().len(), 1);
        assert_eq!(driver.match_table()[0].tag, TypeTag::from_uid(&hub_uid));
    }
}
