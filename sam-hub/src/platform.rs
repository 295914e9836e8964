//! The platform (root) hub.
//!
//! Unlike the hot-plug hubs, the platform hub's children are fixed for the
//! lifetime of the controller: the model's node group is resolved once and
//! the root node's children are registered directly under the controller.

use std::sync::Arc;

use sam_core::device::{Device, DeviceError};
use sam_core::Controller;

use crate::enumerate::hub_register_clients;
use crate::topology::{node_group_for_model, NodeGroup};

pub struct PlatformHub {
    devices: Vec<Arc<Device>>,
    group: NodeGroup,
}

impl PlatformHub {
    /// Registers the root-level devices for `model` under `ctrl`.
    ///
    /// Fails with [`DeviceError::NoMatch`] for unknown models; any
    /// registration failure rolls back the devices added so far.
    pub fn register(ctrl: &Arc<Controller>, model: &str) -> Result<PlatformHub, DeviceError> {
        let group = node_group_for_model(model).ok_or(DeviceError::NoMatch)?;
        let root = group
            .iter()
            .copied()
            .find(|node| node.parent.is_none())
            .ok_or(DeviceError::NoMatch)?;

        let devices = hub_register_clients(None, ctrl, group, root)?;
        log::info!(
            "{}: platform hub for {} registered {} devices",
            ctrl.name(),
            model,
            devices.len()
        );

        Ok(PlatformHub { devices, group })
    }

    pub fn group(&self) -> NodeGroup {
        self.group
    }

    pub fn devices(&self) -> &[Arc<Device>] {
        &self.devices
    }

    /// Removes every device this platform hub registered.
    pub fn remove(&mut self) {
        for dev in self.devices.drain(..).rev() {
            Device::remove(&dev);
        }
    }
}
