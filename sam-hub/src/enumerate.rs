//! Materializing devices from template nodes.

use std::sync::Arc;

use sam_core::device::{Device, DeviceError};
use sam_core::uid::TypeTag;
use sam_core::Controller;

use crate::topology::{children_of, NodeGroup, SoftwareNode};

/// Builds, registers and probes the device a template node describes.
///
/// Fails with [`DeviceError::NoMatch`] when the node does not name a
/// device. A probe failure backs the device out of the tree and is
/// reported as [`DeviceError::Probe`]; tree-insertion failures are
/// returned as-is.
pub fn hub_add_device(
    parent: Option<&Arc<Device>>,
    ctrl: &Arc<Controller>,
    node: &'static SoftwareNode,
) -> Result<Arc<Device>, DeviceError> {
    let uid = node.uid().ok_or(DeviceError::NoMatch)?;
    let dev = Device::alloc(ctrl.clone(), uid, TypeTag::from_uid(&uid));

    Device::add(&dev, parent)?;

    if let Err(err) = ctrl.bus().probe_device(&dev) {
        Device::remove(&dev);
        return Err(DeviceError::Probe(err.to_string()));
    }

    Ok(dev)
}

/// Registers the devices for every child node of `node` within `group`.
///
/// Non-device nodes are skipped. A probe failure affects only that child:
/// it is logged and its siblings still get probed. Any other failure rolls
/// back every device added during this pass and propagates.
pub fn hub_register_clients(
    parent: Option<&Arc<Device>>,
    ctrl: &Arc<Controller>,
    group: NodeGroup,
    node: &'static SoftwareNode,
) -> Result<Vec<Arc<Device>>, DeviceError> {
    let mut added = Vec::new();

    for child in children_of(group, node) {
        match hub_add_device(parent, ctrl, child) {
            Ok(dev) => added.push(dev),
            Err(DeviceError::NoMatch) => continue,
            Err(DeviceError::Probe(err)) => {
                log::warn!("{}: probe failed: {}", child.name, err);
            }
            Err(err) => {
                for dev in added.iter().rev() {
                    Device::remove(dev);
                }
                return Err(err);
            }
        }
    }

    Ok(added)
}
