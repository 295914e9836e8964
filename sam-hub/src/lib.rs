//! Device registry and hot-plug hubs for the aggregator client layer.
//!
//! Client devices on the aggregator cannot be auto-detected; each platform
//! model ships a static template forest describing them. This crate turns
//! those templates into registered devices: the platform hub instantiates
//! the fixed root-level set once, and hot-plug hub devices keep their
//! sub-trees in sync with connect/disconnect events.

pub mod enumerate;
pub mod hub;
pub mod platform;
pub mod topology;
pub mod worker;

pub use enumerate::{hub_add_device, hub_register_clients};
pub use hub::{hub_resume, hub_state_text, HubDriver, HubState, CID_CONNECTION, TC_HUB};
pub use platform::PlatformHub;
pub use topology::{node_group_for_model, NodeGroup, SoftwareNode};
