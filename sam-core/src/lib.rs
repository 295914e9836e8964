//! Client-device layer for an embedded-controller aggregator.
//!
//! The aggregator exposes many logical peripherals over one physical
//! channel. This crate provides the pieces every client shares: device
//! identity and naming, the synchronous request channel interface, the
//! shared controller handle with its state lock, the driver-matching bus,
//! logical-device lifecycle, and asynchronous event dispatch.

pub mod bus;
pub mod controller;
pub mod device;
pub mod logger;
pub mod notifier;
pub mod request;
pub mod uid;

pub use bus::{Bus, Driver};
pub use controller::{Controller, ControllerState};
pub use device::{Device, DeviceError};
pub use notifier::{Event, EventMask, EventStatus, Notifier, NotifierHandle, NotifierRegistry};
pub use request::{request_retry, Request, RequestChannel, RequestError, REQUEST_MAX_RETRIES};
pub use uid::{device_id_match, DeviceId, DeviceUid, TypeTag};
