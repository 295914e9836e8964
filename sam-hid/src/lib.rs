//! HID client-device support: chunked descriptor retrieval and report
//! routing for aggregator-attached input peripherals.

pub mod hid;
pub mod transfer;

pub use hid::{with_hid_core, HidCore, HidDriver, InputHandler, ReportType};
pub use transfer::{
    device_metadata, fetch_descriptor, DeviceMetadata, TransferError, CHUNK_LEN, CID_TRANSFER,
    HID_CHANNEL, TC_HID,
};
