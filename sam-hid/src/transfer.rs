//! Chunked retrieval of descriptor blobs.
//!
//! A descriptor can exceed the bounded response buffer of a single
//! request, so it is fetched in two phases: a metadata request declares
//! the total length, then repeated offset-addressed reads return chunks of
//! at most [`CHUNK_LEN`] bytes until the declared length is reached or the
//! remote side sets the end flag. The transfer either yields the complete
//! blob or nothing; an end flag below the declared length is a truncation
//! error, and a zero-byte chunk without the end flag is a protocol
//! violation rather than an endless loop.

use std::mem;

use sam_core::request::{Request, RequestChannel, RequestError};
use thiserror::Error;

/// Target category of chunk-capable peripherals.
pub const TC_HID: u8 = 0x15;

/// Command id of the chunked-transfer request.
pub const CID_TRANSFER: u8 = 0x04;

/// Channel these peripherals are addressed on.
pub const HID_CHANNEL: u8 = 0x02;

/// Payload cap of one response, and therefore the maximum chunk length.
pub const CHUNK_LEN: u32 = 0x76;

const OP_DESCRIPTOR_INFO: u8 = 0;
const OP_DESCRIPTOR_READ: u8 = 1;
const OP_METADATA: u8 = 2;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Request(#[from] RequestError),

    /// The remote side violated the transfer contract. Fatal, never
    /// retried.
    #[error("transfer protocol violation: {0}")]
    Protocol(&'static str),

    /// The end flag was set before the declared total length was reached.
    #[error("transfer truncated at {received} of {declared} bytes")]
    Truncated { declared: u32, received: u32 },
}

/// Header of every transfer request; echoed back in front of each
/// response, with `length` rewritten to the byte count actually returned
/// and `end` flagging the final chunk.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C, packed)]
pub struct TransferHeader {
    pub id: u8,
    pub offset: u32,
    pub length: u32,
    pub end: u8,
}

unsafe impl plain::Plain for TransferHeader {}

/// Fixed-size reply of the descriptor-info operation.
#[derive(Clone, Copy, Default)]
#[repr(C, packed)]
struct DescriptorInfo {
    len: u8,
    _reserved: [u8; 6],
    descriptor_len: u16,
}

unsafe impl plain::Plain for DescriptorInfo {}

/// Fixed-size device metadata record. Retrieved in a single request, not
/// chunked.
#[derive(Clone, Copy, Default)]
#[repr(C, packed)]
pub struct DeviceMetadata {
    pub len: u32,
    pub vendor: u16,
    pub product: u16,
    _reserved: [u8; 24],
}

unsafe impl plain::Plain for DeviceMetadata {}

fn transfer_request(
    channel: &dyn RequestChannel,
    instance: u8,
    op: u8,
    offset: u32,
) -> Result<(TransferHeader, Vec<u8>), TransferError> {
    let header = TransferHeader {
        id: op,
        offset,
        length: CHUNK_LEN,
        end: 0,
    };

    let req = Request::new(TC_HID, CID_TRANSFER, instance, HID_CHANNEL)
        .with_payload(unsafe { plain::as_bytes(&header) }.to_vec())
        .expect_response();
    let mut resp = channel.execute(&req)?;

    let header_len = mem::size_of::<TransferHeader>();
    if resp.len() < header_len {
        return Err(TransferError::Protocol("response shorter than its header"));
    }

    let echoed = *plain::from_bytes::<TransferHeader>(&resp[..header_len])
        .map_err(|_| TransferError::Protocol("malformed response header"))?;
    resp.drain(..header_len);
    Ok((echoed, resp))
}

/// Fetches the full report descriptor of `instance`.
pub fn fetch_descriptor(
    channel: &dyn RequestChannel,
    instance: u8,
) -> Result<Vec<u8>, TransferError> {
    // Phase 1: length discovery.
    let (_, info_bytes) = transfer_request(channel, instance, OP_DESCRIPTOR_INFO, 0)?;
    let info = plain::from_bytes::<DescriptorInfo>(&info_bytes)
        .map_err(|_| TransferError::Protocol("short descriptor-info reply"))?;
    let total = u32::from(info.descriptor_len);

    // Phase 2: chunked body fetch.
    let mut buf = vec![0u8; total as usize];
    let mut offset: u32 = 0;

    while offset < total {
        let (header, chunk) = transfer_request(channel, instance, OP_DESCRIPTOR_READ, offset)?;
        let returned = header.length;

        if returned == 0 && header.end == 0 {
            return Err(TransferError::Protocol("empty chunk without end flag"));
        }
        if chunk.len() < returned as usize {
            return Err(TransferError::Protocol("chunk shorter than declared"));
        }
        if offset.checked_add(returned).map_or(true, |end| end > total) {
            return Err(TransferError::Protocol("chunk beyond declared length"));
        }

        let start = offset as usize;
        buf[start..start + returned as usize].copy_from_slice(&chunk[..returned as usize]);
        offset += returned;

        if header.end != 0 {
            break;
        }
    }

    // Success only when the declared length was fully retrieved; a partial
    // buffer never escapes.
    if offset < total {
        return Err(TransferError::Truncated {
            declared: total,
            received: offset,
        });
    }

    log::debug!("instance {:#04x}: fetched {} descriptor bytes", instance, total);
    Ok(buf)
}

/// Retrieves the fixed-size device metadata record (vendor/product
/// identity) of `instance`.
pub fn device_metadata(
    channel: &dyn RequestChannel,
    instance: u8,
) -> Result<DeviceMetadata, TransferError> {
    let (_, bytes) = transfer_request(channel, instance, OP_METADATA, 0)?;
    let meta = plain::from_bytes::<DeviceMetadata>(&bytes)
        .map_err(|_| TransferError::Protocol("short metadata reply"))?;
    Ok(*meta)
}
