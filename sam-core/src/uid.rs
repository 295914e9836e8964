//! Device identity: the five-field numeric address and the 128-bit type tag.
//!
//! Device names follow the module-alias scheme `sam:dd:cc:tt:ii:ff`, where
//! the fields are domain, target category, target ID, instance ID and
//! function, each as two-digit hexadecimal.

use std::{fmt, str};

use thiserror::Error;
use uuid::Uuid;

/// Five-field address of a logical device on the aggregator.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct DeviceUid {
    pub domain: u8,
    pub category: u8,
    pub target: u8,
    pub instance: u8,
    pub function: u8,
}

#[derive(Debug, Error)]
#[error("invalid device uid: {0}")]
pub struct InvalidUid(pub &'static str);

impl fmt::Display for DeviceUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sam:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.domain, self.category, self.target, self.instance, self.function
        )
    }
}

impl str::FromStr for DeviceUid {
    type Err = InvalidUid;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix("sam:").ok_or(InvalidUid("missing marker"))?;

        let mut fields = [0u8; 5];
        let mut parts = rest.split(':');
        for field in fields.iter_mut() {
            let part = parts.next().ok_or(InvalidUid("too few fields"))?;
            if part.len() != 2 {
                return Err(InvalidUid("field is not two digits"));
            }
            *field = u8::from_str_radix(part, 16).map_err(|_| InvalidUid("non-hex field"))?;
        }
        if parts.next().is_some() {
            return Err(InvalidUid("too many fields"));
        }

        Ok(DeviceUid {
            domain: fields[0],
            category: fields[1],
            target: fields[2],
            instance: fields[3],
            function: fields[4],
        })
    }
}

/// Opaque 128-bit type tag used for driver matching.
///
/// The all-zero tag is reserved: it never names a valid device type and
/// never matches an identity table entry.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TypeTag(pub Uuid);

impl TypeTag {
    pub const NIL: Self = TypeTag(Uuid::nil());

    /// Derives the canonical type tag for a UID. The five address bytes fill
    /// the leading bytes, the remainder carries a fixed marker so that no
    /// derived tag collides with [`TypeTag::NIL`].
    pub fn from_uid(uid: &DeviceUid) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0] = uid.domain;
        bytes[1] = uid.category;
        bytes[2] = uid.target;
        bytes[3] = uid.instance;
        bytes[4] = uid.function;
        bytes[6..16].copy_from_slice(b"sam-client");
        TypeTag(Uuid::from_bytes(bytes))
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// One identity-table entry: a type tag plus driver-private metadata.
#[derive(Clone, Copy, Debug)]
pub struct DeviceId {
    pub tag: TypeTag,
    pub data: u64,
}

impl DeviceId {
    pub const fn new(tag: TypeTag) -> Self {
        DeviceId { tag, data: 0 }
    }
}

/// First-match scan of an identity table. A nil tag never matches, neither
/// as the query nor as a table entry.
pub fn device_id_match<'a>(table: &'a [DeviceId], tag: TypeTag) -> Option<&'a DeviceId> {
    if tag.is_nil() {
        return None;
    }
    table.iter().find(|id| !id.tag.is_nil() && id.tag == tag)
}
