use serde::{
    de::{Deserialize, Deserializer},
    ser::{Serialize, Serializer},
};

use crate::error::Result;
use crate::extended::{checked_len, deserialize_extended, serialize_extended, Embedded};
use crate::marker::ElementType;

/// Binary data with its one-byte subtype.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Binary {
    pub subtype: u8,
    pub bytes: Vec<u8>,
}

impl Binary {
    pub const GENERIC: u8 = 0x00;
    pub const FUNCTION: u8 = 0x01;
    /// Deprecated subtype whose payload repeats its own length as an inner int32.
    pub const BINARY_OLD: u8 = 0x02;
    pub const UUID_OLD: u8 = 0x03;
    pub const UUID: u8 = 0x04;
    pub const MD5: u8 = 0x05;
    pub const ENCRYPTED: u8 = 0x06;
    pub const USER_DEFINED: u8 = 0x80;

    pub fn new(subtype: u8, bytes: Vec<u8>) -> Binary {
        Binary { subtype, bytes }
    }

    pub fn generic(bytes: Vec<u8>) -> Binary {
        Binary::new(Binary::GENERIC, bytes)
    }

    /// Byte count of the payload after the subtype, as written on the wire.
    pub fn wire_len(&self) -> usize {
        if self.subtype == Binary::BINARY_OLD {
            self.bytes.len() + 4
        } else {
            self.bytes.len()
        }
    }

    /// Encode the full element payload: length, subtype, and bytes. Fails if the length doesn't
    /// fit in an int32.
    pub fn encode_vec(&self, vec: &mut Vec<u8>) -> Result<()> {
        vec.extend_from_slice(&checked_len(self.wire_len())?.to_le_bytes());
        vec.push(self.subtype);
        if self.subtype == Binary::BINARY_OLD {
            vec.extend_from_slice(&checked_len(self.bytes.len())?.to_le_bytes());
        }
        vec.extend_from_slice(&self.bytes);
        Ok(())
    }
}

impl Serialize for Binary {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut enc = Vec::with_capacity(self.bytes.len() + 9);
        self.encode_vec(&mut enc).map_err(serde::ser::Error::custom)?;
        serialize_extended(serializer, ElementType::Binary, &enc)
    }
}

impl<'de> Deserialize<'de> for Binary {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match deserialize_extended(deserializer, "Binary")? {
            Embedded::Binary(v) => Ok(v),
            other => Err(serde::de::Error::custom(format!(
                "expected Binary, got {}",
                other.element_type()
            ))),
        }
    }
}
