use std::fmt;
use std::str::FromStr;

use serde::{
    de::{Deserialize, Deserializer},
    ser::{Serialize, Serializer},
};

use crate::error::{Error, Result};
use crate::extended::{deserialize_extended, serialize_extended, Embedded};
use crate::marker::ElementType;

/// A 12-byte BSON ObjectId.
///
/// The bytes are laid out as a 4-byte timestamp, a 3-byte machine id, a 2-byte process id, and a
/// 3-byte counter, all big-endian. The codec itself treats the value as opaque; the accessors
/// exist for callers that need the parts.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    pub const LEN: usize = 12;

    pub fn from_bytes(bytes: [u8; 12]) -> ObjectId {
        ObjectId(bytes)
    }

    /// Build an ObjectId from its four parts. `machine` and `counter` are truncated to their low
    /// 24 bits.
    pub fn from_parts(timestamp: u32, machine: u32, process: u16, counter: u32) -> ObjectId {
        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&timestamp.to_be_bytes());
        bytes[4..7].copy_from_slice(&machine.to_be_bytes()[1..]);
        bytes[7..9].copy_from_slice(&process.to_be_bytes());
        bytes[9..12].copy_from_slice(&counter.to_be_bytes()[1..]);
        ObjectId(bytes)
    }

    /// Build an ObjectId from the older three-word form: time, machine, and increment, each a
    /// big-endian 32-bit word.
    pub fn from_legacy(time: i32, machine: i32, inc: i32) -> ObjectId {
        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&time.to_be_bytes());
        bytes[4..8].copy_from_slice(&machine.to_be_bytes());
        bytes[8..12].copy_from_slice(&inc.to_be_bytes());
        ObjectId(bytes)
    }

    pub fn bytes(&self) -> [u8; 12] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }

    /// Seconds since the UNIX epoch at creation time.
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    pub fn machine_id(&self) -> u32 {
        u32::from_be_bytes([0, self.0[4], self.0[5], self.0[6]])
    }

    pub fn process_id(&self) -> u16 {
        u16::from_be_bytes([self.0[7], self.0[8]])
    }

    pub fn counter(&self) -> u32 {
        u32::from_be_bytes([0, self.0[9], self.0[10], self.0[11]])
    }

    /// The three big-endian words of the legacy form: (time, machine, inc).
    pub fn legacy_parts(&self) -> (i32, i32, i32) {
        let b = &self.0;
        let word = |i: usize| i32::from_be_bytes([b[i], b[i + 1], b[i + 2], b[i + 3]]);
        (word(0), word(4), word(8))
    }

    pub fn to_hex(&self) -> String {
        self.to_string()
    }
}

impl From<[u8; 12]> for ObjectId {
    fn from(bytes: [u8; 12]) -> Self {
        ObjectId(bytes)
    }
}

impl TryFrom<&[u8]> for ObjectId {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self> {
        let bytes: [u8; 12] = value.try_into().map_err(|_| {
            Error::BadEncode(format!(
                "ObjectId must be 12 bytes, got {}",
                value.len()
            ))
        })?;
        Ok(ObjectId(bytes))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for b in self.0.iter() {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl FromStr for ObjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 24 || !s.is_ascii() {
            return Err(Error::BadEncode(format!(
                "ObjectId hex string must be 24 characters, got {:?}",
                s
            )));
        }
        let mut bytes = [0u8; 12];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[2 * i..2 * i + 2], 16)
                .map_err(|e| Error::BadEncode(format!("ObjectId hex string {:?}: {}", s, e)))?;
        }
        Ok(ObjectId(bytes))
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_extended(serializer, ElementType::ObjectId, &self.0)
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match deserialize_extended(deserializer, "ObjectId")? {
            Embedded::ObjectId(v) => Ok(v),
            other => Err(serde::de::Error::custom(format!(
                "expected ObjectId, got {}",
                other.element_type()
            ))),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parts() {
        let oid = ObjectId::from_parts(0x01020304, 0x00a0b0c0, 0xbeef, 0x00123456);
        assert_eq!(
            oid.bytes(),
            [0x01, 0x02, 0x03, 0x04, 0xa0, 0xb0, 0xc0, 0xbe, 0xef, 0x12, 0x34, 0x56]
        );
        assert_eq!(oid.timestamp(), 0x01020304);
        assert_eq!(oid.machine_id(), 0x00a0b0c0);
        assert_eq!(oid.process_id(), 0xbeef);
        assert_eq!(oid.counter(), 0x00123456);
    }

    #[test]
    fn parts_truncate_to_width() {
        let oid = ObjectId::from_parts(0, 0xffa0b0c0, 0, 0xff123456);
        assert_eq!(oid.machine_id(), 0x00a0b0c0);
        assert_eq!(oid.counter(), 0x00123456);
    }

    #[test]
    fn legacy() {
        let oid = ObjectId::from_legacy(1, 2, 3);
        assert_eq!(oid.bytes(), [0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3]);
        assert_eq!(oid.legacy_parts(), (1, 2, 3));
        assert_eq!(oid.timestamp(), 1);
    }

    #[test]
    fn hex() {
        let oid = ObjectId::from_legacy(1, 2, 3);
        let s = oid.to_string();
        assert_eq!(s, "000000010000000200000003");
        assert_eq!(s.parse::<ObjectId>().unwrap(), oid);
        assert!("00000001".parse::<ObjectId>().is_err());
        assert!("zz0000010000000200000003".parse::<ObjectId>().is_err());
    }

    #[test]
    fn from_slice() {
        assert!(ObjectId::try_from(&[0u8; 11][..]).is_err());
        assert_eq!(ObjectId::try_from(&[7u8; 12][..]).unwrap().bytes(), [7u8; 12]);
    }
}
