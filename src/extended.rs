//! The Extended Value Model: the closed set of value kinds that have no primitive scalar
//! equivalent.
//!
//! Every variant here corresponds to exactly one [`Kind::Embedded`](crate::marker::Kind) row of
//! the layout table. The reader hands them out as raw payload bytes and only decodes them through
//! [`Embedded::decode`] when asked; the writer encodes them through [`Embedded::encode`].
//!
//! These types also cross the serde boundary as raw wire payloads. They serialize as a newtype
//! variant of a reserved enum name, with the variant index set to the element type tag and the
//! content set to the payload bytes. The crate's own serializer and deserializer recognize the
//! reserved name and write/read the payload directly as the matching element. Any other serde
//! format just sees an enum holding a byte array.
//!
//! A deserializer asked for "any" value can't hand out an enum, because serde's buffering for
//! internally tagged, untagged, and flattened types rejects enums. There the value is presented
//! as a one-entry map from the reserved name to a `(tag, payload)` pair, and every extended
//! type accepts that form too.

use std::fmt;

use byteorder::{LittleEndian, ReadBytesExt};
use serde::{
    de::{self, Deserialize, Deserializer, EnumAccess, MapAccess, VariantAccess, Visitor},
    ser::{Serialize, Serializer},
};

use crate::{
    binary::Binary,
    config::ReaderConfig,
    datetime::DateTime,
    document::Document,
    error::{Error, Result},
    marker::{ElementType, Kind, LAYOUT_TABLE},
    object_id::ObjectId,
    pattern::Regex,
    scope::read_code_with_scope,
    timestamp::Timestamp,
};

/// Enum name reserved for carrying extended values through serde.
pub(crate) const EXT_NAME: &str = "$__bson_stream_extended";

pub(crate) const EXT_VARIANTS: &[&str] = &[
    "Binary",
    "ObjectId",
    "DateTime",
    "Regex",
    "JavaScript",
    "Symbol",
    "JavaScriptWithScope",
    "Timestamp",
    "MinKey",
    "MaxKey",
];

/// JavaScript code along with the document holding its variable scope.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CodeWithScope {
    pub code: String,
    pub scope: Document,
}

impl CodeWithScope {
    pub fn new(code: impl Into<String>, scope: Document) -> CodeWithScope {
        CodeWithScope {
            code: code.into(),
            scope,
        }
    }

    /// Encode the element payload: total length, code string, then the scope document.
    pub fn encode_vec(&self, vec: &mut Vec<u8>) -> Result<()> {
        let scope = self.scope.to_vec()?;
        let total = checked_len(4 + 4 + self.code.len() + 1 + scope.len())?;
        vec.extend_from_slice(&total.to_le_bytes());
        put_string(vec, &self.code)?;
        vec.extend_from_slice(&scope);
        Ok(())
    }
}

/// A fully materialized extended value.
#[derive(Clone, Debug, PartialEq)]
pub enum Embedded {
    Binary(Binary),
    ObjectId(ObjectId),
    DateTime(DateTime),
    Regex(Regex),
    JavaScript(String),
    JavaScriptWithScope(CodeWithScope),
    Symbol(String),
    Timestamp(Timestamp),
    MinKey,
    MaxKey,
}

impl Embedded {
    pub fn element_type(&self) -> ElementType {
        match self {
            Embedded::Binary(_) => ElementType::Binary,
            Embedded::ObjectId(_) => ElementType::ObjectId,
            Embedded::DateTime(_) => ElementType::DateTime,
            Embedded::Regex(_) => ElementType::Regex,
            Embedded::JavaScript(_) => ElementType::JavaScript,
            Embedded::JavaScriptWithScope(_) => ElementType::JavaScriptWithScope,
            Embedded::Symbol(_) => ElementType::Symbol,
            Embedded::Timestamp(_) => ElementType::Timestamp,
            Embedded::MinKey => ElementType::MinKey,
            Embedded::MaxKey => ElementType::MaxKey,
        }
    }

    /// Decode a value from its exact wire payload: the bytes following the element's field name.
    /// The payload must be consumed completely.
    pub fn decode(ty: ElementType, payload: &[u8]) -> Result<Embedded> {
        Self::decode_with(ty, payload, &ReaderConfig::default(), 0)
    }

    /// Decode a value found while `depth` Documents and Arrays were open, under the limits in
    /// `config`. A JavaScriptWithScope scope counts as one more level of nesting, as does every
    /// scope inside it.
    pub fn decode_with(
        ty: ElementType,
        payload: &[u8],
        config: &ReaderConfig,
        depth: usize,
    ) -> Result<Embedded> {
        let mut buf = payload;
        let value = match ty {
            ElementType::ObjectId => {
                Embedded::ObjectId(ObjectId::try_from(take(&mut buf, 12, "ObjectId")?)?)
            }
            ElementType::DateTime => {
                let millis = buf
                    .read_i64::<LittleEndian>()
                    .map_err(|_| short("DateTime", payload.len(), 8))?;
                Embedded::DateTime(DateTime::from_millis(millis))
            }
            ElementType::Timestamp => {
                Embedded::Timestamp(Timestamp::try_from(take(&mut buf, 8, "Timestamp")?)?)
            }
            ElementType::MinKey => Embedded::MinKey,
            ElementType::MaxKey => Embedded::MaxKey,
            ElementType::JavaScript => Embedded::JavaScript(take_string(&mut buf, "JavaScript")?),
            ElementType::Symbol => Embedded::Symbol(take_string(&mut buf, "Symbol")?),
            ElementType::Regex => {
                let pattern = take_cstring(&mut buf, "Regex pattern")?;
                let options = take_cstring(&mut buf, "Regex options")?;
                Embedded::Regex(Regex::from_wire(pattern, &options))
            }
            ElementType::Binary => Embedded::Binary(take_binary(&mut buf)?),
            ElementType::JavaScriptWithScope => {
                buf = &[];
                Embedded::JavaScriptWithScope(read_code_with_scope(payload, config, depth)?)
            }
            other => {
                return Err(Error::BadEncode(format!(
                    "{} is not an extended value type",
                    other
                )))
            }
        };
        if !buf.is_empty() {
            return Err(Error::BadEncode(format!(
                "{} payload has {} trailing bytes",
                ty,
                buf.len()
            )));
        }
        Ok(value)
    }

    /// Encode this value's wire payload onto a vector.
    pub fn encode(&self, vec: &mut Vec<u8>) -> Result<()> {
        match self {
            Embedded::Binary(v) => v.encode_vec(vec)?,
            Embedded::ObjectId(v) => vec.extend_from_slice(v.as_bytes()),
            Embedded::DateTime(v) => vec.extend_from_slice(&v.timestamp_millis().to_le_bytes()),
            Embedded::Regex(v) => v.encode_vec(vec)?,
            Embedded::JavaScript(v) | Embedded::Symbol(v) => put_string(vec, v)?,
            Embedded::JavaScriptWithScope(v) => v.encode_vec(vec)?,
            Embedded::Timestamp(v) => v.encode_vec(vec),
            Embedded::MinKey | Embedded::MaxKey => (),
        }
        Ok(())
    }

    pub fn to_payload(&self) -> Result<Vec<u8>> {
        let mut vec = Vec::new();
        self.encode(&mut vec)?;
        Ok(vec)
    }
}

impl fmt::Display for Embedded {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Embedded::Binary(v) => write!(f, "Binary({:#04x}, {} bytes)", v.subtype, v.bytes.len()),
            Embedded::ObjectId(v) => write!(f, "ObjectId({})", v),
            Embedded::DateTime(v) => write!(f, "{}", v),
            Embedded::Regex(v) => write!(f, "{}", v),
            Embedded::JavaScript(v) => write!(f, "JavaScript({:?})", v),
            Embedded::JavaScriptWithScope(v) => write!(f, "JavaScriptWithScope({:?})", v.code),
            Embedded::Symbol(v) => write!(f, "Symbol({:?})", v),
            Embedded::Timestamp(v) => write!(f, "{}", v),
            Embedded::MinKey => f.write_str("MinKey"),
            Embedded::MaxKey => f.write_str("MaxKey"),
        }
    }
}

fn short(step: &str, actual: usize, expected: usize) -> Error {
    Error::BadEncode(format!(
        "{}: needed {} bytes, only {} available",
        step, expected, actual
    ))
}

pub(crate) fn take_i32(buf: &mut &[u8], step: &str) -> Result<i32> {
    let actual = buf.len();
    buf.read_i32::<LittleEndian>()
        .map_err(|_| short(step, actual, 4))
}

pub(crate) fn take<'a>(buf: &mut &'a [u8], len: usize, step: &str) -> Result<&'a [u8]> {
    if buf.len() < len {
        return Err(short(step, buf.len(), len));
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

/// Decode a String body: the UTF-8 bytes plus the trailing NUL, without the length prefix.
pub(crate) fn string_body(body: &[u8], step: &str) -> Result<String> {
    match body.split_last() {
        Some((0, text)) => String::from_utf8(text.to_vec())
            .map_err(|e| Error::BadEncode(format!("{}: {}", step, e))),
        Some(_) => Err(Error::BadEncode(format!(
            "{}: string isn't NUL-terminated",
            step
        ))),
        None => Err(Error::BadEncode(format!(
            "{}: string length must be at least 1",
            step
        ))),
    }
}

pub(crate) fn take_string(buf: &mut &[u8], step: &str) -> Result<String> {
    let len = take_i32(buf, step)?;
    if len < 1 {
        return Err(Error::BadEncode(format!(
            "{}: string length {} must be at least 1",
            step, len
        )));
    }
    let body = take(buf, len as usize, step)?;
    string_body(body, step)
}

pub(crate) fn take_cstring(buf: &mut &[u8], step: &str) -> Result<String> {
    let end = buf
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| Error::BadEncode(format!("{}: cstring isn't NUL-terminated", step)))?;
    let s = std::str::from_utf8(&buf[..end])
        .map_err(|e| Error::BadEncode(format!("{}: {}", step, e)))?
        .to_owned();
    *buf = &buf[end + 1..];
    Ok(s)
}

fn take_binary(buf: &mut &[u8]) -> Result<Binary> {
    let len = take_i32(buf, "Binary length")?;
    if len < 0 {
        return Err(Error::BadEncode(format!("Binary length {} is negative", len)));
    }
    let subtype = take(buf, 1, "Binary subtype")?[0];
    let mut bytes = take(buf, len as usize, "Binary data")?;
    if subtype == Binary::BINARY_OLD {
        let inner = take_i32(&mut bytes, "Binary old inner length")?;
        if inner < 0 || inner as usize != bytes.len() {
            return Err(Error::BadEncode(format!(
                "Binary old inner length {} doesn't match outer length {}",
                inner, len
            )));
        }
    }
    Ok(Binary::new(subtype, bytes.to_vec()))
}

/// Convert a byte count into the int32 that prefixes it on the wire.
pub(crate) fn checked_len(len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| Error::LengthTooLong {
        max: i32::MAX as usize,
        actual: len,
    })
}

pub(crate) fn put_string(vec: &mut Vec<u8>, s: &str) -> Result<()> {
    vec.extend_from_slice(&checked_len(s.len() + 1)?.to_le_bytes());
    vec.extend_from_slice(s.as_bytes());
    vec.push(0);
    Ok(())
}

pub(crate) fn put_cstring(vec: &mut Vec<u8>, s: &str) -> Result<()> {
    if s.as_bytes().contains(&0) {
        return Err(Error::BadEncode(format!(
            "cstring {:?} contains an embedded NUL",
            s
        )));
    }
    vec.extend_from_slice(s.as_bytes());
    vec.push(0);
    Ok(())
}

/// Serialize an extended value's raw wire payload.
pub(crate) fn serialize_extended<S: Serializer>(
    serializer: S,
    ty: ElementType,
    payload: &[u8],
) -> Result<S::Ok, S::Error> {
    serializer.serialize_newtype_variant(
        EXT_NAME,
        ty.into_u8() as u32,
        ty.name(),
        serde_bytes::Bytes::new(payload),
    )
}

/// Deserialize any extended value. `expected` names the wanted type in error messages.
pub(crate) fn deserialize_extended<'de, D: Deserializer<'de>>(
    deserializer: D,
    expected: &'static str,
) -> Result<Embedded, D::Error> {
    deserializer.deserialize_enum(EXT_NAME, EXT_VARIANTS, ExtVisitor { expected })
}

fn extended_type<E: de::Error>(tag: u64) -> Result<ElementType, E> {
    u8::try_from(tag)
        .ok()
        .and_then(ElementType::from_u8)
        .filter(|ty| ty.kind() == Kind::Embedded)
        .ok_or_else(|| E::custom(format!("0x{:x} isn't an extended element type tag", tag)))
}

/// Variant of the reserved enum: either the element type itself, or the reserved name, in which
/// case the content is a `(tag, payload)` pair.
enum ExtVariant {
    Tag(ElementType),
    Pair,
}

impl<'de> Deserialize<'de> for ExtVariant {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_identifier(ExtVariantVisitor)
    }
}

struct ExtVariantVisitor;

impl<'de> Visitor<'de> for ExtVariantVisitor {
    type Value = ExtVariant;

    fn expecting(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str("an extended element type tag or name")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<ExtVariant, E> {
        extended_type(v).map(ExtVariant::Tag)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<ExtVariant, E> {
        if v == EXT_NAME {
            return Ok(ExtVariant::Pair);
        }
        LAYOUT_TABLE
            .iter()
            .find(|l| l.kind == Kind::Embedded && l.name == v)
            .map(|l| ExtVariant::Tag(l.element_type))
            .ok_or_else(|| E::unknown_variant(v, EXT_VARIANTS))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<ExtVariant, E> {
        match std::str::from_utf8(v) {
            Ok(s) => self.visit_str(s),
            Err(_) => Err(E::invalid_value(de::Unexpected::Bytes(v), &self)),
        }
    }
}

/// The element type tag and raw payload, read as a two-element sequence.
struct ExtPair(ElementType, serde_bytes::ByteBuf);

impl<'de> Deserialize<'de> for ExtPair {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (tag, payload): (u8, serde_bytes::ByteBuf) = Deserialize::deserialize(deserializer)?;
        Ok(ExtPair(extended_type(tag as u64)?, payload))
    }
}

struct ExtVisitor {
    expected: &'static str,
}

impl<'de> Visitor<'de> for ExtVisitor {
    type Value = Embedded;

    fn expecting(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "a BSON {}", self.expected)
    }

    fn visit_enum<A: EnumAccess<'de>>(self, data: A) -> Result<Embedded, A::Error> {
        visit_extended(data)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Embedded, A::Error> {
        match map.next_key::<String>()? {
            Some(key) if key == EXT_NAME => visit_extended_entry(map),
            _ => Err(de::Error::invalid_type(de::Unexpected::Map, &self)),
        }
    }
}

/// Pull an extended value out of an enum: the variant identifies the element type, and the
/// newtype content is the raw payload.
pub(crate) fn visit_extended<'de, A: EnumAccess<'de>>(data: A) -> Result<Embedded, A::Error> {
    let (variant, access) = data.variant()?;
    let ExtPair(ty, payload) = match variant {
        ExtVariant::Tag(ty) => ExtPair(ty, access.newtype_variant()?),
        ExtVariant::Pair => access.newtype_variant()?,
    };
    Embedded::decode(ty, &payload).map_err(de::Error::custom)
}

/// Finish an extended value presented as a map, once its reserved key has been read.
pub(crate) fn visit_extended_entry<'de, A: MapAccess<'de>>(
    mut map: A,
) -> Result<Embedded, A::Error> {
    let ExtPair(ty, payload) = map.next_value()?;
    if map.next_key::<de::IgnoredAny>()?.is_some() {
        return Err(de::Error::custom("extended value map has more than one entry"));
    }
    Embedded::decode(ty, &payload).map_err(de::Error::custom)
}

impl Serialize for Embedded {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let payload = self.to_payload().map_err(serde::ser::Error::custom)?;
        serialize_extended(serializer, self.element_type(), &payload)
    }
}

impl<'de> Deserialize<'de> for Embedded {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserialize_extended(deserializer, "extended value")
    }
}

impl Serialize for CodeWithScope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut payload = Vec::new();
        self.encode_vec(&mut payload).map_err(serde::ser::Error::custom)?;
        serialize_extended(serializer, ElementType::JavaScriptWithScope, &payload)
    }
}

impl<'de> Deserialize<'de> for CodeWithScope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match deserialize_extended(deserializer, "JavaScriptWithScope")? {
            Embedded::JavaScriptWithScope(v) => Ok(v),
            other => Err(de::Error::custom(format!(
                "expected JavaScriptWithScope, got {}",
                other.element_type()
            ))),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn roundtrip(value: Embedded, expected: &[u8]) {
        let enc = value.to_payload().unwrap();
        assert_eq!(enc, expected, "encoding of {}", value);
        let dec = Embedded::decode(value.element_type(), &enc).unwrap();
        assert_eq!(dec, value);
    }

    mod string_like {
        use super::*;

        #[test]
        fn wire_bytes() {
            roundtrip(
                Embedded::JavaScript("x=1".into()),
                &[4, 0, 0, 0, b'x', b'=', b'1', 0],
            );
            roundtrip(Embedded::Symbol("".into()), &[1, 0, 0, 0, 0]);
        }

        #[test]
        fn bad_terminator() {
            let enc = [2, 0, 0, 0, b'a', b'b'];
            assert!(Embedded::decode(ElementType::Symbol, &enc).is_err());
        }

        #[test]
        fn zero_length() {
            let enc = [0, 0, 0, 0];
            assert!(Embedded::decode(ElementType::JavaScript, &enc).is_err());
        }

        #[test]
        fn not_enough_bytes() {
            let enc = [9, 0, 0, 0, b'a', 0];
            assert!(Embedded::decode(ElementType::JavaScript, &enc).is_err());
        }

        #[test]
        fn trailing_bytes() {
            let enc = [2, 0, 0, 0, b'a', 0, 7];
            assert!(Embedded::decode(ElementType::Symbol, &enc).is_err());
        }
    }

    mod fixed {
        use super::*;

        #[test]
        fn wire_bytes() {
            roundtrip(Embedded::MinKey, &[]);
            roundtrip(Embedded::MaxKey, &[]);
            roundtrip(
                Embedded::DateTime(DateTime::from_millis(-2)),
                &(-2i64).to_le_bytes(),
            );
            roundtrip(
                Embedded::ObjectId(ObjectId::from_legacy(1, 2, 3)),
                &[0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3],
            );
            roundtrip(
                Embedded::Timestamp(Timestamp::new(7, 9)),
                &[9, 0, 0, 0, 7, 0, 0, 0],
            );
        }

        #[test]
        fn not_enough_bytes() {
            assert!(Embedded::decode(ElementType::ObjectId, &[0u8; 11]).is_err());
            assert!(Embedded::decode(ElementType::DateTime, &[0u8; 7]).is_err());
            assert!(Embedded::decode(ElementType::MinKey, &[0u8; 1]).is_err());
        }
    }

    mod binary {
        use super::*;

        #[test]
        fn wire_bytes() {
            roundtrip(
                Embedded::Binary(Binary::generic(vec![0xaa, 0xbb])),
                &[2, 0, 0, 0, 0, 0xaa, 0xbb],
            );
            roundtrip(
                Embedded::Binary(Binary::new(Binary::BINARY_OLD, vec![0xaa])),
                &[5, 0, 0, 0, 2, 1, 0, 0, 0, 0xaa],
            );
        }

        #[test]
        fn old_inner_mismatch() {
            let enc = [5, 0, 0, 0, 2, 2, 0, 0, 0, 0xaa];
            assert!(Embedded::decode(ElementType::Binary, &enc).is_err());
        }

        #[test]
        fn negative_length() {
            let enc = [0xff, 0xff, 0xff, 0xff, 0];
            assert!(Embedded::decode(ElementType::Binary, &enc).is_err());
        }
    }

    mod regex {
        use super::*;

        #[test]
        fn wire_bytes() {
            roundtrip(
                Embedded::Regex(Regex::new("a+", "xi").unwrap()),
                b"a+\0ix\0",
            );
        }

        #[test]
        fn canonicalizes_on_read() {
            let dec = Embedded::decode(ElementType::Regex, b"a\0smi\0").unwrap();
            assert_eq!(dec, Embedded::Regex(Regex::new("a", "ims").unwrap()));
        }

        #[test]
        fn missing_terminator() {
            assert!(Embedded::decode(ElementType::Regex, b"a\0ims").is_err());
        }
    }

    mod code_with_scope {
        use super::*;

        #[test]
        fn wire_bytes() {
            let mut scope = Document::new();
            scope.push("x", 1i32);
            let value = Embedded::JavaScriptWithScope(CodeWithScope::new("x", scope));
            let expected = [
                22, 0, 0, 0, // total
                2, 0, 0, 0, b'x', 0, // code
                12, 0, 0, 0, 0x10, b'x', 0, 1, 0, 0, 0, 0, // scope
            ];
            roundtrip(value, &expected);
        }

        #[test]
        fn total_mismatch() {
            let enc = [
                23, 0, 0, 0, 2, 0, 0, 0, b'x', 0, 5, 0, 0, 0, 0,
            ];
            assert!(Embedded::decode(ElementType::JavaScriptWithScope, &enc).is_err());
        }
    }

    #[test]
    fn legacy_is_not_extended() {
        assert!(Embedded::decode(ElementType::Decimal128, &[0u8; 16]).is_err());
        assert!(Embedded::decode(ElementType::Int32, &[0u8; 4]).is_err());
    }

    #[test]
    fn length_prefix_limit() {
        assert_eq!(checked_len(i32::MAX as usize).unwrap(), i32::MAX);
        match checked_len(i32::MAX as usize + 1) {
            Err(Error::LengthTooLong { max, actual }) => {
                assert_eq!(max, i32::MAX as usize);
                assert_eq!(actual, i32::MAX as usize + 1);
            }
            other => panic!("expected LengthTooLong, got {:?}", other),
        }
    }
}
