//! The layout table: one row per BSON element type tag, shared by the reader and the writer.
//!
//! Every framing decision either side makes goes through [`Layout::shape`], so the two can't
//! disagree about how many bytes a value occupies on the wire.

use std::fmt;

/// BSON element type. The declaration order matches the rows of [`LAYOUT_TABLE`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementType {
    Double,
    String,
    Document,
    Array,
    Binary,
    Undefined,
    ObjectId,
    Boolean,
    DateTime,
    Null,
    Regex,
    DbPointer,
    JavaScript,
    Symbol,
    JavaScriptWithScope,
    Int32,
    Timestamp,
    Int64,
    Decimal128,
    MinKey,
    MaxKey,
}

/// How a payload is laid out on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    /// A fixed number of bytes.
    Fixed(usize),
    /// Little-endian int32 byte count (counting the trailing NUL), the UTF-8 bytes, then a NUL.
    String,
    /// Little-endian int32 total length, the elements, then a single NUL terminator.
    Frame,
    /// Little-endian int32 byte count, one subtype byte, then the bytes.
    Binary,
    /// Two cstrings back to back.
    CStringPair,
    /// Little-endian int32 total length, covering a String followed by a Frame.
    CodeWithScope,
    /// A String followed by a fixed number of bytes.
    StringThen(usize),
}

impl Shape {
    /// The payload length, if it is known without reading any of it.
    pub fn fixed_len(self) -> Option<usize> {
        match self {
            Shape::Fixed(n) => Some(n),
            _ => None,
        }
    }
}

/// What the reader produces for an element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    /// Opens a nested Document or Array.
    Structural,
    /// Decoded eagerly into a primitive scalar.
    Scalar,
    /// Kept as raw payload and materialized into an [`Embedded`](crate::Embedded) on request.
    Embedded,
    /// Deprecated type with a known shape but no value model. Never produced, only skipped.
    Legacy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    pub tag: u8,
    pub element_type: ElementType,
    pub shape: Shape,
    pub kind: Kind,
    pub name: &'static str,
}

const fn row(
    tag: u8,
    element_type: ElementType,
    shape: Shape,
    kind: Kind,
    name: &'static str,
) -> Layout {
    Layout {
        tag,
        element_type,
        shape,
        kind,
        name,
    }
}

pub const LAYOUT_TABLE: [Layout; 21] = [
    row(0x01, ElementType::Double, Shape::Fixed(8), Kind::Scalar, "Double"),
    row(0x02, ElementType::String, Shape::String, Kind::Scalar, "String"),
    row(0x03, ElementType::Document, Shape::Frame, Kind::Structural, "Document"),
    row(0x04, ElementType::Array, Shape::Frame, Kind::Structural, "Array"),
    row(0x05, ElementType::Binary, Shape::Binary, Kind::Embedded, "Binary"),
    row(0x06, ElementType::Undefined, Shape::Fixed(0), Kind::Legacy, "Undefined"),
    row(0x07, ElementType::ObjectId, Shape::Fixed(12), Kind::Embedded, "ObjectId"),
    row(0x08, ElementType::Boolean, Shape::Fixed(1), Kind::Scalar, "Boolean"),
    row(0x09, ElementType::DateTime, Shape::Fixed(8), Kind::Embedded, "DateTime"),
    row(0x0a, ElementType::Null, Shape::Fixed(0), Kind::Scalar, "Null"),
    row(0x0b, ElementType::Regex, Shape::CStringPair, Kind::Embedded, "Regex"),
    row(0x0c, ElementType::DbPointer, Shape::StringThen(12), Kind::Legacy, "DBPointer"),
    row(0x0d, ElementType::JavaScript, Shape::String, Kind::Embedded, "JavaScript"),
    row(0x0e, ElementType::Symbol, Shape::String, Kind::Embedded, "Symbol"),
    row(
        0x0f,
        ElementType::JavaScriptWithScope,
        Shape::CodeWithScope,
        Kind::Embedded,
        "JavaScriptWithScope",
    ),
    row(0x10, ElementType::Int32, Shape::Fixed(4), Kind::Scalar, "Int32"),
    row(0x11, ElementType::Timestamp, Shape::Fixed(8), Kind::Embedded, "Timestamp"),
    row(0x12, ElementType::Int64, Shape::Fixed(8), Kind::Scalar, "Int64"),
    row(0x13, ElementType::Decimal128, Shape::Fixed(16), Kind::Legacy, "Decimal128"),
    row(0xff, ElementType::MinKey, Shape::Fixed(0), Kind::Embedded, "MinKey"),
    row(0x7f, ElementType::MaxKey, Shape::Fixed(0), Kind::Embedded, "MaxKey"),
];

/// Tag that terminates every Document and Array.
pub const TERMINATOR: u8 = 0x00;

impl ElementType {
    /// Look up an element type from its tag byte. Returns `None` if the tag has no layout row.
    pub fn from_u8(tag: u8) -> Option<ElementType> {
        use self::ElementType::*;
        Some(match tag {
            0x01 => Double,
            0x02 => String,
            0x03 => Document,
            0x04 => Array,
            0x05 => Binary,
            0x06 => Undefined,
            0x07 => ObjectId,
            0x08 => Boolean,
            0x09 => DateTime,
            0x0a => Null,
            0x0b => Regex,
            0x0c => DbPointer,
            0x0d => JavaScript,
            0x0e => Symbol,
            0x0f => JavaScriptWithScope,
            0x10 => Int32,
            0x11 => Timestamp,
            0x12 => Int64,
            0x13 => Decimal128,
            0xff => MinKey,
            0x7f => MaxKey,
            _ => return None,
        })
    }

    pub fn layout(self) -> &'static Layout {
        &LAYOUT_TABLE[self as usize]
    }

    pub fn into_u8(self) -> u8 {
        self.layout().tag
    }

    pub fn shape(self) -> Shape {
        self.layout().shape
    }

    pub fn kind(self) -> Kind {
        self.layout().kind
    }

    pub fn name(self) -> &'static str {
        self.layout().name
    }
}

impl From<ElementType> for u8 {
    fn from(val: ElementType) -> u8 {
        val.into_u8()
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}
