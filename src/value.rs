use std::ops::Index;

use serde::{
    de::{Deserialize, Deserializer, EnumAccess, MapAccess, SeqAccess, Visitor},
    ser::{Serialize, Serializer},
};

use crate::{
    binary::Binary,
    datetime::DateTime,
    document::Document,
    extended::{
        put_string, serialize_extended, visit_extended, visit_extended_entry, CodeWithScope,
        Embedded, EXT_NAME,
    },
    marker::ElementType,
    object_id::ObjectId,
    pattern::Regex,
    timestamp::Timestamp,
};

/// Any BSON value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Double(f64),
    String(String),
    Document(Document),
    Array(Vec<Value>),
    Binary(Binary),
    ObjectId(ObjectId),
    Boolean(bool),
    DateTime(DateTime),
    Null,
    Regex(Regex),
    JavaScript(String),
    JavaScriptWithScope(CodeWithScope),
    Symbol(String),
    Int32(i32),
    Timestamp(Timestamp),
    Int64(i64),
    MinKey,
    MaxKey,
}

impl Value {
    pub fn element_type(&self) -> ElementType {
        match self {
            Value::Double(_) => ElementType::Double,
            Value::String(_) => ElementType::String,
            Value::Document(_) => ElementType::Document,
            Value::Array(_) => ElementType::Array,
            Value::Binary(_) => ElementType::Binary,
            Value::ObjectId(_) => ElementType::ObjectId,
            Value::Boolean(_) => ElementType::Boolean,
            Value::DateTime(_) => ElementType::DateTime,
            Value::Null => ElementType::Null,
            Value::Regex(_) => ElementType::Regex,
            Value::JavaScript(_) => ElementType::JavaScript,
            Value::JavaScriptWithScope(_) => ElementType::JavaScriptWithScope,
            Value::Symbol(_) => ElementType::Symbol,
            Value::Int32(_) => ElementType::Int32,
            Value::Timestamp(_) => ElementType::Timestamp,
            Value::Int64(_) => ElementType::Int64,
            Value::MinKey => ElementType::MinKey,
            Value::MaxKey => ElementType::MaxKey,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_document(&self) -> bool {
        matches!(self, Value::Document(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        if let Value::Boolean(v) = self {
            Some(*v)
        } else {
            None
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        if let Value::Int32(v) = self {
            Some(*v)
        } else {
            None
        }
    }

    /// Int32 or Int64, widened.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(v) => Some(*v as i64),
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        if let Value::Double(v) = self {
            Some(*v)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        if let Value::String(v) = self {
            Some(v.as_ref())
        } else {
            None
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        if let Value::Document(v) = self {
            Some(v)
        } else {
            None
        }
    }

    pub fn as_document_mut(&mut self) -> Option<&mut Document> {
        if let Value::Document(v) = self {
            Some(v)
        } else {
            None
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        if let Value::Array(v) = self {
            Some(v.as_ref())
        } else {
            None
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Value>> {
        if let Value::Array(v) = self {
            Some(v)
        } else {
            None
        }
    }

    pub fn as_binary(&self) -> Option<&Binary> {
        if let Value::Binary(v) = self {
            Some(v)
        } else {
            None
        }
    }

    pub fn as_object_id(&self) -> Option<&ObjectId> {
        if let Value::ObjectId(v) = self {
            Some(v)
        } else {
            None
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime> {
        if let Value::DateTime(v) = self {
            Some(*v)
        } else {
            None
        }
    }

    pub fn as_timestamp(&self) -> Option<Timestamp> {
        if let Value::Timestamp(v) = self {
            Some(*v)
        } else {
            None
        }
    }

    pub fn as_regex(&self) -> Option<&Regex> {
        if let Value::Regex(v) = self {
            Some(v)
        } else {
            None
        }
    }
}

impl std::default::Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

pub(crate) static NULL: Value = Value::Null;

impl Index<usize> for Value {
    type Output = Value;

    fn index(&self, index: usize) -> &Self::Output {
        self.as_array().and_then(|v| v.get(index)).unwrap_or(&NULL)
    }
}

impl Index<&str> for Value {
    type Output = Value;

    fn index(&self, index: &str) -> &Self::Output {
        self.as_document().and_then(|v| v.get(index)).unwrap_or(&NULL)
    }
}

impl From<Embedded> for Value {
    fn from(v: Embedded) -> Self {
        match v {
            Embedded::Binary(v) => Value::Binary(v),
            Embedded::ObjectId(v) => Value::ObjectId(v),
            Embedded::DateTime(v) => Value::DateTime(v),
            Embedded::Regex(v) => Value::Regex(v),
            Embedded::JavaScript(v) => Value::JavaScript(v),
            Embedded::JavaScriptWithScope(v) => Value::JavaScriptWithScope(v),
            Embedded::Symbol(v) => Value::Symbol(v),
            Embedded::Timestamp(v) => Value::Timestamp(v),
            Embedded::MinKey => Value::MinKey,
            Embedded::MaxKey => Value::MaxKey,
        }
    }
}

macro_rules! impl_value_from {
    ($t: ty, $p: ident) => {
        impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::$p(v)
            }
        }
    };
}

macro_rules! impl_value_from_integer {
    ($t: ty, $p: ident) => {
        impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::$p(From::from(v))
            }
        }
    };
}

impl_value_from!(bool, Boolean);
impl_value_from!(f64, Double);
impl_value_from!(String, String);
impl_value_from!(Document, Document);
impl_value_from!(Vec<Value>, Array);
impl_value_from!(Binary, Binary);
impl_value_from!(ObjectId, ObjectId);
impl_value_from!(DateTime, DateTime);
impl_value_from!(Regex, Regex);
impl_value_from!(CodeWithScope, JavaScriptWithScope);
impl_value_from!(Timestamp, Timestamp);
impl_value_from!(i32, Int32);
impl_value_from!(i64, Int64);
impl_value_from_integer!(i8, Int32);
impl_value_from_integer!(i16, Int32);
impl_value_from_integer!(u8, Int32);
impl_value_from_integer!(u16, Int32);
impl_value_from_integer!(u32, Int64);
impl_value_from_integer!(f32, Double);

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}

impl<'a> From<&'a str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<'a> From<&'a [u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Binary(Binary::generic(v.into()))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl<V: Into<Value>> std::iter::FromIterator<V> for Value {
    fn from_iter<T: IntoIterator<Item = V>>(iter: T) -> Self {
        let v: Vec<Value> = iter.into_iter().map(Into::into).collect();
        Value::Array(v)
    }
}

macro_rules! impl_try_from_value {
    ($t: ty, $p: ident) => {
        impl TryFrom<Value> for $t {
            type Error = Value;
            fn try_from(v: Value) -> Result<Self, Self::Error> {
                match v {
                    Value::$p(v) => Ok(v),
                    _ => Err(v),
                }
            }
        }
    };
}

impl_try_from_value!(bool, Boolean);
impl_try_from_value!(f64, Double);
impl_try_from_value!(String, String);
impl_try_from_value!(Document, Document);
impl_try_from_value!(Vec<Value>, Array);
impl_try_from_value!(Binary, Binary);
impl_try_from_value!(ObjectId, ObjectId);
impl_try_from_value!(DateTime, DateTime);
impl_try_from_value!(Regex, Regex);
impl_try_from_value!(CodeWithScope, JavaScriptWithScope);
impl_try_from_value!(Timestamp, Timestamp);
impl_try_from_value!(i32, Int32);
impl_try_from_value!(i64, Int64);

fn serialize_string_like<S: Serializer>(
    serializer: S,
    ty: ElementType,
    v: &str,
) -> Result<S::Ok, S::Error> {
    let mut payload = Vec::with_capacity(v.len() + 5);
    put_string(&mut payload, v).map_err(serde::ser::Error::custom)?;
    serialize_extended(serializer, ty, &payload)
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Double(v) => serializer.serialize_f64(*v),
            Value::String(v) => serializer.serialize_str(v),
            Value::Document(v) => v.serialize(serializer),
            Value::Array(v) => v.serialize(serializer),
            Value::Binary(v) => v.serialize(serializer),
            Value::ObjectId(v) => v.serialize(serializer),
            Value::Boolean(v) => serializer.serialize_bool(*v),
            Value::DateTime(v) => v.serialize(serializer),
            Value::Null => serializer.serialize_unit(),
            Value::Regex(v) => v.serialize(serializer),
            Value::JavaScript(v) => serialize_string_like(serializer, ElementType::JavaScript, v),
            Value::JavaScriptWithScope(v) => v.serialize(serializer),
            Value::Symbol(v) => serialize_string_like(serializer, ElementType::Symbol, v),
            Value::Int32(v) => serializer.serialize_i32(*v),
            Value::Timestamp(v) => v.serialize(serializer),
            Value::Int64(v) => serializer.serialize_i64(*v),
            Value::MinKey => serialize_extended(serializer, ElementType::MinKey, &[]),
            Value::MaxKey => serialize_extended(serializer, ElementType::MaxKey, &[]),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use std::fmt;

        struct ValueVisitor;
        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = Value;

            fn expecting(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
                fmt.write_str("any valid BSON Value")
            }

            fn visit_bool<E: serde::de::Error>(self, v: bool) -> Result<Self::Value, E> {
                Ok(Value::Boolean(v))
            }

            fn visit_i32<E: serde::de::Error>(self, v: i32) -> Result<Self::Value, E> {
                Ok(Value::Int32(v))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(Value::Int64(v))
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
                i64::try_from(v)
                    .map(Value::Int64)
                    .map_err(|_| E::custom(format!("{} is too large for an Int64", v)))
            }

            fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Self::Value, E> {
                Ok(Value::Double(v))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(Value::String(v.into()))
            }

            fn visit_string<E: serde::de::Error>(self, v: String) -> Result<Self::Value, E> {
                Ok(Value::String(v))
            }

            fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                Ok(Value::Binary(Binary::generic(v.into())))
            }

            fn visit_byte_buf<E: serde::de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
                Ok(Value::Binary(Binary::generic(v)))
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(Value::Null)
            }

            fn visit_none<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(Value::Null)
            }

            fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
                Value::deserialize(d)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                // Allocate with the size hint, but be conservative. 4096 is what serde uses
                // internally for collections, so we'll do likewise.
                let mut seq = match access.size_hint() {
                    Some(size) => Vec::with_capacity(size.min(4096)),
                    None => Vec::new(),
                };
                while let Some(elem) = access.next_element()? {
                    seq.push(elem);
                }
                Ok(Value::Array(seq))
            }

            /// A map led by the reserved extended name is an extended value, not a Document.
            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut doc = Document::new();
                while let Some(key) = access.next_key::<String>()? {
                    if doc.is_empty() && key == EXT_NAME {
                        return visit_extended_entry(access).map(Value::from);
                    }
                    let val = access.next_value::<Value>()?;
                    doc.push(key, val);
                }
                Ok(Value::Document(doc))
            }

            /// Only reached for extended values: the variant is the element type, and the content
            /// is the raw payload.
            fn visit_enum<A: EnumAccess<'de>>(self, access: A) -> Result<Self::Value, A::Error> {
                visit_extended(access).map(Value::from)
            }
        }

        deserializer.deserialize_any(ValueVisitor)
    }
}
