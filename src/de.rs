//! Deserialization.
//!
//! Pulls tokens from a [`Reader`](crate::Reader) and feeds them to serde visitors. The mapping
//! is the reverse of the one in [`ser`](crate::ser): Documents read as maps or structs, Arrays as
//! sequences, and a one-field Document or a bare String as an enum variant. Int32 and Int64 are
//! visited as `i32` and `i64`, so any integer type that can hold the value will accept it.
//!
//! Extended values go out as an enum when the reserved extended name is asked for by name. A
//! visitor that asks for any value gets them as a one-entry map instead, which survives serde's
//! buffering for internally tagged, untagged, and flattened types.

use std::io::Read;

use serde::de::Error as DeError;
use serde::de::value::{
    BytesDeserializer, SeqAccessDeserializer, StrDeserializer, StringDeserializer, U64Deserializer,
    U8Deserializer,
};
use serde::de::*;

use crate::{
    config::ReaderConfig,
    error::{Error, Result},
    extended::{Embedded, EXT_NAME},
    marker::ElementType,
    reader::{Reader, Token},
    source::{Source, Streamed},
};

struct BsonDeserializer<S> {
    reader: Reader<S>,
    pending: Option<Token>,
}

impl<S: Source> BsonDeserializer<S> {
    fn new(reader: Reader<S>) -> Self {
        Self {
            reader,
            pending: None,
        }
    }

    fn next_token(&mut self) -> Result<Token> {
        match self.pending.take() {
            Some(token) => Ok(token),
            None => self.reader.next_token(),
        }
    }

    fn peek_token(&mut self) -> Result<Token> {
        let token = self.next_token()?;
        self.pending = Some(token);
        Ok(token)
    }

    fn expect(&mut self, want: Token, msg: &str) -> Result<()> {
        let token = self.next_token()?;
        if token == want {
            Ok(())
        } else {
            Err(Error::protocol(format!("{}, found {:?}", msg, token)))
        }
    }

    /// Check that a whole top-level document was consumed.
    fn end(&self) -> Result<()> {
        if self.pending.is_some() || self.reader.depth() != 0 {
            return Err(Error::SerdeFail(
                "value ended before its document did".to_string(),
            ));
        }
        Ok(())
    }
}

/// Deserialize a value from a buffer holding exactly one document.
pub fn from_slice<T: DeserializeOwned>(buf: &[u8]) -> Result<T> {
    from_slice_with_config(buf, ReaderConfig::default())
}

pub fn from_slice_with_config<T: DeserializeOwned>(buf: &[u8], config: ReaderConfig) -> Result<T> {
    let mut de = BsonDeserializer::new(Reader::with_config(buf, config));
    let value = T::deserialize(&mut de)?;
    de.end()?;
    let left = de.reader.remaining().len();
    if left != 0 {
        return Err(Error::framing(
            de.reader.position(),
            format!("{} bytes left over after the document", left),
        ));
    }
    Ok(value)
}

/// Deserialize a value from the next document on a byte stream. Only that document's bytes are
/// consumed.
pub fn from_reader<R: Read, T: DeserializeOwned>(reader: R) -> Result<T> {
    let mut de = BsonDeserializer::new(Reader::new(Streamed::new(reader)));
    let value = T::deserialize(&mut de)?;
    de.end()?;
    Ok(value)
}

impl<'de, 'a, S: Source> serde::Deserializer<'de> for &'a mut BsonDeserializer<S> {
    type Error = Error;

    fn is_human_readable(&self) -> bool {
        false
    }

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        let token = self.next_token()?;
        match token {
            Token::StartObject => {
                let mut access = DocAccess::new(self);
                let value = visitor.visit_map(&mut access)?;
                access.finish()?;
                Ok(value)
            }
            Token::StartArray => {
                let mut access = ArrayAccess::new(self);
                let value = visitor.visit_seq(&mut access)?;
                access.finish()?;
                Ok(value)
            }
            Token::Scalar(ty) => match ty {
                ElementType::Double => visitor.visit_f64(self.reader.get_f64()?),
                ElementType::String => visitor.visit_string(self.reader.take_text()?),
                ElementType::Boolean => visitor.visit_bool(self.reader.get_bool()?),
                ElementType::Null => visitor.visit_unit(),
                ElementType::Int32 => visitor.visit_i32(self.reader.get_i32()?),
                ElementType::Int64 => visitor.visit_i64(self.reader.get_i64()?),
                other => Err(Error::protocol(format!(
                    "{} arrived as a primitive value",
                    other
                ))),
            },
            Token::Embedded(ty) => visitor.visit_map(ExtEntry {
                ext: ExtAccess::new(ty, &self.reader)?,
                key_read: false,
            }),
            other => Err(Error::protocol(format!("Expected a value, found {:?}", other))),
        }
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        if self.peek_token()? == Token::Scalar(ElementType::Null) {
            self.next_token()?;
            visitor.visit_none()
        } else {
            visitor.visit_some(self)
        }
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        if self.peek_token()? != Token::Embedded(ElementType::Binary) {
            return self.deserialize_any(visitor);
        }
        self.next_token()?;
        match self.reader.get_embedded_object()? {
            Embedded::Binary(bin) => visitor.visit_byte_buf(bin.bytes),
            other => Err(Error::TypeMismatch {
                expected: "Binary",
                actual: other.element_type().to_string(),
            }),
        }
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.deserialize_bytes(visitor)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        let token = self.next_token()?;
        if name == EXT_NAME {
            return match token {
                Token::Embedded(ty) => visitor.visit_enum(ExtAccess::new(ty, &self.reader)?),
                other => Err(Error::TypeMismatch {
                    expected: "extended value",
                    actual: format!("{:?}", other),
                }),
            };
        }
        match token {
            Token::Scalar(ElementType::String) => {
                let variant: StringDeserializer<Error> =
                    self.reader.take_text()?.into_deserializer();
                visitor.visit_enum(variant)
            }
            Token::StartObject => {
                self.expect(Token::FieldName, "Enum Document must hold the variant name")?;
                let variant = self.reader.take_text()?;
                let value = visitor.visit_enum(VariantAccessor {
                    de: &mut *self,
                    variant,
                })?;
                self.expect(Token::EndObject, "Enum Document must hold exactly one field")?;
                Ok(value)
            }
            other => Err(Error::TypeMismatch {
                expected: "enum",
                actual: format!("{:?}", other),
            }),
        }
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.next_token()? {
            Token::StartObject | Token::StartArray => self.reader.skip_children()?,
            Token::Scalar(_) | Token::Embedded(_) => (),
            other => {
                return Err(Error::protocol(format!(
                    "Expected a value, found {:?}",
                    other
                )))
            }
        }
        visitor.visit_unit()
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        unit unit_struct seq tuple tuple_struct map struct identifier
    }
}

struct DocAccess<'a, S> {
    de: &'a mut BsonDeserializer<S>,
    done: bool,
}

impl<'a, S: Source> DocAccess<'a, S> {
    fn new(de: &'a mut BsonDeserializer<S>) -> Self {
        Self { de, done: false }
    }

    fn finish(self) -> Result<()> {
        if self.done {
            Ok(())
        } else {
            Err(Error::SerdeFail(
                "Document has more fields than were read".to_string(),
            ))
        }
    }
}

impl<'de, 'a, S: Source> MapAccess<'de> for &mut DocAccess<'a, S> {
    type Error = Error;

    fn next_key_seed<K: DeserializeSeed<'de>>(&mut self, seed: K) -> Result<Option<K::Value>> {
        if self.done {
            return Ok(None);
        }
        match self.de.next_token()? {
            Token::FieldName => {
                let name: StringDeserializer<Error> =
                    self.de.reader.take_text()?.into_deserializer();
                seed.deserialize(name).map(Some)
            }
            Token::EndObject => {
                self.done = true;
                Ok(None)
            }
            other => Err(Error::protocol(format!(
                "Expected a field name, found {:?}",
                other
            ))),
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value> {
        seed.deserialize(&mut *self.de)
    }
}

struct ArrayAccess<'a, S> {
    de: &'a mut BsonDeserializer<S>,
    done: bool,
}

impl<'a, S: Source> ArrayAccess<'a, S> {
    fn new(de: &'a mut BsonDeserializer<S>) -> Self {
        Self { de, done: false }
    }

    fn finish(self) -> Result<()> {
        if self.done || self.de.next_token()? == Token::EndArray {
            Ok(())
        } else {
            Err(Error::SerdeFail(
                "Array has more elements than were read".to_string(),
            ))
        }
    }
}

impl<'de, 'a, S: Source> SeqAccess<'de> for &mut ArrayAccess<'a, S> {
    type Error = Error;

    fn next_element_seed<T: DeserializeSeed<'de>>(&mut self, seed: T) -> Result<Option<T::Value>> {
        if self.done {
            return Ok(None);
        }
        let token = self.de.next_token()?;
        if token == Token::EndArray {
            self.done = true;
            return Ok(None);
        }
        self.de.pending = Some(token);
        seed.deserialize(&mut *self.de).map(Some)
    }
}

/// The variant inside a one-field enum Document.
struct VariantAccessor<'a, S> {
    de: &'a mut BsonDeserializer<S>,
    variant: String,
}

impl<'de, 'a, S: Source> EnumAccess<'de> for VariantAccessor<'a, S> {
    type Error = Error;
    type Variant = Self;

    fn variant_seed<V: DeserializeSeed<'de>>(mut self, seed: V) -> Result<(V::Value, Self)> {
        let name: StringDeserializer<Error> = std::mem::take(&mut self.variant).into_deserializer();
        let value = seed.deserialize(name)?;
        Ok((value, self))
    }
}

impl<'de, 'a, S: Source> VariantAccess<'de> for VariantAccessor<'a, S> {
    type Error = Error;

    fn unit_variant(self) -> Result<()> {
        IgnoredAny::deserialize(&mut *self.de)?;
        Ok(())
    }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(self, seed: T) -> Result<T::Value> {
        seed.deserialize(&mut *self.de)
    }

    fn tuple_variant<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value> {
        serde::Deserializer::deserialize_seq(&mut *self.de, visitor)
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        serde::Deserializer::deserialize_map(&mut *self.de, visitor)
    }
}

/// Hands an extended value to its visitor as the element type tag, then the raw payload bytes.
struct ExtAccess {
    ty: ElementType,
    payload: Vec<u8>,
}

impl ExtAccess {
    fn new<S: Source>(ty: ElementType, reader: &Reader<S>) -> Result<Self> {
        // A scope gets checked here, under the reader's limits and current depth. Visitors only
        // see the bare payload.
        if ty == ElementType::JavaScriptWithScope {
            reader.get_embedded_object()?;
        }
        let payload = reader
            .raw_payload()
            .ok_or_else(|| Error::protocol(format!("No payload held for {}", ty)))?
            .to_vec();
        Ok(Self { ty, payload })
    }
}

impl<'de> EnumAccess<'de> for ExtAccess {
    type Error = Error;
    type Variant = Self;

    fn variant_seed<V: DeserializeSeed<'de>>(self, seed: V) -> Result<(V::Value, Self)> {
        let tag: U64Deserializer<Error> = (self.ty.into_u8() as u64).into_deserializer();
        let value = seed.deserialize(tag)?;
        Ok((value, self))
    }
}

impl<'de> VariantAccess<'de> for ExtAccess {
    type Error = Error;

    fn unit_variant(self) -> Result<()> {
        Err(DeError::invalid_type(Unexpected::NewtypeVariant, &"unit variant"))
    }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(self, seed: T) -> Result<T::Value> {
        seed.deserialize(BytesDeserializer::<Error>::new(&self.payload))
    }

    fn tuple_variant<V: Visitor<'de>>(self, _len: usize, _visitor: V) -> Result<V::Value> {
        Err(DeError::invalid_type(Unexpected::NewtypeVariant, &"tuple variant"))
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        _fields: &'static [&'static str],
        _visitor: V,
    ) -> Result<V::Value> {
        Err(DeError::invalid_type(Unexpected::NewtypeVariant, &"struct variant"))
    }
}

/// An extended value as a one-entry map from the reserved name to its `(tag, payload)` pair.
struct ExtEntry {
    ext: ExtAccess,
    key_read: bool,
}

impl<'de> MapAccess<'de> for ExtEntry {
    type Error = Error;

    fn next_key_seed<K: DeserializeSeed<'de>>(&mut self, seed: K) -> Result<Option<K::Value>> {
        if self.key_read {
            return Ok(None);
        }
        self.key_read = true;
        let key: StrDeserializer<Error> = EXT_NAME.into_deserializer();
        seed.deserialize(key).map(Some)
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value> {
        seed.deserialize(SeqAccessDeserializer::new(ExtPairAccess {
            ext: &self.ext,
            next: 0,
        }))
    }

    fn size_hint(&self) -> Option<usize> {
        Some(if self.key_read { 0 } else { 1 })
    }
}

struct ExtPairAccess<'a> {
    ext: &'a ExtAccess,
    next: usize,
}

impl<'de, 'a> SeqAccess<'de> for ExtPairAccess<'a> {
    type Error = Error;

    fn next_element_seed<T: DeserializeSeed<'de>>(&mut self, seed: T) -> Result<Option<T::Value>> {
        let value = match self.next {
            0 => {
                let tag: U8Deserializer<Error> = self.ext.ty.into_u8().into_deserializer();
                seed.deserialize(tag)?
            }
            1 => seed.deserialize(BytesDeserializer::<Error>::new(&self.ext.payload))?,
            _ => return Ok(None),
        };
        self.next += 1;
        Ok(Some(value))
    }

    fn size_hint(&self) -> Option<usize> {
        Some(2usize.saturating_sub(self.next))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        doc, ser::to_vec, Binary, CodeWithScope, DateTime, Document, ObjectId, Regex, Timestamp,
        Value,
    };
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    enum Shape {
        Empty,
        Circle(f64),
        Rect(i32, i32),
        Poly { sides: u8 },
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        id: ObjectId,
        name: String,
        count: u32,
        big: i64,
        ratio: f32,
        flag: bool,
        maybe: Option<i16>,
        missing: Option<String>,
        tags: Vec<String>,
        shapes: Vec<Shape>,
        pair: (u8, char),
        when: DateTime,
        ts: Timestamp,
        pattern: Regex,
        #[serde(with = "serde_bytes")]
        blob: Vec<u8>,
        extra: BTreeMap<String, i32>,
        raw: Document,
    }

    fn record() -> Record {
        let mut extra = BTreeMap::new();
        extra.insert("x".to_string(), 1);
        extra.insert("y".to_string(), -1);
        Record {
            id: ObjectId::from_parts(1, 2, 3, 4),
            name: "thing".into(),
            count: 7,
            big: -1 << 40,
            ratio: 0.5,
            flag: true,
            maybe: Some(3),
            missing: None,
            tags: vec!["a".into(), "b".into()],
            shapes: vec![
                Shape::Empty,
                Shape::Circle(1.5),
                Shape::Rect(2, 3),
                Shape::Poly { sides: 6 },
            ],
            pair: (9, 'z'),
            when: DateTime::from_millis(-5),
            ts: Timestamp::new(10, 11),
            pattern: Regex::new("a+", "i").unwrap(),
            blob: vec![0, 1, 2],
            extra,
            raw: doc! { "js" => Value::JavaScript("1".into()), "k" => Value::MaxKey },
        }
    }

    #[test]
    fn struct_roundtrip() {
        let rec = record();
        let enc = to_vec(&rec).unwrap();
        let dec: Record = from_slice(&enc).unwrap();
        assert_eq!(dec, rec);
    }

    #[test]
    fn from_stream() {
        let rec = record();
        let mut enc = to_vec(&rec).unwrap();
        let len = enc.len();
        enc.extend_from_slice(&[1, 2, 3]);
        let mut src = &enc[..];
        let dec: Record = from_reader(&mut src).unwrap();
        assert_eq!(dec, rec);
        assert_eq!(src, &[1, 2, 3]);
        assert!(from_slice::<Record>(&enc).is_err());
        assert!(from_slice::<Record>(&enc[..len]).is_ok());
    }

    #[test]
    fn document_and_value() {
        let doc = doc! {
            "a" => 1i32,
            "b" => vec![Value::from("x"), Value::Int64(2)],
            "c" => Binary::new(Binary::USER_DEFINED, vec![1]),
            "d" => doc! { "e" => Value::Null },
        };
        let enc = doc.to_vec().unwrap();
        let dec: Document = from_slice(&enc).unwrap();
        assert_eq!(dec, doc);
        let value: Value = from_slice(&enc).unwrap();
        assert_eq!(value, Value::Document(doc));
    }

    #[test]
    fn unknown_fields_are_skipped() {
        #[derive(Debug, PartialEq, Deserialize)]
        struct Small {
            b: i32,
        }
        let enc = doc! {
            "a" => doc! { "deep" => vec![Value::Int32(1)] },
            "b" => 2i32,
            "c" => vec![Value::Null],
        }
        .to_vec()
        .unwrap();
        let dec: Small = from_slice(&enc).unwrap();
        assert_eq!(dec, Small { b: 2 });
    }

    #[test]
    fn type_mismatch() {
        #[derive(Debug, Deserialize)]
        struct Num {
            #[allow(dead_code)]
            n: i32,
        }
        let enc = doc! { "n" => "text" }.to_vec().unwrap();
        assert!(from_slice::<Num>(&enc).is_err());
        let enc = doc! { "n" => i64::MAX }.to_vec().unwrap();
        assert!(from_slice::<Num>(&enc).is_err());
    }

    #[test]
    fn extra_tuple_elements() {
        #[derive(Debug, Deserialize)]
        struct Pair {
            #[allow(dead_code)]
            p: (i32, i32),
        }
        let enc = doc! { "p" => vec![Value::Int32(1), Value::Int32(2), Value::Int32(3)] }
            .to_vec()
            .unwrap();
        assert!(from_slice::<Pair>(&enc).is_err());
    }

    #[test]
    fn enum_document_with_two_fields() {
        #[derive(Debug, Deserialize)]
        struct Holder {
            #[allow(dead_code)]
            s: Shape,
        }
        let enc = doc! { "s" => doc! { "Circle" => 1.0f64, "Rect" => 2i32 } }
            .to_vec()
            .unwrap();
        assert!(from_slice::<Holder>(&enc).is_err());
    }

    #[test]
    fn not_a_document() {
        assert!(from_slice::<BTreeMap<String, i32>>(&[]).is_err());
        assert!(from_slice::<i32>(&doc! { "a" => 1i32 }.to_vec().unwrap()).is_err());
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "kind")]
    enum Event {
        Created { id: ObjectId, at: DateTime },
        Matched { pattern: Regex, blob: Binary },
    }

    #[test]
    fn internally_tagged() {
        let events = [
            Event::Created {
                id: ObjectId::from_parts(5, 6, 7, 8),
                at: DateTime::from_millis(1_000),
            },
            Event::Matched {
                pattern: Regex::new("^x", "m").unwrap(),
                blob: Binary::generic(vec![4, 5]),
            },
        ];
        for event in events {
            let enc = to_vec(&event).unwrap();
            assert_eq!(from_slice::<Event>(&enc).unwrap(), event);
        }

        // The tag may come after the fields it selects
        let enc = doc! {
            "id" => ObjectId::from_parts(1, 1, 1, 1),
            "at" => DateTime::from_millis(-1),
            "kind" => "Created",
        }
        .to_vec()
        .unwrap();
        assert_eq!(
            from_slice::<Event>(&enc).unwrap(),
            Event::Created {
                id: ObjectId::from_parts(1, 1, 1, 1),
                at: DateTime::from_millis(-1),
            }
        );
    }

    #[test]
    fn flattened_document() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Envelope {
            id: ObjectId,
            #[serde(flatten)]
            rest: Document,
        }
        let env = Envelope {
            id: ObjectId::from_parts(9, 9, 9, 9),
            rest: doc! {
                "when" => DateTime::from_millis(77),
                "re" => Regex::new("a|b", "i").unwrap(),
                "inner" => doc! { "ts" => Timestamp::new(1, 2), "n" => 3i32 },
                "code" => CodeWithScope::new("f()", doc! { "k" => Value::MinKey }),
            },
        };
        let enc = to_vec(&env).unwrap();
        assert_eq!(from_slice::<Envelope>(&enc).unwrap(), env);
    }

    #[test]
    fn untagged() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        #[serde(untagged)]
        enum Key {
            Id(ObjectId),
            Name(String),
        }
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Keys {
            keys: Vec<Key>,
        }
        let keys = Keys {
            keys: vec![Key::Name("a".into()), Key::Id(ObjectId::from_parts(2, 3, 4, 5))],
        };
        let enc = to_vec(&keys).unwrap();
        assert_eq!(from_slice::<Keys>(&enc).unwrap(), keys);
    }

    #[test]
    fn extended_value_as_map() {
        // Visitors asking for any value get the reserved name mapped to the tag and payload
        #[derive(Debug, PartialEq, Deserialize)]
        struct Raw {
            t: BTreeMap<String, (u8, serde_bytes::ByteBuf)>,
        }
        let enc = doc! { "t" => Timestamp::new(1, 2) }.to_vec().unwrap();
        let raw: Raw = from_slice(&enc).unwrap();
        let (tag, payload) = &raw.t[EXT_NAME];
        assert_eq!(*tag, 0x11);
        assert_eq!(payload.as_slice(), &[2, 0, 0, 0, 1, 0, 0, 0]);

        #[derive(Debug, Deserialize)]
        struct Nested {
            #[allow(dead_code)]
            t: Document,
        }
        assert!(from_slice::<Nested>(&enc).is_err());
        let value: Value = from_slice(&enc).unwrap();
        assert_eq!(value["t"], Value::Timestamp(Timestamp::new(1, 2)));
    }

    #[test]
    fn scopes_use_reader_limits() {
        let mut scope = Document::new();
        for _ in 0..4 {
            scope = doc! { "s" => CodeWithScope::new("", scope) };
        }
        let enc = scope.to_vec().unwrap();
        assert!(from_slice::<Document>(&enc).is_ok());
        let config = ReaderConfig::new().max_depth(4);
        assert!(matches!(
            from_slice_with_config::<Document>(&enc, config),
            Err(Error::ParseLimit(_))
        ));
    }
}
