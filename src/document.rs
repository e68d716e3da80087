//! Ordered BSON documents.
//!
//! A [`Document`] keeps its fields in insertion order, which is also wire order. It's the
//! reference model the codec round-trips against: [`Document::to_vec`] drives a
//! [`Writer`](crate::Writer) and [`Document::from_slice`] drives a [`Reader`](crate::Reader).
//!
//! [`Documents`] reads a stream of documents written back to back, as found in dump files.

use std::io::{Read, Write};
use std::ops::Index;

use serde::{
    de::{Deserialize, Deserializer, MapAccess, Visitor},
    ser::{Serialize, SerializeMap, Serializer},
};

use crate::{
    config::ReaderConfig,
    error::{Error, Result},
    extended::EXT_NAME,
    reader::Reader,
    sink::Buffered,
    source::{Source, Streamed},
    value::{Value, NULL},
    writer::Writer,
};

/// Build a [`Document`] from `name => value` pairs. Values go through `Into<Value>`.
///
/// ```
/// # use bson_stream::*;
/// let doc = doc! {
///     "n" => 42i32,
///     "s" => "hi",
///     "inner" => doc! { "ok" => true },
/// };
/// assert_eq!(doc["inner"]["ok"], Value::Boolean(true));
/// ```
#[macro_export]
macro_rules! doc {
    () => {
        $crate::Document::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut doc = $crate::Document::new();
        $(
            doc.push($name, $value);
        )+
        doc
    }};
}

/// An ordered list of named values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Document {
    pub(crate) entries: Vec<(String, Value)>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a field, even if one with the same name already exists.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Set a field. An existing field of the same name keeps its position and has its old value
    /// returned; otherwise the field is appended.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, old)) => Some(std::mem::replace(old, value)),
            None => {
                self.entries.push((name, value));
                None
            }
        }
    }

    /// First field with the given name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.entries
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remove the first field with the given name.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let index = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }

    /// Decode a document that must fill `buf` exactly.
    pub fn from_slice(buf: &[u8]) -> Result<Document> {
        Self::from_slice_with_config(buf, ReaderConfig::default())
    }

    pub fn from_slice_with_config(buf: &[u8], config: ReaderConfig) -> Result<Document> {
        let mut reader = Reader::with_config(buf, config);
        let doc = reader
            .read_document()?
            .ok_or_else(|| Error::framing(0, "Expected a document, found no bytes"))?;
        if !reader.remaining().is_empty() {
            return Err(Error::framing(
                reader.position(),
                format!("{} bytes left over after the document", reader.remaining().len()),
            ));
        }
        Ok(doc)
    }

    /// Read one document from a byte stream. Only the document's own bytes are consumed.
    pub fn from_reader<R: Read>(reader: R) -> Result<Document> {
        Reader::new(Streamed::new(reader))
            .read_document()?
            .ok_or_else(|| Error::framing(0, "Expected a document, found no bytes"))
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new(Vec::new());
        writer.write_document(self)?;
        writer.finish()
    }

    /// Encode onto any writer. The whole document is staged first, so the writer sees a
    /// single complete write.
    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = Writer::new(Buffered::new(writer));
        writer.write_document(self)?;
        writer.finish()?;
        Ok(())
    }
}

impl Index<&str> for Document {
    type Output = Value;

    fn index(&self, index: &str) -> &Self::Output {
        self.get(index).unwrap_or(&NULL)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Document {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut doc = Document::new();
        for (k, v) in iter {
            doc.push(k, v);
        }
        doc
    }
}

impl<K: Into<String>, V: Into<Value>> Extend<(K, V)> for Document {
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        for (k, v) in iter {
            self.push(k, v);
        }
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in self.entries.iter() {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DocVisitor;
        impl<'de> Visitor<'de> for DocVisitor {
            type Value = Document;

            fn expecting(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
                fmt.write_str("a BSON document")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Document, A::Error> {
                let mut doc = match access.size_hint() {
                    Some(size) => Document::with_capacity(size.min(4096)),
                    None => Document::new(),
                };
                while let Some(key) = access.next_key::<String>()? {
                    if key == EXT_NAME {
                        return Err(serde::de::Error::custom(
                            "expected a BSON document, got an extended value",
                        ));
                    }
                    let val = access.next_value::<Value>()?;
                    doc.push(key, val);
                }
                Ok(doc)
            }
        }
        deserializer.deserialize_map(DocVisitor)
    }
}

/// Iterator over top-level documents laid end to end in one source.
///
/// Stops after the first error.
#[derive(Debug)]
pub struct Documents<S> {
    reader: Reader<S>,
    done: bool,
}

impl<S: Source> Documents<S> {
    pub fn new(source: S) -> Self {
        Self::with_config(source, ReaderConfig::default())
    }

    pub fn with_config(source: S, config: ReaderConfig) -> Self {
        Self {
            reader: Reader::with_config(source, config),
            done: false,
        }
    }

    /// Byte offset of the next document.
    pub fn position(&self) -> u64 {
        self.reader.position()
    }
}

impl<S: Source> Iterator for Documents<S> {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.reader.rearm();
        match self.reader.read_document() {
            Ok(Some(doc)) => Some(Ok(doc)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        binary::Binary, datetime::DateTime, extended::CodeWithScope, object_id::ObjectId,
        pattern::Regex, timestamp::Timestamp,
    };
    use rand::prelude::*;

    fn every_type() -> Document {
        doc! {
            "double" => 3.25f64,
            "string" => "héllo",
            "doc" => doc! { "a" => 1i32, "b" => doc!{} },
            "array" => vec![Value::from(1i32), Value::from("two"), Value::Array(vec![])],
            "binary" => Binary::new(Binary::UUID, vec![1u8; 16]),
            "old_binary" => Binary::new(Binary::BINARY_OLD, vec![2, 3]),
            "oid" => ObjectId::from_parts(100, 200, 300, 400),
            "bool" => false,
            "date" => DateTime::from_millis(1_600_000_000_000),
            "null" => Value::Null,
            "regex" => Regex::new("^x", "ims").unwrap(),
            "js" => Value::JavaScript("f()".into()),
            "jws" => CodeWithScope::new("g()", doc! { "v" => "scope" }),
            "symbol" => Value::Symbol("sym".into()),
            "int32" => i32::MIN,
            "timestamp" => Timestamp::new(1, 2),
            "int64" => i64::MAX,
            "min" => Value::MinKey,
            "max" => Value::MaxKey,
        }
    }

    #[test]
    fn roundtrip_every_type() {
        let doc = every_type();
        let enc = doc.to_vec().unwrap();
        assert_eq!(Document::from_slice(&enc).unwrap(), doc);
    }

    #[test]
    fn field_order_and_duplicates() {
        let doc = doc! { "z" => 1i32, "a" => 2i32, "z" => 3i32 };
        let dec = Document::from_slice(&doc.to_vec().unwrap()).unwrap();
        assert_eq!(dec.keys().collect::<Vec<_>>(), vec!["z", "a", "z"]);
        assert_eq!(dec["z"], Value::Int32(1));
    }

    #[test]
    fn insert_and_remove() {
        let mut doc = doc! { "a" => 1i32, "b" => 2i32 };
        assert_eq!(doc.insert("a", 5i32), Some(Value::Int32(1)));
        assert_eq!(doc.insert("c", 6i32), None);
        assert_eq!(doc.keys().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(doc.remove("b"), Some(Value::Int32(2)));
        assert!(!doc.contains_key("b"));
        assert_eq!(doc.len(), 2);
    }

    #[test]
    fn trailing_bytes() {
        let mut enc = doc! { "a" => 1i32 }.to_vec().unwrap();
        enc.push(0);
        assert!(matches!(Document::from_slice(&enc), Err(Error::Framing { .. })));
        assert!(Document::from_slice(&[]).is_err());
    }

    #[test]
    fn writer_and_reader_streams() {
        let doc = every_type();
        let mut out = Vec::new();
        doc.to_writer(&mut out).unwrap();
        assert_eq!(out, doc.to_vec().unwrap());
        assert_eq!(Document::from_reader(&out[..]).unwrap(), doc);
    }

    #[test]
    fn concatenated() {
        let mut stream = Vec::new();
        for i in 0..3i32 {
            stream.extend(doc! { "i" => i }.to_vec().unwrap());
        }
        let docs: Vec<Document> = Documents::new(&stream[..])
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[2]["i"], Value::Int32(2));

        stream.extend_from_slice(&[9, 0, 0]);
        let mut docs = Documents::new(&stream[..]);
        for _ in 0..3 {
            assert!(docs.next().unwrap().is_ok());
        }
        assert!(docs.next().unwrap().is_err());
        assert!(docs.next().is_none());
    }

    #[test]
    fn deep_nesting() {
        let mut value = Value::from(1i32);
        for i in 0..1000 {
            value = if i % 2 == 0 {
                Value::Document(doc! { "d" => value })
            } else {
                Value::Array(vec![value])
            };
        }
        let doc = doc! { "root" => value };
        let enc = doc.to_vec().unwrap();
        let dec = Document::from_slice(&enc).unwrap();
        assert_eq!(dec, doc);
    }

    fn random_value<R: Rng>(rng: &mut R, depth: usize) -> Value {
        let max = if depth == 0 { 10 } else { 12 };
        match rng.gen_range(0..max) {
            0 => Value::Double(rng.gen::<f64>() * 1e6),
            1 => Value::String((0..rng.gen_range(0..8)).map(|_| rng.gen::<char>()).collect()),
            2 => Value::Boolean(rng.gen()),
            3 => Value::Null,
            4 => Value::Int32(rng.gen()),
            5 => Value::Int64(rng.gen()),
            6 => Value::ObjectId(ObjectId::from_bytes(rng.gen())),
            7 => {
                let len = rng.gen_range(0..10);
                Value::Binary(Binary::new(rng.gen(), (0..len).map(|_| rng.gen()).collect()))
            }
            8 => Value::Timestamp(Timestamp::new(rng.gen(), rng.gen())),
            9 => Value::DateTime(DateTime::from_millis(rng.gen())),
            10 => Value::Document(random_document(rng, depth - 1)),
            _ => {
                let len = rng.gen_range(0..5);
                Value::Array((0..len).map(|_| random_value(rng, depth - 1)).collect())
            }
        }
    }

    fn random_document<R: Rng>(rng: &mut R, depth: usize) -> Document {
        (0..rng.gen_range(0..6))
            .map(|i| (format!("f{}", i), random_value(rng, depth)))
            .collect()
    }

    #[test]
    fn random_roundtrip() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..200 {
            let doc = random_document(&mut rng, 4);
            let enc = doc.to_vec().unwrap();
            let len = i32::from_le_bytes([enc[0], enc[1], enc[2], enc[3]]) as usize;
            assert_eq!(len, enc.len());
            assert_eq!(enc[len - 1], 0);
            assert_eq!(Document::from_slice(&enc).unwrap(), doc);
        }
    }
}
