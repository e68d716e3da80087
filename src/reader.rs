//! The Token Reader: a pull parser over a BSON byte stream.
//!
//! Each call to [`Reader::next_token`] moves exactly one lexical step. Scalars are decoded as soon
//! as their token is produced; extended values are buffered as raw payload and only decoded by
//! [`Reader::get_embedded_object`]. Nested Documents and Arrays are tracked on an explicit frame
//! stack, each frame remembering where its declared length says it must end. Every element is
//! checked against that end before any of it is read, so a corrupt length can't make the reader
//! allocate or consume past its frame.
//!
//! ```
//! # use bson_stream::*;
//! # fn main() -> Result<()> {
//! let mut doc = Document::new();
//! doc.push("n", 42i32);
//! let bytes = doc.to_vec()?;
//!
//! let mut reader = Reader::new(&bytes[..]);
//! assert_eq!(reader.next_token()?, Token::StartObject);
//! assert_eq!(reader.next_token()?, Token::FieldName);
//! assert_eq!(reader.current_field_name(), Some("n"));
//! assert_eq!(reader.next_token()?, Token::Scalar(ElementType::Int32));
//! assert_eq!(reader.get_i32()?, 42);
//! assert_eq!(reader.next_token()?, Token::EndObject);
//! assert_eq!(reader.next_token()?, Token::EndOfInput);
//! # Ok(())
//! # }
//! ```

use std::io;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, trace, warn};

use crate::{
    config::{ReaderConfig, UnknownTypes},
    depth_tracking::DepthTracker,
    document::Document,
    error::{Error, Result},
    extended::{string_body, Embedded},
    marker::{ElementType, Kind, Shape, TERMINATOR},
    source::Source,
    value::Value,
};

/// One lexical event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Token {
    StartObject,
    StartArray,
    /// A field name inside a Document. Array elements don't produce one.
    FieldName,
    /// A primitive value, already decoded.
    Scalar(ElementType),
    /// An extended value, held as raw payload until asked for.
    Embedded(ElementType),
    EndObject,
    EndArray,
    EndOfInput,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FrameKind {
    Document,
    Array,
}

#[derive(Clone, Copy, Debug)]
struct Frame {
    kind: FrameKind,
    /// Absolute offset one past the frame's terminator.
    end: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    /// Expecting a top-level document, or the end of input.
    Start,
    /// Expecting an element tag or a frame terminator.
    Element,
    /// A field name was just produced; its value comes next.
    Value(ElementType),
    /// The top-level document is closed.
    Done,
    /// A fatal error happened.
    Failed,
}

#[derive(Clone, Debug, PartialEq)]
enum Current {
    None,
    Double(f64),
    String(String),
    Boolean(bool),
    Null,
    Int32(i32),
    Int64(i64),
    Payload(Vec<u8>),
}

/// Pull parser over a single top-level Document.
#[derive(Debug)]
pub struct Reader<S> {
    source: S,
    config: ReaderConfig,
    frames: DepthTracker<Frame>,
    state: State,
    token: Token,
    offset: u64,
    peeked: Option<u8>,
    field_name: String,
    element_type: Option<ElementType>,
    current: Current,
}

fn eof_to_framing(offset: u64, e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::framing(offset, "Input ended before the declared end of the frame")
    } else {
        Error::Io(e)
    }
}

impl<S: Source> Reader<S> {
    pub fn new(source: S) -> Self {
        Self::with_config(source, ReaderConfig::default())
    }

    pub fn with_config(source: S, config: ReaderConfig) -> Self {
        let frames = DepthTracker::new(config.max_depth);
        Self {
            source,
            config,
            frames,
            state: State::Start,
            token: Token::EndOfInput,
            offset: 0,
            peeked: None,
            field_name: String::new(),
            element_type: None,
            current: Current::None,
        }
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Byte offset of the next unconsumed byte. After an [`Error::UnsupportedType`] in abort
    /// mode, this is the offset of the offending tag.
    pub fn position(&self) -> u64 {
        self.offset
    }

    /// Number of Documents and Arrays currently open.
    pub fn depth(&self) -> usize {
        self.frames.depth()
    }

    /// The most recently produced token. Before the first call to `next_token` this is
    /// [`Token::EndOfInput`].
    pub fn current_token(&self) -> Token {
        self.token
    }

    /// Field name of the most recent element. Inside an Array this is the element's index name.
    pub fn current_field_name(&self) -> Option<&str> {
        self.element_type.map(|_| self.field_name.as_str())
    }

    /// Element type of the most recent element.
    pub fn current_element_type(&self) -> Option<ElementType> {
        self.element_type
    }

    /// Tag byte of the most recent element.
    pub fn current_type_tag(&self) -> Option<u8> {
        self.element_type.map(ElementType::into_u8)
    }

    /// Hand back the byte source. Nothing past the last consumed byte has been read from it,
    /// except for a tag left behind by an [`Error::UnsupportedType`].
    pub fn into_inner(self) -> S {
        self.source
    }

    /// Advance one lexical step.
    pub fn next_token(&mut self) -> Result<Token> {
        self.check_usable()?;
        let result = self.advance();
        match self.guard(result) {
            Ok(token) => {
                self.token = token;
                Ok(token)
            }
            Err(e) => Err(e),
        }
    }

    /// If the current token opens a Document or Array, jump straight past its end using the
    /// declared length, without tokenizing anything inside it. The current token becomes the
    /// matching end token. Does nothing for any other token.
    pub fn skip_children(&mut self) -> Result<()> {
        self.check_usable()?;
        if !matches!(self.token, Token::StartObject | Token::StartArray) {
            return Ok(());
        }
        let result = self.skip_frame();
        self.guard(result)
    }

    /// Let the reader start on another top-level document once the current one is done.
    pub(crate) fn rearm(&mut self) {
        if self.state == State::Done {
            self.state = State::Start;
            self.token = Token::EndOfInput;
            self.element_type = None;
            self.current = Current::None;
        }
    }

    fn check_usable(&self) -> Result<()> {
        if self.state == State::Failed {
            Err(Error::protocol("Reader can't be used after an earlier error"))
        } else {
            Ok(())
        }
    }

    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(ref e) = result {
            if e.is_fatal() {
                self.state = State::Failed;
            }
        }
        result
    }

    fn advance(&mut self) -> Result<Token> {
        match self.state {
            State::Start => self.start_document(),
            State::Element => self.read_element(),
            State::Value(ty) => self.read_element_value(ty),
            State::Done => Ok(Token::EndOfInput),
            State::Failed => Err(Error::protocol("Reader can't be used after an earlier error")),
        }
    }

    fn start_document(&mut self) -> Result<Token> {
        let mut first = [0u8; 1];
        let read = loop {
            match self.source.read(&mut first) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        };
        if read == 0 {
            self.state = State::Done;
            self.element_type = None;
            self.current = Current::None;
            return Ok(Token::EndOfInput);
        }
        let start = self.offset;
        self.offset += 1;
        let mut rest = [0u8; 3];
        self.fill(&mut rest)?;
        let length = i32::from_le_bytes([first[0], rest[0], rest[1], rest[2]]);
        self.open_frame(FrameKind::Document, start, length)?;
        self.element_type = None;
        self.current = Current::None;
        self.state = State::Element;
        Ok(Token::StartObject)
    }

    fn open_frame(&mut self, kind: FrameKind, start: u64, length: i32) -> Result<()> {
        if length < 5 {
            return Err(Error::framing(
                start,
                format!("Declared length {} is below the minimum of 5", length),
            ));
        }
        let length = length as usize;
        if length > self.config.max_document_size {
            return Err(Error::LengthTooLong {
                max: self.config.max_document_size,
                actual: length,
            });
        }
        let end = start + length as u64;
        if let Some(parent) = self.frames.last() {
            if end > parent.end - 1 {
                return Err(Error::framing(
                    start,
                    format!(
                        "Frame declared to end at byte {} overruns its parent, which ends at byte {}",
                        end, parent.end
                    ),
                ));
            }
        }
        self.frames.push(Frame { kind, end })?;
        trace!(
            "Entered {:?} at byte {}, ending at byte {} (depth {})",
            kind,
            start,
            end,
            self.frames.depth()
        );
        Ok(())
    }

    fn close_frame(&mut self) -> Result<Token> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| Error::protocol("No open frame to close"))?;
        trace!("Left {:?} at byte {}", frame.kind, frame.end);
        self.element_type = None;
        self.current = Current::None;
        if self.frames.is_empty() {
            debug!("Finished top-level document ({} bytes read)", self.offset);
            self.state = State::Done;
        } else {
            self.state = State::Element;
        }
        Ok(match frame.kind {
            FrameKind::Document => Token::EndObject,
            FrameKind::Array => Token::EndArray,
        })
    }

    fn current_frame(&self) -> Result<Frame> {
        self.frames
            .last()
            .copied()
            .ok_or_else(|| Error::protocol("Not inside a Document or Array"))
    }

    fn read_element(&mut self) -> Result<Token> {
        loop {
            let frame = self.current_frame()?;
            let tag = self.peek_tag()?;
            let tag_offset = self.offset;

            if tag == TERMINATOR {
                self.consume_tag();
                if self.offset != frame.end {
                    return Err(Error::framing(
                        tag_offset,
                        format!(
                            "Terminator found, but frame is declared to end at byte {}",
                            frame.end
                        ),
                    ));
                }
                return self.close_frame();
            }
            if tag_offset + 1 >= frame.end {
                return Err(Error::framing(
                    tag_offset,
                    format!("Expected frame terminator, found 0x{:02x}", tag),
                ));
            }

            let ty = match ElementType::from_u8(tag) {
                Some(ty) if ty.kind() != Kind::Legacy => ty,
                known => {
                    if self.config.unknown_types == UnknownTypes::Abort {
                        // The tag stays unconsumed
                        return Err(Error::UnsupportedType {
                            tag,
                            offset: tag_offset,
                        });
                    }
                    self.consume_tag();
                    self.skip_unsupported(tag, known, frame)?;
                    continue;
                }
            };

            self.consume_tag();
            self.field_name = self.read_cstring(frame.end - 1, "Field name")?;
            self.element_type = Some(ty);
            self.current = Current::None;
            return match frame.kind {
                FrameKind::Document => {
                    self.state = State::Value(ty);
                    Ok(Token::FieldName)
                }
                FrameKind::Array => self.read_element_value(ty),
            };
        }
    }

    fn skip_unsupported(
        &mut self,
        tag: u8,
        known: Option<ElementType>,
        frame: Frame,
    ) -> Result<()> {
        let limit = frame.end - 1;
        match known {
            Some(ty) => {
                let name = self.read_cstring(limit, "Field name")?;
                self.read_payload(ty, limit)?;
                warn!(
                    "Skipped unsupported {} element {:?} ending at byte {}",
                    ty, name, self.offset
                );
            }
            None => {
                let remaining = limit - self.offset;
                let offset = self.offset;
                self.source
                    .skip(remaining)
                    .map_err(|e| eof_to_framing(offset, e))?;
                self.offset += remaining;
                warn!(
                    "Unknown element type 0x{:02x} at byte {}; dropped the remaining {} bytes of the enclosing {:?}",
                    tag,
                    offset - 1,
                    remaining,
                    frame.kind
                );
            }
        }
        Ok(())
    }

    fn read_element_value(&mut self, ty: ElementType) -> Result<Token> {
        let frame = self.current_frame()?;
        let limit = frame.end - 1;
        self.state = State::Element;
        match ty.kind() {
            Kind::Structural => {
                let start = self.offset;
                let mut len = Vec::with_capacity(4);
                self.read_into(&mut len, 4, limit, ty.name())?;
                let length = LittleEndian::read_i32(&len);
                let kind = if ty == ElementType::Array {
                    FrameKind::Array
                } else {
                    FrameKind::Document
                };
                self.open_frame(kind, start, length)?;
                self.current = Current::None;
                Ok(match kind {
                    FrameKind::Document => Token::StartObject,
                    FrameKind::Array => Token::StartArray,
                })
            }
            Kind::Scalar => {
                let payload = self.read_payload(ty, limit)?;
                self.current = match ty {
                    ElementType::Double => Current::Double(LittleEndian::read_f64(&payload)),
                    ElementType::String => Current::String(string_body(&payload[4..], "String")?),
                    ElementType::Boolean => match payload[0] {
                        0 => Current::Boolean(false),
                        1 => Current::Boolean(true),
                        b => {
                            return Err(Error::BadEncode(format!(
                                "Boolean byte must be 0 or 1, got 0x{:02x}",
                                b
                            )))
                        }
                    },
                    ElementType::Int32 => Current::Int32(LittleEndian::read_i32(&payload)),
                    ElementType::Int64 => Current::Int64(LittleEndian::read_i64(&payload)),
                    _ => Current::Null,
                };
                Ok(Token::Scalar(ty))
            }
            Kind::Embedded => {
                let payload = self.read_payload(ty, limit)?;
                self.current = Current::Payload(payload);
                Ok(Token::Embedded(ty))
            }
            Kind::Legacy => Err(Error::UnsupportedType {
                tag: ty.into_u8(),
                offset: self.offset,
            }),
        }
    }

    /// Read one value's payload, following its layout. Nothing may cross `limit`, the offset of
    /// the enclosing frame's terminator.
    fn read_payload(&mut self, ty: ElementType, limit: u64) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let what = ty.name();
        match ty.shape() {
            Shape::Fixed(n) => self.read_into(&mut buf, n as u64, limit, what)?,
            Shape::String => {
                let len = self.read_length(&mut buf, 1, limit, what)?;
                self.read_into(&mut buf, len, limit, what)?;
            }
            Shape::StringThen(n) => {
                let len = self.read_length(&mut buf, 1, limit, what)?;
                self.read_into(&mut buf, len + n as u64, limit, what)?;
            }
            Shape::Binary => {
                let len = self.read_length(&mut buf, 0, limit, what)?;
                self.read_into(&mut buf, len + 1, limit, what)?;
            }
            Shape::CStringPair => {
                self.read_cstring_into(&mut buf, limit, what)?;
                self.read_cstring_into(&mut buf, limit, what)?;
            }
            Shape::CodeWithScope => {
                // Smallest is an empty string plus an empty scope document
                let len = self.read_length(&mut buf, 14, limit, what)?;
                self.read_into(&mut buf, len - 4, limit, what)?;
            }
            Shape::Frame => {
                return Err(Error::protocol(format!("{} has no flat payload", what)));
            }
        }
        Ok(buf)
    }

    /// Read a little-endian int32 length prefix onto `buf` and check it against `min`.
    fn read_length(&mut self, buf: &mut Vec<u8>, min: i32, limit: u64, what: &str) -> Result<u64> {
        let at = self.offset;
        let start = buf.len();
        self.read_into(buf, 4, limit, what)?;
        let len = LittleEndian::read_i32(&buf[start..]);
        if len < min {
            return Err(Error::BadEncode(format!(
                "{} at byte {} declares length {}, minimum is {}",
                what, at, len, min
            )));
        }
        Ok(len as u64)
    }

    fn read_into(&mut self, buf: &mut Vec<u8>, n: u64, limit: u64, what: &str) -> Result<()> {
        if self.offset + n > limit {
            return Err(Error::framing(
                self.offset,
                format!(
                    "{} of {} bytes overruns the frame terminator at byte {}",
                    what, n, limit
                ),
            ));
        }
        let start = buf.len();
        buf.resize(start + n as usize, 0);
        self.fill(&mut buf[start..])
    }

    fn read_cstring_into(&mut self, buf: &mut Vec<u8>, limit: u64, what: &str) -> Result<()> {
        let mut byte = [0u8; 1];
        loop {
            if self.offset >= limit {
                return Err(Error::framing(
                    self.offset,
                    format!("{} cstring runs into the frame terminator", what),
                ));
            }
            self.fill(&mut byte)?;
            buf.push(byte[0]);
            if byte[0] == 0 {
                return Ok(());
            }
        }
    }

    fn read_cstring(&mut self, limit: u64, what: &str) -> Result<String> {
        let mut buf = Vec::new();
        self.read_cstring_into(&mut buf, limit, what)?;
        buf.pop();
        String::from_utf8(buf).map_err(|e| Error::BadEncode(format!("{}: {}", what, e)))
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<()> {
        let offset = self.offset;
        self.source
            .read_exact(buf)
            .map_err(|e| eof_to_framing(offset, e))?;
        self.offset += buf.len() as u64;
        Ok(())
    }

    fn peek_tag(&mut self) -> Result<u8> {
        if let Some(tag) = self.peeked {
            return Ok(tag);
        }
        let mut byte = [0u8; 1];
        let offset = self.offset;
        self.source
            .read_exact(&mut byte)
            .map_err(|e| eof_to_framing(offset, e))?;
        self.peeked = Some(byte[0]);
        Ok(byte[0])
    }

    fn consume_tag(&mut self) {
        if self.peeked.take().is_some() {
            self.offset += 1;
        }
    }

    fn skip_frame(&mut self) -> Result<()> {
        let frame = self.current_frame()?;
        let start = self.offset;
        let remaining = frame.end - 1 - self.offset;
        self.source
            .skip(remaining)
            .map_err(|e| eof_to_framing(start, e))?;
        self.offset += remaining;
        let mut terminator = [0u8; 1];
        self.fill(&mut terminator)?;
        if terminator[0] != TERMINATOR {
            return Err(Error::framing(
                self.offset - 1,
                format!("Expected frame terminator, found 0x{:02x}", terminator[0]),
            ));
        }
        debug!(
            "Skipped {:?} contents from byte {} to byte {}",
            frame.kind, start, frame.end
        );
        self.token = self.close_frame()?;
        Ok(())
    }

    fn mismatch<T>(&self, expected: &'static str) -> Result<T> {
        let actual = match self.token {
            Token::Scalar(ty) | Token::Embedded(ty) => ty.to_string(),
            other => format!("{:?}", other),
        };
        Err(Error::TypeMismatch { expected, actual })
    }

    pub fn get_i32(&self) -> Result<i32> {
        match self.current {
            Current::Int32(v) => Ok(v),
            _ => self.mismatch("Int32"),
        }
    }

    /// The current Int32 or Int64, widened.
    pub fn get_i64(&self) -> Result<i64> {
        match self.current {
            Current::Int32(v) => Ok(v as i64),
            Current::Int64(v) => Ok(v),
            _ => self.mismatch("Int64"),
        }
    }

    /// The current Double, Int32, or Int64, as a float.
    pub fn get_f64(&self) -> Result<f64> {
        match self.current {
            Current::Double(v) => Ok(v),
            Current::Int32(v) => Ok(v as f64),
            Current::Int64(v) => Ok(v as f64),
            _ => self.mismatch("Double"),
        }
    }

    pub fn get_bool(&self) -> Result<bool> {
        match self.current {
            Current::Boolean(v) => Ok(v),
            _ => self.mismatch("Boolean"),
        }
    }

    pub fn is_null(&self) -> bool {
        self.token == Token::Scalar(ElementType::Null)
    }

    /// Text of the current token: a String, or the name itself on a `FieldName` token.
    pub fn get_text(&self) -> Result<&str> {
        match (&self.token, &self.current) {
            (Token::FieldName, _) => Ok(&self.field_name),
            (_, Current::String(s)) => Ok(s),
            _ => self.mismatch("String"),
        }
    }

    /// Move the current String out of the reader instead of borrowing it.
    pub fn take_text(&mut self) -> Result<String> {
        if self.token == Token::FieldName {
            return Ok(std::mem::take(&mut self.field_name));
        }
        if let Current::String(s) = &mut self.current {
            return Ok(std::mem::take(s));
        }
        self.mismatch("String")
    }

    /// Decode the extended value for the current [`Token::Embedded`].
    pub fn get_embedded_object(&self) -> Result<Embedded> {
        match (&self.token, &self.current) {
            (Token::Embedded(ty), Current::Payload(payload)) => {
                Embedded::decode_with(*ty, payload, &self.config, self.frames.depth())
            }
            _ => self.mismatch("extended value"),
        }
    }

    /// Raw wire payload of the current [`Token::Embedded`], exactly as it was read.
    pub fn raw_payload(&self) -> Option<&[u8]> {
        match &self.current {
            Current::Payload(payload) => Some(payload),
            _ => None,
        }
    }

    /// Materialize the value at the current token. On a start token this reads the whole
    /// Document or Array, leaving the matching end token current; on a `FieldName` it first
    /// moves to the value. Nesting is handled with an explicit stack, not recursion.
    pub fn read_value(&mut self) -> Result<Value> {
        let mut tree = Tree::default();
        loop {
            let done = match tree.feed(self)? {
                Feed::Next => None,
                Feed::Leaf => {
                    let value = self.current_value()?;
                    tree.attach(self.field_name.clone(), value)
                }
                Feed::Done(value) => Some(value),
            };
            if let Some(value) = done {
                return Ok(value);
            }
            self.next_token()?;
        }
    }

    /// Read the next top-level Document in full. Returns `None` once the input is exhausted.
    pub fn read_document(&mut self) -> Result<Option<Document>> {
        match self.next_token()? {
            Token::StartObject => (),
            Token::EndOfInput => return Ok(None),
            other => {
                return Err(Error::protocol(format!(
                    "Expected the start of a document, got {:?}",
                    other
                )))
            }
        }
        match self.read_value()? {
            Value::Document(doc) => Ok(Some(doc)),
            _ => Err(Error::protocol("Top-level value wasn't a document")),
        }
    }

    /// The value held by the current Scalar or Embedded token.
    pub(crate) fn current_value(&self) -> Result<Value> {
        Ok(match &self.current {
            Current::Double(v) => Value::Double(*v),
            Current::String(v) => Value::String(v.clone()),
            Current::Boolean(v) => Value::Boolean(*v),
            Current::Null => Value::Null,
            Current::Int32(v) => Value::Int32(*v),
            Current::Int64(v) => Value::Int64(*v),
            Current::Payload(_) => Value::from(self.get_embedded_object()?),
            Current::None => return self.mismatch("value"),
        })
    }
}

#[derive(Debug)]
enum Container {
    Document(Document),
    Array(Vec<Value>),
}

/// Documents and Arrays still being filled in while a value is materialized, innermost last.
#[derive(Debug, Default)]
pub(crate) struct Tree {
    open: Vec<(String, Container)>,
}

/// What [`Tree::feed`] made of a token.
pub(crate) enum Feed {
    /// Taken in; move on to the next token.
    Next,
    /// A Scalar or Embedded value, which the caller supplies through [`Tree::attach`].
    Leaf,
    /// The outermost value is complete.
    Done(Value),
}

impl Tree {
    /// Take in the reader's current token.
    pub(crate) fn feed<S: Source>(&mut self, reader: &Reader<S>) -> Result<Feed> {
        let container = match reader.token {
            Token::StartObject => Container::Document(Document::new()),
            Token::StartArray => Container::Array(Vec::new()),
            Token::FieldName => return Ok(Feed::Next),
            Token::Scalar(_) | Token::Embedded(_) => return Ok(Feed::Leaf),
            Token::EndObject | Token::EndArray => {
                let (name, value) = match self.open.pop() {
                    Some((name, Container::Document(doc))) => (name, Value::Document(doc)),
                    Some((name, Container::Array(arr))) => (name, Value::Array(arr)),
                    None => return Err(Error::protocol("End token with no value in progress")),
                };
                return Ok(match self.attach(name, value) {
                    Some(value) => Feed::Done(value),
                    None => Feed::Next,
                });
            }
            Token::EndOfInput => {
                return Err(Error::protocol("Tried to read a value past the end of input"))
            }
        };
        self.open.push((reader.field_name.clone(), container));
        Ok(Feed::Next)
    }

    /// Add a finished value to the innermost open container. With nothing open, the value is
    /// the whole result and comes straight back.
    pub(crate) fn attach(&mut self, name: String, value: Value) -> Option<Value> {
        match self.open.last_mut() {
            None => Some(value),
            Some((_, Container::Document(doc))) => {
                doc.push(name, value);
                None
            }
            Some((_, Container::Array(arr))) => {
                arr.push(value);
                None
            }
        }
    }
}

impl<'a> Reader<&'a [u8]> {
    /// Bytes not yet consumed.
    pub fn remaining(&self) -> &'a [u8] {
        self.source
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{object_id::ObjectId, source::Streamed, Writer};

    fn tokens(bytes: &[u8]) -> Vec<Token> {
        let mut reader = Reader::new(bytes);
        let mut out = Vec::new();
        loop {
            let token = reader.next_token().unwrap();
            out.push(token);
            if token == Token::EndOfInput {
                return out;
            }
        }
    }

    fn scenario() -> Vec<u8> {
        let mut w = Writer::new(Vec::new());
        w.write_start_object().unwrap();
        w.write_field_name("_id").unwrap();
        w.write_object_id(&ObjectId::from_legacy(1, 2, 3)).unwrap();
        w.write_field_name("n").unwrap();
        w.write_i32(42).unwrap();
        w.write_field_name("s").unwrap();
        w.write_string("hi").unwrap();
        w.write_field_name("arr").unwrap();
        w.write_start_array().unwrap();
        w.write_bool(true).unwrap();
        w.write_bool(false).unwrap();
        w.write_end_array().unwrap();
        w.write_end_object().unwrap();
        w.finish().unwrap()
    }

    #[test]
    fn concrete_scenario() {
        let bytes = scenario();
        let mut reader = Reader::new(&bytes[..]);
        assert_eq!(reader.next_token().unwrap(), Token::StartObject);

        assert_eq!(reader.next_token().unwrap(), Token::FieldName);
        assert_eq!(reader.current_field_name(), Some("_id"));
        assert_eq!(reader.next_token().unwrap(), Token::Embedded(ElementType::ObjectId));
        assert_eq!(reader.current_type_tag(), Some(0x07));
        assert_eq!(
            reader.get_embedded_object().unwrap(),
            Embedded::ObjectId(ObjectId::from_legacy(1, 2, 3))
        );

        assert_eq!(reader.next_token().unwrap(), Token::FieldName);
        assert_eq!(reader.get_text().unwrap(), "n");
        assert_eq!(reader.next_token().unwrap(), Token::Scalar(ElementType::Int32));
        assert_eq!(reader.get_i32().unwrap(), 42);
        assert_eq!(reader.get_i64().unwrap(), 42);
        assert_eq!(reader.get_f64().unwrap(), 42.0);

        assert_eq!(reader.next_token().unwrap(), Token::FieldName);
        assert_eq!(reader.next_token().unwrap(), Token::Scalar(ElementType::String));
        assert_eq!(reader.current_field_name(), Some("s"));
        assert_eq!(reader.get_text().unwrap(), "hi");

        assert_eq!(reader.next_token().unwrap(), Token::FieldName);
        assert_eq!(reader.current_field_name(), Some("arr"));
        assert_eq!(reader.next_token().unwrap(), Token::StartArray);
        assert_eq!(reader.next_token().unwrap(), Token::Scalar(ElementType::Boolean));
        assert_eq!(reader.current_field_name(), Some("0"));
        assert!(reader.get_bool().unwrap());
        assert_eq!(reader.next_token().unwrap(), Token::Scalar(ElementType::Boolean));
        assert_eq!(reader.current_field_name(), Some("1"));
        assert!(!reader.get_bool().unwrap());
        assert_eq!(reader.next_token().unwrap(), Token::EndArray);
        assert_eq!(reader.next_token().unwrap(), Token::EndObject);
        assert_eq!(reader.next_token().unwrap(), Token::EndOfInput);
        assert_eq!(reader.next_token().unwrap(), Token::EndOfInput);
        assert_eq!(reader.position(), bytes.len() as u64);
    }

    #[test]
    fn empty_input() {
        assert_eq!(tokens(&[]), vec![Token::EndOfInput]);
        let mut reader = Reader::new(&b""[..]);
        assert!(reader.read_document().unwrap().is_none());
    }

    #[test]
    fn empty_document() {
        assert_eq!(
            tokens(&[5, 0, 0, 0, 0]),
            vec![Token::StartObject, Token::EndObject, Token::EndOfInput]
        );
    }

    #[test]
    fn type_mismatch_is_recoverable() {
        let bytes = scenario();
        let mut reader = Reader::new(&bytes[..]);
        reader.next_token().unwrap();
        reader.next_token().unwrap();
        reader.next_token().unwrap();
        reader.next_token().unwrap();
        reader.next_token().unwrap();
        match reader.get_text() {
            Err(Error::TypeMismatch { expected, actual }) => {
                assert_eq!(expected, "String");
                assert_eq!(actual, "Int32");
            }
            other => panic!("expected a type mismatch, got {:?}", other),
        }
        assert!(reader.get_bool().is_err());
        assert!(reader.get_embedded_object().is_err());
        assert_eq!(reader.next_token().unwrap(), Token::FieldName);
    }

    mod framing {
        use super::*;

        fn first_error(bytes: &[u8]) -> Error {
            let mut reader = Reader::new(bytes);
            loop {
                match reader.next_token() {
                    Ok(Token::EndOfInput) => panic!("parsed without error"),
                    Ok(_) => (),
                    Err(e) => return e,
                }
            }
        }

        #[test]
        fn missing_terminator() {
            // Declared 12 bytes, but the last byte isn't 0x00
            let bytes = [12, 0, 0, 0, 0x10, b'a', 0, 1, 0, 0, 0, 7];
            assert!(matches!(first_error(&bytes), Error::Framing { offset: 11, .. }));
        }

        #[test]
        fn early_terminator() {
            let bytes = [13, 0, 0, 0, 0x10, b'a', 0, 1, 0, 0, 0, 0, 0];
            assert!(matches!(first_error(&bytes), Error::Framing { offset: 11, .. }));
        }

        #[test]
        fn truncated() {
            let bytes = [12, 0, 0, 0, 0x10, b'a', 0, 1, 0];
            assert!(matches!(first_error(&bytes), Error::Framing { .. }));
            let bytes = [12, 0];
            assert!(matches!(first_error(&bytes), Error::Framing { .. }));
        }

        #[test]
        fn value_overruns_frame() {
            // Int32 would run into the terminator
            let bytes = [10, 0, 0, 0, 0x10, b'a', 0, 1, 0, 0];
            assert!(matches!(first_error(&bytes), Error::Framing { offset: 7, .. }));
        }

        #[test]
        fn string_length_overruns_frame() {
            let bytes = [14, 0, 0, 0, 0x02, b'a', 0, 0xff, 0xff, 0, 0, b'x', 0, 0];
            assert!(matches!(first_error(&bytes), Error::Framing { .. }));
        }

        #[test]
        fn child_overruns_parent() {
            let bytes = [13, 0, 0, 0, 0x03, b'a', 0, 9, 0, 0, 0, 0, 0];
            assert!(matches!(first_error(&bytes), Error::Framing { offset: 7, .. }));
        }

        #[test]
        fn length_too_small() {
            let bytes = [4, 0, 0, 0, 0];
            assert!(matches!(first_error(&bytes), Error::Framing { offset: 0, .. }));
        }

        #[test]
        fn length_too_large() {
            let bytes = [5, 1, 0, 0, 0];
            let mut reader =
                Reader::with_config(&bytes[..], ReaderConfig::new().max_document_size(100));
            assert!(matches!(
                reader.next_token(),
                Err(Error::LengthTooLong { max: 100, actual: 261 })
            ));
        }

        #[test]
        fn bad_boolean() {
            let bytes = [9, 0, 0, 0, 0x08, b'a', 0, 2, 0];
            assert!(matches!(first_error(&bytes), Error::BadEncode(_)));
        }

        #[test]
        fn errors_are_sticky() {
            let bytes = [12, 0, 0, 0, 0x10, b'a', 0, 1, 0, 0, 0, 7];
            let mut reader = Reader::new(&bytes[..]);
            while reader.next_token().is_ok() {}
            assert!(matches!(
                reader.next_token(),
                Err(Error::ProtocolViolation(_))
            ));
            assert!(matches!(
                reader.skip_children(),
                Err(Error::ProtocolViolation(_))
            ));
        }
    }

    mod unknown_types {
        use super::*;

        // {a: 1, b: <tag>..., c: 2}
        fn with_tag(tag: u8, payload: &[u8]) -> Vec<u8> {
            let mut body = vec![0x10, b'a', 0, 1, 0, 0, 0, tag, b'b', 0];
            body.extend_from_slice(payload);
            body.extend_from_slice(&[0x10, b'c', 0, 2, 0, 0, 0, 0]);
            let mut out = ((body.len() + 4) as i32).to_le_bytes().to_vec();
            out.extend_from_slice(&body);
            out
        }

        #[test]
        fn abort_leaves_cursor_before_tag() {
            let bytes = with_tag(0x42, &[1, 2, 3]);
            let mut reader = Reader::new(&bytes[..]);
            for _ in 0..3 {
                reader.next_token().unwrap();
            }
            match reader.next_token() {
                Err(Error::UnsupportedType { tag, offset }) => {
                    assert_eq!(tag, 0x42);
                    assert_eq!(offset, 11);
                }
                other => panic!("expected UnsupportedType, got {:?}", other),
            }
            assert_eq!(reader.position(), 11);
            assert!(reader.next_token().is_err());
        }

        #[test]
        fn abort_on_legacy() {
            let bytes = with_tag(0x06, &[]);
            let mut reader = Reader::new(&bytes[..]);
            let err = loop {
                if let Err(e) = reader.next_token() {
                    break e;
                }
            };
            assert!(matches!(err, Error::UnsupportedType { tag: 0x06, offset: 11 }));
        }

        fn skip_config() -> ReaderConfig {
            ReaderConfig::new().unknown_types(UnknownTypes::Skip)
        }

        #[test]
        fn skip_legacy_exact_shape() {
            let mut decimal = vec![0u8; 16];
            decimal[0] = 0x99;
            let mut dbpointer = vec![2, 0, 0, 0, b'x', 0];
            dbpointer.extend_from_slice(&[0xab; 12]);
            for (tag, payload) in [(0x06, vec![]), (0x13, decimal), (0x0c, dbpointer)] {
                let bytes = with_tag(tag, &payload);
                let mut reader = Reader::with_config(&bytes[..], skip_config());
                let doc = reader.read_document().unwrap().unwrap();
                assert_eq!(doc.len(), 2, "tag 0x{:02x}", tag);
                assert_eq!(doc.get("a"), Some(&Value::Int32(1)));
                assert_eq!(doc.get("c"), Some(&Value::Int32(2)));
                assert_eq!(reader.next_token().unwrap(), Token::EndOfInput);
            }
        }

        #[test]
        fn skip_unknown_drops_rest_of_frame() {
            let bytes = with_tag(0x42, &[1, 2, 3]);
            let mut reader = Reader::with_config(&bytes[..], skip_config());
            let doc = reader.read_document().unwrap().unwrap();
            assert_eq!(doc.len(), 1);
            assert_eq!(doc.get("a"), Some(&Value::Int32(1)));
            assert_eq!(reader.position(), bytes.len() as u64);
        }
    }

    mod skip {
        use super::*;

        fn nested() -> Vec<u8> {
            let mut w = Writer::new(Vec::new());
            w.write_start_object().unwrap();
            w.write_field_name("skip").unwrap();
            w.write_start_object().unwrap();
            w.write_field_name("deep").unwrap();
            w.write_start_array().unwrap();
            w.write_string("x").unwrap();
            w.write_start_object().unwrap();
            w.write_end_object().unwrap();
            w.write_end_array().unwrap();
            w.write_field_name("y").unwrap();
            w.write_f64(1.5).unwrap();
            w.write_end_object().unwrap();
            w.write_field_name("after").unwrap();
            w.write_i64(7).unwrap();
            w.write_end_object().unwrap();
            w.finish().unwrap()
        }

        #[test]
        fn skip_matches_full_tokenization() {
            let bytes = nested();

            let mut skipped = Reader::new(&bytes[..]);
            skipped.next_token().unwrap();
            skipped.next_token().unwrap();
            assert_eq!(skipped.next_token().unwrap(), Token::StartObject);
            skipped.skip_children().unwrap();
            assert_eq!(skipped.current_token(), Token::EndObject);

            let mut walked = Reader::new(&bytes[..]);
            walked.next_token().unwrap();
            walked.next_token().unwrap();
            assert_eq!(walked.next_token().unwrap(), Token::StartObject);
            let mut depth = 1;
            while depth > 0 {
                match walked.next_token().unwrap() {
                    Token::StartObject | Token::StartArray => depth += 1,
                    Token::EndObject | Token::EndArray => depth -= 1,
                    _ => (),
                }
            }

            assert_eq!(skipped.position(), walked.position());
            assert_eq!(skipped.depth(), walked.depth());
            assert_eq!(skipped.next_token().unwrap(), Token::FieldName);
            assert_eq!(skipped.current_field_name(), Some("after"));
            assert_eq!(skipped.next_token().unwrap(), Token::Scalar(ElementType::Int64));
            assert_eq!(skipped.get_i64().unwrap(), 7);
        }

        #[test]
        fn skip_streamed_source() {
            let bytes = nested();
            let mut reader = Reader::new(Streamed::new(&bytes[..]));
            reader.next_token().unwrap();
            reader.next_token().unwrap();
            reader.next_token().unwrap();
            reader.skip_children().unwrap();
            reader.next_token().unwrap();
            reader.next_token().unwrap();
            assert_eq!(reader.get_i64().unwrap(), 7);
        }

        #[test]
        fn skip_whole_document() {
            let bytes = nested();
            let mut reader = Reader::new(&bytes[..]);
            reader.next_token().unwrap();
            reader.skip_children().unwrap();
            assert_eq!(reader.current_token(), Token::EndObject);
            assert_eq!(reader.next_token().unwrap(), Token::EndOfInput);
        }

        #[test]
        fn skip_is_noop_on_scalars() {
            let bytes = nested();
            let mut reader = Reader::new(&bytes[..]);
            reader.next_token().unwrap();
            reader.next_token().unwrap();
            let before = reader.position();
            reader.skip_children().unwrap();
            assert_eq!(reader.position(), before);
            assert_eq!(reader.current_token(), Token::FieldName);
        }

        #[test]
        fn skip_checks_terminator() {
            let mut bytes = nested();
            // Corrupt the inner document's terminator
            let inner_len = i32::from_le_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]);
            bytes[10 + inner_len as usize - 1] = 0x33;
            let mut reader = Reader::new(&bytes[..]);
            reader.next_token().unwrap();
            reader.next_token().unwrap();
            reader.next_token().unwrap();
            assert!(matches!(reader.skip_children(), Err(Error::Framing { .. })));
        }
    }

    #[test]
    fn depth_limit() {
        let mut bytes = Vec::new();
        let mut w = Writer::new(&mut bytes);
        w.write_start_object().unwrap();
        for _ in 0..4 {
            w.write_field_name("a").unwrap();
            w.write_start_object().unwrap();
        }
        for _ in 0..5 {
            w.write_end_object().unwrap();
        }
        w.finish().unwrap();

        let mut reader = Reader::with_config(&bytes[..], ReaderConfig::new().max_depth(4));
        let err = loop {
            if let Err(e) = reader.next_token() {
                break e;
            }
        };
        assert!(matches!(err, Error::ParseLimit(_)));

        let mut reader = Reader::with_config(&bytes[..], ReaderConfig::new().max_depth(5));
        assert!(reader.read_document().unwrap().is_some());
    }

    #[test]
    fn remaining_after_document() {
        let mut bytes = vec![5, 0, 0, 0, 0];
        bytes.extend_from_slice(&[1, 2, 3]);
        let mut reader = Reader::new(&bytes[..]);
        reader.read_document().unwrap().unwrap();
        assert_eq!(reader.next_token().unwrap(), Token::EndOfInput);
        assert_eq!(reader.remaining(), &[1, 2, 3]);
    }
}
