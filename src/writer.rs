//! The Frame Writer: a push generator that produces one BSON document.
//!
//! The writer keeps an explicit stack of open scopes. Opening a scope reserves its 4-byte length
//! with the sink; closing it appends the terminator, computes the scope's size from the sink's
//! position, and back-patches the placeholder. Whether that patch happens in a staging buffer or
//! by seeking back is up to the [`Sink`].
//!
//! A JavaScriptWithScope value is streamed the same way: its total length is reserved, the code
//! goes out, and the scope document opens as one more scope. Closing that scope patches both
//! lengths, so scopes count against the depth limit like any other Document.
//!
//! Inside a Document every value needs a field name first. Inside an Array the writer names the
//! elements itself, `"0"`, `"1"`, and so on.
//!
//! ```
//! # use bson_stream::*;
//! # fn main() -> Result<()> {
//! let mut writer = Writer::new(Vec::new());
//! writer.write_start_object()?;
//! writer.write_field_name("n")?;
//! writer.write_i32(42)?;
//! writer.write_end_object()?;
//! let bytes = writer.finish()?;
//! assert_eq!(bytes, vec![12, 0, 0, 0, 0x10, b'n', 0, 42, 0, 0, 0, 0]);
//! # Ok(())
//! # }
//! ```

use log::{debug, trace};

use crate::{
    binary::Binary,
    config::{ReaderConfig, WriterConfig},
    datetime::DateTime,
    depth_tracking::DepthTracker,
    document::Document,
    error::{Error, Result},
    extended::{checked_len, put_cstring, put_string, CodeWithScope, Embedded},
    marker::{ElementType, TERMINATOR},
    object_id::ObjectId,
    pattern::Regex,
    sink::Sink,
    timestamp::Timestamp,
    value::Value,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ScopeKind {
    Document,
    Array,
}

#[derive(Clone, Copy, Debug)]
struct Scope {
    kind: ScopeKind,
    /// Sink offset of the length placeholder.
    at: u64,
    next_index: u32,
    /// Total-length placeholder of the JavaScriptWithScope this Document is the scope of.
    code_at: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Open,
    Finished,
    Failed,
}

/// Push generator for a single top-level Document.
#[derive(Debug)]
pub struct Writer<S> {
    sink: S,
    config: WriterConfig,
    scopes: DepthTracker<Scope>,
    pending: Option<String>,
    state: State,
    scratch: Vec<u8>,
}

impl<S: Sink> Writer<S> {
    pub fn new(sink: S) -> Self {
        Self::with_config(sink, WriterConfig::default())
    }

    pub fn with_config(sink: S, config: WriterConfig) -> Self {
        let scopes = DepthTracker::new(config.max_depth);
        Self {
            sink,
            config,
            scopes,
            pending: None,
            state: State::Open,
            scratch: Vec::new(),
        }
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    pub fn get_ref(&self) -> &S {
        &self.sink
    }

    /// Bytes handed to the sink so far, including staged ones.
    pub fn position(&self) -> u64 {
        self.sink.position()
    }

    /// Number of open scopes.
    pub fn depth(&self) -> usize {
        self.scopes.depth()
    }

    /// True once the top-level document has been closed.
    pub fn is_complete(&self) -> bool {
        self.state == State::Finished
    }

    /// Check that the document is complete and hand back the sink.
    pub fn finish(self) -> Result<S> {
        match self.state {
            State::Failed => Err(Error::protocol(
                "Writer failed earlier; its output is incomplete",
            )),
            State::Open if !self.scopes.is_empty() => Err(Error::protocol(format!(
                "Finished with {} scope(s) still open",
                self.scopes.depth()
            ))),
            _ => Ok(self.sink),
        }
    }

    fn check_usable(&self) -> Result<()> {
        match self.state {
            State::Open => Ok(()),
            State::Finished => Err(Error::protocol(
                "The top-level document is already complete",
            )),
            State::Failed => Err(Error::protocol("Writer can't be used after an earlier error")),
        }
    }

    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.state = State::Failed;
        }
        result
    }

    /// Limits for checking pre-encoded input about to be written at the current depth.
    fn read_config(&self) -> ReaderConfig {
        ReaderConfig::new()
            .max_depth(self.config.max_depth)
            .max_document_size(self.config.max_document_size)
    }

    /// Stage the field name for the next value. Only valid inside a Document.
    pub fn write_field_name(&mut self, name: &str) -> Result<()> {
        self.check_usable()?;
        let result = self.field_name(name);
        self.guard(result)
    }

    fn field_name(&mut self, name: &str) -> Result<()> {
        match self.scopes.last() {
            Some(scope) if scope.kind == ScopeKind::Document => (),
            Some(_) => {
                return Err(Error::protocol(format!(
                    "Field name {:?} written inside an Array",
                    name
                )))
            }
            None => {
                return Err(Error::protocol(format!(
                    "Field name {:?} written outside any Document",
                    name
                )))
            }
        }
        if let Some(pending) = &self.pending {
            return Err(Error::protocol(format!(
                "Field name {:?} written while {:?} still has no value",
                name, pending
            )));
        }
        if name.as_bytes().contains(&0) {
            return Err(Error::BadEncode(format!(
                "Field name {:?} contains an embedded NUL",
                name
            )));
        }
        self.pending = Some(name.to_owned());
        Ok(())
    }

    /// Push the element's tag and name onto `buf`, consuming the pending field name or the next
    /// array index.
    fn element_header(&mut self, ty: ElementType, buf: &mut Vec<u8>) -> Result<()> {
        let scope = self.scopes.last_mut().ok_or_else(|| {
            Error::protocol(format!(
                "{} value written outside any Document",
                ty
            ))
        })?;
        buf.push(ty.into_u8());
        match scope.kind {
            ScopeKind::Document => {
                let name = self.pending.take().ok_or_else(|| {
                    Error::protocol(format!("{} value written with no field name", ty))
                })?;
                put_cstring(buf, &name)?;
            }
            ScopeKind::Array => {
                buf.extend_from_slice(scope.next_index.to_string().as_bytes());
                buf.push(0);
                scope.next_index += 1;
            }
        }
        Ok(())
    }

    /// Write one whole element. The payload closure appends exactly the bytes the layout table
    /// describes for `ty`.
    fn write_element<F>(&mut self, ty: ElementType, payload: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<u8>) -> Result<()>,
    {
        self.check_usable()?;
        let result = self.element(ty, payload);
        self.guard(result)
    }

    fn element<F>(&mut self, ty: ElementType, payload: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<u8>) -> Result<()>,
    {
        let mut buf = std::mem::take(&mut self.scratch);
        buf.clear();
        self.element_header(ty, &mut buf)?;
        let header = buf.len();
        payload(&mut buf)?;
        if let Some(n) = ty.shape().fixed_len() {
            if buf.len() - header != n {
                return Err(Error::BadEncode(format!(
                    "{} payload must be {} bytes, got {}",
                    ty,
                    n,
                    buf.len() - header
                )));
            }
        }
        self.sink.put(&buf)?;
        self.scratch = buf;
        Ok(())
    }

    pub fn write_start_object(&mut self) -> Result<()> {
        self.check_usable()?;
        let result = self.start(ScopeKind::Document);
        self.guard(result)
    }

    pub fn write_start_array(&mut self) -> Result<()> {
        self.check_usable()?;
        let result = self.start(ScopeKind::Array);
        self.guard(result)
    }

    /// Start a JavaScriptWithScope value. The scope document is open once this returns: write its
    /// fields, then close it with [`write_end_object`](Self::write_end_object).
    pub fn write_start_javascript_with_scope(&mut self, code: &str) -> Result<()> {
        self.check_usable()?;
        let result = self.start_code_with_scope(code);
        self.guard(result)
    }

    fn start_code_with_scope(&mut self, code: &str) -> Result<()> {
        self.element(ElementType::JavaScriptWithScope, |_| Ok(()))?;
        let code_at = self.sink.reserve_length()?;
        let mut buf = std::mem::take(&mut self.scratch);
        buf.clear();
        put_string(&mut buf, code)?;
        self.sink.put(&buf)?;
        self.scratch = buf;
        let at = self.sink.reserve_length()?;
        self.scopes.push(Scope {
            kind: ScopeKind::Document,
            at,
            next_index: 0,
            code_at: Some(code_at),
        })?;
        trace!("Opened scope at byte {} (depth {})", at, self.scopes.depth());
        Ok(())
    }

    fn start(&mut self, kind: ScopeKind) -> Result<()> {
        if self.scopes.is_empty() {
            if kind != ScopeKind::Document {
                return Err(Error::protocol("The top-level value must be a Document"));
            }
        } else {
            let ty = match kind {
                ScopeKind::Document => ElementType::Document,
                ScopeKind::Array => ElementType::Array,
            };
            self.element(ty, |_| Ok(()))?;
        }
        let at = self.sink.reserve_length()?;
        self.scopes.push(Scope {
            kind,
            at,
            next_index: 0,
            code_at: None,
        })?;
        trace!("Opened {:?} at byte {} (depth {})", kind, at, self.scopes.depth());
        Ok(())
    }

    pub fn write_end_object(&mut self) -> Result<()> {
        self.check_usable()?;
        let result = self.end(ScopeKind::Document);
        self.guard(result)
    }

    pub fn write_end_array(&mut self) -> Result<()> {
        self.check_usable()?;
        let result = self.end(ScopeKind::Array);
        self.guard(result)
    }

    fn end(&mut self, kind: ScopeKind) -> Result<()> {
        let scope = match self.scopes.last() {
            Some(scope) if scope.kind == kind => *scope,
            Some(scope) => {
                return Err(Error::protocol(format!(
                    "Tried to end a {:?} while a {:?} is open",
                    kind, scope.kind
                )))
            }
            None => {
                return Err(Error::protocol(format!(
                    "Tried to end a {:?} with nothing open",
                    kind
                )))
            }
        };
        if let Some(pending) = &self.pending {
            return Err(Error::protocol(format!(
                "Field name {:?} has no value",
                pending
            )));
        }
        self.sink.put(&[TERMINATOR])?;
        let length = self.close_length(scope.at)?;
        if let Some(code_at) = scope.code_at {
            let total = self.close_length(code_at)?;
            trace!("Closed scope of code at byte {}, total length {}", code_at, total);
        }
        self.scopes.pop();
        trace!("Closed {:?} at byte {}, patched length {}", kind, scope.at, length);
        if self.scopes.is_empty() {
            self.sink.finish()?;
            self.state = State::Finished;
            debug!("Finished top-level document of {} bytes", length);
        }
        Ok(())
    }

    /// Patch the innermost placeholder, which sits at `at`, with everything written since.
    fn close_length(&mut self, at: u64) -> Result<usize> {
        let length = (self.sink.position() - at) as usize;
        let max = self.config.max_document_size.min(i32::MAX as usize);
        if length > max {
            return Err(Error::LengthTooLong {
                max,
                actual: length,
            });
        }
        self.sink.patch_length(at, length as i32)?;
        Ok(length)
    }

    pub fn write_f64(&mut self, v: f64) -> Result<()> {
        self.write_element(ElementType::Double, |buf| {
            buf.extend_from_slice(&v.to_le_bytes());
            Ok(())
        })
    }

    pub fn write_string(&mut self, v: &str) -> Result<()> {
        self.write_element(ElementType::String, |buf| put_string(buf, v))
    }

    pub fn write_bool(&mut self, v: bool) -> Result<()> {
        self.write_element(ElementType::Boolean, |buf| {
            buf.push(v as u8);
            Ok(())
        })
    }

    pub fn write_datetime(&mut self, v: DateTime) -> Result<()> {
        self.write_element(ElementType::DateTime, |buf| {
            buf.extend_from_slice(&v.timestamp_millis().to_le_bytes());
            Ok(())
        })
    }

    pub fn write_null(&mut self) -> Result<()> {
        self.write_element(ElementType::Null, |_| Ok(()))
    }

    pub fn write_i32(&mut self, v: i32) -> Result<()> {
        self.write_element(ElementType::Int32, |buf| {
            buf.extend_from_slice(&v.to_le_bytes());
            Ok(())
        })
    }

    pub fn write_i64(&mut self, v: i64) -> Result<()> {
        self.write_element(ElementType::Int64, |buf| {
            buf.extend_from_slice(&v.to_le_bytes());
            Ok(())
        })
    }

    pub fn write_object_id(&mut self, v: &ObjectId) -> Result<()> {
        self.write_element(ElementType::ObjectId, |buf| {
            buf.extend_from_slice(v.as_bytes());
            Ok(())
        })
    }

    /// Write a regex. The options must be drawn from `i l m s u x`; they are written sorted.
    pub fn write_regex(&mut self, pattern: &str, options: &str) -> Result<()> {
        self.check_usable()?;
        let result = Regex::new(pattern, options);
        let regex = self.guard(result)?;
        self.write_element(ElementType::Regex, |buf| regex.encode_vec(buf))
    }

    pub fn write_timestamp(&mut self, seconds: u32, increment: u32) -> Result<()> {
        self.write_element(ElementType::Timestamp, |buf| {
            Timestamp::new(seconds, increment).encode_vec(buf);
            Ok(())
        })
    }

    pub fn write_symbol(&mut self, v: &str) -> Result<()> {
        self.write_element(ElementType::Symbol, |buf| put_string(buf, v))
    }

    /// Write binary data. Subtype 0x02 gets the extra inner length that subtype carries.
    pub fn write_binary(&mut self, subtype: u8, bytes: &[u8]) -> Result<()> {
        self.write_element(ElementType::Binary, |buf| {
            let inner = if subtype == Binary::BINARY_OLD { 4 } else { 0 };
            buf.extend_from_slice(&checked_len(bytes.len() + inner)?.to_le_bytes());
            buf.push(subtype);
            if inner != 0 {
                buf.extend_from_slice(&checked_len(bytes.len())?.to_le_bytes());
            }
            buf.extend_from_slice(bytes);
            Ok(())
        })
    }

    pub fn write_javascript(&mut self, code: &str) -> Result<()> {
        self.write_element(ElementType::JavaScript, |buf| put_string(buf, code))
    }

    /// Write code with its scope. `scope` must be one complete, well-formed encoded Document,
    /// and it must fit in the depth left below the current scope.
    pub fn write_javascript_with_scope(&mut self, code: &str, scope: &[u8]) -> Result<()> {
        self.check_usable()?;
        let left = self.config.max_depth.saturating_sub(self.scopes.depth());
        let config = self.read_config().max_depth(left);
        let result = Document::from_slice_with_config(scope, config).map(|_| ());
        self.guard(result)?;
        self.write_element(ElementType::JavaScriptWithScope, |buf| {
            let total = checked_len(4 + 4 + code.len() + 1 + scope.len())?;
            buf.extend_from_slice(&total.to_le_bytes());
            put_string(buf, code)?;
            buf.extend_from_slice(scope);
            Ok(())
        })
    }

    /// Write code with a scope held as a [`Document`], streaming the scope like any other.
    pub fn write_code_with_scope(&mut self, v: &CodeWithScope) -> Result<()> {
        self.write_start_javascript_with_scope(&v.code)?;
        self.write_nested(vec![Step::Document(v.scope.entries.iter())])
    }

    pub fn write_min_key(&mut self) -> Result<()> {
        self.write_element(ElementType::MinKey, |_| Ok(()))
    }

    pub fn write_max_key(&mut self) -> Result<()> {
        self.write_element(ElementType::MaxKey, |_| Ok(()))
    }

    /// Write any extended value.
    pub fn write_embedded(&mut self, v: &Embedded) -> Result<()> {
        match v {
            Embedded::JavaScriptWithScope(v) => self.write_code_with_scope(v),
            v => self.write_element(v.element_type(), |buf| v.encode(buf)),
        }
    }

    /// Write an extended value from its raw wire payload. The payload is checked by decoding it
    /// first, under the depth left below the current scope, so nothing malformed reaches the
    /// sink. A Regex is written again from its decoded form, which refuses options outside
    /// `i l m s u x` and puts the rest in canonical order.
    pub fn write_raw_embedded(&mut self, ty: ElementType, payload: &[u8]) -> Result<()> {
        self.check_usable()?;
        let config = self.read_config();
        let result = Embedded::decode_with(ty, payload, &config, self.scopes.depth());
        let decoded = self.guard(result)?;
        if let Embedded::Regex(regex) = &decoded {
            return self.write_element(ty, |buf| regex.encode_vec(buf));
        }
        self.write_element(ty, |buf| {
            buf.extend_from_slice(payload);
            Ok(())
        })
    }

    /// Write a whole value tree. Nesting is walked with an explicit stack, not recursion.
    pub fn write_value(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Document(doc) => self.write_document(doc),
            Value::Array(arr) => {
                self.write_start_array()?;
                self.write_nested(vec![Step::Array(arr.iter())])
            }
            Value::Double(v) => self.write_f64(*v),
            Value::String(v) => self.write_string(v),
            Value::Binary(v) => self.write_binary(v.subtype, &v.bytes),
            Value::ObjectId(v) => self.write_object_id(v),
            Value::Boolean(v) => self.write_bool(*v),
            Value::DateTime(v) => self.write_datetime(*v),
            Value::Null => self.write_null(),
            Value::Regex(v) => self.write_element(ElementType::Regex, |buf| v.encode_vec(buf)),
            Value::JavaScript(v) => self.write_javascript(v),
            Value::JavaScriptWithScope(v) => self.write_code_with_scope(v),
            Value::Symbol(v) => self.write_symbol(v),
            Value::Int32(v) => self.write_i32(*v),
            Value::Timestamp(v) => self.write_timestamp(v.time, v.increment),
            Value::Int64(v) => self.write_i64(*v),
            Value::MinKey => self.write_min_key(),
            Value::MaxKey => self.write_max_key(),
        }
    }

    /// Write a Document, either as the top-level document or as the value of a pending field.
    pub fn write_document(&mut self, doc: &Document) -> Result<()> {
        self.write_start_object()?;
        self.write_nested(vec![Step::Document(doc.entries.iter())])
    }

    fn write_nested(&mut self, mut stack: Vec<Step<'_>>) -> Result<()> {
        while let Some(step) = stack.last_mut() {
            let next = match step {
                Step::Document(iter) => match iter.next() {
                    Some((name, value)) => {
                        self.write_field_name(name)?;
                        value
                    }
                    None => {
                        stack.pop();
                        self.write_end_object()?;
                        continue;
                    }
                },
                Step::Array(iter) => match iter.next() {
                    Some(value) => value,
                    None => {
                        stack.pop();
                        self.write_end_array()?;
                        continue;
                    }
                },
            };
            match next {
                Value::Document(doc) => {
                    self.write_start_object()?;
                    stack.push(Step::Document(doc.entries.iter()));
                }
                Value::Array(arr) => {
                    self.write_start_array()?;
                    stack.push(Step::Array(arr.iter()));
                }
                Value::JavaScriptWithScope(v) => {
                    self.write_start_javascript_with_scope(&v.code)?;
                    stack.push(Step::Document(v.scope.entries.iter()));
                }
                scalar => self.write_value(scalar)?,
            }
        }
        Ok(())
    }
}

enum Step<'a> {
    Document(std::slice::Iter<'a, (String, Value)>),
    Array(std::slice::Iter<'a, Value>),
}
