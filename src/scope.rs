//! Decoding of JavaScriptWithScope values.
//!
//! A scope is a whole Document inside an element payload, and it may hold more scopes of its
//! own. They are walked with an explicit stack of readers, each reading a slice of the outermost
//! payload, so nesting costs heap rather than call stack. Every scope runs under the limits of
//! the reader that found it, with the depth already used by its enclosing frames taken off.

use log::trace;

use crate::{
    config::ReaderConfig,
    error::{Error, Result},
    extended::{take_i32, take_string, CodeWithScope},
    marker::ElementType,
    reader::{Feed, Reader, Token, Tree},
    value::Value,
};

/// One scope being read.
struct Level<'p> {
    reader: Reader<&'p [u8]>,
    /// Bytes of the scope document.
    scope: &'p [u8],
    code: String,
    /// Field name the value sits under in the enclosing scope.
    name: String,
    tree: Tree,
}

impl<'p> Level<'p> {
    fn open(payload: &'p [u8], name: String, config: ReaderConfig) -> Result<Self> {
        let (code, scope) = split(payload)?;
        let mut reader = Reader::with_config(scope, config);
        if reader.next_token()? != Token::StartObject {
            return Err(Error::BadEncode(
                "JavaScriptWithScope is missing its scope document".into(),
            ));
        }
        Ok(Level {
            reader,
            scope,
            code,
            name,
            tree: Tree::default(),
        })
    }

    /// Payload of the extended value the reader is on, as a slice of the outermost payload.
    fn current_payload(&self) -> &'p [u8] {
        let scope = self.scope;
        let end = scope.len() - self.reader.remaining().len();
        let len = self.reader.raw_payload().map_or(0, <[u8]>::len);
        &scope[end - len..end]
    }
}

/// Check the declared total and split the payload into the code and the scope bytes.
fn split(payload: &[u8]) -> Result<(String, &[u8])> {
    let mut buf = payload;
    let total = take_i32(&mut buf, "JavaScriptWithScope length")?;
    if total < 0 || total as usize != payload.len() {
        return Err(Error::BadEncode(format!(
            "JavaScriptWithScope declared {} bytes, payload has {}",
            total,
            payload.len()
        )));
    }
    let code = take_string(&mut buf, "JavaScriptWithScope code")?;
    Ok((code, buf))
}

/// Limits for a scope found while `depth` frames were open under `config`.
fn nested_config(config: &ReaderConfig, depth: usize) -> ReaderConfig {
    config
        .clone()
        .max_depth(config.max_depth.saturating_sub(depth))
}

/// Decode a JavaScriptWithScope payload found while `depth` frames were open.
pub(crate) fn read_code_with_scope(
    payload: &[u8],
    config: &ReaderConfig,
    depth: usize,
) -> Result<CodeWithScope> {
    let mut level = Level::open(payload, String::new(), nested_config(config, depth))?;
    let mut parents: Vec<Level> = Vec::new();
    loop {
        let done = match level.tree.feed(&level.reader)? {
            Feed::Next => None,
            Feed::Done(value) => Some(value),
            Feed::Leaf
                if level.reader.current_token()
                    == Token::Embedded(ElementType::JavaScriptWithScope) =>
            {
                let payload = level.current_payload();
                let name = level.reader.current_field_name().unwrap_or_default().to_owned();
                let config = nested_config(level.reader.config(), level.reader.depth());
                let inner = Level::open(payload, name, config)?;
                parents.push(std::mem::replace(&mut level, inner));
                trace!("Entered a nested scope (depth {})", parents.len());
                continue;
            }
            Feed::Leaf => {
                let value = level.reader.current_value()?;
                let name = level.reader.current_field_name().unwrap_or_default().to_owned();
                level.tree.attach(name, value)
            }
        };

        if let Some(value) = done {
            let scope = match value {
                Value::Document(doc) => doc,
                _ => return Err(Error::protocol("Scope didn't read as a Document")),
            };
            let left = level.reader.remaining().len();
            if left != 0 {
                return Err(Error::BadEncode(format!(
                    "JavaScriptWithScope has {} bytes after its scope document",
                    left
                )));
            }
            let parent = match parents.pop() {
                Some(parent) => parent,
                None => {
                    return Ok(CodeWithScope {
                        code: level.code,
                        scope,
                    })
                }
            };
            let child = std::mem::replace(&mut level, parent);
            let value = Value::JavaScriptWithScope(CodeWithScope {
                code: child.code,
                scope,
            });
            if level.tree.attach(child.name, value).is_some() {
                return Err(Error::protocol("Scope value ended up outside any Document"));
            }
        }
        level.reader.next_token()?;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{doc, Document, Embedded, UnknownTypes, Writer, WriterConfig};

    // {"": CodeWithScope("", scope)}
    fn with_scope(scope: &[u8]) -> Vec<u8> {
        let total = 4 + 5 + scope.len();
        let mut body = vec![0x0f, 0];
        body.extend_from_slice(&(total as i32).to_le_bytes());
        body.extend_from_slice(&[1, 0, 0, 0, 0]);
        body.extend_from_slice(scope);
        body.push(0);
        let mut out = ((body.len() + 4) as i32).to_le_bytes().to_vec();
        out.extend_from_slice(&body);
        out
    }

    fn nested_scopes(levels: usize) -> Vec<u8> {
        let mut doc = vec![5, 0, 0, 0, 0];
        for _ in 0..levels {
            doc = with_scope(&doc);
        }
        doc
    }

    fn nested_value(levels: usize) -> Document {
        let mut doc = Document::new();
        for _ in 0..levels {
            doc = doc! { "" => CodeWithScope::new("", doc) };
        }
        doc
    }

    fn read(bytes: &[u8], max_depth: usize) -> Result<Document> {
        Document::from_slice_with_config(bytes, ReaderConfig::new().max_depth(max_depth))
    }

    #[test]
    fn scopes_count_against_depth() {
        // Ten scopes plus the top-level document
        let bytes = nested_scopes(10);
        assert!(matches!(read(&bytes, 3), Err(Error::ParseLimit(_))));
        assert!(matches!(read(&bytes, 10), Err(Error::ParseLimit(_))));
        assert_eq!(read(&bytes, 11).unwrap(), nested_value(10));
    }

    #[test]
    fn scopes_in_reader() {
        let bytes = nested_scopes(10);
        let mut reader = Reader::with_config(&bytes[..], ReaderConfig::new().max_depth(3));
        assert_eq!(reader.next_token().unwrap(), Token::StartObject);
        assert_eq!(reader.next_token().unwrap(), Token::FieldName);
        assert_eq!(
            reader.next_token().unwrap(),
            Token::Embedded(ElementType::JavaScriptWithScope)
        );
        assert!(matches!(
            reader.get_embedded_object(),
            Err(Error::ParseLimit(_))
        ));
        let mut reader = Reader::with_config(&bytes[..], ReaderConfig::new().max_depth(3));
        assert!(matches!(reader.read_document(), Err(Error::ParseLimit(_))));
    }

    #[test]
    fn deep_input_hits_limit() {
        let bytes = nested_scopes(2500);
        assert!(matches!(
            Document::from_slice(&bytes),
            Err(Error::ParseLimit(_))
        ));
    }

    #[test]
    fn standalone_decode() {
        let bytes = nested_scopes(4);
        // Payload of the outermost scope element starts after length, tag, and empty name
        let payload = &bytes[6..bytes.len() - 1];
        let config = ReaderConfig::new().max_depth(4);
        let ty = ElementType::JavaScriptWithScope;
        assert!(Embedded::decode_with(ty, payload, &config, 1).is_err());
        match Embedded::decode_with(ty, payload, &config, 0).unwrap() {
            Embedded::JavaScriptWithScope(cws) => assert_eq!(cws.scope, nested_value(3)),
            other => panic!("expected JavaScriptWithScope, got {}", other),
        }
    }

    #[test]
    fn limits_apply_inside_scopes() {
        // {a: 1, b: <0x42>...}
        let scope = [
            16, 0, 0, 0, 0x10, b'a', 0, 1, 0, 0, 0, 0x42, b'b', 0, 9, 0,
        ];
        let bytes = with_scope(&scope);
        assert!(matches!(
            Document::from_slice(&bytes),
            Err(Error::UnsupportedType { tag: 0x42, .. })
        ));
        let config = ReaderConfig::new().unknown_types(UnknownTypes::Skip);
        let doc = Document::from_slice_with_config(&bytes, config).unwrap();
        assert_eq!(doc, doc! { "" => CodeWithScope::new("", doc! { "a" => 1i32 }) });
    }

    #[test]
    fn scope_with_trailing_bytes() {
        let mut scope = vec![5, 0, 0, 0, 0];
        scope.push(7);
        assert!(Document::from_slice(&with_scope(&scope)).is_err());
    }

    #[test]
    fn values_in_scopes() {
        let inner = doc! {
            "n" => 1i32,
            "list" => vec![Value::from(CodeWithScope::new("f", doc! { "x" => "y" }))],
        };
        let doc = doc! { "c" => CodeWithScope::new("g", inner), "after" => true };
        let bytes = doc.to_vec().unwrap();
        assert_eq!(Document::from_slice(&bytes).unwrap(), doc);
    }

    #[test]
    fn writer_matches_reader() {
        let value = nested_value(10);
        let mut w = Writer::with_config(Vec::new(), WriterConfig::new().max_depth(11));
        w.write_document(&value).unwrap();
        assert_eq!(w.finish().unwrap(), nested_scopes(10));

        let mut w = Writer::with_config(Vec::new(), WriterConfig::new().max_depth(10));
        assert!(matches!(w.write_document(&value), Err(Error::ParseLimit(_))));
    }
}
