//! bson-stream is a streaming codec for BSON, the length-prefixed binary document format. It
//! never needs a whole document tree in memory to read or write one.
//!
//! The crate is built from a few layers:
//!
//! - A [`Reader`] that pulls one [`Token`] at a time out of any byte [`Source`], checking every
//! 	length prefix and terminator against the frames it sits inside. Whole sub-documents can be
//! 	skipped by their declared length without being tokenized.
//! - A [`Writer`] that takes push-style calls and produces a valid document on any byte
//! 	[`Sink`]. Length prefixes are back-patched once each Document or Array closes, either by
//! 	staging the open scopes ([`Buffered`]) or by seeking back ([`Seeking`]).
//! - The layout table ([`LAYOUT_TABLE`]), which tells both sides how each [`ElementType`]'s
//! 	payload is framed.
//! - Extended values ([`Embedded`]): ObjectId, Binary, DateTime, Regex, Timestamp, JavaScript,
//! 	and the rest, which travel through serde as opaque tagged payloads.
//! - An ordered [`Document`] and [`Value`] model, plus serde support through [`to_vec`] and
//! 	[`from_slice`].
//!
//! ```
//! # use bson_stream::*;
//! # fn main() -> Result<()> {
//! let doc = doc! {
//!     "name" => "widget",
//!     "count" => 3i32,
//!     "tags" => vec![Value::from("a"), Value::from("b")],
//! };
//! let enc = doc.to_vec()?;
//!
//! let mut reader = Reader::new(&enc[..]);
//! assert_eq!(reader.next_token()?, Token::StartObject);
//! assert_eq!(reader.next_token()?, Token::FieldName);
//! assert_eq!(reader.current_field_name(), Some("name"));
//! assert_eq!(reader.next_token()?, Token::Scalar(ElementType::String));
//! assert_eq!(reader.get_text()?, "widget");
//! # Ok(())
//! # }
//! ```

mod binary;
mod config;
mod datetime;
mod depth_tracking;
mod document;
mod error;
mod extended;
mod marker;
mod object_id;
mod pattern;
mod reader;
mod scope;
mod sink;
mod source;
mod timestamp;
mod value;
mod writer;

pub mod de;
pub mod ser;

pub use binary::Binary;
pub use config::{ReaderConfig, UnknownTypes, WriterConfig};
pub use datetime::DateTime;
pub use de::{from_reader, from_slice};
pub use document::{Document, Documents};
pub use error::{Error, Result};
pub use extended::{CodeWithScope, Embedded};
pub use marker::{ElementType, Kind, Layout, Shape, LAYOUT_TABLE};
pub use object_id::ObjectId;
pub use pattern::{Regex, REGEX_OPTIONS};
pub use reader::{Reader, Token};
pub use ser::{to_vec, to_writer};
pub use sink::{Buffered, Seeking, Sink};
pub use source::{Seekable, Source, Streamed};
pub use timestamp::Timestamp;
pub use value::Value;
pub use writer::Writer;

/// Default limit on how deeply Documents and Arrays may nest.
pub const MAX_DEPTH: usize = 2048;
