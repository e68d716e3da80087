use educe::Educe;
use serde::{Deserialize, Serialize};

use crate::MAX_DEPTH;

/// What the reader does when it meets an element type tag it can't produce a token for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnknownTypes {
    /// Fail with [`Error::UnsupportedType`](crate::Error::UnsupportedType), leaving the reader
    /// positioned before the offending tag.
    #[default]
    Abort,
    /// Skip the offending value and carry on. Legacy types with a known layout skip exactly their
    /// payload. A tag with no layout at all can't be measured, so the rest of its enclosing frame
    /// is dropped.
    Skip,
}

/// Reader settings.
///
/// ```
/// # use bson_stream::*;
/// let config = ReaderConfig::new()
///     .unknown_types(UnknownTypes::Skip)
///     .max_depth(64);
/// assert_eq!(config.max_document_size, i32::MAX as usize);
/// ```
#[derive(Educe, Clone, Debug, Serialize, Deserialize)]
#[educe(PartialEq, Default)]
#[serde(deny_unknown_fields, default)]
pub struct ReaderConfig {
    /// Policy for unknown and legacy element types.
    pub unknown_types: UnknownTypes,
    /// Maximum number of nested Documents and Arrays, counting the top-level document.
    #[educe(Default = MAX_DEPTH)]
    pub max_depth: usize,
    /// Largest declared Document length accepted.
    #[educe(Default(expression = i32::MAX as usize))]
    pub max_document_size: usize,
}

impl ReaderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unknown_types(mut self, unknown_types: UnknownTypes) -> Self {
        self.unknown_types = unknown_types;
        self
    }

    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn max_document_size(mut self, max_document_size: usize) -> Self {
        self.max_document_size = max_document_size;
        self
    }
}

/// Writer settings.
#[derive(Educe, Clone, Debug, Serialize, Deserialize)]
#[educe(PartialEq, Default)]
#[serde(deny_unknown_fields, default)]
pub struct WriterConfig {
    /// Maximum number of open scopes, counting the top-level document.
    #[educe(Default = MAX_DEPTH)]
    pub max_depth: usize,
    /// Largest scope the writer will close. Anything bigger fails with
    /// [`Error::LengthTooLong`](crate::Error::LengthTooLong).
    #[educe(Default(expression = i32::MAX as usize))]
    pub max_document_size: usize,
}

impl WriterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn max_document_size(mut self, max_document_size: usize) -> Self {
        self.max_document_size = max_document_size;
        self
    }
}
