use std::fmt;

use serde::{
    de::{Deserialize, Deserializer},
    ser::{Serialize, Serializer},
};

use crate::error::{Error, Result};
use crate::extended::{deserialize_extended, serialize_extended, Embedded};
use crate::marker::ElementType;

/// Option characters the writer accepts, in canonical order.
pub const REGEX_OPTIONS: &str = "ilmsux";

/// A BSON regular expression: pattern and option cstrings.
///
/// The options are always held in canonical form, sorted and without repeats.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Regex {
    pattern: String,
    options: String,
}

fn check_cstring(what: &str, s: &str) -> Result<()> {
    if s.as_bytes().contains(&0) {
        Err(Error::BadEncode(format!("{} contains an embedded NUL", what)))
    } else {
        Ok(())
    }
}

fn check_options(options: &str) -> Result<()> {
    match options.chars().find(|c| !REGEX_OPTIONS.contains(*c)) {
        Some(c) => Err(Error::BadEncode(format!("Unsupported regex option {:?}", c))),
        None => Ok(()),
    }
}

fn canonical_options(options: &str) -> String {
    let mut chars: Vec<char> = options.chars().collect();
    chars.sort_unstable();
    chars.dedup();
    chars.into_iter().collect()
}

impl Regex {
    /// Create a new regex. Fails if either part contains a NUL or an option character isn't one
    /// of `i l m s u x`.
    pub fn new(pattern: impl Into<String>, options: impl AsRef<str>) -> Result<Regex> {
        let pattern = pattern.into();
        let options = options.as_ref();
        check_cstring("Regex pattern", &pattern)?;
        check_options(options)?;
        Ok(Regex {
            pattern,
            options: canonical_options(options),
        })
    }

    /// Build from the two decoded cstrings. Options are canonicalized but not restricted, so that
    /// anything another producer wrote can still be read back. Unsupported options are only
    /// refused when the value is encoded again.
    pub(crate) fn from_wire(pattern: String, options: &str) -> Regex {
        Regex {
            pattern,
            options: canonical_options(options),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn options(&self) -> &str {
        &self.options
    }

    /// Append the pattern and option cstrings. Fails on options outside `i l m s u x`, which a
    /// regex read off the wire may carry.
    pub fn encode_vec(&self, vec: &mut Vec<u8>) -> Result<()> {
        check_cstring("Regex pattern", &self.pattern)?;
        check_options(&self.options)?;
        vec.extend_from_slice(self.pattern.as_bytes());
        vec.push(0);
        vec.extend_from_slice(self.options.as_bytes());
        vec.push(0);
        Ok(())
    }

    /// Compile into a [`regex::Regex`]. The `i`, `m`, `s`, and `x` options map onto the
    /// matching builder flags; `l` and `u` have no effect.
    pub fn compile(&self) -> Result<regex::Regex> {
        let mut builder = regex::RegexBuilder::new(&self.pattern);
        for c in self.options.chars() {
            match c {
                'i' => builder.case_insensitive(true),
                'm' => builder.multi_line(true),
                's' => builder.dot_matches_new_line(true),
                'x' => builder.ignore_whitespace(true),
                _ => &mut builder,
            };
        }
        Ok(builder.build()?)
    }
}

impl fmt::Display for Regex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "/{}/{}", self.pattern, self.options)
    }
}

impl Serialize for Regex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut enc = Vec::with_capacity(self.pattern.len() + self.options.len() + 2);
        self.encode_vec(&mut enc).map_err(serde::ser::Error::custom)?;
        serialize_extended(serializer, ElementType::Regex, &enc)
    }
}

impl<'de> Deserialize<'de> for Regex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match deserialize_extended(deserializer, "Regex")? {
            Embedded::Regex(v) => Ok(v),
            other => Err(serde::de::Error::custom(format!(
                "expected Regex, got {}",
                other.element_type()
            ))),
        }
    }
}
