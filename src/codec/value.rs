//! # Values
//!
//! A [`Value`] is a key with one or more string payloads and an optional
//! trailing comment. Single-payload values serialize in the scalar form
//! `key: "text"`, multi-payload values in the array form
//! `key ["one", "two"]`. Payload text is escaped on write and unescaped on
//! parse; comments are carried verbatim.

use std::fmt;

use crate::codec::scan::escape;

/// One key/payload entry of a [`Field`](crate::codec::Field).
///
/// Holds at least one payload string. Whether a value is "scalar" or "array"
/// is decided by the payload count alone, not by how it was constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    key: String,
    values: Vec<String>,
    comment: Option<String>,
}

impl Value {
    /// Creates a scalar value.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            values: vec![value.into()],
            comment: None,
        }
    }

    /// Creates a value from a sequence of payloads. An empty sequence is
    /// replaced by the single payload `"null"` so the at-least-one invariant
    /// holds for every constructed value.
    pub fn array<I, S>(key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut values: Vec<String> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            values.push("null".to_string());
        }
        Self {
            key: key.into(),
            values,
            comment: None,
        }
    }

    /// Attaches a trailing comment. Scalar comments conventionally begin with
    /// `#`; array comments are reproduced byte-for-byte on write, including
    /// any leading whitespace they were parsed with.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The first (for scalars: the only) payload.
    pub fn value(&self) -> &str {
        &self.values[0]
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// True when this value carries more than one payload and therefore
    /// serializes in the array form.
    pub fn is_array(&self) -> bool {
        self.values.len() > 1
    }
}

/// Wire form of the value, exactly as it appears inside a line.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_array() {
            write!(f, "{}: \"{}\"", self.key, escape(self.value()))?;
            if let Some(comment) = &self.comment {
                write!(f, " {comment}")?;
            }
            return Ok(());
        }

        write!(f, "{} [", self.key)?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "\"{}\"", escape(v))?;
        }
        f.write_str("]")?;
        if let Some(comment) = &self.comment {
            f.write_str(comment)?;
        }
        Ok(())
    }
}
