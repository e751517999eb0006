//! # Wire Codec
//!
//! The structured text format every packet travels in: named fields holding
//! keyed values, rendered either as multi-line blocks or as single-line
//! inline records. Parsing is tolerant by contract: malformed records are
//! skipped, never surfaced as errors. Writing is lossless for everything
//! the parser accepts.
//!
//! ## Components
//! - **`scan`**: unescaped-delimiter search and the escape/unescape rules
//! - **`value`**: the key/payload/comment unit of a field
//! - **`field`**: the field tree and both serialized forms
//! - **`reader`**: the tolerant document parser
//!
//! The codec is pure: it consumes and produces strings, nothing else. All
//! transport concerns (record framing, delivery) live in
//! [`crate::transport`].

pub mod field;
pub mod reader;
pub mod scan;
pub mod value;

pub use field::Field;
pub use reader::Reader;
pub use scan::{escape, unescape};
pub use value::Value;
