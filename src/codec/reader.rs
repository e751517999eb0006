//! # Document Parsing
//!
//! [`Reader`] turns wire text back into [`Field`] trees. Input is split into
//! records on `\r` (bare `\n` and `\r\n` are accepted too) and each record is
//! classified:
//!
//! - trimmed-empty records and records starting with `#` are skipped
//! - a record with an unescaped `{`, an unescaped `}` and a `:` before the
//!   `{` is an inline field and attaches to the document root, even when a
//!   block is currently open
//! - a record that is exactly `{` opens a block named by the preceding
//!   header record; exactly `}` closes the innermost open block
//! - anything else inside an open block is parsed as a value line
//!
//! The parser is deliberately tolerant: a record that fails to parse is
//! dropped and parsing continues with the next one. No parse error ever
//! escapes this module; a partially populated document is correct output.
//! Blocks left open at end of input are discarded.

use tracing::trace;

use crate::codec::field::Field;
use crate::codec::scan::{count_unescaped, find_unescaped, find_unescaped_from, unescape};
use crate::codec::value::Value;

/// Parsed document: the ordered list of top-level fields.
#[derive(Debug, Clone, Default)]
pub struct Reader {
    fields: Vec<Field>,
}

impl Reader {
    /// Parses a complete document. Never fails; see the module docs for what
    /// happens to malformed records.
    pub fn parse(text: &str) -> Self {
        let mut parser = Parser::default();
        for line in text.split(['\r', '\n']) {
            parser.feed(line);
        }
        Reader {
            fields: parser.fields,
        }
    }

    /// First top-level field with this name. Case sensitive.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn into_fields(self) -> Vec<Field> {
        self.fields
    }
}

#[derive(Default)]
struct Parser {
    fields: Vec<Field>,
    stack: Vec<Field>,
    // header text of the most recent record that was neither consumed as
    // structure nor skipped; names the block a following `{` opens
    prev_line: Option<String>,
}

impl Parser {
    fn feed(&mut self, line: &str) {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return;
        }

        // Inline detection runs first so that an inline record inside an
        // open block is still hoisted to the root.
        if let (Some(open), Some(close)) =
            (find_unescaped(line, b'{', 0), find_unescaped(line, b'}', 0))
        {
            let has_leading_colon =
                find_unescaped(line, b':', 0).is_some_and(|colon| colon < open);
            if close > open && has_leading_colon {
                match parse_inline(line, open) {
                    Some(field) => self.fields.push(field),
                    None => trace!(record = line, "dropped malformed inline record"),
                }
                return;
            }
        }

        if trimmed == "{" {
            if let Some(prev) = &self.prev_line {
                self.stack.push(Field::block(extract_field_name(prev)));
            }
            return;
        }
        if trimmed == "}" {
            if let Some(done) = self.stack.pop() {
                match self.stack.last_mut() {
                    Some(parent) => parent.add_child(done),
                    None => self.fields.push(done),
                }
            }
            return;
        }

        if !self.stack.is_empty() {
            // Header of a nested field: remember the name, the `{` record
            // that follows does the push.
            if let Some(rest) = trimmed.strip_prefix("Field:") {
                let mut chars = rest.chars();
                if chars.next().is_some() {
                    self.prev_line = Some(chars.as_str().to_string());
                }
                return;
            }

            match parse_value(trimmed) {
                Some(value) => {
                    if let Some(top) = self.stack.last_mut() {
                        top.add_value(value);
                    }
                }
                None => trace!(record = line, "dropped malformed value record"),
            }
        }

        self.prev_line = Some(line.to_string());
    }
}

/// Strips a leading `Field:` (any case) from a header, leaving the name.
fn extract_field_name(s: &str) -> &str {
    if s.get(..6).is_some_and(|p| p.eq_ignore_ascii_case("field:")) {
        s[6..].trim()
    } else {
        s
    }
}

/// Parses one inline record. `open` is the byte index of its `{`.
fn parse_inline(line: &str, open: usize) -> Option<Field> {
    let name = extract_field_name(&line[..open]).trim();
    let mut field = Field::inline(name);

    let temp = line.trim();
    let total_values = count_unescaped(temp, b')');
    for i in 0..total_values {
        let start = find_unescaped(temp, b'(', i)?;
        let end = find_unescaped(temp, b')', i)?;
        if end < start + 1 {
            return None;
        }
        field.add_value(parse_value(&temp[start + 1..end])?);
    }
    Some(field)
}

/// Parses one value in either surface form.
///
/// The first space-delimited token decides the form: a trailing `:` means
/// scalar, anything else array. Returns `None` whenever the expected quotes
/// or brackets cannot be paired up.
fn parse_value(s: &str) -> Option<Value> {
    let token = s.split(' ').next().unwrap_or("");

    if let Some(key) = token.strip_suffix(':') {
        // scalar: content between the first quote and the next unescaped one
        let open = s.find('"')?;
        let close = find_unescaped_from(s, b'"', open + 1)?;
        let mut value = Value::new(key, unescape(&s[open + 1..close]));

        // text after the closing quote is a comment, but only when the
        // record contains an unescaped `#` somewhere
        if close + 1 < s.len() && find_unescaped(s, b'#', 0).is_some() {
            value = value.with_comment(s[close + 1..].trim());
        }
        return Some(value);
    }

    // array: bracketed, comma-separated quoted payloads. The closing-bracket
    // search starts one past the first content byte, so `[]` never pairs and
    // the record is dropped.
    let open = find_unescaped(s, b'[', 0)?;
    let close = find_unescaped_from(s, b']', open + 2)?;
    let arr = &s[open + 1..close];

    let payloads = count_unescaped(arr, b'"') / 2;
    if payloads == 0 {
        return None;
    }
    let mut values = Vec::with_capacity(payloads);
    for k in 0..payloads {
        let qo = find_unescaped(arr, b'"', 2 * k)?;
        let qc = find_unescaped(arr, b'"', 2 * k + 1)?;
        values.push(unescape(&arr[qo + 1..qc]));
    }

    let mut value = Value::array(token, values);
    if close + 1 < s.len() {
        // array comments are kept verbatim, leading whitespace included
        value = value.with_comment(&s[close + 1..]);
    }
    Some(value)
}
