//! # Fields
//!
//! A [`Field`] is the structural unit of the wire format: a named, ordered
//! container of [`Value`]s and nested child fields. It serializes in one of
//! two surface forms:
//!
//! - **block**: header line, `{` line, tab-indented value lines and nested
//!   fields, `}` line. Records are separated by `\r`.
//! - **inline**: everything on one line,
//!   `Field: <name> {(<value>), (<value>)}`. Children are never emitted for
//!   inline fields. All protocol packets use this form.
//!
//! Lookup methods return the **first** entry with a matching key. Duplicate
//! keys may be stored and are written out, but only the first one is ever
//! retrievable; this mirrors the wire format's documented behavior.

use std::fmt;

use crate::codec::value::Value;

/// Named container of values and nested fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    name: String,
    inline: bool,
    values: Vec<Value>,
    children: Vec<Field>,
}

impl Field {
    /// Creates an empty block-form field.
    ///
    /// The name `"{"` is normalized to the empty string; it can only arise
    /// from a malformed document in which a brace line was taken for a field
    /// header, and must not round-trip as a literal brace.
    pub fn block(name: impl Into<String>) -> Self {
        Self::with_form(name, false)
    }

    /// Creates an empty inline-form field.
    pub fn inline(name: impl Into<String>) -> Self {
        Self::with_form(name, true)
    }

    fn with_form(name: impl Into<String>, inline: bool) -> Self {
        let mut name = name.into();
        if name == "{" {
            name.clear();
        }
        Self {
            name,
            inline,
            values: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_inline(&self) -> bool {
        self.inline
    }

    /// Appends a scalar value, returning `self` for chaining.
    pub fn put(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_value(Value::new(key, value));
        self
    }

    /// Appends an array value, returning `self` for chaining.
    pub fn put_array<I, S>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_value(Value::array(key, values));
        self
    }

    /// Appends a fully constructed value, returning `self` for chaining.
    pub fn put_value(mut self, value: Value) -> Self {
        self.add_value(value);
        self
    }

    /// Appends a child field, returning `self` for chaining.
    pub fn put_child(mut self, child: Field) -> Self {
        self.add_child(child);
        self
    }

    /// Appends a value. Never replaces: a duplicate key is stored after the
    /// existing one and stays shadowed for lookup.
    pub fn add_value(&mut self, value: Value) {
        self.values.push(value);
    }

    /// Appends a child field.
    pub fn add_child(&mut self, child: Field) {
        self.children.push(child);
    }

    /// First payload of the first value with this key. Case sensitive.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.entry(key).map(Value::value)
    }

    /// All payloads of the first value with this key. Case sensitive.
    pub fn values(&self, key: &str) -> Option<&[String]> {
        self.entry(key).map(Value::values)
    }

    /// First value entry with this key. Case sensitive.
    pub fn entry(&self, key: &str) -> Option<&Value> {
        self.values.iter().find(|v| v.key() == key)
    }

    /// First child field with this name. Case sensitive.
    pub fn child(&self, name: &str) -> Option<&Field> {
        self.children.iter().find(|f| f.name() == name)
    }

    pub fn entries(&self) -> &[Value] {
        &self.values
    }

    pub fn children(&self) -> &[Field] {
        &self.children
    }

    /// Serializes this field in its surface form, ready for the wire.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        if self.inline {
            self.write_inline(&mut out);
        } else {
            self.write_block(0, &mut out);
        }
        out
    }

    fn write_inline(&self, out: &mut String) {
        out.push_str("Field: ");
        out.push_str(&self.name);
        out.push_str(" {");
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push('(');
            out.push_str(&value.to_string());
            out.push(')');
        }
        out.push('}');
    }

    // The depth-0 asymmetry (no leading record separator, no trailing one
    // after the final brace) is part of the grammar and load-bearing for
    // round-trips; nested fields each start with their own `\r`.
    fn write_block(&self, depth: usize, out: &mut String) {
        let tab = "\t".repeat(depth);
        if depth != 0 {
            out.push('\r');
        }
        out.push_str(&tab);
        out.push_str("Field: ");
        out.push_str(&self.name);
        out.push('\r');
        out.push_str(&tab);
        out.push_str("{\r");

        for (i, value) in self.values.iter().enumerate() {
            out.push_str(&tab);
            out.push('\t');
            out.push_str(&value.to_string());
            if i != self.values.len() - 1 {
                out.push('\r');
            }
        }

        // Children always render in block form; the inline form only exists
        // at the top level of a document.
        for child in &self.children {
            child.write_block(depth + 1, out);
        }

        if depth != 0 {
            out.push_str(&tab);
            out.push('\r');
            out.push_str(&tab);
            out.push_str("}\r");
        } else {
            out.push('\r');
            out.push_str(&tab);
            out.push('}');
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_form_at_depth_zero() {
        let field = Field::block("Settings")
            .put("address", "127.0.0.1")
            .put("port", "1887");
        assert_eq!(
            field.encode(),
            "Field: Settings\r{\r\taddress: \"127.0.0.1\"\r\tport: \"1887\"\r}"
        );
    }

    #[test]
    fn nested_child_carries_leading_separator_and_indent() {
        let field = Field::block("A")
            .put("key1", "v1")
            .put("key2", "v2")
            .put_child(Field::block("B").put("w", "w1"));
        assert_eq!(
            field.encode(),
            "Field: A\r{\r\tkey1: \"v1\"\r\tkey2: \"v2\"\r\tField: B\r\t{\r\t\tw: \"w1\"\t\r\t}\r\r}"
        );
    }

    #[test]
    fn inline_form_joins_values_with_comma_space() {
        let field = Field::inline("CryptoHandshake")
            .put("rsa", "abc")
            .put("stage", "1");
        assert_eq!(
            field.encode(),
            "Field: CryptoHandshake {(rsa: \"abc\"), (stage: \"1\")}"
        );
    }

    #[test]
    fn inline_form_with_no_values() {
        assert_eq!(Field::inline("Empty").encode(), "Field: Empty {}");
    }

    #[test]
    fn inline_form_never_emits_children() {
        let field = Field::inline("X")
            .put("k", "v")
            .put_child(Field::block("Hidden").put("a", "b"));
        assert_eq!(field.encode(), "Field: X {(k: \"v\")}");
    }

    #[test]
    fn brace_name_is_normalized_to_empty() {
        assert_eq!(Field::block("{").name(), "");
        assert_eq!(Field::inline("{").name(), "");
    }

    #[test]
    fn lookup_is_first_match_and_case_sensitive() {
        let field = Field::inline("X")
            .put("key", "first")
            .put("key", "second")
            .put("Key", "cased");
        assert_eq!(field.value("key"), Some("first"));
        assert_eq!(field.value("Key"), Some("cased"));
        assert_eq!(field.value("missing"), None);
    }

    #[test]
    fn array_lookup_returns_all_payloads() {
        let field = Field::inline("X").put_array("sender", ["10.0.0.1", "40001"]);
        assert_eq!(
            field.values("sender").unwrap(),
            ["10.0.0.1".to_string(), "40001".to_string()]
        );
        assert_eq!(field.value("sender"), Some("10.0.0.1"));
    }
}
