//! # Delimiter Scanning
//!
//! Low-level scanning primitives shared by the parser and the escape rules.
//!
//! The wire grammar marks a delimiter as literal content by prefixing it with
//! a backslash. Every structural decision the parser makes (brace detection,
//! quote pairing, bracket pairing, comment markers) is phrased as "the n-th
//! *unescaped* occurrence of a delimiter", which is exactly what
//! [`find_unescaped`] computes. All delimiters are ASCII, so scanning works on
//! bytes and the returned indices are valid `str` boundaries.

/// Characters that are stored backslash-escaped inside value content.
/// The backslash itself is never escaped.
pub const SPECIAL_CHARACTERS: [char; 8] = ['{', '}', '[', ']', '(', ')', '"', '\''];

/// Returns the byte index of the `(skip + 1)`-th occurrence of `target` in
/// `s` that is not immediately preceded by a backslash. An occurrence at
/// index 0 has no predecessor and always counts.
pub(crate) fn find_unescaped(s: &str, target: u8, skip: usize) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut seen = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if b == target && (i == 0 || bytes[i - 1] != b'\\') {
            if seen == skip {
                return Some(i);
            }
            seen += 1;
        }
    }
    None
}

/// Like [`find_unescaped`], but the search begins at byte index `start` and
/// an occurrence right at `start` always counts, as if the preceding text
/// were not there. Avoids slicing, so `start` may fall anywhere.
pub(crate) fn find_unescaped_from(s: &str, target: u8, start: usize) -> Option<usize> {
    let bytes = s.as_bytes();
    for i in start..bytes.len() {
        if bytes[i] == target && (i == start || bytes[i - 1] != b'\\') {
            return Some(i);
        }
    }
    None
}

/// Counts occurrences of `target` in `s` that are not backslash-escaped.
pub(crate) fn count_unescaped(s: &str, target: u8) -> usize {
    let bytes = s.as_bytes();
    bytes
        .iter()
        .enumerate()
        .filter(|&(i, &b)| b == target && (i == 0 || bytes[i - 1] != b'\\'))
        .count()
}

/// Inserts an escape marker before every special character in `input`.
///
/// Inverse of [`unescape`]: `unescape(&escape(s)) == s` holds for every `s`,
/// including strings that already contain backslashes.
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if SPECIAL_CHARACTERS.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Removes the escape marker in front of every special character in `input`.
/// A backslash followed by anything else is kept as-is.
pub fn unescape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some(&next) if SPECIAL_CHARACTERS.contains(&next) => {
                    out.push(next);
                    chars.next();
                }
                _ => out.push(c),
            }
        } else {
            out.push(c);
        }
    }
    out
}
