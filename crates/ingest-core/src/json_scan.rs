// Copyright 2024 RisingWave Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A minimal incremental JSON value scanner.
//!
//! Finds the byte offset just past a complete JSON value without needing
//! the whole document in memory: it only needs enough of the buffer to see
//! one value's matching braces/brackets or one string's closing quote.
//! This backs the Log Record Stream's push parser (spec.md §4.3, §9):
//! records are located and handed off one at a time as bytes arrive from
//! the transport, never by buffering the full `log` array.

pub fn skip_ws(buf: &[u8], mut i: usize) -> usize {
    while i < buf.len() && buf[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

/// Byte offset of `needle` in `buf` starting the search at `from`, or `None`
/// if not yet present (more bytes may still arrive).
pub fn find_substr(buf: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= buf.len() || needle.is_empty() || buf.len() - from < needle.len() {
        return None;
    }
    buf[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

pub fn find_byte(buf: &[u8], from: usize, b: u8) -> Option<usize> {
    buf[from.min(buf.len())..].iter().position(|&x| x == b).map(|p| p + from)
}

fn scan_string(buf: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    let mut escape = false;
    while i < buf.len() {
        let b = buf[i];
        if escape {
            escape = false;
        } else if b == b'\\' {
            escape = true;
        } else if b == b'"' {
            return Some(i + 1);
        }
        i += 1;
    }
    None
}

fn scan_bracketed(buf: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0i32;
    let mut i = start;
    let mut in_string = false;
    let mut escape = false;
    while i < buf.len() {
        let b = buf[i];
        if in_string {
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                in_string = false;
            }
        } else {
            match b {
                b'"' => in_string = true,
                b'{' | b'[' => depth += 1,
                b'}' | b']' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i + 1);
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    None
}

fn scan_literal(buf: &[u8], start: usize, lit: &[u8]) -> Option<usize> {
    if buf.len() < start + lit.len() {
        return None;
    }
    if &buf[start..start + lit.len()] == lit {
        Some(start + lit.len())
    } else {
        None
    }
}

fn scan_number(buf: &[u8], start: usize) -> Option<usize> {
    let mut i = start;
    while i < buf.len() {
        match buf[i] {
            b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E' => i += 1,
            _ => return Some(i),
        }
    }
    None
}

/// Scans a single JSON value starting at `start` (leading whitespace is
/// skipped). Returns the offset just past the value, or `None` if the
/// buffer does not yet contain a complete value.
pub fn scan_value(buf: &[u8], start: usize) -> Option<usize> {
    let i = skip_ws(buf, start);
    if i >= buf.len() {
        return None;
    }
    match buf[i] {
        b'{' | b'[' => scan_bracketed(buf, i),
        b'"' => scan_string(buf, i),
        b't' => scan_literal(buf, i, b"true"),
        b'f' => scan_literal(buf, i, b"false"),
        b'n' => scan_literal(buf, i, b"null"),
        b'-' | b'0'..=b'9' => scan_number(buf, i),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_nested_object() {
        let buf = br#"{"a":{"b":1},"c":2} trailing"#;
        let end = scan_value(buf, 0).unwrap();
        assert_eq!(&buf[..end], br#"{"a":{"b":1},"c":2}"#);
    }

    #[test]
    fn incomplete_object_returns_none() {
        let buf = br#"{"a":{"b":1"#;
        assert_eq!(scan_value(buf, 0), None);
    }

    #[test]
    fn scans_null() {
        let buf = b"null,";
        assert_eq!(scan_value(buf, 0), Some(4));
    }

    #[test]
    fn scans_number_needs_terminator() {
        let buf = b"123";
        assert_eq!(scan_value(buf, 0), None);
        let buf2 = b"123,";
        assert_eq!(scan_value(buf2, 0), Some(3));
    }
}
