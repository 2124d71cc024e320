//! Message representation: header block plus raw body.

use crate::error::Result;
use crate::header::Headers;
use std::fmt;

/// Returns the offset of the body, right after the first blank line.
///
/// Both `\r\n\r\n` and `\n\n` separators are recognized, whichever comes
/// first. Returns `None` for a message without a body separator.
#[must_use]
pub fn body_offset(raw: &[u8]) -> Option<usize> {
    let crlf = find(raw, b"\r\n\r\n").map(|pos| (pos, pos + 4));
    let lf = find(raw, b"\n\n").map(|pos| (pos, pos + 2));
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a.1 } else { b.1 }),
        (Some(a), None) => Some(a.1),
        (None, Some(b)) => Some(b.1),
        (None, None) => None,
    }
}

/// Returns everything after the first blank line, empty if there is none.
#[must_use]
pub fn split_body(raw: &[u8]) -> &[u8] {
    body_offset(raw).map_or(&[][..], |offset| &raw[offset..])
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Parsed email message.
///
/// Only the header block is parsed; the body is kept as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message headers.
    pub headers: Headers,
    /// Raw body.
    pub body: Vec<u8>,
    crlf: bool,
}

impl Message {
    /// Creates a message with CRLF line endings.
    #[must_use]
    pub const fn new(headers: Headers, body: Vec<u8>) -> Self {
        Self {
            headers,
            body,
            crlf: true,
        }
    }

    /// Parses raw message bytes.
    ///
    /// Header bytes that are not valid UTF-8 are replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if the header block is malformed.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let (head, body) = match body_offset(raw) {
            Some(offset) => (&raw[..offset], raw[offset..].to_vec()),
            None => (raw, Vec::new()),
        };
        let crlf = find(raw, b"\r\n").is_some();
        let headers = Headers::parse(&String::from_utf8_lossy(head))?;
        Ok(Self {
            headers,
            body,
            crlf,
        })
    }

    /// Line ending used when serializing.
    #[must_use]
    pub const fn line_ending(&self) -> &'static str {
        if self.crlf { "\r\n" } else { "\n" }
    }

    /// Serializes the message.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let eol = self.line_ending();
        let mut out = Vec::with_capacity(self.body.len() + 64 * self.headers.len());
        self.headers.write_to(&mut out, eol);
        out.extend_from_slice(eol.as_bytes());
        out.extend_from_slice(&self.body);
        out
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.to_bytes()))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    const RAW: &[u8] = b"From: sender@example.com\r\nTo: rcpt@example.com\r\nSubject: Test\r\n\r\nHello, World!\r\n\r\nBye\r\n";

    #[test]
    fn test_body_offset() {
        assert_eq!(split_body(RAW), b"Hello, World!\r\n\r\nBye\r\n");
        assert_eq!(split_body(b"A: b\n\nbody"), b"body");
        assert_eq!(split_body(b"A: b\r\n"), b"");
    }

    #[test]
    fn test_body_offset_prefers_first_separator() {
        assert_eq!(split_body(b"A: b\n\nx\r\n\r\ny"), b"x\r\n\r\ny");
    }

    #[test]
    fn test_parse() {
        let message = Message::parse(RAW).unwrap();
        assert_eq!(message.headers.get("from"), Some("sender@example.com"));
        assert_eq!(message.headers.get("to"), Some("rcpt@example.com"));
        assert_eq!(message.headers.get("subject"), Some("Test"));
        assert_eq!(message.body, b"Hello, World!\r\n\r\nBye\r\n");
        assert_eq!(message.line_ending(), "\r\n");
    }

    #[test]
    fn test_to_bytes_preserves_message() {
        let message = Message::parse(RAW).unwrap();
        assert_eq!(message.to_bytes(), RAW);
    }

    #[test]
    fn test_modified_header_regenerates() {
        let mut message = Message::parse(b"Subject: a\n\nbody\n").unwrap();
        message.headers.prepend("X-Flag", "yes");
        assert_eq!(message.to_bytes(), b"X-Flag: yes\nSubject: a\n\nbody\n");
        assert_eq!(split_body(&message.to_bytes()), b"body\n");
    }

    #[test]
    fn test_headers_only() {
        let message = Message::parse(b"Subject: none\r\n").unwrap();
        assert!(message.body.is_empty());
        assert_eq!(message.headers.get("subject"), Some("none"));
    }
}
