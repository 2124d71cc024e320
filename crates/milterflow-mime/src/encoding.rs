//! Header encoding utilities.
//!
//! RFC 2047 B encoded words and header folding for values sent back to
//! the MTA.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Maximum header line length before folding.
pub const MAX_LINE_LENGTH: usize = 78;

/// Raw bytes per encoded word, keeps each word under 75 characters.
const WORD_CHUNK: usize = 45;

/// Encodes data as Base64.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Returns true if `text` cannot be sent as a raw header value.
#[must_use]
pub fn needs_encoding(text: &str) -> bool {
    text.contains("=?")
        || text
            .chars()
            .any(|c| !c.is_ascii() || (c.is_ascii_control() && c != '\t'))
}

/// Encodes a header value using RFC 2047 B encoding if needed.
///
/// Long values are split into several encoded words on character
/// boundaries, separated by a space.
#[must_use]
pub fn encode_rfc2047(text: &str, charset: &str) -> String {
    if !needs_encoding(text) {
        return text.to_string();
    }

    let mut words = Vec::new();
    let mut start = 0;
    let mut end = 0;
    for (idx, ch) in text.char_indices() {
        let next = idx + ch.len_utf8();
        if next - start > WORD_CHUNK && end > start {
            words.push(&text[start..end]);
            start = end;
        }
        end = next;
    }
    if end > start {
        words.push(&text[start..end]);
    }

    words
        .into_iter()
        .map(|chunk| format!("=?{charset}?B?{}?=", encode_base64(chunk.as_bytes())))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Folds a header value so lines stay under [`MAX_LINE_LENGTH`], counting
/// `name: ` on the first line.
///
/// A line break is inserted before a run of blanks and the blanks are
/// kept, so removing the `\n`s gives back the original value. Words
/// longer than a line are left intact.
#[must_use]
pub fn fold_header(name: &str, value: &str) -> String {
    let is_blank = |c: char| c == ' ' || c == '\t';
    let mut out = String::with_capacity(value.len() + 8);
    let mut line_len = name.len() + 2;
    let mut rest = value;

    while !rest.is_empty() {
        let word_start = rest.find(|c: char| !is_blank(c)).unwrap_or(rest.len());
        let word_end = rest[word_start..]
            .find(is_blank)
            .map_or(rest.len(), |i| word_start + i);
        let (blanks, word) = (&rest[..word_start], &rest[word_start..word_end]);

        if !out.is_empty()
            && !blanks.is_empty()
            && !word.is_empty()
            && line_len + word_end > MAX_LINE_LENGTH
        {
            out.push('\n');
            line_len = 0;
        }
        out.push_str(&rest[..word_end]);
        line_len += word_end;
        rest = &rest[word_end..];
    }

    out
}

/// Encodes (RFC 2047, utf-8) and folds a header value.
#[must_use]
pub fn encode_header_value(name: &str, value: &str) -> String {
    fold_header(name, &encode_rfc2047(value, "utf-8"))
}
