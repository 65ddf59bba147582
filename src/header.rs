//! Header value decoding
//!
//! Turns raw header values into plain text. Raw 8-bit values that are
//! not UTF-8 are read as Windows-1252; RFC 2047 encoded words
//! (`=?charset?B|Q?text?=`) are decoded by `mailparse`. Decoding never
//! fails: a value `mailparse` cannot handle is kept as literal text.

use encoding_rs::{Encoding, WINDOWS_1252};
use std::borrow::Cow;

/// Decode a raw header value as found on the wire.
#[must_use]
pub fn decode(raw: &[u8]) -> String {
    decode_str(&text(raw))
}

/// Read raw header bytes as text without touching encoded words.
///
/// UTF-8 is tried first; anything else is Windows-1252.
#[must_use]
pub fn text(raw: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(raw) {
        Ok(s) => Cow::Borrowed(s),
        Err(_) => WINDOWS_1252.decode_without_bom_handling(raw).0,
    }
}

/// Decode every encoded word in `value`, unfold it and trim the result.
#[must_use]
pub fn decode_str(value: &str) -> String {
    let unfolded: String = value.chars().filter(|c| !matches!(c, '\r' | '\n')).collect();
    if !unfolded.contains("=?") {
        return unfolded.trim().to_string();
    }

    let line = format!("X: {unfolded}");
    mailparse::parse_header(line.as_bytes())
        .ok()
        .and_then(|(header, _)| header.get_value_utf8().ok())
        .unwrap_or(unfolded)
        .trim()
        .to_string()
}

/// Decode body or parameter bytes in the given charset.
///
/// Unknown or missing charsets fall back to lossy UTF-8.
#[must_use]
pub fn decode_text(bytes: &[u8], charset: Option<&str>) -> String {
    match charset.and_then(|c| Encoding::for_label(c.trim().as_bytes())) {
        Some(encoding) => encoding.decode_with_bom_removal(bytes).0.into_owned(),
        None => String::from_utf8_lossy(bytes).into_owned(),
    }
}
