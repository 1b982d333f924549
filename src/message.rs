//! Raw message formatting.

use base64::{Engine, engine::general_purpose::STANDARD};

/// The MIME subtype for the body.
#[must_use]
pub const fn content_type(html: bool) -> &'static str {
    if html { "text/html" } else { "text/plain" }
}

/// Serialize a message into the bytes written after `DATA`.
///
/// The subject is always RFC 1342 encoded so that non-ASCII text survives,
/// and the body follows a single blank line untouched. Line endings are left
/// as `\n`; the client normalizes them on the wire.
#[must_use]
pub fn format_message(subject: &str, body: &str, from: &str, html: bool) -> Vec<u8> {
    let encoded = STANDARD.encode(subject.as_bytes());
    let content_type = content_type(html);

    let mut buffer = Vec::with_capacity(from.len() + encoded.len() + body.len() + 96);
    buffer.extend_from_slice(b"From: ");
    buffer.extend_from_slice(from.as_bytes());
    buffer.extend_from_slice(b"\nSubject: =?utf-8?B?");
    buffer.extend_from_slice(encoded.as_bytes());
    buffer.extend_from_slice(b"?=");
    buffer.extend_from_slice(b"\nMIME-version: 1.0;");
    buffer.extend_from_slice(b"\nContent-Type: ");
    buffer.extend_from_slice(content_type.as_bytes());
    buffer.extend_from_slice(b"; charset=\"UTF-8\";\n\n");
    buffer.extend_from_slice(body.as_bytes());
    buffer
}
