//! Encoding helpers and MIME type resolution.

use std::borrow::Cow;
use std::path::Path;

use base64::Engine;

/// Default type when neither the content nor the extension says otherwise.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

// ── Header / body encodings ─────────────────────────────────────────

/// RFC 2047 encode a header value if it contains non-ASCII characters.
pub fn encode_header_value(value: &str) -> String {
    if value.is_ascii() {
        return value.to_string();
    }
    let encoded = base64::engine::general_purpose::STANDARD.encode(value.as_bytes());
    format!("=?UTF-8?B?{}?=", encoded)
}

/// Quoted-printable encoding for text parts. Bare `\n` and `\r` become CRLF
/// first, otherwise they would be escaped as `=0A` / `=0D`.
pub fn encode_quoted_printable(text: &str) -> String {
    quoted_printable::encode_to_str(normalize_line_endings(text).as_bytes())
}

/// Convert every line ending (`\r\n`, `\n`, `\r`) to CRLF.
pub fn normalize_line_endings(text: &str) -> Cow<'_, str> {
    let bytes = text.as_bytes();
    let needs_work = bytes.iter().enumerate().any(|(i, &b)| match b {
        b'\n' => i == 0 || bytes[i - 1] != b'\r',
        b'\r' => bytes.get(i + 1) != Some(&b'\n'),
        _ => false,
    });
    if !needs_work {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 16);
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str("\r\n");
            }
            '\n' => out.push_str("\r\n"),
            other => out.push(other),
        }
    }
    Cow::Owned(out)
}

/// Base64 encode and wrap at 76 characters per line, CRLF separated,
/// with a trailing CRLF after the last line.
pub fn encode_base64_wrapped(data: &[u8]) -> String {
    let b64 = base64::engine::general_purpose::STANDARD.encode(data);
    let mut out = String::with_capacity(b64.len() + b64.len() / 38 + 2);
    for chunk in b64.as_bytes().chunks(76) {
        // base64 output is ASCII, every chunk boundary is a char boundary
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push_str("\r\n");
    }
    out
}

// ── MIME type resolution ────────────────────────────────────────────

/// Resolve the MIME type of an attachment: magic numbers first, then the
/// file extension, then `application/octet-stream`.
///
/// ZIP-based office documents share the ZIP signature, so a ZIP sniff only
/// wins when the extension does not name a more specific type.
pub fn resolve_mime_type(file_name: &str, content: &[u8]) -> &'static str {
    let by_extension = mime_type_for_extension(file_name);
    match sniff_mime_type(content) {
        Some("application/zip") => by_extension.unwrap_or("application/zip"),
        Some(sniffed) => sniffed,
        None => by_extension.unwrap_or(DEFAULT_MIME_TYPE),
    }
}

/// Detect well-known binary formats from their leading bytes.
pub fn sniff_mime_type(content: &[u8]) -> Option<&'static str> {
    const SIGNATURES: &[(&[u8], &str)] = &[
        (b"%PDF-", "application/pdf"),
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"\xff\xd8\xff", "image/jpeg"),
        (b"\x1f\x8b", "application/gzip"),
        (b"PK\x03\x04", "application/zip"),
    ];
    SIGNATURES
        .iter()
        .find(|(magic, _)| content.starts_with(magic))
        .map(|(_, mime)| *mime)
}

/// Extension fallback table.
pub fn mime_type_for_extension(file_name: &str) -> Option<&'static str> {
    let ext = Path::new(file_name)
        .extension()?
        .to_string_lossy()
        .to_ascii_lowercase();
    let mime = match ext.as_str() {
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "csv" => "text/csv",
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "xml" => "application/xml",
        "json" => "application/json",
        _ => return None,
    };
    Some(mime)
}

// ─── Tests ──────────────────────────────────────────────────────────
