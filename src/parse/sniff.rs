//! Content-type detection from raw bytes.
//!
//! A trimmed rendition of the WHATWG MIME sniffing table: exact magic-byte
//! prefixes for common binary formats, case-insensitive tag scanning for
//! HTML, then a text/binary split over the first bytes.

const SNIFF_LEN: usize = 512;

/// Detects the content type of a body from its leading bytes.
///
/// Always returns a valid MIME type; `application/octet-stream` is the
/// fallback when nothing more specific matches.
pub fn detect_content_type(body: &[u8]) -> &'static str {
    let data = &body[..body.len().min(SNIFF_LEN)];
    let trimmed = trim_ws(data);

    if let Some(mime) = sniff_html(trimmed) {
        return mime;
    }

    if let Some(mime) = sniff_magic(data) {
        return mime;
    }

    if looks_textual(data) {
        "text/plain; charset=utf-8"
    } else {
        "application/octet-stream"
    }
}

fn trim_ws(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !matches!(b, b'\t' | b'\n' | b'\x0c' | b'\r' | b' '))
        .unwrap_or(data.len());
    &data[start..]
}

fn sniff_html(data: &[u8]) -> Option<&'static str> {
    const TAGS: &[&str] = &[
        "<!DOCTYPE HTML",
        "<HTML",
        "<HEAD",
        "<SCRIPT",
        "<IFRAME",
        "<H1",
        "<DIV",
        "<FONT",
        "<TABLE",
        "<A",
        "<STYLE",
        "<TITLE",
        "<B",
        "<BODY",
        "<BR",
        "<P",
        "<!--",
    ];

    for tag in TAGS {
        let n = tag.len();
        if data.len() <= n {
            continue;
        }
        if data[..n].eq_ignore_ascii_case(tag.as_bytes()) {
            // The tag must terminate with a space or bracket.
            if matches!(data[n], b' ' | b'>') {
                return Some("text/html; charset=utf-8");
            }
        }
    }
    None
}

fn sniff_magic(data: &[u8]) -> Option<&'static str> {
    const MAGIC: &[(&[u8], &str)] = &[
        (b"%PDF-", "application/pdf"),
        (b"%!PS-Adobe-", "application/postscript"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (&[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'], "image/png"),
        (&[0xff, 0xd8, 0xff], "image/jpeg"),
        (b"BM", "image/bmp"),
        (&[0x1f, 0x8b, 0x08], "application/x-gzip"),
        (b"PK\x03\x04", "application/zip"),
        (b"Rar!\x1a\x07\x00", "application/x-rar-compressed"),
        (b"\x7fELF", "application/octet-stream"),
        (b"OggS\x00", "application/ogg"),
        (b"\x1aE\xdf\xa3", "video/webm"),
        (b"ID3", "audio/mpeg"),
        (b"wOFF", "font/woff"),
        (b"wOF2", "font/woff2"),
    ];

    for (prefix, mime) in MAGIC {
        if data.starts_with(prefix) {
            return Some(mime);
        }
    }

    // RIFF containers share a four-byte prefix.
    if data.len() >= 12 && data.starts_with(b"RIFF") {
        return match &data[8..12] {
            b"WEBP" => Some("image/webp"),
            b"WAVE" => Some("audio/wave"),
            _ => Some("application/octet-stream"),
        };
    }

    if data.len() >= 12 && &data[4..8] == b"ftyp" {
        return Some("video/mp4");
    }

    None
}

fn looks_textual(data: &[u8]) -> bool {
    if data.is_empty() {
        return true;
    }

    // Binary-flavoured control bytes mean this is not text.
    !data
        .iter()
        .any(|&b| matches!(b, 0x00..=0x08 | 0x0b | 0x0e..=0x1a | 0x1c..=0x1f))
}
