//! Content-type sniffing from a byte prefix and a filename hint.
//!
//! Detection order: magic numbers in the prefix, then the filename
//! extension, then a UTF-8 check for plain text. Anything else is
//! `application/octet-stream`.

/// Number of leading plaintext bytes inspected by [`detect`].
pub const SNIFF_LEN: usize = 512;

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Signatures matched at offset zero.
const MAGIC: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"%PDF-", "application/pdf"),
    (b"\x1f\x8b", "application/gzip"),
    (b"BZh", "application/x-bzip2"),
    (b"7z\xbc\xaf\x27\x1c", "application/x-7z-compressed"),
    (b"\xfd7zXZ\x00", "application/x-xz"),
    (b"OggS", "audio/ogg"),
    (b"fLaC", "audio/flac"),
    (b"ID3", "audio/mpeg"),
    (b"\x00asm", "application/wasm"),
    (b"\x7fELF", "application/x-executable"),
    (b"\x1aE\xdf\xa3", "video/webm"),
];

/// Extension fallbacks, compared case-insensitively.
const EXTENSIONS: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("bmp", "image/bmp"),
    ("svg", "image/svg+xml"),
    ("ico", "image/vnd.microsoft.icon"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("gz", "application/gzip"),
    ("tar", "application/x-tar"),
    ("json", "application/json"),
    ("xml", "application/xml"),
    ("js", "text/javascript"),
    ("wasm", "application/wasm"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("css", "text/css"),
    ("csv", "text/csv"),
    ("md", "text/markdown"),
    ("txt", "text/plain"),
    ("mp3", "audio/mpeg"),
    ("wav", "audio/wav"),
    ("ogg", "audio/ogg"),
    ("mp4", "video/mp4"),
    ("webm", "video/webm"),
];

/// Detect the MIME type of content whose first bytes are `prefix`.
///
/// Deterministic for identical input.
pub fn detect(prefix: &[u8], filename: &str) -> String {
    let prefix = &prefix[..prefix.len().min(SNIFF_LEN)];

    if let Some(mime) = detect_magic(prefix) {
        return mime.to_string();
    }

    if let Some(mime) = detect_extension(filename) {
        return mime.to_string();
    }

    if !prefix.is_empty() && looks_like_text(prefix) {
        return "text/plain".to_string();
    }

    OCTET_STREAM.to_string()
}

fn detect_magic(prefix: &[u8]) -> Option<&'static str> {
    if let Some((_, mime)) = MAGIC.iter().find(|(sig, _)| prefix.starts_with(sig)) {
        return Some(mime);
    }

    // Container formats keyed by a second marker.
    if prefix.len() >= 12 && prefix.starts_with(b"RIFF") {
        return match &prefix[8..12] {
            b"WEBP" => Some("image/webp"),
            b"WAVE" => Some("audio/wav"),
            b"AVI " => Some("video/x-msvideo"),
            _ => None,
        };
    }
    if prefix.len() >= 12 && &prefix[4..8] == b"ftyp" {
        return Some("video/mp4");
    }
    if prefix.starts_with(b"PK\x03\x04") {
        return Some("application/zip");
    }
    if prefix.len() >= 262 && &prefix[257..262] == b"ustar" {
        return Some("application/x-tar");
    }
    if prefix.starts_with(b"BM") && prefix.len() >= 14 {
        return Some("image/bmp");
    }
    None
}

fn detect_extension(filename: &str) -> Option<&'static str> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    EXTENSIONS
        .iter()
        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(ext))
        .map(|(_, mime)| *mime)
}

/// UTF-8 without NUL or non-whitespace control bytes. A multi-byte sequence
/// cut off by the end of the prefix is tolerated.
fn looks_like_text(prefix: &[u8]) -> bool {
    let valid = match std::str::from_utf8(prefix) {
        Ok(text) => text,
        Err(err) if err.error_len().is_none() => {
            match std::str::from_utf8(&prefix[..err.valid_up_to()]) {
                Ok(text) => text,
                Err(_) => return false,
            }
        }
        Err(_) => return false,
    };
    valid
        .chars()
        .all(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t' | '\x0c'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_wins_over_extension() {
        let png = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
        assert_eq!(detect(png, "notes.txt"), "image/png");
    }

    #[test]
    fn extension_fallback() {
        assert_eq!(detect(b"0123456789", "photo.png"), "image/png");
        assert_eq!(detect(b"{}", "data.JSON"), "application/json");
    }

    #[test]
    fn dotfile_is_not_an_extension() {
        assert_eq!(detect(b"", ".png"), OCTET_STREAM);
    }

    #[test]
    fn text_and_binary() {
        assert_eq!(detect(b"hello world\n", "readme"), "text/plain");
        assert_eq!(detect(b"\x00\x01\x02\x03", "blob"), OCTET_STREAM);
        // "é" split across the prefix boundary
        assert_eq!(detect(b"caf\xc3", "note"), "text/plain");
    }

    #[test]
    fn riff_containers() {
        let mut webp = b"RIFF\0\0\0\0WEBPVP8 ".to_vec();
        webp.extend_from_slice(&[0; 8]);
        assert_eq!(detect(&webp, "x"), "image/webp");
    }
}
