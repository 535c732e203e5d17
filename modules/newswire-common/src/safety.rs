//! Text hygiene applied to every externally sourced string before it reaches
//! storage. Postgres `text` columns reject NUL bytes, and feed/article payloads
//! arrive with arbitrary encodings.

/// Validate a string before a storage write: the bytes are re-decoded so any
/// ill-formed sequence becomes U+FFFD, and NUL bytes are dropped. The storage
/// gateway routes every external string through here.
pub fn clean_text(input: &str) -> String {
    clean_bytes(input.as_bytes())
}

/// Decode raw bytes into clean UTF-8: ill-formed sequences become U+FFFD,
/// NUL bytes are dropped.
pub fn clean_bytes(input: &[u8]) -> String {
    let decoded = String::from_utf8_lossy(input);
    if decoded.contains('\0') {
        decoded.replace('\0', "")
    } else {
        decoded.into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_passthrough() {
        assert_eq!(clean_text("Новости дня"), "Новости дня");
    }

    #[test]
    fn test_clean_text_strips_nul() {
        assert_eq!(clean_text("a\0b\0c"), "abc");
    }

    #[test]
    fn test_clean_bytes_replaces_invalid() {
        // 0xFF is never valid UTF-8
        let out = clean_bytes(&[b'o', b'k', 0xFF, b'!']);
        assert_eq!(out, "ok\u{FFFD}!");
    }

    #[test]
    fn test_clean_bytes_strips_nul_and_replaces() {
        let out = clean_bytes(&[0x00, b'x', 0xC3, 0x28]);
        assert!(!out.contains('\0'));
        assert!(out.starts_with('x'));
        assert!(out.contains('\u{FFFD}'));
    }
}
