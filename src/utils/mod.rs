//! Utility functions and helpers.
//!
//! - [`hash`]: SHA-256 content digests for dependency files
//! - [`paths`]: lexical normalization, relativization and containment checks
//! - [`permissions`]: file modes carried through the store
//! - [`serialization`]: bincode + zstd encoding for persisted manifests

/// Content hashing
pub mod hash;
/// Path manipulation and resolution utilities
pub mod paths;
/// Cross-platform file permissions
pub mod permissions;
/// Binary serialization utilities
pub mod serialization;

use std::borrow::Cow;

/// Platform separator used in search-path variables such as `PATH`.
pub const PATH_LIST_SEPARATOR: char = if cfg!(windows) { ';' } else { ':' };

/// Decodes one line of tool output, tolerating stray invalid bytes.
///
/// Tracer output is overwhelmingly ASCII, so the fast validator almost always
/// succeeds and the line is borrowed as is.
#[must_use]
pub fn decode_line(bytes: &[u8]) -> Cow<'_, str> {
    match simdutf8::basic::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => String::from_utf8_lossy(bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_line() {
        assert_eq!(decode_line(b"open(\"/a\", 0) = 3"), "open(\"/a\", 0) = 3");
        let lossy = decode_line(b"open(\"/a\xff\", 0) = 3");
        assert!(matches!(lossy, Cow::Owned(_)));
        assert!(lossy.starts_with("open("));
    }
}
