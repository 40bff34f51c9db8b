use anyhow::{Context, Result};

/// Upper bound on decoded size; a manifest listing every file of a large
/// toolchain stays far below this.
const DECODE_LIMIT: usize = 64 * 1024 * 1024;

fn get_config() -> impl bincode::config::Config {
    bincode::config::standard().with_limit::<DECODE_LIMIT>()
}

/// Serialize with bincode (serde mode), then compress with zstd.
///
/// # Errors
///
/// Returns an error if encoding or compression fails.
pub fn encode_compressed<T: serde::Serialize>(data: &T, level: i32) -> Result<Vec<u8>> {
    let raw = bincode::serde::encode_to_vec(data, get_config()).context("Failed to encode")?;
    zstd::encode_all(&raw[..], level).context("Failed to compress")
}

/// Inverse of [`encode_compressed`].
///
/// Only the leading `T` is decoded, so a struct's first field can be read on
/// its own (to check a version before committing to a schema).
///
/// # Errors
///
/// Returns an error if the bytes are not zstd data or do not decode to `T`.
pub fn decode_compressed<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let raw = zstd::decode_all(bytes).context("Failed to decompress")?;
    let (value, _bytes_read) =
        bincode::serde::decode_from_slice(&raw, get_config()).context("Failed to decode")?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        id: u32,
        label: Option<String>,
        paths: Vec<std::path::PathBuf>,
    }

    #[test]
    fn test_encode_decode() -> Result<()> {
        let original = Sample {
            id: 7,
            label: None,
            paths: vec!["../lib/x.so".into(), "/usr/bin/make".into()],
        };

        let bytes = encode_compressed(&original, 3)?;
        let decoded: Sample = decode_compressed(&bytes)?;
        assert_eq!(original, decoded);
        Ok(())
    }

    #[test]
    fn test_leading_field_decodes_alone() -> Result<()> {
        let original = Sample {
            id: 42,
            label: Some("x".into()),
            paths: vec![],
        };
        let bytes = encode_compressed(&original, 1)?;
        let id: u32 = decode_compressed(&bytes)?;
        assert_eq!(id, 42);
        Ok(())
    }

    #[test]
    fn test_garbage_is_rejected() {
        let result: Result<Sample> = decode_compressed(b"definitely not zstd");
        assert!(result.is_err());
    }
}
