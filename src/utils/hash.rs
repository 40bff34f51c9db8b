use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Read buffer used while streaming a file through the digest
const HASH_BUF_SIZE: usize = 64 * 1024;

pub fn hash_bytes(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Streams `path` through SHA-256 and returns the lowercase hex digest.
///
/// # Errors
///
/// Fails if the file cannot be opened or read. A file that vanished between
/// being observed and being hashed surfaces as `io::ErrorKind::NotFound`;
/// check for it with [`is_not_found`].
pub fn hash_file(path: &Path) -> Result<String> {
    tracing::trace!(path = %path.display(), "hashing");

    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUF_SIZE];

    loop {
        let bytes_read = file
            .read(&mut buffer)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// True if the error chain bottoms out in a missing-file I/O error.
#[must_use]
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<std::io::Error>()
            .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_hash_bytes_known_vector() {
        assert_eq!(
            hash_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(hash_bytes(b"").len(), 64);
    }

    #[test]
    fn test_hash_file_matches_bytes() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.txt");
        std::fs::write(&file_path, "Test content for hashing")?;

        let hash = hash_file(&file_path)?;
        assert_eq!(hash, hash_bytes(b"Test content for hashing"));
        assert_eq!(hash, hash_file(&file_path)?);

        Ok(())
    }

    #[test]
    fn test_hash_file_larger_than_buffer() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("big.bin");
        let content: Vec<u8> = (0..(HASH_BUF_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        std::fs::write(&file_path, &content)?;

        assert_eq!(hash_file(&file_path)?, hash_bytes(&content));
        Ok(())
    }

    #[test]
    fn test_missing_file_is_not_found() -> Result<()> {
        let dir = tempdir()?;
        let err = hash_file(&dir.path().join("gone.o")).unwrap_err();
        assert!(is_not_found(&err));

        let other = anyhow::anyhow!("unrelated");
        assert!(!is_not_found(&other));
        Ok(())
    }
}
