//! Content hashing.
//!
//! Every fingerprint in packline is a blake3 digest rendered as lowercase hex.
//! Multi-part fingerprints length-prefix each part so `["ab", "c"]` and
//! `["a", "bc"]` never collide.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// Hash a byte slice, returning the hex digest.
#[must_use]
pub fn blake3_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Hash a file's content by streaming it, returning the hex digest.
///
/// # Errors
/// Returns an error if the file cannot be opened or read.
pub fn blake3_file(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = blake3::Hasher::new();
    let mut buffer = [0u8; 8192];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Incremental builder for fingerprints made of several labelled parts.
#[derive(Debug, Default, Clone)]
pub struct Fingerprinter {
    hasher: blake3::Hasher,
}

impl Fingerprinter {
    /// Start an empty fingerprint.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one part. Parts are length-prefixed (little-endian u64).
    pub fn part(&mut self, bytes: impl AsRef<[u8]>) -> &mut Self {
        let bytes = bytes.as_ref();
        self.hasher.update(&(bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
        self
    }

    /// Finish and return the hex digest.
    #[must_use]
    pub fn finish(&self) -> String {
        self.hasher.finalize().to_hex().to_string()
    }
}

/// Hash several parts as one fingerprint.
#[must_use]
pub fn fingerprint_parts<I, P>(parts: I) -> String
where
    I: IntoIterator<Item = P>,
    P: AsRef<[u8]>,
{
    let mut fp = Fingerprinter::new();
    for part in parts {
        fp.part(part);
    }
    fp.finish()
}

/// First `len` hex characters of the digest of `data`.
///
/// Used for short content-addressed names (`[contenthash8]`, deterministic ids).
#[must_use]
pub fn short_hash(data: &[u8], len: usize) -> String {
    let mut hex = blake3_bytes(data);
    hex.truncate(len.min(hex.len()));
    hex
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_blake3_bytes_known_vector() {
        assert_eq!(
            blake3_bytes(b"hello world"),
            "d74981efa70a0c880b8d8c1985d075dbcbf679b99a5f9914e5aaf96b831a9e24"
        );
    }

    #[test]
    fn test_blake3_file_matches_bytes() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();
        file.flush().unwrap();
        assert_eq!(blake3_file(file.path()).unwrap(), blake3_bytes(b"hello world"));
    }

    #[test]
    fn test_blake3_file_missing() {
        assert!(blake3_file(Path::new("/nonexistent/packline/file")).is_err());
    }

    #[test]
    fn test_parts_are_length_prefixed() {
        assert_ne!(fingerprint_parts(["ab", "c"]), fingerprint_parts(["a", "bc"]));
        assert_eq!(fingerprint_parts(["a", "b"]), fingerprint_parts(["a", "b"]));
    }

    #[test]
    fn test_short_hash_len() {
        assert_eq!(short_hash(b"x", 8).len(), 8);
        assert_eq!(short_hash(b"x", 200).len(), 64);
    }
}
