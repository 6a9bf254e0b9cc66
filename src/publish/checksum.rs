//! Streaming SHA-256 of local files.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Read size used while hashing.
pub const CHUNK_SIZE: usize = 4096;

/// Hex SHA-256 of a file, read in fixed-size chunks.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("abc");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_multi_chunk_matches_one_shot() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("big");
        let data: Vec<u8> = (0..(CHUNK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        assert_eq!(sha256_file(&path).unwrap(), hex::encode(Sha256::digest(&data)));
    }

    #[test]
    fn test_missing_file() {
        let err = sha256_file(Path::new("/nonexistent/stormguard.zip")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
