use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::IngestError;

/// Name of the digest algorithm written into manifests. Changing it changes
/// every `hash` field, so clients pin on this value.
pub const DIGEST_ALGORITHM: &str = "sha1";

const READ_BUF: usize = 64 * 1024;

/// Hex digest of a file together with the number of bytes it covered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentDigest {
    pub hex: String,
    pub len: u64,
}

/// Stream `path` through SHA-1 in fixed-size reads.
pub fn hash_file(path: &Path) -> Result<ContentDigest, IngestError> {
    let f = File::open(path).map_err(|e| IngestError::io(path, e))?;
    hash_reader(BufReader::with_capacity(READ_BUF, f)).map_err(|e| IngestError::io(path, e))
}

pub fn hash_reader<R: Read>(mut reader: R) -> std::io::Result<ContentDigest> {
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; READ_BUF];
    let mut len = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
        len += n as u64;
    }
    Ok(ContentDigest { hex: hex::encode(hasher.finalize()), len })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        let d = hash_reader(&b""[..]).unwrap();
        assert_eq!(d.hex, "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        assert_eq!(d.len, 0);
        let d = hash_reader(&b"abc"[..]).unwrap();
        assert_eq!(d.hex, "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(d.len, 3);
    }
}
