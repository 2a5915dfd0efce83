use sha2::{Digest, Sha256};

use crate::error::GenError;

/// Compress a config document for storage in the resource store.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, GenError> {
    zstd::encode_all(data, 3).map_err(GenError::Compression)
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>, GenError> {
    zstd::decode_all(data).map_err(GenError::Compression)
}

/// Hex sha256 of an uncompressed config document; the apply protocol
/// compares these to detect acknowledged configs.
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_and_shrinks_repetitive_input() {
        let doc = "machine:\n  type: worker\n".repeat(64);
        let packed = compress(doc.as_bytes()).unwrap();
        assert!(packed.len() < doc.len());
        assert_eq!(decompress(&packed).unwrap(), doc.as_bytes());
    }

    #[test]
    fn sha_is_stable_hex() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
