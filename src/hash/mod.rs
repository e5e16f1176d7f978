//! SHA-256 and HMAC-SHA-256 primitives used by the SigV4 signer
//!
//! Fixed-size `[u8; 32]` outputs instead of `Vec<u8>` keep the signing hot
//! path allocation-free.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 of the empty byte string, pre-computed so empty bodies never
/// touch the hasher.
pub const EMPTY_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// One-shot SHA-256.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Lowercase hex of the one-shot SHA-256.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Streaming SHA-256. Single-use: `finalize` consumes the hasher, so no
/// state survives it.
pub struct Sha256Stream {
    inner: Sha256,
}

impl Sha256Stream {
    pub fn new() -> Self {
        Self {
            inner: Sha256::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finalize(self) -> [u8; 32] {
        let digest = self.inner.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        out
    }
}

impl Default for Sha256Stream {
    fn default() -> Self {
        Self::new()
    }
}

/// HMAC-SHA-256 returning a fixed-size array.
pub fn hmac_sha256(key: &[u8], msg: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(msg);
    let result = mac.finalize().into_bytes();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_sha256_constant() {
        assert_eq!(EMPTY_SHA256, sha256_hex(b""));
        assert_eq!(EMPTY_SHA256, hex::encode(sha256(b"")));
    }

    #[test]
    fn test_streaming_matches_one_shot() {
        let mut stream = Sha256Stream::new();
        stream.update(b"hello ");
        stream.update(b"world");
        assert_eq!(stream.finalize(), sha256(b"hello world"));
    }

    #[test]
    fn test_hmac_distinct_keys_distinct_macs() {
        let d = b"the same data";
        assert_ne!(hmac_sha256(b"key-one", d), hmac_sha256(b"key-two", d));
    }

    #[test]
    fn test_hmac_fixed_size() {
        assert_eq!(hmac_sha256(b"k", b"m").len(), 32);
    }
}
