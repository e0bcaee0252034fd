//! Content hashing behind a pluggable digest function.
//!
//! Module, chunk and compilation hashes all go through [`ContentHasher`] so
//! the digest function and rendering are chosen once, in
//! [`OutputOptions`](crate::options::OutputOptions), instead of at every call
//! site.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

/// Digest function used for module, chunk and compilation hashes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashFunction {
    #[default]
    Sha256,
    Sha512,
    Blake3,
}

/// Rendering of a finished digest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashDigest {
    #[default]
    Hex,
    Base64,
}

/// An in-progress hash. Create one with [`create_hash`], feed it with
/// [`update`](ContentHasher::update) and finish it with
/// [`digest`](ContentHasher::digest).
pub enum ContentHasher {
    Sha256(Sha256),
    Sha512(Sha512),
    Blake3(Box<blake3::Hasher>),
}

/// Create a fresh hasher for the given function.
pub fn create_hash(function: HashFunction) -> ContentHasher {
    match function {
        HashFunction::Sha256 => ContentHasher::Sha256(Sha256::new()),
        HashFunction::Sha512 => ContentHasher::Sha512(Sha512::new()),
        HashFunction::Blake3 => ContentHasher::Blake3(Box::new(blake3::Hasher::new())),
    }
}

impl ContentHasher {
    pub fn update(&mut self, data: impl AsRef<[u8]>) {
        match self {
            ContentHasher::Sha256(h) => h.update(data.as_ref()),
            ContentHasher::Sha512(h) => h.update(data.as_ref()),
            ContentHasher::Blake3(h) => {
                h.update(data.as_ref());
            }
        }
    }

    /// Finish the hash and render it with the requested encoding.
    pub fn digest(self, encoding: HashDigest) -> String {
        let bytes = match self {
            ContentHasher::Sha256(h) => h.finalize().to_vec(),
            ContentHasher::Sha512(h) => h.finalize().to_vec(),
            ContentHasher::Blake3(h) => h.finalize().as_bytes().to_vec(),
        };
        match encoding {
            HashDigest::Hex => to_hex(&bytes),
            HashDigest::Base64 => to_base64(&bytes),
        }
    }
}

impl std::fmt::Debug for ContentHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ContentHasher::Sha256(_) => "sha256",
            ContentHasher::Sha512(_) => "sha512",
            ContentHasher::Blake3(_) => "blake3",
        };
        f.debug_tuple("ContentHasher").field(&name).finish()
    }
}

/// Truncate a rendered digest to at most `len` characters.
pub fn truncate_digest(digest: &str, len: usize) -> &str {
    &digest[..digest.len().min(len)]
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(char::from_digit((b >> 4) as u32, 16).unwrap_or('0'));
        out.push(char::from_digit((b & 0xf) as u32, 16).unwrap_or('0'));
    }
    out
}

const BASE64_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn to_base64(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len().div_ceil(3) * 4);
    for chunk in bytes.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = chunk.get(1).copied().unwrap_or(0) as u32;
        let b2 = chunk.get(2).copied().unwrap_or(0) as u32;
        let triple = (b0 << 16) | (b1 << 8) | b2;
        out.push(BASE64_ALPHABET[(triple >> 18) as usize & 0x3f] as char);
        out.push(BASE64_ALPHABET[(triple >> 12) as usize & 0x3f] as char);
        if chunk.len() > 1 {
            out.push(BASE64_ALPHABET[(triple >> 6) as usize & 0x3f] as char);
        } else {
            out.push('=');
        }
        if chunk.len() > 2 {
            out.push(BASE64_ALPHABET[triple as usize & 0x3f] as char);
        } else {
            out.push('=');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        let mut h = create_hash(HashFunction::Sha256);
        h.update("abc");
        assert_eq!(
            h.digest(HashDigest::Hex),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn blake3_empty_vector() {
        let h = create_hash(HashFunction::Blake3);
        assert_eq!(
            h.digest(HashDigest::Hex),
            "af1349b9f5f9a1a6a0404dee36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
        );
    }

    #[test]
    fn base64_rendering() {
        let mut h = create_hash(HashFunction::Sha256);
        h.update("abc");
        assert_eq!(
            h.digest(HashDigest::Base64),
            "ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0="
        );
    }

    #[test]
    fn base64_padding() {
        // Round the three padding cases through a raw encode.
        assert_eq!(super::to_base64(b"f"), "Zg==");
        assert_eq!(super::to_base64(b"fo"), "Zm8=");
        assert_eq!(super::to_base64(b"foo"), "Zm9v");
    }

    #[test]
    fn same_input_same_digest() {
        for function in [HashFunction::Sha256, HashFunction::Sha512, HashFunction::Blake3] {
            let mut a = create_hash(function);
            let mut b = create_hash(function);
            a.update("deterministic");
            b.update("deterministic");
            assert_eq!(a.digest(HashDigest::Hex), b.digest(HashDigest::Hex));
        }
    }

    #[test]
    fn truncation_is_prefix_and_bounded() {
        assert_eq!(truncate_digest("abcdef", 4), "abcd");
        assert_eq!(truncate_digest("ab", 10), "ab");
    }
}
