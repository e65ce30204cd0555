use sha1::{Digest, Sha1};
use std::fmt;

/// Size of a key hash in bytes.
pub const KEY_HASH_SIZE: usize = 8;

/// Replication identifier for a key: the first 8 bytes of SHA-1(key).
///
/// Collisions are possible and resolved first-writer-wins at the store
/// level; revision order supersedes over time.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyHash([u8; KEY_HASH_SIZE]);

impl KeyHash {
    pub fn from_bytes(bytes: [u8; KEY_HASH_SIZE]) -> Self {
        KeyHash(bytes)
    }

    /// Reads a key hash from the start of a byte slice. Returns `None` if
    /// the slice is shorter than `KEY_HASH_SIZE`.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < KEY_HASH_SIZE {
            return None;
        }
        let mut kh = [0u8; KEY_HASH_SIZE];
        kh.copy_from_slice(&bytes[..KEY_HASH_SIZE]);
        Some(KeyHash(kh))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_HASH_SIZE] {
        &self.0
    }
}

impl fmt::Debug for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Hashes a key into its replication identifier.
pub fn key_hash(key: &[u8]) -> KeyHash {
    let mut hasher = Sha1::new();
    hasher.update(key);
    let digest = hasher.finalize();
    let mut kh = [0u8; KEY_HASH_SIZE];
    kh.copy_from_slice(&digest[..KEY_HASH_SIZE]);
    KeyHash(kh)
}
