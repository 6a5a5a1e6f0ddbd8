//! SHA-256 hashing for leaves and internal nodes
//!
//! Hashes are carried as lowercase hex strings. Leaf and internal hashes are
//! plain concatenations with no separator or domain byte, so a recorded root can
//! be recomputed with nothing more than `sha256sum`.

use sha2::{Digest, Sha256};

use crate::Hash;

/// Root hash of a tree that holds no leaves (SHA-256 of the empty string)
pub const EMPTY_ROOT: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Lowercase hex SHA-256 of `bytes`
pub fn sha256_hex(bytes: &[u8]) -> Hash {
    hex::encode(Sha256::digest(bytes))
}

/// Leaf hash: H(block_0 || block_1 || ...)
pub fn hash_blocks(blocks: &[String]) -> Hash {
    let mut hasher = Sha256::new();
    for block in blocks {
        hasher.update(block.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Internal node hash: H(left || right), empty string for a missing right child
pub fn hash_children(left: &str, right: Option<&str>) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.unwrap_or("").as_bytes());
    hex::encode(hasher.finalize())
}
