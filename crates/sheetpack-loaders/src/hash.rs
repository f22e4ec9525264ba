//! Content hashing for cache-busting filenames.

use sha2::{Digest, Sha256};

/// Number of hex characters kept from the digest.
pub const HASH_LENGTH: usize = 20;

/// Hash `bytes` into a short lowercase hex string.
pub fn content_hash(bytes: impl AsRef<[u8]>) -> String {
    let digest = Sha256::digest(bytes.as_ref());
    let mut hash = hex::encode(digest);
    hash.truncate(HASH_LENGTH);
    hash
}
