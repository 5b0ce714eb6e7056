//! Hashing utilities.

use alloy_primitives::{keccak256 as alloy_keccak256, B256};

/// Compute keccak256 hash of input data.
pub fn keccak256(data: &[u8]) -> B256 {
    alloy_keccak256(data)
}

/// Hash of a serialized snapshot payload.
///
/// The storage layer compares payload hashes to make re-applying an
/// identical read a no-op, so the same bytes must always produce the same
/// hash.
///
/// # Example
///
/// ```
/// use roundmirror_core::hashing::payload_hash;
///
/// assert_eq!(payload_hash(b"{\"a\":1}"), payload_hash(b"{\"a\":1}"));
/// assert_ne!(payload_hash(b"{\"a\":1}"), payload_hash(b"{\"a\":2}"));
/// ```
pub fn payload_hash(payload: &[u8]) -> B256 {
    keccak256(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak256_empty() {
        // keccak256("") is a well-known constant
        assert_eq!(
            alloy_primitives::hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }
}
