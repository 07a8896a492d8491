//! Content hash identifying a single immutable chunk.

use core::fmt;
use core::str::FromStr;

use alloy_primitives::{B256, keccak256};
use serde::{Deserialize, Serialize};

use crate::PrimitivesError;

/// Length of a [`ChunkHash`] in bytes.
pub const CHUNK_HASH_LEN: usize = 32;

/// Fixed-length content hash of a chunk.
///
/// Ordering is the unsigned big-endian integer order of the 32 bytes, which is
/// what hash spans are defined over.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkHash(B256);

impl ChunkHash {
    /// Smallest hash in the hash space.
    pub const MIN: Self = Self(B256::ZERO);

    /// Largest hash in the hash space.
    pub const MAX: Self = Self(B256::new([0xff; CHUNK_HASH_LEN]));

    /// Wrap raw hash bytes.
    pub const fn new(bytes: [u8; CHUNK_HASH_LEN]) -> Self {
        Self(B256::new(bytes))
    }

    /// Hash of the given chunk content.
    pub fn digest(data: impl AsRef<[u8]>) -> Self {
        Self(keccak256(data))
    }

    /// Parse from a byte slice of exactly [`CHUNK_HASH_LEN`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, PrimitivesError> {
        if bytes.len() != CHUNK_HASH_LEN {
            return Err(PrimitivesError::InvalidHashLength(bytes.len()));
        }
        Ok(Self(B256::from_slice(bytes)))
    }

    /// Uniformly random hash.
    pub fn random() -> Self {
        use rand::Rng;
        let mut bytes = [0u8; CHUNK_HASH_LEN];
        rand::rng().fill(&mut bytes);
        Self::new(bytes)
    }

    /// Raw hash bytes.
    pub fn as_bytes(&self) -> &[u8; CHUNK_HASH_LEN] {
        &self.0.0
    }

    /// The underlying fixed bytes.
    pub fn into_inner(self) -> B256 {
        self.0
    }
}

impl From<B256> for ChunkHash {
    fn from(value: B256) -> Self {
        Self(value)
    }
}

impl From<[u8; CHUNK_HASH_LEN]> for ChunkHash {
    fn from(value: [u8; CHUNK_HASH_LEN]) -> Self {
        Self::new(value)
    }
}

impl AsRef<[u8]> for ChunkHash {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl FromStr for ChunkHash {
    type Err = PrimitivesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s))
            .map_err(|e| PrimitivesError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Display for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.as_bytes()))
    }
}

impl fmt::Debug for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkHash({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_ordering_is_big_endian() {
        let mut low = [0u8; 32];
        low[31] = 0xff;
        let mut high = [0u8; 32];
        high[0] = 0x01;

        assert!(ChunkHash::new(low) < ChunkHash::new(high));
        assert!(ChunkHash::MIN < ChunkHash::new(low));
        assert!(ChunkHash::new(high) < ChunkHash::MAX);
    }

    #[test]
    fn test_digest_is_deterministic() {
        assert_eq!(ChunkHash::digest(b"chunk"), ChunkHash::digest(b"chunk"));
        assert_ne!(ChunkHash::digest(b"chunk"), ChunkHash::digest(b"chunks"));
    }

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        assert_matches!(
            ChunkHash::from_slice(&[0u8; 31]),
            Err(PrimitivesError::InvalidHashLength(31))
        );
    }

    #[test]
    fn test_parse_display() {
        let hash = ChunkHash::random();
        let parsed: ChunkHash = hash.to_string().parse().unwrap();
        assert_eq!(hash, parsed);

        let unprefixed: ChunkHash = hex::encode(hash.as_bytes()).parse().unwrap();
        assert_eq!(hash, unprefixed);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_matches!("0xzz".parse::<ChunkHash>(), Err(PrimitivesError::InvalidHex(_)));
    }
}
