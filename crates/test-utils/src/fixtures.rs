//! Hashes, spans, chunks and clusters for tests.

use std::io;

use chunknet_primitives::{CHUNK_HASH_LEN, ChunkHash, Credentials, HashSpan, HostAddress};
use rand::Rng;

use crate::MockBackend;

/// A random hash whose first byte is `prefix`.
pub fn hash_with_prefix(prefix: u8) -> ChunkHash {
    let mut bytes = [0u8; CHUNK_HASH_LEN];
    rand::rng().fill(&mut bytes);
    bytes[0] = prefix;
    ChunkHash::new(bytes)
}

/// The span of every hash whose first byte lies in `first..=last`.
pub fn prefix_span(first: u8, last: u8) -> HashSpan {
    let mut start = [0u8; CHUNK_HASH_LEN];
    start[0] = first.min(last);
    let mut end = [0xffu8; CHUNK_HASH_LEN];
    end[0] = first.max(last);
    HashSpan::new(ChunkHash::new(start), ChunkHash::new(end)).unwrap_or(HashSpan::FULL)
}

/// `len` random bytes.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::rng().fill(data.as_mut_slice());
    data
}

/// A random chunk stored under a hash starting with `prefix`.
pub fn chunk_with_prefix(prefix: u8, len: usize) -> (ChunkHash, Vec<u8>) {
    (hash_with_prefix(prefix), random_bytes(len))
}

/// A random chunk stored under its content digest.
pub fn random_chunk(len: usize) -> (ChunkHash, Vec<u8>) {
    let data = random_bytes(len);
    (ChunkHash::digest(&data), data)
}

/// Fresh signing credentials.
pub fn credentials() -> Credentials {
    Credentials::random()
}

/// Several mock backends started together.
#[derive(Debug)]
pub struct MockCluster {
    backends: Vec<MockBackend>,
}

impl MockCluster {
    /// Start one backend per entry of `layout`, each owning the listed spans.
    pub async fn start(layout: Vec<Vec<HashSpan>>) -> io::Result<Self> {
        let mut backends = Vec::with_capacity(layout.len());
        for spans in layout {
            backends.push(MockBackend::start(spans).await?);
        }
        Ok(Self { backends })
    }

    /// The backends in start order.
    pub fn backends(&self) -> &[MockBackend] {
        &self.backends
    }

    /// Backend at `index`.
    pub fn backend(&self, index: usize) -> Option<&MockBackend> {
        self.backends.get(index)
    }

    /// Every backend's address and spans, in start order.
    pub fn layout(&self) -> Vec<(HostAddress, Vec<HashSpan>)> {
        self.backends
            .iter()
            .map(|backend| (backend.host().clone(), backend.spans()))
            .collect()
    }

    /// Requests received across all backends.
    pub fn total_requests(&self) -> usize {
        self.backends.iter().map(MockBackend::requests).sum()
    }

    /// Reset every backend's request counter.
    pub fn reset_requests(&self) {
        self.backends.iter().for_each(MockBackend::reset_requests);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_span_covers_prefix_only() {
        let span = prefix_span(0x10, 0x1f);
        assert!(span.covers(&hash_with_prefix(0x10)));
        assert!(span.covers(&hash_with_prefix(0x1f)));
        assert!(!span.covers(&hash_with_prefix(0x20)));
        assert!(!span.covers(&hash_with_prefix(0x0f)));
    }

    #[test]
    fn test_random_chunk_is_content_addressed() {
        let (hash, data) = random_chunk(64);
        assert_eq!(hash, ChunkHash::digest(&data));
    }
}
