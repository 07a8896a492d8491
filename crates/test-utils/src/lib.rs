//! Test support for chunknet: an in-memory [`MockBackend`] that speaks the
//! wire protocol on a loopback port, and fixtures for hashes, spans and
//! clusters.

#![allow(clippy::indexing_slicing)]

mod backend;
mod fixtures;

pub use backend::{MockBackend, MockBackendBuilder};
pub use fixtures::{
    MockCluster, chunk_with_prefix, credentials, hash_with_prefix, prefix_span, random_bytes,
    random_chunk,
};
