//! Core primitive types for the chunknet access layer.
//!
//! This crate provides the data model shared by every other crate: content
//! hashes and the spans of hash space backends own, host identities, and the
//! nonce/signature types used to authorise writes. It is kept separate to
//! avoid circular dependencies between the transport and routing layers.

mod auth;
mod error;
mod hash;
mod host;
mod span;

pub use alloy_primitives::Address;
pub use auth::{Credentials, NONCE_LEN, Nonce, SIGNATURE_ALGORITHM, Signature, signed_message};
pub use error::PrimitivesError;
pub use hash::{CHUNK_HASH_LEN, ChunkHash};
pub use host::HostAddress;
pub use span::{HashSpan, spans_cover};

/// Which of the two chunk families an operation targets.
///
/// Data and metadata chunks live in separate namespaces on every backend.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::FromRepr,
)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum ChunkKind {
    /// File content chunks.
    Data = 0,
    /// Metadata chunks describing files and projects.
    Meta = 1,
}
