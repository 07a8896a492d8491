//! Coordinator error types.

use chunknet_net_protocol::{ErrorKind, RemoteError};
use chunknet_primitives::{ChunkHash, ChunkKind};

/// Failures raised by the coordinator before any backend is contacted.
///
/// Everything that happens on a backend is reported inside a
/// [`PropagationResult`](crate::PropagationResult) instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    /// A write or delete named no target hosts.
    #[error("{operation} of {kind} chunk {hash} names no target hosts")]
    NoHostProvided {
        /// Operation that was attempted.
        operation: &'static str,
        /// Chunk family.
        kind: ChunkKind,
        /// Chunk hash.
        hash: ChunkHash,
    },

    /// The coordinator holds no signing authority of its own.
    #[error("coordinator has no signing authority for {operation} of {hash}")]
    NoSigningAuthority {
        /// Operation that was attempted.
        operation: &'static str,
        /// Chunk hash.
        hash: ChunkHash,
    },

    /// No managed backend covers the hash.
    #[error("no managed backend covers {0}")]
    NoMatchingServers(ChunkHash),
}

impl CoordinatorError {
    /// The distributed error kind this error is reported as on the wire.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoHostProvided { .. } => ErrorKind::NoHostProvided,
            Self::NoSigningAuthority { .. } => ErrorKind::SecurityError,
            Self::NoMatchingServers(_) => ErrorKind::NoMatchingServers,
        }
    }

    /// Wire form.
    pub fn to_remote(&self) -> RemoteError {
        RemoteError::new(self.kind(), self.to_string())
    }
}
