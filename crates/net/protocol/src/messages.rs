//! Request and response bodies.

use std::collections::BTreeMap;

use chunknet_primitives::{ChunkHash, HashSpan, HostAddress, Nonce, Signature};
use serde::{Deserialize, Serialize};

use crate::{ProtocolError, RemoteError};

/// Hashes addressed by a GET_* or HAS_* request.
///
/// Responses are aligned with `hashes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkQuery {
    /// Requested hashes.
    pub hashes: Vec<ChunkHash>,
}

/// Response to GET_DATA / GET_META: `None` where the host lacks the chunk.
pub type ChunkReply = Vec<Option<Vec<u8>>>;

/// Response to HAS_DATA / HAS_META.
pub type PresenceReply = Vec<bool>;

/// GET_NONCE request.
///
/// With no hosts the receiving endpoint issues `count` nonces of its own; a
/// routing endpoint given hosts fetches `count` nonces from each of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceQuery {
    /// Nonces wanted per host.
    pub count: u32,
    /// Hosts to fetch from, empty for the receiving endpoint itself.
    pub hosts: Vec<HostAddress>,
}

/// Response to GET_NONCE, one entry per requested host (or one for the endpoint).
pub type NonceReply = Vec<Result<Vec<Nonce>, RemoteError>>;

/// Proof that a write was authorised: a backend-issued nonce and a signature
/// over `nonce || hash || payload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteAuth {
    /// Nonce issued by the receiving host.
    pub nonce: Nonce,
    /// Signature binding nonce, hash and payload.
    pub signature: Signature,
}

/// ADD_DATA / ADD_META request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddChunk {
    /// Content hash.
    pub hash: ChunkHash,
    /// Chunk bytes.
    pub data: Vec<u8>,
    /// Write authorisation for the receiving host.
    pub auth: WriteAuth,
}

/// Authorisation for one target host of a propagated write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostWrite {
    /// Target host.
    pub host: HostAddress,
    /// Authorisation signed against a nonce issued by `host`.
    pub auth: WriteAuth,
}

/// ADD_DATA_REMOTE / ADD_META_REMOTE request: write to several hosts through
/// a routing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddChunkRemote {
    /// Content hash.
    pub hash: ChunkHash,
    /// Chunk bytes.
    pub data: Vec<u8>,
    /// One pre-signed write per target host.
    pub targets: Vec<HostWrite>,
}

/// Per-target outcome of a propagated write or delete, aligned with the targets.
pub type PropagationReply = Vec<Result<(), RemoteError>>;

/// DELETE_DATA / DELETE_META request.
///
/// A plain backend deletes its own copy and ignores `hosts`. A routing
/// endpoint requires a non-empty `hosts` and deletes on each of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteChunk {
    /// Hash to delete.
    pub hash: ChunkHash,
    /// Authorisation for the receiving endpoint (empty payload).
    pub auth: WriteAuth,
    /// Hosts to delete from when sent to a routing endpoint.
    pub hosts: Vec<HostAddress>,
}

/// Offset/limit window of a hash listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashRange {
    /// Number of hashes to skip, in ascending hash order.
    pub offset: u64,
    /// Maximum number of hashes to return.
    pub limit: u32,
}

/// Response to GET_*_HASHES: ascending hashes within the requested window.
pub type HashListReply = Vec<ChunkHash>;

/// A backend's configuration as served by GET_CONFIGURATION.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfiguration {
    /// Hash spans the backend owns.
    pub spans: Vec<HashSpan>,
    /// Other hosts the backend knows about.
    pub hosts: Vec<HostAddress>,
    /// Idle time after which the backend drops a silent connection.
    pub idle_timeout_ms: Option<u64>,
    /// Free-form key/value settings.
    pub properties: BTreeMap<String, String>,
}

impl BackendConfiguration {
    /// Bytes a configuration update signs: the postcard encoding of `self`.
    pub fn signing_payload(&self) -> Result<Vec<u8>, ProtocolError> {
        postcard::to_allocvec(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Hash under which a configuration update is signed.
    ///
    /// Configuration updates reuse the chunk write signature with the
    /// configuration digest in place of a chunk hash.
    pub fn signing_hash(encoded: &[u8]) -> ChunkHash {
        ChunkHash::digest(encoded)
    }
}

/// SET_CONFIGURATION request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetConfiguration {
    /// Replacement configuration.
    pub config: BackendConfiguration,
    /// Authorisation over the postcard encoding of `config`.
    pub auth: WriteAuth,
}
