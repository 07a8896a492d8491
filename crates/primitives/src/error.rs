//! Primitive validation errors.

use crate::ChunkHash;

/// Errors raised while constructing or validating primitive values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrimitivesError {
    /// A hash was built from the wrong number of bytes.
    #[error("invalid chunk hash length: expected 32, got {0}")]
    InvalidHashLength(usize),

    /// Hex text could not be decoded.
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    /// A span whose start lies after its end.
    #[error("invalid hash span: start {start} is after end {end}")]
    InvalidSpan {
        /// Requested start.
        start: ChunkHash,
        /// Requested end.
        end: ChunkHash,
    },

    /// A host string that is not `host:port`.
    #[error("invalid host address: {0}")]
    InvalidHost(String),

    /// Secret key bytes rejected by the curve.
    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    /// The signer failed to produce a signature.
    #[error("signing failed: {0}")]
    Signing(String),

    /// Signature bytes malformed or not produced by the claimed certificate.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Signature algorithm other than the supported one.
    #[error("unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),
}
