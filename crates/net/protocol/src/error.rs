//! Protocol error types.

/// Errors decoding or encoding protocol payloads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// A payload with no opcode or response code.
    #[error("empty payload")]
    EmptyPayload,

    /// Opcode byte outside the known set.
    #[error("unknown opcode: {0}")]
    UnknownOpcode(u8),

    /// Response code byte outside the known set.
    #[error("unknown response code: {0}")]
    UnknownResponseCode(u8),

    /// Body could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),

    /// Body could not be deserialized.
    #[error("decode error: {0}")]
    Decode(String),
}
