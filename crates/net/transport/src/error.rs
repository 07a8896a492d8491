//! Transport error types.

use chunknet_net_codec::FrameError;
use chunknet_primitives::HostAddress;

/// Terminal outcome of a request that produced no response, or of a
/// connection operation that failed.
///
/// Cloneable because a single purge resolves many waiters with the same cause.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed before the request completed, or a request
    /// was submitted after close.
    #[error("connection closed")]
    Closed,

    /// The socket failed and could not be re-established.
    #[error("cannot reconnect to {host}: {reason}")]
    CannotReconnect {
        /// Backend that was being dialed.
        host: HostAddress,
        /// Last dial or write failure.
        reason: String,
    },

    /// The initial connection attempt failed.
    #[error("failed to connect to {host}: {reason}")]
    Connect {
        /// Backend that was being dialed.
        host: HostAddress,
        /// Dial failure.
        reason: String,
    },

    /// A response with a higher id arrived first; this request's response
    /// can no longer arrive on this connection.
    #[error("request {id} abandoned: a newer response arrived first")]
    Abandoned {
        /// Id of the abandoned request.
        id: u64,
    },

    /// The request was written on a socket that has since been replaced.
    #[error("request {id} lost when the connection was reset")]
    Reset {
        /// Id of the lost request.
        id: u64,
    },

    /// An id was registered twice.
    #[error("duplicate request id {0}")]
    DuplicateId(u64),

    /// Framing failure while encoding an outgoing request.
    #[error("frame error: {0}")]
    Frame(String),
}

impl From<FrameError> for TransportError {
    fn from(error: FrameError) -> Self {
        TransportError::Frame(error.to_string())
    }
}
