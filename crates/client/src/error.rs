//! Client error types.

use chunknet_net_protocol::{ErrorKind, ProtocolError, RemoteError};
use chunknet_net_transport::TransportError;
use chunknet_primitives::PrimitivesError;

/// Errors returned by [`BackendClient`](crate::BackendClient) operations.
///
/// Failures reported by the remote end map one-to-one onto the distributed
/// [`ErrorKind`]s; the remaining variants originate locally.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The chunk is not stored on the host.
    #[error("not found: {0}")]
    NotFound(String),

    /// The hash lies outside the host's spans.
    #[error("hash does not belong to host: {0}")]
    DoesNotBelong(String),

    /// No managed host covers the hash.
    #[error("no matching servers: {0}")]
    NoMatchingServers(String),

    /// A write or delete named no target hosts.
    #[error("no host provided: {0}")]
    NoHostProvided(String),

    /// The host has no room for the chunk.
    #[error("out of space: {0}")]
    OutOfSpace(String),

    /// Signature, nonce or authority check failed.
    #[error("security error: {0}")]
    Security(String),

    /// The remote end lost its own connection to a host.
    #[error("transport closed: {0}")]
    TransportClosed(String),

    /// The remote end could not parse the request.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// Any other failure reported by the remote end.
    #[error("server error: {0}")]
    Server(String),

    /// The response did not have the expected shape.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The request never got a response.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A payload could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Signing failed.
    #[error(transparent)]
    Signing(#[from] PrimitivesError),
}

impl From<RemoteError> for ClientError {
    fn from(error: RemoteError) -> Self {
        let RemoteError { kind, message } = error;
        match kind {
            ErrorKind::NotFound => Self::NotFound(message),
            ErrorKind::DoesNotBelong => Self::DoesNotBelong(message),
            ErrorKind::NoMatchingServers => Self::NoMatchingServers(message),
            ErrorKind::NoHostProvided => Self::NoHostProvided(message),
            ErrorKind::OutOfSpace => Self::OutOfSpace(message),
            ErrorKind::SecurityError => Self::Security(message),
            ErrorKind::TransportClosed => Self::TransportClosed(message),
            ErrorKind::Malformed => Self::Malformed(message),
            ErrorKind::Server => Self::Server(message),
        }
    }
}

impl ClientError {
    /// The distributed error kind this error is reported as.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::DoesNotBelong(_) => ErrorKind::DoesNotBelong,
            Self::NoMatchingServers(_) => ErrorKind::NoMatchingServers,
            Self::NoHostProvided(_) => ErrorKind::NoHostProvided,
            Self::OutOfSpace(_) => ErrorKind::OutOfSpace,
            Self::Security(_) | Self::Signing(_) => ErrorKind::SecurityError,
            Self::TransportClosed(_) | Self::Transport(_) => ErrorKind::TransportClosed,
            Self::Malformed(_) | Self::Protocol(_) => ErrorKind::Malformed,
            Self::Server(_) | Self::UnexpectedResponse(_) => ErrorKind::Server,
        }
    }

    /// Whether the failure happened below the protocol, on the connection itself.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Convert into the form carried in result envelopes and on the wire.
    pub fn to_remote(&self) -> RemoteError {
        let message = match self {
            Self::NotFound(m)
            | Self::DoesNotBelong(m)
            | Self::NoMatchingServers(m)
            | Self::NoHostProvided(m)
            | Self::OutOfSpace(m)
            | Self::Security(m)
            | Self::TransportClosed(m)
            | Self::Malformed(m)
            | Self::Server(m) => m.clone(),
            other => other.to_string(),
        };
        RemoteError::new(self.kind(), message)
    }
}
