//! Result envelope of routed operations.

use core::fmt;

use chunknet_client::ClientError;
use chunknet_net_protocol::{ErrorKind, RemoteError};
use chunknet_primitives::{ChunkHash, HostAddress};

/// A failure recorded for one host or one input of a routed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationError {
    /// Host the failure came from, if one was contacted.
    pub host: Option<HostAddress>,
    /// Hash the failure concerns, if any.
    pub hash: Option<ChunkHash>,
    /// Position in the operation's input the failure belongs to.
    pub position: Option<usize>,
    /// Error classification.
    pub kind: ErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl PropagationError {
    /// Error of `kind` with no host, hash or position attached.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            host: None,
            hash: None,
            position: None,
            kind,
            message: message.into(),
        }
    }

    /// Failure reported by, or on the way to, `host`.
    pub fn from_client(host: &HostAddress, error: &ClientError) -> Self {
        let RemoteError { kind, message } = error.to_remote();
        Self::new(kind, message).with_host(host.clone())
    }

    /// Attach the host.
    pub fn with_host(mut self, host: HostAddress) -> Self {
        self.host = Some(host);
        self
    }

    /// Attach the hash.
    pub fn with_hash(mut self, hash: ChunkHash) -> Self {
        self.hash = Some(hash);
        self
    }

    /// Attach the input position.
    pub fn at(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }

    /// Wire form.
    pub fn to_remote(&self) -> RemoteError {
        RemoteError::new(self.kind, self.to_string())
    }
}

impl fmt::Display for PropagationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(host) = &self.host {
            write!(f, "{host}: ")?;
        }
        if let Some(hash) = &self.hash {
            write!(f, "{hash}: ")?;
        }
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Value of a routed operation plus every per-host failure met on the way.
///
/// Per-host failures never fail the operation as a whole; callers inspect
/// [`errors`](Self::errors). The value is aligned with the operation's input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationResult<T> {
    /// The merged outcome.
    pub value: T,
    /// Failures recorded while producing it.
    pub errors: Vec<PropagationError>,
}

impl<T> PropagationResult<T> {
    /// Result with the given value and errors.
    pub fn new(value: T, errors: Vec<PropagationError>) -> Self {
        Self { value, errors }
    }

    /// Result with no errors.
    pub fn ok(value: T) -> Self {
        Self::new(value, Vec::new())
    }

    /// Whether no failure was recorded.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Errors recorded for input `position`.
    pub fn errors_at(&self, position: usize) -> impl Iterator<Item = &PropagationError> {
        self.errors
            .iter()
            .filter(move |error| error.position == Some(position))
    }

    /// Transform the value, keeping the errors.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> PropagationResult<U> {
        PropagationResult {
            value: f(self.value),
            errors: self.errors,
        }
    }
}

impl PropagationResult<Vec<bool>> {
    /// Per-target outcomes for the wire, aligned with the targets.
    pub fn to_reply(&self) -> Vec<Result<(), RemoteError>> {
        self.value
            .iter()
            .enumerate()
            .map(|(position, &ok)| {
                if ok {
                    return Ok(());
                }
                Err(self
                    .errors_at(position)
                    .last()
                    .map(PropagationError::to_remote)
                    .unwrap_or_else(|| RemoteError::new(ErrorKind::Server, "no outcome recorded")))
            })
            .collect()
    }
}
