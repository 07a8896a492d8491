//! Connection lifecycle.

/// Observable state of a [`Connection`](crate::Connection).
///
/// A connection exists only once its first dial has succeeded, so it starts
/// out `Connected`. A lost socket moves it to `Connecting` until the redial
/// settles. `Closed` is terminal and is published only after every pending
/// request has been resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    /// A redial is in progress.
    Connecting,
    /// A socket is open and requests flow.
    Connected,
    /// The connection has shut down for good.
    Closed,
}

impl ConnectionState {
    /// Whether the state is terminal.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}
