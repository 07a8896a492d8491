//! Multiplexed request/response transport.
//!
//! One [`Connection`] per backend carries any number of concurrent requests
//! over a single socket. Every request gets an id from a shared
//! [`RequestIdGenerator`]; the backend answers each request with a frame
//! carrying the same id. The connection heals itself: a failed or idle
//! socket is replaced, and requests that can no longer be answered resolve
//! with a [`TransportError`] instead of hanging.
//!
//! The serving side is [`FrameServer`], which dispatches payloads to a
//! [`FrameHandler`].

mod config;
mod connection;
mod dialer;
mod error;
mod ids;
mod io;
mod link;
mod metrics;
mod pending;
mod server;
mod state;

pub use config::{
    DEFAULT_CLOSE_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_IDLE_TIMEOUT, TransportConfig,
};
pub use connection::Connection;
pub use dialer::{AsyncIo, BoxedIo, Dialer, TcpDialer};
pub use error::TransportError;
pub use ids::RequestIdGenerator;
pub use pending::{PendingResponse, PendingTable};
pub use server::{FrameHandler, FrameServer, Reply, serve_connection};
pub use state::ConnectionState;
