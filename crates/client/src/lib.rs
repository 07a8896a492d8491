//! Client side of the chunk network.
//!
//! [`BackendClient`] exposes every backend operation as a typed async method
//! over one multiplexed connection. [`ConnectionPool`] hands out clients per
//! caller session and backend, creating connections lazily.

mod client;
mod error;
mod pool;

pub use client::BackendClient;
pub use error::ClientError;
pub use pool::{ConnectionPool, SessionId};
