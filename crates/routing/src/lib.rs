//! Routing tier of the chunk network.
//!
//! A [`RoutingCoordinator`] owns a [`HashSpanIndex`] over the managed
//! backends and turns one logical operation into calls on the backends that
//! own the hash:
//!
//! - **Reads** (`get`, `has`) go to covering backends that are online, moving
//!   on to the next replica when one fails.
//! - **Writes and deletes** go to an explicit host list, concurrently, each
//!   host with its own nonce and signature.
//!
//! Outcomes come back as a [`PropagationResult`]: a value aligned with the
//! input plus one [`PropagationError`] per failure. Only validation done
//! before any I/O fails the call itself, with a [`CoordinatorError`].
//!
//! [`RoutingServer`] exposes a coordinator over the backend wire protocol so
//! routing endpoints can be stacked.

mod config;
mod coordinator;
mod error;
mod health;
mod index;
mod metrics;
mod result;
mod server;

pub use config::{
    BackendConfig, ConfigError, DEFAULT_MAX_FAILURES, DEFAULT_OFFLINE_BACKOFF, RoutingConfig,
};
pub use coordinator::RoutingCoordinator;
pub use error::CoordinatorError;
pub use health::{BackendDescriptor, BackendHealth, BackendStatus};
pub use index::{HashSpanIndex, HostGroups};
pub use result::{PropagationError, PropagationResult};
pub use server::RoutingServer;
