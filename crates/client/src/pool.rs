//! Connection pool keyed by caller session.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use chunknet_net_transport::{Dialer, RequestIdGenerator, TcpDialer, TransportConfig};
use chunknet_primitives::HostAddress;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{BackendClient, ClientError};

/// Handle identifying one logical caller.
///
/// Each session gets its own connection to every backend it talks to, so
/// one caller's requests never share a socket with another's.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    derive_more::Display,
    derive_more::From,
)]
#[display("session-{_0}")]
pub struct SessionId(u64);

impl SessionId {
    /// Raw value.
    pub fn get(&self) -> u64 {
        self.0
    }
}

type PoolKey = (SessionId, HostAddress);
type Slot = Arc<Mutex<Option<Arc<BackendClient>>>>;

/// Lazily created clients, at most one live per (session, backend).
///
/// All connections share one request id generator. A client whose connection
/// has shut down is replaced on next use.
pub struct ConnectionPool {
    slots: DashMap<PoolKey, Slot>,
    dialer: Arc<dyn Dialer>,
    config: TransportConfig,
    ids: Arc<RequestIdGenerator>,
    next_session: AtomicU64,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("connections", &self.slots.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    /// Pool dialing over plain TCP.
    pub fn new(config: TransportConfig) -> Self {
        let dialer = Arc::new(TcpDialer::new(config.connect_timeout));
        Self::with_dialer(dialer, config)
    }

    /// Pool dialing through `dialer`.
    pub fn with_dialer(dialer: Arc<dyn Dialer>, config: TransportConfig) -> Self {
        Self {
            slots: DashMap::new(),
            dialer,
            config,
            ids: Arc::new(RequestIdGenerator::new()),
            next_session: AtomicU64::new(1),
        }
    }

    /// Transport settings applied to new connections.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Allocate a fresh session handle.
    pub fn open_session(&self) -> SessionId {
        SessionId(self.next_session.fetch_add(1, Ordering::Relaxed))
    }

    /// The client for `host` within `session`, connecting on first use.
    pub async fn client(
        &self,
        session: SessionId,
        host: &HostAddress,
    ) -> Result<Arc<BackendClient>, ClientError> {
        let slot = Arc::clone(&self.slots.entry((session, host.clone())).or_default());
        let mut slot = slot.lock().await;
        if let Some(client) = slot.as_ref().filter(|client| !client.is_closed()) {
            return Ok(Arc::clone(client));
        }

        let client = Arc::new(
            BackendClient::connect(
                host.clone(),
                Arc::clone(&self.dialer),
                self.config.clone(),
                Arc::clone(&self.ids),
            )
            .await?,
        );
        debug!(%session, %host, "opened pooled connection");
        *slot = Some(Arc::clone(&client));
        Ok(client)
    }

    /// Number of (session, backend) entries.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the pool holds no entries.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Close every connection of `session`.
    pub async fn close_session(&self, session: SessionId) {
        let keys: Vec<PoolKey> = self
            .slots
            .iter()
            .filter(|entry| entry.key().0 == session)
            .map(|entry| entry.key().clone())
            .collect();
        self.close_keys(keys).await;
    }

    /// Close every connection in the pool.
    pub async fn close_all(&self) {
        let keys: Vec<PoolKey> = self.slots.iter().map(|entry| entry.key().clone()).collect();
        self.close_keys(keys).await;
    }

    async fn close_keys(&self, keys: Vec<PoolKey>) {
        for key in keys {
            let Some((_, slot)) = self.slots.remove(&key) else {
                continue;
            };
            let client = slot.lock().await.take();
            if let Some(client) = client {
                client.close().await;
                debug!(session = %key.0, host = %key.1, "closed pooled connection");
            }
        }
    }
}
