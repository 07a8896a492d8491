//! An in-memory chunk server speaking the wire protocol.

use std::{
    collections::{BTreeMap, BTreeSet},
    io,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use chunknet_net_protocol::{
    AddChunk, BackendConfiguration, ChunkQuery, ChunkReply, DeleteChunk, ErrorKind, HashRange,
    HashScope, NonceBook, NonceQuery, NonceReply, PresenceReply, RemoteError, Request,
    SetConfiguration, encode_outcome,
};
use chunknet_net_transport::{FrameHandler, FrameServer, Reply, TransportConfig};
use chunknet_primitives::{ChunkHash, ChunkKind, HashSpan, HostAddress, spans_cover};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tracing::trace;

type Outcome<T> = Result<T, RemoteError>;

/// Chunk server state, shared between the test and the serving task.
#[derive(Debug)]
struct Store {
    config: RwLock<BackendConfiguration>,
    data: RwLock<BTreeMap<ChunkHash, Vec<u8>>>,
    meta: RwLock<BTreeMap<ChunkHash, Vec<u8>>>,
    projects: RwLock<BTreeSet<ChunkHash>>,
    nonces: NonceBook,
    capacity: Option<usize>,
    used: AtomicUsize,
    requests: AtomicUsize,
    stall: watch::Sender<bool>,
}

impl Store {
    fn chunks(&self, kind: ChunkKind) -> &RwLock<BTreeMap<ChunkHash, Vec<u8>>> {
        match kind {
            ChunkKind::Data => &self.data,
            ChunkKind::Meta => &self.meta,
        }
    }

    fn covers(&self, hash: &ChunkHash) -> bool {
        spans_cover(&self.config.read().spans, hash)
    }

    fn ensure_covers(&self, hash: &ChunkHash) -> Outcome<()> {
        if self.covers(hash) {
            return Ok(());
        }
        Err(RemoteError::new(
            ErrorKind::DoesNotBelong,
            format!("{hash} is outside this host's spans"),
        ))
    }

    async fn wait_unstalled(&self) {
        let mut stall = self.stall.subscribe();
        loop {
            if !*stall.borrow_and_update() {
                return;
            }
            if stall.changed().await.is_err() {
                return;
            }
        }
    }

    fn get(&self, kind: ChunkKind, query: ChunkQuery) -> Outcome<ChunkReply> {
        for hash in &query.hashes {
            self.ensure_covers(hash)?;
        }
        let chunks = self.chunks(kind).read();
        Ok(query
            .hashes
            .iter()
            .map(|hash| chunks.get(hash).cloned())
            .collect())
    }

    fn has(&self, kind: ChunkKind, query: ChunkQuery) -> PresenceReply {
        let chunks = self.chunks(kind).read();
        query
            .hashes
            .iter()
            .map(|hash| chunks.contains_key(hash))
            .collect()
    }

    fn issue_nonces(&self, query: NonceQuery) -> Outcome<NonceReply> {
        if !query.hosts.is_empty() {
            return Err(RemoteError::new(
                ErrorKind::Malformed,
                "a chunk server only issues its own nonces",
            ));
        }
        Ok(vec![Ok(self.nonces.issue(query.count as usize))])
    }

    fn add(&self, kind: ChunkKind, add: AddChunk) -> Outcome<()> {
        self.ensure_covers(&add.hash)?;
        self.nonces.authorize(&add.auth, &add.hash, &add.data)?;

        let mut chunks = self.chunks(kind).write();
        if chunks.contains_key(&add.hash) {
            return Ok(());
        }
        if let Some(capacity) = self.capacity {
            let used = self.used.load(Ordering::Relaxed);
            if used + add.data.len() > capacity {
                return Err(RemoteError::new(
                    ErrorKind::OutOfSpace,
                    format!("{} bytes requested, {} free", add.data.len(), capacity - used),
                ));
            }
        }
        self.used.fetch_add(add.data.len(), Ordering::Relaxed);
        chunks.insert(add.hash, add.data);
        Ok(())
    }

    fn delete(&self, kind: ChunkKind, delete: DeleteChunk) -> Outcome<()> {
        self.nonces.authorize(&delete.auth, &delete.hash, &[])?;
        let removed = self.chunks(kind).write().remove(&delete.hash);
        match removed {
            Some(data) => {
                self.used.fetch_sub(data.len(), Ordering::Relaxed);
                if kind == ChunkKind::Meta {
                    self.projects.write().remove(&delete.hash);
                }
                Ok(())
            }
            None => Err(RemoteError::new(
                ErrorKind::NotFound,
                format!("{kind} chunk {} is not stored here", delete.hash),
            )),
        }
    }

    fn hashes(&self, scope: HashScope, range: HashRange) -> Vec<ChunkHash> {
        let window = |hashes: &mut dyn Iterator<Item = &ChunkHash>| -> Vec<ChunkHash> {
            hashes
                .skip(usize::try_from(range.offset).unwrap_or(usize::MAX))
                .take(range.limit as usize)
                .copied()
                .collect()
        };
        match scope {
            HashScope::Data => window(&mut self.data.read().keys()),
            HashScope::Meta => window(&mut self.meta.read().keys()),
            HashScope::Project => window(&mut self.projects.read().iter()),
        }
    }

    fn set_configuration(&self, update: SetConfiguration) -> Outcome<()> {
        let payload = update
            .config
            .signing_payload()
            .map_err(|e| RemoteError::new(ErrorKind::Malformed, e.to_string()))?;
        let digest = BackendConfiguration::signing_hash(&payload);
        self.nonces.authorize(&update.auth, &digest, &payload)?;
        *self.config.write() = update.config;
        Ok(())
    }

    fn add_server(&self, host: HostAddress) {
        let mut config = self.config.write();
        if !config.hosts.contains(&host) {
            config.hosts.push(host);
        }
    }
}

fn respond<T: Serialize>(outcome: Outcome<T>) -> Reply {
    Reply::Respond(encode_outcome(outcome))
}

#[async_trait]
impl FrameHandler for Store {
    async fn handle(&self, payload: Bytes) -> Reply {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.wait_unstalled().await;

        let request = match Request::decode(&payload) {
            Ok(request) => request,
            Err(error) => {
                return respond::<()>(Err(RemoteError::new(ErrorKind::Malformed, error.to_string())));
            }
        };
        trace!(opcode = %request.opcode(), "mock backend request");

        match request {
            Request::Get(kind, query) => respond(self.get(kind, query)),
            Request::Has(kind, query) => respond(Ok(self.has(kind, query))),
            Request::GetNonces(query) => respond(self.issue_nonces(query)),
            Request::Add(kind, add) => respond(self.add(kind, add)),
            Request::AddRemote(..) => respond::<()>(Err(RemoteError::new(
                ErrorKind::Malformed,
                "a chunk server does not propagate writes",
            ))),
            Request::Delete(kind, delete) => respond(self.delete(kind, delete)),
            Request::GetHashes(scope, range) => respond(Ok(self.hashes(scope, range))),
            Request::GetConfiguration => respond(Ok(self.config.read().clone())),
            Request::SetConfiguration(update) => respond(self.set_configuration(update)),
            Request::AddServer(host) => {
                self.add_server(host);
                respond(Ok(()))
            }
            Request::GetKnownServers => respond(Ok(self.config.read().hosts.clone())),
            Request::Close => Reply::Close,
        }
    }
}

/// Builder for a [`MockBackend`].
#[derive(Debug, Default)]
pub struct MockBackendBuilder {
    spans: Vec<HashSpan>,
    capacity: Option<usize>,
    idle_timeout_ms: Option<u64>,
}

impl MockBackendBuilder {
    /// Own `span`.
    pub fn span(mut self, span: HashSpan) -> Self {
        self.spans.push(span);
        self
    }

    /// Own every span in `spans`.
    pub fn spans(mut self, spans: impl IntoIterator<Item = HashSpan>) -> Self {
        self.spans.extend(spans);
        self
    }

    /// Reject writes once `bytes` of chunk data are stored.
    pub fn capacity(mut self, bytes: usize) -> Self {
        self.capacity = Some(bytes);
        self
    }

    /// Advertise an idle timeout in the served configuration.
    pub fn idle_timeout_ms(mut self, ms: u64) -> Self {
        self.idle_timeout_ms = Some(ms);
        self
    }

    /// Bind to an ephemeral port on 127.0.0.1 and start serving.
    pub async fn start(self) -> io::Result<MockBackend> {
        let (stall, _) = watch::channel(false);
        let store = Arc::new(Store {
            config: RwLock::new(BackendConfiguration {
                spans: self.spans,
                idle_timeout_ms: self.idle_timeout_ms,
                ..BackendConfiguration::default()
            }),
            data: RwLock::default(),
            meta: RwLock::default(),
            projects: RwLock::default(),
            nonces: NonceBook::default(),
            capacity: self.capacity,
            used: AtomicUsize::new(0),
            requests: AtomicUsize::new(0),
            stall,
        });
        let handler: Arc<dyn FrameHandler> = store.clone();
        let server = FrameServer::bind("127.0.0.1:0", handler, TransportConfig::default()).await?;
        let host = HostAddress::from(server.local_addr());
        Ok(MockBackend {
            server,
            host,
            store,
        })
    }
}

/// A chunk server holding chunks in memory.
///
/// It owns a set of spans, issues single-use nonces, verifies write
/// signatures, optionally enforces a capacity, and counts every request it
/// receives. Tests can drop its connections or stall its responses.
#[derive(Debug)]
pub struct MockBackend {
    server: FrameServer,
    host: HostAddress,
    store: Arc<Store>,
}

impl MockBackend {
    /// Start building a backend.
    pub fn builder() -> MockBackendBuilder {
        MockBackendBuilder::default()
    }

    /// Start a backend owning `spans`.
    pub async fn start(spans: impl IntoIterator<Item = HashSpan>) -> io::Result<Self> {
        Self::builder().spans(spans).start().await
    }

    /// Address the backend listens on.
    pub fn host(&self) -> &HostAddress {
        &self.host
    }

    /// Spans the backend currently owns.
    pub fn spans(&self) -> Vec<HashSpan> {
        self.store.config.read().spans.clone()
    }

    /// Store a chunk directly, bypassing the network and signatures.
    pub fn insert(&self, kind: ChunkKind, hash: ChunkHash, data: impl Into<Vec<u8>>) {
        let data = data.into();
        self.store.used.fetch_add(data.len(), Ordering::Relaxed);
        self.store.chunks(kind).write().insert(hash, data);
    }

    /// Record a stored metadata chunk as the head of a project.
    pub fn mark_project(&self, hash: ChunkHash) {
        self.store.projects.write().insert(hash);
    }

    /// Stored bytes of a chunk.
    pub fn chunk(&self, kind: ChunkKind, hash: &ChunkHash) -> Option<Vec<u8>> {
        self.store.chunks(kind).read().get(hash).cloned()
    }

    /// Whether a chunk is stored.
    pub fn contains(&self, kind: ChunkKind, hash: &ChunkHash) -> bool {
        self.store.chunks(kind).read().contains_key(hash)
    }

    /// Requests received since start or the last reset.
    pub fn requests(&self) -> usize {
        self.store.requests.load(Ordering::Relaxed)
    }

    /// Reset the request counter.
    pub fn reset_requests(&self) {
        self.store.requests.store(0, Ordering::Relaxed);
    }

    /// Nonces issued and not yet consumed.
    pub fn outstanding_nonces(&self) -> usize {
        self.store.nonces.outstanding()
    }

    /// Connections accepted since start.
    pub fn accepted_connections(&self) -> usize {
        self.server.accepted_connections()
    }

    /// Drop every open connection.
    pub fn drop_connections(&self) {
        self.server.drop_connections();
    }

    /// Hold every response until [`resume`](Self::resume) is called.
    pub fn stall(&self) {
        self.store.stall.send_replace(true);
    }

    /// Release stalled responses.
    pub fn resume(&self) {
        self.store.stall.send_replace(false);
    }

    /// Stop the backend.
    pub async fn shutdown(self) {
        self.server.shutdown().await;
    }
}
