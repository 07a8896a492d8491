//! Serving a coordinator over the wire protocol.

use std::{io, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use chunknet_net_protocol::{
    AddChunk, AddChunkRemote, BackendConfiguration, ChunkQuery, ChunkReply, DeleteChunk,
    ErrorKind, NonceBook, NonceQuery, NonceReply, PropagationReply, RemoteError, Request,
    encode_outcome,
};
use chunknet_net_transport::{FrameHandler, FrameServer, Reply, TransportConfig};
use chunknet_primitives::{ChunkKind, HostAddress};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::net::ToSocketAddrs;
use tracing::{debug, trace};

use crate::{CoordinatorError, PropagationResult, RoutingCoordinator};

type Outcome<T> = Result<T, RemoteError>;

/// A routing endpoint: a [`RoutingCoordinator`] behind the backend protocol.
///
/// Clients talk to it exactly as to a chunk server, so routing endpoints can
/// be chained. Reads route by span coverage. Propagated writes and deletes
/// fan out to the hosts the caller names. A plain write addressed to the
/// endpoint itself is verified and then replicated to the covering backends
/// under the coordinator's authority, as are propagated deletes.
///
/// The endpoint issues and checks its own nonces for writes addressed to it.
#[derive(Debug)]
pub struct RoutingServer {
    coordinator: RoutingCoordinator,
    nonces: NonceBook,
    known: RwLock<Vec<HostAddress>>,
}

impl RoutingServer {
    /// Serve `coordinator`.
    pub fn new(coordinator: RoutingCoordinator) -> Self {
        let known = coordinator.index().hosts().cloned().collect();
        Self {
            coordinator,
            nonces: NonceBook::default(),
            known: RwLock::new(known),
        }
    }

    /// The served coordinator.
    pub fn coordinator(&self) -> &RoutingCoordinator {
        &self.coordinator
    }

    /// Listen on `addr` and serve until the returned server is shut down.
    pub async fn bind(
        self,
        addr: impl ToSocketAddrs,
        config: TransportConfig,
    ) -> io::Result<FrameServer> {
        let server = FrameServer::bind(addr, Arc::new(self), config).await?;
        debug!(addr = %server.local_addr(), "routing endpoint listening");
        Ok(server)
    }

    async fn get(&self, kind: ChunkKind, query: ChunkQuery) -> Outcome<ChunkReply> {
        let result = self.coordinator.get_batch(kind, &query.hashes).await;
        let nothing_found = result.value.iter().all(Option::is_none);
        if nothing_found && let Some(error) = result.errors.first() {
            return Err(error.to_remote());
        }
        log_errors("get", &result);
        Ok(result.value)
    }

    async fn nonces(&self, query: NonceQuery) -> NonceReply {
        if query.hosts.is_empty() {
            return vec![Ok(self.nonces.issue(query.count as usize))];
        }
        let result = self.coordinator.get_nonces(&query.hosts, query.count).await;
        result
            .value
            .iter()
            .enumerate()
            .map(|(position, nonces)| match nonces {
                Some(nonces) => Ok(nonces.clone()),
                None => Err(result
                    .errors_at(position)
                    .last()
                    .map(|error| error.to_remote())
                    .unwrap_or_else(|| RemoteError::new(ErrorKind::Server, "no nonces issued"))),
            })
            .collect()
    }

    async fn add(&self, kind: ChunkKind, add: AddChunk) -> Outcome<()> {
        self.nonces.authorize(&add.auth, &add.hash, &add.data)?;
        let result = self
            .coordinator
            .replicate(kind, add.hash, &add.data)
            .await
            .map_err(|e| e.to_remote())?;
        if result.value.is_empty() {
            return Err(result
                .errors
                .last()
                .map(|error| error.to_remote())
                .unwrap_or_else(|| RemoteError::new(ErrorKind::Server, "no backend stored the chunk")));
        }
        log_errors("replicated write", &result);
        Ok(())
    }

    async fn add_remote(&self, kind: ChunkKind, add: AddChunkRemote) -> Outcome<PropagationReply> {
        let result = self
            .coordinator
            .propagate_signed(kind, add.hash, &add.data, &add.targets)
            .await
            .map_err(|e| e.to_remote())?;
        Ok(result.to_reply())
    }

    async fn delete(&self, kind: ChunkKind, delete: DeleteChunk) -> Outcome<PropagationReply> {
        if delete.hosts.is_empty() {
            return Err(CoordinatorError::NoHostProvided {
                operation: "delete",
                kind,
                hash: delete.hash,
            }
            .to_remote());
        }
        let authority = self.coordinator.authority().cloned().ok_or_else(|| {
            CoordinatorError::NoSigningAuthority {
                operation: "delete",
                hash: delete.hash,
            }
            .to_remote()
        })?;
        self.nonces.authorize(&delete.auth, &delete.hash, &[])?;

        let result = self
            .coordinator
            .delete(kind, delete.hash, &authority, &delete.hosts)
            .await
            .map_err(|e| e.to_remote())?;
        Ok(result.to_reply())
    }

    fn configuration(&self) -> BackendConfiguration {
        BackendConfiguration {
            spans: self.coordinator.index().union(),
            hosts: self.known.read().clone(),
            ..BackendConfiguration::default()
        }
    }

    fn add_server(&self, host: HostAddress) {
        let mut known = self.known.write();
        if !known.contains(&host) {
            debug!(%host, "registered server");
            known.push(host);
        }
    }
}

fn respond<T: Serialize>(outcome: Outcome<T>) -> Reply {
    Reply::Respond(encode_outcome(outcome))
}

fn log_errors<T>(operation: &str, result: &PropagationResult<T>) {
    for error in &result.errors {
        debug!(operation, %error, "partial failure");
    }
}

#[async_trait]
impl FrameHandler for RoutingServer {
    async fn handle(&self, payload: Bytes) -> Reply {
        let request = match Request::decode(&payload) {
            Ok(request) => request,
            Err(error) => {
                return respond::<()>(Err(RemoteError::new(ErrorKind::Malformed, error.to_string())));
            }
        };
        trace!(opcode = %request.opcode(), "routing request");

        match request {
            Request::Get(kind, query) => respond(self.get(kind, query).await),
            Request::Has(kind, query) => {
                let result = self.coordinator.has_batch(kind, &query.hashes).await;
                log_errors("has", &result);
                respond(Ok(result.value))
            }
            Request::GetNonces(query) => respond(Ok(self.nonces(query).await)),
            Request::Add(kind, add) => respond(self.add(kind, add).await),
            Request::AddRemote(kind, add) => respond(self.add_remote(kind, add).await),
            Request::Delete(kind, delete) => respond(self.delete(kind, delete).await),
            Request::GetHashes(scope, range) => {
                let result = self
                    .coordinator
                    .get_hashes(scope, range.offset, range.limit)
                    .await;
                log_errors("hash listing", &result);
                respond(Ok(result.value))
            }
            Request::GetConfiguration => respond(Ok(self.configuration())),
            Request::SetConfiguration(_) => respond::<()>(Err(RemoteError::new(
                ErrorKind::SecurityError,
                "routing endpoint configuration is managed locally",
            ))),
            Request::AddServer(host) => {
                self.add_server(host);
                respond(Ok(()))
            }
            Request::GetKnownServers => respond(Ok(self.known.read().clone())),
            Request::Close => Reply::Close,
        }
    }
}
