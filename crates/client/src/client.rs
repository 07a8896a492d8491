//! Typed operations against one backend or routing endpoint.

use std::{sync::Arc, time::Duration};

use chunknet_net_protocol::{
    AddChunk, AddChunkRemote, BackendConfiguration, ChunkQuery, ChunkReply, DeleteChunk,
    ErrorKind, HashListReply, HashRange, HashScope, HostWrite, NonceQuery, NonceReply,
    PresenceReply, PropagationReply, RemoteError, Request, SetConfiguration, WriteAuth,
    decode_response,
};
use chunknet_net_transport::{Connection, Dialer, RequestIdGenerator, TransportConfig};
use chunknet_primitives::{ChunkHash, ChunkKind, Credentials, HostAddress, Nonce};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::ClientError;

/// Client for a single endpoint, speaking over one multiplexed [`Connection`].
///
/// Every method sends one request (signed writes send two: a nonce fetch and
/// the write) and waits for its response. Methods can be called concurrently;
/// the requests share the socket.
#[derive(Debug)]
pub struct BackendClient {
    connection: Connection,
}

impl BackendClient {
    /// Connect to `host`.
    pub async fn connect(
        host: HostAddress,
        dialer: Arc<dyn Dialer>,
        config: TransportConfig,
        ids: Arc<RequestIdGenerator>,
    ) -> Result<Self, ClientError> {
        let connection = Connection::connect(host, dialer, config, ids).await?;
        Ok(Self { connection })
    }

    /// Connect to `host` over plain TCP with default settings.
    pub async fn connect_tcp(host: HostAddress) -> Result<Self, ClientError> {
        let connection = Connection::connect_tcp(host, TransportConfig::default()).await?;
        Ok(Self { connection })
    }

    /// Wrap an existing connection.
    pub fn from_connection(connection: Connection) -> Self {
        Self { connection }
    }

    /// Endpoint this client talks to.
    pub fn host(&self) -> &HostAddress {
        self.connection.host()
    }

    /// Underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Whether the connection has shut down.
    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    async fn call<T: DeserializeOwned>(&self, request: &Request) -> Result<T, ClientError> {
        let opcode = request.opcode();
        let payload = request.encode()?;
        trace!(host = %self.host(), %opcode, "sending request");
        let response = self.connection.request(payload).await?;
        decode_response::<T>(&response)?.map_err(|error| {
            trace!(host = %self.host(), %opcode, %error, "request rejected");
            ClientError::from(error)
        })
    }

    // ---- reads ----

    /// Fetch one chunk; a missing chunk is [`ClientError::NotFound`].
    pub async fn get(&self, kind: ChunkKind, hash: ChunkHash) -> Result<Vec<u8>, ClientError> {
        self.get_batch(kind, &[hash])
            .await?
            .into_iter()
            .next()
            .flatten()
            .ok_or_else(|| ClientError::NotFound(format!("{kind} chunk {hash} on {}", self.host())))
    }

    /// Fetch several chunks in one round trip, aligned with `hashes`.
    pub async fn get_batch(
        &self,
        kind: ChunkKind,
        hashes: &[ChunkHash],
    ) -> Result<ChunkReply, ClientError> {
        let reply: ChunkReply = self
            .call(&Request::Get(kind, ChunkQuery { hashes: hashes.to_vec() }))
            .await?;
        expect_aligned(&reply, hashes.len(), "chunk")?;
        Ok(reply)
    }

    /// Fetch one data chunk.
    pub async fn get_data(&self, hash: ChunkHash) -> Result<Vec<u8>, ClientError> {
        self.get(ChunkKind::Data, hash).await
    }

    /// Fetch one metadata chunk.
    pub async fn get_meta_data(&self, hash: ChunkHash) -> Result<Vec<u8>, ClientError> {
        self.get(ChunkKind::Meta, hash).await
    }

    /// Whether the endpoint holds `hash`.
    pub async fn has(&self, kind: ChunkKind, hash: ChunkHash) -> Result<bool, ClientError> {
        Ok(self
            .has_batch(kind, &[hash])
            .await?
            .into_iter()
            .next()
            .unwrap_or(false))
    }

    /// Presence of several hashes in one round trip, aligned with `hashes`.
    pub async fn has_batch(
        &self,
        kind: ChunkKind,
        hashes: &[ChunkHash],
    ) -> Result<PresenceReply, ClientError> {
        let reply: PresenceReply = self
            .call(&Request::Has(kind, ChunkQuery { hashes: hashes.to_vec() }))
            .await?;
        expect_aligned(&reply, hashes.len(), "presence")?;
        Ok(reply)
    }

    /// Whether the endpoint holds the data chunk `hash`.
    pub async fn has_data(&self, hash: ChunkHash) -> Result<bool, ClientError> {
        self.has(ChunkKind::Data, hash).await
    }

    /// Whether the endpoint holds the metadata chunk `hash`.
    pub async fn has_meta_data(&self, hash: ChunkHash) -> Result<bool, ClientError> {
        self.has(ChunkKind::Meta, hash).await
    }

    // ---- nonces ----

    /// Fetch `count` nonces issued by the endpoint itself.
    pub async fn get_nonces(&self, count: u32) -> Result<Vec<Nonce>, ClientError> {
        let reply: NonceReply = self
            .call(&Request::GetNonces(NonceQuery { count, hosts: Vec::new() }))
            .await?;
        let nonces = reply
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::UnexpectedResponse("empty nonce reply".into()))??;
        if nonces.len() != count as usize {
            return Err(ClientError::UnexpectedResponse(format!(
                "asked for {count} nonces, got {}",
                nonces.len()
            )));
        }
        Ok(nonces)
    }

    /// Fetch a single nonce issued by the endpoint.
    pub async fn get_nonce(&self) -> Result<Nonce, ClientError> {
        self.get_nonces(1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::UnexpectedResponse("no nonce issued".into()))
    }

    /// Ask a routing endpoint for `count` nonces from each of `hosts`.
    ///
    /// Per-host failures are returned in place, aligned with `hosts`.
    pub async fn get_remote_nonces(
        &self,
        hosts: &[HostAddress],
        count: u32,
    ) -> Result<NonceReply, ClientError> {
        let reply: NonceReply = self
            .call(&Request::GetNonces(NonceQuery {
                count,
                hosts: hosts.to_vec(),
            }))
            .await?;
        expect_aligned(&reply, hosts.len(), "nonce")?;
        Ok(reply)
    }

    // ---- writes ----

    /// Store a chunk on the endpoint, signed against a freshly fetched nonce.
    pub async fn set(
        &self,
        kind: ChunkKind,
        hash: ChunkHash,
        data: &[u8],
        credentials: &Credentials,
    ) -> Result<(), ClientError> {
        let nonce = self.get_nonce().await?;
        let signature = credentials.sign(&nonce, &hash, data)?;
        self.set_with_auth(kind, hash, data, WriteAuth { nonce, signature })
            .await
    }

    /// Store a chunk under an authorisation signed elsewhere against a nonce
    /// this endpoint issued.
    pub async fn set_with_auth(
        &self,
        kind: ChunkKind,
        hash: ChunkHash,
        data: &[u8],
        auth: WriteAuth,
    ) -> Result<(), ClientError> {
        self.call::<()>(&Request::Add(
            kind,
            AddChunk {
                hash,
                data: data.to_vec(),
                auth,
            },
        ))
        .await?;
        debug!(host = %self.host(), %kind, %hash, "chunk stored");
        Ok(())
    }

    /// Store a data chunk.
    pub async fn set_data(
        &self,
        hash: ChunkHash,
        data: &[u8],
        credentials: &Credentials,
    ) -> Result<(), ClientError> {
        self.set(ChunkKind::Data, hash, data, credentials).await
    }

    /// Store a metadata chunk.
    pub async fn set_meta_data(
        &self,
        hash: ChunkHash,
        data: &[u8],
        credentials: &Credentials,
    ) -> Result<(), ClientError> {
        self.set(ChunkKind::Meta, hash, data, credentials).await
    }

    /// Store a chunk on each of `hosts` through a routing endpoint.
    ///
    /// Nonces are obtained from every target through the endpoint and each
    /// write is signed here. An empty `hosts` fails with
    /// [`ClientError::NoHostProvided`] before anything is sent. The reply is
    /// aligned with `hosts`.
    pub async fn set_remote(
        &self,
        kind: ChunkKind,
        hash: ChunkHash,
        data: &[u8],
        credentials: &Credentials,
        hosts: &[HostAddress],
    ) -> Result<PropagationReply, ClientError> {
        if hosts.is_empty() {
            return Err(ClientError::NoHostProvided(format!(
                "write of {kind} chunk {hash} names no target hosts"
            )));
        }

        let issued = self.get_remote_nonces(hosts, 1).await?;
        // `None` marks a target that is part of the propagated write.
        let mut outcomes: Vec<Option<Result<(), RemoteError>>> = Vec::with_capacity(hosts.len());
        let mut targets = Vec::with_capacity(hosts.len());
        for (host, nonces) in hosts.iter().zip(issued) {
            match first_nonce(host, nonces) {
                Ok(nonce) => {
                    let signature = credentials.sign(&nonce, &hash, data)?;
                    targets.push(HostWrite {
                        host: host.clone(),
                        auth: WriteAuth { nonce, signature },
                    });
                    outcomes.push(None);
                }
                Err(error) => outcomes.push(Some(Err(error))),
            }
        }

        let mut delivered = if targets.is_empty() {
            Vec::new()
        } else {
            let expected = targets.len();
            let reply: PropagationReply = self
                .call(&Request::AddRemote(
                    kind,
                    AddChunkRemote {
                        hash,
                        data: data.to_vec(),
                        targets,
                    },
                ))
                .await?;
            expect_aligned(&reply, expected, "propagation")?;
            reply
        }
        .into_iter();

        Ok(outcomes
            .into_iter()
            .map(|outcome| {
                outcome.or_else(|| delivered.next()).unwrap_or_else(|| {
                    Err(RemoteError::new(ErrorKind::Server, "missing propagation outcome"))
                })
            })
            .collect())
    }

    /// Propagate a data chunk to `hosts` through a routing endpoint.
    pub async fn set_data_remote(
        &self,
        hash: ChunkHash,
        data: &[u8],
        credentials: &Credentials,
        hosts: &[HostAddress],
    ) -> Result<PropagationReply, ClientError> {
        self.set_remote(ChunkKind::Data, hash, data, credentials, hosts).await
    }

    /// Propagate a metadata chunk to `hosts` through a routing endpoint.
    pub async fn set_meta_data_remote(
        &self,
        hash: ChunkHash,
        data: &[u8],
        credentials: &Credentials,
        hosts: &[HostAddress],
    ) -> Result<PropagationReply, ClientError> {
        self.set_remote(ChunkKind::Meta, hash, data, credentials, hosts).await
    }

    // ---- deletes ----

    async fn delete_auth(
        &self,
        hash: ChunkHash,
        credentials: &Credentials,
    ) -> Result<WriteAuth, ClientError> {
        let nonce = self.get_nonce().await?;
        let signature = credentials.sign(&nonce, &hash, &[])?;
        Ok(WriteAuth { nonce, signature })
    }

    /// Delete a chunk held by the endpoint itself.
    pub async fn delete(
        &self,
        kind: ChunkKind,
        hash: ChunkHash,
        credentials: &Credentials,
    ) -> Result<(), ClientError> {
        let auth = self.delete_auth(hash, credentials).await?;
        self.delete_with_auth(kind, hash, auth).await
    }

    /// Delete a chunk under an authorisation signed elsewhere.
    pub async fn delete_with_auth(
        &self,
        kind: ChunkKind,
        hash: ChunkHash,
        auth: WriteAuth,
    ) -> Result<(), ClientError> {
        self.call::<()>(&Request::Delete(
            kind,
            DeleteChunk {
                hash,
                auth,
                hosts: Vec::new(),
            },
        ))
        .await?;
        debug!(host = %self.host(), %kind, %hash, "chunk deleted");
        Ok(())
    }

    /// Delete a data chunk held by the endpoint.
    pub async fn delete_data(
        &self,
        hash: ChunkHash,
        credentials: &Credentials,
    ) -> Result<(), ClientError> {
        self.delete(ChunkKind::Data, hash, credentials).await
    }

    /// Delete a metadata chunk held by the endpoint.
    pub async fn delete_meta_data(
        &self,
        hash: ChunkHash,
        credentials: &Credentials,
    ) -> Result<(), ClientError> {
        self.delete(ChunkKind::Meta, hash, credentials).await
    }

    /// Ask a routing endpoint to delete a chunk from each of `hosts`.
    ///
    /// An empty `hosts` fails with [`ClientError::NoHostProvided`] before
    /// anything is sent. The reply is aligned with `hosts`.
    pub async fn delete_remote(
        &self,
        kind: ChunkKind,
        hash: ChunkHash,
        credentials: &Credentials,
        hosts: &[HostAddress],
    ) -> Result<PropagationReply, ClientError> {
        if hosts.is_empty() {
            return Err(ClientError::NoHostProvided(format!(
                "delete of {kind} chunk {hash} names no target hosts"
            )));
        }
        let auth = self.delete_auth(hash, credentials).await?;
        let reply: PropagationReply = self
            .call(&Request::Delete(
                kind,
                DeleteChunk {
                    hash,
                    auth,
                    hosts: hosts.to_vec(),
                },
            ))
            .await?;
        expect_aligned(&reply, hosts.len(), "propagation")?;
        Ok(reply)
    }

    // ---- configuration ----

    /// Fetch the endpoint's configuration and adopt its idle timeout.
    pub async fn get_configuration(&self) -> Result<BackendConfiguration, ClientError> {
        let config: BackendConfiguration = self.call(&Request::GetConfiguration).await?;
        if let Some(ms) = config.idle_timeout_ms {
            self.connection.set_idle_timeout(Duration::from_millis(ms));
            debug!(host = %self.host(), idle_timeout_ms = ms, "adopted advertised idle timeout");
        }
        Ok(config)
    }

    /// Replace the endpoint's configuration.
    pub async fn set_configuration(
        &self,
        config: BackendConfiguration,
        credentials: &Credentials,
    ) -> Result<(), ClientError> {
        let nonce = self.get_nonce().await?;
        let payload = config.signing_payload()?;
        let digest = BackendConfiguration::signing_hash(&payload);
        let signature = credentials.sign(&nonce, &digest, &payload)?;
        self.call(&Request::SetConfiguration(SetConfiguration {
            config,
            auth: WriteAuth { nonce, signature },
        }))
        .await
    }

    // ---- listings ----

    /// A window of the endpoint's hashes in ascending order.
    pub async fn get_hashes(
        &self,
        scope: HashScope,
        offset: u64,
        limit: u32,
    ) -> Result<HashListReply, ClientError> {
        self.call(&Request::GetHashes(scope, HashRange { offset, limit }))
            .await
    }

    /// A window of stored data chunk hashes.
    pub async fn get_data_hashes(
        &self,
        offset: u64,
        limit: u32,
    ) -> Result<HashListReply, ClientError> {
        self.get_hashes(HashScope::Data, offset, limit).await
    }

    /// A window of stored metadata chunk hashes.
    pub async fn get_meta_data_hashes(
        &self,
        offset: u64,
        limit: u32,
    ) -> Result<HashListReply, ClientError> {
        self.get_hashes(HashScope::Meta, offset, limit).await
    }

    /// A window of project metadata hashes.
    pub async fn get_project_hashes(
        &self,
        offset: u64,
        limit: u32,
    ) -> Result<HashListReply, ClientError> {
        self.get_hashes(HashScope::Project, offset, limit).await
    }

    // ---- host registry ----

    /// Tell the endpoint about another host.
    pub async fn register_server(&self, host: &HostAddress) -> Result<(), ClientError> {
        self.call(&Request::AddServer(host.clone())).await
    }

    /// Hosts the endpoint knows about.
    pub async fn get_known_servers(&self) -> Result<Vec<HostAddress>, ClientError> {
        self.call(&Request::GetKnownServers).await
    }

    /// Politely close the connection, resolving anything still in flight.
    pub async fn close(&self) {
        self.connection.close(Request::Close.encode().ok()).await;
    }
}

fn expect_aligned<T>(reply: &[T], expected: usize, what: &str) -> Result<(), ClientError> {
    if reply.len() == expected {
        return Ok(());
    }
    Err(ClientError::UnexpectedResponse(format!(
        "{what} reply has {} entries for {expected} inputs",
        reply.len()
    )))
}

fn first_nonce(
    host: &HostAddress,
    issued: Result<Vec<Nonce>, RemoteError>,
) -> Result<Nonce, RemoteError> {
    issued?
        .into_iter()
        .next()
        .ok_or_else(|| RemoteError::new(ErrorKind::Server, format!("{host} issued no nonce")))
}
