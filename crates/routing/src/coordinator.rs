//! Routing of chunk operations to the backends that own them.

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    future::Future,
    sync::Arc,
};

use chunknet_client::{BackendClient, ClientError, ConnectionPool, SessionId};
use chunknet_net_protocol::{ErrorKind, HashScope, HostWrite};
use chunknet_primitives::{ChunkHash, ChunkKind, Credentials, HostAddress, Nonce};
use futures::future::join_all;
use tracing::{debug, trace};

use crate::{
    BackendDescriptor, BackendHealth, BackendStatus, CoordinatorError, HashSpanIndex,
    PropagationError, PropagationResult, RoutingConfig, metrics::RoutingMetrics,
};

#[derive(Debug)]
struct Inner {
    index: HashSpanIndex,
    backends: BTreeMap<HostAddress, BackendDescriptor>,
    pool: Arc<ConnectionPool>,
    metrics: RoutingMetrics,
}

/// A hash that a batched read has not resolved yet.
struct Unresolved {
    position: usize,
    hash: ChunkHash,
    candidates: VecDeque<HostAddress>,
    last_error: Option<PropagationError>,
    resolved: bool,
}

/// Entry point for routed chunk operations over a set of managed backends.
///
/// Reads pick backends by span coverage and move on to the next replica when
/// one fails. Writes and deletes go to an explicit host list, concurrently.
/// Either way per-host failures land in the returned [`PropagationResult`];
/// only validation that happens before any I/O returns a
/// [`CoordinatorError`].
///
/// Connections come from a [`ConnectionPool`] under this coordinator's
/// session. Clones share the pool, session, index and health state.
#[derive(Debug, Clone)]
pub struct RoutingCoordinator {
    inner: Arc<Inner>,
    session: SessionId,
    authority: Option<Credentials>,
}

impl RoutingCoordinator {
    /// Coordinator with its own connection pool and session.
    pub fn new(config: &RoutingConfig) -> Self {
        let pool = Arc::new(ConnectionPool::new(config.transport.clone()));
        let session = pool.open_session();
        Self::with_pool(config, pool, session)
    }

    /// Coordinator drawing connections from `pool` under `session`.
    ///
    /// A host listed more than once is managed as one backend owning the
    /// union of its spans.
    pub fn with_pool(config: &RoutingConfig, pool: Arc<ConnectionPool>, session: SessionId) -> Self {
        let index = HashSpanIndex::new(
            config
                .backends
                .iter()
                .map(|backend| (backend.address(), backend.spans.clone())),
        );
        // Descriptors take the merged spans so a host listed twice stays one backend.
        let backends: BTreeMap<HostAddress, BackendDescriptor> = index
            .hosts()
            .map(|host| {
                let spans = index.spans(host).map(<[_]>::to_vec).unwrap_or_default();
                let health = BackendHealth::new(config.max_failures, config.offline_backoff);
                (host.clone(), BackendDescriptor::new(host.clone(), spans, health))
            })
            .collect();
        debug!(backends = backends.len(), %session, "routing coordinator ready");
        Self {
            inner: Arc::new(Inner {
                index,
                backends,
                pool,
                metrics: RoutingMetrics::default(),
            }),
            session,
            authority: None,
        }
    }

    /// Give the coordinator its own signing authority, required for deletes.
    pub fn with_authority(mut self, authority: Credentials) -> Self {
        self.authority = Some(authority);
        self
    }

    /// Same backends and health state, different caller session.
    pub fn for_session(&self, session: SessionId) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            session,
            authority: self.authority.clone(),
        }
    }

    /// Session connections are opened under.
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// The coordinator's own signing authority.
    pub fn authority(&self) -> Option<&Credentials> {
        self.authority.as_ref()
    }

    /// Span index of the managed backends.
    pub fn index(&self) -> &HashSpanIndex {
        &self.inner.index
    }

    /// Connection pool.
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.inner.pool
    }

    /// Close this session's connections.
    pub async fn close(&self) {
        self.inner.pool.close_session(self.session).await;
    }

    fn is_online(&self, host: &HostAddress) -> bool {
        self.inner
            .backends
            .get(host)
            .is_none_or(BackendDescriptor::is_online)
    }

    /// Online hosts covering `hash`, in preference order.
    fn candidates(&self, hash: &ChunkHash) -> Vec<HostAddress> {
        self.inner
            .index
            .covering_hosts(hash)
            .into_iter()
            .filter(|host| self.is_online(host))
            .cloned()
            .collect()
    }

    fn no_matching_servers(&self, hash: ChunkHash) -> PropagationError {
        self.inner.metrics.inc_no_matching_servers();
        PropagationError::new(ErrorKind::NoMatchingServers, "no online backend covers the hash")
            .with_hash(hash)
    }

    /// Run `op` against the pooled client for `host`, tracking its health.
    async fn call<T, F, Fut>(&self, host: &HostAddress, op: F) -> Result<T, ClientError>
    where
        F: FnOnce(Arc<BackendClient>) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let result = match self.inner.pool.client(self.session, host).await {
            Ok(client) => op(client).await,
            Err(error) => Err(error),
        };

        if let Err(error) = &result {
            self.inner.metrics.inc_host_failures();
            trace!(%host, %error, "backend call failed");
        }
        // An answered error still proves the backend is reachable.
        if let Some(descriptor) = self.inner.backends.get(host) {
            match &result {
                Err(error) if error.is_transport() => descriptor.record_failure(),
                _ => descriptor.record_success(),
            }
        }
        result
    }

    /// Run `op` on every host concurrently; the value marks which succeeded.
    async fn fan_out<F, Fut>(
        &self,
        hosts: &[HostAddress],
        hash: ChunkHash,
        op: F,
    ) -> PropagationResult<Vec<bool>>
    where
        F: Fn(Arc<BackendClient>, usize) -> Fut,
        Fut: Future<Output = Result<(), ClientError>>,
    {
        self.inner.metrics.record_fanout(hosts.len());
        let op = &op;
        let outcomes = join_all(hosts.iter().enumerate().map(|(position, host)| {
            self.call(host, move |client| op(client, position))
        }))
        .await;

        let mut errors = Vec::new();
        let value = outcomes
            .into_iter()
            .zip(hosts)
            .enumerate()
            .map(|(position, (outcome, host))| match outcome {
                Ok(()) => true,
                Err(error) => {
                    errors.push(
                        PropagationError::from_client(host, &error)
                            .with_hash(hash)
                            .at(position),
                    );
                    false
                }
            })
            .collect();
        PropagationResult::new(value, errors)
    }

    // ---- reads ----

    /// Fetch one chunk from the first covering backend that has it.
    ///
    /// Every backend that fails on the way, including by not holding the
    /// chunk, is recorded. No covering online backend yields a single
    /// `NoMatchingServers` error without any I/O.
    pub async fn get(&self, kind: ChunkKind, hash: ChunkHash) -> PropagationResult<Option<Vec<u8>>> {
        let candidates = self.candidates(&hash);
        if candidates.is_empty() {
            return PropagationResult::new(None, vec![self.no_matching_servers(hash)]);
        }

        let mut errors = Vec::new();
        for host in candidates {
            self.inner.metrics.record_fanout(1);
            match self
                .call(&host, move |client| async move { client.get(kind, hash).await })
                .await
            {
                Ok(data) => return PropagationResult::new(Some(data), errors),
                Err(error) => {
                    errors.push(PropagationError::from_client(&host, &error).with_hash(hash));
                }
            }
        }
        PropagationResult::new(None, errors)
    }

    /// Fetch one data chunk.
    pub async fn get_data(&self, hash: ChunkHash) -> PropagationResult<Option<Vec<u8>>> {
        self.get(ChunkKind::Data, hash).await
    }

    /// Fetch one metadata chunk.
    pub async fn get_meta_data(&self, hash: ChunkHash) -> PropagationResult<Option<Vec<u8>>> {
        self.get(ChunkKind::Meta, hash).await
    }

    /// Fetch several chunks, aligned with `hashes`.
    ///
    /// Each round sends one batched request per backend. Hashes a backend
    /// failed or lacked move on to their next covering backend in the next
    /// round. Every hash left unresolved gets exactly one error: its last
    /// failure, or `NoMatchingServers` when nothing covered it.
    pub async fn get_batch(
        &self,
        kind: ChunkKind,
        hashes: &[ChunkHash],
    ) -> PropagationResult<Vec<Option<Vec<u8>>>> {
        let mut value: Vec<Option<Vec<u8>>> = vec![None; hashes.len()];
        let mut errors = Vec::new();
        let mut pending = Vec::new();
        for (position, hash) in hashes.iter().enumerate() {
            let candidates = self.candidates(hash);
            if candidates.is_empty() {
                errors.push(self.no_matching_servers(*hash).at(position));
                continue;
            }
            pending.push(Unresolved {
                position,
                hash: *hash,
                candidates: candidates.into(),
                last_error: None,
                resolved: false,
            });
        }

        let mut round_number = 0usize;
        loop {
            let mut round: BTreeMap<HostAddress, Vec<usize>> = BTreeMap::new();
            for (slot, entry) in pending.iter_mut().enumerate() {
                if entry.resolved {
                    continue;
                }
                if let Some(host) = entry.candidates.pop_front() {
                    round.entry(host).or_default().push(slot);
                }
            }
            if round.is_empty() {
                break;
            }
            round_number += 1;
            debug!(round = round_number, hosts = round.len(), %kind, "batched read round");
            self.inner.metrics.record_fanout(round.len());

            let plan: Vec<(HostAddress, Vec<usize>, Vec<ChunkHash>)> = round
                .into_iter()
                .map(|(host, slots)| {
                    let batch = slots
                        .iter()
                        .filter_map(|&slot| pending.get(slot).map(|entry| entry.hash))
                        .collect();
                    (host, slots, batch)
                })
                .collect();
            let calls = plan.into_iter().map(|(host, slots, batch)| {
                async move {
                    let outcome = self
                        .call(&host, move |client| async move {
                            client.get_batch(kind, &batch).await
                        })
                        .await;
                    (host, slots, outcome)
                }
            });
            let outcomes = join_all(calls).await;

            for (host, slots, outcome) in outcomes {
                match outcome {
                    Ok(chunks) => {
                        for (slot, chunk) in slots.into_iter().zip(chunks) {
                            let Some(entry) = pending.get_mut(slot) else {
                                continue;
                            };
                            match chunk {
                                Some(data) => {
                                    if let Some(out) = value.get_mut(entry.position) {
                                        *out = Some(data);
                                    }
                                    entry.resolved = true;
                                }
                                None => {
                                    entry.last_error = Some(
                                        PropagationError::new(
                                            ErrorKind::NotFound,
                                            format!("{kind} chunk is not stored on the backend"),
                                        )
                                        .with_host(host.clone())
                                        .with_hash(entry.hash)
                                        .at(entry.position),
                                    );
                                }
                            }
                        }
                    }
                    Err(error) => {
                        for slot in slots {
                            if let Some(entry) = pending.get_mut(slot) {
                                entry.last_error = Some(
                                    PropagationError::from_client(&host, &error)
                                        .with_hash(entry.hash)
                                        .at(entry.position),
                                );
                            }
                        }
                    }
                }
            }
        }

        for entry in pending.into_iter().filter(|entry| !entry.resolved) {
            errors.push(entry.last_error.unwrap_or_else(|| {
                PropagationError::new(ErrorKind::Server, "no backend answered")
                    .with_hash(entry.hash)
                    .at(entry.position)
            }));
        }
        errors.sort_by_key(|error| error.position);
        PropagationResult::new(value, errors)
    }

    /// Whether any covering backend holds `hash`.
    pub async fn has(&self, kind: ChunkKind, hash: ChunkHash) -> PropagationResult<bool> {
        self.has_batch(kind, &[hash])
            .await
            .map(|presence| presence.first().copied().unwrap_or(false))
    }

    /// Whether a covering backend holds the data chunk `hash`.
    pub async fn has_data(&self, hash: ChunkHash) -> PropagationResult<bool> {
        self.has(ChunkKind::Data, hash).await
    }

    /// Whether a covering backend holds the metadata chunk `hash`.
    pub async fn has_meta_data(&self, hash: ChunkHash) -> PropagationResult<bool> {
        self.has(ChunkKind::Meta, hash).await
    }

    /// Presence of several hashes, aligned with `hashes`.
    ///
    /// Every online covering backend is asked once, concurrently. A hash is
    /// present if any of them holds it. Uncovered hashes are `false` with no
    /// error; a hash whose covering backends are all offline is `false` with
    /// a `NoMatchingServers` error. When a backend fails, each of its hashes
    /// that no other backend reported present gets an error carrying that
    /// hash and its position.
    pub async fn has_batch(&self, kind: ChunkKind, hashes: &[ChunkHash]) -> PropagationResult<Vec<bool>> {
        let mut value = vec![false; hashes.len()];
        let mut errors = Vec::new();
        for (position, hash) in hashes.iter().enumerate() {
            if self.inner.index.covers(hash) && self.candidates(hash).is_empty() {
                errors.push(self.no_matching_servers(*hash).at(position));
            }
        }

        let groups: Vec<(HostAddress, Vec<usize>)> = self
            .inner
            .index
            .group_by_host(hashes)
            .groups
            .into_iter()
            .filter(|(host, _)| self.is_online(host))
            .collect();
        self.inner.metrics.record_fanout(groups.len());

        let calls = groups.into_iter().map(|(host, positions)| {
            let batch: Vec<ChunkHash> = positions
                .iter()
                .filter_map(|&position| hashes.get(position).copied())
                .collect();
            async move {
                let outcome = self
                    .call(&host, move |client| async move {
                        client.has_batch(kind, &batch).await
                    })
                    .await;
                (host, positions, outcome)
            }
        });

        let mut failures = Vec::new();
        for (host, positions, outcome) in join_all(calls).await {
            match outcome {
                Ok(presence) => {
                    for (position, present) in positions.into_iter().zip(presence) {
                        if let Some(out) = value.get_mut(position) {
                            *out |= present;
                        }
                    }
                }
                Err(error) => failures.push((host, positions, error)),
            }
        }

        // A failed host only matters for hashes nobody else reported present.
        for (host, positions, error) in failures {
            for position in positions {
                if value.get(position).copied().unwrap_or(true) {
                    continue;
                }
                if let Some(hash) = hashes.get(position) {
                    errors.push(
                        PropagationError::from_client(&host, &error)
                            .with_hash(*hash)
                            .at(position),
                    );
                }
            }
        }
        errors.sort_by_key(|error| error.position);
        PropagationResult::new(value, errors)
    }

    /// A window of the hashes held across all online backends, ascending and
    /// without duplicates.
    pub async fn get_hashes(
        &self,
        scope: HashScope,
        offset: u64,
        limit: u32,
    ) -> PropagationResult<Vec<ChunkHash>> {
        let window = u32::try_from(offset.saturating_add(u64::from(limit))).unwrap_or(u32::MAX);
        let hosts: Vec<HostAddress> = self
            .inner
            .index
            .hosts()
            .filter(|host| self.is_online(host))
            .cloned()
            .collect();
        self.inner.metrics.record_fanout(hosts.len());

        let outcomes = join_all(hosts.iter().map(|host| {
            self.call(host, move |client| async move {
                client.get_hashes(scope, 0, window).await
            })
        }))
        .await;

        let mut merged = BTreeSet::new();
        let mut errors = Vec::new();
        for (host, outcome) in hosts.iter().zip(outcomes) {
            match outcome {
                Ok(hashes) => merged.extend(hashes),
                Err(error) => errors.push(PropagationError::from_client(host, &error)),
            }
        }
        let value = merged
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(limit as usize)
            .collect();
        PropagationResult::new(value, errors)
    }

    // ---- nonces ----

    /// Fetch `count` nonces from each of `hosts` concurrently.
    ///
    /// The value is `[host][copy]`, `None` for hosts that failed.
    pub async fn get_nonces(
        &self,
        hosts: &[HostAddress],
        count: u32,
    ) -> PropagationResult<Vec<Option<Vec<Nonce>>>> {
        self.inner.metrics.record_fanout(hosts.len());
        let outcomes = join_all(hosts.iter().map(|host| {
            self.call(host, move |client| async move { client.get_nonces(count).await })
        }))
        .await;

        let mut errors = Vec::new();
        let value = outcomes
            .into_iter()
            .zip(hosts)
            .enumerate()
            .map(|(position, (outcome, host))| match outcome {
                Ok(nonces) => Some(nonces),
                Err(error) => {
                    errors.push(PropagationError::from_client(host, &error).at(position));
                    None
                }
            })
            .collect();
        PropagationResult::new(value, errors)
    }

    // ---- writes ----

    /// Store a chunk on every host in `hosts`, signed with `credentials`.
    ///
    /// Each host gets its own nonce and signature. The value is aligned with
    /// `hosts` and marks which writes succeeded.
    pub async fn set(
        &self,
        kind: ChunkKind,
        hash: ChunkHash,
        data: &[u8],
        credentials: &Credentials,
        hosts: &[HostAddress],
    ) -> Result<PropagationResult<Vec<bool>>, CoordinatorError> {
        if hosts.is_empty() {
            return Err(CoordinatorError::NoHostProvided {
                operation: "write",
                kind,
                hash,
            });
        }
        let result = self
            .fan_out(hosts, hash, |client, _| async move {
                client.set(kind, hash, data, credentials).await
            })
            .await;
        debug!(%kind, %hash, hosts = hosts.len(), failed = result.errors.len(), "write propagated");
        Ok(result)
    }

    /// Store a data chunk on every host in `hosts`.
    pub async fn set_data(
        &self,
        hash: ChunkHash,
        data: &[u8],
        credentials: &Credentials,
        hosts: &[HostAddress],
    ) -> Result<PropagationResult<Vec<bool>>, CoordinatorError> {
        self.set(ChunkKind::Data, hash, data, credentials, hosts).await
    }

    /// Store a metadata chunk on every host in `hosts`.
    pub async fn set_meta_data(
        &self,
        hash: ChunkHash,
        data: &[u8],
        credentials: &Credentials,
        hosts: &[HostAddress],
    ) -> Result<PropagationResult<Vec<bool>>, CoordinatorError> {
        self.set(ChunkKind::Meta, hash, data, credentials, hosts).await
    }

    /// Forward writes the caller already signed, one per target host.
    pub async fn propagate_signed(
        &self,
        kind: ChunkKind,
        hash: ChunkHash,
        data: &[u8],
        targets: &[HostWrite],
    ) -> Result<PropagationResult<Vec<bool>>, CoordinatorError> {
        if targets.is_empty() {
            return Err(CoordinatorError::NoHostProvided {
                operation: "write",
                kind,
                hash,
            });
        }
        let hosts: Vec<HostAddress> = targets.iter().map(|target| target.host.clone()).collect();
        Ok(self
            .fan_out(&hosts, hash, |client, position| {
                let auth = targets.get(position).map(|target| target.auth.clone());
                async move {
                    match auth {
                        Some(auth) => client.set_with_auth(kind, hash, data, auth).await,
                        None => Err(ClientError::UnexpectedResponse(format!(
                            "no authorisation for target {position}"
                        ))),
                    }
                }
            })
            .await)
    }

    /// Store a chunk on every online backend covering it, signed with the
    /// coordinator's own authority. The value lists the backends that stored it.
    pub async fn replicate(
        &self,
        kind: ChunkKind,
        hash: ChunkHash,
        data: &[u8],
    ) -> Result<PropagationResult<Vec<HostAddress>>, CoordinatorError> {
        let authority = self
            .authority
            .as_ref()
            .ok_or(CoordinatorError::NoSigningAuthority {
                operation: "replicated write",
                hash,
            })?;
        let hosts = self.candidates(&hash);
        if hosts.is_empty() {
            self.inner.metrics.inc_no_matching_servers();
            return Err(CoordinatorError::NoMatchingServers(hash));
        }
        let result = self
            .fan_out(&hosts, hash, |client, _| async move {
                client.set(kind, hash, data, authority).await
            })
            .await;
        Ok(result.map(|stored| {
            hosts
                .iter()
                .zip(stored)
                .filter_map(|(host, ok)| ok.then(|| host.clone()))
                .collect()
        }))
    }

    // ---- deletes ----

    /// Delete a chunk from every host in `hosts`, signed with `credentials`.
    ///
    /// Refused before any I/O when `hosts` is empty or the coordinator holds
    /// no signing authority of its own.
    pub async fn delete(
        &self,
        kind: ChunkKind,
        hash: ChunkHash,
        credentials: &Credentials,
        hosts: &[HostAddress],
    ) -> Result<PropagationResult<Vec<bool>>, CoordinatorError> {
        if hosts.is_empty() {
            return Err(CoordinatorError::NoHostProvided {
                operation: "delete",
                kind,
                hash,
            });
        }
        if self.authority.is_none() {
            return Err(CoordinatorError::NoSigningAuthority {
                operation: "delete",
                hash,
            });
        }
        let result = self
            .fan_out(hosts, hash, |client, _| async move {
                client.delete(kind, hash, credentials).await
            })
            .await;
        debug!(%kind, %hash, hosts = hosts.len(), failed = result.errors.len(), "delete propagated");
        Ok(result)
    }

    /// Delete a data chunk from every host in `hosts`.
    pub async fn delete_data(
        &self,
        hash: ChunkHash,
        credentials: &Credentials,
        hosts: &[HostAddress],
    ) -> Result<PropagationResult<Vec<bool>>, CoordinatorError> {
        self.delete(ChunkKind::Data, hash, credentials, hosts).await
    }

    /// Delete a metadata chunk from every host in `hosts`.
    pub async fn delete_meta_data(
        &self,
        hash: ChunkHash,
        credentials: &Credentials,
        hosts: &[HostAddress],
    ) -> Result<PropagationResult<Vec<bool>>, CoordinatorError> {
        self.delete(ChunkKind::Meta, hash, credentials, hosts).await
    }

    // ---- status ----

    /// Status of the managed backends in host order, from position `from`
    /// up to but excluding `to`, or to the end when `to` is `None`.
    pub fn network_status_portion(&self, from: usize, to: Option<usize>) -> Vec<BackendStatus> {
        let take = to.map_or(usize::MAX, |to| to.saturating_sub(from));
        self.inner
            .backends
            .values()
            .skip(from)
            .take(take)
            .map(BackendDescriptor::status)
            .collect()
    }

    /// Status of every managed backend in host order.
    pub fn network_status(&self) -> Vec<BackendStatus> {
        self.network_status_portion(0, None)
    }
}
