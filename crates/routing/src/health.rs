//! Managed backends and their online/offline state.

use std::{
    sync::atomic::{AtomicU32, Ordering},
    time::{Duration, Instant},
};

use chunknet_primitives::{HashSpan, HostAddress};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Consecutive-failure tracking for one backend.
///
/// After `max_failures` transport failures in a row the backend is skipped
/// for `backoff`. Once the backoff elapses it is tried again; one more
/// failure takes it straight back offline, one success clears the count.
#[derive(Debug)]
pub struct BackendHealth {
    failures: AtomicU32,
    offline_until: Mutex<Option<Instant>>,
    max_failures: u32,
    backoff: Duration,
}

impl BackendHealth {
    /// Health tracker with the given policy. `max_failures == 0` never goes offline.
    pub fn new(max_failures: u32, backoff: Duration) -> Self {
        Self {
            failures: AtomicU32::new(0),
            offline_until: Mutex::new(None),
            max_failures,
            backoff,
        }
    }

    /// Whether the backend may be contacted now.
    pub fn is_online(&self) -> bool {
        match *self.offline_until.lock() {
            Some(until) => Instant::now() >= until,
            None => true,
        }
    }

    /// Transport failures since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Clear the failure count.
    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Relaxed);
        *self.offline_until.lock() = None;
    }

    /// Count a transport failure, returning whether it took the backend offline.
    pub fn record_failure(&self) -> bool {
        let failures = self.failures.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        if self.max_failures == 0 || failures < self.max_failures {
            return false;
        }
        *self.offline_until.lock() = Some(Instant::now() + self.backoff);
        true
    }
}

/// One managed backend: address, owned spans and health.
#[derive(Debug)]
pub struct BackendDescriptor {
    host: HostAddress,
    spans: Vec<HashSpan>,
    health: BackendHealth,
}

impl BackendDescriptor {
    /// Descriptor for `host` owning `spans`.
    pub fn new(host: HostAddress, spans: Vec<HashSpan>, health: BackendHealth) -> Self {
        Self {
            host,
            spans,
            health,
        }
    }

    /// Backend address.
    pub fn host(&self) -> &HostAddress {
        &self.host
    }

    /// Owned spans.
    pub fn spans(&self) -> &[HashSpan] {
        &self.spans
    }

    /// Health tracker.
    pub fn health(&self) -> &BackendHealth {
        &self.health
    }

    /// Whether the backend may be contacted now.
    pub fn is_online(&self) -> bool {
        self.health.is_online()
    }

    pub(crate) fn record_success(&self) {
        if self.health.consecutive_failures() > 0 {
            debug!(host = %self.host, "backend recovered");
        }
        self.health.record_success();
    }

    pub(crate) fn record_failure(&self) {
        if self.health.record_failure() {
            warn!(
                host = %self.host,
                failures = self.health.consecutive_failures(),
                "backend taken offline"
            );
        }
    }

    /// Point-in-time view for status tables.
    pub fn status(&self) -> BackendStatus {
        BackendStatus {
            host: self.host.clone(),
            spans: self.spans.clone(),
            online: self.is_online(),
            consecutive_failures: self.health.consecutive_failures(),
        }
    }
}

/// Snapshot of one backend as reported by
/// [`RoutingCoordinator::network_status_portion`](crate::RoutingCoordinator::network_status_portion).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendStatus {
    /// Backend address.
    pub host: HostAddress,
    /// Owned spans.
    pub spans: Vec<HashSpan>,
    /// Whether reads currently consider the backend.
    pub online: bool,
    /// Transport failures since the last success.
    pub consecutive_failures: u32,
}
