//! Transport metrics

use metrics::{Counter, Gauge};

/// Per-host connection metrics.
#[derive(Clone, Debug)]
pub(crate) struct TransportMetrics {
    /// Requests enqueued for writing
    pub(crate) requests_total: Counter,
    /// Responses delivered to a waiting request
    pub(crate) responses_total: Counter,
    /// Responses that matched no pending request
    pub(crate) discarded_total: Counter,
    /// Pending requests failed by a purge
    pub(crate) purged_total: Counter,
    /// Sockets re-established after a failure or idle period
    pub(crate) reconnects_total: Counter,
    /// Failed socket writes
    pub(crate) write_failures_total: Counter,
    /// Requests currently awaiting a response
    pub(crate) pending: Gauge,
}

impl TransportMetrics {
    pub(crate) fn new(host: &str) -> Self {
        let host = host.to_owned();
        Self {
            requests_total: metrics::counter!("transport.requests_total", "host" => host.clone()),
            responses_total: metrics::counter!("transport.responses_total", "host" => host.clone()),
            discarded_total: metrics::counter!("transport.discarded_total", "host" => host.clone()),
            purged_total: metrics::counter!("transport.purged_total", "host" => host.clone()),
            reconnects_total: metrics::counter!("transport.reconnects_total", "host" => host.clone()),
            write_failures_total: metrics::counter!(
                "transport.write_failures_total",
                "host" => host.clone()
            ),
            pending: metrics::gauge!("transport.pending", "host" => host),
        }
    }

    pub(crate) fn record_purged(&self, count: usize) {
        if count > 0 {
            self.purged_total.increment(count as u64);
        }
    }
}
