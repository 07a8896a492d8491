//! Table of requests awaiting a response, keyed by request id.

use std::{
    collections::BTreeMap,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::{Duration, Instant},
};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::TransportError;

type Outcome = Result<Bytes, TransportError>;

#[derive(Debug)]
struct PendingRequest {
    sent_at: Instant,
    waiter: oneshot::Sender<Outcome>,
}

/// Requests in flight on one connection.
///
/// Every registered entry is removed exactly once: by [`resolve`](Self::resolve)
/// when its response arrives, or by one of the purge operations. Removal
/// happens under the lock; waking the waiter happens after it is released.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: Mutex<BTreeMap<u64, PendingRequest>>,
}

impl PendingTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` and return the future its outcome is delivered to.
    pub fn register(&self, id: u64) -> Result<PendingResponse, TransportError> {
        let (waiter, rx) = oneshot::channel();
        let mut entries = self.entries.lock();
        if entries.contains_key(&id) {
            return Err(TransportError::DuplicateId(id));
        }
        entries.insert(
            id,
            PendingRequest {
                sent_at: Instant::now(),
                waiter,
            },
        );
        Ok(PendingResponse { id, rx })
    }

    /// Deliver `payload` to the waiter registered under `id`.
    ///
    /// Returns `false` when no such entry exists; the payload is dropped.
    pub fn resolve(&self, id: u64, payload: Bytes) -> bool {
        let Some(entry) = self.entries.lock().remove(&id) else {
            return false;
        };
        // The waiter may have given up; the entry is gone either way.
        let _ = entry.waiter.send(Ok(payload));
        true
    }

    /// Fail a single entry, if present.
    pub fn fail(&self, id: u64, error: TransportError) -> bool {
        let Some(entry) = self.entries.lock().remove(&id) else {
            return false;
        };
        let _ = entry.waiter.send(Err(error));
        true
    }

    /// Fail every entry with an id strictly below `id`.
    pub fn purge_before(&self, id: u64, reason: impl Fn(u64) -> TransportError) -> usize {
        let purged = {
            let mut entries = self.entries.lock();
            let keep = entries.split_off(&id);
            std::mem::replace(&mut *entries, keep)
        };
        Self::fail_all(purged, reason)
    }

    /// Fail every entry with an id at or below `id`.
    pub fn purge_through(&self, id: u64, reason: impl Fn(u64) -> TransportError) -> usize {
        match id.checked_add(1) {
            Some(bound) => self.purge_before(bound, reason),
            None => self.purge_all(reason),
        }
    }

    /// Fail every entry.
    pub fn purge_all(&self, reason: impl Fn(u64) -> TransportError) -> usize {
        let purged = std::mem::take(&mut *self.entries.lock());
        Self::fail_all(purged, reason)
    }

    fn fail_all(purged: BTreeMap<u64, PendingRequest>, reason: impl Fn(u64) -> TransportError) -> usize {
        let count = purged.len();
        for (id, entry) in purged {
            let _ = entry.waiter.send(Err(reason(id)));
        }
        count
    }

    /// Number of requests in flight.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Id and age of the oldest request in flight.
    pub fn oldest(&self) -> Option<(u64, Duration)> {
        self.entries
            .lock()
            .first_key_value()
            .map(|(id, entry)| (*id, entry.sent_at.elapsed()))
    }
}

/// Future resolving to the response payload of one request.
///
/// Resolves with [`TransportError::Closed`] if the table is dropped without
/// resolving or purging the entry.
#[derive(Debug)]
pub struct PendingResponse {
    id: u64,
    rx: oneshot::Receiver<Outcome>,
}

impl PendingResponse {
    /// Id of the request this future belongs to.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for PendingResponse {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or(Err(TransportError::Closed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_resolve_delivers_payload() {
        let table = PendingTable::new();
        let response = table.register(7).unwrap();
        assert_eq!(response.id(), 7);
        assert!(table.resolve(7, Bytes::from_static(b"ok")));
        assert_eq!(response.await.unwrap(), Bytes::from_static(b"ok"));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_id_is_discarded() {
        let table = PendingTable::new();
        let _response = table.register(1).unwrap();
        assert!(!table.resolve(2, Bytes::new()));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let table = PendingTable::new();
        let _first = table.register(3).unwrap();
        assert_matches!(table.register(3), Err(TransportError::DuplicateId(3)));
    }

    #[tokio::test]
    async fn test_purge_before_is_strict() {
        let table = PendingTable::new();
        let r1 = table.register(1).unwrap();
        let r2 = table.register(2).unwrap();
        let r3 = table.register(3).unwrap();

        assert_eq!(table.purge_before(3, |id| TransportError::Abandoned { id }), 2);
        assert_matches!(r1.await, Err(TransportError::Abandoned { id: 1 }));
        assert_matches!(r2.await, Err(TransportError::Abandoned { id: 2 }));

        assert!(table.resolve(3, Bytes::from_static(b"three")));
        assert_eq!(r3.await.unwrap(), Bytes::from_static(b"three"));
    }

    #[tokio::test]
    async fn test_purge_through_is_inclusive() {
        let table = PendingTable::new();
        let r4 = table.register(4).unwrap();
        let _r5 = table.register(5).unwrap();

        assert_eq!(table.purge_through(4, |id| TransportError::Reset { id }), 1);
        assert_matches!(r4.await, Err(TransportError::Reset { id: 4 }));
        assert_eq!(table.oldest().map(|(id, _)| id), Some(5));
    }

    #[tokio::test]
    async fn test_purge_all_and_dropped_table() {
        let table = PendingTable::new();
        let a = table.register(10).unwrap();
        let b = table.register(u64::MAX).unwrap();
        assert_eq!(table.purge_through(u64::MAX, |_| TransportError::Closed), 2);
        assert_matches!(a.await, Err(TransportError::Closed));
        assert_matches!(b.await, Err(TransportError::Closed));

        let table = PendingTable::new();
        let orphan = table.register(1).unwrap();
        drop(table);
        assert_matches!(orphan.await, Err(TransportError::Closed));
    }
}
