//! Single-use nonce bookkeeping for endpoints that accept signed writes.

use chunknet_primitives::{Address, ChunkHash, Nonce};
use hashlink::LinkedHashSet;
use parking_lot::Mutex;
use tracing::trace;

use crate::{ErrorKind, RemoteError, WriteAuth};

/// Default number of outstanding nonces remembered before the oldest expire.
pub const DEFAULT_NONCE_CAPACITY: usize = 4096;

/// Tracks nonces an endpoint has issued and not yet seen used.
///
/// A nonce authorises exactly one write; consuming it twice, or presenting one
/// that was never issued (or has been evicted), is a security error.
#[derive(Debug)]
pub struct NonceBook {
    issued: Mutex<LinkedHashSet<Nonce>>,
    capacity: usize,
}

impl Default for NonceBook {
    fn default() -> Self {
        Self::new(DEFAULT_NONCE_CAPACITY)
    }
}

impl NonceBook {
    /// Create a book remembering at most `capacity` outstanding nonces.
    pub fn new(capacity: usize) -> Self {
        Self {
            issued: Mutex::new(LinkedHashSet::new()),
            capacity: capacity.max(1),
        }
    }

    /// Issue `count` fresh nonces.
    pub fn issue(&self, count: usize) -> Vec<Nonce> {
        let nonces: Vec<Nonce> = (0..count).map(|_| Nonce::random()).collect();
        let mut issued = self.issued.lock();
        for nonce in &nonces {
            issued.insert(*nonce);
        }
        while issued.len() > self.capacity {
            issued.pop_front();
        }
        nonces
    }

    /// Consume a nonce, returning whether it was outstanding.
    pub fn consume(&self, nonce: &Nonce) -> bool {
        self.issued.lock().remove(nonce)
    }

    /// Number of outstanding nonces.
    pub fn outstanding(&self) -> usize {
        self.issued.lock().len()
    }

    /// Consume the nonce in `auth` and verify its signature over
    /// `nonce || hash || payload`, returning the signer's certificate.
    pub fn authorize(
        &self,
        auth: &WriteAuth,
        hash: &ChunkHash,
        payload: &[u8],
    ) -> Result<Address, RemoteError> {
        if !self.consume(&auth.nonce) {
            trace!(nonce = ?auth.nonce, "Rejecting unknown or reused nonce");
            return Err(RemoteError::new(
                ErrorKind::SecurityError,
                "nonce was not issued by this host or was already used",
            ));
        }
        auth.signature
            .verify(&auth.nonce, hash, payload)
            .map_err(|e| RemoteError::new(ErrorKind::SecurityError, e.to_string()))?;
        Ok(auth.signature.certificate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunknet_primitives::Credentials;

    fn signed(credentials: &Credentials, nonce: Nonce, hash: &ChunkHash, data: &[u8]) -> WriteAuth {
        WriteAuth {
            nonce,
            signature: credentials.sign(&nonce, hash, data).unwrap(),
        }
    }

    #[test]
    fn test_nonce_is_single_use() {
        let book = NonceBook::default();
        let credentials = Credentials::random();
        let hash = ChunkHash::digest(b"data");
        let nonce = book.issue(1)[0];
        let auth = signed(&credentials, nonce, &hash, b"data");

        assert_eq!(book.authorize(&auth, &hash, b"data").unwrap(), credentials.certificate());
        let replay = book.authorize(&auth, &hash, b"data").unwrap_err();
        assert_eq!(replay.kind, ErrorKind::SecurityError);
    }

    #[test]
    fn test_foreign_nonce_rejected() {
        let book = NonceBook::default();
        let hash = ChunkHash::digest(b"data");
        let auth = signed(&Credentials::random(), Nonce::random(), &hash, b"data");

        assert_eq!(
            book.authorize(&auth, &hash, b"data").unwrap_err().kind,
            ErrorKind::SecurityError
        );
    }

    #[test]
    fn test_bad_signature_still_consumes_nonce() {
        let book = NonceBook::default();
        let hash = ChunkHash::digest(b"data");
        let nonce = book.issue(1)[0];
        let auth = signed(&Credentials::random(), nonce, &hash, b"other");

        assert!(book.authorize(&auth, &hash, b"data").is_err());
        assert_eq!(book.outstanding(), 0);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let book = NonceBook::new(2);
        let first = book.issue(1)[0];
        book.issue(2);
        assert_eq!(book.outstanding(), 2);
        assert!(!book.consume(&first));
    }
}
