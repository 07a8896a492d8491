//! Signing primitives for authorised writes.
//!
//! Every write or delete is signed over `nonce || hash || payload`, where the
//! nonce was issued by the receiving backend immediately before the write.
//! Signatures are EIP-191 personal-message signatures under a secp256k1 key;
//! the signer's address plays the role of the certificate.

use core::fmt;

use alloy_primitives::Address;
use alloy_signer::{SignerSync, k256::ecdsa::SigningKey};
use alloy_signer_local::{LocalSigner, PrivateKeySigner};
use serde::{Deserialize, Serialize};

use crate::{ChunkHash, PrimitivesError};

/// Length of a [`Nonce`] in bytes.
pub const NONCE_LEN: usize = 32;

/// Name of the only signature algorithm produced and accepted.
pub const SIGNATURE_ALGORITHM: &str = "secp256k1-eip191";

/// Single-use random token issued by a backend before a signed write.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Nonce([u8; NONCE_LEN]);

impl Nonce {
    /// Wrap raw nonce bytes.
    pub const fn new(bytes: [u8; NONCE_LEN]) -> Self {
        Self(bytes)
    }

    /// Fresh random nonce.
    pub fn random() -> Self {
        use rand::Rng;
        let mut bytes = [0u8; NONCE_LEN];
        rand::rng().fill(&mut bytes);
        Self(bytes)
    }

    /// Raw nonce bytes.
    pub fn as_bytes(&self) -> &[u8; NONCE_LEN] {
        &self.0
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce(0x{})", hex::encode(self.0))
    }
}

/// Bytes covered by a write signature: `nonce || hash || payload`.
pub fn signed_message(nonce: &Nonce, hash: &ChunkHash, payload: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(NONCE_LEN + hash.as_ref().len() + payload.len());
    message.extend_from_slice(nonce.as_bytes());
    message.extend_from_slice(hash.as_ref());
    message.extend_from_slice(payload);
    message
}

/// A signing identity: private key plus the public certificate derived from it.
#[derive(Clone)]
pub struct Credentials {
    signer: PrivateKeySigner,
}

impl Credentials {
    /// Wrap an existing local signer.
    pub fn from_signer(signer: PrivateKeySigner) -> Self {
        Self { signer }
    }

    /// Build credentials from a raw 32-byte secp256k1 secret.
    pub fn from_secret(secret: &[u8]) -> Result<Self, PrimitivesError> {
        let key = SigningKey::from_slice(secret)
            .map_err(|e| PrimitivesError::InvalidKey(e.to_string()))?;
        Ok(Self::from_signer(LocalSigner::from_signing_key(key)))
    }

    /// Random ephemeral credentials.
    pub fn random() -> Self {
        use rand::Rng;
        let mut rng = rand::rng();
        loop {
            let mut secret = [0u8; 32];
            rng.fill(&mut secret);
            // Zero and values above the curve order are the only rejects.
            if let Ok(credentials) = Self::from_secret(&secret) {
                return credentials;
            }
        }
    }

    /// Public identity bound into every signature.
    pub fn certificate(&self) -> Address {
        self.signer.address()
    }

    /// Sign `nonce || hash || payload`.
    pub fn sign(
        &self,
        nonce: &Nonce,
        hash: &ChunkHash,
        payload: &[u8],
    ) -> Result<Signature, PrimitivesError> {
        let message = signed_message(nonce, hash, payload);
        let signature = self
            .signer
            .sign_message_sync(&message)
            .map_err(|e| PrimitivesError::Signing(e.to_string()))?;
        Ok(Signature {
            bytes: signature.as_bytes().to_vec(),
            algorithm: SIGNATURE_ALGORITHM.to_string(),
            certificate: self.certificate(),
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("certificate", &self.certificate())
            .finish_non_exhaustive()
    }
}

/// Signature over a write, carrying the algorithm and the signer certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Raw signature bytes (`r || s || v`).
    pub bytes: Vec<u8>,
    /// Algorithm name, always [`SIGNATURE_ALGORITHM`] for signatures produced here.
    pub algorithm: String,
    /// Certificate (address) of the signer.
    pub certificate: Address,
}

impl Signature {
    /// Verify that this signature was produced by `certificate` over
    /// `nonce || hash || payload`.
    pub fn verify(
        &self,
        nonce: &Nonce,
        hash: &ChunkHash,
        payload: &[u8],
    ) -> Result<(), PrimitivesError> {
        if self.algorithm != SIGNATURE_ALGORITHM {
            return Err(PrimitivesError::UnsupportedAlgorithm(self.algorithm.clone()));
        }
        let signature = alloy_primitives::Signature::from_raw(&self.bytes)
            .map_err(|e| PrimitivesError::InvalidSignature(e.to_string()))?;
        let recovered = signature
            .recover_address_from_msg(signed_message(nonce, hash, payload))
            .map_err(|e| PrimitivesError::InvalidSignature(e.to_string()))?;
        if recovered != self.certificate {
            return Err(PrimitivesError::InvalidSignature(format!(
                "signed by {recovered}, expected {}",
                self.certificate
            )));
        }
        Ok(())
    }
}
