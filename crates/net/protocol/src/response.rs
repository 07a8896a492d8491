//! Response payload encoding and the closed set of distributed error kinds.
//!
//! A response payload is `[code: u8][body]`. Code `0` carries a postcard body;
//! any other code is an [`ErrorKind`] followed by a UTF-8 message.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Response code for success.
pub const RESPONSE_OK: u8 = 0;

/// Kinds of failure a backend or routing endpoint can report.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::FromRepr,
    strum::EnumIter,
)]
#[repr(u8)]
pub enum ErrorKind {
    /// The chunk is not stored on the host.
    NotFound = 1,
    /// The hash lies outside every span the host owns.
    DoesNotBelong = 2,
    /// No managed host covers the hash.
    NoMatchingServers = 3,
    /// A write or delete named no target hosts.
    NoHostProvided = 4,
    /// The host has no room for the chunk.
    OutOfSpace = 5,
    /// Signature, nonce or authority check failed.
    SecurityError = 6,
    /// The connection to the host closed before a response arrived.
    TransportClosed = 7,
    /// The request could not be parsed.
    Malformed = 8,
    /// Any other failure inside the host.
    Server = 9,
}

/// An error reported by the remote end, or recorded for one host of a fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    /// Error classification.
    pub kind: ErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl RemoteError {
    /// Create a remote error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Encode a success response carrying `body`.
pub fn encode_ok<T: Serialize>(body: &T) -> Result<Bytes, ProtocolError> {
    let encoded = postcard::to_allocvec(body).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    let mut buf = BytesMut::with_capacity(1 + encoded.len());
    buf.put_u8(RESPONSE_OK);
    buf.put_slice(&encoded);
    Ok(buf.freeze())
}

/// Encode an error response.
pub fn encode_error(error: &RemoteError) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + error.message.len());
    buf.put_u8(error.kind as u8);
    buf.put_slice(error.message.as_bytes());
    buf.freeze()
}

/// Encode either outcome of a handled request.
///
/// A body that fails to serialize is reported as a server error.
pub fn encode_outcome<T: Serialize>(outcome: Result<T, RemoteError>) -> Bytes {
    match outcome {
        Ok(body) => encode_ok(&body)
            .unwrap_or_else(|e| encode_error(&RemoteError::new(ErrorKind::Server, e.to_string()))),
        Err(error) => encode_error(&error),
    }
}

/// Decode a response payload.
///
/// The outer `Result` fails when the payload itself is unreadable; the inner
/// one carries what the remote end reported.
pub fn decode_response<T: DeserializeOwned>(
    payload: &[u8],
) -> Result<Result<T, RemoteError>, ProtocolError> {
    let (&code, body) = payload.split_first().ok_or(ProtocolError::EmptyPayload)?;
    if code == RESPONSE_OK {
        let value = postcard::from_bytes(body).map_err(|e| ProtocolError::Decode(e.to_string()))?;
        return Ok(Ok(value));
    }
    let kind = ErrorKind::from_repr(code).ok_or(ProtocolError::UnknownResponseCode(code))?;
    Ok(Err(RemoteError {
        kind,
        message: String::from_utf8_lossy(body).into_owned(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use strum::IntoEnumIterator;

    #[test]
    fn test_ok_response() {
        let payload = encode_ok(&vec![true, false]).unwrap();
        assert_eq!(payload[0], RESPONSE_OK);
        let decoded: Vec<bool> = decode_response(&payload).unwrap().unwrap();
        assert_eq!(decoded, vec![true, false]);
    }

    #[test]
    fn test_every_error_kind_survives_the_wire() {
        for kind in ErrorKind::iter() {
            let payload = encode_error(&RemoteError::new(kind, "detail"));
            let decoded = decode_response::<()>(&payload).unwrap().unwrap_err();
            assert_eq!(decoded.kind, kind);
            assert_eq!(decoded.message, "detail");
        }
    }

    #[test]
    fn test_outcome_encoding() {
        let ok = encode_outcome::<u32>(Ok(7));
        assert_eq!(decode_response::<u32>(&ok).unwrap(), Ok(7));

        let err = encode_outcome::<u32>(Err(RemoteError::new(ErrorKind::OutOfSpace, "full")));
        assert_eq!(
            decode_response::<u32>(&err).unwrap(),
            Err(RemoteError::new(ErrorKind::OutOfSpace, "full"))
        );
    }

    #[test]
    fn test_unknown_code_and_empty_payload() {
        assert_matches!(
            decode_response::<()>(&[0xee]),
            Err(ProtocolError::UnknownResponseCode(0xee))
        );
        assert_matches!(decode_response::<()>(&[]), Err(ProtocolError::EmptyPayload));
    }
}
