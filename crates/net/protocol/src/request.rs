//! Typed requests and their `[opcode][postcard body]` payload encoding.

use bytes::{BufMut, Bytes, BytesMut};
use chunknet_primitives::{ChunkKind, HostAddress};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    AddChunk, AddChunkRemote, ChunkQuery, DeleteChunk, HashRange, NonceQuery, Opcode,
    ProtocolError, SetConfiguration,
};

/// Which hash listing a range scan reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum HashScope {
    /// Data chunk hashes.
    Data,
    /// Metadata chunk hashes.
    Meta,
    /// Hashes of metadata chunks that head a project.
    Project,
}

/// A decoded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// GET_DATA / GET_META.
    Get(ChunkKind, ChunkQuery),
    /// HAS_DATA / HAS_META.
    Has(ChunkKind, ChunkQuery),
    /// GET_NONCE.
    GetNonces(NonceQuery),
    /// ADD_DATA / ADD_META.
    Add(ChunkKind, AddChunk),
    /// ADD_DATA_REMOTE / ADD_META_REMOTE.
    AddRemote(ChunkKind, AddChunkRemote),
    /// DELETE_DATA / DELETE_META.
    Delete(ChunkKind, DeleteChunk),
    /// GET_DATA_HASHES / GET_META_HASHES / GET_PROJECT_HASHES.
    GetHashes(HashScope, HashRange),
    /// GET_CONFIGURATION.
    GetConfiguration,
    /// SET_CONFIGURATION.
    SetConfiguration(SetConfiguration),
    /// ADD_SERVER.
    AddServer(HostAddress),
    /// GET_KNOWN_SERVERS.
    GetKnownServers,
    /// CLOSE: polite end of the connection, never answered.
    Close,
}

impl Request {
    /// The opcode this request travels under.
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Get(ChunkKind::Data, _) => Opcode::GetData,
            Self::Get(ChunkKind::Meta, _) => Opcode::GetMeta,
            Self::Has(ChunkKind::Data, _) => Opcode::HasData,
            Self::Has(ChunkKind::Meta, _) => Opcode::HasMeta,
            Self::GetNonces(_) => Opcode::GetNonce,
            Self::Add(ChunkKind::Data, _) => Opcode::AddData,
            Self::Add(ChunkKind::Meta, _) => Opcode::AddMeta,
            Self::AddRemote(ChunkKind::Data, _) => Opcode::AddDataRemote,
            Self::AddRemote(ChunkKind::Meta, _) => Opcode::AddMetaRemote,
            Self::Delete(ChunkKind::Data, _) => Opcode::DeleteData,
            Self::Delete(ChunkKind::Meta, _) => Opcode::DeleteMeta,
            Self::GetHashes(HashScope::Data, _) => Opcode::GetDataHashes,
            Self::GetHashes(HashScope::Meta, _) => Opcode::GetMetaHashes,
            Self::GetHashes(HashScope::Project, _) => Opcode::GetProjectHashes,
            Self::GetConfiguration => Opcode::GetConfiguration,
            Self::SetConfiguration(_) => Opcode::SetConfiguration,
            Self::AddServer(_) => Opcode::AddServer,
            Self::GetKnownServers => Opcode::GetKnownServers,
            Self::Close => Opcode::Close,
        }
    }

    /// Encode as a request payload.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let opcode = self.opcode();
        match self {
            Self::Get(_, body) | Self::Has(_, body) => with_body(opcode, body),
            Self::GetNonces(body) => with_body(opcode, body),
            Self::Add(_, body) => with_body(opcode, body),
            Self::AddRemote(_, body) => with_body(opcode, body),
            Self::Delete(_, body) => with_body(opcode, body),
            Self::GetHashes(_, body) => with_body(opcode, body),
            Self::SetConfiguration(body) => with_body(opcode, body),
            Self::AddServer(body) => with_body(opcode, body),
            Self::GetConfiguration | Self::GetKnownServers | Self::Close => {
                Ok(Bytes::copy_from_slice(&[opcode as u8]))
            }
        }
    }

    /// Decode a request payload.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let (&code, body) = payload.split_first().ok_or(ProtocolError::EmptyPayload)?;
        let opcode = Opcode::from_repr(code).ok_or(ProtocolError::UnknownOpcode(code))?;
        let request = match opcode {
            Opcode::GetData => Self::Get(ChunkKind::Data, parse(body)?),
            Opcode::GetMeta => Self::Get(ChunkKind::Meta, parse(body)?),
            Opcode::HasData => Self::Has(ChunkKind::Data, parse(body)?),
            Opcode::HasMeta => Self::Has(ChunkKind::Meta, parse(body)?),
            Opcode::GetNonce => Self::GetNonces(parse(body)?),
            Opcode::AddData => Self::Add(ChunkKind::Data, parse(body)?),
            Opcode::AddMeta => Self::Add(ChunkKind::Meta, parse(body)?),
            Opcode::AddDataRemote => Self::AddRemote(ChunkKind::Data, parse(body)?),
            Opcode::AddMetaRemote => Self::AddRemote(ChunkKind::Meta, parse(body)?),
            Opcode::DeleteData => Self::Delete(ChunkKind::Data, parse(body)?),
            Opcode::DeleteMeta => Self::Delete(ChunkKind::Meta, parse(body)?),
            Opcode::GetDataHashes => Self::GetHashes(HashScope::Data, parse(body)?),
            Opcode::GetMetaHashes => Self::GetHashes(HashScope::Meta, parse(body)?),
            Opcode::GetProjectHashes => Self::GetHashes(HashScope::Project, parse(body)?),
            Opcode::GetConfiguration => Self::GetConfiguration,
            Opcode::SetConfiguration => Self::SetConfiguration(parse(body)?),
            Opcode::AddServer => Self::AddServer(parse(body)?),
            Opcode::GetKnownServers => Self::GetKnownServers,
            Opcode::Close => Self::Close,
        };
        Ok(request)
    }
}

fn with_body<T: Serialize>(opcode: Opcode, body: &T) -> Result<Bytes, ProtocolError> {
    let encoded = postcard::to_allocvec(body).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    let mut buf = BytesMut::with_capacity(1 + encoded.len());
    buf.put_u8(opcode as u8);
    buf.put_slice(&encoded);
    Ok(buf.freeze())
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T, ProtocolError> {
    postcard::from_bytes(body).map_err(|e| ProtocolError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WriteAuth;
    use assert_matches::assert_matches;
    use chunknet_primitives::{ChunkHash, Credentials, Nonce};

    #[test]
    fn test_kind_selects_opcode() {
        let query = ChunkQuery { hashes: vec![] };
        assert_eq!(Request::Get(ChunkKind::Meta, query.clone()).opcode(), Opcode::GetMeta);
        assert_eq!(Request::Has(ChunkKind::Data, query).opcode(), Opcode::HasData);
        assert_eq!(
            Request::GetHashes(HashScope::Project, HashRange { offset: 0, limit: 1 }).opcode(),
            Opcode::GetProjectHashes
        );
    }

    #[test]
    fn test_signed_add_survives_encoding() {
        let credentials = Credentials::random();
        let nonce = Nonce::random();
        let data = b"chunk bytes".to_vec();
        let hash = ChunkHash::digest(&data);
        let request = Request::Add(
            ChunkKind::Data,
            AddChunk {
                hash,
                data: data.clone(),
                auth: WriteAuth {
                    nonce,
                    signature: credentials.sign(&nonce, &hash, &data).unwrap(),
                },
            },
        );

        let payload = request.encode().unwrap();
        assert_eq!(payload[0], Opcode::AddData as u8);
        let decoded = Request::decode(&payload).unwrap();
        assert_eq!(decoded, request);

        let Request::Add(_, add) = decoded else {
            panic!("expected add request");
        };
        add.auth.signature.verify(&add.auth.nonce, &add.hash, &add.data).unwrap();
    }

    #[test]
    fn test_bodyless_requests_are_one_byte() {
        assert_eq!(Request::Close.encode().unwrap().len(), 1);
        assert_eq!(Request::decode(&[Opcode::Close as u8]).unwrap(), Request::Close);
        assert_eq!(
            Request::decode(&[Opcode::GetKnownServers as u8]).unwrap(),
            Request::GetKnownServers
        );
    }

    #[test]
    fn test_decode_errors() {
        assert_matches!(Request::decode(&[]), Err(ProtocolError::EmptyPayload));
        assert_matches!(Request::decode(&[0xfe]), Err(ProtocolError::UnknownOpcode(0xfe)));
        assert_matches!(
            Request::decode(&[Opcode::AddData as u8, 0xff]),
            Err(ProtocolError::Decode(_))
        );
    }
}
