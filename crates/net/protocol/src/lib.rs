//! Wire protocol spoken between clients, routing endpoints and chunk servers.
//!
//! This crate defines what travels inside a frame payload. Framing itself
//! lives in `chunknet-net-codec`.
//!
//! # Payloads
//!
//! - **Request**: `[opcode: u8][postcard body]`, see [`Request`]
//! - **Response**: `[code: u8][postcard body | UTF-8 message]`, see
//!   [`encode_ok`], [`encode_error`] and [`decode_response`]
//!
//! Every mutating operation carries a [`WriteAuth`]: a nonce previously issued
//! by the receiving host plus a signature over `nonce || hash || payload`.
//! Hosts track issued nonces with a [`NonceBook`].

mod error;
mod messages;
mod nonce_book;
mod opcode;
mod request;
mod response;

pub use error::ProtocolError;
pub use messages::{
    AddChunk, AddChunkRemote, BackendConfiguration, ChunkQuery, ChunkReply, DeleteChunk,
    HashListReply, HashRange, HostWrite, NonceQuery, NonceReply, PresenceReply, PropagationReply,
    SetConfiguration, WriteAuth,
};
pub use nonce_book::{DEFAULT_NONCE_CAPACITY, NonceBook};
pub use opcode::Opcode;
pub use request::{HashScope, Request};
pub use response::{
    ErrorKind, RESPONSE_OK, RemoteError, decode_response, encode_error, encode_ok, encode_outcome,
};
