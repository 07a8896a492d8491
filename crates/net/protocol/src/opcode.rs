//! Operation codes carried in the first byte of every request payload.

/// One opcode per backend operation.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::FromRepr,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Opcode {
    GetData = 1,
    GetMeta = 2,
    HasData = 3,
    HasMeta = 4,
    GetNonce = 5,
    AddData = 6,
    AddMeta = 7,
    AddDataRemote = 8,
    AddMetaRemote = 9,
    DeleteData = 10,
    DeleteMeta = 11,
    GetDataHashes = 12,
    GetMetaHashes = 13,
    GetProjectHashes = 14,
    GetConfiguration = 15,
    SetConfiguration = 16,
    AddServer = 17,
    GetKnownServers = 18,
    Close = 19,
}

impl Opcode {
    /// Whether the operation mutates backend state and must be signed.
    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            Self::AddData
                | Self::AddMeta
                | Self::AddDataRemote
                | Self::AddMetaRemote
                | Self::DeleteData
                | Self::DeleteMeta
                | Self::SetConfiguration
        )
    }

    /// Whether the backend sends a response frame for this operation.
    pub fn expects_response(&self) -> bool {
        !matches!(self, Self::Close)
    }
}
