//! Inclusive ranges of the hash space owned by a backend.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::{ChunkHash, PrimitivesError};

/// An inclusive range `[start, end]` of the hash space.
///
/// Construction rejects `start > end`, so every span covers at least one hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawHashSpan", into = "RawHashSpan")]
pub struct HashSpan {
    start: ChunkHash,
    end: ChunkHash,
}

impl HashSpan {
    /// Span covering the whole hash space.
    pub const FULL: Self = Self {
        start: ChunkHash::MIN,
        end: ChunkHash::MAX,
    };

    /// Create a span, validating that `start <= end`.
    pub fn new(start: ChunkHash, end: ChunkHash) -> Result<Self, PrimitivesError> {
        if start > end {
            return Err(PrimitivesError::InvalidSpan { start, end });
        }
        Ok(Self { start, end })
    }

    /// First hash in the span.
    pub fn start(&self) -> ChunkHash {
        self.start
    }

    /// Last hash in the span (inclusive).
    pub fn end(&self) -> ChunkHash {
        self.end
    }

    /// Whether `hash` lies inside the span.
    #[inline]
    pub fn covers(&self, hash: &ChunkHash) -> bool {
        self.start <= *hash && *hash <= self.end
    }

    /// Whether the two spans share at least one hash.
    pub fn overlaps(&self, other: &HashSpan) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl fmt::Display for HashSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Unvalidated wire/config form of a [`HashSpan`].
#[derive(Serialize, Deserialize)]
struct RawHashSpan {
    start: ChunkHash,
    end: ChunkHash,
}

impl TryFrom<RawHashSpan> for HashSpan {
    type Error = PrimitivesError;

    fn try_from(raw: RawHashSpan) -> Result<Self, Self::Error> {
        HashSpan::new(raw.start, raw.end)
    }
}

impl From<HashSpan> for RawHashSpan {
    fn from(span: HashSpan) -> Self {
        RawHashSpan {
            start: span.start,
            end: span.end,
        }
    }
}

/// Whether any span in `spans` covers `hash`.
pub fn spans_cover<'a>(spans: impl IntoIterator<Item = &'a HashSpan>, hash: &ChunkHash) -> bool {
    spans.into_iter().any(|span| span.covers(hash))
}
