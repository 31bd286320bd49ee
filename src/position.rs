//! Resumption positions and event header decoding
//!
//! A position is a replication operation timestamp packed into a signed
//! 64-bit value: seconds in the high 32 bits, an in-second increment in the
//! low 32 bits. Ordering of positions follows ordering of the packed value.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical timestamp marking where a reader (re)starts on the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(i64);

impl Position {
    /// "Not set yet - take the first event observed."
    pub const UNSET: Position = Position(-1);

    /// Position reported for an empty overflow queue.
    pub const ZERO: Position = Position(0);

    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Packs `(seconds, increment)` the way replication timestamps are stored.
    pub const fn from_parts(seconds: u32, increment: u32) -> Self {
        Self(((seconds as u64) << 32 | increment as u64) as i64)
    }

    pub const fn as_i64(&self) -> i64 {
        self.0
    }

    pub const fn is_unset(&self) -> bool {
        self.0 == Self::UNSET.0
    }

    pub const fn seconds(&self) -> u32 {
        ((self.0 as u64) >> 32) as u32
    }

    pub const fn increment(&self) -> u32 {
        self.0 as u64 as u32
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unset() {
            write!(f, "unset")
        } else {
            write!(f, "{}:{}", self.seconds(), self.increment())
        }
    }
}

impl From<i64> for Position {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

/// The single field of an encoded event the reader interprets.
#[derive(Debug, Deserialize)]
struct EventHeader {
    #[serde(rename = "clusterTime")]
    cluster_time: Position,
}

/// Extracts the operation timestamp from a JSON-encoded change event.
///
/// All other fields are ignored.
pub fn extract_position(event: &[u8]) -> Result<Position, serde_json::Error> {
    serde_json::from_slice::<EventHeader>(event).map(|header| header.cluster_time)
}
