//! Stream identifiers and sync cookies.
//!
//! A stream is an append-only replicated log. Clients track their position in
//! it with a [`SyncCookie`], which also carries the node they believe serves
//! the stream.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::NodeAddress;

/// A 32-byte stream identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(pub [u8; 32]);

impl StreamId {
    /// Derive a stream ID from a human-readable name.
    ///
    /// Used by tests and tooling that want stable ids without hardcoding bytes.
    pub fn derive(name: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"streamsync-stream-v0:");
        hasher.update(name.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// The zero stream ID (sentinel).
    pub const ZERO: Self = Self([0u8; 32]);
}

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl AsRef<[u8]> for StreamId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for StreamId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for StreamId {
    type Error = std::array::TryFromSliceError;

    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 32] = slice.try_into()?;
        Ok(Self(arr))
    }
}

/// A position marker in a stream.
///
/// `minipool_gen` and `prev_miniblock_hash` identify the last state the
/// holder has seen. `node_address` is the node the holder believes serves
/// the stream; `None` leaves node selection to the receiving side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCookie {
    pub node_address: Option<NodeAddress>,
    pub stream_id: StreamId,
    pub minipool_gen: i64,
    pub prev_miniblock_hash: Bytes,
}

impl SyncCookie {
    /// A cookie positioned at the start of the stream.
    pub fn new(stream_id: StreamId) -> Self {
        Self {
            node_address: None,
            stream_id,
            minipool_gen: 0,
            prev_miniblock_hash: Bytes::new(),
        }
    }

    /// A cookie that asks for the stream's current state without history.
    ///
    /// Used when a stream is first added to an emitter: the generation is
    /// beyond any real position, so the store answers with a reset snapshot.
    pub fn latest(stream_id: StreamId, node_address: Option<NodeAddress>) -> Self {
        Self {
            node_address,
            stream_id,
            minipool_gen: i64::MAX,
            prev_miniblock_hash: Bytes::from_static(&[0u8; 32]),
        }
    }

    pub fn with_node(mut self, node_address: NodeAddress) -> Self {
        self.node_address = Some(node_address);
        self
    }

    pub fn at_position(mut self, minipool_gen: i64, prev_miniblock_hash: Bytes) -> Self {
        self.minipool_gen = minipool_gen;
        self.prev_miniblock_hash = prev_miniblock_hash;
        self
    }

    /// Copy of this cookie pointing at a different node.
    pub fn copy_with_addr(&self, node_address: NodeAddress) -> Self {
        Self {
            node_address: Some(node_address),
            ..self.clone()
        }
    }

    /// The hinted node, ignoring the zero address.
    pub fn node_hint(&self) -> Option<NodeAddress> {
        self.node_address.filter(|addr| !addr.is_zero())
    }
}
