//! Stream store interface consumed by the sync engine.
//!
//! The engine never owns stream data. It looks streams up, asks where they
//! are placed, reads deltas since a cookie and subscribes to live changes.

use std::sync::Arc;

use async_trait::async_trait;
use streamsync_core::{StreamAndCookie, StreamId, SyncCookie, SyncError};

use crate::error::Result;
use crate::nodes::StreamNodes;

/// Handle returned by [`StoredStream::subscribe`].
pub type ListenerId = u64;

/// Receives live changes of one stream.
///
/// Callbacks run while the stream holds its internal lock. Implementations
/// must not block and must not call back into the same stream.
pub trait StreamListener: Send + Sync {
    /// A new delta was appended.
    fn on_update(&self, update: StreamAndCookie);

    /// The stream stopped serving; the listener has been dropped.
    fn on_down(&self, stream_id: StreamId, err: SyncError);
}

/// A stream known to this node.
pub trait StoredStream: Send + Sync {
    fn stream_id(&self) -> StreamId;

    /// Nodes the stream is placed on, with sticky-peer rotation.
    fn nodes(&self) -> &StreamNodes;

    /// Deliver everything after `cookie` to `callback`.
    ///
    /// The callback runs under the same lock that serializes live listener
    /// notifications, so a backfill and the live feed never interleave.
    /// Unknown or stale positions produce a single reset snapshot.
    fn updates_since_cookie(
        &self,
        cookie: &SyncCookie,
        callback: &mut dyn FnMut(StreamAndCookie),
    ) -> Result<()>;

    /// Register a live listener (no backfill).
    fn subscribe(&self, listener: Arc<dyn StreamListener>) -> ListenerId;

    /// Remove a listener. Unknown ids are ignored.
    fn unsubscribe(&self, id: ListenerId);
}

/// Lookup of streams by id.
#[async_trait]
pub trait StreamStore: Send + Sync {
    /// Look a stream up without waiting for it to load.
    ///
    /// Returns `StreamNotFound` when the stream is unknown to this node.
    async fn get_stream(&self, stream_id: &StreamId) -> Result<Arc<dyn StoredStream>>;
}
