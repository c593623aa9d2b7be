//! Stream update emitters.
//!
//! An emitter adapts one stream's native feed (the local store, or a session
//! on a peer node) into versioned envelopes handed to a [`StreamEventSink`],
//! normally the event bus. One emitter runs per stream while anyone needs it.
//!
//! ## Lifecycle
//!
//! ```text
//! launch ──▶ connect (local store or remote session)
//!              │
//!              ├── live feed ───────────▶ UPDATE(version)
//!              ├── backfill queue ──────▶ UPDATE(version, chain)
//!              │
//! failure / close ──▶ DOWN(version) + DOWN(version, chain) per queued backfill
//! ```
//!
//! Every emitter guarantees the final DOWN, so a subscriber is never left
//! waiting on an emitter that no longer exists.

pub mod local;
pub mod registry;
pub mod remote;

use std::sync::Arc;

use parking_lot::Mutex;
use streamsync_core::{NodeAddress, StreamId, SyncCookie, SyncError, SyncStreamsResponse};
use tracing::debug;

use crate::buffer::DynamicBuffer;
use crate::cancel::CancelSignal;
use crate::version::EmitterVersion;

pub use local::LocalStreamEmitter;
pub use registry::EmitterRegistry;
pub use remote::RemoteStreamEmitter;

/// Out-of-band request to send a stream's state since `cookie` to the
/// session chain `sync_ids`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillRequest {
    pub cookie: SyncCookie,
    pub sync_ids: Vec<String>,
}

/// Receives versioned envelopes from emitters. Must not block.
pub trait StreamEventSink: Send + Sync {
    fn on_stream_event(&self, msg: SyncStreamsResponse, version: EmitterVersion);
}

/// Control surface of a running emitter.
pub trait StreamUpdateEmitter: Send + Sync {
    fn stream_id(&self) -> StreamId;

    fn version(&self) -> EmitterVersion;

    /// Node serving the stream, once selected.
    fn node(&self) -> Option<NodeAddress>;

    /// Queue a backfill. Returns `false` if the emitter is shutting down and
    /// a fresh one has to be created.
    fn enqueue_backfill(&self, cookie: SyncCookie, sync_ids: Vec<String>) -> bool;

    /// Stop the emitter. Subscribers still receive the final DOWN.
    fn close(&self);
}

/// Launches emitters for the emitter registry.
pub trait EmitterLauncher: Send + Sync {
    /// Start an emitter for `cookie.stream_id` without blocking.
    ///
    /// Connection happens in the background; failures surface as the
    /// emitter's final DOWN.
    fn launch(
        &self,
        cookie: &SyncCookie,
        version: EmitterVersion,
        sink: Arc<dyn StreamEventSink>,
    ) -> Arc<dyn StreamUpdateEmitter>;
}

/// State shared by the emitter handle and its background task.
pub struct EmitterCore {
    stream_id: StreamId,
    version: EmitterVersion,
    node: Mutex<Option<NodeAddress>>,
    backfills: DynamicBuffer<BackfillRequest>,
    cancel: CancelSignal,
    sink: Arc<dyn StreamEventSink>,
}

impl EmitterCore {
    pub fn new(
        stream_id: StreamId,
        version: EmitterVersion,
        sink: Arc<dyn StreamEventSink>,
        capacity: usize,
    ) -> Self {
        Self {
            stream_id,
            version,
            node: Mutex::new(None),
            backfills: DynamicBuffer::with_capacity(capacity),
            cancel: CancelSignal::new(),
            sink,
        }
    }

    pub fn set_node(&self, node: NodeAddress) {
        *self.node.lock() = Some(node);
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    pub fn backfills(&self) -> &DynamicBuffer<BackfillRequest> {
        &self.backfills
    }

    /// Hand an envelope to the sink, tagged with this emitter's version.
    pub fn emit(&self, msg: SyncStreamsResponse) {
        self.sink.on_stream_event(msg, self.version);
    }

    /// Targeted DOWN for one backfill chain.
    pub fn emit_backfill_down(&self, request: &BackfillRequest) {
        self.emit(
            SyncStreamsResponse::down(self.stream_id).with_targets(request.sync_ids.clone()),
        );
    }

    /// Final notifications: one untargeted DOWN, then a targeted DOWN for
    /// every backfill still queued.
    pub fn finish(&self) {
        self.cancel.cancel(None);
        self.backfills.close();
        let pending = self.backfills.get_batch(None).unwrap_or_default();

        debug!(
            stream_id = %self.stream_id,
            version = %self.version,
            pending_backfills = pending.len(),
            cause = ?self.cancel.cause(),
            "emitter finished"
        );

        self.emit(SyncStreamsResponse::down(self.stream_id));
        for request in &pending {
            self.emit_backfill_down(request);
        }
    }
}

impl StreamUpdateEmitter for EmitterCore {
    fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    fn version(&self) -> EmitterVersion {
        self.version
    }

    fn node(&self) -> Option<NodeAddress> {
        *self.node.lock()
    }

    fn enqueue_backfill(&self, cookie: SyncCookie, sync_ids: Vec<String>) -> bool {
        match self.backfills.add_message(BackfillRequest { cookie, sync_ids }) {
            Ok(()) => true,
            Err(e) => {
                self.cancel.cancel(Some(SyncError::Unavailable(format!(
                    "failed to queue backfill: {}",
                    e
                ))));
                false
            }
        }
    }

    fn close(&self) {
        self.cancel.cancel(None);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use streamsync_core::SyncOp;

    /// Records every envelope an emitter produces.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub(crate) events: Mutex<Vec<(SyncStreamsResponse, EmitterVersion)>>,
        notify: tokio::sync::Notify,
    }

    impl RecordingSink {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Wait until at least `n` events were recorded.
        pub(crate) async fn wait_for(&self, n: usize) -> Vec<(SyncStreamsResponse, EmitterVersion)> {
            loop {
                let notified = self.notify.notified();
                {
                    let events = self.events.lock();
                    if events.len() >= n {
                        return events.clone();
                    }
                }
                tokio::time::timeout(std::time::Duration::from_secs(5), notified)
                    .await
                    .expect("timed out waiting for emitter events");
            }
        }
    }

    impl StreamEventSink for RecordingSink {
        fn on_stream_event(&self, msg: SyncStreamsResponse, version: EmitterVersion) {
            self.events.lock().push((msg, version));
            self.notify.notify_waiters();
        }
    }

    #[test]
    fn test_finish_sends_general_then_targeted_downs() {
        let sink = RecordingSink::new();
        let stream_id = StreamId::derive("s");
        let core = EmitterCore::new(stream_id, EmitterVersion::Emitter(4), sink.clone(), 16);

        assert!(core.enqueue_backfill(SyncCookie::new(stream_id), vec!["a".into()]));
        assert!(core.enqueue_backfill(SyncCookie::new(stream_id), vec!["b".into(), "c".into()]));
        core.finish();

        let events = sink.events.lock();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].0.sync_op, SyncOp::Down);
        assert!(events[0].0.target_sync_ids.is_empty());
        assert_eq!(events[1].0.target_sync_ids, vec!["a".to_string()]);
        assert_eq!(events[2].0.target_sync_ids, vec!["b".to_string(), "c".to_string()]);
        assert!(events.iter().all(|(_, v)| *v == EmitterVersion::Emitter(4)));
    }

    #[test]
    fn test_enqueue_after_close_cancels() {
        let sink = RecordingSink::new();
        let core = EmitterCore::new(StreamId::derive("s"), EmitterVersion::initial(), sink, 16);
        core.backfills().close();

        assert!(!core.enqueue_backfill(SyncCookie::new(StreamId::derive("s")), vec!["a".into()]));
        assert!(core.cancel_signal().is_cancelled());
        assert!(core.cancel_signal().cause().is_some());
    }

    #[test]
    fn test_close_is_clean() {
        let sink = RecordingSink::new();
        let core = EmitterCore::new(StreamId::derive("s"), EmitterVersion::initial(), sink, 16);
        core.close();
        assert!(core.cancel_signal().is_cancelled());
        assert_eq!(core.cancel_signal().cause(), None);
    }
}
