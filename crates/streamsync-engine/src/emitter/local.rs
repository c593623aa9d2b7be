//! Emitter for streams hosted by the local node.

use std::sync::Arc;

use streamsync_core::{StreamAndCookie, StreamId, SyncError, SyncStreamsResponse};
use streamsync_store::{ListenerId, StoredStream, StreamListener};
use tracing::{debug, warn};

use super::{BackfillRequest, EmitterCore};

/// Republishes a local stream's live feed and serves backfills from the store.
///
/// Backfills read the store under the same lock as live notifications, so
/// the targeted snapshot lands in the sink's queue exactly between the live
/// updates that precede and follow it.
pub struct LocalStreamEmitter {
    core: Arc<EmitterCore>,
    stream: Arc<dyn StoredStream>,
    listener: ListenerId,
}

struct LiveFeed {
    core: Arc<EmitterCore>,
}

impl StreamListener for LiveFeed {
    fn on_update(&self, update: StreamAndCookie) {
        self.core.emit(SyncStreamsResponse::update(Arc::new(update)));
    }

    fn on_down(&self, stream_id: StreamId, err: SyncError) {
        debug!(stream_id = %stream_id, error = %err, "local stream went down");
        self.core.cancel_signal().cancel(Some(err));
    }
}

impl LocalStreamEmitter {
    /// Attach to the stream's live feed.
    pub fn start(core: Arc<EmitterCore>, stream: Arc<dyn StoredStream>) -> Self {
        let listener = stream.subscribe(Arc::new(LiveFeed {
            core: Arc::clone(&core),
        }));
        Self {
            core,
            stream,
            listener,
        }
    }

    /// Serve backfills until cancelled, then send the final DOWNs.
    /// Returns the cancellation cause.
    pub async fn run(self) -> Option<SyncError> {
        let core = Arc::clone(&self.core);
        let cause = self.serve().await;
        core.finish();
        cause
    }

    /// Like [`run`](Self::run) but leaves the final DOWNs to the caller.
    pub async fn serve(self) -> Option<SyncError> {
        let mut spare = None;
        loop {
            tokio::select! {
                _ = self.core.cancel_signal().cancelled() => break,
                _ = self.core.backfills().wait() => {}
            }

            match self.core.backfills().get_batch(spare.take()) {
                Some(mut requests) => {
                    for request in requests.drain(..) {
                        self.backfill(&request);
                    }
                    spare = Some(requests);
                }
                None => break,
            }
        }

        self.stream.unsubscribe(self.listener);
        self.core.cancel_signal().cancel(None);
        self.core.cancel_signal().cause()
    }

    fn backfill(&self, request: &BackfillRequest) {
        let core = &self.core;
        let result = self.stream.updates_since_cookie(&request.cookie, &mut |update| {
            core.emit(
                SyncStreamsResponse::update(Arc::new(update))
                    .with_targets(request.sync_ids.clone()),
            );
        });

        if let Err(e) = result {
            warn!(
                stream_id = %self.stream.stream_id(),
                sync_ids = ?request.sync_ids,
                error = %e,
                "local backfill failed"
            );
            core.emit_backfill_down(request);
        }
    }
}
