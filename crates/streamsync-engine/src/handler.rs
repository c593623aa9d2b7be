//! Sync operation handler: one per client session.
//!
//! The handler owns the session's outbound buffer. Everything the client
//! sees (updates from the bus, PONGs, debug DOWNs, the final CLOSE) goes
//! through that buffer and is drained by [`SyncStreamHandler::run`] in
//! arrival order.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use streamsync_core::{
    ErrorCode, ModifySyncRequest, ModifySyncResponse, Result, StreamId, SyncError, SyncOp,
    SyncStreamOpStatus, SyncStreamsResponse,
};
use streamsync_store::StreamStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::DynamicBuffer;
use crate::cancel::CancelSignal;
use crate::config::SyncConfig;
use crate::eventbus::SubscriptionManager;
use crate::subscribers::StreamSubscriber;
use crate::transport::SyncReceiver;

pub struct SyncStreamHandler {
    sync_id: String,
    receiver: Arc<dyn SyncReceiver>,
    buffer: DynamicBuffer<SyncStreamsResponse>,
    cancel: CancelSignal,
    /// Fires when `run` has returned.
    done: CancellationToken,
    /// Streams this session currently syncs. Only these can be backfilled.
    streams: Mutex<HashSet<StreamId>>,
    bus: Arc<dyn SubscriptionManager>,
    store: Arc<dyn StreamStore>,
    config: SyncConfig,
}

impl SyncStreamHandler {
    pub fn new(
        sync_id: impl Into<String>,
        receiver: Arc<dyn SyncReceiver>,
        bus: Arc<dyn SubscriptionManager>,
        store: Arc<dyn StreamStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            sync_id: sync_id.into(),
            receiver,
            buffer: DynamicBuffer::with_capacity(config.buffer_capacity),
            cancel: CancelSignal::new(),
            done: CancellationToken::new(),
            streams: Mutex::new(HashSet::new()),
            bus,
            store,
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.sync_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Why the session ended, if it ended with an error.
    pub fn cause(&self) -> Option<SyncError> {
        self.cancel.cause()
    }

    /// Send NEW, then drain the outbound buffer until CLOSE or failure.
    ///
    /// Returns `Ok` after a clean close and the cancellation cause otherwise.
    /// The session is removed from the bus on every exit path.
    pub async fn run(&self) -> Result<()> {
        info!(sync_id = %self.sync_id, "sync operation started");
        let result = self.run_loop().await;

        if let Err(e) = self.bus.enqueue_remove_subscriber(&self.sync_id) {
            warn!(sync_id = %self.sync_id, error = %e, "failed to release session from bus");
        }
        self.buffer.close();
        self.done.cancel();

        match &result {
            Ok(()) => info!(sync_id = %self.sync_id, "sync operation closed"),
            Err(e) => info!(sync_id = %self.sync_id, error = %e, "sync operation ended"),
        }
        result
    }

    async fn run_loop(&self) -> Result<()> {
        self.transmit(SyncStreamsResponse::new_sync(self.sync_id.clone()))
            .await?;

        let mut spare = None;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return self.cancel.cause().map_or(Ok(()), Err);
                }
                _ = self.buffer.wait() => {}
            }

            let Some(mut batch) = self.buffer.get_batch(spare.take()) else {
                return self.transmit(SyncStreamsResponse::close()).await;
            };

            for msg in batch.drain(..) {
                let op = msg.sync_op;
                self.transmit(msg).await?;
                if op == SyncOp::Close {
                    self.cancel.cancel(None);
                    return Ok(());
                }
            }
            spare = Some(batch);
        }
    }

    /// Stamp and send one message. A failed send cancels the session.
    async fn transmit(&self, mut msg: SyncStreamsResponse) -> Result<()> {
        msg.sync_id = self.sync_id.clone();
        if let Err(e) = self.receiver.send(msg).await {
            self.cancel.cancel(Some(e.clone()));
            return Err(e);
        }
        Ok(())
    }

    /// Apply a client modify request.
    ///
    /// Structural problems fail the call; per-stream problems are reported
    /// in the response.
    pub async fn modify(self: &Arc<Self>, request: &ModifySyncRequest) -> Result<ModifySyncResponse> {
        request.validate()?;
        if self.cancel.is_cancelled() {
            return Err(SyncError::Canceled("sync operation cancelled".into()));
        }

        let mut response = ModifySyncResponse::default();
        let subscriber: Arc<dyn StreamSubscriber> = Arc::clone(self) as Arc<dyn StreamSubscriber>;

        for cookie in &request.add_streams {
            let stream_id = cookie.stream_id;
            if let Err(e) = self.store.get_stream(&stream_id).await {
                response
                    .adds
                    .push(SyncStreamOpStatus::from_error(stream_id, &SyncError::from(e)));
                continue;
            }
            match self
                .bus
                .enqueue_subscribe(cookie.clone(), Arc::clone(&subscriber))
            {
                Ok(()) => {
                    self.streams.lock().insert(stream_id);
                }
                Err(e) => response.adds.push(SyncStreamOpStatus::from_error(stream_id, &e)),
            }
        }

        for stream_id in &request.remove_streams {
            self.streams.lock().remove(stream_id);
            if let Err(e) = self.bus.enqueue_unsubscribe(*stream_id, &self.sync_id) {
                response
                    .removals
                    .push(SyncStreamOpStatus::from_error(*stream_id, &e));
            }
        }

        if let Some(backfill) = &request.backfill_streams {
            let chain = request.target_sync_ids();
            for cookie in &backfill.streams {
                let stream_id = cookie.stream_id;
                if !self.is_syncing(&stream_id) {
                    response.backfills.push(SyncStreamOpStatus::new(
                        stream_id,
                        ErrorCode::NotFound,
                        "stream must be syncing to be backfilled",
                    ));
                    continue;
                }
                if let Err(e) = self.store.get_stream(&stream_id).await {
                    response
                        .backfills
                        .push(SyncStreamOpStatus::from_error(stream_id, &SyncError::from(e)));
                    continue;
                }
                if let Err(e) = self.bus.enqueue_backfill(cookie.clone(), chain.clone()) {
                    response
                        .backfills
                        .push(SyncStreamOpStatus::from_error(stream_id, &e));
                }
            }
        }

        debug!(
            sync_id = %self.sync_id,
            adds = request.add_streams.len(),
            removals = request.remove_streams.len(),
            backfills = request.backfill_streams.as_ref().map_or(0, |b| b.streams.len()),
            failed = response.adds.len() + response.removals.len() + response.backfills.len(),
            "modify sync applied"
        );
        Ok(response)
    }

    /// Whether the session currently syncs `stream_id`.
    pub fn is_syncing(&self, stream_id: &StreamId) -> bool {
        self.streams.lock().contains(stream_id)
    }

    /// Ask the session to close and wait until it has.
    pub async fn cancel(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Canceled("sync operation already cancelled".into()));
        }
        self.buffer
            .add_message(SyncStreamsResponse::close())
            .map_err(|_| SyncError::Unavailable("failed to add close message".into()))?;

        tokio::time::timeout(self.config.command_reply_timeout, self.done.cancelled())
            .await
            .map_err(|_| {
                SyncError::DeadlineExceeded("timed out waiting for sync operation to close".into())
            })
    }

    /// Queue a PONG echoing `nonce`.
    pub fn ping(&self, nonce: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Canceled("sync operation cancelled".into()));
        }
        self.buffer
            .add_message(SyncStreamsResponse::pong(nonce))
            .map_err(SyncError::from)
    }

    /// Drop one stream from the session and tell the client it went down.
    pub fn debug_drop_stream(&self, stream_id: StreamId) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Canceled("sync operation cancelled".into()));
        }
        self.streams.lock().remove(&stream_id);
        self.bus.enqueue_unsubscribe(stream_id, &self.sync_id)?;
        self.push_down(stream_id, "stream dropped on request")
    }

    /// Queue a DOWN for `stream_id` telling the client to resubscribe.
    pub fn push_down(&self, stream_id: StreamId, reason: impl Into<String>) -> Result<()> {
        self.buffer
            .add_message(SyncStreamsResponse::down(stream_id).with_message(reason))
            .map_err(SyncError::from)
    }
}

impl StreamSubscriber for SyncStreamHandler {
    fn sync_id(&self) -> &str {
        &self.sync_id
    }

    fn on_update(&self, update: SyncStreamsResponse) {
        if self.cancel.is_cancelled() {
            return;
        }
        if update.sync_op == SyncOp::Down {
            if let Some(stream_id) = update.stream_id() {
                self.streams.lock().remove(&stream_id);
            }
        }
        if let Err(e) = self.buffer.add_message(update) {
            warn!(sync_id = %self.sync_id, error = %e, "failed to queue update, cancelling session");
            self.cancel.cancel(Some(SyncError::from(e)));
        }
    }
}
