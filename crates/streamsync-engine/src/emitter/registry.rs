//! Emitter registry: at most one live emitter per stream.
//!
//! Owned by the event bus task. Each launch gets a fresh version, so
//! messages from an emitter that has since been replaced can always be told
//! apart from the current one's.

use std::collections::HashMap;
use std::sync::Arc;

use streamsync_core::{StreamId, SyncCookie};
use tracing::{debug, warn};

use super::{EmitterLauncher, StreamEventSink, StreamUpdateEmitter};
use crate::metrics;
use crate::version::EmitterVersion;

pub struct EmitterRegistry {
    launcher: Arc<dyn EmitterLauncher>,
    emitters: HashMap<StreamId, Arc<dyn StreamUpdateEmitter>>,
    next_version: Option<EmitterVersion>,
}

impl EmitterRegistry {
    pub fn new(launcher: Arc<dyn EmitterLauncher>) -> Self {
        Self {
            launcher,
            emitters: HashMap::new(),
            next_version: Some(EmitterVersion::initial()),
        }
    }

    /// Make sure an emitter exists for the cookie's stream and queue a
    /// backfill for `sync_ids` on it.
    ///
    /// An emitter that refuses the backfill is shutting down; it is replaced
    /// by a new one with the next version.
    pub fn subscribe_and_backfill(
        &mut self,
        cookie: &SyncCookie,
        sync_ids: Vec<String>,
        sink: Arc<dyn StreamEventSink>,
    ) {
        let stream_id = cookie.stream_id;
        if let Some(emitter) = self.emitters.get(&stream_id) {
            if emitter.enqueue_backfill(cookie.clone(), sync_ids.clone()) {
                return;
            }
            debug!(
                stream_id = %stream_id,
                version = %emitter.version(),
                "emitter refused backfill, replacing"
            );
            self.emitters.remove(&stream_id);
        }

        let Some(version) = self.allocate_version() else {
            warn!(stream_id = %stream_id, "emitter versions exhausted");
            return;
        };

        let emitter = self.launcher.launch(cookie, version, sink);
        if !emitter.enqueue_backfill(cookie.clone(), sync_ids) {
            // The fresh emitter will still send its final DOWN to the
            // version bucket, which releases the waiting subscribers.
            warn!(stream_id = %stream_id, version = %version, "new emitter refused backfill");
        }
        self.emitters.insert(stream_id, emitter);
        metrics::set_active_emitters(self.emitters.len());
    }

    /// Stop and forget the stream's emitter, if any.
    pub fn unsubscribe(&mut self, stream_id: &StreamId) {
        if let Some(emitter) = self.emitters.remove(stream_id) {
            emitter.close();
            metrics::set_active_emitters(self.emitters.len());
        }
    }

    /// Version of the stream's current emitter.
    pub fn current_version(&self, stream_id: &StreamId) -> Option<EmitterVersion> {
        self.emitters.get(stream_id).map(|e| e.version())
    }

    /// Stop every emitter.
    pub fn close_all(&mut self) {
        for (_, emitter) in self.emitters.drain() {
            emitter.close();
        }
        metrics::set_active_emitters(0);
    }

    pub fn len(&self) -> usize {
        self.emitters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emitters.is_empty()
    }

    fn allocate_version(&mut self) -> Option<EmitterVersion> {
        let version = self.next_version?;
        self.next_version = version.next();
        Some(version)
    }
}
