//! In-memory implementation of the stream store.
//!
//! Each stream keeps its events in a vector with a running Blake3 hash chain.
//! Positions are expressed as `(generation, hash)` where the generation is the
//! number of events seen and the hash is the chain value after them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use streamsync_core::{NodeAddress, StreamAndCookie, StreamId, SyncCookie, SyncError};

use crate::error::{Result, StoreError};
use crate::nodes::StreamNodes;
use crate::traits::{ListenerId, StoredStream, StreamListener, StreamStore};

/// In-memory stream store.
///
/// All data is lost when the store is dropped.
pub struct MemoryStreamStore {
    local: NodeAddress,
    streams: RwLock<HashMap<StreamId, Arc<MemoryStream>>>,
}

impl MemoryStreamStore {
    pub fn new(local: NodeAddress) -> Self {
        Self {
            local,
            streams: RwLock::new(HashMap::new()),
        }
    }

    pub fn local_address(&self) -> NodeAddress {
        self.local
    }

    /// Register a stream placed on `nodes`. Replaces any previous entry.
    pub fn create_stream(&self, stream_id: StreamId, nodes: Vec<NodeAddress>) -> Arc<MemoryStream> {
        let stream = Arc::new(MemoryStream::new(stream_id, self.local, nodes));
        self.streams.write().insert(stream_id, Arc::clone(&stream));
        stream
    }

    pub fn stream(&self, stream_id: &StreamId) -> Option<Arc<MemoryStream>> {
        self.streams.read().get(stream_id).cloned()
    }

    /// Forget a stream. Its listeners receive a DOWN.
    pub fn remove_stream(&self, stream_id: &StreamId) {
        let removed = self.streams.write().remove(stream_id);
        if let Some(stream) = removed {
            stream.fail(SyncError::NotFound(format!("stream {} removed", stream_id)));
        }
    }
}

#[async_trait]
impl StreamStore for MemoryStreamStore {
    async fn get_stream(&self, stream_id: &StreamId) -> Result<Arc<dyn StoredStream>> {
        let stream = self
            .stream(stream_id)
            .ok_or(StoreError::StreamNotFound(*stream_id))?;
        Ok(stream as Arc<dyn StoredStream>)
    }
}

/// A single in-memory stream.
pub struct MemoryStream {
    stream_id: StreamId,
    local: NodeAddress,
    nodes: StreamNodes,
    state: Mutex<StreamState>,
}

struct StreamState {
    events: Vec<Bytes>,
    /// `hashes[i]` is the chain value after `i` events; `hashes[0]` is empty.
    hashes: Vec<Bytes>,
    listeners: Vec<(ListenerId, Arc<dyn StreamListener>)>,
    next_listener: ListenerId,
    failed: Option<SyncError>,
}

impl MemoryStream {
    fn new(stream_id: StreamId, local: NodeAddress, nodes: Vec<NodeAddress>) -> Self {
        Self {
            stream_id,
            local,
            nodes: StreamNodes::new(stream_id, local, nodes),
            state: Mutex::new(StreamState {
                events: Vec::new(),
                hashes: vec![Bytes::new()],
                listeners: Vec::new(),
                next_listener: 1,
                failed: None,
            }),
        }
    }

    /// Append an event and notify live listeners. Returns the new position.
    pub fn append(&self, event: impl Into<Bytes>) -> Result<SyncCookie> {
        let event = event.into();
        let mut state = self.state.lock();
        if let Some(err) = &state.failed {
            return Err(StoreError::Unavailable {
                stream_id: self.stream_id,
                reason: err.to_string(),
            });
        }

        let prev = state.hashes[state.hashes.len() - 1].clone();
        let mut hasher = blake3::Hasher::new();
        hasher.update(&prev);
        hasher.update(&event);
        let next = Bytes::copy_from_slice(hasher.finalize().as_bytes());

        state.events.push(event.clone());
        state.hashes.push(next);

        let update = StreamAndCookie {
            next_sync_cookie: self.cookie_at(&state, state.events.len()),
            events: vec![event],
            sync_reset: false,
        };
        for (_, listener) in &state.listeners {
            listener.on_update(update.clone());
        }
        Ok(update.next_sync_cookie)
    }

    /// Mark the stream as failed. Every listener receives `on_down` and is dropped.
    pub fn fail(&self, err: SyncError) {
        let mut state = self.state.lock();
        state.failed = Some(err.clone());
        let listeners = std::mem::take(&mut state.listeners);
        for (_, listener) in listeners {
            listener.on_down(self.stream_id, err.clone());
        }
        tracing::debug!(stream_id = %self.stream_id, error = %err, "stream failed");
    }

    /// Clear a previous failure so the stream can be subscribed again.
    pub fn recover(&self) {
        self.state.lock().failed = None;
    }

    /// Current position.
    pub fn cookie(&self) -> SyncCookie {
        let state = self.state.lock();
        self.cookie_at(&state, state.events.len())
    }

    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }

    fn cookie_at(&self, state: &StreamState, generation: usize) -> SyncCookie {
        SyncCookie::new(self.stream_id)
            .with_node(self.local)
            .at_position(generation as i64, state.hashes[generation].clone())
    }
}

impl StoredStream for MemoryStream {
    fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    fn nodes(&self) -> &StreamNodes {
        &self.nodes
    }

    fn updates_since_cookie(
        &self,
        cookie: &SyncCookie,
        callback: &mut dyn FnMut(StreamAndCookie),
    ) -> Result<()> {
        let state = self.state.lock();
        if let Some(err) = &state.failed {
            return Err(StoreError::Unavailable {
                stream_id: self.stream_id,
                reason: err.to_string(),
            });
        }

        let len = state.events.len();
        let known = usize::try_from(cookie.minipool_gen)
            .ok()
            .filter(|generation| *generation <= len)
            .filter(|generation| {
                cookie.prev_miniblock_hash.is_empty()
                    || cookie.prev_miniblock_hash == state.hashes[*generation]
            });

        let update = match known {
            Some(generation) => StreamAndCookie {
                next_sync_cookie: self.cookie_at(&state, len),
                events: state.events[generation..].to_vec(),
                sync_reset: false,
            },
            None => StreamAndCookie {
                next_sync_cookie: self.cookie_at(&state, len),
                events: state.events.clone(),
                sync_reset: true,
            },
        };
        callback(update);
        Ok(())
    }

    fn subscribe(&self, listener: Arc<dyn StreamListener>) -> ListenerId {
        let mut state = self.state.lock();
        let id = state.next_listener;
        state.next_listener += 1;
        state.listeners.push((id, listener));
        id
    }

    fn unsubscribe(&self, id: ListenerId) {
        self.state.lock().listeners.retain(|(lid, _)| *lid != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        updates: Mutex<Vec<StreamAndCookie>>,
        downs: Mutex<Vec<StreamId>>,
    }

    impl StreamListener for Recorder {
        fn on_update(&self, update: StreamAndCookie) {
            self.updates.lock().push(update);
        }

        fn on_down(&self, stream_id: StreamId, _err: SyncError) {
            self.downs.lock().push(stream_id);
        }
    }

    fn local() -> NodeAddress {
        NodeAddress::from_bytes([1; 20])
    }

    fn collect(stream: &MemoryStream, cookie: &SyncCookie) -> StreamAndCookie {
        let mut out = None;
        stream
            .updates_since_cookie(cookie, &mut |u| out = Some(u))
            .unwrap();
        out.unwrap()
    }

    #[tokio::test]
    async fn test_get_unknown_stream() {
        let store = MemoryStreamStore::new(local());
        let err = store.get_stream(&StreamId::derive("x")).await.err().unwrap();
        assert_eq!(err, StoreError::StreamNotFound(StreamId::derive("x")));
        assert_eq!(SyncError::from(err).code(), streamsync_core::ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_get_known_stream() {
        let store = MemoryStreamStore::new(local());
        let id = StreamId::derive("a");
        store.create_stream(id, vec![local()]);
        let stream = store.get_stream(&id).await.unwrap();
        assert_eq!(stream.stream_id(), id);
        assert!(stream.nodes().is_local());
    }

    #[test]
    fn test_delta_since_cookie() {
        let store = MemoryStreamStore::new(local());
        let stream = store.create_stream(StreamId::derive("a"), vec![local()]);
        stream.append(&b"e1"[..]).unwrap();
        let mid = stream.append(&b"e2"[..]).unwrap();
        stream.append(&b"e3"[..]).unwrap();

        let delta = collect(&stream, &mid);
        assert!(!delta.sync_reset);
        assert_eq!(delta.events, vec![Bytes::from_static(b"e3")]);
        assert_eq!(delta.next_sync_cookie.minipool_gen, 3);
    }

    #[test]
    fn test_unknown_position_resets() {
        let store = MemoryStreamStore::new(local());
        let id = StreamId::derive("a");
        let stream = store.create_stream(id, vec![local()]);
        stream.append(&b"e1"[..]).unwrap();

        let snapshot = collect(&stream, &SyncCookie::latest(id, None));
        assert!(snapshot.sync_reset);
        assert_eq!(snapshot.events.len(), 1);

        let wrong_hash = SyncCookie::new(id).at_position(1, Bytes::from_static(b"nope"));
        assert!(collect(&stream, &wrong_hash).sync_reset);
    }

    #[test]
    fn test_listeners_receive_appends() {
        let store = MemoryStreamStore::new(local());
        let stream = store.create_stream(StreamId::derive("a"), vec![local()]);
        let recorder = Arc::new(Recorder::default());
        let id = stream.subscribe(recorder.clone());

        stream.append(&b"e1"[..]).unwrap();
        stream.unsubscribe(id);
        stream.append(&b"e2"[..]).unwrap();

        let updates = recorder.updates.lock();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].events, vec![Bytes::from_static(b"e1")]);
    }

    #[test]
    fn test_fail_notifies_and_drops_listeners() {
        let store = MemoryStreamStore::new(local());
        let id = StreamId::derive("a");
        let stream = store.create_stream(id, vec![local()]);
        let recorder = Arc::new(Recorder::default());
        stream.subscribe(recorder.clone());

        stream.fail(SyncError::Unavailable("disk".into()));
        assert_eq!(*recorder.downs.lock(), vec![id]);
        assert_eq!(stream.listener_count(), 0);
        assert!(stream.append(&b"e1"[..]).is_err());

        stream.recover();
        assert!(stream.append(&b"e1"[..]).is_ok());
    }
}
