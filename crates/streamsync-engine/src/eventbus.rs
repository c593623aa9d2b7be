//! Event bus.
//!
//! A single actor task owns the subscriber registry and the emitter
//! registry. Sessions and emitters talk to it only through its command
//! buffer, so neither registry is locked.
//!
//! ## Routing
//!
//! | Message                 | Effect                                                  |
//! |-------------------------|---------------------------------------------------------|
//! | UPDATE, untargeted      | delivered to the emitting version's bucket              |
//! | UPDATE, chain `[s, ..]` | `s` leaves pending for the version bucket, gets `[..]`  |
//! | DOWN, current version   | every bucket gets DOWN, stream entry and emitter go     |
//! | DOWN, stale version     | only that version's bucket is cleared                   |
//! | DOWN, chain `[s, ..]`   | `s` is removed from the stream and gets `[..]`          |
//!
//! An emitter that no subscriber needs any more is closed.

use std::sync::Arc;

use parking_lot::Mutex;
use streamsync_core::{Result, StreamId, SyncCookie, SyncError, SyncOp, SyncStreamsResponse};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::buffer::{BufferError, DynamicBuffer};
use crate::config::SyncConfig;
use crate::emitter::{EmitterLauncher, EmitterRegistry, StreamEventSink};
use crate::metrics;
use crate::subscribers::{StreamSubscriber, SubscriberRegistry};
use crate::version::EmitterVersion;

/// Session-facing side of the bus. Every call only enqueues.
pub trait SubscriptionManager: Send + Sync {
    /// Add `subscriber` to the stream's pending bucket and request its
    /// backfill from `cookie`.
    fn enqueue_subscribe(&self, cookie: SyncCookie, subscriber: Arc<dyn StreamSubscriber>) -> Result<()>;

    /// Remove a session from one stream. Unknown sessions are ignored.
    fn enqueue_unsubscribe(&self, stream_id: StreamId, sync_id: &str) -> Result<()>;

    /// Request a backfill routed through the session chain `sync_ids`.
    fn enqueue_backfill(&self, cookie: SyncCookie, sync_ids: Vec<String>) -> Result<()>;

    /// Remove a session from every stream.
    fn enqueue_remove_subscriber(&self, sync_id: &str) -> Result<()>;
}

enum BusCommand {
    Subscribe {
        cookie: SyncCookie,
        subscriber: Arc<dyn StreamSubscriber>,
    },
    Unsubscribe {
        stream_id: StreamId,
        sync_id: String,
    },
    Backfill {
        cookie: SyncCookie,
        sync_ids: Vec<String>,
    },
    RemoveSubscriber {
        sync_id: String,
    },
    StreamEvent {
        msg: SyncStreamsResponse,
        version: EmitterVersion,
    },
    Flush(oneshot::Sender<()>),
}

struct BusShared {
    queue: DynamicBuffer<BusCommand>,
    /// DOWNs standing in for emitter events that did not fit the queue.
    overflow: Mutex<Vec<(SyncStreamsResponse, EmitterVersion)>>,
}

impl BusShared {
    fn enqueue(&self, command: BusCommand) -> Result<()> {
        self.queue.add_message(command).map_err(|e| {
            SyncError::Unavailable(format!("failed to enqueue bus command: {}", e))
        })
    }
}

impl StreamEventSink for BusShared {
    fn on_stream_event(&self, msg: SyncStreamsResponse, version: EmitterVersion) {
        let fallback = msg
            .stream_id()
            .map(|id| SyncStreamsResponse::down(id).with_targets(msg.target_sync_ids.clone()));

        match self.queue.add_message(BusCommand::StreamEvent { msg, version }) {
            Ok(()) => {}
            Err(BufferError::Full) => {
                error!(version = %version, "event bus queue full, downgrading stream event to DOWN");
                if let Some(down) = fallback {
                    self.overflow.lock().push((down, version));
                }
            }
            Err(BufferError::Closed) => {
                debug!(version = %version, "event bus closed, dropping stream event");
            }
        }
    }
}

/// Handle to the event bus actor.
pub struct EventBus {
    shared: Arc<BusShared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EventBus {
    /// Spawn the actor. Emitters are started through `launcher`.
    pub fn new(launcher: Arc<dyn EmitterLauncher>, config: &SyncConfig) -> Self {
        let shared = Arc::new(BusShared {
            queue: DynamicBuffer::with_capacity(config.buffer_capacity),
            overflow: Mutex::new(Vec::new()),
        });
        let state = BusState {
            subscribers: SubscriberRegistry::new(),
            emitters: EmitterRegistry::new(launcher),
            sink: Arc::clone(&shared) as Arc<dyn StreamEventSink>,
        };
        let task = tokio::spawn(run(Arc::clone(&shared), state));
        Self {
            shared,
            task: Mutex::new(Some(task)),
        }
    }

    /// Sink emitters publish into.
    pub fn sink(&self) -> Arc<dyn StreamEventSink> {
        Arc::clone(&self.shared) as Arc<dyn StreamEventSink>
    }

    /// Resolves once every command enqueued before this call was processed.
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.shared.enqueue(BusCommand::Flush(tx))?;
        rx.await
            .map_err(|_| SyncError::Unavailable("event bus stopped".into()))
    }

    /// Stop accepting commands, drain what is queued and close every emitter.
    pub async fn shutdown(&self) {
        self.shared.queue.close();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "event bus task failed");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.queue.is_closed()
    }
}

impl SubscriptionManager for EventBus {
    fn enqueue_subscribe(&self, cookie: SyncCookie, subscriber: Arc<dyn StreamSubscriber>) -> Result<()> {
        self.shared.enqueue(BusCommand::Subscribe { cookie, subscriber })
    }

    fn enqueue_unsubscribe(&self, stream_id: StreamId, sync_id: &str) -> Result<()> {
        self.shared.enqueue(BusCommand::Unsubscribe {
            stream_id,
            sync_id: sync_id.to_string(),
        })
    }

    fn enqueue_backfill(&self, cookie: SyncCookie, sync_ids: Vec<String>) -> Result<()> {
        if sync_ids.is_empty() {
            return Err(SyncError::InvalidArgument(
                "backfill without target sessions".into(),
            ));
        }
        self.shared.enqueue(BusCommand::Backfill { cookie, sync_ids })
    }

    fn enqueue_remove_subscriber(&self, sync_id: &str) -> Result<()> {
        self.shared.enqueue(BusCommand::RemoveSubscriber {
            sync_id: sync_id.to_string(),
        })
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.shared.queue.close();
    }
}

async fn run(shared: Arc<BusShared>, mut state: BusState) {
    info!("event bus started");
    let mut spare = None;
    loop {
        shared.queue.wait().await;
        let Some(mut batch) = shared.queue.get_batch(spare.take()) else {
            break;
        };
        metrics::set_queue_depth(batch.len());

        for command in batch.drain(..) {
            state.process(command);
        }

        let overflow = std::mem::take(&mut *shared.overflow.lock());
        for (msg, version) in overflow {
            state.on_stream_event(msg, version);
        }

        spare = Some(batch);
    }

    state.emitters.close_all();
    metrics::set_queue_depth(0);
    info!(
        streams = state.subscribers.stream_count(),
        "event bus stopped"
    );
}

struct BusState {
    subscribers: SubscriberRegistry,
    emitters: EmitterRegistry,
    sink: Arc<dyn StreamEventSink>,
}

impl BusState {
    fn process(&mut self, command: BusCommand) {
        match command {
            BusCommand::Subscribe { cookie, subscriber } => self.subscribe(cookie, subscriber),
            BusCommand::Unsubscribe { stream_id, sync_id } => self.unsubscribe(stream_id, &sync_id),
            BusCommand::Backfill { cookie, sync_ids } => {
                self.emitters
                    .subscribe_and_backfill(&cookie, sync_ids, Arc::clone(&self.sink));
            }
            BusCommand::RemoveSubscriber { sync_id } => {
                for stream_id in self.subscribers.remove_everywhere(&sync_id) {
                    self.emitters.unsubscribe(&stream_id);
                }
            }
            BusCommand::StreamEvent { msg, version } => self.on_stream_event(msg, version),
            BusCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    fn subscribe(&mut self, cookie: SyncCookie, subscriber: Arc<dyn StreamSubscriber>) {
        let sync_id = subscriber.sync_id().to_string();
        if !self.subscribers.entry(cookie.stream_id).add_pending(subscriber) {
            // Re-adding a synced stream only catches the session up again.
            debug!(stream_id = %cookie.stream_id, sync_id = %sync_id, "already subscribed, backfilling");
        }
        self.emitters
            .subscribe_and_backfill(&cookie, vec![sync_id], Arc::clone(&self.sink));
    }

    fn unsubscribe(&mut self, stream_id: StreamId, sync_id: &str) {
        let Some(subs) = self.subscribers.get_mut(&stream_id) else {
            return;
        };
        if subs.remove(sync_id).is_none() {
            return;
        }
        self.release_if_empty(&stream_id);
    }

    fn on_stream_event(&mut self, msg: SyncStreamsResponse, version: EmitterVersion) {
        let Some(stream_id) = msg.stream_id() else {
            warn!(op = ?msg.sync_op, "stream event without stream id");
            return;
        };
        if msg.is_targeted() {
            self.on_targeted(stream_id, msg, version);
        } else {
            self.on_untargeted(stream_id, msg, version);
        }
    }

    fn on_untargeted(&mut self, stream_id: StreamId, msg: SyncStreamsResponse, version: EmitterVersion) {
        match msg.sync_op {
            SyncOp::Update => {
                if let Some(subs) = self.subscribers.get(&stream_id) {
                    subs.send(version, &msg);
                }
            }
            SyncOp::Down => {
                if version == EmitterVersion::Broadcast {
                    if let Some(subs) = self.subscribers.remove_stream(&stream_id) {
                        let notified = subs.send(EmitterVersion::Broadcast, &msg);
                        debug!(stream_id = %stream_id, notified, "stream down on every version");
                    }
                    self.emitters.unsubscribe(&stream_id);
                    return;
                }

                // Only the sessions served by this version are affected.
                if self.emitters.current_version(&stream_id) == Some(version) {
                    self.emitters.unsubscribe(&stream_id);
                }
                if let Some(subs) = self.subscribers.get_mut(&stream_id) {
                    let cleared = subs.clear_version(version);
                    debug!(
                        stream_id = %stream_id,
                        version = %version,
                        notified = cleared.len(),
                        "stream down"
                    );
                    for subscriber in cleared {
                        subscriber.on_update(msg.tailored());
                    }
                    self.release_if_empty(&stream_id);
                }
            }
            op => debug!(stream_id = %stream_id, op = ?op, "ignoring stream event"),
        }
    }

    fn on_targeted(&mut self, stream_id: StreamId, mut msg: SyncStreamsResponse, version: EmitterVersion) {
        let target = msg.target_sync_ids.remove(0);
        match msg.sync_op {
            SyncOp::Update => {
                let Some(subs) = self.subscribers.get_mut(&stream_id) else {
                    // Nobody left to route through.
                    self.release_orphan(&stream_id, version);
                    return;
                };
                let subscriber = match subs.move_pending(&target, version) {
                    Some(subscriber) => Some(subscriber),
                    None => subs.find(&target, version).cloned(),
                };
                match subscriber {
                    Some(subscriber) => subscriber.on_update(msg),
                    None => debug!(
                        stream_id = %stream_id,
                        sync_id = %target,
                        version = %version,
                        "no subscriber for targeted update"
                    ),
                }
            }
            SyncOp::Down => {
                let Some(subs) = self.subscribers.get_mut(&stream_id) else {
                    self.release_orphan(&stream_id, version);
                    return;
                };
                if let Some(subscriber) = subs.remove(&target) {
                    subscriber.on_update(msg);
                }
                self.release_if_empty(&stream_id);
            }
            op => debug!(stream_id = %stream_id, op = ?op, "ignoring targeted stream event"),
        }
    }

    /// Close the current emitter of a stream that has no subscriber entry.
    fn release_orphan(&mut self, stream_id: &StreamId, version: EmitterVersion) {
        if self.emitters.current_version(stream_id) == Some(version) {
            self.emitters.unsubscribe(stream_id);
        }
    }

    /// Drop the stream's entry and emitter once no session listens.
    fn release_if_empty(&mut self, stream_id: &StreamId) {
        let empty = self
            .subscribers
            .get(stream_id)
            .is_some_and(|subs| subs.is_empty());
        if empty {
            self.subscribers.remove_stream(stream_id);
            self.emitters.unsubscribe(stream_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::registry::tests::StubLauncher;
    use crate::emitter::{EmitterCore, StreamUpdateEmitter};
    use crate::subscribers::tests::FakeSubscriber;
    use streamsync_core::StreamAndCookie;

    fn setup() -> (Arc<StubLauncher>, EventBus) {
        let launcher = Arc::new(StubLauncher::default());
        let bus = EventBus::new(launcher.clone(), &SyncConfig::default());
        (launcher, bus)
    }

    fn emitter(launcher: &StubLauncher, idx: usize) -> Arc<EmitterCore> {
        Arc::clone(&launcher.launched.lock()[idx])
    }

    fn update(stream_id: StreamId) -> SyncStreamsResponse {
        SyncStreamsResponse::update(Arc::new(StreamAndCookie {
            next_sync_cookie: SyncCookie::new(stream_id),
            events: vec![],
            sync_reset: false,
        }))
    }

    async fn subscribe(bus: &EventBus, stream_id: StreamId, sub: &Arc<FakeSubscriber>) {
        bus.enqueue_subscribe(SyncCookie::new(stream_id), sub.clone()).unwrap();
        bus.flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_backfill_then_live() {
        let (launcher, bus) = setup();
        let stream = StreamId::derive("a");
        let s1 = FakeSubscriber::new("sync-1");
        subscribe(&bus, stream, &s1).await;

        let core = emitter(&launcher, 0);
        assert_eq!(core.version(), EmitterVersion::initial());
        assert_eq!(core.backfills().len(), 1);

        core.emit(update(stream).with_targets(vec!["sync-1".into()]));
        core.emit(update(stream));
        bus.flush().await.unwrap();

        let received = s1.received.lock().clone();
        assert_eq!(received.len(), 2);
        assert!(received.iter().all(|m| m.target_sync_ids.is_empty()));
        assert!(received.iter().all(|m| m.sync_op == SyncOp::Update));
    }

    #[tokio::test]
    async fn test_pending_subscriber_misses_live_updates() {
        let (launcher, bus) = setup();
        let stream = StreamId::derive("a");
        let s1 = FakeSubscriber::new("s1");
        subscribe(&bus, stream, &s1).await;

        emitter(&launcher, 0).emit(update(stream));
        bus.flush().await.unwrap();
        assert!(s1.received.lock().is_empty());
    }

    #[tokio::test]
    async fn test_stale_down_clears_only_its_version() {
        let (launcher, bus) = setup();
        let stream = StreamId::derive("a");
        let s1 = FakeSubscriber::new("s1");
        let s2 = FakeSubscriber::new("s2");

        subscribe(&bus, stream, &s1).await;
        let v0 = emitter(&launcher, 0);
        v0.emit(update(stream).with_targets(vec!["s1".into()]));

        // v0 stops taking backfills, so s2 gets a fresh emitter.
        v0.backfills().close();
        subscribe(&bus, stream, &s2).await;
        let v1 = emitter(&launcher, 1);
        assert_eq!(v1.version(), EmitterVersion::Emitter(1));
        v1.emit(update(stream).with_targets(vec!["s2".into()]));

        v0.emit(SyncStreamsResponse::down(stream));
        v1.emit(update(stream));
        bus.flush().await.unwrap();

        assert_eq!(s1.ops(), vec![SyncOp::Update, SyncOp::Down]);
        assert_eq!(s2.ops(), vec![SyncOp::Update, SyncOp::Update]);
        assert!(!v1.cancel_signal().is_cancelled());
    }

    #[tokio::test]
    async fn test_current_down_leaves_older_version_live() {
        let (launcher, bus) = setup();
        let stream = StreamId::derive("a");
        let s1 = FakeSubscriber::new("s1");
        let s2 = FakeSubscriber::new("s2");

        subscribe(&bus, stream, &s1).await;
        let v0 = emitter(&launcher, 0);
        v0.emit(update(stream).with_targets(vec!["s1".into()]));

        v0.backfills().close();
        subscribe(&bus, stream, &s2).await;
        let v1 = emitter(&launcher, 1);
        v1.emit(update(stream).with_targets(vec!["s2".into()]));

        // Tear down the current version; v0 still serves s1.
        v1.emit(SyncStreamsResponse::down(stream));
        v0.emit(update(stream));
        bus.flush().await.unwrap();

        assert_eq!(s1.ops(), vec![SyncOp::Update, SyncOp::Update]);
        assert_eq!(s2.ops(), vec![SyncOp::Update, SyncOp::Down]);
        assert!(v1.cancel_signal().is_cancelled());

        // The next subscriber gets a fresh emitter.
        let s3 = FakeSubscriber::new("s3");
        subscribe(&bus, stream, &s3).await;
        assert_eq!(emitter(&launcher, 2).version(), EmitterVersion::Emitter(2));
    }

    #[tokio::test]
    async fn test_broadcast_down_reaches_every_version() {
        let (launcher, bus) = setup();
        let stream = StreamId::derive("a");
        let s1 = FakeSubscriber::new("s1");
        let s2 = FakeSubscriber::new("s2");
        subscribe(&bus, stream, &s1).await;
        subscribe(&bus, stream, &s2).await;

        let core = emitter(&launcher, 0);
        core.emit(update(stream).with_targets(vec!["s1".into()]));
        bus.flush().await.unwrap();
        bus.shared
            .on_stream_event(SyncStreamsResponse::down(stream), EmitterVersion::Broadcast);
        bus.flush().await.unwrap();

        assert_eq!(s1.ops(), vec![SyncOp::Update, SyncOp::Down]);
        assert_eq!(s2.ops(), vec![SyncOp::Down]);
        assert!(core.cancel_signal().is_cancelled());
    }

    #[tokio::test]
    async fn test_current_down_releases_emitter() {
        let (launcher, bus) = setup();
        let stream = StreamId::derive("a");
        let s1 = FakeSubscriber::new("s1");
        let s2 = FakeSubscriber::new("s2");
        subscribe(&bus, stream, &s1).await;
        subscribe(&bus, stream, &s2).await;

        let core = emitter(&launcher, 0);
        core.emit(update(stream).with_targets(vec!["s1".into()]));
        // s2 is still pending.
        core.emit(SyncStreamsResponse::down(stream));
        // s2 waits in the pending bucket for its own targeted DOWN.
        core.emit(SyncStreamsResponse::down(stream).with_targets(vec!["s2".into()]));
        bus.flush().await.unwrap();

        assert_eq!(s1.ops(), vec![SyncOp::Update, SyncOp::Down]);
        assert_eq!(s2.ops(), vec![SyncOp::Down]);
        assert!(core.cancel_signal().is_cancelled());

        // Subscribing again starts a new version.
        let s3 = FakeSubscriber::new("s3");
        subscribe(&bus, stream, &s3).await;
        assert_eq!(emitter(&launcher, 1).version(), EmitterVersion::Emitter(1));
    }

    #[tokio::test]
    async fn test_targeted_down_pops_chain() {
        let (launcher, bus) = setup();
        let stream = StreamId::derive("a");
        let relay = FakeSubscriber::new("relay");
        let other = FakeSubscriber::new("other");
        subscribe(&bus, stream, &relay).await;
        subscribe(&bus, stream, &other).await;

        let core = emitter(&launcher, 0);
        core.emit(SyncStreamsResponse::down(stream).with_targets(vec!["relay".into(), "far".into()]));
        bus.flush().await.unwrap();

        let received = relay.received.lock().clone();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].sync_op, SyncOp::Down);
        assert_eq!(received[0].target_sync_ids, vec!["far".to_string()]);
        assert!(other.received.lock().is_empty());
        assert!(!core.cancel_signal().is_cancelled());
    }

    #[tokio::test]
    async fn test_targeted_update_for_unknown_session_is_noop() {
        let (launcher, bus) = setup();
        let stream = StreamId::derive("a");
        let s1 = FakeSubscriber::new("s1");
        subscribe(&bus, stream, &s1).await;

        emitter(&launcher, 0).emit(update(stream).with_targets(vec!["ghost".into()]));
        bus.flush().await.unwrap();
        assert!(s1.received.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent_and_releases_emitter() {
        let (launcher, bus) = setup();
        let stream = StreamId::derive("a");
        let s1 = FakeSubscriber::new("s1");
        subscribe(&bus, stream, &s1).await;

        bus.enqueue_unsubscribe(stream, "s1").unwrap();
        bus.enqueue_unsubscribe(stream, "s1").unwrap();
        bus.enqueue_unsubscribe(StreamId::derive("never"), "s1").unwrap();
        bus.flush().await.unwrap();

        assert!(emitter(&launcher, 0).cancel_signal().is_cancelled());
    }

    #[tokio::test]
    async fn test_remove_subscriber_releases_emptied_streams() {
        let (launcher, bus) = setup();
        let a = StreamId::derive("a");
        let b = StreamId::derive("b");
        let s1 = FakeSubscriber::new("s1");
        let s2 = FakeSubscriber::new("s2");
        subscribe(&bus, a, &s1).await;
        subscribe(&bus, b, &s1).await;
        subscribe(&bus, b, &s2).await;

        bus.enqueue_remove_subscriber("s1").unwrap();
        bus.flush().await.unwrap();

        let launched = launcher.launched.lock();
        let by_stream = |id: StreamId| launched.iter().find(|e| e.stream_id() == id).cloned();
        assert!(by_stream(a).map(|e| e.cancel_signal().is_cancelled()).unwrap_or(false));
        assert!(by_stream(b).map(|e| !e.cancel_signal().is_cancelled()).unwrap_or(false));
    }

    #[tokio::test]
    async fn test_backfill_reuses_running_emitter() {
        let (launcher, bus) = setup();
        let stream = StreamId::derive("a");
        let s1 = FakeSubscriber::new("s1");
        subscribe(&bus, stream, &s1).await;

        bus.enqueue_backfill(SyncCookie::new(stream), vec!["s1".into(), "remote".into()])
            .unwrap();
        bus.flush().await.unwrap();

        assert_eq!(launcher.launched.lock().len(), 1);
        let queued = emitter(&launcher, 0).backfills().get_batch(None).unwrap();
        assert_eq!(queued[1].sync_ids, vec!["s1".to_string(), "remote".to_string()]);
        assert!(bus.enqueue_backfill(SyncCookie::new(stream), vec![]).is_err());
    }

    #[tokio::test]
    async fn test_resubscribe_only_backfills() {
        let (launcher, bus) = setup();
        let stream = StreamId::derive("a");
        let s1 = FakeSubscriber::new("s1");
        subscribe(&bus, stream, &s1).await;
        let core = emitter(&launcher, 0);
        core.emit(update(stream).with_targets(vec!["s1".into()]));
        bus.flush().await.unwrap();

        subscribe(&bus, stream, &s1).await;
        assert_eq!(launcher.launched.lock().len(), 1);
        assert_eq!(core.backfills().len(), 2);

        // Still exactly one live copy per update.
        core.emit(update(stream));
        bus.flush().await.unwrap();
        assert_eq!(s1.received.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_closes_emitters_and_refuses_commands() {
        let (launcher, bus) = setup();
        let s1 = FakeSubscriber::new("s1");
        subscribe(&bus, StreamId::derive("a"), &s1).await;

        bus.shutdown().await;
        assert!(bus.is_closed());
        assert!(emitter(&launcher, 0).cancel_signal().is_cancelled());
        let err = bus.enqueue_remove_subscriber("s1").unwrap_err();
        assert_eq!(err.code(), streamsync_core::ErrorCode::Unavailable);
    }

    #[test]
    fn test_full_queue_downgrades_to_down() {
        let shared = BusShared {
            queue: DynamicBuffer::with_capacity(1),
            overflow: Mutex::new(Vec::new()),
        };
        let stream = StreamId::derive("a");
        shared
            .enqueue(BusCommand::RemoveSubscriber { sync_id: "x".into() })
            .unwrap();

        shared.on_stream_event(update(stream), EmitterVersion::Emitter(3));
        shared.on_stream_event(
            update(stream).with_targets(vec!["s1".into()]),
            EmitterVersion::Emitter(3),
        );

        let overflow = shared.overflow.lock();
        assert_eq!(overflow.len(), 2);
        assert!(overflow.iter().all(|(m, v)| m.sync_op == SyncOp::Down && *v == EmitterVersion::Emitter(3)));
        assert!(overflow[0].0.target_sync_ids.is_empty());
        assert_eq!(overflow[1].0.target_sync_ids, vec!["s1".to_string()]);
    }
}
