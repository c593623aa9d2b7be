//! Subscriber registry.
//!
//! Tracks, per stream, which sessions listen at which emitter version. A
//! subscriber sits in exactly one bucket per stream: `Pending` until its
//! first backfill arrives, then the version of the emitter that served it.
//!
//! The registry is owned by the event bus task and is not synchronized.

use std::collections::HashMap;
use std::sync::Arc;

use streamsync_core::{StreamId, SyncStreamsResponse};

use crate::version::EmitterVersion;

/// A session listening to stream updates.
pub trait StreamSubscriber: Send + Sync {
    /// Session identifier; unique per process.
    fn sync_id(&self) -> &str;

    /// Deliver an update. Must not block.
    ///
    /// A DOWN means the subscription to that stream has ended.
    fn on_update(&self, update: SyncStreamsResponse);
}

/// Subscribers of one stream, grouped by emitter version.
#[derive(Default)]
pub struct StreamSubscribers {
    buckets: HashMap<EmitterVersion, Vec<Arc<dyn StreamSubscriber>>>,
}

impl StreamSubscribers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add to the pending bucket unless the session is already present in
    /// any bucket. Returns `true` if inserted.
    pub fn add_pending(&mut self, subscriber: Arc<dyn StreamSubscriber>) -> bool {
        if self.contains(subscriber.sync_id()) {
            return false;
        }
        self.buckets
            .entry(EmitterVersion::Pending)
            .or_default()
            .push(subscriber);
        true
    }

    /// Move a pending subscriber into `version`'s bucket.
    pub fn move_pending(
        &mut self,
        sync_id: &str,
        version: EmitterVersion,
    ) -> Option<Arc<dyn StreamSubscriber>> {
        let pending = self.buckets.get_mut(&EmitterVersion::Pending)?;
        let idx = pending.iter().position(|s| s.sync_id() == sync_id)?;
        let subscriber = pending.remove(idx);
        if pending.is_empty() {
            self.buckets.remove(&EmitterVersion::Pending);
        }
        self.buckets
            .entry(version)
            .or_default()
            .push(Arc::clone(&subscriber));
        Some(subscriber)
    }

    /// Remove a session from whichever bucket holds it.
    pub fn remove(&mut self, sync_id: &str) -> Option<Arc<dyn StreamSubscriber>> {
        let mut removed = None;
        let mut emptied = None;
        for (version, subscribers) in self.buckets.iter_mut() {
            if let Some(idx) = subscribers.iter().position(|s| s.sync_id() == sync_id) {
                removed = Some(subscribers.remove(idx));
                if subscribers.is_empty() {
                    emptied = Some(*version);
                }
                break;
            }
        }
        if let Some(version) = emptied {
            self.buckets.remove(&version);
        }
        removed
    }

    /// Drop a whole bucket and return its members.
    pub fn clear_version(&mut self, version: EmitterVersion) -> Vec<Arc<dyn StreamSubscriber>> {
        self.buckets.remove(&version).unwrap_or_default()
    }

    pub fn find(&self, sync_id: &str, version: EmitterVersion) -> Option<&Arc<dyn StreamSubscriber>> {
        self.buckets
            .get(&version)?
            .iter()
            .find(|s| s.sync_id() == sync_id)
    }

    pub fn contains(&self, sync_id: &str) -> bool {
        self.version_of(sync_id).is_some()
    }

    pub fn version_of(&self, sync_id: &str) -> Option<EmitterVersion> {
        self.buckets
            .iter()
            .find(|(_, subs)| subs.iter().any(|s| s.sync_id() == sync_id))
            .map(|(version, _)| *version)
    }

    /// Send a tailored copy to every member of `version`'s bucket.
    /// `Broadcast` reaches every bucket, including pending.
    pub fn send(&self, version: EmitterVersion, msg: &SyncStreamsResponse) -> usize {
        match version {
            EmitterVersion::Broadcast => self
                .buckets
                .values()
                .map(|subs| deliver(subs, msg))
                .sum(),
            _ => self
                .buckets
                .get(&version)
                .map(|subs| deliver(subs, msg))
                .unwrap_or(0),
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

fn deliver(subscribers: &[Arc<dyn StreamSubscriber>], msg: &SyncStreamsResponse) -> usize {
    for subscriber in subscribers {
        subscriber.on_update(msg.tailored());
    }
    subscribers.len()
}

/// Subscribers of every stream on one event bus.
#[derive(Default)]
pub struct SubscriberRegistry {
    streams: HashMap<StreamId, StreamSubscribers>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, stream_id: &StreamId) -> Option<&StreamSubscribers> {
        self.streams.get(stream_id)
    }

    pub fn get_mut(&mut self, stream_id: &StreamId) -> Option<&mut StreamSubscribers> {
        self.streams.get_mut(stream_id)
    }

    pub fn entry(&mut self, stream_id: StreamId) -> &mut StreamSubscribers {
        self.streams.entry(stream_id).or_default()
    }

    /// Remove the stream's entry if it has no subscribers left.
    /// Returns `true` if the entry is gone afterwards.
    pub fn prune(&mut self, stream_id: &StreamId) -> bool {
        match self.streams.get(stream_id) {
            Some(subs) if subs.is_empty() => {
                self.streams.remove(stream_id);
                true
            }
            Some(_) => false,
            None => true,
        }
    }

    pub fn remove_stream(&mut self, stream_id: &StreamId) -> Option<StreamSubscribers> {
        self.streams.remove(stream_id)
    }

    /// Remove a session from every stream. Returns the streams it left
    /// empty, which no longer need an emitter.
    pub fn remove_everywhere(&mut self, sync_id: &str) -> Vec<StreamId> {
        let mut emptied = Vec::new();
        self.streams.retain(|stream_id, subs| {
            if subs.remove(sync_id).is_some() && subs.is_empty() {
                emptied.push(*stream_id);
                return false;
            }
            !subs.is_empty()
        });
        emptied
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.streams.values().map(StreamSubscribers::len).sum()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use streamsync_core::SyncOp;

    pub(crate) struct FakeSubscriber {
        id: String,
        pub(crate) received: Mutex<Vec<SyncStreamsResponse>>,
    }

    impl FakeSubscriber {
        pub(crate) fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                received: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn ops(&self) -> Vec<SyncOp> {
            self.received.lock().iter().map(|m| m.sync_op).collect()
        }
    }

    impl StreamSubscriber for FakeSubscriber {
        fn sync_id(&self) -> &str {
            &self.id
        }

        fn on_update(&self, update: SyncStreamsResponse) {
            self.received.lock().push(update);
        }
    }

    fn v(n: u64) -> EmitterVersion {
        EmitterVersion::Emitter(n)
    }

    #[test]
    fn test_add_pending_is_unique_across_versions() {
        let mut subs = StreamSubscribers::new();
        let a = FakeSubscriber::new("a");
        assert!(subs.add_pending(a.clone()));
        assert!(!subs.add_pending(a.clone()));

        subs.move_pending("a", v(1));
        assert!(!subs.add_pending(a));
        assert_eq!(subs.len(), 1);
        assert_eq!(subs.version_of("a"), Some(v(1)));
    }

    #[test]
    fn test_move_unknown_is_noop() {
        let mut subs = StreamSubscribers::new();
        assert!(subs.move_pending("ghost", v(1)).is_none());
        assert!(subs.is_empty());
    }

    #[test]
    fn test_version_scoped_send() {
        let mut subs = StreamSubscribers::new();
        let a = FakeSubscriber::new("a");
        let b = FakeSubscriber::new("b");
        subs.add_pending(a.clone());
        subs.add_pending(b.clone());
        subs.move_pending("a", v(1));
        subs.move_pending("b", v(2));

        let msg = SyncStreamsResponse::down(StreamId::derive("s")).with_targets(vec!["x".into()]);
        assert_eq!(subs.send(v(1), &msg), 1);
        assert_eq!(a.ops(), vec![SyncOp::Down]);
        assert!(b.ops().is_empty());
        assert!(a.received.lock()[0].target_sync_ids.is_empty());

        assert_eq!(subs.send(EmitterVersion::Broadcast, &msg), 2);
    }

    #[test]
    fn test_clear_version_leaves_others() {
        let mut subs = StreamSubscribers::new();
        subs.add_pending(FakeSubscriber::new("a"));
        subs.add_pending(FakeSubscriber::new("b"));
        subs.move_pending("a", v(1));
        subs.move_pending("b", v(2));

        let removed = subs.clear_version(v(1));
        assert_eq!(removed.len(), 1);
        assert!(!subs.contains("a"));
        assert!(subs.contains("b"));
    }

    #[test]
    fn test_remove_everywhere_reports_emptied_streams() {
        let mut registry = SubscriberRegistry::new();
        let s1 = StreamId::derive("s1");
        let s2 = StreamId::derive("s2");
        registry.entry(s1).add_pending(FakeSubscriber::new("a"));
        registry.entry(s2).add_pending(FakeSubscriber::new("a"));
        registry.entry(s2).add_pending(FakeSubscriber::new("b"));

        let emptied = registry.remove_everywhere("a");
        assert_eq!(emptied, vec![s1]);
        assert!(registry.get(&s1).is_none());
        assert_eq!(registry.get(&s2).map(|s| s.len()), Some(1));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Subscribe(u8),
        Unsubscribe(u8),
        Backfill(u8, u8),
        DownVersion(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..6).prop_map(Op::Subscribe),
            (0u8..6).prop_map(Op::Unsubscribe),
            ((0u8..6), (0u8..3)).prop_map(|(s, v)| Op::Backfill(s, v)),
            (0u8..3).prop_map(Op::DownVersion),
        ]
    }

    proptest! {
        #[test]
        fn each_subscriber_in_at_most_one_bucket(ops in prop::collection::vec(op(), 0..64)) {
            let mut subs = StreamSubscribers::new();
            for op in ops {
                match op {
                    Op::Subscribe(s) => { subs.add_pending(FakeSubscriber::new(&s.to_string())); }
                    Op::Unsubscribe(s) => { subs.remove(&s.to_string()); }
                    Op::Backfill(s, ver) => { subs.move_pending(&s.to_string(), v(ver as u64)); }
                    Op::DownVersion(ver) => { subs.clear_version(v(ver as u64)); }
                }

                let mut ids: Vec<String> = subs
                    .buckets
                    .values()
                    .flat_map(|b| b.iter().map(|s| s.sync_id().to_string()))
                    .collect();
                let total = ids.len();
                ids.sort();
                ids.dedup();
                prop_assert_eq!(ids.len(), total);
                prop_assert_eq!(subs.len(), total);
                prop_assert!(subs.buckets.values().all(|b| !b.is_empty()));
            }
        }
    }
}
