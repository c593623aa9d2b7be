//! Test fixtures and helpers.
//!
//! Nodes, clusters and sessions for integration tests. Every node of a
//! cluster runs a real [`SyncService`] and reaches its peers through the
//! in-process loopback transport.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use streamsync::{MemoryNodeRegistry, ServiceConfig, SyncService};
use streamsync_core::{
    ModifySyncRequest, ModifySyncResponse, NodeAddress, PingSyncRequest, Result, StreamId,
    SyncCookie, SyncError, SyncOp, SyncStreamsRequest, SyncStreamsResponse,
};
use streamsync_engine::SyncReceiver;
use streamsync_store::{MemoryStream, MemoryStreamStore};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// How long helpers wait for an expected message.
pub const WAIT: Duration = Duration::from_secs(5);

/// Deterministic address of the `index`-th test node.
pub fn node_address(index: usize) -> NodeAddress {
    NodeAddress::from_bytes([index as u8 + 1; 20])
}

/// Install a test-friendly tracing subscriber. Honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `check` until it holds. Panics after [`WAIT`].
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check().await {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Receiver
// ─────────────────────────────────────────────────────────────────────────────

/// Session sink that records every message.
///
/// Reads go through a cursor: each `next_*` call resumes after the message
/// returned by the previous one.
#[derive(Default)]
pub struct RecordingReceiver {
    messages: Mutex<Vec<SyncStreamsResponse>>,
    cursor: Mutex<usize>,
    notify: Notify,
    fail_after: Option<usize>,
}

impl RecordingReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A receiver whose sends fail once `n` messages were accepted.
    pub fn failing_after(n: usize) -> Self {
        Self {
            fail_after: Some(n),
            ..Self::default()
        }
    }

    /// Everything received so far.
    pub fn messages(&self) -> Vec<SyncStreamsResponse> {
        self.messages.lock().clone()
    }

    /// Number of received messages with the given op.
    pub fn count(&self, op: SyncOp) -> usize {
        self.messages.lock().iter().filter(|m| m.sync_op == op).count()
    }

    /// Wait for the next message after the cursor that matches `pred`.
    pub async fn next_matching(
        &self,
        pred: impl Fn(&SyncStreamsResponse) -> bool,
    ) -> Option<SyncStreamsResponse> {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let messages = self.messages.lock();
                let mut cursor = self.cursor.lock();
                if let Some(offset) = messages[*cursor..].iter().position(&pred) {
                    let index = *cursor + offset;
                    *cursor = index + 1;
                    return Some(messages[index].clone());
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }
}

#[async_trait]
impl SyncReceiver for RecordingReceiver {
    async fn send(&self, msg: SyncStreamsResponse) -> Result<()> {
        {
            let mut messages = self.messages.lock();
            if self.fail_after.is_some_and(|n| messages.len() >= n) {
                return Err(SyncError::Unavailable("receiver failed".into()));
            }
            messages.push(msg);
        }
        self.notify.notify_waiters();
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Nodes and clusters
// ─────────────────────────────────────────────────────────────────────────────

/// One node: its store and its running service.
pub struct TestNode {
    pub address: NodeAddress,
    pub store: Arc<MemoryStreamStore>,
    pub service: Arc<SyncService>,
}

impl TestNode {
    /// A node that is not part of any cluster.
    pub fn standalone() -> Self {
        Self::start(
            ServiceConfig::new(node_address(0)),
            &Arc::new(MemoryNodeRegistry::new()),
        )
    }

    fn start(config: ServiceConfig, registry: &Arc<MemoryNodeRegistry>) -> Self {
        let address = config.local_address;
        let store = Arc::new(MemoryStreamStore::new(address));
        let service = Arc::new(
            SyncService::new(config, store.clone(), registry.clone())
                .expect("test service config is valid"),
        );
        registry.register(&service);
        Self {
            address,
            store,
            service,
        }
    }

    /// Create a stream hosted by this node only.
    pub fn create_stream(&self, name: &str) -> Arc<MemoryStream> {
        self.store
            .create_stream(StreamId::derive(name), vec![self.address])
    }
}

/// Nodes sharing one in-process registry.
pub struct TestCluster {
    pub registry: Arc<MemoryNodeRegistry>,
    pub nodes: Vec<TestNode>,
}

impl TestCluster {
    /// Start `n` nodes with default configuration.
    pub fn new(n: usize) -> Self {
        Self::with_config(n, |_| {})
    }

    /// Start `n` nodes, letting `configure` adjust each node's config.
    pub fn with_config(n: usize, configure: impl Fn(&mut ServiceConfig)) -> Self {
        let registry = Arc::new(MemoryNodeRegistry::new());
        let nodes = (0..n)
            .map(|i| {
                let mut config = ServiceConfig::new(node_address(i));
                configure(&mut config);
                TestNode::start(config, &registry)
            })
            .collect();
        Self { registry, nodes }
    }

    pub fn node(&self, index: usize) -> &TestNode {
        &self.nodes[index]
    }

    /// Create a stream replicated on the nodes at `hosts`.
    ///
    /// Every node learns the placement; only the hosts hold data.
    pub fn create_stream(&self, name: &str, hosts: &[usize]) -> StreamId {
        let stream_id = StreamId::derive(name);
        let placement: Vec<_> = hosts.iter().map(|i| node_address(*i)).collect();
        for node in &self.nodes {
            node.store.create_stream(stream_id, placement.clone());
        }
        stream_id
    }

    /// The copy of a stream held by node `index`.
    pub fn stream_on(&self, index: usize, stream_id: &StreamId) -> Arc<MemoryStream> {
        self.nodes[index]
            .store
            .stream(stream_id)
            .expect("stream was created on every node")
    }

    /// Append an event on node `index`.
    pub fn append(&self, index: usize, stream_id: &StreamId, event: impl Into<Bytes>) -> SyncCookie {
        self.stream_on(index, stream_id)
            .append(event)
            .expect("append to healthy stream")
    }

    /// Index of the replica node `index` will try first for a stream.
    pub fn sticky_peer(&self, index: usize, stream_id: &StreamId) -> Option<usize> {
        use streamsync_store::StoredStream;

        let peer = self.stream_on(index, stream_id).nodes().sticky_peer()?;
        self.index_of(&peer)
    }

    pub fn index_of(&self, address: &NodeAddress) -> Option<usize> {
        self.nodes.iter().position(|n| n.address == *address)
    }

    pub async fn shutdown(&self) {
        for node in &self.nodes {
            node.service.shutdown().await;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

/// A client session running against one node.
pub struct TestSession {
    pub sync_id: String,
    pub receiver: Arc<RecordingReceiver>,
    service: Arc<SyncService>,
    task: JoinHandle<Result<()>>,
}

impl TestSession {
    /// Open an empty session and wait for its NEW message.
    pub async fn open(node: &TestNode, sync_id: &str) -> Self {
        Self::open_with(node, sync_id, Vec::new(), Arc::new(RecordingReceiver::new())).await
    }

    /// Open a session with initial streams and a custom receiver.
    pub async fn open_with(
        node: &TestNode,
        sync_id: &str,
        initial: Vec<SyncCookie>,
        receiver: Arc<RecordingReceiver>,
    ) -> Self {
        let service = Arc::clone(&node.service);
        let task = {
            let service = Arc::clone(&service);
            let receiver = Arc::clone(&receiver) as Arc<dyn SyncReceiver>;
            let sync_id = sync_id.to_string();
            let request = SyncStreamsRequest { sync_pos: initial };
            tokio::spawn(async move { service.sync_streams(sync_id, request, receiver).await })
        };

        let new = receiver
            .next_matching(|m| m.sync_op == SyncOp::New)
            .await
            .expect("session sends NEW");
        assert_eq!(new.sync_id, sync_id);

        Self {
            sync_id: sync_id.to_string(),
            receiver,
            service,
            task,
        }
    }

    pub async fn modify(&self, request: ModifySyncRequest) -> Result<ModifySyncResponse> {
        self.service.modify_sync(request).await
    }

    /// Add a stream from its latest position.
    pub async fn add(&self, stream_id: StreamId) -> ModifySyncResponse {
        self.add_cookie(SyncCookie::new(stream_id)).await
    }

    pub async fn add_cookie(&self, cookie: SyncCookie) -> ModifySyncResponse {
        self.modify(ModifySyncRequest::new(&self.sync_id).add(cookie))
            .await
            .expect("modify on open session")
    }

    pub async fn remove(&self, stream_id: StreamId) -> ModifySyncResponse {
        self.modify(ModifySyncRequest::new(&self.sync_id).remove(stream_id))
            .await
            .expect("modify on open session")
    }

    pub fn ping(&self, nonce: &str) -> Result<()> {
        self.service.ping_sync(PingSyncRequest {
            sync_id: self.sync_id.clone(),
            nonce: nonce.into(),
        })
    }

    /// Next UPDATE for `stream_id`. Panics after [`WAIT`].
    pub async fn next_update(&self, stream_id: &StreamId) -> SyncStreamsResponse {
        self.next_op(SyncOp::Update, stream_id).await
    }

    /// Next DOWN for `stream_id`. Panics after [`WAIT`].
    pub async fn next_down(&self, stream_id: &StreamId) -> SyncStreamsResponse {
        self.next_op(SyncOp::Down, stream_id).await
    }

    async fn next_op(&self, op: SyncOp, stream_id: &StreamId) -> SyncStreamsResponse {
        let stream_id = *stream_id;
        self.receiver
            .next_matching(|m| m.sync_op == op && m.stream_id() == Some(stream_id))
            .await
            .unwrap_or_else(|| panic!("no {:?} for {} on {}", op, stream_id, self.sync_id))
    }

    /// Next UPDATE for `stream_id` whose events are exactly `events`.
    pub async fn next_events(&self, stream_id: &StreamId, events: &[&str]) -> SyncStreamsResponse {
        let stream_id = *stream_id;
        let expected: Vec<Bytes> = events
            .iter()
            .map(|e| Bytes::copy_from_slice(e.as_bytes()))
            .collect();
        self.receiver
            .next_matching(|m| {
                m.sync_op == SyncOp::Update
                    && m.stream_id() == Some(stream_id)
                    && m.stream.as_ref().is_some_and(|s| s.events == expected)
            })
            .await
            .unwrap_or_else(|| panic!("no update {:?} for {} on {}", events, stream_id, self.sync_id))
    }

    /// Cancel the session and wait for it to finish.
    pub async fn close(self) -> Result<()> {
        self.service.cancel_sync(&self.sync_id).await?;
        self.finished().await
    }

    /// Wait for the session task to end on its own.
    pub async fn finished(self) -> Result<()> {
        match tokio::time::timeout(WAIT, self.task).await {
            Ok(joined) => joined.expect("session task panicked"),
            Err(_) => panic!("session {} did not finish", self.sync_id),
        }
    }
}
