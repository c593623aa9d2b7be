//! Node selection and emitter launching.
//!
//! The syncer decides where a stream is served from and starts the matching
//! emitter in the background:
//!
//! 1. the node named by the cookie, if any,
//! 2. the local node, if it hosts the stream,
//! 3. the remote replicas, starting at the stream's sticky peer.
//!
//! A start that fails with a code worth retrying elsewhere is attempted once
//! more with the failing node excluded. A remote emitter that dies from a
//! transport failure drops the cached connection and moves the sticky peer
//! on, so the next emitter for the stream tries a different replica first.

use std::sync::Arc;

use dashmap::DashMap;
use streamsync_core::{NodeAddress, Result, StreamId, SyncCookie, SyncError};
use streamsync_store::{StoredStream, StreamStore};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::emitter::{
    EmitterCore, EmitterLauncher, LocalStreamEmitter, RemoteStreamEmitter, StreamEventSink,
    StreamUpdateEmitter,
};
use crate::metrics;
use crate::transport::{NodeClient, NodeRegistry};
use crate::version::EmitterVersion;

const MAX_START_ATTEMPTS: usize = 2;

/// Launches local and remote emitters. Cheap to clone.
#[derive(Clone)]
pub struct Syncer {
    inner: Arc<SyncerInner>,
}

struct SyncerInner {
    local: NodeAddress,
    store: Arc<dyn StreamStore>,
    nodes: Arc<dyn NodeRegistry>,
    connections: NodeConnections,
    config: SyncConfig,
}

/// Cached peer clients, one per node. Concurrent callers for the same
/// node share a single dial.
#[derive(Default)]
struct NodeConnections {
    clients: DashMap<NodeAddress, Arc<OnceCell<Arc<dyn NodeClient>>>>,
}

impl NodeConnections {
    async fn get_or_connect(
        &self,
        registry: &dyn NodeRegistry,
        address: NodeAddress,
    ) -> Result<Arc<dyn NodeClient>> {
        let cell = Arc::clone(self.clients.entry(address).or_default().value());
        match cell.get_or_try_init(|| registry.client_for(address)).await {
            Ok(client) => Ok(Arc::clone(client)),
            Err(e) => {
                self.clients
                    .remove_if(&address, |_, current| Arc::ptr_eq(current, &cell));
                Err(e)
            }
        }
    }

    fn evict(&self, address: &NodeAddress) {
        self.clients.remove(address);
    }

    fn len(&self) -> usize {
        self.clients
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }
}

/// Why a remote replica could not serve a stream.
enum RemoteStartError {
    /// No connection to the node; the next replica may be tried.
    Connect(SyncError),
    /// The node was reached but refused or failed the add.
    Serve(SyncError),
}

enum Started {
    Local(LocalStreamEmitter),
    Remote(RemoteStreamEmitter, NodeAddress),
}

/// A failed start and the node it failed on.
type StartError = (SyncError, Option<NodeAddress>);

impl Syncer {
    pub fn new(
        local: NodeAddress,
        store: Arc<dyn StreamStore>,
        nodes: Arc<dyn NodeRegistry>,
        config: SyncConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SyncerInner {
                local,
                store,
                nodes,
                connections: NodeConnections::default(),
                config,
            }),
        }
    }

    pub fn local_address(&self) -> NodeAddress {
        self.inner.local
    }

    /// Number of cached peer connections.
    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }
}

impl EmitterLauncher for Syncer {
    fn launch(
        &self,
        cookie: &SyncCookie,
        version: EmitterVersion,
        sink: Arc<dyn StreamEventSink>,
    ) -> Arc<dyn StreamUpdateEmitter> {
        let core = Arc::new(EmitterCore::new(
            cookie.stream_id,
            version,
            sink,
            self.inner.config.buffer_capacity,
        ));
        let inner = Arc::clone(&self.inner);
        let task_core = Arc::clone(&core);
        let cookie = cookie.clone();
        tokio::spawn(async move { inner.run_emitter(task_core, cookie).await });
        core
    }
}

impl SyncerInner {
    async fn run_emitter(&self, core: Arc<EmitterCore>, cookie: SyncCookie) {
        let stream_id = cookie.stream_id;
        let mut hint = cookie.node_hint();
        let mut excluded = None;

        for attempt in 1..=MAX_START_ATTEMPTS {
            let started = tokio::select! {
                _ = core.cancel_signal().cancelled() => break,
                started = self.start(&core, hint, excluded) => started,
            };

            match started {
                Ok(Started::Local(emitter)) => {
                    let cause = emitter.serve().await;
                    self.on_emitter_stopped(stream_id, self.local, cause.as_ref());
                    core.finish();
                    return;
                }
                Ok(Started::Remote(emitter, node)) => {
                    let cause = emitter.serve().await;
                    self.on_emitter_stopped(stream_id, node, cause.as_ref());
                    // Settle placement before subscribers learn about the
                    // DOWN, so a resubscribe starts on the next replica.
                    if cause.as_ref().is_some_and(SyncError::is_transport_failure) {
                        self.connections.evict(&node);
                        if let Ok(stream) = self.store.get_stream(&stream_id).await {
                            stream.nodes().advance_sticky_peer(node);
                        }
                    }
                    core.finish();
                    return;
                }
                Err((err, node)) => {
                    let retry = attempt < MAX_START_ATTEMPTS
                        && node.is_some()
                        && err.code().retry_on_other_node();
                    if retry {
                        info!(
                            stream_id = %stream_id,
                            node = ?node,
                            error = %err,
                            "emitter start failed, retrying on another node"
                        );
                        metrics::record_node_retry();
                        excluded = node;
                        hint = None;
                        continue;
                    }
                    warn!(stream_id = %stream_id, error = %err, "failed to start emitter");
                    core.cancel_signal().cancel(Some(err));
                    break;
                }
            }
        }

        metrics::record_stream_down();
        core.finish();
    }

    fn on_emitter_stopped(&self, stream_id: StreamId, node: NodeAddress, cause: Option<&SyncError>) {
        match cause {
            Some(err) => {
                metrics::record_stream_down();
                info!(stream_id = %stream_id, node = %node, error = %err, "emitter stopped");
            }
            None => debug!(stream_id = %stream_id, node = %node, "emitter closed"),
        }
    }

    async fn start(
        &self,
        core: &Arc<EmitterCore>,
        hint: Option<NodeAddress>,
        excluded: Option<NodeAddress>,
    ) -> std::result::Result<Started, StartError> {
        let stream_id = core.stream_id();

        if let Some(node) = hint.filter(|n| Some(*n) != excluded) {
            let started = if node == self.local {
                match self.store.get_stream(&stream_id).await {
                    Ok(stream) => Ok(self.start_local(core, stream)),
                    Err(e) => Err(e.into()),
                }
            } else {
                match self.start_remote(core, node).await {
                    Ok(started) => Ok(started),
                    Err(RemoteStartError::Connect(e)) => Err(e),
                    Err(RemoteStartError::Serve(e)) => return Err((e, Some(node))),
                }
            };
            match started {
                Ok(started) => return Ok(started),
                Err(e) => debug!(
                    stream_id = %stream_id,
                    node = %node,
                    error = %e,
                    "hinted node unavailable, falling back to placement"
                ),
            }
        }

        let stream = self
            .store
            .get_stream(&stream_id)
            .await
            .map_err(|e| (SyncError::from(e), None))?;

        let (remotes, is_local) = stream.nodes().remotes_and_is_local();
        if is_local && excluded != Some(self.local) {
            return Ok(self.start_local(core, stream));
        }

        let mut last_err = None;
        let mut candidate = stream.nodes().sticky_peer();
        for _ in 0..remotes.len() {
            let Some(node) = candidate else {
                break;
            };
            if Some(node) != excluded {
                match self.start_remote(core, node).await {
                    Ok(started) => return Ok(started),
                    Err(RemoteStartError::Connect(e)) => {
                        warn!(
                            stream_id = %stream_id,
                            node = %node,
                            error = %e,
                            "remote node unreachable, trying next replica"
                        );
                        last_err = Some((e, Some(node)));
                    }
                    Err(RemoteStartError::Serve(e)) => {
                        warn!(
                            stream_id = %stream_id,
                            node = %node,
                            error = %e,
                            "remote node failed to serve stream"
                        );
                        return Err((e, Some(node)));
                    }
                }
            }
            candidate = stream.nodes().advance_sticky_peer(node);
        }

        Err(last_err.unwrap_or_else(|| {
            (
                SyncError::Unavailable("no available node to sync stream".into()),
                None,
            )
        }))
    }

    fn start_local(&self, core: &Arc<EmitterCore>, stream: Arc<dyn StoredStream>) -> Started {
        core.set_node(self.local);
        debug!(stream_id = %core.stream_id(), version = %core.version(), "starting local emitter");
        Started::Local(LocalStreamEmitter::start(Arc::clone(core), stream))
    }

    async fn start_remote(
        &self,
        core: &Arc<EmitterCore>,
        node: NodeAddress,
    ) -> std::result::Result<Started, RemoteStartError> {
        let client = self
            .connections
            .get_or_connect(self.nodes.as_ref(), node)
            .await
            .map_err(RemoteStartError::Connect)?;
        match RemoteStreamEmitter::connect(Arc::clone(core), client, self.config.clone()).await {
            Ok(emitter) => Ok(Started::Remote(emitter, node)),
            Err(e) => {
                if e.is_transport_failure() {
                    self.connections.evict(&node);
                }
                Err(RemoteStartError::Serve(e))
            }
        }
    }
}
