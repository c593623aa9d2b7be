//! The sync service: the operations a node exposes to clients and peers.
//!
//! The service wires the event bus, the syncer and the session directory
//! together and maps each exposed operation onto a session handler.

use std::sync::Arc;

use serde::Deserialize;
use streamsync_core::{
    ModifySyncRequest, ModifySyncResponse, NodeAddress, PingSyncRequest, Result, StreamId,
    SyncError, SyncStreamsRequest,
};
use streamsync_engine::{
    EventBus, HandlerRegistry, NodeRegistry, SyncConfig, SyncReceiver, SyncStreamHandler, Syncer,
};
use streamsync_store::StreamStore;
use tracing::{debug, info, warn};

/// Configuration for the service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Address of this node.
    pub local_address: NodeAddress,
    /// Engine tunables.
    pub sync: SyncConfig,
    /// Whether debug-only operations such as `drop_stream` are served.
    pub enable_debug_endpoints: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            local_address: NodeAddress::ZERO,
            sync: SyncConfig::default(),
            enable_debug_endpoints: false,
        }
    }
}

impl ServiceConfig {
    pub fn new(local_address: NodeAddress) -> Self {
        Self {
            local_address,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.local_address.is_zero() {
            return Err(SyncError::InvalidArgument(
                "local_address must be set".into(),
            ));
        }
        self.sync.validate()
    }
}

/// Node-side sync service.
pub struct SyncService {
    config: ServiceConfig,
    store: Arc<dyn StreamStore>,
    syncer: Syncer,
    bus: Arc<EventBus>,
    handlers: HandlerRegistry,
}

impl SyncService {
    /// Create the service and start its event bus.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: ServiceConfig,
        store: Arc<dyn StreamStore>,
        nodes: Arc<dyn NodeRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        let syncer = Syncer::new(
            config.local_address,
            Arc::clone(&store),
            nodes,
            config.sync.clone(),
        );
        let bus = Arc::new(EventBus::new(Arc::new(syncer.clone()), &config.sync));
        info!(node = %config.local_address, "sync service started");
        Ok(Self {
            config,
            store,
            syncer,
            bus,
            handlers: HandlerRegistry::new(),
        })
    }

    pub fn local_address(&self) -> NodeAddress {
        self.config.local_address
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn active_sessions(&self) -> usize {
        self.handlers.len()
    }

    /// Number of cached connections to peer nodes.
    pub fn peer_connections(&self) -> usize {
        self.syncer.connection_count()
    }

    /// Wait until the event bus has processed every command queued so far.
    pub async fn flush(&self) -> Result<()> {
        self.bus.flush().await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Exposed operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Open a session and serve it until it closes.
    ///
    /// The client first receives NEW carrying `sync_id`. Streams in
    /// `request.sync_pos` are added right away; any that cannot be added are
    /// reported to the client as DOWN. Returns when the session ends: `Ok`
    /// after a clean close, the cause otherwise.
    pub async fn sync_streams(
        &self,
        sync_id: impl Into<String>,
        request: SyncStreamsRequest,
        receiver: Arc<dyn SyncReceiver>,
    ) -> Result<()> {
        let sync_id = sync_id.into();
        if sync_id.is_empty() {
            return Err(SyncError::InvalidArgument("empty sync id".into()));
        }

        let handler = Arc::new(SyncStreamHandler::new(
            sync_id.clone(),
            receiver,
            Arc::clone(&self.bus) as Arc<dyn streamsync_engine::SubscriptionManager>,
            Arc::clone(&self.store),
            self.config.sync.clone(),
        ));
        self.handlers.insert(Arc::clone(&handler))?;

        if !request.sync_pos.is_empty() {
            if let Err(e) = self.add_initial_streams(&handler, request).await {
                self.handlers.remove(&sync_id);
                return Err(e);
            }
        }

        let result = handler.run().await;
        self.handlers.remove(&sync_id);
        result
    }

    async fn add_initial_streams(
        &self,
        handler: &Arc<SyncStreamHandler>,
        request: SyncStreamsRequest,
    ) -> Result<()> {
        let mut add = ModifySyncRequest::new(handler.id());
        add.add_streams = request.sync_pos;
        let response = handler.modify(&add).await?;

        for status in response.adds {
            debug!(
                sync_id = %handler.id(),
                stream_id = %status.stream_id,
                code = status.code,
                "initial stream could not be added"
            );
            handler.push_down(status.stream_id, status.message)?;
        }
        Ok(())
    }

    /// Add, remove or backfill streams of a running session.
    pub async fn modify_sync(&self, request: ModifySyncRequest) -> Result<ModifySyncResponse> {
        request.validate()?;
        let handler = self.handlers.require(&request.sync_id)?;
        handler.modify(&request).await
    }

    /// Close a session. Resolves once the client was sent CLOSE.
    pub async fn cancel_sync(&self, sync_id: &str) -> Result<()> {
        let handler = self.handlers.require(sync_id)?;
        handler.cancel().await
    }

    /// Queue a PONG on the session's ordered stream.
    pub fn ping_sync(&self, request: PingSyncRequest) -> Result<()> {
        self.handlers.require(&request.sync_id)?.ping(&request.nonce)
    }

    /// Debug only: drop a stream from a session as if it had gone down.
    pub fn drop_stream(&self, sync_id: &str, stream_id: StreamId) -> Result<()> {
        if !self.config.enable_debug_endpoints {
            return Err(SyncError::NotFound("debug endpoints are disabled".into()));
        }
        self.handlers.require(sync_id)?.debug_drop_stream(stream_id)
    }

    /// Close every session, then stop the event bus and its emitters.
    pub async fn shutdown(&self) {
        for sync_id in self.handlers.sync_ids() {
            if let Some(handler) = self.handlers.get(&sync_id) {
                if let Err(e) = handler.cancel().await {
                    warn!(sync_id = %sync_id, error = %e, "failed to close session on shutdown");
                }
            }
        }
        self.bus.shutdown().await;
        info!(node = %self.config.local_address, "sync service stopped");
    }
}
