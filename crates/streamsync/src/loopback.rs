//! In-process node transport.
//!
//! Connects [`SyncService`] instances living in the same process, so a
//! multi-node cluster can run without a network. Used by tests and local
//! simulations; a real deployment provides its own [`NodeRegistry`].

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use streamsync_core::{
    new_sync_id, ModifySyncRequest, ModifySyncResponse, NodeAddress, PingSyncRequest, Result,
    SyncError, SyncStreamsRequest,
};
use streamsync_engine::channel::{channel_receiver, into_update_stream};
use streamsync_engine::{NodeClient, NodeRegistry, SyncUpdateStream};
use tracing::debug;

use crate::service::SyncService;

/// Outbound queue of a session opened by a peer.
const PEER_SESSION_CAPACITY: usize = 1024;

/// [`NodeClient`] calling straight into a peer's service.
pub struct LoopbackNodeClient {
    address: NodeAddress,
    service: Weak<SyncService>,
}

impl LoopbackNodeClient {
    pub fn new(service: &Arc<SyncService>) -> Self {
        Self {
            address: service.local_address(),
            service: Arc::downgrade(service),
        }
    }

    fn service(&self) -> Result<Arc<SyncService>> {
        self.service
            .upgrade()
            .ok_or_else(|| SyncError::Unavailable(format!("node {} is gone", self.address)))
    }
}

#[async_trait]
impl NodeClient for LoopbackNodeClient {
    fn address(&self) -> NodeAddress {
        self.address
    }

    async fn sync_streams(&self, request: SyncStreamsRequest) -> Result<SyncUpdateStream> {
        let service = self.service()?;
        let (receiver, rx) = channel_receiver(PEER_SESSION_CAPACITY);
        let sync_id = new_sync_id();
        let node = self.address;
        tokio::spawn(async move {
            let result = service
                .sync_streams(sync_id.clone(), request, Arc::new(receiver))
                .await;
            if let Err(e) = result {
                debug!(node = %node, sync_id = %sync_id, error = %e, "peer session ended");
            }
        });
        Ok(into_update_stream(rx))
    }

    async fn modify_sync(&self, request: ModifySyncRequest) -> Result<ModifySyncResponse> {
        self.service()?.modify_sync(request).await
    }

    async fn ping_sync(&self, request: PingSyncRequest) -> Result<()> {
        self.service()?.ping_sync(request)
    }

    async fn cancel_sync(&self, sync_id: &str) -> Result<()> {
        self.service()?.cancel_sync(sync_id).await
    }
}

/// Registry of in-process nodes.
///
/// Holds services weakly; a dropped service reads as an unreachable node.
#[derive(Default)]
pub struct MemoryNodeRegistry {
    nodes: RwLock<HashMap<NodeAddress, Weak<SyncService>>>,
}

impl MemoryNodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, service: &Arc<SyncService>) {
        self.nodes
            .write()
            .insert(service.local_address(), Arc::downgrade(service));
    }

    /// Make a node unreachable for new connections.
    pub fn unregister(&self, address: &NodeAddress) {
        self.nodes.write().remove(address);
    }

    /// Whether `address` is registered, reachable or not.
    pub fn contains(&self, address: &NodeAddress) -> bool {
        self.nodes.read().contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

#[async_trait]
impl NodeRegistry for MemoryNodeRegistry {
    async fn client_for(&self, address: NodeAddress) -> Result<Arc<dyn NodeClient>> {
        let service = self
            .nodes
            .read()
            .get(&address)
            .and_then(Weak::upgrade)
            .ok_or_else(|| SyncError::Unavailable(format!("unknown node {}", address)))?;
        Ok(Arc::new(LoopbackNodeClient::new(&service)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceConfig;
    use futures::StreamExt;
    use streamsync_core::{SyncOp, ErrorCode};
    use streamsync_store::MemoryStreamStore;

    fn node(b: u8, registry: &Arc<MemoryNodeRegistry>) -> Arc<SyncService> {
        let address = NodeAddress::from_bytes([b; 20]);
        let store = Arc::new(MemoryStreamStore::new(address));
        let service = Arc::new(
            SyncService::new(ServiceConfig::new(address), store, registry.clone()).unwrap(),
        );
        registry.register(&service);
        service
    }

    #[tokio::test]
    async fn test_loopback_handshake() {
        let registry = Arc::new(MemoryNodeRegistry::new());
        let b = node(2, &registry);

        let client = registry.client_for(b.local_address()).await.unwrap();
        let mut updates = client.sync_streams(SyncStreamsRequest::default()).await.unwrap();
        let first = updates.next().await.unwrap().unwrap();
        assert_eq!(first.sync_op, SyncOp::New);
        assert!(!first.sync_id.is_empty());

        client.cancel_sync(&first.sync_id).await.unwrap();
        assert_eq!(updates.next().await.unwrap().unwrap().sync_op, SyncOp::Close);
    }

    #[tokio::test]
    async fn test_dropped_node_is_unreachable() {
        let registry = Arc::new(MemoryNodeRegistry::new());
        let b = node(2, &registry);
        let address = b.local_address();
        assert!(registry.contains(&address));
        assert_eq!(registry.len(), 1);

        drop(b);
        let err = registry.client_for(address).await.err().unwrap();
        assert_eq!(err.code(), ErrorCode::Unavailable);
    }
}
