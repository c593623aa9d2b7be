//! Transport seams: peer-node RPC clients, the node registry, and the
//! per-session client sink.
//!
//! Wire encoding is the embedding server's concern. Implementations only need
//! to move [`SyncStreamsResponse`] values and modify requests between nodes.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use streamsync_core::{
    ModifySyncRequest, ModifySyncResponse, NodeAddress, PingSyncRequest, Result, SyncError,
    SyncStreamsRequest, SyncStreamsResponse,
};

/// Server-streamed updates of one remote session.
pub type SyncUpdateStream = BoxStream<'static, Result<SyncStreamsResponse>>;

/// RPC client for the sync service of one peer node.
#[async_trait]
pub trait NodeClient: Send + Sync {
    fn address(&self) -> NodeAddress;

    /// Open a session on the peer. The first message is the NEW handshake.
    async fn sync_streams(&self, request: SyncStreamsRequest) -> Result<SyncUpdateStream>;

    async fn modify_sync(&self, request: ModifySyncRequest) -> Result<ModifySyncResponse>;

    async fn ping_sync(&self, request: PingSyncRequest) -> Result<()>;

    async fn cancel_sync(&self, sync_id: &str) -> Result<()>;
}

/// Peer discovery and client factory.
#[async_trait]
pub trait NodeRegistry: Send + Sync {
    /// Client for the node at `address`.
    async fn client_for(&self, address: NodeAddress) -> Result<Arc<dyn NodeClient>>;
}

/// Outbound sink of one client session.
#[async_trait]
pub trait SyncReceiver: Send + Sync {
    async fn send(&self, msg: SyncStreamsResponse) -> Result<()>;
}

/// Channel-backed receivers, used to bridge sessions into streams.
pub mod channel {
    use super::*;
    use futures::StreamExt;
    use tokio::sync::mpsc;

    /// A [`SyncReceiver`] that forwards into a bounded channel.
    pub struct ChannelReceiver {
        tx: mpsc::Sender<SyncStreamsResponse>,
    }

    /// Create a receiver and the matching channel end.
    pub fn channel_receiver(
        capacity: usize,
    ) -> (ChannelReceiver, mpsc::Receiver<SyncStreamsResponse>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ChannelReceiver { tx }, rx)
    }

    /// Adapt the channel end into an update stream.
    pub fn into_update_stream(rx: mpsc::Receiver<SyncStreamsResponse>) -> SyncUpdateStream {
        futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (Ok(msg), rx))
        })
        .boxed()
    }

    #[async_trait]
    impl SyncReceiver for ChannelReceiver {
        async fn send(&self, msg: SyncStreamsResponse) -> Result<()> {
            self.tx
                .send(msg)
                .await
                .map_err(|_| SyncError::Unavailable("receiver disconnected".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::channel::{channel_receiver, into_update_stream};
    use super::*;
    use futures::StreamExt;
    use streamsync_core::SyncOp;

    #[tokio::test]
    async fn test_channel_receiver_roundtrip() {
        let (receiver, rx) = channel_receiver(4);
        let mut updates = into_update_stream(rx);

        receiver.send(SyncStreamsResponse::new_sync("s1")).await.unwrap();
        receiver.send(SyncStreamsResponse::close()).await.unwrap();
        drop(receiver);

        let first = updates.next().await.unwrap().unwrap();
        assert_eq!(first.sync_op, SyncOp::New);
        assert_eq!(first.sync_id, "s1");
        assert_eq!(updates.next().await.unwrap().unwrap().sync_op, SyncOp::Close);
        assert!(updates.next().await.is_none());
    }

    #[tokio::test]
    async fn test_send_after_drop_fails() {
        let (receiver, rx) = channel_receiver(1);
        drop(rx);
        let err = receiver.send(SyncStreamsResponse::close()).await.unwrap_err();
        assert_eq!(err.code(), streamsync_core::ErrorCode::Unavailable);
    }
}
