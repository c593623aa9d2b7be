//! # streamsync
//!
//! Node-side synchronization service for replicated append-only streams.
//!
//! ## Overview
//!
//! Clients open one long-lived session per connection and add or remove
//! streams on it at will. The service:
//!
//! - **Fans out** every stream update to all sessions listening to it
//! - **Backfills** a newly added stream so nothing is lost or duplicated
//! - **Fails over** to another replica when the serving node stops responding
//! - **Reports** every lost stream to its sessions as DOWN, never silently
//!
//! ## Operations
//!
//! | Operation       | Effect                                              |
//! |-----------------|-----------------------------------------------------|
//! | `sync_streams`  | open a session, optionally with initial streams     |
//! | `modify_sync`   | add, remove or backfill streams; per-stream status  |
//! | `cancel_sync`   | close a session                                     |
//! | `ping_sync`     | queue a PONG on the session's ordered stream        |
//! | `drop_stream`   | debug only: force a DOWN for one stream             |
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use streamsync::{MemoryNodeRegistry, ServiceConfig, SyncService};
//! use streamsync::core::{ModifySyncRequest, NodeAddress, StreamId, SyncCookie, SyncStreamsRequest};
//! use streamsync::engine::channel::channel_receiver;
//! use streamsync::store::MemoryStreamStore;
//!
//! # async fn example() -> streamsync::Result<()> {
//! let address = NodeAddress::from_bytes([1; 20]);
//! let store = Arc::new(MemoryStreamStore::new(address));
//! store.create_stream(StreamId::derive("general"), vec![address]);
//!
//! let nodes = Arc::new(MemoryNodeRegistry::new());
//! let service = Arc::new(SyncService::new(ServiceConfig::new(address), store, nodes.clone())?);
//! nodes.register(&service);
//!
//! let (receiver, mut updates) = channel_receiver(64);
//! let session = Arc::clone(&service);
//! tokio::spawn(async move {
//!     session
//!         .sync_streams("sync-1", SyncStreamsRequest::default(), Arc::new(receiver))
//!         .await
//! });
//!
//! let _new = updates.recv().await;
//! let add = ModifySyncRequest::new("sync-1").add(SyncCookie::new(StreamId::derive("general")));
//! let response = service.modify_sync(add).await?;
//! assert!(response.is_ok());
//! # Ok(())
//! # }
//! ```
//!
//! ## Re-exports
//!
//! - `streamsync::core` - Identifiers, envelopes, requests and error codes
//! - `streamsync::store` - Stream store interface and in-memory store
//! - `streamsync::engine` - Event bus, emitters, syncer and session handlers

pub mod loopback;
pub mod service;

// Re-export component crates
pub use streamsync_core as core;
pub use streamsync_engine as engine;
pub use streamsync_store as store;

// Re-export main types for convenience
pub use loopback::{LoopbackNodeClient, MemoryNodeRegistry};
pub use service::{ServiceConfig, SyncService};

pub use streamsync_core::{
    new_sync_id, ErrorCode, ModifySyncRequest, ModifySyncResponse, NodeAddress, PingSyncRequest,
    Result, StreamId, SyncCookie, SyncError, SyncOp, SyncStreamsRequest, SyncStreamsResponse,
};
pub use streamsync_engine::{SyncConfig, SyncReceiver};
