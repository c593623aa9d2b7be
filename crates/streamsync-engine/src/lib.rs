//! # streamsync engine
//!
//! Routes stream updates from their source (the local store or a peer node)
//! to every client session interested in them.
//!
//! ## Overview
//!
//! Each client holds one long-lived session that multiplexes many streams.
//! Sessions add and remove streams at will; a newly added stream is caught
//! up through a backfill before live updates reach it. When the node serving
//! a stream fails, subscribers get a DOWN and resubscribe.
//!
//! ## Components
//!
//! - [`DynamicBuffer`] - Bounded single-consumer queue used between all tasks
//! - [`EventBus`] - Actor owning the subscriber and emitter registries
//! - [`LocalStreamEmitter`] / [`RemoteStreamEmitter`] - Per-stream feed adapters
//! - [`Syncer`] - Node selection, peer connections, failover
//! - [`SyncStreamHandler`] - One client session and its ordered outbound queue
//! - [`HandlerRegistry`] - Session directory
//!
//! ## Message Flow
//!
//! ```text
//! stream ──▶ emitter ──(msg, version)──▶ event bus ──▶ handler buffer ──▶ client
//!                ▲                           │
//!                └──── launch / backfill ────┘
//!                                            ▲
//! client ── modify ──▶ handler ── enqueue ───┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use streamsync_core::{ModifySyncRequest, NodeAddress, StreamId, SyncCookie};
//! use streamsync_engine::{
//!     channel::channel_receiver, EventBus, SyncConfig, SyncStreamHandler, Syncer,
//! };
//! use streamsync_store::MemoryStreamStore;
//!
//! # async fn example(nodes: Arc<dyn streamsync_engine::NodeRegistry>) -> streamsync_core::Result<()> {
//! let local = NodeAddress::from_bytes([1; 20]);
//! let store = Arc::new(MemoryStreamStore::new(local));
//! let config = SyncConfig::default();
//!
//! let syncer = Arc::new(Syncer::new(local, store.clone(), nodes, config.clone()));
//! let bus = Arc::new(EventBus::new(syncer, &config));
//!
//! let (receiver, _updates) = channel_receiver(64);
//! let handler = Arc::new(SyncStreamHandler::new(
//!     "sync-1",
//!     Arc::new(receiver),
//!     bus,
//!     store,
//!     config,
//! ));
//! let session = Arc::clone(&handler);
//! tokio::spawn(async move { session.run().await });
//!
//! let add = ModifySyncRequest::new("sync-1").add(SyncCookie::new(StreamId::derive("a")));
//! handler.modify(&add).await?;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod cancel;
pub mod config;
pub mod emitter;
pub mod eventbus;
pub mod handler;
pub mod handler_registry;
pub mod metrics;
pub mod subscribers;
pub mod syncer;
pub mod transport;
pub mod version;

pub use buffer::{BufferError, DynamicBuffer, DEFAULT_CAPACITY};
pub use cancel::CancelSignal;
pub use config::SyncConfig;
pub use emitter::{
    BackfillRequest, EmitterCore, EmitterLauncher, EmitterRegistry, LocalStreamEmitter,
    RemoteStreamEmitter, StreamEventSink, StreamUpdateEmitter,
};
pub use eventbus::{EventBus, SubscriptionManager};
pub use handler::SyncStreamHandler;
pub use handler_registry::HandlerRegistry;
pub use subscribers::{StreamSubscriber, StreamSubscribers, SubscriberRegistry};
pub use syncer::Syncer;
pub use transport::{channel, NodeClient, NodeRegistry, SyncReceiver, SyncUpdateStream};
pub use version::EmitterVersion;
