//! # streamsync store
//!
//! The stream store as seen by the sync engine: stream lookup, placement,
//! deltas since a cookie, and live subscription.
//!
//! ## Key Types
//!
//! - [`StreamStore`] - Async lookup of streams known to this node
//! - [`StoredStream`] - One stream: placement, backfill reads, listeners
//! - [`StreamListener`] - Callback interface for live changes
//! - [`StreamNodes`] - Replica set with sticky-peer rotation
//! - [`MemoryStreamStore`] - In-memory store for the local node and tests
//!
//! ## Design Notes
//!
//! - **Backfill/live ordering**: `updates_since_cookie` runs its callback under
//!   the same lock used for listener notification, so a reader that forwards
//!   both into one ordered queue sees neither gaps nor duplicates.
//! - **Resets**: an unknown or stale cookie produces one full snapshot with
//!   `sync_reset` set instead of an error.

pub mod error;
pub mod memory;
pub mod nodes;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::{MemoryStream, MemoryStreamStore};
pub use nodes::StreamNodes;
pub use traits::{ListenerId, StoredStream, StreamListener, StreamStore};
