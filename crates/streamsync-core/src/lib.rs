//! # streamsync core
//!
//! Plain data types shared by every streamsync crate: stream and node
//! identifiers, sync cookies, the update envelope, modify requests and the
//! status-code taxonomy.
//!
//! This crate contains no I/O and no concurrency.
//!
//! ## Key Types
//!
//! - [`StreamId`] - Identifier of a replicated append-only stream
//! - [`NodeAddress`] - Identifier of a node serving streams
//! - [`SyncCookie`] - Position marker plus the node believed to serve a stream
//! - [`SyncStreamsResponse`] - The tagged update envelope delivered to sessions
//! - [`ModifySyncRequest`] - Add/remove/backfill request with up-front validation
//! - [`SyncError`] / [`ErrorCode`] - Errors and their client-visible codes

pub mod error;
pub mod messages;
pub mod stream;
pub mod types;

pub use error::{ErrorCode, Result, SyncError};
pub use messages::{
    BackfillStreams, ModifySyncRequest, ModifySyncResponse, PingSyncRequest, StreamAndCookie,
    SyncOp, SyncStreamOpStatus, SyncStreamsRequest, SyncStreamsResponse,
};
pub use stream::{StreamId, SyncCookie};
pub use types::{new_sync_id, NodeAddress};
