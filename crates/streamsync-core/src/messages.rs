//! Wire message shapes exchanged between clients, nodes and the engine.
//!
//! Encoding is left to the transport; these are plain data types.
//!
//! ## Update envelope
//!
//! Every message a session receives is a [`SyncStreamsResponse`] tagged with a
//! [`SyncOp`]. Envelopes are immutable once published: fan-out hands each
//! recipient its own shallow copy via [`SyncStreamsResponse::tailored`], which
//! shares the payload through an `Arc`.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, Result, SyncError};
use crate::stream::{StreamId, SyncCookie};
use crate::types::NodeAddress;

/// Envelope operation tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncOp {
    /// Session opened; carries the authoritative session id.
    New,
    /// Stream payload (live update or backfill).
    Update,
    /// The subscription to a stream ended; the client must resubscribe.
    Down,
    /// The session is closing.
    Close,
    /// Reply to a ping.
    Pong,
}

/// A stream payload together with the cookie to resume from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamAndCookie {
    pub next_sync_cookie: SyncCookie,
    pub events: Vec<Bytes>,
    /// The payload is a full snapshot rather than a delta.
    pub sync_reset: bool,
}

impl StreamAndCookie {
    pub fn stream_id(&self) -> StreamId {
        self.next_sync_cookie.stream_id
    }
}

/// The update envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStreamsResponse {
    pub sync_id: String,
    pub sync_op: SyncOp,
    pub stream: Option<Arc<StreamAndCookie>>,
    /// Set on DOWN messages, which carry no payload.
    pub stream_id: Option<StreamId>,
    pub pong_nonce: String,
    /// Ordered routing chain for backfill replies. Empty means untargeted.
    pub target_sync_ids: Vec<String>,
    pub message: Option<String>,
}

impl SyncStreamsResponse {
    fn with_op(sync_op: SyncOp) -> Self {
        Self {
            sync_id: String::new(),
            sync_op,
            stream: None,
            stream_id: None,
            pong_nonce: String::new(),
            target_sync_ids: Vec::new(),
            message: None,
        }
    }

    /// Opening handshake for a session.
    pub fn new_sync(sync_id: impl Into<String>) -> Self {
        Self {
            sync_id: sync_id.into(),
            ..Self::with_op(SyncOp::New)
        }
    }

    pub fn update(stream: Arc<StreamAndCookie>) -> Self {
        Self {
            stream: Some(stream),
            ..Self::with_op(SyncOp::Update)
        }
    }

    pub fn down(stream_id: StreamId) -> Self {
        Self {
            stream_id: Some(stream_id),
            ..Self::with_op(SyncOp::Down)
        }
    }

    pub fn close() -> Self {
        Self::with_op(SyncOp::Close)
    }

    pub fn pong(nonce: impl Into<String>) -> Self {
        Self {
            pong_nonce: nonce.into(),
            ..Self::with_op(SyncOp::Pong)
        }
    }

    pub fn with_targets(mut self, target_sync_ids: Vec<String>) -> Self {
        self.target_sync_ids = target_sync_ids;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// The stream this envelope concerns.
    ///
    /// DOWN messages carry the id directly; updates carry it in the next cookie.
    pub fn stream_id(&self) -> Option<StreamId> {
        match self.sync_op {
            SyncOp::Down => self
                .stream_id
                .or_else(|| self.stream.as_ref().map(|s| s.stream_id())),
            _ => self
                .stream
                .as_ref()
                .map(|s| s.stream_id())
                .or(self.stream_id),
        }
    }

    pub fn is_targeted(&self) -> bool {
        !self.target_sync_ids.is_empty()
    }

    /// Per-recipient copy for untargeted fan-out.
    ///
    /// Clears the session id and routing chain; the payload is shared.
    pub fn tailored(&self) -> Self {
        Self {
            sync_id: String::new(),
            sync_op: self.sync_op,
            stream: self.stream.clone(),
            stream_id: self.stream_id,
            pong_nonce: String::new(),
            target_sync_ids: Vec::new(),
            message: self.message.clone(),
        }
    }
}

/// Request to open a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStreamsRequest {
    /// Streams to add right away.
    pub sync_pos: Vec<SyncCookie>,
}

/// Streams to backfill on behalf of a (possibly remote) session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillStreams {
    /// Session the backfill reply is routed to.
    pub sync_id: String,
    pub streams: Vec<SyncCookie>,
}

/// Add, remove or backfill streams on an open session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifySyncRequest {
    pub sync_id: String,
    pub add_streams: Vec<SyncCookie>,
    pub remove_streams: Vec<StreamId>,
    pub backfill_streams: Option<BackfillStreams>,
}

impl ModifySyncRequest {
    pub fn new(sync_id: impl Into<String>) -> Self {
        Self {
            sync_id: sync_id.into(),
            ..Default::default()
        }
    }

    pub fn add(mut self, cookie: SyncCookie) -> Self {
        self.add_streams.push(cookie);
        self
    }

    pub fn remove(mut self, stream_id: StreamId) -> Self {
        self.remove_streams.push(stream_id);
        self
    }

    pub fn backfill(mut self, target_sync_id: impl Into<String>, streams: Vec<SyncCookie>) -> Self {
        self.backfill_streams = Some(BackfillStreams {
            sync_id: target_sync_id.into(),
            streams,
        });
        self
    }

    fn backfill_cookies(&self) -> &[SyncCookie] {
        self.backfill_streams
            .as_ref()
            .map(|b| b.streams.as_slice())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.add_streams.is_empty()
            && self.remove_streams.is_empty()
            && self.backfill_cookies().is_empty()
    }

    /// Routing chain for backfill replies: this session first, then the
    /// backfill's target session if it differs.
    pub fn target_sync_ids(&self) -> Vec<String> {
        let mut ids = Vec::with_capacity(2);
        if !self.sync_id.is_empty() {
            ids.push(self.sync_id.clone());
        }
        if let Some(backfill) = &self.backfill_streams {
            if !backfill.sync_id.is_empty() && backfill.sync_id != self.sync_id {
                ids.push(backfill.sync_id.clone());
            }
        }
        ids
    }

    /// Structural validation, run before any side effect.
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(SyncError::InvalidArgument(
                "empty modify sync request".into(),
            ));
        }

        let mut added = HashSet::with_capacity(self.add_streams.len());
        for cookie in &self.add_streams {
            if !added.insert(cookie.stream_id) {
                return Err(SyncError::InvalidArgument(
                    "duplicate stream in add list".into(),
                ));
            }
        }

        let mut removed = HashSet::with_capacity(self.remove_streams.len());
        for stream_id in &self.remove_streams {
            if !removed.insert(*stream_id) {
                return Err(SyncError::InvalidArgument(
                    "duplicate stream in remove list".into(),
                ));
            }
        }

        let mut backfilled = HashSet::new();
        for cookie in self.backfill_cookies() {
            if !backfilled.insert(cookie.stream_id) {
                return Err(SyncError::InvalidArgument(
                    "duplicate stream in backfill list".into(),
                ));
            }
        }

        // A stream may appear in at most one of the three lists.
        let mut seen = HashSet::with_capacity(added.len() + removed.len() + backfilled.len());
        for stream_id in added.iter().chain(&removed).chain(&backfilled) {
            if !seen.insert(*stream_id) {
                return Err(SyncError::InvalidArgument(format!(
                    "stream {} is listed more than once across add, remove and backfill",
                    stream_id
                )));
            }
        }

        Ok(())
    }
}

/// Per-stream outcome of a modify operation. Only failures are reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStreamOpStatus {
    pub stream_id: StreamId,
    pub code: i32,
    pub message: String,
    /// The node that produced the failure, if any.
    pub node_address: Option<NodeAddress>,
}

impl SyncStreamOpStatus {
    pub fn new(stream_id: StreamId, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            stream_id,
            code: code.as_i32(),
            message: message.into(),
            node_address: None,
        }
    }

    pub fn from_error(stream_id: StreamId, err: &SyncError) -> Self {
        Self::new(stream_id, err.code(), err.message())
    }

    pub fn with_node(mut self, node_address: NodeAddress) -> Self {
        self.node_address = Some(node_address);
        self
    }

    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::from_i32(self.code)
    }

    /// Turn the status back into an error, keeping its code.
    pub fn to_error(&self) -> SyncError {
        SyncError::remote(self.error_code(), self.message.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifySyncResponse {
    pub adds: Vec<SyncStreamOpStatus>,
    pub removals: Vec<SyncStreamOpStatus>,
    pub backfills: Vec<SyncStreamOpStatus>,
}

impl ModifySyncResponse {
    pub fn is_ok(&self) -> bool {
        self.adds.is_empty() && self.removals.is_empty() && self.backfills.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingSyncRequest {
    pub sync_id: String,
    pub nonce: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(name: &str) -> SyncCookie {
        SyncCookie::new(StreamId::derive(name))
    }

    #[test]
    fn test_empty_request_rejected() {
        let err = ModifySyncRequest::new("s").validate().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_empty_backfill_counts_as_empty() {
        let req = ModifySyncRequest::new("s").backfill("t", vec![]);
        assert!(req.is_empty());
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_duplicate_add_rejected() {
        let req = ModifySyncRequest::new("s").add(cookie("a")).add(cookie("a"));
        let err = req.validate().unwrap_err();
        assert_eq!(err.message(), "duplicate stream in add list");
    }

    #[test]
    fn test_duplicate_remove_rejected() {
        let id = StreamId::derive("a");
        let req = ModifySyncRequest::new("s").remove(id).remove(id);
        assert_eq!(
            req.validate().unwrap_err().message(),
            "duplicate stream in remove list"
        );
    }

    #[test]
    fn test_duplicate_backfill_rejected() {
        let req = ModifySyncRequest::new("s").backfill("t", vec![cookie("a"), cookie("a")]);
        assert_eq!(
            req.validate().unwrap_err().message(),
            "duplicate stream in backfill list"
        );
    }

    #[test]
    fn test_cross_listed_rejected() {
        let req = ModifySyncRequest::new("s")
            .add(cookie("a"))
            .remove(StreamId::derive("a"));
        let err = req.validate().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert!(err.message().contains("listed more than once"));
    }

    #[test]
    fn test_added_and_backfilled_rejected() {
        let req = ModifySyncRequest::new("s")
            .add(cookie("a"))
            .backfill("s", vec![cookie("a")]);
        assert_eq!(req.validate().unwrap_err().code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_removed_and_backfilled_rejected() {
        let req = ModifySyncRequest::new("s")
            .remove(StreamId::derive("a"))
            .backfill("s", vec![cookie("a")]);
        assert_eq!(req.validate().unwrap_err().code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_valid_request() {
        let req = ModifySyncRequest::new("s")
            .add(cookie("a"))
            .remove(StreamId::derive("b"))
            .backfill("t", vec![cookie("c")]);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_target_sync_ids() {
        let req = ModifySyncRequest::new("s1").backfill("s2", vec![cookie("a")]);
        assert_eq!(req.target_sync_ids(), vec!["s1".to_string(), "s2".to_string()]);

        let same = ModifySyncRequest::new("s1").backfill("s1", vec![cookie("a")]);
        assert_eq!(same.target_sync_ids(), vec!["s1".to_string()]);

        let anonymous = ModifySyncRequest::new("").backfill("s2", vec![cookie("a")]);
        assert_eq!(anonymous.target_sync_ids(), vec!["s2".to_string()]);
    }

    #[test]
    fn test_envelope_stream_id() {
        let id = StreamId::derive("a");
        assert_eq!(SyncStreamsResponse::down(id).stream_id(), Some(id));

        let payload = Arc::new(StreamAndCookie {
            next_sync_cookie: SyncCookie::new(id),
            events: vec![],
            sync_reset: false,
        });
        assert_eq!(SyncStreamsResponse::update(payload).stream_id(), Some(id));
        assert_eq!(SyncStreamsResponse::close().stream_id(), None);
    }

    #[test]
    fn test_tailored_copy_shares_payload() {
        let payload = Arc::new(StreamAndCookie {
            next_sync_cookie: SyncCookie::new(StreamId::derive("a")),
            events: vec![Bytes::from_static(b"e1")],
            sync_reset: false,
        });
        let mut original = SyncStreamsResponse::update(payload.clone())
            .with_targets(vec!["x".into()]);
        original.sync_id = "origin".into();

        let copy = original.tailored();
        assert!(copy.sync_id.is_empty());
        assert!(copy.target_sync_ids.is_empty());
        assert!(Arc::ptr_eq(copy.stream.as_ref().unwrap(), &payload));
    }

    #[test]
    fn test_status_roundtrips_code() {
        let status = SyncStreamOpStatus::from_error(
            StreamId::derive("a"),
            &SyncError::NotFound("stream not found".into()),
        );
        assert_eq!(status.error_code(), ErrorCode::NotFound);
        assert_eq!(status.to_error().code(), ErrorCode::NotFound);
    }
}
