//! Directory of live sync operations by session id.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use streamsync_core::{Result, SyncError};

use crate::handler::SyncStreamHandler;
use crate::metrics;

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<SyncStreamHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its session id. Fails with `AlreadyExists`
    /// if the id is taken.
    pub fn insert(&self, handler: Arc<SyncStreamHandler>) -> Result<()> {
        match self.handlers.entry(handler.id().to_string()) {
            Entry::Occupied(entry) => Err(SyncError::AlreadyExists(format!(
                "sync operation {} already exists",
                entry.key()
            ))),
            Entry::Vacant(entry) => {
                entry.insert(handler);
                metrics::set_active_sessions(self.handlers.len());
                Ok(())
            }
        }
    }

    pub fn get(&self, sync_id: &str) -> Option<Arc<SyncStreamHandler>> {
        self.handlers.get(sync_id).map(|h| Arc::clone(h.value()))
    }

    /// Like [`get`](Self::get), failing with `NotFound` for unknown ids.
    pub fn require(&self, sync_id: &str) -> Result<Arc<SyncStreamHandler>> {
        self.get(sync_id)
            .ok_or_else(|| SyncError::NotFound(format!("sync operation {} not found", sync_id)))
    }

    pub fn remove(&self, sync_id: &str) -> Option<Arc<SyncStreamHandler>> {
        let removed = self.handlers.remove(sync_id).map(|(_, h)| h);
        if removed.is_some() {
            metrics::set_active_sessions(self.handlers.len());
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn sync_ids(&self) -> Vec<String> {
        self.handlers.iter().map(|h| h.key().clone()).collect()
    }
}
