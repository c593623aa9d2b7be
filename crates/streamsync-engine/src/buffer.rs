//! Dynamic message buffer.
//!
//! A capacity-bounded, ordered queue with exactly one consumer. Producers
//! append without blocking; the consumer waits for readiness and swaps out
//! everything queued so far in one step.
//!
//! ```text
//! producers ── add_message ──▶ [ items ] ── get_batch ──▶ single drain task
//!                                   │
//!                                   └── notify_one ──▶ wait()
//! ```

use parking_lot::Mutex;
use streamsync_core::SyncError;
use thiserror::Error;
use tokio::sync::Notify;

/// Default hard ceiling of a buffer.
pub const DEFAULT_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("buffer closed")]
    Closed,
    #[error("buffer full")]
    Full,
}

impl From<BufferError> for SyncError {
    fn from(e: BufferError) -> Self {
        match e {
            BufferError::Closed => SyncError::Unavailable(e.to_string()),
            BufferError::Full => SyncError::BufferFull,
        }
    }
}

pub struct DynamicBuffer<T> {
    inner: Mutex<Inner<T>>,
    ready: Notify,
    capacity: usize,
}

struct Inner<T> {
    items: Vec<T>,
    closed: bool,
}

impl<T> DynamicBuffer<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: Vec::new(),
                closed: false,
            }),
            ready: Notify::new(),
            capacity,
        }
    }

    /// Append a message. Never blocks.
    pub fn add_message(&self, item: T) -> Result<(), BufferError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(BufferError::Closed);
        }
        if inner.items.len() >= self.capacity {
            return Err(BufferError::Full);
        }
        inner.items.push(item);
        drop(inner);
        self.ready.notify_one();
        Ok(())
    }

    /// Resolves when messages may be available or the buffer was closed.
    ///
    /// Wakes are edge-triggered and coalesced; the consumer must drain with
    /// [`get_batch`](Self::get_batch) after every wake.
    pub async fn wait(&self) {
        self.ready.notified().await
    }

    /// Take everything queued so far.
    ///
    /// Returns `None` once the buffer is closed and fully drained. The
    /// storage of `prev` is reused for the next round when possible.
    pub fn get_batch(&self, prev: Option<Vec<T>>) -> Option<Vec<T>> {
        let mut inner = self.inner.lock();
        if inner.closed && inner.items.is_empty() {
            return None;
        }
        let mut spare = prev.unwrap_or_default();
        spare.clear();
        Some(std::mem::replace(&mut inner.items, spare))
    }

    /// Refuse new messages and wake the consumer for a final drain.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        drop(inner);
        self.ready.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> Default for DynamicBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}
