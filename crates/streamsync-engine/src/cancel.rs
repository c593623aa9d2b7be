//! Single-cause cancellation.

use parking_lot::Mutex;
use streamsync_core::SyncError;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// A cancellation token that remembers why it fired.
///
/// The first call to [`cancel`](Self::cancel) wins; later causes are dropped.
/// A `None` cause means a clean shutdown.
#[derive(Debug, Default)]
pub struct CancelSignal {
    token: CancellationToken,
    cause: Mutex<Option<SyncError>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Returns `true` if this call was the one that fired it.
    pub fn cancel(&self, cause: Option<SyncError>) -> bool {
        let mut slot = self.cause.lock();
        if self.token.is_cancelled() {
            return false;
        }
        *slot = cause;
        self.token.cancel();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The cause recorded by the winning `cancel` call.
    pub fn cause(&self) -> Option<SyncError> {
        self.cause.lock().clone()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// A token that fires together with this signal.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }
}
