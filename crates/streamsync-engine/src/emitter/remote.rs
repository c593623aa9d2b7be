//! Emitter for streams served by a peer node.
//!
//! The emitter opens its own session on the peer, adds the stream to it and
//! republishes whatever the peer sends. Three tasks cooperate:
//!
//! - the update loop reading the peer's session stream,
//! - a backfill forwarder turning queued requests into `ModifySync` calls,
//! - a liveness prober that pings an idle session and gives up on a silent one.
//!
//! All three share the emitter's cancel signal; whichever fails first sets
//! the cause.

use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use streamsync_core::{
    ModifySyncRequest, PingSyncRequest, Result, SyncCookie, SyncError, SyncOp, SyncStreamsRequest,
    SyncStreamsResponse,
};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::{BackfillRequest, EmitterCore, StreamUpdateEmitter};
use crate::config::SyncConfig;
use crate::transport::{NodeClient, SyncUpdateStream};

pub struct RemoteStreamEmitter {
    core: Arc<EmitterCore>,
    client: Arc<dyn NodeClient>,
    remote_sync_id: String,
    updates: SyncUpdateStream,
    config: SyncConfig,
    last_activity: Arc<Mutex<Instant>>,
}

impl RemoteStreamEmitter {
    /// Open a session on the peer and add the stream to it.
    ///
    /// Fails if the peer's first message is not a NEW carrying a session id,
    /// or if the peer reports the add as failed.
    pub async fn connect(
        core: Arc<EmitterCore>,
        client: Arc<dyn NodeClient>,
        config: SyncConfig,
    ) -> Result<Self> {
        let node = client.address();
        let timeout = config.rpc_timeout(1);

        let mut updates = with_timeout(
            timeout,
            "open remote sync session",
            client.sync_streams(SyncStreamsRequest::default()),
        )
        .await?;

        let first = tokio::time::timeout(timeout, updates.next())
            .await
            .map_err(|_| SyncError::DeadlineExceeded("waiting for remote handshake".into()))?;
        let remote_sync_id = match first {
            Some(Ok(msg)) if msg.sync_op == SyncOp::New && !msg.sync_id.is_empty() => msg.sync_id,
            Some(Ok(msg)) if msg.sync_op == SyncOp::New => {
                return Err(SyncError::Internal("remote handshake without sync id".into()))
            }
            Some(Ok(msg)) => {
                return Err(SyncError::Internal(format!(
                    "unexpected first message from remote: {:?}",
                    msg.sync_op
                )))
            }
            Some(Err(e)) => return Err(e),
            None => {
                return Err(SyncError::Unavailable(
                    "remote closed the session before the handshake".into(),
                ))
            }
        };

        let add = ModifySyncRequest::new(remote_sync_id.clone())
            .add(SyncCookie::latest(core.stream_id(), Some(node)));
        let response = match with_timeout(timeout, "add stream on remote", client.modify_sync(add)).await
        {
            Ok(response) => response,
            Err(e) => {
                cancel_remote(Arc::clone(&client), remote_sync_id, timeout);
                return Err(e);
            }
        };
        if let Some(status) = response.adds.first() {
            cancel_remote(Arc::clone(&client), remote_sync_id, timeout);
            return Err(status.to_error());
        }

        core.set_node(node);
        debug!(
            stream_id = %core.stream_id(),
            node = %node,
            remote_sync_id = %remote_sync_id,
            version = %core.version(),
            "remote emitter connected"
        );

        Ok(Self {
            core,
            client,
            remote_sync_id,
            updates,
            config,
            last_activity: Arc::new(Mutex::new(Instant::now())),
        })
    }

    pub fn remote_sync_id(&self) -> &str {
        &self.remote_sync_id
    }

    /// Forward updates until the session ends, then send the final DOWNs.
    /// Returns the cancellation cause.
    pub async fn run(self) -> Option<SyncError> {
        let core = Arc::clone(&self.core);
        let cause = self.serve().await;
        core.finish();
        cause
    }

    /// Like [`run`](Self::run) but leaves the final DOWNs to the caller.
    pub async fn serve(mut self) -> Option<SyncError> {
        let prober = tokio::spawn(connection_alive(
            Arc::clone(&self.core),
            Arc::clone(&self.client),
            self.remote_sync_id.clone(),
            Arc::clone(&self.last_activity),
            self.config.clone(),
        ));
        let forwarder = tokio::spawn(forward_backfills(
            Arc::clone(&self.core),
            Arc::clone(&self.client),
            self.remote_sync_id.clone(),
            self.config.rpc_timeout(1),
        ));

        loop {
            tokio::select! {
                _ = self.core.cancel_signal().cancelled() => break,
                next = self.updates.next() => {
                    let cause = match next {
                        Some(Ok(msg)) => {
                            *self.last_activity.lock() = Instant::now();
                            self.process(msg)
                        }
                        Some(Err(e)) => Some(e),
                        None => Some(SyncError::Unavailable("remote sync stream closed".into())),
                    };
                    if let Some(cause) = cause {
                        self.core.cancel_signal().cancel(Some(cause));
                        break;
                    }
                }
            }
        }

        prober.abort();
        if let Err(e) = forwarder.await {
            warn!(error = %e, "backfill forwarder panicked");
        }

        cancel_remote(
            Arc::clone(&self.client),
            self.remote_sync_id.clone(),
            self.config.rpc_timeout(1),
        );
        self.core.cancel_signal().cause()
    }

    /// Republish one message from the peer. Returns a cause if the
    /// emitter has to stop.
    fn process(&self, mut msg: SyncStreamsResponse) -> Option<SyncError> {
        msg.sync_id.clear();
        match msg.sync_op {
            SyncOp::Update => {
                self.core.emit(msg);
                None
            }
            // The peer dropped our session from the stream while routing a
            // failed backfill; the live feed is gone too.
            SyncOp::Down if msg.is_targeted() => {
                self.core.emit(msg);
                Some(SyncError::Unavailable(
                    "remote subscription ended".into(),
                ))
            }
            SyncOp::Down => Some(SyncError::Unavailable(
                "stream went down on remote node".into(),
            )),
            SyncOp::Close => Some(SyncError::Unavailable(
                "remote closed the sync session".into(),
            )),
            SyncOp::Pong => None,
            SyncOp::New => {
                warn!(stream_id = %self.core.stream_id(), "unexpected repeated handshake from remote");
                None
            }
        }
    }
}

async fn with_timeout<T>(
    timeout: std::time::Duration,
    what: &str,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| SyncError::DeadlineExceeded(format!("{} timed out", what)))?
}

/// Ask the peer to backfill `request` into our session, routed on to the
/// chain's only session.
///
/// The peer learns a single target, so a chain that is itself relayed
/// through this node cannot be forwarded and is refused.
pub(crate) async fn send_backfill(
    client: &dyn NodeClient,
    remote_sync_id: &str,
    request: &BackfillRequest,
    timeout: std::time::Duration,
) -> Result<()> {
    let target = match request.sync_ids.as_slice() {
        [target] => target.clone(),
        chain => {
            return Err(SyncError::InvalidArgument(format!(
                "backfill chain of {} sessions cannot be relayed",
                chain.len()
            )))
        }
    };
    let modify = ModifySyncRequest::new(remote_sync_id).backfill(target, vec![request.cookie.clone()]);
    let response = with_timeout(timeout, "remote backfill", client.modify_sync(modify)).await?;
    match response.backfills.first() {
        Some(status) => Err(status.to_error()),
        None => Ok(()),
    }
}

async fn forward_backfills(
    core: Arc<EmitterCore>,
    client: Arc<dyn NodeClient>,
    remote_sync_id: String,
    timeout: std::time::Duration,
) {
    let mut spare = None;
    loop {
        tokio::select! {
            _ = core.cancel_signal().cancelled() => return,
            _ = core.backfills().wait() => {}
        }

        let Some(mut batch) = core.backfills().get_batch(spare.take()) else {
            return;
        };

        let mut requests = batch.drain(..);
        while let Some(request) = requests.next() {
            let outcome = tokio::select! {
                _ = core.cancel_signal().cancelled() => None,
                result = send_backfill(client.as_ref(), &remote_sync_id, &request, timeout) => Some(result),
            };
            match outcome {
                Some(Ok(())) => {}
                Some(Err(e)) => {
                    warn!(
                        stream_id = %core.stream_id(),
                        sync_ids = ?request.sync_ids,
                        error = %e,
                        "remote backfill failed"
                    );
                    core.emit_backfill_down(&request);
                }
                None => {
                    core.emit_backfill_down(&request);
                    for rest in requests {
                        core.emit_backfill_down(&rest);
                    }
                    return;
                }
            }
        }
        drop(requests);
        spare = Some(batch);
    }
}

/// Liveness prober: ping an idle session, cancel a silent one.
async fn connection_alive(
    core: Arc<EmitterCore>,
    client: Arc<dyn NodeClient>,
    remote_sync_id: String,
    last_activity: Arc<Mutex<Instant>>,
    config: SyncConfig,
) {
    let mut ticker = tokio::time::interval(config.ping_check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = core.cancel_signal().cancelled() => return,
            _ = ticker.tick() => {}
        }

        let idle = last_activity.lock().elapsed();
        if idle > config.dead_after {
            warn!(
                stream_id = %core.stream_id(),
                idle_ms = idle.as_millis() as u64,
                "remote sync session inactive, giving up"
            );
            core.cancel_signal().cancel(Some(SyncError::DeadlineExceeded(
                "remote sync session inactive".into(),
            )));
            return;
        }

        if idle > config.ping_idle_after {
            let ping = PingSyncRequest {
                sync_id: remote_sync_id.clone(),
                nonce: format!("{:016x}", rand::random::<u64>()),
            };
            if let Err(e) =
                with_timeout(config.rpc_timeout(1), "ping remote", client.ping_sync(ping)).await
            {
                core.cancel_signal().cancel(Some(e));
                return;
            }
        }
    }
}

/// Best-effort cancel of our session on the peer.
fn cancel_remote(client: Arc<dyn NodeClient>, remote_sync_id: String, timeout: std::time::Duration) {
    tokio::spawn(async move {
        if let Err(e) = with_timeout(timeout, "cancel remote sync", client.cancel_sync(&remote_sync_id)).await {
            debug!(remote_sync_id = %remote_sync_id, error = %e, "remote cancel failed");
        }
    });
}
