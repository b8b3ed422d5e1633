//! The supervisor's background task: an explicit loop over the connection
//! state machine. This task is the sole consumer of closed signals, so the
//! reconnect transition can never run twice for one loss; duplicate signals
//! queued behind a completed reconnect die with the disposed handle.

use crate::auth::{AuthError, CredentialRefresher};
use crate::channel::{BearerProvider, ChannelError, ChannelHandle, CloseReason};
use crate::retry::{next_backoff, sleep_or_cancel};
use crate::supervisor::handle::Inner;
use crate::supervisor::ConnectionState;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

enum ConnectOutcome {
    Connected(Box<dyn ChannelHandle>),
    NoCredentials,
    Cancelled,
}

enum Wait {
    Cancelled,
    Closed(CloseReason),
    Logout,
}

pub(super) async fn run(inner: Arc<Inner>) {
    let bearer = bearer_provider(Arc::clone(&inner.refresher));
    let mut logout_rx = inner.logout.as_ref().map(|tx| tx.subscribe());
    let mut failures = FailureLog::new();

    loop {
        if inner.cancel.is_cancelled() {
            break;
        }

        if !wait_for_credentials(&inner).await {
            break;
        }

        // Logout events queued while parked predate the login that just
        // produced these credentials; acting on them would tear down the
        // fresh channel.
        drain_logout(&mut logout_rx);

        inner.set_state(ConnectionState::Connecting);
        let mut handle = match connect_with_retry(&inner, &bearer, &mut failures).await {
            ConnectOutcome::Connected(handle) => handle,
            ConnectOutcome::NoCredentials => continue,
            ConnectOutcome::Cancelled => break,
        };

        inner.set_state(ConnectionState::Connected);
        info!("push channel connected");

        let wait = tokio::select! {
            _ = inner.cancel.cancelled() => Wait::Cancelled,
            reason = handle.closed() => Wait::Closed(reason),
            _ = recv_logout(&mut logout_rx) => Wait::Logout,
        };

        match wait {
            Wait::Cancelled => {
                handle.dispose().await;
                break;
            }
            Wait::Logout => {
                info!("logout received, dropping push channel");
                handle.dispose().await;
            }
            Wait::Closed(reason) => {
                if inner.shutting_down.load(Ordering::Acquire) {
                    debug!(%reason, "channel closed during shutdown");
                    handle.dispose().await;
                    break;
                }
                warn!(%reason, "push channel lost, reconnecting");
                inner.set_state(ConnectionState::Reconnecting);
                handle.dispose().await;
            }
        }
    }

    inner.set_state(ConnectionState::Closed);
    debug!("supervisor task exited");
}

/// Polls the store until usable credentials appear. Returns `false` on
/// cancellation.
async fn wait_for_credentials(inner: &Inner) -> bool {
    loop {
        if inner.cancel.is_cancelled() {
            return false;
        }
        match inner.refresher.get_valid_token().await {
            Ok(tokens) => {
                if tokens.access_token.is_empty() {
                    // Nothing should ever persist an empty token; refuse to
                    // present it and keep the process alive.
                    error!("stored access token is empty, refusing to connect");
                } else {
                    return true;
                }
            }
            Err(AuthError::NotAuthenticated) => {
                debug!("no stored credentials, waiting for login");
            }
            Err(AuthError::Rejected) => {
                info!("stored credentials rejected, waiting for a new login");
            }
            Err(err) => {
                warn!(error = %err, "credential check failed");
            }
        }
        inner.set_state(ConnectionState::WaitingForCredentials);
        if !sleep_or_cancel(&inner.cancel, inner.poll_interval).await {
            return false;
        }
    }
}

/// Retries the handshake with jittered exponential backoff until it succeeds,
/// credentials disappear, or the supervisor is cancelled.
async fn connect_with_retry(
    inner: &Inner,
    bearer: &BearerProvider,
    failures: &mut FailureLog,
) -> ConnectOutcome {
    let mut delay = inner.reconnect.min_backoff;
    loop {
        if inner.cancel.is_cancelled() {
            return ConnectOutcome::Cancelled;
        }
        match inner
            .connector
            .connect(bearer, Arc::clone(&inner.listener))
            .await
        {
            Ok(handle) => {
                failures.succeeded();
                return ConnectOutcome::Connected(handle);
            }
            Err(ChannelError::MissingCredentials) => {
                debug!("credentials unavailable at handshake time");
                return ConnectOutcome::NoCredentials;
            }
            Err(err) => failures.failed(&err),
        }
        if !sleep_or_cancel(&inner.cancel, delay).await {
            return ConnectOutcome::Cancelled;
        }
        delay = next_backoff(delay, inner.reconnect.max_backoff);
    }
}

/// Discards logout events that are already queued.
fn drain_logout(rx: &mut Option<broadcast::Receiver<()>>) {
    let Some(rx) = rx else { return };
    loop {
        match rx.try_recv() {
            Ok(()) | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(_) => return,
        }
    }
}

/// Resolves when a logout event arrives; pends forever when the supervisor
/// is not subscribed or the coordinator is gone.
async fn recv_logout(rx: &mut Option<broadcast::Receiver<()>>) {
    let Some(rx) = rx else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(()) => return,
            // Missing an intermediate event is fine, the latest logout wins.
            Err(broadcast::error::RecvError::Lagged(_)) => return,
            Err(broadcast::error::RecvError::Closed) => {
                return std::future::pending().await;
            }
        }
    }
}

/// Bearer callback evaluated on every connect attempt.
fn bearer_provider(refresher: Arc<CredentialRefresher>) -> BearerProvider {
    Arc::new(move || {
        let refresher = Arc::clone(&refresher);
        Box::pin(async move {
            match refresher.get_valid_token().await {
                Ok(tokens) => Some(tokens.access_token),
                Err(err) => {
                    debug!(error = %err, "bearer resolution failed");
                    None
                }
            }
        })
    })
}

const WARN_OCCURRENCES: u32 = 3;

/// Downgrades repeated identical connect failures from WARN to DEBUG so a
/// long outage does not flood the log.
struct FailureLog {
    last: Option<String>,
    count: u32,
}

impl FailureLog {
    fn new() -> Self {
        Self {
            last: None,
            count: 0,
        }
    }

    fn failed(&mut self, err: &ChannelError) {
        let message = err.to_string();
        if self.last.as_deref() == Some(message.as_str()) {
            self.count += 1;
        } else {
            self.last = Some(message.clone());
            self.count = 1;
        }
        if self.count <= WARN_OCCURRENCES {
            warn!(error = %message, "channel connect failed");
        } else {
            debug!(error = %message, occurrences = self.count, "channel connect still failing");
        }
    }

    fn succeeded(&mut self) {
        if let Some(previous) = self.last.take() {
            info!(previous_error = %previous, occurrences = self.count, "channel connect recovered");
        }
        self.count = 0;
    }
}
