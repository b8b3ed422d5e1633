use crate::auth::CredentialRefresher;
use crate::channel::{ChannelConnector, ChannelListener};
use crate::retry::ReconnectConfig;
use crate::supervisor::{ConnectionState, SupervisorBuilder};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Errors from stopping a supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The background task did not finish within the shutdown deadline and
    /// was aborted.
    #[error("supervisor did not shut down within {0:?}, task aborted")]
    ShutdownTimeout(Duration),
}

pub(super) struct Inner {
    pub(super) refresher: Arc<CredentialRefresher>,
    pub(super) connector: Arc<dyn ChannelConnector>,
    pub(super) listener: Arc<dyn ChannelListener>,
    pub(super) reconnect: ReconnectConfig,
    pub(super) poll_interval: Duration,
    pub(super) logout: Option<broadcast::Sender<()>>,
    pub(super) shutting_down: AtomicBool,
    pub(super) cancel: CancellationToken,
    pub(super) shutdown_timeout: Option<Duration>,
    pub(super) state_tx: watch::Sender<ConnectionState>,
    pub(super) state_rx: watch::Receiver<ConnectionState>,
    pub(super) task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    pub(super) fn set_state(&self, state: ConnectionState) {
        debug!(state = state.as_str(), "connection state changed");
        self.state_tx.send_replace(state);
    }
}

/// Cancels the supervisor task once the last handle is gone. The task holds
/// an `Arc<Inner>` but never this guard, so the guard's strong count tracks
/// live handles only.
#[derive(Debug)]
pub(super) struct ShutdownGuard {
    pub(super) cancel: CancellationToken,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Handle to a supervised push channel.
///
/// Cheap to clone; the background task keeps running until [`stop`] is
/// called on any clone or the last handle is dropped.
///
/// [`stop`]: PushSupervisor::stop
#[derive(Clone)]
pub struct PushSupervisor {
    pub(super) inner: Arc<Inner>,
    pub(super) _guard: Arc<ShutdownGuard>,
}

impl PushSupervisor {
    /// Starts building a supervisor over the given seams.
    pub fn builder(
        refresher: Arc<CredentialRefresher>,
        connector: Arc<dyn ChannelConnector>,
        listener: Arc<dyn ChannelListener>,
    ) -> SupervisorBuilder {
        SupervisorBuilder::new(refresher, connector, listener)
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_rx.borrow()
    }

    /// A watch receiver observing state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_rx.clone()
    }

    /// Whether the channel is currently live.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Stops the supervisor, waiting for the configured shutdown deadline
    /// (indefinitely when none was set).
    ///
    /// # Errors
    ///
    /// [`SupervisorError::ShutdownTimeout`] when the background task had to
    /// be aborted.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        match self.inner.shutdown_timeout {
            Some(deadline) => self.stop_with_timeout(deadline).await,
            None => {
                self.begin_shutdown();
                if let Some(task) = self.take_task() {
                    join_quietly(task).await;
                }
                Ok(())
            }
        }
    }

    /// Stops the supervisor, aborting the background task if it is still
    /// running after `deadline`.
    pub async fn stop_with_timeout(&self, deadline: Duration) -> Result<(), SupervisorError> {
        self.begin_shutdown();
        let Some(mut task) = self.take_task() else {
            return Ok(());
        };
        match tokio::time::timeout(deadline, &mut task).await {
            Ok(result) => {
                observe_join(result);
                Ok(())
            }
            Err(_) => {
                warn!(?deadline, "supervisor shutdown deadline elapsed, aborting task");
                task.abort();
                Err(SupervisorError::ShutdownTimeout(deadline))
            }
        }
    }

    /// The shutdown flag must be visible to the closed-signal path before the
    /// cancellation fires, otherwise a close racing the stop could trigger a
    /// reconnect.
    fn begin_shutdown(&self) {
        if !self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            self.inner.set_state(ConnectionState::ShuttingDown);
        }
        self.inner.cancel.cancel();
    }

    fn take_task(&self) -> Option<JoinHandle<()>> {
        self.inner
            .task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
    }
}

async fn join_quietly(task: JoinHandle<()>) {
    observe_join(task.await);
}

fn observe_join(result: Result<(), tokio::task::JoinError>) {
    if let Err(err) = result {
        if !err.is_cancelled() {
            warn!(error = %err, "supervisor task ended abnormally");
        }
    }
}

impl fmt::Debug for PushSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushSupervisor")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
