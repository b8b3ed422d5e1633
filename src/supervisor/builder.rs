use crate::auth::CredentialRefresher;
use crate::channel::{ChannelConnector, ChannelListener};
use crate::constants::DEFAULT_CREDENTIAL_POLL_INTERVAL;
use crate::logout::LogoutCoordinator;
use crate::retry::ReconnectConfig;
use crate::supervisor::handle::{Inner, ShutdownGuard};
use crate::supervisor::{run, ConnectionState, PushSupervisor};
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

/// Builds and starts a [`PushSupervisor`].
pub struct SupervisorBuilder {
    refresher: Arc<CredentialRefresher>,
    connector: Arc<dyn ChannelConnector>,
    listener: Arc<dyn ChannelListener>,
    reconnect: ReconnectConfig,
    poll_interval: Duration,
    shutdown_timeout: Option<Duration>,
    logout: Option<broadcast::Sender<()>>,
}

impl SupervisorBuilder {
    pub(super) fn new(
        refresher: Arc<CredentialRefresher>,
        connector: Arc<dyn ChannelConnector>,
        listener: Arc<dyn ChannelListener>,
    ) -> Self {
        Self {
            refresher,
            connector,
            listener,
            reconnect: ReconnectConfig::default(),
            poll_interval: DEFAULT_CREDENTIAL_POLL_INTERVAL,
            shutdown_timeout: None,
            logout: None,
        }
    }

    /// Backoff bounds for reconnect attempts.
    pub fn reconnect_backoff(mut self, config: ReconnectConfig) -> Self {
        self.reconnect = config;
        self
    }

    /// Interval between credential-store polls while logged out.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Deadline [`PushSupervisor::stop`] waits before aborting the task.
    pub fn shutdown_timeout(mut self, deadline: Duration) -> Self {
        self.shutdown_timeout = Some(deadline);
        self
    }

    /// Subscribes the supervisor to logout events: on logout the live channel
    /// is dropped and the supervisor waits for the next login.
    pub fn on_logout(mut self, coordinator: &LogoutCoordinator) -> Self {
        self.logout = Some(coordinator.sender());
        self
    }

    /// Starts the background task and returns the handle.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn start(self) -> PushSupervisor {
        let mut reconnect = self.reconnect;
        reconnect.normalize();

        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let inner = Arc::new(Inner {
            refresher: self.refresher,
            connector: self.connector,
            listener: self.listener,
            reconnect,
            poll_interval: self.poll_interval,
            logout: self.logout,
            shutting_down: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            shutdown_timeout: self.shutdown_timeout,
            state_tx,
            state_rx,
            task: std::sync::Mutex::new(None),
        });

        let task = tokio::spawn(run::run(Arc::clone(&inner)));
        *inner
            .task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(task);

        let guard = Arc::new(ShutdownGuard {
            cancel: inner.cancel.clone(),
        });
        PushSupervisor {
            inner,
            _guard: guard,
        }
    }
}

impl fmt::Debug for SupervisorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisorBuilder")
            .field("reconnect", &self.reconnect)
            .field("poll_interval", &self.poll_interval)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}
