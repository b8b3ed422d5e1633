//! Logout coordination: clear stored credentials, then tell every
//! subscribed supervisor to drop its live channel.

use crate::store::{SettingsStore, StoreError};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

const LOGOUT_CHANNEL_CAPACITY: usize = 4;

/// Fans logout events out to subscribed supervisors.
///
/// Tokens are cleared from the store before the event is broadcast, so a
/// subscriber reacting to the event always observes an empty store.
pub struct LogoutCoordinator {
    store: Arc<SettingsStore>,
    tx: broadcast::Sender<()>,
}

impl LogoutCoordinator {
    /// Creates a coordinator over the given store.
    pub fn new(store: Arc<SettingsStore>) -> Self {
        let (tx, _) = broadcast::channel(LOGOUT_CHANNEL_CAPACITY);
        Self { store, tx }
    }

    pub(crate) fn sender(&self) -> broadcast::Sender<()> {
        self.tx.clone()
    }

    /// Clears stored credentials and notifies subscribers.
    pub async fn logout(&self) -> Result<(), StoreError> {
        info!("logging out");
        self.store.clear_tokens().await?;
        let subscribers = self.tx.receiver_count();
        info!(subscribers, "notifying logout subscribers");
        // No receivers is fine, nothing is connected.
        let _ = self.tx.send(());
        info!("logout complete");
        Ok(())
    }
}

impl fmt::Debug for LogoutCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogoutCoordinator")
            .field("store", &self.store)
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}
