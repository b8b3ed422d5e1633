use crate::auth::{AuthApi, AuthError};
use crate::store::SettingsStore;
use crate::token::TokenSet;
use std::fmt;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// Keeps a valid token set available, refreshing on demand.
///
/// Refreshes are single-flight: concurrent callers that find a stale token
/// queue behind one in-flight refresh and reuse its result instead of issuing
/// their own. The store is re-read after the lock is acquired so a caller
/// that queued behind a completed refresh sees the fresh pair immediately.
pub struct CredentialRefresher {
    store: Arc<SettingsStore>,
    api: Arc<dyn AuthApi>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl CredentialRefresher {
    /// Creates a refresher over the given store and auth endpoint.
    pub fn new(store: Arc<SettingsStore>, api: Arc<dyn AuthApi>) -> Self {
        Self {
            store,
            api,
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The settings store this refresher persists into.
    pub fn store(&self) -> &Arc<SettingsStore> {
        &self.store
    }

    /// Returns a token set that is fresh at the time of the call.
    ///
    /// # Errors
    ///
    /// [`AuthError::NotAuthenticated`] when no credentials are stored,
    /// [`AuthError::Rejected`] when the refresh token was refused (the store
    /// is cleared), or the underlying transport/store failure.
    pub async fn get_valid_token(&self) -> Result<TokenSet, AuthError> {
        let tokens = self.store.tokens().ok_or(AuthError::NotAuthenticated)?;
        if tokens.is_fresh(OffsetDateTime::now_utc()) {
            return Ok(tokens);
        }
        self.refresh(tokens).await
    }

    /// Exchanges a stale pair for a fresh one, persisting the result.
    ///
    /// The exchange always presents the store's current pair, not the
    /// caller's copy, which may already be superseded. On 401 the stored
    /// credentials are cleared before the error surfaces; a rejected refresh
    /// token will not become valid by retrying. Any other failure leaves the
    /// store untouched.
    pub async fn refresh(&self, stale: TokenSet) -> Result<TokenSet, AuthError> {
        let _guard = self.refresh_lock.lock().await;

        // Another caller may have completed the refresh while we waited.
        let current = match self.store.tokens() {
            Some(current) if current.is_fresh(OffsetDateTime::now_utc()) => {
                debug!("token already refreshed by a concurrent caller");
                return Ok(current);
            }
            Some(current) => current,
            None => return Err(AuthError::NotAuthenticated),
        };
        if current.refresh_token != stale.refresh_token {
            debug!("stored pair rotated since the caller read it");
        }

        debug!("refreshing access token");
        match self
            .api
            .refresh(&current.access_token, &current.refresh_token)
            .await
        {
            Ok(response) => {
                let tokens = TokenSet::from_raw(response.access_token, response.refresh_token)?;
                self.store.save_tokens(tokens.clone()).await?;
                info!(expires_at = %tokens.expires_at, "access token refreshed");
                Ok(tokens)
            }
            Err(AuthError::Rejected) => {
                warn!("refresh token rejected, clearing stored credentials");
                self.store.clear_tokens().await?;
                Err(AuthError::Rejected)
            }
            Err(err) => Err(err),
        }
    }

    /// Logs in with a username and password, persisting the returned pair.
    ///
    /// A rejected login leaves the store untouched: an existing valid session
    /// survives a failed re-login attempt.
    pub async fn login(&self, username: &str, password: &str) -> Result<TokenSet, AuthError> {
        let response = self.api.login(username, password).await?;
        let tokens = TokenSet::from_raw(response.access_token, response.refresh_token)?;
        self.store.save_tokens(tokens.clone()).await?;
        info!(expires_at = %tokens.expires_at, "logged in");
        Ok(tokens)
    }
}

impl fmt::Debug for CredentialRefresher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRefresher")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
