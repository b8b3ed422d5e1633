//! Resilient outbound request pipeline.
//!
//! Every call runs through a fixed stage order: concurrency cap, overall
//! deadline, bounded retry with exponential backoff, circuit breaker, and a
//! per-attempt deadline. A bearer token is resolved freshly for each attempt
//! so a refresh that completes mid-retry is picked up automatically.

mod api_client;
mod circuit;
mod errors;

pub use api_client::ApiClient;
pub use errors::{CallError, FailureClass, GatewayError};

use crate::auth::{AuthError, CredentialRefresher};
use crate::config::GatewayConfig;
use crate::retry::retry_delay;
use circuit::CircuitBreaker;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Runs outbound calls through the failure-handling pipeline.
pub struct ResilientGateway {
    refresher: Arc<CredentialRefresher>,
    permits: Semaphore,
    breaker: CircuitBreaker,
    config: GatewayConfig,
}

impl ResilientGateway {
    /// Builds a gateway resolving bearer tokens through `refresher`.
    pub fn new(refresher: Arc<CredentialRefresher>, config: GatewayConfig) -> Self {
        Self {
            permits: Semaphore::new(config.max_concurrent_calls),
            breaker: CircuitBreaker::new(config.circuit_failure_threshold, config.circuit_cooldown),
            refresher,
            config,
        }
    }

    /// The refresher backing this gateway.
    pub fn refresher(&self) -> &Arc<CredentialRefresher> {
        &self.refresher
    }

    /// Executes `request_fn` through the pipeline.
    ///
    /// `request_fn` receives the bearer access token for the attempt and is
    /// invoked once per attempt, up to `1 + max_retries` times.
    ///
    /// # Errors
    ///
    /// [`GatewayError::RateLimited`] when the concurrency cap is saturated,
    /// [`GatewayError::Timeout`] when the overall deadline elapses,
    /// [`GatewayError::CircuitOpen`] while the breaker is open,
    /// [`GatewayError::AuthRejected`] / [`GatewayError::NotAuthenticated`]
    /// from credential resolution, and [`GatewayError::Exhausted`] once every
    /// attempt is spent.
    pub async fn execute<T, F, Fut>(&self, request_fn: F) -> Result<T, GatewayError>
    where
        F: Fn(String) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, CallError>> + Send,
        T: Send,
    {
        let _permit = self
            .permits
            .try_acquire()
            .map_err(|_| GatewayError::RateLimited)?;

        tokio::time::timeout(self.config.overall_timeout, self.run_attempts(&request_fn))
            .await
            .map_err(|_| GatewayError::Timeout)?
    }

    async fn run_attempts<T, F, Fut>(&self, request_fn: &F) -> Result<T, GatewayError>
    where
        F: Fn(String) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, CallError>> + Send,
        T: Send,
    {
        let mut attempt: u32 = 1;
        loop {
            let err = match self.attempt(request_fn).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(err);
            }

            if attempt > self.config.max_retries {
                return Err(GatewayError::Exhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = retry_delay(
                attempt,
                self.config.retry_base_delay,
                self.config.retry_max_delay,
            );
            warn!(attempt, ?delay, error = %err, "call failed, retrying");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn attempt<T, F, Fut>(&self, request_fn: &F) -> Result<T, GatewayError>
    where
        F: Fn(String) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, CallError>> + Send,
        T: Send,
    {
        let Some(admission) = self.breaker.try_admit() else {
            return Err(GatewayError::CircuitOpen);
        };

        // Credential failures never resolve the admission, the remote
        // service was not called; the guard re-opens an interrupted probe.
        let tokens = self
            .refresher
            .get_valid_token()
            .await
            .map_err(|err| match err {
                AuthError::NotAuthenticated => GatewayError::NotAuthenticated,
                AuthError::Rejected => GatewayError::AuthRejected,
                other => GatewayError::Auth(other),
            })?;

        debug!("dispatching call attempt");
        match tokio::time::timeout(self.config.attempt_timeout, request_fn(tokens.access_token))
            .await
        {
            Ok(Ok(value)) => {
                admission.succeeded();
                Ok(value)
            }
            Ok(Err(err)) => {
                // A definitive non-retryable response still means the
                // service is up and answering.
                if err.is_retryable() {
                    admission.failed();
                } else {
                    admission.succeeded();
                }
                Err(err.into())
            }
            Err(_) => {
                admission.failed();
                Err(GatewayError::AttemptTimeout)
            }
        }
    }
}

impl fmt::Debug for ResilientGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientGateway")
            .field("config", &self.config)
            .field("available_permits", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}
