use crate::auth::AuthError;
use thiserror::Error;

/// Failure of a single call attempt against the remote API.
#[derive(Debug, Error)]
pub enum CallError {
    /// The remote service answered with a non-success status.
    #[error("remote service returned status {0}")]
    Status(u16),
    /// The request never produced a response.
    #[error("transport failure: {0}")]
    Transport(String),
}

impl CallError {
    /// Whether this attempt may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            CallError::Transport(_) => true,
            CallError::Status(status) => *status >= 500 || *status == 408 || *status == 429,
        }
    }
}

/// Coarse failure classification surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Worth retrying later; the service or network is struggling.
    Transient,
    /// The user must log in again.
    Auth,
    /// Retrying will not help.
    Fatal,
}

/// Errors from the outbound request pipeline.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No credentials are stored.
    #[error("not authenticated")]
    NotAuthenticated,
    /// Stored credentials were rejected; the user must log in again.
    #[error("authentication rejected")]
    AuthRejected,
    /// Credential acquisition failed for another reason.
    #[error("credential acquisition failed")]
    Auth(#[source] AuthError),
    /// The concurrency cap is saturated; the call was rejected, not queued.
    #[error("too many concurrent calls")]
    RateLimited,
    /// The circuit breaker is open.
    #[error("circuit breaker open")]
    CircuitOpen,
    /// The overall deadline elapsed.
    #[error("operation timed out")]
    Timeout,
    /// A single attempt's deadline elapsed.
    #[error("attempt timed out")]
    AttemptTimeout,
    /// The attempt itself failed.
    #[error(transparent)]
    Call(#[from] CallError),
    /// All retry attempts were consumed.
    #[error("gave up after {attempts} attempts")]
    Exhausted {
        /// Total attempts made, including the first.
        attempts: u32,
        /// The failure of the final attempt.
        #[source]
        last: Box<GatewayError>,
    },
}

impl GatewayError {
    /// Whether the retry loop may try again after this failure.
    pub(crate) fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Call(err) => err.is_retryable(),
            GatewayError::AttemptTimeout => true,
            GatewayError::Auth(err) => err.is_transient(),
            _ => false,
        }
    }

    /// Classifies the failure for callers deciding what to do next.
    pub fn class(&self) -> FailureClass {
        match self {
            GatewayError::NotAuthenticated | GatewayError::AuthRejected => FailureClass::Auth,
            GatewayError::Auth(err) if !err.is_transient() => FailureClass::Auth,
            GatewayError::Auth(_)
            | GatewayError::RateLimited
            | GatewayError::CircuitOpen
            | GatewayError::Timeout
            | GatewayError::AttemptTimeout => FailureClass::Transient,
            GatewayError::Call(err) if err.is_retryable() => FailureClass::Transient,
            GatewayError::Call(_) => FailureClass::Fatal,
            GatewayError::Exhausted { last, .. } => last.class(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_error_retryability() {
        assert!(CallError::Status(500).is_retryable());
        assert!(CallError::Status(503).is_retryable());
        assert!(CallError::Status(408).is_retryable());
        assert!(CallError::Status(429).is_retryable());
        assert!(CallError::Transport("reset".into()).is_retryable());
        assert!(!CallError::Status(400).is_retryable());
        assert!(!CallError::Status(404).is_retryable());
        assert!(!CallError::Status(409).is_retryable());
    }

    #[test]
    fn classification() {
        assert_eq!(GatewayError::AuthRejected.class(), FailureClass::Auth);
        assert_eq!(GatewayError::NotAuthenticated.class(), FailureClass::Auth);
        assert_eq!(GatewayError::RateLimited.class(), FailureClass::Transient);
        assert_eq!(GatewayError::CircuitOpen.class(), FailureClass::Transient);
        assert_eq!(GatewayError::Timeout.class(), FailureClass::Transient);
        assert_eq!(
            GatewayError::Call(CallError::Status(404)).class(),
            FailureClass::Fatal
        );
        assert_eq!(
            GatewayError::Exhausted {
                attempts: 6,
                last: Box::new(GatewayError::Call(CallError::Status(503))),
            }
            .class(),
            FailureClass::Transient
        );
    }
}
