use crate::store::StoreError;
use crate::token::TokenDecodeError;
use thiserror::Error;

/// Errors from credential acquisition and refresh.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credentials are stored; the user must log in.
    #[error("not authenticated")]
    NotAuthenticated,
    /// The remote service rejected the credentials (401); a new login is
    /// required.
    #[error("credentials rejected by the remote service")]
    Rejected,
    /// The auth endpoint answered with an unexpected status.
    #[error("auth endpoint returned status {0}")]
    Status(u16),
    /// The auth endpoint could not be reached.
    #[error("auth endpoint unreachable: {0}")]
    Network(String),
    /// The returned access token could not be decoded.
    #[error(transparent)]
    Token(#[from] TokenDecodeError),
    /// The settings store could not be updated.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthError {
    /// Whether retrying the same operation later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Network(_) => true,
            AuthError::Status(status) => {
                *status >= 500 || *status == 408 || *status == 429
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(AuthError::Network("refused".into()).is_transient());
        assert!(AuthError::Status(503).is_transient());
        assert!(AuthError::Status(429).is_transient());
        assert!(AuthError::Status(408).is_transient());
        assert!(!AuthError::Status(400).is_transient());
        assert!(!AuthError::Rejected.is_transient());
        assert!(!AuthError::NotAuthenticated.is_transient());
    }
}
