//! Crate-wide constants.

use std::time::Duration;

/// Safety margin subtracted from a token's expiry when deciding freshness.
///
/// A token is presented to the remote service only while
/// `now < expires_at - TOKEN_FRESHNESS_MARGIN`; past that point a refresh
/// must be attempted first.
pub const TOKEN_FRESHNESS_MARGIN: Duration = Duration::from_secs(10 * 60);

/// Default interval between credential-store polls while waiting for a login.
pub const DEFAULT_CREDENTIAL_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Header carrying the local installation's unique id on every channel
/// handshake.
pub const INSTALL_ID_HEADER: &str = "x-install-id";
