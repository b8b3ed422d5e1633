//! Authentication: the remote auth endpoints and the credential refresher.

mod api;
mod errors;
mod refresher;

pub use api::{AuthApi, HttpAuthClient, TokenResponse};
pub use errors::AuthError;
pub use refresher::CredentialRefresher;
