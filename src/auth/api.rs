use crate::auth::AuthError;
use crate::config::ApiConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Token pair as returned by the auth endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    /// Fresh access token.
    pub access_token: String,
    /// Fresh refresh token.
    pub refresh_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    access_token: &'a str,
    refresh_token: &'a str,
}

/// Boundary to the remote auth endpoints.
///
/// Faked in tests so refresher behavior can be exercised without a server.
#[async_trait]
pub trait AuthApi: Send + Sync + 'static {
    /// Exchanges a username and password for a token pair.
    async fn login(&self, username: &str, password: &str) -> Result<TokenResponse, AuthError>;

    /// Exchanges the current pair for a fresh one.
    async fn refresh(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<TokenResponse, AuthError>;
}

/// `AuthApi` over HTTPS against `{base}/auth/login` and `{base}/auth/refresh`.
#[derive(Debug, Clone)]
pub struct HttpAuthClient {
    http: reqwest::Client,
    config: ApiConfig,
}

impl HttpAuthClient {
    /// Builds a client for the configured remote service.
    pub fn new(config: ApiConfig) -> Result<Self, AuthError> {
        let http = config
            .http_client()
            .map_err(|err| AuthError::Network(err.to_string()))?;
        Ok(Self { http, config })
    }

    async fn post_for_tokens(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<TokenResponse, AuthError> {
        let response = self
            .http
            .post(self.config.endpoint(path))
            .json(body)
            .send()
            .await
            .map_err(|err| AuthError::Network(err.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AuthError::Rejected);
        }
        if !status.is_success() {
            return Err(AuthError::Status(status.as_u16()));
        }
        response
            .json()
            .await
            .map_err(|err| AuthError::Network(err.to_string()))
    }
}

#[async_trait]
impl AuthApi for HttpAuthClient {
    async fn login(&self, username: &str, password: &str) -> Result<TokenResponse, AuthError> {
        self.post_for_tokens("auth/login", &LoginRequest { username, password })
            .await
    }

    async fn refresh(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<TokenResponse, AuthError> {
        self.post_for_tokens(
            "auth/refresh",
            &RefreshRequest {
                access_token,
                refresh_token,
            },
        )
        .await
    }
}
