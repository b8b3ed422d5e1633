use crate::config::ApiConfig;
use crate::gateway::{CallError, GatewayError, ResilientGateway};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Typed JSON helpers over the resilient gateway.
///
/// Every call carries the current bearer token, runs through the full
/// pipeline, and deserializes the response body.
pub struct ApiClient {
    http: reqwest::Client,
    config: ApiConfig,
    gateway: Arc<ResilientGateway>,
}

impl ApiClient {
    /// Builds a client for the configured remote service.
    pub fn new(config: ApiConfig, gateway: Arc<ResilientGateway>) -> Result<Self, GatewayError> {
        let http = config
            .http_client()
            .map_err(|err| GatewayError::Call(CallError::Transport(err.to_string())))?;
        Ok(Self {
            http,
            config,
            gateway,
        })
    }

    /// GET `path` and deserialize the JSON response.
    pub async fn get_json<T>(&self, path: &str) -> Result<T, GatewayError>
    where
        T: DeserializeOwned + Send,
    {
        self.send_json(Method::GET, path, None).await
    }

    /// POST `body` as JSON to `path` and deserialize the response.
    pub async fn post_json<T, B>(&self, path: &str, body: &B) -> Result<T, GatewayError>
    where
        T: DeserializeOwned + Send,
        B: Serialize + ?Sized,
    {
        self.send_json(Method::POST, path, Some(to_body(body)?)).await
    }

    /// PUT `body` as JSON to `path` and deserialize the response.
    pub async fn put_json<T, B>(&self, path: &str, body: &B) -> Result<T, GatewayError>
    where
        T: DeserializeOwned + Send,
        B: Serialize + ?Sized,
    {
        self.send_json(Method::PUT, path, Some(to_body(body)?)).await
    }

    /// PATCH `body` as JSON to `path` and deserialize the response.
    pub async fn patch_json<T, B>(&self, path: &str, body: &B) -> Result<T, GatewayError>
    where
        T: DeserializeOwned + Send,
        B: Serialize + ?Sized,
    {
        self.send_json(Method::PATCH, path, Some(to_body(body)?))
            .await
    }

    async fn send_json<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, GatewayError>
    where
        T: DeserializeOwned + Send,
    {
        let url = self.config.endpoint(path);
        self.gateway
            .execute(move |access_token| {
                let http = self.http.clone();
                let method = method.clone();
                let url = url.clone();
                let body = body.clone();
                async move {
                    let mut request = http.request(method, url).bearer_auth(access_token);
                    if let Some(body) = &body {
                        request = request.json(body);
                    }
                    let response = request.send().await.map_err(to_call_error)?;
                    let status = response.status();
                    if !status.is_success() {
                        return Err(CallError::Status(status.as_u16()));
                    }
                    response.json::<T>().await.map_err(to_call_error)
                }
            })
            .await
    }
}

fn to_body<B: Serialize + ?Sized>(body: &B) -> Result<serde_json::Value, GatewayError> {
    serde_json::to_value(body)
        .map_err(|err| GatewayError::Call(CallError::Transport(err.to_string())))
}

fn to_call_error(err: reqwest::Error) -> CallError {
    match err.status() {
        Some(status) => CallError::Status(status.as_u16()),
        None => CallError::Transport(err.to_string()),
    }
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
