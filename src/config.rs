//! Remote-service and pipeline configuration.

use std::time::Duration;
use url::Url;

/// Location of the remote service and how to reach it.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL of the remote API, e.g. `https://api.example.com/`.
    pub base_url: Url,
    /// Optional HTTP proxy all outbound traffic is routed through.
    pub proxy: Option<Url>,
}

impl ApiConfig {
    /// Creates a configuration for the given base URL with no proxy.
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            proxy: None,
        }
    }

    /// Routes outbound traffic through the given HTTP proxy.
    pub fn with_proxy(mut self, proxy: Url) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Builds a `reqwest` client honoring the proxy setting.
    pub(crate) fn http_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(proxy) = &self.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy.as_str())?);
        }
        builder.build()
    }

    /// Resolves a relative API path against the base URL.
    pub(crate) fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(path.trim_start_matches('/').split('/'));
        }
        url
    }
}

/// Tuning knobs for the outbound request pipeline.
///
/// The defaults match a conservative production profile: a hundred
/// concurrent calls, a minute for the whole operation, thirty seconds per
/// attempt, five retries starting at two seconds.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Maximum simultaneously executing calls; excess callers are rejected
    /// immediately, never queued.
    pub max_concurrent_calls: usize,
    /// Deadline for one `execute` call including all retries.
    pub overall_timeout: Duration,
    /// Deadline for a single attempt.
    pub attempt_timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles each attempt.
    pub retry_base_delay: Duration,
    /// Cap on the per-retry delay.
    pub retry_max_delay: Duration,
    /// Consecutive failures that trip the circuit breaker.
    pub circuit_failure_threshold: u32,
    /// How long the breaker stays open before admitting a probe.
    pub circuit_cooldown: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 100,
            overall_timeout: Duration::from_secs(60),
            attempt_timeout: Duration::from_secs(30),
            max_retries: 5,
            retry_base_delay: Duration::from_secs(2),
            retry_max_delay: Duration::from_secs(30),
            circuit_failure_threshold: 5,
            circuit_cooldown: Duration::from_secs(30),
        }
    }
}
