//! Client infrastructure for agents that keep a persistent, authenticated
//! connection to a distribution server.
//!
//! The crate supervises a single real-time push channel over an unreliable
//! network, transparently refreshes short-lived bearer credentials, and wraps
//! all outbound request traffic in a layered failure-handling pipeline
//! (rate limiting, timeouts, retry with backoff, circuit breaking).
//!
//! # Wiring it up
//!
//! ```no_run
//! use std::sync::Arc;
//! use hublink::{
//!     ApiClient, ApiConfig, CredentialRefresher, GatewayConfig, HttpAuthClient,
//!     LogoutCoordinator, PushSupervisor, ResilientGateway, SettingsStore,
//!     WebSocketConnector,
//! };
//!
//! # #[derive(Debug)]
//! # struct PrintListener;
//! # impl hublink::ChannelListener for PrintListener {
//! #     fn on_event(&self, target: &str, payload: serde_json::Value) {
//! #         println!("{target}: {payload}");
//! #     }
//! # }
//! # async fn wiring(key: [u8; 32]) -> Result<(), Box<dyn std::error::Error>> {
//! let config = ApiConfig::new("https://api.example.com".parse()?);
//! let store = Arc::new(SettingsStore::open("/var/lib/agent/settings.bin", &key)?);
//! let auth = Arc::new(HttpAuthClient::new(config.clone())?);
//! let refresher = Arc::new(CredentialRefresher::new(Arc::clone(&store), auth));
//!
//! let gateway = Arc::new(ResilientGateway::new(
//!     Arc::clone(&refresher),
//!     GatewayConfig::default(),
//! ));
//! let api = ApiClient::new(config.clone(), Arc::clone(&gateway))?;
//!
//! let logout = LogoutCoordinator::new(Arc::clone(&store));
//! let connector = Arc::new(WebSocketConnector::new(
//!     &config,
//!     "hubs/distribution",
//!     store.install_id(),
//! ));
//! let supervisor = PushSupervisor::builder(refresher, connector, Arc::new(PrintListener))
//!     .on_logout(&logout)
//!     .start();
//! # supervisor.stop().await?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod auth;
pub mod channel;
pub mod config;
pub mod constants;
pub mod gateway;
pub mod logout;
pub mod retry;
pub mod store;
pub mod supervisor;
pub mod token;

pub use auth::{AuthApi, AuthError, CredentialRefresher, HttpAuthClient, TokenResponse};
pub use channel::ws::WebSocketConnector;
pub use channel::{
    BearerFuture, BearerProvider, ChannelConnector, ChannelError, ChannelHandle, ChannelListener,
    CloseReason,
};
pub use config::{ApiConfig, GatewayConfig};
pub use gateway::{ApiClient, CallError, FailureClass, GatewayError, ResilientGateway};
pub use logout::LogoutCoordinator;
pub use retry::ReconnectConfig;
pub use store::{SettingsStore, StoreError};
pub use supervisor::{ConnectionState, PushSupervisor, SupervisorBuilder, SupervisorError};
pub use token::{TokenDecodeError, TokenSet};
