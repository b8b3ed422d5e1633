//! Push-channel boundary: connector, handle, and listener seams.
//!
//! The supervisor drives these traits; the concrete WebSocket transport
//! lives in [`ws`]. Tests substitute fakes at the same seams.

pub mod ws;

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Future returned by a [`BearerProvider`].
pub type BearerFuture = Pin<Box<dyn Future<Output = Option<String>> + Send + 'static>>;

/// Callback resolving the bearer token for a connection attempt.
///
/// Evaluated freshly on every attempt so a refresh that completed since the
/// last handshake is picked up. `None` means no credentials are available.
pub type BearerProvider = Arc<dyn Fn() -> BearerFuture + Send + Sync + 'static>;

/// Receives events pushed by the remote service.
///
/// Registered before the handshake completes so no event can be missed.
/// Implementations must be quick and non-blocking; they run on the channel's
/// read task.
pub trait ChannelListener: Send + Sync + 'static {
    /// Called for every event frame, with its target name and JSON payload.
    fn on_event(&self, target: &str, payload: serde_json::Value);
}

/// Why a live channel ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The remote service closed the channel in an orderly way.
    Remote,
    /// The transport failed.
    Transport(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Remote => write!(f, "closed by remote"),
            CloseReason::Transport(detail) => write!(f, "transport failure: {detail}"),
        }
    }
}

/// Errors from establishing a channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The bearer provider returned no token; the handshake was not
    /// attempted.
    #[error("no credentials available for channel handshake")]
    MissingCredentials,
    /// The remote service refused the handshake.
    #[error("channel handshake rejected with status {0}")]
    Rejected(u16),
    /// The transport failed before or during the handshake.
    #[error("channel transport failure: {0}")]
    Transport(String),
}

/// Establishes push channels.
#[async_trait]
pub trait ChannelConnector: Send + Sync + 'static {
    /// Opens a channel, delivering events to `listener`.
    ///
    /// The bearer token is resolved through `bearer` immediately before the
    /// handshake; the listener is wired up before any frame can arrive.
    async fn connect(
        &self,
        bearer: &BearerProvider,
        listener: Arc<dyn ChannelListener>,
    ) -> Result<Box<dyn ChannelHandle>, ChannelError>;
}

/// A live channel.
#[async_trait]
pub trait ChannelHandle: Send {
    /// Resolves when the channel ends, with the reason.
    async fn closed(&mut self) -> CloseReason;

    /// Tears the channel down and releases its resources.
    async fn dispose(self: Box<Self>);
}
