//! WebSocket implementation of the push-channel boundary.

use crate::channel::{
    BearerProvider, ChannelConnector, ChannelError, ChannelHandle, ChannelListener, CloseReason,
};
use crate::config::ApiConfig;
use crate::constants::INSTALL_ID_HEADER;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use url::Url;
use uuid::Uuid;

/// One event frame as pushed by the remote service.
#[derive(Deserialize)]
struct EventFrame {
    target: String,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Connects to the remote service's push hub over WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    endpoint: Url,
    install_id: Uuid,
}

impl WebSocketConnector {
    /// Builds a connector for `{base_url}/{hub_path}` with `http(s)` mapped
    /// to `ws(s)`.
    pub fn new(config: &ApiConfig, hub_path: &str, install_id: Uuid) -> Self {
        let mut endpoint = config.endpoint(hub_path);
        let scheme = match endpoint.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        // set_scheme only rejects invalid schemes; "ws"/"wss" are valid.
        let _ = endpoint.set_scheme(scheme);
        Self {
            endpoint,
            install_id,
        }
    }
}

#[async_trait]
impl ChannelConnector for WebSocketConnector {
    async fn connect(
        &self,
        bearer: &BearerProvider,
        listener: Arc<dyn ChannelListener>,
    ) -> Result<Box<dyn ChannelHandle>, ChannelError> {
        let token = bearer().await.ok_or(ChannelError::MissingCredentials)?;
        if token.is_empty() {
            error!("bearer provider returned an empty access token, refusing to connect");
            return Err(ChannelError::MissingCredentials);
        }

        let mut request = self
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|err| ChannelError::Transport(err.to_string()))?;
        let headers = request.headers_mut();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|err| ChannelError::Transport(err.to_string()))?,
        );
        headers.insert(
            INSTALL_ID_HEADER,
            HeaderValue::from_str(&self.install_id.to_string())
                .map_err(|err| ChannelError::Transport(err.to_string()))?,
        );

        let (stream, _response) = connect_async(request).await.map_err(|err| match err {
            tungstenite::Error::Http(response) => {
                ChannelError::Rejected(response.status().as_u16())
            }
            other => ChannelError::Transport(other.to_string()),
        })?;
        debug!(endpoint = %self.endpoint, "push channel established");

        let (closed_tx, closed_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let pump = tokio::spawn(pump_events(stream, listener, closed_tx, cancel.clone()));

        Ok(Box::new(WebSocketHandle {
            closed_rx,
            cancel,
            pump,
        }))
    }
}

struct WebSocketHandle {
    closed_rx: mpsc::Receiver<CloseReason>,
    cancel: CancellationToken,
    pump: JoinHandle<()>,
}

#[async_trait]
impl ChannelHandle for WebSocketHandle {
    async fn closed(&mut self) -> CloseReason {
        // The sender dropping without a signal means the pump exited through
        // cancellation; treat it like an orderly close.
        self.closed_rx.recv().await.unwrap_or(CloseReason::Remote)
    }

    async fn dispose(self: Box<Self>) {
        self.cancel.cancel();
        if let Err(err) = self.pump.await {
            if !err.is_cancelled() {
                warn!(error = %err, "channel read task ended abnormally");
            }
        }
    }
}

/// Reads frames until cancellation or the channel ends, forwarding events to
/// the listener and signalling the close reason exactly once.
async fn pump_events(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    listener: Arc<dyn ChannelListener>,
    closed_tx: mpsc::Sender<CloseReason>,
    cancel: CancellationToken,
) {
    let (mut sink, mut source) = stream.split();

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return;
            }
            message = source.next() => message,
        };

        match message {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<EventFrame>(text.as_str())
            {
                Ok(frame) => listener.on_event(&frame.target, frame.payload),
                Err(err) => debug!(error = %err, "ignoring unparseable event frame"),
            },
            Some(Ok(Message::Ping(data))) => {
                if sink.send(Message::Pong(data)).await.is_err() {
                    let _ = closed_tx
                        .send(CloseReason::Transport("pong send failed".into()))
                        .await;
                    return;
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                let _ = closed_tx.send(CloseReason::Remote).await;
                return;
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                let _ = closed_tx
                    .send(CloseReason::Transport(err.to_string()))
                    .await;
                return;
            }
        }
    }
}
