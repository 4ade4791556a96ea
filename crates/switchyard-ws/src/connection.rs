//! Per-socket protocol handler

use crate::factory::ConnectionFactory;
use crate::messages::{
    WebSocketConnect, WebSocketDisconnect, WebSocketReceive, WEBSOCKET_CONNECT_CHANNEL,
    WEBSOCKET_DISCONNECT_CHANNEL, WEBSOCKET_RECEIVE_CHANNEL, WEBSOCKET_SEND_PREFIX,
};
use crate::types::{WebSocketError, WebSocketMessage, WebSocketResult};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use switchyard_channels::{Channel, ChannelBackend, ChannelResult, Message};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{tungstenite, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What the upgrade request told us about the client
#[derive(Debug, Clone, Default)]
pub struct ConnectionInfo {
    pub path: String,
    pub query_string: String,
    pub client: Option<SocketAddr>,
}

/// Bridges one socket to the channel layer.
///
/// The connection owns a fresh reply channel for its whole life. Inbound
/// frames go out on `websocket.receive` tagged with that name; frames the
/// backend reader queues for that name are written back to the socket.
pub struct WebSocketConnection {
    send_channel: String,
    backend: Arc<dyn ChannelBackend>,
    factory: Arc<ConnectionFactory>,
}

impl WebSocketConnection {
    pub fn new(backend: Arc<dyn ChannelBackend>, factory: Arc<ConnectionFactory>) -> Self {
        Self {
            send_channel: Channel::new_name(WEBSOCKET_SEND_PREFIX),
            backend,
            factory,
        }
    }

    /// Reply channel owned by this connection
    pub fn send_channel(&self) -> &str {
        &self.send_channel
    }

    /// Drive the socket until either side closes it or `shutdown` fires.
    ///
    /// `websocket.disconnect` is sent on every exit path once
    /// `websocket.connect` went out.
    pub async fn run<S>(
        self,
        mut ws_stream: WebSocketStream<S>,
        info: ConnectionInfo,
        shutdown: CancellationToken,
    ) -> WebSocketResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut outbound = self.factory.register(&self.send_channel);

        let connect = WebSocketConnect {
            send_channel: self.send_channel.clone(),
            path: info.path.clone(),
            query_string: info.query_string.clone(),
            client: info.client.map(|addr| addr.to_string()),
        };
        if let Err(e) = self.emit(WEBSOCKET_CONNECT_CHANNEL, connect.into_message()).await {
            self.factory.unregister(&self.send_channel);
            let _ = ws_stream.close(None).await;
            return Err(e.into());
        }
        info!(send_channel = %self.send_channel, path = %info.path, "WebSocket connected");

        let mut closing = false;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = ws_stream
                        .send(WebSocketMessage::close_with_reason(1001, "Server shutting down".to_string()).into())
                        .await;
                    break;
                }

                inbound = ws_stream.next() => {
                    match inbound {
                        Some(Ok(frame)) => {
                            let frame = WebSocketMessage::from(frame);
                            if frame.is_close() {
                                debug!(send_channel = %self.send_channel, "Client sent close");
                                break;
                            }
                            self.forward(frame).await;
                        }
                        Some(Err(e)) => {
                            match WebSocketError::from(e) {
                                WebSocketError::ConnectionClosed => {
                                    debug!(send_channel = %self.send_channel, "Socket closed");
                                }
                                e => warn!(send_channel = %self.send_channel, "Socket error: {}", e),
                            }
                            break;
                        }
                        None => break,
                    }
                }

                frame = outbound.recv(), if !closing => {
                    let Some(frame) = frame else { break };
                    closing = frame.is_close();
                    let frame: tungstenite::Message = frame.into();
                    if let Err(e) = ws_stream.send(frame).await {
                        debug!(send_channel = %self.send_channel, "Write failed: {}", e);
                        break;
                    }
                }
            }
        }

        self.factory.unregister(&self.send_channel);
        let disconnect = WebSocketDisconnect {
            send_channel: self.send_channel.clone(),
        };
        if let Err(e) = self
            .emit(WEBSOCKET_DISCONNECT_CHANNEL, disconnect.into_message())
            .await
        {
            warn!(send_channel = %self.send_channel, "Failed to send disconnect: {}", e);
        }
        info!(send_channel = %self.send_channel, "WebSocket disconnected");
        Ok(())
    }

    /// Send a text or binary frame on `websocket.receive`; control frames are
    /// handled by tungstenite and skipped
    async fn forward(&self, frame: WebSocketMessage) {
        let Some(receive) = WebSocketReceive::from_frame(&self.send_channel, frame) else {
            return;
        };
        if let Err(e) = self
            .emit(WEBSOCKET_RECEIVE_CHANNEL, receive.into_message())
            .await
        {
            warn!(send_channel = %self.send_channel, "Dropping inbound frame: {}", e);
        }
    }

    async fn emit(&self, channel: &str, message: ChannelResult<Message>) -> ChannelResult<()> {
        Channel::new(channel, self.backend.clone()).send(message?).await
    }
}
