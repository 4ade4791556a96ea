//! WebSocket interface server over tokio-tungstenite

use crate::config::WebSocketInterfaceConfig;
use crate::connection::{ConnectionInfo, WebSocketConnection};
use crate::factory::ConnectionFactory;
use crate::reader::BackendReader;
use crate::types::{WebSocketError, WebSocketResult};
use std::net::SocketAddr;
use std::sync::Arc;
use switchyard_channels::ChannelBackend;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Accepts WebSocket clients and bridges them to a channel backend.
///
/// Runs one [`BackendReader`] for all connections and one task per socket.
pub struct WebSocketInterface {
    backend: Arc<dyn ChannelBackend>,
    factory: Arc<ConnectionFactory>,
    config: WebSocketInterfaceConfig,
}

impl WebSocketInterface {
    pub fn new(backend: Arc<dyn ChannelBackend>, config: WebSocketInterfaceConfig) -> Self {
        let factory = Arc::new(ConnectionFactory::new(*config.get_outbound_queue()));
        Self {
            backend,
            factory,
            config,
        }
    }

    pub fn factory(&self) -> &Arc<ConnectionFactory> {
        &self.factory
    }

    pub fn config(&self) -> &WebSocketInterfaceConfig {
        &self.config
    }

    /// Accept clients on `listener` until `shutdown` is cancelled, then close
    /// every open socket and wait for their handlers
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> WebSocketResult<()> {
        let addr = listener.local_addr()?;
        info!("WebSocket interface listening on {}", addr);

        let reader = BackendReader::new(
            self.backend.clone(),
            self.factory.clone(),
            self.config.clone(),
        )
        .spawn(shutdown.child_token());

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        warn!("WebSocket handler task failed: {}", e);
                    }
                }

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            connections.spawn(handle_socket(
                                stream,
                                peer,
                                self.backend.clone(),
                                self.factory.clone(),
                                self.socket_config(),
                                shutdown.child_token(),
                            ));
                        }
                        Err(e) => warn!("Failed to accept connection: {}", e),
                    }
                }
            }
        }

        while let Some(finished) = connections.join_next().await {
            if let Err(e) = finished {
                warn!("WebSocket handler task failed: {}", e);
            }
        }
        if let Err(e) = reader.await {
            warn!("WebSocket backend reader failed: {}", e);
        }

        info!("WebSocket interface stopped");
        Ok(())
    }

    fn socket_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(*self.config.get_max_message_size());
        config.max_frame_size = Some(*self.config.get_max_frame_size());
        config
    }
}

async fn handle_socket(
    stream: TcpStream,
    peer: SocketAddr,
    backend: Arc<dyn ChannelBackend>,
    factory: Arc<ConnectionFactory>,
    socket_config: WebSocketConfig,
    shutdown: CancellationToken,
) {
    let mut info = ConnectionInfo {
        client: Some(peer),
        ..ConnectionInfo::default()
    };

    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        info.path = request.uri().path().to_string();
        info.query_string = request.uri().query().unwrap_or_default().to_string();
        Ok(response)
    };

    let ws_stream = match accept_hdr_async_with_config(stream, callback, Some(socket_config)).await {
        Ok(ws_stream) => ws_stream,
        Err(e) => {
            debug!(peer = %peer, "WebSocket handshake failed: {}", WebSocketError::from(e));
            return;
        }
    };

    let connection = WebSocketConnection::new(backend, factory);
    if let Err(e) = connection.run(ws_stream, info, shutdown).await {
        warn!(peer = %peer, "WebSocket connection failed: {}", e);
    }
}
