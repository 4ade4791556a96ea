//! Backend reader: moves messages from reply channels onto live sockets

use crate::config::WebSocketInterfaceConfig;
use crate::factory::ConnectionFactory;
use crate::messages::WebSocketSend;
use crate::types::WebSocketError;
use std::sync::Arc;
use switchyard_channels::{ChannelBackend, Message};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What happened to one message read from a reply channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued for the socket
    Delivered,
    /// The connection closed before the message arrived
    ConnectionGone,
    /// Dropped: undecodable, or the client stopped reading
    Dropped,
}

/// Reads every live connection's reply channel and hands what arrives to
/// the [`ConnectionFactory`].
///
/// The set of reply channels is re-read every cycle. On a process-local
/// backend a registration also cuts the pending receive short, so a new
/// connection is read from at once; other backends pick it up when their
/// receive returns, within the backend's receive timeout.
pub struct BackendReader {
    backend: Arc<dyn ChannelBackend>,
    factory: Arc<ConnectionFactory>,
    config: WebSocketInterfaceConfig,
}

impl BackendReader {
    pub fn new(
        backend: Arc<dyn ChannelBackend>,
        factory: Arc<ConnectionFactory>,
        config: WebSocketInterfaceConfig,
    ) -> Self {
        Self {
            backend,
            factory,
            config,
        }
    }

    /// Run until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(backend = %self.backend.alias(), "WebSocket backend reader started");
        // A dropped memory receive loses nothing; a dropped BLPOP may
        let interruptible = self.backend.local_only();

        while !shutdown.is_cancelled() {
            let registered = self.factory.registered();
            tokio::pin!(registered);
            registered.as_mut().enable();

            let channels = self.factory.send_channels();
            if channels.is_empty() {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = &mut registered => {}
                    _ = tokio::time::sleep(*self.config.get_idle_interval()) => {}
                }
                continue;
            }

            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = &mut registered, if interruptible => {
                    debug!("Connection registered, re-reading reply channels");
                    continue;
                }
                received = self.backend.receive_many(&channels, true) => received,
            };

            match received {
                Ok(Some((channel, message))) => {
                    self.deliver(&channel, message);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Reply channel receive failed: {}", e);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(*self.config.get_error_backoff()) => {}
                    }
                }
            }
        }

        info!("WebSocket backend reader stopped");
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// Decode one outbound message and queue its frames for the socket
    /// owning `channel`. Never waits on the socket.
    pub fn deliver(&self, channel: &str, message: Message) -> Delivery {
        let frames = match WebSocketSend::from_message(&message).and_then(WebSocketSend::into_frames) {
            Ok(frames) => frames,
            Err(e) => {
                warn!(channel = %channel, "Dropping malformed outbound message: {}", e);
                return Delivery::Dropped;
            }
        };

        for frame in frames {
            match self.factory.dispatch(channel, frame) {
                Ok(()) => {}
                Err(WebSocketError::ConnectionGone(_)) => {
                    debug!(channel = %channel, "Connection already gone, dropping message");
                    return Delivery::ConnectionGone;
                }
                Err(e) => {
                    warn!(channel = %channel, "Dropping outbound message: {}", e);
                    return Delivery::Dropped;
                }
            }
        }
        Delivery::Delivered
    }
}
