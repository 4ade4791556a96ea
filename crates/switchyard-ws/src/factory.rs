//! Reply-channel to live-connection map

use crate::types::{WebSocketError, WebSocketMessage, WebSocketResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::{debug, info};

/// Maps each open socket's reply channel name to its outbound queue.
///
/// Every queue is bounded and `dispatch` never waits on one: a frame for a
/// client whose queue is full is refused with
/// [`WebSocketError::SendQueueFull`], so one stalled client cannot hold up
/// delivery to the others.
pub struct ConnectionFactory {
    connections: RwLock<HashMap<String, mpsc::Sender<WebSocketMessage>>>,
    registered: Notify,
    queue_depth: usize,
}

impl ConnectionFactory {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            registered: Notify::new(),
            queue_depth: queue_depth.max(1),
        }
    }

    /// Register a connection under its reply channel and hand back the
    /// receiving end of its outbound queue
    pub fn register(&self, send_channel: &str) -> mpsc::Receiver<WebSocketMessage> {
        let (sender, receiver) = mpsc::channel(self.queue_depth);
        self.connections.write().insert(send_channel.to_string(), sender);
        self.registered.notify_waiters();

        info!(send_channel = %send_channel, "WebSocket connection registered");
        receiver
    }

    /// Remove a connection; later dispatches to its name miss
    pub fn unregister(&self, send_channel: &str) -> bool {
        let removed = self.connections.write().remove(send_channel).is_some();
        if removed {
            info!(send_channel = %send_channel, "WebSocket connection unregistered");
        }
        removed
    }

    /// Reply channels with a live connection, at this instant
    pub fn send_channels(&self) -> Vec<String> {
        self.connections.read().keys().cloned().collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_connected(&self, send_channel: &str) -> bool {
        self.connections.read().contains_key(send_channel)
    }

    /// Queue a frame for the connection owning `send_channel`.
    ///
    /// Fails with [`WebSocketError::ConnectionGone`] if no live connection
    /// owns that name, and with [`WebSocketError::SendQueueFull`] at once if
    /// its queue has no room.
    pub fn dispatch(&self, send_channel: &str, frame: WebSocketMessage) -> WebSocketResult<()> {
        let connections = self.connections.read();
        let sender = connections
            .get(send_channel)
            .ok_or_else(|| WebSocketError::ConnectionGone(send_channel.to_string()))?;

        match sender.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(_)) => {
                debug!(send_channel = %send_channel, "Outbound queue closed");
                Err(WebSocketError::ConnectionGone(send_channel.to_string()))
            }
            Err(TrySendError::Full(_)) => {
                Err(WebSocketError::SendQueueFull(send_channel.to_string()))
            }
        }
    }

    /// Future completing at the next registration.
    ///
    /// Call `enable` on it before reading [`send_channels`](Self::send_channels)
    /// so a registration in between is not missed.
    pub fn registered(&self) -> Notified<'_> {
        self.registered.notified()
    }

    /// Return once a connection is registered, or after `timeout`
    pub async fn wait_for_connections(&self, timeout: Duration) {
        let registered = self.registered();
        tokio::pin!(registered);
        registered.as_mut().enable();
        if self.connection_count() > 0 {
            return;
        }
        let _ = tokio::time::timeout(timeout, registered).await;
    }
}

impl Default for ConnectionFactory {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> ConnectionFactory {
        ConnectionFactory::new(2)
    }

    #[tokio::test]
    async fn test_dispatch_reaches_registered_connection() {
        let factory = factory();
        let mut outbound = factory.register("websocket.send!a");

        factory
            .dispatch("websocket.send!a", WebSocketMessage::text("hi"))
            .unwrap();
        assert_eq!(outbound.recv().await, Some(WebSocketMessage::text("hi")));
        assert_eq!(factory.send_channels(), vec!["websocket.send!a".to_string()]);
    }

    #[tokio::test]
    async fn test_dispatch_after_close_misses() {
        let factory = factory();
        let mut closed = factory.register("websocket.send!a");
        let mut live = factory.register("websocket.send!b");

        assert!(factory.unregister("websocket.send!a"));
        assert!(!factory.unregister("websocket.send!a"));

        let err = factory
            .dispatch("websocket.send!a", WebSocketMessage::text("late"))
            .unwrap_err();
        assert!(matches!(err, WebSocketError::ConnectionGone(ref name) if name == "websocket.send!a"));

        // Nothing leaked to the other connection or the closed one
        assert!(live.try_recv().is_err());
        assert!(closed.try_recv().is_err());
        assert!(factory.is_connected("websocket.send!b"));
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_gone() {
        let factory = factory();
        drop(factory.register("websocket.send!a"));

        let err = factory
            .dispatch("websocket.send!a", WebSocketMessage::text("x"))
            .unwrap_err();
        assert!(matches!(err, WebSocketError::ConnectionGone(_)));
    }

    #[tokio::test]
    async fn test_full_queue_refuses_without_blocking_others() {
        let factory = factory();
        let _stalled = factory.register("websocket.send!a");
        let mut live = factory.register("websocket.send!b");

        for _ in 0..2 {
            factory
                .dispatch("websocket.send!a", WebSocketMessage::text("x"))
                .unwrap();
        }
        let err = factory
            .dispatch("websocket.send!a", WebSocketMessage::text("x"))
            .unwrap_err();
        assert!(matches!(err, WebSocketError::SendQueueFull(_)));

        factory
            .dispatch("websocket.send!b", WebSocketMessage::text("y"))
            .unwrap();
        assert_eq!(live.try_recv().ok(), Some(WebSocketMessage::text("y")));
    }

    #[tokio::test]
    async fn test_wait_wakes_on_register() {
        let factory = std::sync::Arc::new(factory());
        let waiter = {
            let factory = factory.clone();
            tokio::spawn(async move {
                let started = tokio::time::Instant::now();
                factory.wait_for_connections(Duration::from_secs(5)).await;
                started.elapsed()
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        let _outbound = factory.register("websocket.send!a");
        assert!(waiter.await.unwrap() < Duration::from_secs(5));
    }
}
