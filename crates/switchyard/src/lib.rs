//! # switchyard
//!
//! Named-channel messaging between protocol servers and application
//! consumers.
//!
//! Protocol interfaces turn HTTP requests and WebSocket events into small
//! messages on named channels. Workers hand each message to the consumer
//! bound to its channel; consumers answer on per-client reply channels that
//! the interfaces read back.
//!
//! This crate bundles the pieces:
//!
//! - [`channels`]: messages, backends, consumer registry, workers
//! - [`http`]: HTTP request/response codec and the axum interface
//! - [`ws`]: the WebSocket interface
//! - [`logging`]: `tracing-subscriber` setup
//! - [`app`]: running workers and interfaces in one process

pub mod app;
pub mod demo;
pub mod logging;

pub use switchyard_channels as channels;
pub use switchyard_http as http;
pub use switchyard_ws as ws;

pub use app::{serve, spawn_workers, ServeOptions};
pub use logging::{init_logging, LoggingConfig};

/// Common imports for writing consumers
pub mod prelude {
    pub use switchyard_channels::{
        Channel, ChannelBackend, ChannelError, ChannelLayers, ChannelLayersConfig, Consumer,
        ConsumerCatalog, ConsumerContext, ConsumerError, ConsumerResult, Group, Message, Worker,
    };
    pub use switchyard_http::{
        view_consumer, ChannelRequest, ChannelResponse, ConsumerReply, ViewResult,
        HTTP_REQUEST_CHANNEL,
    };
    pub use switchyard_ws::{
        WebSocketConnect, WebSocketDisconnect, WebSocketReceive, WebSocketSend,
        WEBSOCKET_CONNECT_CHANNEL, WEBSOCKET_DISCONNECT_CHANNEL, WEBSOCKET_RECEIVE_CHANNEL,
    };
}
