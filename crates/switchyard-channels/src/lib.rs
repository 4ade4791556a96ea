//! # switchyard-channels
//!
//! Named-channel message layer for the switchyard framework.
//!
//! ## Features
//!
//! - **Multi-backend support**: Memory and Redis channel backends
//! - **Named channels**: FIFO per channel name, fan-out through groups
//! - **Explicit consumers**: handlers are bound to exact channel names at startup
//! - **Fault isolation**: a failing consumer never stops the worker loop
//! - **Async-first**: everything runs on tokio tasks
//!
//! ## Quick Start
//!
//! ```rust
//! use switchyard_channels::{
//!     Channel, ChannelBackend, ConsumerContext, ConsumerError, MemoryBackend, Message,
//! };
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let backend: Arc<dyn ChannelBackend> = Arc::new(MemoryBackend::default());
//!
//! backend
//!     .registry()
//!     .add_consumer(
//!         |message: Message, ctx: ConsumerContext| async move {
//!             let reply = message.get_str("reply_channel").unwrap_or_default().to_string();
//!             ctx.channel(reply).send(Message::new().with("pong", true)).await?;
//!             Ok::<(), ConsumerError>(())
//!         },
//!         ["ping"],
//!     )
//!     .unwrap();
//!
//! let reply = Channel::new_name("ping.reply");
//! Channel::new("ping", backend.clone())
//!     .send(Message::new().with("reply_channel", reply.clone()))
//!     .await
//!     .unwrap();
//!
//! // A worker would normally do this in a loop
//! let (channel, message) = backend
//!     .receive_many(&["ping".to_string()], false)
//!     .await
//!     .unwrap()
//!     .unwrap();
//! let consumer = backend.registry().consumer_for_channel(&channel).unwrap();
//! consumer
//!     .consume(message, ConsumerContext::new(channel, backend.clone()))
//!     .await
//!     .unwrap();
//!
//! let (_, pong) = backend.receive_many(&[reply], false).await.unwrap().unwrap();
//! assert_eq!(pong.get("pong"), Some(&serde_json::Value::Bool(true)));
//! # });
//! ```

use thiserror::Error;

pub mod backends;
pub mod channel;
pub mod config;
pub mod layers;
pub mod message;
pub mod registry;
pub mod session;
pub mod worker;

pub use backends::*;
pub use channel::*;
pub use config::*;
pub use layers::*;
pub use message::Message;
pub use registry::*;
pub use session::*;
pub use worker::*;

/// Channel layer errors
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Consumer already registered for channel: {0}")]
    DuplicateConsumer(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Channel full: {0}")]
    ChannelFull(String),

    #[error("Unknown channel backend alias: {0}")]
    UnknownBackend(String),

    #[error("Channel configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ChannelError {
    /// Whether the caller may retry the operation later
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_) | Self::ChannelFull(_))
    }
}

/// Result type for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Error raised inside a consumer
pub type ConsumerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for consumer execution
pub type ConsumerResult = Result<(), ConsumerError>;
