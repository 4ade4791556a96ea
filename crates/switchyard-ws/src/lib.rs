//! # switchyard-ws
//!
//! WebSocket interface for switchyard channels.
//!
//! Every socket gets its own reply channel (`websocket.send!<suffix>`).
//! Socket events become `websocket.connect`, `websocket.receive` and
//! `websocket.disconnect` messages; whatever consumers send to a reply
//! channel is written back to the socket that owns it.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use switchyard_channels::{ChannelBackend, MemoryBackend};
//! use switchyard_ws::{WebSocketInterface, WebSocketInterfaceConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let backend: Arc<dyn ChannelBackend> = Arc::new(MemoryBackend::default());
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:9001").await?;
//! WebSocketInterface::new(backend, WebSocketInterfaceConfig::default())
//!     .serve(listener, CancellationToken::new())
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod factory;
pub mod messages;
pub mod reader;
pub mod server;
pub mod types;

pub use config::*;
pub use connection::*;
pub use factory::*;
pub use messages::*;
pub use reader::*;
pub use server::*;
pub use types::*;
