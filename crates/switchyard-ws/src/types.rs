//! WebSocket frame and error types over tokio-tungstenite

use std::borrow::Cow;
use switchyard_channels::ChannelError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// A WebSocket frame as seen by switchyard
#[derive(Debug, Clone, PartialEq)]
pub enum WebSocketMessage {
    /// Text message
    Text(String),
    /// Binary message
    Binary(Vec<u8>),
    /// Ping frame
    Ping(Vec<u8>),
    /// Pong frame
    Pong(Vec<u8>),
    /// Close frame
    Close(Option<CloseFrame>),
}

/// Close frame information
#[derive(Debug, Clone, PartialEq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

impl WebSocketMessage {
    pub fn text<T: Into<String>>(content: T) -> Self {
        Self::Text(content.into())
    }

    pub fn binary<T: Into<Vec<u8>>>(data: T) -> Self {
        Self::Binary(data.into())
    }

    pub fn close() -> Self {
        Self::Close(None)
    }

    pub fn close_with_reason(code: u16, reason: String) -> Self {
        Self::Close(Some(CloseFrame { code, reason }))
    }

    pub fn is_close(&self) -> bool {
        matches!(self, Self::Close(_))
    }

    pub fn is_control(&self) -> bool {
        matches!(self, Self::Ping(_) | Self::Pong(_) | Self::Close(_))
    }
}

impl From<tungstenite::Message> for WebSocketMessage {
    fn from(msg: tungstenite::Message) -> Self {
        match msg {
            tungstenite::Message::Text(text) => Self::Text(text),
            tungstenite::Message::Binary(data) => Self::Binary(data),
            tungstenite::Message::Ping(data) => Self::Ping(data),
            tungstenite::Message::Pong(data) => Self::Pong(data),
            tungstenite::Message::Close(frame) => Self::Close(frame.map(|f| CloseFrame {
                code: f.code.into(),
                reason: f.reason.into_owned(),
            })),
            // Raw frames only appear when reading with the low-level API
            tungstenite::Message::Frame(frame) => Self::Binary(frame.into_data()),
        }
    }
}

impl From<WebSocketMessage> for tungstenite::Message {
    fn from(msg: WebSocketMessage) -> Self {
        match msg {
            WebSocketMessage::Text(text) => tungstenite::Message::Text(text),
            WebSocketMessage::Binary(data) => tungstenite::Message::Binary(data),
            WebSocketMessage::Ping(data) => tungstenite::Message::Ping(data),
            WebSocketMessage::Pong(data) => tungstenite::Message::Pong(data),
            WebSocketMessage::Close(frame) => {
                tungstenite::Message::Close(frame.map(|f| tungstenite::protocol::CloseFrame {
                    code: CloseCode::from(f.code),
                    reason: Cow::Owned(f.reason),
                }))
            }
        }
    }
}

/// WebSocket interface errors
#[derive(Debug, Error)]
pub enum WebSocketError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Channel layer error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Connection closed")]
    ConnectionClosed,

    /// The reply channel has no live connection; the client already left
    #[error("No live connection for {0}")]
    ConnectionGone(String),

    #[error("Send queue full for {0}")]
    SendQueueFull(String),
}

impl From<tungstenite::Error> for WebSocketError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                Self::ConnectionClosed
            }
            tungstenite::Error::Protocol(msg) => Self::Protocol(msg.to_string()),
            tungstenite::Error::Io(io_err) => Self::Io(io_err),
            other => Self::Connection(other.to_string()),
        }
    }
}

/// Result type for WebSocket operations
pub type WebSocketResult<T> = Result<T, WebSocketError>;
