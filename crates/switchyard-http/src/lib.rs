//! # switchyard-http
//!
//! Carries HTTP request/response cycles over switchyard channels.
//!
//! An incoming request is encoded as one message on `http.request` carrying
//! a fresh reply channel. The consumer answers on that reply channel with a
//! `http.response.start` message followed by `http.response.chunk` messages,
//! which the interface streams back to the client.
//!
//! - [`encode_request`] / [`decode_request`] for the request side
//! - [`encode_response`] / [`decode_response`] and [`ResponseCollector`] for
//!   the response side
//! - [`view_consumer`] to turn a request handler into a channel consumer
//! - [`HttpInterface`] to serve it all with axum

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use switchyard_channels::ChannelError;
use thiserror::Error;

pub mod config;
pub mod consumer;
pub mod interface;
pub mod message;
pub mod request;
pub mod response;

pub use config::*;
pub use consumer::*;
pub use interface::*;
pub use message::*;
pub use request::*;
pub use response::*;

/// Result type for HTTP codec and interface operations
pub type HttpResult<T> = Result<T, HttpInterfaceError>;

/// HTTP interface errors
#[derive(Error, Debug)]
pub enum HttpInterfaceError {
    #[error("Channel layer error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Timed out waiting for a response on {reply_channel}")]
    ResponseTimeout { reply_channel: String },

    #[error("Invalid request: {message}")]
    BadRequest { message: String },

    #[error("Request body exceeds limit of {limit} bytes")]
    RequestTooLarge { limit: usize },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Response on {reply_channel} broke off after it started: {source}")]
    ResponseInterrupted {
        reply_channel: String,
        source: ChannelError,
    },

    #[error("Server error: {message}")]
    Server { message: String },
}

impl HttpInterfaceError {
    /// Create a bad request error
    pub fn bad_request<T: Into<String>>(message: T) -> Self {
        HttpInterfaceError::BadRequest {
            message: message.into(),
        }
    }

    /// Create an invalid response error
    pub fn invalid_response<T: Into<String>>(message: T) -> Self {
        HttpInterfaceError::InvalidResponse {
            message: message.into(),
        }
    }

    /// Create a server error
    pub fn server<T: Into<String>>(message: T) -> Self {
        HttpInterfaceError::Server {
            message: message.into(),
        }
    }

    /// Status code of the fallback response sent for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            HttpInterfaceError::Channel(e) if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            HttpInterfaceError::Channel(ChannelError::MalformedMessage(_)) => StatusCode::BAD_GATEWAY,
            HttpInterfaceError::Channel(_) => StatusCode::INTERNAL_SERVER_ERROR,
            HttpInterfaceError::ResponseTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            HttpInterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            HttpInterfaceError::RequestTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            HttpInterfaceError::InvalidResponse { .. } => StatusCode::BAD_GATEWAY,
            HttpInterfaceError::ResponseInterrupted { .. } => StatusCode::BAD_GATEWAY,
            HttpInterfaceError::Server { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HttpInterfaceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let reason = status.canonical_reason().unwrap_or("Error");
        plain_text_fallback(status, &format!("{} {}", status.as_u16(), reason))
    }
}
