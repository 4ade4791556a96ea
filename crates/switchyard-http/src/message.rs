//! Message schemas for HTTP over channels

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use switchyard_channels::message::base64_bytes;
use switchyard_channels::{ChannelResult, Message};

/// Channel every encoded request is sent on
pub const HTTP_REQUEST_CHANNEL: &str = "http.request";

/// Prefix of the per-request reply channel names
pub const HTTP_RESPONSE_PREFIX: &str = "http.response";

/// Largest body slice carried by one chunk message (512 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 512 * 1024;

/// Query or form parameters: each name maps to every value it was given
pub type ParamMap = BTreeMap<String, Vec<String>>;

/// An HTTP request as carried on `http.request`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequestMessage {
    #[serde(default)]
    pub get: ParamMap,

    #[serde(default)]
    pub post: ParamMap,

    #[serde(default)]
    pub cookies: BTreeMap<String, String>,

    /// CGI-style environment: request line details and `HTTP_*` headers
    #[serde(default)]
    pub meta: BTreeMap<String, String>,

    pub path: String,

    pub path_info: String,

    pub method: String,

    pub reply_channel: String,

    /// Raw request body
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Vec::is_empty")]
    pub body: Vec<u8>,
}

/// First message of a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseStart {
    pub status: u16,

    /// Header pairs in their original case, values as latin-1 text.
    /// Cookies appear as `Set-Cookie` entries.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

/// One slice of a response body
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResponseChunk {
    #[serde(default, with = "base64_bytes")]
    pub content: Vec<u8>,

    /// False (or absent) on the chunk that ends the body
    #[serde(default)]
    pub more_content: bool,
}

impl ResponseChunk {
    pub fn new<C: Into<Vec<u8>>>(content: C, more_content: bool) -> Self {
        Self {
            content: content.into(),
            more_content,
        }
    }

    /// The empty chunk closing a streamed body
    pub fn end() -> Self {
        Self::default()
    }
}

/// Any message sent on a response reply channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResponseMessage {
    #[serde(rename = "http.response.start")]
    Start(ResponseStart),

    #[serde(rename = "http.response.chunk")]
    Chunk(ResponseChunk),
}

impl ResponseMessage {
    pub fn into_message(self) -> ChannelResult<Message> {
        Message::from_payload(&self)
    }

    pub fn from_message(message: Message) -> ChannelResult<Self> {
        message.into_payload()
    }
}
