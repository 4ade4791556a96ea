//! WebSocket message schemas carried over channels

use crate::types::WebSocketMessage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use switchyard_channels::{ChannelError, ChannelResult, Message};

/// A client connected
pub const WEBSOCKET_CONNECT_CHANNEL: &str = "websocket.connect";
/// A client sent a frame
pub const WEBSOCKET_RECEIVE_CHANNEL: &str = "websocket.receive";
/// A client went away
pub const WEBSOCKET_DISCONNECT_CHANNEL: &str = "websocket.disconnect";
/// Prefix of every connection's reply channel
pub const WEBSOCKET_SEND_PREFIX: &str = "websocket.send";

/// Sent on `websocket.connect` when a socket opens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSocketConnect {
    pub send_channel: String,
    /// Request path of the upgrade request
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub query_string: String,
    /// Peer address, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
}

/// Sent on `websocket.receive` for every text or binary frame.
///
/// Binary content travels base64 encoded with `binary` set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSocketReceive {
    pub send_channel: String,
    pub content: String,
    #[serde(default)]
    pub binary: bool,
}

impl WebSocketReceive {
    /// Wrap an inbound frame; control frames carry no content and yield `None`
    pub fn from_frame(send_channel: &str, frame: WebSocketMessage) -> Option<Self> {
        let (content, binary) = match frame {
            WebSocketMessage::Text(text) => (text, false),
            WebSocketMessage::Binary(data) => (STANDARD.encode(data), true),
            _ => return None,
        };
        Some(Self {
            send_channel: send_channel.to_string(),
            content,
            binary,
        })
    }

    /// Text content, if the frame was a text frame
    pub fn text(&self) -> Option<&str> {
        (!self.binary).then_some(self.content.as_str())
    }

    /// Raw content bytes, decoding base64 for binary frames
    pub fn bytes(&self) -> ChannelResult<Vec<u8>> {
        decode_content(&self.content, self.binary)
    }
}

/// Sent on `websocket.disconnect` once a socket is gone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSocketDisconnect {
    pub send_channel: String,
}

/// Outbound instruction read from a connection's reply channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSocketSend {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub binary: bool,
    /// Close the socket after writing any content
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub close: bool,
}

impl WebSocketSend {
    pub fn text<T: Into<String>>(content: T) -> Self {
        Self {
            content: content.into(),
            binary: false,
            close: false,
        }
    }

    pub fn binary(data: &[u8]) -> Self {
        Self {
            content: STANDARD.encode(data),
            binary: true,
            close: false,
        }
    }

    pub fn close() -> Self {
        Self {
            content: String::new(),
            binary: false,
            close: true,
        }
    }

    /// Frames to write, in order
    pub fn into_frames(self) -> ChannelResult<Vec<WebSocketMessage>> {
        let mut frames = Vec::with_capacity(2);
        if self.binary {
            frames.push(WebSocketMessage::Binary(decode_content(&self.content, true)?));
        } else if !self.content.is_empty() || !self.close {
            frames.push(WebSocketMessage::Text(self.content));
        }
        if self.close {
            frames.push(WebSocketMessage::close());
        }
        Ok(frames)
    }
}

macro_rules! payload_conversions {
    ($($ty:ty),*) => {
        $(
            impl $ty {
                pub fn into_message(&self) -> ChannelResult<Message> {
                    Message::from_payload(self)
                }

                pub fn from_message(message: &Message) -> ChannelResult<Self> {
                    message.decode()
                }
            }
        )*
    };
}

payload_conversions!(WebSocketConnect, WebSocketReceive, WebSocketDisconnect, WebSocketSend);

fn decode_content(content: &str, binary: bool) -> ChannelResult<Vec<u8>> {
    if !binary {
        return Ok(content.as_bytes().to_vec());
    }
    STANDARD
        .decode(content.as_bytes())
        .map_err(|e| ChannelError::MalformedMessage(format!("Invalid binary content: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receive_from_frames() {
        let text = WebSocketReceive::from_frame("websocket.send!abc", WebSocketMessage::text("hi"))
            .unwrap();
        assert_eq!(text.text(), Some("hi"));
        assert!(!text.binary);

        let binary =
            WebSocketReceive::from_frame("websocket.send!abc", WebSocketMessage::binary(vec![0u8, 255]))
                .unwrap();
        assert!(binary.binary);
        assert_eq!(binary.text(), None);
        assert_eq!(binary.bytes().unwrap(), vec![0u8, 255]);

        assert!(WebSocketReceive::from_frame("x", WebSocketMessage::Ping(vec![])).is_none());
    }

    #[test]
    fn test_send_defaults_to_text() {
        let message = Message::new().with("content", "hello");
        let send = WebSocketSend::from_message(&message).unwrap();
        assert_eq!(send.into_frames().unwrap(), vec![WebSocketMessage::text("hello")]);
    }

    #[test]
    fn test_send_binary_and_close() {
        let mut send = WebSocketSend::binary(b"\x00\x01");
        send.close = true;
        let frames = WebSocketSend::from_message(&send.into_message().unwrap())
            .unwrap()
            .into_frames()
            .unwrap();
        assert_eq!(
            frames,
            vec![WebSocketMessage::binary(vec![0u8, 1]), WebSocketMessage::close()]
        );
        assert_eq!(WebSocketSend::close().into_frames().unwrap(), vec![WebSocketMessage::close()]);
    }

    #[test]
    fn test_bad_binary_content_is_malformed() {
        let message = Message::new().with("content", "***").with("binary", true);
        let err = WebSocketSend::from_message(&message)
            .unwrap()
            .into_frames()
            .unwrap_err();
        assert!(matches!(err, ChannelError::MalformedMessage(_)));
    }

    #[test]
    fn test_connect_schema() {
        let connect = WebSocketConnect {
            send_channel: "websocket.send!abc".to_string(),
            path: "/chat".to_string(),
            query_string: String::new(),
            client: None,
        };
        let message = connect.into_message().unwrap();
        assert_eq!(message.get_str("send_channel"), Some("websocket.send!abc"));
        assert!(!message.contains_key("client"));
        assert_eq!(WebSocketConnect::from_message(&message).unwrap(), connect);
    }
}
