//! Response framing: native response to `http.response.*` messages and back
//!
//! A response travels as one start message (status and headers) followed by
//! chunk messages of at most `chunk_size` bytes. A buffered body ends with
//! its last chunk (`more_content = false`); a streamed body ends with an
//! extra empty chunk, since part boundaries say nothing about the end.

use crate::config::HttpInterfaceConfig;
use crate::message::{ResponseChunk, ResponseMessage, ResponseStart};
use crate::{HttpInterfaceError, HttpResult};
use axum::body::{Body, Bytes};
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::{Response as HttpResponse, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::stream::{self, BoxStream, StreamExt};
use std::convert::Infallible;
use std::fmt;
use switchyard_channels::message::latin1;
use switchyard_channels::{Channel, ChannelError, ChannelResult, Message};
use tracing::{debug, warn};

const SET_COOKIE: &str = "Set-Cookie";

/// Response body
pub enum ResponseBody {
    /// Whole body in memory
    Full(Bytes),
    /// Body produced lazily, part by part
    Streaming(BoxStream<'static, Bytes>),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            ResponseBody::Streaming(_) => f.write_str("Streaming"),
        }
    }
}

/// A response that can be sent over a reply channel
#[derive(Debug)]
pub struct ChannelResponse {
    status: StatusCode,
    headers: Vec<(String, String)>,
    cookies: Vec<String>,
    body: ResponseBody,
}

impl ChannelResponse {
    /// Create an empty response with the given status
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            cookies: Vec::new(),
            body: ResponseBody::Full(Bytes::new()),
        }
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    /// Plain-text response
    pub fn text<S: Into<String>>(status: StatusCode, text: S) -> Self {
        Self::new(status)
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(text.into())
    }

    /// Add a header, keeping the name's case as given
    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add a cookie, given as the full `Set-Cookie` value
    pub fn with_cookie<C: Into<String>>(mut self, cookie: C) -> Self {
        self.cookies.push(cookie.into());
        self
    }

    pub fn with_body<B: Into<Bytes>>(mut self, body: B) -> Self {
        self.body = ResponseBody::Full(body.into());
        self
    }

    /// Use a lazily produced body
    pub fn with_stream<S>(mut self, parts: S) -> Self
    where
        S: futures::Stream<Item = Bytes> + Send + 'static,
    {
        self.body = ResponseBody::Streaming(parts.boxed());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// First value of a header, matching the name case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn cookies(&self) -> &[String] {
        &self.cookies
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    /// Body bytes, if the body is not streamed
    pub fn body_bytes(&self) -> Option<&Bytes> {
        match &self.body {
            ResponseBody::Full(bytes) => Some(bytes),
            ResponseBody::Streaming(_) => None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.body, ResponseBody::Streaming(_))
    }

    /// Convert a native response. `Set-Cookie` headers become cookies.
    pub fn from_http(response: HttpResponse<Bytes>) -> Self {
        let (parts, body) = response.into_parts();
        let mut converted = Self::new(parts.status).with_body(body);
        for (name, value) in parts.headers.iter() {
            let value = latin1::decode(value.as_bytes());
            if name == header::SET_COOKIE {
                converted.cookies.push(value);
            } else {
                converted.headers.push((name.as_str().to_string(), value));
            }
        }
        converted
    }

    /// Start message: headers followed by one `Set-Cookie` entry per cookie
    fn start(&self) -> ResponseStart {
        let mut headers = self.headers.clone();
        headers.extend(
            self.cookies
                .iter()
                .map(|cookie| (SET_COOKIE.to_string(), cookie.clone())),
        );
        ResponseStart {
            status: self.status.as_u16(),
            headers,
        }
    }

    fn into_http(self) -> HttpResult<Response> {
        let mut builder = HttpResponse::builder().status(self.status);
        let start = self.start();
        for (name, value) in &start.headers {
            let (name, value) = header_pair(name, value)?;
            builder = builder.header(name, value);
        }

        let body = match self.body {
            ResponseBody::Full(bytes) => Body::from(bytes),
            ResponseBody::Streaming(parts) => Body::from_stream(parts.map(Ok::<_, Infallible>)),
        };
        builder
            .body(body)
            .map_err(|e| HttpInterfaceError::server(format!("Failed to build response: {}", e)))
    }
}

impl IntoResponse for ChannelResponse {
    fn into_response(self) -> Response {
        match self.into_http() {
            Ok(response) => response,
            Err(e) => {
                warn!("Falling back to plain-text response: {}", e);
                plain_text_fallback(StatusCode::INTERNAL_SERVER_ERROR, "500 Internal Server Error")
            }
        }
    }
}

/// Convert a header pair carried as latin-1 text
pub(crate) fn header_pair(name: &str, value: &str) -> HttpResult<(HeaderName, HeaderValue)> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| HttpInterfaceError::invalid_response(format!("Invalid header name {}: {}", name, e)))?;
    let bytes = latin1::encode(value).ok_or_else(|| {
        HttpInterfaceError::invalid_response(format!("Header {} is not latin-1", name))
    })?;
    let header_value = HeaderValue::from_bytes(&bytes)
        .map_err(|e| HttpInterfaceError::invalid_response(format!("Invalid header value for {}: {}", name, e)))?;
    Ok((header_name, header_value))
}

/// Minimal plain-text response that cannot fail to build
pub fn plain_text_fallback(status: StatusCode, body: &str) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body.to_string(),
    )
        .into_response()
}

/// Split `data` into slices of at most `max` bytes, each paired with whether
/// it is the last. Empty data yields one empty, final slice.
pub fn chunk_body(data: &[u8], max: usize) -> Vec<(Bytes, bool)> {
    if data.is_empty() {
        return vec![(Bytes::new(), true)];
    }
    let max = max.max(1);
    let count = data.len().div_ceil(max);
    data.chunks(max)
        .enumerate()
        .map(|(i, chunk)| (Bytes::copy_from_slice(chunk), i + 1 == count))
        .collect()
}

/// Frame a response as start and chunk messages.
///
/// Streamed parts are pulled only as the returned stream is polled, so a
/// sender that waits on a full channel also stops reading the body.
pub fn encode_response(
    response: ChannelResponse,
    chunk_size: usize,
) -> BoxStream<'static, ChannelResult<Message>> {
    let start = ResponseMessage::Start(response.start());
    let head = stream::once(async move { start });

    let body: BoxStream<'static, ResponseMessage> = match response.body {
        ResponseBody::Full(bytes) => stream::iter(
            chunk_body(&bytes, chunk_size)
                .into_iter()
                .map(|(chunk, last)| ResponseMessage::Chunk(ResponseChunk::new(chunk.to_vec(), !last))),
        )
        .boxed(),
        ResponseBody::Streaming(parts) => parts
            .filter(|part| futures::future::ready(!part.is_empty()))
            .flat_map(move |part| {
                stream::iter(
                    chunk_body(&part, chunk_size)
                        .into_iter()
                        .map(|(chunk, _)| ResponseMessage::Chunk(ResponseChunk::new(chunk.to_vec(), true))),
                )
            })
            .chain(stream::once(async { ResponseMessage::Chunk(ResponseChunk::end()) }))
            .boxed(),
    };

    head.chain(body).map(ResponseMessage::into_message).boxed()
}

/// Send a framed response on `channel`.
///
/// A full channel is retried with doubling backoff up to
/// `config.send_retries` times per message before giving up. A failure after
/// the start message went out ends the body with an empty final chunk where
/// possible and reports [`HttpInterfaceError::ResponseInterrupted`]; no
/// second start may follow it.
pub async fn send_response(
    channel: &Channel,
    response: ChannelResponse,
    config: &HttpInterfaceConfig,
) -> HttpResult<()> {
    let mut messages = encode_response(response, *config.get_chunk_size());
    let mut sent = 0usize;

    while let Some(message) = messages.next().await {
        let result = match message {
            Ok(message) => send_with_retry(channel, message, config).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            if sent == 0 {
                return Err(e.into());
            }
            return Err(interrupt(channel, e, config).await);
        }
        sent += 1;
    }

    debug!(channel = %channel.name(), messages = sent, "Sent response");
    Ok(())
}

async fn send_with_retry(
    channel: &Channel,
    message: Message,
    config: &HttpInterfaceConfig,
) -> ChannelResult<()> {
    let mut attempt = 0;
    loop {
        match channel.send(message.clone()).await {
            Ok(()) => return Ok(()),
            Err(ChannelError::ChannelFull(name)) if attempt < *config.get_send_retries() => {
                let pause = config.backoff_for(attempt);
                debug!(channel = %name, attempt, "Reply channel full, retrying in {:?}", pause);
                tokio::time::sleep(pause).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Close a started response with an empty final chunk
async fn interrupt(
    channel: &Channel,
    source: ChannelError,
    config: &HttpInterfaceConfig,
) -> HttpInterfaceError {
    let end = ResponseMessage::Chunk(ResponseChunk::end()).into_message();
    let closed = match end {
        Ok(end) => send_with_retry(channel, end, config).await,
        Err(e) => Err(e),
    };
    if let Err(e) = closed {
        warn!(channel = %channel.name(), "Cannot end interrupted response: {}", e);
    }
    HttpInterfaceError::ResponseInterrupted {
        reply_channel: channel.name().to_string(),
        source,
    }
}

/// Reassembles a response from its messages, in arrival order
#[derive(Debug, Default)]
pub struct ResponseCollector {
    start: Option<ResponseStart>,
    body: Vec<u8>,
    complete: bool,
}

impl ResponseCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one message. Returns true once the body is complete.
    pub fn push(&mut self, message: Message) -> HttpResult<bool> {
        if self.complete {
            return Err(HttpInterfaceError::invalid_response(
                "Message received after the response ended",
            ));
        }

        match ResponseMessage::from_message(message)? {
            ResponseMessage::Start(start) => {
                if self.start.is_some() {
                    return Err(HttpInterfaceError::invalid_response("Duplicate response start"));
                }
                self.start = Some(start);
            }
            ResponseMessage::Chunk(chunk) => {
                if self.start.is_none() {
                    return Err(HttpInterfaceError::invalid_response(
                        "Response chunk before response start",
                    ));
                }
                self.body.extend_from_slice(&chunk.content);
                self.complete = !chunk.more_content;
            }
        }
        Ok(self.complete)
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// The assembled response
    pub fn finish(self) -> HttpResult<ChannelResponse> {
        let start = match self.start {
            Some(start) if self.complete => start,
            _ => return Err(HttpInterfaceError::invalid_response("Response is incomplete")),
        };

        let status = StatusCode::from_u16(start.status).map_err(|_| {
            HttpInterfaceError::invalid_response(format!("Invalid status code {}", start.status))
        })?;
        let mut response = ChannelResponse::new(status).with_body(self.body);
        for (name, value) in start.headers {
            if name.eq_ignore_ascii_case(SET_COOKIE) {
                response.cookies.push(value);
            } else {
                response.headers.push((name, value));
            }
        }
        Ok(response)
    }
}

/// Rebuild a response from its start and chunk messages
pub fn decode_response<I>(messages: I) -> HttpResult<ChannelResponse>
where
    I: IntoIterator<Item = Message>,
{
    let mut collector = ResponseCollector::new();
    for message in messages {
        if collector.push(message)? {
            break;
        }
    }
    collector.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(response: ChannelResponse, chunk_size: usize) -> Vec<ResponseMessage> {
        encode_response(response, chunk_size)
            .map(|message| ResponseMessage::from_message(message.unwrap()).unwrap())
            .collect()
            .await
    }

    fn chunk(content: &[u8], more: bool) -> ResponseMessage {
        ResponseMessage::Chunk(ResponseChunk::new(content.to_vec(), more))
    }

    #[test]
    fn test_chunk_body_sizes() {
        for (len, size) in [(0usize, 4usize), (1, 4), (4, 4), (5, 4), (9, 3), (1000, 7)] {
            let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let chunks = chunk_body(&data, size);

            let expected = if len == 0 { 1 } else { len.div_ceil(size) };
            assert_eq!(chunks.len(), expected, "len {} size {}", len, size);

            let joined: Vec<u8> = chunks.iter().flat_map(|(c, _)| c.to_vec()).collect();
            assert_eq!(joined, data);

            let finals: Vec<bool> = chunks.iter().map(|(_, last)| *last).collect();
            assert_eq!(finals.iter().filter(|last| **last).count(), 1);
            assert_eq!(finals.last(), Some(&true));
        }
    }

    #[tokio::test]
    async fn test_encode_empty_body() {
        let messages = collect(ChannelResponse::new(StatusCode::NO_CONTENT), 4).await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1], chunk(b"", false));
    }

    #[tokio::test]
    async fn test_encode_keeps_header_case_and_cookies() {
        let response = ChannelResponse::ok()
            .with_header("Content-Type", "text/html")
            .with_header("X-Request-ID", "42")
            .with_cookie("sessionid=abc; Path=/")
            .with_body("hello world");
        let messages = collect(response, 4).await;

        match &messages[0] {
            ResponseMessage::Start(start) => {
                assert_eq!(start.status, 200);
                assert_eq!(
                    start.headers,
                    vec![
                        ("Content-Type".to_string(), "text/html".to_string()),
                        ("X-Request-ID".to_string(), "42".to_string()),
                        ("Set-Cookie".to_string(), "sessionid=abc; Path=/".to_string()),
                    ]
                );
            }
            other => panic!("Expected start, got {:?}", other),
        }
        assert_eq!(
            &messages[1..],
            &[chunk(b"hell", true), chunk(b"o wo", true), chunk(b"rld", false)]
        );
    }

    #[tokio::test]
    async fn test_streaming_body_ends_with_empty_chunk() {
        let parts = stream::iter(vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
        let response = ChannelResponse::ok().with_stream(parts);
        assert!(response.is_streaming());

        let messages = collect(response, 4).await;
        assert_eq!(
            &messages[1..],
            &[chunk(b"a", true), chunk(b"b", true), chunk(b"", false)]
        );

        let raw = messages
            .into_iter()
            .map(|m| m.into_message().unwrap())
            .collect::<Vec<_>>();
        let decoded = decode_response(raw).unwrap();
        assert_eq!(decoded.body_bytes().unwrap().as_ref(), b"ab");
    }

    #[tokio::test]
    async fn test_streaming_part_larger_than_chunk() {
        let parts = stream::iter(vec![Bytes::from_static(b"abcdef"), Bytes::new()]);
        let messages = collect(ChannelResponse::ok().with_stream(parts), 4).await;
        assert_eq!(
            &messages[1..],
            &[chunk(b"abcd", true), chunk(b"ef", true), chunk(b"", false)]
        );
    }

    #[tokio::test]
    async fn test_response_round_trip() {
        let response = ChannelResponse::new(StatusCode::CREATED)
            .with_header("Content-Type", "application/json")
            .with_header("ETag", "\"v1\"")
            .with_cookie("a=1")
            .with_cookie("b=2; HttpOnly")
            .with_body(r#"{"id":7}"#);

        let messages: Vec<Message> = encode_response(response, 3)
            .map(|m| m.unwrap())
            .collect()
            .await;
        let decoded = decode_response(messages).unwrap();

        assert_eq!(decoded.status(), StatusCode::CREATED);
        assert_eq!(decoded.header("content-type"), Some("application/json"));
        assert_eq!(decoded.header("etag"), Some("\"v1\""));
        assert_eq!(decoded.cookies(), &["a=1".to_string(), "b=2; HttpOnly".to_string()]);
        assert_eq!(decoded.body_bytes().unwrap().as_ref(), br#"{"id":7}"#);
    }

    #[test]
    fn test_collector_rejects_out_of_order() {
        let mut collector = ResponseCollector::new();
        let err = collector
            .push(chunk(b"x", false).into_message().unwrap())
            .unwrap_err();
        assert!(matches!(err, HttpInterfaceError::InvalidResponse { .. }));

        let mut collector = ResponseCollector::new();
        let start = ResponseMessage::Start(ResponseStart { status: 200, headers: vec![] });
        assert!(!collector.push(start.clone().into_message().unwrap()).unwrap());
        assert!(collector.push(start.into_message().unwrap()).is_err());
        assert!(ResponseCollector::new().finish().is_err());
    }

    #[test]
    fn test_from_http_splits_cookies() {
        let native = HttpResponse::builder()
            .status(StatusCode::FOUND)
            .header("location", "/next")
            .header("set-cookie", "a=1")
            .body(Bytes::new())
            .unwrap();
        let response = ChannelResponse::from_http(native);
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.header("Location"), Some("/next"));
        assert_eq!(response.cookies(), &["a=1".to_string()]);
    }

    #[test]
    fn test_into_response_falls_back_on_bad_header() {
        let response = ChannelResponse::ok()
            .with_header("Bad Header", "x")
            .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = ChannelResponse::text(StatusCode::ACCEPTED, "queued").into_response();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.headers()["content-type"], "text/plain; charset=utf-8");
    }

    #[tokio::test]
    async fn test_send_response_retries_full_channel() {
        use std::sync::Arc;
        use crate::config::HttpInterfaceConfigBuilder;
        use switchyard_channels::{ChannelBackend, MemoryBackend, MemoryConfigBuilder};

        let backend = Arc::new(MemoryBackend::new(
            MemoryConfigBuilder::new()
                .capacity(2)
                .build()
                .expect("Failed to build config"),
        ));
        let dyn_backend: Arc<dyn ChannelBackend> = backend.clone();
        let reply = Channel::new("http.response!full", dyn_backend.clone());
        let config = HttpInterfaceConfigBuilder::new()
            .chunk_size(1)
            .retry_backoff(std::time::Duration::from_millis(5))
            .send_retries(50)
            .build()
            .expect("Failed to build config");

        let sender = tokio::spawn(async move {
            send_response(&reply, ChannelResponse::ok().with_body("abcd"), &config).await
        });

        let mut collector = ResponseCollector::new();
        let names = vec!["http.response!full".to_string()];
        while !collector.is_complete() {
            if let Some((_, message)) = dyn_backend.receive_many(&names, true).await.unwrap() {
                collector.push(message).unwrap();
            }
        }
        sender.await.unwrap().unwrap();
        assert_eq!(collector.finish().unwrap().body_bytes().unwrap().as_ref(), b"abcd");
    }

    #[tokio::test]
    async fn test_send_response_gives_up() {
        use std::sync::Arc;
        use crate::config::HttpInterfaceConfigBuilder;
        use switchyard_channels::{MemoryBackend, MemoryConfigBuilder};

        let backend = Arc::new(MemoryBackend::new(
            MemoryConfigBuilder::new()
                .capacity(1)
                .build()
                .expect("Failed to build config"),
        ));
        let reply = Channel::new("http.response!stuck", backend);
        reply.send(Message::new()).await.unwrap();
        let config = HttpInterfaceConfigBuilder::new()
            .send_retries(2)
            .retry_backoff(std::time::Duration::from_millis(1))
            .build()
            .expect("Failed to build config");

        let err = send_response(&reply, ChannelResponse::ok(), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, HttpInterfaceError::Channel(ChannelError::ChannelFull(_))));
    }

    #[tokio::test]
    async fn test_send_response_reports_interruption_after_start() {
        use crate::config::HttpInterfaceConfigBuilder;
        use std::sync::Arc;
        use switchyard_channels::{MemoryBackend, MemoryConfigBuilder};

        let backend = Arc::new(MemoryBackend::new(
            MemoryConfigBuilder::new()
                .capacity(1)
                .build()
                .expect("Failed to build config"),
        ));
        let reply = Channel::new("http.response!cut", backend.clone());
        let config = HttpInterfaceConfigBuilder::testing()
            .send_retries(0)
            .build()
            .expect("Failed to build config");

        let err = send_response(&reply, ChannelResponse::ok().with_body("abcdefgh"), &config)
            .await
            .unwrap_err();
        match err {
            HttpInterfaceError::ResponseInterrupted { reply_channel, source } => {
                assert_eq!(reply_channel, "http.response!cut");
                assert!(matches!(source, ChannelError::ChannelFull(_)));
            }
            other => panic!("Expected interruption, got {:?}", other),
        }
        // Only the start fit
        assert_eq!(backend.queued("http.response!cut"), 1);
    }
}
