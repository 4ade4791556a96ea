//! axum adapter: serves HTTP by round-tripping every request through channels

use crate::config::HttpInterfaceConfig;
use crate::message::{ResponseMessage, HTTP_REQUEST_CHANNEL, HTTP_RESPONSE_PREFIX};
use crate::request::encode_request_with_root;
use crate::response::header_pair;
use crate::{HttpInterfaceError, HttpResult};
use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use futures::stream::{self, Stream, TryStreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use switchyard_channels::{Channel, ChannelBackend, Message};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// HTTP protocol adapter.
///
/// Each request is encoded onto `http.request` with a fresh reply channel;
/// the response start and chunks read back from that channel are streamed
/// to the client as they arrive.
#[derive(Clone)]
pub struct HttpInterface {
    backend: Arc<dyn ChannelBackend>,
    config: Arc<HttpInterfaceConfig>,
}

impl HttpInterface {
    pub fn new(backend: Arc<dyn ChannelBackend>, config: HttpInterfaceConfig) -> Self {
        Self {
            backend,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &HttpInterfaceConfig {
        &self.config
    }

    /// Router answering every path and method
    pub fn router(&self) -> Router {
        Router::new()
            .fallback(handle_request)
            .with_state(self.clone())
    }

    /// Serve on `listener` until `shutdown` is cancelled
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> HttpResult<()> {
        let addr = listener
            .local_addr()
            .map_err(|e| HttpInterfaceError::server(format!("Listener has no address: {}", e)))?;
        info!("HTTP interface listening on {}", addr);

        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| HttpInterfaceError::server(format!("Server error: {}", e)))?;

        info!("HTTP interface stopped");
        Ok(())
    }

    /// Send one request through the channel layer and build the response
    /// from the reply
    pub async fn dispatch(&self, request: Request) -> HttpResult<Response> {
        let (parts, body) = request.into_parts();
        let limit = *self.config.get_max_body_size();
        let body = axum::body::to_bytes(body, limit)
            .await
            .map_err(|_| HttpInterfaceError::RequestTooLarge { limit })?;
        let request = axum::http::Request::from_parts(parts, body);

        let reply_channel = Channel::new_name(HTTP_RESPONSE_PREFIX);
        let message = encode_request_with_root(&request, &reply_channel, self.config.get_root_path())?;
        Channel::new(HTTP_REQUEST_CHANNEL, self.backend.clone())
            .send(message)
            .await?;

        let reader = ReplyReader {
            backend: self.backend.clone(),
            names: vec![reply_channel],
            timeout: *self.config.get_response_timeout(),
        };

        let start = match ResponseMessage::from_message(reader.next_message().await?)? {
            ResponseMessage::Start(start) => start,
            ResponseMessage::Chunk(_) => {
                return Err(HttpInterfaceError::invalid_response(
                    "Response chunk before response start",
                ))
            }
        };
        let status = StatusCode::from_u16(start.status).map_err(|_| {
            HttpInterfaceError::invalid_response(format!("Invalid status code {}", start.status))
        })?;

        let mut builder = Response::builder().status(status);
        for (name, value) in &start.headers {
            match header_pair(name, value) {
                Ok((name, value)) => builder = builder.header(name, value),
                Err(e) => warn!("Skipping response header: {}", e),
            }
        }

        debug!(
            method = %request.method(),
            path = %request.uri().path(),
            status = status.as_u16(),
            "Response started"
        );
        builder
            .body(Body::from_stream(reader.into_body_stream()))
            .map_err(|e| HttpInterfaceError::server(format!("Failed to build response: {}", e)))
    }
}

async fn handle_request(State(interface): State<HttpInterface>, request: Request) -> Response {
    match interface.dispatch(request).await {
        Ok(response) => response,
        Err(e) => {
            warn!("HTTP request failed: {}", e);
            e.into_response()
        }
    }
}

/// Reads one request's reply channel
struct ReplyReader {
    backend: Arc<dyn ChannelBackend>,
    names: Vec<String>,
    timeout: Duration,
}

impl ReplyReader {
    fn reply_channel(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or_default()
    }

    async fn next_message(&self) -> HttpResult<Message> {
        let wait = async {
            loop {
                if let Some((_, message)) = self.backend.receive_many(&self.names, true).await? {
                    return Ok::<_, HttpInterfaceError>(message);
                }
            }
        };

        match tokio::time::timeout(self.timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(HttpInterfaceError::ResponseTimeout {
                reply_channel: self.reply_channel().to_string(),
            }),
        }
    }

    /// Body chunks until the chunk without `more_content`
    fn into_body_stream(self) -> impl Stream<Item = HttpResult<Bytes>> + Send + 'static {
        stream::try_unfold((self, false), |(reader, done)| async move {
            if done {
                return Ok::<_, HttpInterfaceError>(None);
            }
            match ResponseMessage::from_message(reader.next_message().await?)? {
                ResponseMessage::Chunk(chunk) => {
                    let done = !chunk.more_content;
                    Ok(Some((Bytes::from(chunk.content), (reader, done))))
                }
                ResponseMessage::Start(_) => {
                    Err(HttpInterfaceError::invalid_response("Duplicate response start"))
                }
            }
        })
        .inspect_err(|e| warn!("Response body aborted: {}", e))
    }
}
