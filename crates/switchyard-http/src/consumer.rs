//! Request handlers as channel consumers

use crate::config::HttpInterfaceConfig;
use crate::request::{decode_request, ChannelRequest};
use crate::response::{send_response, ChannelResponse};
use crate::HttpInterfaceError;
use async_trait::async_trait;
use axum::http::StatusCode;
use std::future::Future;
use std::marker::PhantomData;
use switchyard_channels::{Consumer, ConsumerContext, ConsumerError, ConsumerResult, Message};
use tracing::{debug, error, warn};

/// What a view produced
#[derive(Debug)]
pub enum ConsumerReply {
    /// Send this response now
    Immediate(ChannelResponse),
    /// Something else will answer on `reply_channel` later
    Deferred { reply_channel: String },
}

impl From<ChannelResponse> for ConsumerReply {
    fn from(response: ChannelResponse) -> Self {
        ConsumerReply::Immediate(response)
    }
}

/// Result of a view
pub type ViewResult = Result<ConsumerReply, ConsumerError>;

/// Consumer that decodes `http.request` messages, runs a view and sends the
/// framed response to the request's reply channel
pub struct ViewConsumer<F, Fut> {
    view: F,
    config: HttpInterfaceConfig,
    _future: PhantomData<fn() -> Fut>,
}

/// Adapt a view function into a [`Consumer`].
///
/// A view error becomes a plain 500 response; if that cannot be sent either,
/// the consumer fails and the worker logs it.
pub fn view_consumer<F, Fut>(config: HttpInterfaceConfig, view: F) -> ViewConsumer<F, Fut>
where
    F: Fn(ChannelRequest, ConsumerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ViewResult> + Send + 'static,
{
    ViewConsumer {
        view,
        config,
        _future: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> Consumer for ViewConsumer<F, Fut>
where
    F: Fn(ChannelRequest, ConsumerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ViewResult> + Send + 'static,
{
    async fn consume(&self, message: Message, ctx: ConsumerContext) -> ConsumerResult {
        // Malformed requests surface as the bare channel error so the worker
        // logs them as dropped rather than failed
        let request = decode_request(message).map_err(|e| -> ConsumerError {
            match e {
                HttpInterfaceError::Channel(e) => e.into(),
                e => e.into(),
            }
        })?;
        let reply = ctx.channel(request.reply_channel());
        let method = request.method().to_string();
        let path = request.path().to_string();

        let response = match (self.view)(request, ctx.clone()).await {
            Ok(ConsumerReply::Immediate(response)) => response,
            Ok(ConsumerReply::Deferred { reply_channel }) => {
                debug!(method = %method, path = %path, reply_channel = %reply_channel, "Response deferred");
                return Ok(());
            }
            Err(e) => {
                error!(method = %method, path = %path, error = ?e, "View failed: {}", e);
                ChannelResponse::text(StatusCode::INTERNAL_SERVER_ERROR, "500 Internal Server Error")
            }
        };

        match send_response(&reply, response, &self.config).await {
            Ok(()) => Ok(()),
            // The client already has a status line; the body was ended early
            Err(e @ HttpInterfaceError::ResponseInterrupted { .. }) => {
                warn!(method = %method, path = %path, "Response cut short: {}", e);
                Err(e.into())
            }
            Err(e) => {
                warn!(reply_channel = %reply.name(), "Failed to send response, sending fallback: {}", e);
                let fallback = ChannelResponse::text(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "500 Internal Server Error",
                );
                send_response(&reply, fallback, &self.config).await?;
                Ok(())
            }
        }
    }

    fn name(&self) -> String {
        format!("view({})", std::any::type_name::<F>())
    }
}
