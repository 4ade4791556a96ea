//! Built-in consumers served by `switchyard serve`

use axum::http::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use switchyard_channels::{
    BackendSettings, ChannelLayersConfig, Consumer, ConsumerCatalog, ConsumerContext,
    ConsumerError, Message, Session, SessionProvider, DEFAULT_ALIAS,
};
use switchyard_http::{
    view_consumer, ChannelRequest, ChannelResponse, HttpInterfaceConfig, ViewResult,
    HTTP_REQUEST_CHANNEL,
};
use switchyard_ws::{WebSocketReceive, WebSocketSend, WEBSOCKET_RECEIVE_CHANNEL};
use uuid::Uuid;

/// Catalog name of the WebSocket echo consumer
pub const ECHO_CONSUMER: &str = "echo";
/// Catalog name of the HTTP greeting view
pub const HELLO_CONSUMER: &str = "hello";
/// Cookie carrying the demo session key
pub const SESSION_COOKIE: &str = "switchyard_session";

/// Writes every text or binary frame back to the socket it came from
pub fn echo_consumer() -> Arc<dyn Consumer> {
    Arc::new(|message: Message, ctx: ConsumerContext| async move {
        let receive = WebSocketReceive::from_message(&message)?;
        let reply = match receive.text() {
            Some(text) => WebSocketSend::text(text),
            None => WebSocketSend::binary(&receive.bytes()?),
        };
        ctx.channel(receive.send_channel.as_str())
            .send(reply.into_message()?)
            .await?;
        Ok::<(), ConsumerError>(())
    })
}

/// Greets `?name=` and counts visits in a cookie-keyed session
pub fn hello_consumer(
    config: HttpInterfaceConfig,
    sessions: Arc<dyn SessionProvider>,
) -> Arc<dyn Consumer> {
    Arc::new(view_consumer(config, move |request, _ctx| {
        hello(request, sessions.clone())
    }))
}

async fn hello(request: ChannelRequest, sessions: Arc<dyn SessionProvider>) -> ViewResult {
    let name = request.query_param("name").unwrap_or("world").to_string();
    let key = request
        .session_key(SESSION_COOKIE)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

    let mut session = Session::load(sessions.as_ref(), &key).await?;
    let visits = session.get("visits").and_then(Value::as_u64).unwrap_or(0) + 1;
    session.insert("visits", visits);
    session.save_if_modified(sessions.as_ref()).await?;

    Ok(
        ChannelResponse::text(StatusCode::OK, format!("Hello, {}! Visit #{}\n", name, visits))
            .with_cookie(format!("{}={}; Path=/; HttpOnly", SESSION_COOKIE, key))
            .into(),
    )
}

/// Every built-in consumer under its catalog name
pub fn demo_catalog(
    http_config: HttpInterfaceConfig,
    sessions: Arc<dyn SessionProvider>,
) -> ConsumerCatalog {
    let mut catalog = ConsumerCatalog::new();
    catalog.insert(ECHO_CONSUMER.to_string(), echo_consumer());
    catalog.insert(
        HELLO_CONSUMER.to_string(),
        hello_consumer(http_config, sessions),
    );
    catalog
}

/// One in-memory backend routing `http.request` to the greeting view and
/// `websocket.receive` to the echo consumer
pub fn demo_layers_config() -> ChannelLayersConfig {
    ChannelLayersConfig::default().with_backend(
        DEFAULT_ALIAS,
        BackendSettings::memory()
            .route(HTTP_REQUEST_CHANNEL, HELLO_CONSUMER)
            .route(WEBSOCKET_RECEIVE_CHANNEL, ECHO_CONSUMER),
    )
}
