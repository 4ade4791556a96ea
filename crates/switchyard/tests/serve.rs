use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use switchyard::channels::{ChannelLayers, MemorySessionStore, WorkerConfigBuilder};
use switchyard::demo::{demo_catalog, demo_layers_config, SESSION_COOKIE};
use switchyard::http::HttpInterfaceConfig;
use switchyard::ServeOptions;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_util::sync::CancellationToken;

async fn http_get(addr: std::net::SocketAddr, target: &str, cookie: Option<&str>) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut request = format!("GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n", target);
    if let Some(cookie) = cookie {
        request.push_str(&format!("Cookie: {}\r\n", cookie));
    }
    request.push_str("\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut response))
        .await
        .expect("no response within 5s")
        .unwrap();
    response
}

fn session_cookie(response: &str) -> String {
    response
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("set-cookie").then(|| value.trim())
        })
        .and_then(|value| value.split(';').next())
        .expect("no session cookie")
        .to_string()
}

#[tokio::test]
async fn serve_runs_demo_consumers_over_both_protocols() {
    let catalog = demo_catalog(
        HttpInterfaceConfig::default(),
        Arc::new(MemorySessionStore::new()),
    );
    let layers = ChannelLayers::build(demo_layers_config(), &catalog)
        .await
        .unwrap();

    let http = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ws = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let http_addr = http.local_addr().unwrap();
    let ws_addr = ws.local_addr().unwrap();

    let shutdown = CancellationToken::new();
    let server = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let options = ServeOptions {
                http: Some(http),
                ws: Some(ws),
                workers: 2,
                worker_config: WorkerConfigBuilder::testing()
                    .build()
                    .expect("Failed to build config"),
                ..ServeOptions::default()
            };
            switchyard::serve(&layers, options, shutdown).await
        })
    };

    // HTTP: the greeting view keeps a visit count in the session
    let first = http_get(http_addr, "/?name=ada", None).await;
    assert!(first.starts_with("HTTP/1.1 200"), "{}", first);
    assert!(first.contains("Hello, ada! Visit #1"));
    let cookie = session_cookie(&first);
    assert!(cookie.starts_with(SESSION_COOKIE));

    let second = http_get(http_addr, "/?name=ada", Some(&cookie)).await;
    assert!(second.contains("Hello, ada! Visit #2"), "{}", second);

    // WebSocket: frames come back from the echo consumer
    let (mut client, _) = connect_async(format!("ws://{}/", ws_addr)).await.unwrap();
    client.send(Frame::Text("marco".into())).await.unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("no echo within 5s")
        .unwrap()
        .unwrap();
    assert_eq!(reply, Frame::Text("marco".into()));
    client.close(None).await.unwrap();

    shutdown.cancel();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn serve_refuses_an_empty_process() {
    let layers = ChannelLayers::build(demo_layers_config(), &demo_catalog(
        HttpInterfaceConfig::default(),
        Arc::new(MemorySessionStore::new()),
    ))
    .await
    .unwrap();

    let options = ServeOptions {
        workers: 0,
        ..ServeOptions::default()
    };
    assert!(switchyard::serve(&layers, options, CancellationToken::new())
        .await
        .is_err());
}
