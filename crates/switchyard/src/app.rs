//! Running workers and protocol interfaces together

use std::sync::Arc;
use switchyard_channels::{ChannelBackend, ChannelLayers, Worker, WorkerConfig};
use switchyard_http::{HttpInterface, HttpInterfaceConfig};
use switchyard_ws::{WebSocketInterface, WebSocketInterfaceConfig};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// What one process should run
pub struct ServeOptions {
    /// Serve HTTP on this listener
    pub http: Option<TcpListener>,
    /// Serve WebSockets on this listener
    pub ws: Option<TcpListener>,
    /// Worker loops to run against the default backend
    pub workers: usize,
    pub worker_config: WorkerConfig,
    pub http_config: HttpInterfaceConfig,
    pub ws_config: WebSocketInterfaceConfig,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            http: None,
            ws: None,
            workers: 1,
            worker_config: WorkerConfig::default(),
            http_config: HttpInterfaceConfig::default(),
            ws_config: WebSocketInterfaceConfig::default(),
        }
    }
}

/// Run everything in `options` on the default backend until `shutdown` is
/// cancelled, then wait for every task to stop
pub async fn serve(
    layers: &ChannelLayers,
    options: ServeOptions,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let backend = layers.default_backend()?;
    if options.workers == 0 && options.http.is_none() && options.ws.is_none() {
        anyhow::bail!("Nothing to run: no workers and no interfaces");
    }
    if options.workers == 0 && backend.local_only() {
        warn!(
            backend = %backend.alias(),
            "No workers on a process-local backend; requests will never be consumed"
        );
    }

    let workers = spawn_workers(&backend, options.workers, options.worker_config, &shutdown);

    let http = options.http.map(|listener| {
        let interface = HttpInterface::new(backend.clone(), options.http_config);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let result = interface.serve(listener, shutdown.clone()).await;
            if result.is_err() {
                shutdown.cancel();
            }
            result
        })
    });

    let ws = options.ws.map(|listener| {
        let interface = WebSocketInterface::new(backend.clone(), options.ws_config);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let result = interface.serve(listener, shutdown.clone()).await;
            if result.is_err() {
                shutdown.cancel();
            }
            result
        })
    });

    info!(
        backend = %backend.alias(),
        workers = workers.len(),
        http = http.is_some(),
        websocket = ws.is_some(),
        "switchyard running"
    );

    // A failed interface cancels `shutdown`, stopping everything else
    let mut result: anyhow::Result<()> = Ok(());
    if let Some(handle) = http {
        if let Err(e) = handle.await? {
            result = Err(e.into());
        }
    }
    if let Some(handle) = ws {
        if let Err(e) = handle.await? {
            result = result.and(Err(e.into()));
        }
    }
    for handle in workers {
        handle.await?;
    }
    result
}

/// Spawn `count` workers sharing one backend
pub fn spawn_workers(
    backend: &Arc<dyn ChannelBackend>,
    count: usize,
    config: WorkerConfig,
    shutdown: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|_| Worker::new(backend.clone(), config.clone()).spawn(shutdown.clone()))
        .collect()
}
