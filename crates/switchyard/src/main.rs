use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use switchyard::channels::{ChannelLayers, ChannelLayersConfig, MemorySessionStore};
use switchyard::demo::{demo_catalog, demo_layers_config};
use switchyard::http::HttpInterfaceConfig;
use switchyard::logging::{init_logging, log_shutdown_info, log_startup_info, LoggingConfig};
use switchyard::ServeOptions;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "switchyard")]
#[command(version, about = "Named-channel messaging for HTTP and WebSocket consumers")]
struct Cli {
    /// Log level, overridden by RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit JSON logs
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run workers and the HTTP and WebSocket interfaces in one process
    Serve {
        /// Channel layers file (.yaml, .yml or .json); defaults to one in-memory backend
        #[arg(long)]
        config: Option<PathBuf>,

        /// HTTP listen address
        #[arg(long, default_value = "127.0.0.1:8000")]
        http: SocketAddr,

        /// WebSocket listen address
        #[arg(long, default_value = "127.0.0.1:9000")]
        ws: SocketAddr,

        /// Worker loops to run
        #[arg(long, default_value_t = 1)]
        workers: usize,
    },

    /// Run workers only, for a backend shared with interface processes
    Worker {
        /// Channel layers file (.yaml, .yml or .json)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Worker loops to run
        #[arg(long, default_value_t = 1)]
        workers: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut logging = if cli.json_logs {
        LoggingConfig::production()
    } else {
        LoggingConfig::development()
    };
    if let Some(level) = cli.log_level {
        logging = logging.with_level(level);
    }
    init_logging(logging.with_service("switchyard")).map_err(|e| anyhow::anyhow!(e))?;
    log_startup_info("switchyard", env!("CARGO_PKG_VERSION"));

    let (config, options) = match cli.command {
        Commands::Serve {
            config,
            http,
            ws,
            workers,
        } => {
            let http_listener = TcpListener::bind(http)
                .await
                .with_context(|| format!("Cannot bind HTTP interface to {}", http))?;
            let ws_listener = TcpListener::bind(ws)
                .await
                .with_context(|| format!("Cannot bind WebSocket interface to {}", ws))?;
            let options = ServeOptions {
                http: Some(http_listener),
                ws: Some(ws_listener),
                workers,
                ..ServeOptions::default()
            };
            (config, options)
        }
        Commands::Worker { config, workers } => {
            let options = ServeOptions {
                workers,
                ..ServeOptions::default()
            };
            (config, options)
        }
    };

    let config = match config {
        Some(path) => ChannelLayersConfig::from_file(&path)
            .with_context(|| format!("Cannot load channel layers from {}", path.display()))?,
        None => demo_layers_config(),
    };
    let catalog = demo_catalog(
        HttpInterfaceConfig::default(),
        Arc::new(MemorySessionStore::new()),
    );
    let layers = ChannelLayers::build(config, &catalog).await?;
    info!(aliases = ?layers.aliases(), default = %layers.default_alias(), "Channel layers ready");

    let shutdown = CancellationToken::new();
    let signal = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for Ctrl-C: {}", e);
                return;
            }
            info!("Ctrl-C received, shutting down");
            shutdown.cancel();
        })
    };

    let result = switchyard::serve(&layers, options, shutdown).await;

    signal.abort();
    log_shutdown_info("switchyard");
    result
}
