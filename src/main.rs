//! Reverse proxy handler binary.
//!
//! ```text
//!     Client Request
//!     ──────────────▶ HttpServer ──▶ ReverseProxyHandler ──▶ LoadBalancer[i]
//!                     (axum)         (hooks, relay)          (filter, select)
//!                                          │                        │
//!                                          ▼                        ▼
//!     Client Response                  transport ─────────────▶ Upstream
//!     ◀────────────── stream / tunnel ◀────────── response     (breaker,
//!                                                                health checks)
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use proxy_handler::config::load_config;
use proxy_handler::observability::{logging, metrics};
use proxy_handler::{Components, HttpServer, ReverseProxyHandler};

/// Serve a reverse proxy handler described by a TOML file.
#[derive(Debug, Parser)]
#[command(name = "proxy-handler", version, about)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "proxy-handler.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    logging::init(
        &config.observability.log_level,
        config.observability.json_logs,
    );

    tracing::info!(
        config = %cli.config.display(),
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        load_balancers = config.handler.load_balancers.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let handler = ReverseProxyHandler::from_spec(&config.handler, &Components::default())?;
    let server = HttpServer::new(handler, &config.handler, &config.timeouts)?;

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    server.run(listener).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
