//! Job gateway
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌───────────────────────────────────────────────────────────┐
//!                    │                       JOB GATEWAY                          │
//!                    │                                                            │
//!   HTTP request     │  ┌─────────┐    ┌──────────────┐                           │
//!   ─────────────────┼─▶│  http   │───▶│    proxy     │───▶ backend services      │
//!                    │  │ server  │    └──────────────┘                           │
//!                    │  │         │    ┌──────────────┐    ┌──────────────┐       │
//!   websocket        │  │         │───▶│   session    │───▶│   dispatch   │───▶ task queue
//!   ◀────────────────┼──│         │    │    loop      │    └──────────────┘       │
//!                    │  └─────────┘    └──────┬───────┘                           │
//!                    │                        │ register / add_job / unregister   │
//!                    │                        ▼                                   │
//!                    │                 ┌──────────────┐    ┌──────────────┐       │
//!                    │                 │ correlation  │◀───│    notify    │◀─── broker
//!                    │                 │    store     │    │   listener   │       │
//!                    │                 └──────────────┘    └──────────────┘       │
//!                    │                                                            │
//!                    │  config · observability · lifecycle · admin · resilience   │
//!                    └───────────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;

use job_gateway::config::{load_config, validate_config, ConfigError, GatewayConfig};
use job_gateway::http::HttpServer;
use job_gateway::lifecycle::spawn_signal_handler;
use job_gateway::observability::{logging, metrics};

#[derive(Parser, Debug)]
#[command(name = "job-gateway", version, about = "HTTP gateway with an asynchronous job bridge")]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Listen on this port instead of the configured one.
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Do not attach bearer tokens to outbound calls (local emulators).
    #[arg(long, env = "INSECURE")]
    insecure: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => {
            let config = GatewayConfig::default();
            validate_config(&config).map_err(ConfigError::Validation)?;
            config
        }
    };
    if let Some(port) = args.port {
        config.override_port(port);
    }

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "job-gateway starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        tls = config.listener.tls.is_some(),
        jobs_enabled = config.jobs.enabled,
        job_route = %config.jobs.route,
        broker_enabled = config.broker.enabled,
        services = config.services.len(),
        admin_enabled = config.admin.enabled,
        insecure = args.insecure,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let tls = config.listener.tls.clone();
    let bind_address = config.listener.bind_address.clone();
    let server = HttpServer::from_config(config, args.insecure)?;
    let signals = spawn_signal_handler(server.shutdown());

    match tls {
        Some(tls) => server.run_tls(&tls).await?,
        None => {
            let listener = TcpListener::bind(&bind_address).await?;
            tracing::info!(address = %listener.local_addr()?, "Listening for connections");
            server.run(listener).await?;
        }
    }

    signals.abort();
    tracing::info!("Shutdown complete");
    Ok(())
}
