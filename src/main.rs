//! rowgate server
//!
//! Binary entry point for the REST gateway.

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rowgate::{load_config, RowgateServer};

#[derive(Parser, Debug)]
#[command(name = "rowgate")]
#[command(about = "Table-to-REST gateway with row-level security", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "ROWGATE_CONFIG", default_value = "rowgate.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Override the listen host
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)))
        .init();

    info!("rowgate v{}", env!("CARGO_PKG_VERSION"));

    let mut config = load_config(&args.config)?;
    if let Some(host) = args.host {
        config.rest.host = host;
    }
    if let Some(port) = args.port {
        config.rest.port = port;
    }

    let server = RowgateServer::new(config);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for CTRL+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal");
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
                return Err(e.into());
            }
        }
        () = shutdown => {}
    }

    Ok(())
}
