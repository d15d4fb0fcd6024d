use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use teapot::brewing::Teapot;
use teapot::config::TeapotConfig;
use teapot::htcpcp::HtcpcpServer;

/// HTCPCP tea pot control server.
#[derive(Debug, Parser)]
#[command(name = "teapot", version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(long, env = "TEAPOT_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    host: Option<IpAddr>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Number of runtime worker threads
    #[arg(long, alias = "worker_num")]
    worker_num: Option<usize>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug, cli.log_format);

    info!("Starting Teapot HTCPCP Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = TeapotConfig::load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.server.addr.set_ip(host);
    }
    if let Some(port) = cli.port {
        config.server.addr.set_port(port);
    }
    if cli.worker_num.is_some() {
        config.server.worker_num = cli.worker_num;
    }

    info!(
        host = %config.server.addr.ip(),
        port = config.server.addr.port(),
        worker_num = ?config.server.worker_num,
        debug = cli.debug,
        "Configuration loaded"
    );

    let mut runtime = tokio::runtime::Builder::new_multi_thread();
    runtime.enable_all();
    if let Some(workers) = config.server.worker_num {
        runtime.worker_threads(workers.max(1));
    }

    runtime.build()?.block_on(run(config))
}

async fn run(config: TeapotConfig) -> anyhow::Result<()> {
    // One teapot shared by every worker thread
    let teapot = Arc::new(Teapot::new(&config.pot)?);
    info!("Teapot initialized");

    let addr: SocketAddr = config.server.addr;
    let server = HtcpcpServer::bind(addr, teapot).await?;
    info!("Starting HTCPCP server on {}", server.local_addr()?);

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Teapot HTCPCP Service stopped");
    Ok(())
}

fn init_tracing(debug: bool, format: LogFormat) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["teapot"]);
        assert_eq!(cli.host, None);
        assert_eq!(cli.port, None);
        assert!(!cli.debug);
        assert_eq!(cli.log_format, LogFormat::Text);
    }

    #[test]
    fn test_cli_options() {
        let cli = Cli::parse_from([
            "teapot",
            "--host=127.0.0.1",
            "--port=9999",
            "--worker_num=4",
            "--debug",
            "--log-format=json",
        ]);
        assert_eq!(cli.host, Some("127.0.0.1".parse().unwrap()));
        assert_eq!(cli.port, Some(9999));
        assert_eq!(cli.worker_num, Some(4));
        assert!(cli.debug);
        assert_eq!(cli.log_format, LogFormat::Json);
    }
}
