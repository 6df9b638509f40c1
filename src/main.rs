//! ACP Bridge - fronts an Agent Client Protocol backend for clients that
//! speak a different agent dialect.

use acp_bridge::{
    bridge::{run_stdio, serve_http, BridgeEngine},
    config::{BridgeConfig, ClientDialect, TransportKind},
    Error,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "acp-bridge")]
#[command(author = "A3S Lab Team")]
#[command(version)]
#[command(about = "Protocol bridge between agent client dialects and ACP agents")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "ACP_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve one client over stdin/stdout
    Stdio {
        /// Backend specifier, e.g. "acp:my-agent --stdio"
        #[arg(short, long)]
        backend: Option<String>,

        /// Client dialect (acp, copilot, claude)
        #[arg(long)]
        client: Option<ClientDialect>,
    },

    /// Serve clients over HTTP
    Serve {
        /// Backend specifier, e.g. "acp:my-agent --stdio"
        #[arg(short, long)]
        backend: Option<String>,

        /// Client dialect (acp, copilot, claude)
        #[arg(long)]
        client: Option<ClientDialect>,

        /// Listen address, host:port or port
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Serve over the transport named in the configuration
    Run,

    /// Show the effective configuration
    Config {
        /// Show the built-in defaults instead
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

/// Logs go to stderr; stdout carries the stdio transport
fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("acp_bridge={},tower_http=info", log_level).into());

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_writer(std::io::stderr)))
        .init();
}

fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<Error>() {
        Some(Error::Config(_)) => 2,
        Some(Error::Transport(_)) | Some(Error::Io(_)) => 3,
        Some(Error::Backend(_)) => 4,
        _ => 1,
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = BridgeConfig::load_or_default(cli.config.as_deref())?;
    config.apply_env_overrides()?;

    match cli.command {
        Commands::Stdio { backend, client } => {
            apply_flags(&mut config, backend, client, None);
            config.client.transport = TransportKind::Stdio;
            serve(config).await
        }
        Commands::Serve {
            backend,
            client,
            listen,
        } => {
            apply_flags(&mut config, backend, client, listen);
            config.client.transport = TransportKind::Http;
            serve(config).await
        }
        Commands::Run => serve(config).await,
        Commands::Config { default } => {
            let shown = if default {
                BridgeConfig::default()
            } else {
                config
            };
            print!("{}", shown.to_toml()?);
            Ok(())
        }
    }
}

fn apply_flags(
    config: &mut BridgeConfig,
    backend: Option<String>,
    client: Option<ClientDialect>,
    listen: Option<String>,
) {
    if let Some(backend) = backend {
        config.backend.specifier = Some(backend);
    }
    if let Some(client) = client {
        config.client.dialect = client;
    }
    if let Some(listen) = listen {
        config.client.listen = Some(listen);
    }
}

async fn serve(config: BridgeConfig) -> Result<()> {
    let (client_tx, client_rx) = mpsc::unbounded_channel();
    let engine = BridgeEngine::launch(&config, client_tx).context("Failed to start bridge")?;

    tracing::info!(
        dialect = %config.client.dialect,
        transport = ?config.client.transport,
        "ACP bridge starting"
    );

    match config.client.transport {
        TransportKind::Stdio => run_stdio(engine, client_rx).await?,
        TransportKind::Http => {
            serve_http(
                engine,
                client_rx,
                config.listen_addr(),
                &config.client.cors_origins,
            )
            .await?
        }
    }

    tracing::info!("ACP bridge stopped");
    Ok(())
}
