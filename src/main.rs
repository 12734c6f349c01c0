//! soma - MCP cell host
//!
//! `soma serve` starts a cell that serves its built-in tools over Streamable
//! HTTP at `/mcp` and federates the tools of every configured endpoint.
//! `soma check` validates a config file without starting anything.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser as ClapParser, Subcommand};
use soma::cell::{Cell, CellOptions};
use soma::config::{self, CellConfig, DEFAULT_BIND};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// soma - MCP cell host with endpoint federation
#[derive(ClapParser, Debug)]
#[command(name = "soma", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the cell config file (default: $XDG_CONFIG_HOME/soma/cell.toml)
    #[arg(long, env = "SOMA_CONFIG", global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the cell (the default when no subcommand is given)
    Serve {
        /// Address to bind the HTTP server (overrides the config file)
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Cell name (overrides the config file and the system hostname)
        #[arg(long)]
        name: Option<String>,
    },

    /// Validate the config file and print a summary
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config_path = cli.config.or_else(config::default_config_path);
    match cli.command.unwrap_or(Commands::Serve {
        bind: None,
        name: None,
    }) {
        Commands::Serve { bind, name } => run_serve(config_path.as_deref(), bind, name).await,
        Commands::Check => run_check(config_path.as_deref()),
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "soma=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<CellConfig> {
    let Some(path) = path else {
        return Ok(CellConfig::default());
    };
    match CellConfig::load(path)? {
        Some(config) => {
            tracing::info!(path = %path.display(), "loaded config");
            Ok(config)
        }
        None => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(CellConfig::default())
        }
    }
}

async fn run_serve(
    config_path: Option<&Path>,
    bind: Option<SocketAddr>,
    name: Option<String>,
) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    if name.is_some() {
        config.server.name = name;
    }
    let bind = match bind.or(config.server.bind) {
        Some(bind) => bind,
        None => DEFAULT_BIND
            .parse()
            .context("default bind address is malformed")?,
    };

    let cell = Cell::new(CellOptions::from_config(&config));
    let addr = cell.start(bind).await?;
    tracing::info!(
        cell = %cell.name(),
        mcp = %format!("http://{addr}/mcp"),
        endpoints = cell.registry().total_count(),
        "cell ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    tracing::info!("received Ctrl+C");

    cell.stop().await?;
    Ok(())
}

fn run_check(config_path: Option<&Path>) -> anyhow::Result<()> {
    let path = config_path.context("no config path given and no config directory found")?;
    let config = CellConfig::load(path)?
        .with_context(|| format!("config file not found: {}", path.display()))?;

    println!("config ok: {}", path.display());
    println!("  cell name: {}", config::resolve_cell_name(&config.server));
    println!(
        "  bind: {}",
        config
            .server
            .bind
            .map(|b| b.to_string())
            .unwrap_or_else(|| DEFAULT_BIND.to_string())
    );
    println!("  endpoints: {}", config.endpoints.len());
    for endpoint in &config.endpoints {
        println!(
            "    {} ({}) -> {} [prefix {}]",
            endpoint.id,
            endpoint.display_name(),
            endpoint.url,
            endpoint.tool_prefix()
        );
    }
    Ok(())
}
