//! PhantomID daemon — `phantomd` command.
//!
//! Loads the registry from its state file, serves the line-oriented
//! command channel over TCP, auto-saves while the tree changes, and saves
//! once more on Ctrl-C.
//!
//! Logs go to stderr through `tracing-subscriber`; the library's `log`
//! records are forwarded into the same output.

mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use phantom_id::{DaemonConfig, Registry};

use server::Server;

/// PhantomID daemon — anonymous identity registry over TCP.
#[derive(Parser, Debug)]
#[command(
    name = "phantomd",
    about = "PhantomID daemon",
    version,
    long_about = "phantomd — PhantomID daemon\n\nServes an anonymous identity tree over a line-oriented TCP channel\nand persists it to a checksummed snapshot file."
)]
struct Cli {
    /// JSON config file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    bind: Option<String>,

    /// TCP port
    #[arg(short, long)]
    port: Option<u16>,

    /// Snapshot file path
    #[arg(long)]
    state: Option<PathBuf>,

    /// Record user history and append it to responses
    #[arg(long)]
    history: bool,

    /// Maximum number of admin accounts
    #[arg(long)]
    max_admins: Option<usize>,

    /// Disable periodic auto-save (state is still saved on shutdown)
    #[arg(long)]
    no_auto_save: bool,

    /// Start with an empty tree if the state file cannot be loaded
    #[arg(long)]
    fresh: bool,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    print_config: bool,

    /// Log level: error, warn, info, debug, or trace
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

impl Cli {
    fn daemon_config(&self) -> Result<DaemonConfig> {
        let mut config = match &self.config {
            Some(path) => DaemonConfig::from_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => DaemonConfig::default(),
        };

        if let Some(bind) = &self.bind {
            config.network.bind_address = bind.clone();
        }
        if let Some(port) = self.port {
            config.network.port = port;
        }
        if let Some(state) = &self.state {
            config.state.path = state.clone();
        }
        if self.history {
            config.state.history_enabled = true;
        }
        if let Some(max_admins) = self.max_admins {
            config.tree.max_admins = max_admins;
        }
        if self.no_auto_save {
            config.state.auto_save = false;
        }

        config.validate()?;
        Ok(config)
    }
}

fn open_registry(config: DaemonConfig, fresh: bool) -> Result<Registry> {
    match Registry::open(config.clone()) {
        Ok(registry) => Ok(registry),
        Err(e) if fresh => {
            warn!("ignoring unreadable state file ({e}); starting with an empty tree");
            Ok(Registry::new(config)?)
        }
        Err(e) => Err(e).with_context(|| {
            format!(
                "failed to load state from {} (use --fresh to start empty)",
                config.state.path.display()
            )
        }),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.daemon_config()?;

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let registry = Arc::new(open_registry(config, cli.fresh)?);
    let status = registry.status();
    info!(
        "registry ready: {} nodes, {}/{} admins",
        status.nodes, status.admins, status.max_admins
    );

    let server = Server::bind(Arc::clone(&registry)).await?;
    server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(cli.log_level)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
