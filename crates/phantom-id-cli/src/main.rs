//! PhantomID CLI — `pid` command.
//!
//! Inspects snapshot files offline and sends single commands to a running
//! `phantomd`.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use phantom_id::config::{DEFAULT_MAX_CHILDREN, DEFAULT_PORT};
use phantom_id::quota::DEFAULT_MAX_ADMINS;
use phantom_id::time::secs_to_datetime;
use phantom_id::{AdminQuota, IdentityTree, SnapshotStore, TraversalOrder, TreeConfig};

// ── CLI structure ─────────────────────────────────────────────────────────────

/// PhantomID CLI — inspect identity snapshots and query a running daemon.
#[derive(Parser, Debug)]
#[command(
    name = "pid",
    about = "PhantomID CLI",
    version,
    long_about = "pid — PhantomID CLI\n\nInspect and verify snapshot files written by phantomd, list the\nidentities they hold, and send commands to a running daemon."
)]
struct Cli {
    /// Emit JSON instead of text where supported
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show a snapshot's header and checksum status
    Info {
        /// Snapshot file
        path: PathBuf,
    },

    /// Rebuild the tree from a snapshot and report whether it loads
    Verify {
        /// Snapshot file
        path: PathBuf,

        #[command(flatten)]
        limits: Limits,
    },

    /// List the identities in a snapshot
    List {
        /// Snapshot file
        path: PathBuf,

        /// Traversal order
        #[arg(long, value_enum, default_value = "dfs")]
        order: Order,

        #[command(flatten)]
        limits: Limits,
    },

    /// Summarise the tree held in a snapshot
    Status {
        /// Snapshot file
        path: PathBuf,

        #[command(flatten)]
        limits: Limits,
    },

    /// Send one command line to a running daemon and print the response
    Send {
        /// Daemon address
        #[arg(long, default_value_t = format!("127.0.0.1:{DEFAULT_PORT}"))]
        addr: String,

        /// Seconds to wait for the response
        #[arg(long, default_value = "10")]
        timeout: u64,

        /// The command, e.g. `create` or `list bfs`
        #[arg(required = true)]
        command: Vec<String>,
    },
}

/// Tree limits used when rebuilding a snapshot.
#[derive(clap::Args, Debug, Clone, Copy)]
struct Limits {
    /// Children allowed per node
    #[arg(long, default_value_t = DEFAULT_MAX_CHILDREN)]
    max_children: usize,

    /// Admin slots
    #[arg(long, default_value_t = DEFAULT_MAX_ADMINS)]
    max_admins: usize,
}

impl Limits {
    fn load(&self, path: &Path) -> Result<IdentityTree> {
        let config = TreeConfig {
            max_children: self.max_children,
            max_admins: self.max_admins,
            ..TreeConfig::default()
        };
        let store = SnapshotStore::new(path);
        if !store.exists() {
            return Err(anyhow!("snapshot not found: {}", path.display()));
        }
        store
            .load(config, Arc::new(AdminQuota::new(self.max_admins)))
            .with_context(|| format!("failed to load {}", path.display()))
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Order {
    Bfs,
    Dfs,
}

impl From<Order> for TraversalOrder {
    fn from(order: Order) -> Self {
        match order {
            Order::Bfs => TraversalOrder::Bfs,
            Order::Dfs => TraversalOrder::Dfs,
        }
    }
}

// ── Main ──────────────────────────────────────────────────────────────────────

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let json = cli.json;

    let result = match cli.command {
        Commands::Info { path } => cmd_info(&path, json),
        Commands::Verify { path, limits } => cmd_verify(&path, limits),
        Commands::List {
            path,
            order,
            limits,
        } => cmd_list(&path, order, limits, json),
        Commands::Status { path, limits } => cmd_status(&path, limits, json),
        Commands::Send {
            addr,
            timeout,
            command,
        } => cmd_send(&addr, Duration::from_secs(timeout), &command.join(" ")),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

// ── Command implementations ───────────────────────────────────────────────────

fn cmd_info(path: &Path, json: bool) -> Result<()> {
    let info = SnapshotStore::new(path)
        .inspect()
        .with_context(|| format!("failed to read {}", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("Snapshot: {}", path.display());
    println!("  Version:   {}", info.version);
    println!("  Flags:     {:#x}", info.flags);
    println!("  Saved:     {}", secs_to_datetime(info.timestamp));
    println!("  Nodes:     {}", info.node_count);
    println!(
        "  Checksum:  {:#010x} ({})",
        info.checksum,
        if info.checksum_valid { "valid" } else { "INVALID" }
    );
    println!("  Size:      {} bytes", info.file_len);
    Ok(())
}

fn cmd_verify(path: &Path, limits: Limits) -> Result<()> {
    let tree = limits.load(path)?;
    println!(
        "OK: {} nodes, depth {}, {} roots",
        tree.size(),
        tree.depth(),
        tree.roots().len()
    );
    Ok(())
}

fn cmd_list(path: &Path, order: Order, limits: Limits, json: bool) -> Result<()> {
    let tree = limits.load(path)?;

    if json {
        let mut ids = Vec::new();
        tree.traverse(order.into(), |visit| ids.push(visit.id().clone()));
        let infos: Vec<_> = ids.iter().filter_map(|id| tree.describe(id)).collect();
        println!("{}", serde_json::to_string_pretty(&infos)?);
        return Ok(());
    }

    if tree.is_empty() {
        println!("No accounts.");
        return Ok(());
    }

    let indent_by_depth = matches!(order, Order::Dfs);
    tree.traverse(order.into(), |visit| {
        let indent = if indent_by_depth {
            "  ".repeat(visit.depth)
        } else {
            String::new()
        };
        println!(
            "{indent}- {} ({}, created {})",
            visit.id(),
            visit.roles.label(),
            secs_to_datetime(visit.node.creation_time())
        );
    });
    Ok(())
}

fn cmd_status(path: &Path, limits: Limits, json: bool) -> Result<()> {
    let tree = limits.load(path)?;
    let status = serde_json::json!({
        "nodes": tree.size(),
        "depth": tree.depth(),
        "has_root": tree.has_root(),
        "roots": tree.roots().len(),
        "admins": tree.admin_count(),
        "max_admins": limits.max_admins,
    });

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Nodes: {}", tree.size());
    println!("Depth: {}", tree.depth());
    println!(
        "Root: {}",
        if tree.has_root() { "Present" } else { "None" }
    );
    println!("Admins: {}/{}", tree.admin_count(), limits.max_admins);
    Ok(())
}

fn cmd_send(addr: &str, timeout: Duration, command: &str) -> Result<()> {
    let stream =
        TcpStream::connect(addr).with_context(|| format!("failed to connect to {addr}"))?;
    stream.set_read_timeout(Some(timeout))?;
    log::debug!("connected to {addr}");

    let mut writer = stream.try_clone()?;
    writer.write_all(format!("{}\n", command.trim()).as_bytes())?;
    writer.flush()?;

    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let line = line.context("failed to read response")?;
        if line.is_empty() {
            break;
        }
        println!("{line}");
    }
    Ok(())
}
