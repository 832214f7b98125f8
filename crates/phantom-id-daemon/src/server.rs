//! TCP command channel.
//!
//! Each connection is a tokio task reading one command per line and
//! writing one response per command. A response is its text followed by
//! an empty line. Registry calls run on the blocking pool since they take
//! the tree lock.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use phantom_id::Registry;

const BUSY_RESPONSE: &str = "Server busy, try again later\n\n";

pub struct Server {
    registry: Arc<Registry>,
    listener: TcpListener,
    connections: Arc<Semaphore>,
}

impl Server {
    /// Bind the listener named by the registry's network config.
    pub async fn bind(registry: Arc<Registry>) -> Result<Self> {
        let addr = registry.config().network.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let connections = Arc::new(Semaphore::new(registry.config().network.max_connections));
        Ok(Self {
            registry,
            listener,
            connections,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` resolves, then write a final snapshot.
    ///
    /// Open connections are told to stop and drained before the save, so
    /// every acknowledged mutation is in the snapshot.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let state = &self.registry.config().state;
        let autosave = state.auto_save.then(|| {
            tokio::spawn(autosave_loop(
                Arc::clone(&self.registry),
                Duration::from_secs(state.save_interval_secs),
            ))
        });

        info!("listening on {}", self.local_addr()?);
        tokio::pin!(shutdown);
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut clients = JoinSet::new();

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        self.admit(stream, peer, &mut clients, stop_rx.clone()).await
                    }
                    Err(e) => {
                        error!("failed to accept connection: {e}");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                Some(_) = clients.join_next(), if !clients.is_empty() => {}
            }
        }

        let _ = stop_tx.send(true);
        if !clients.is_empty() {
            debug!("waiting for {} connections to finish", clients.len());
        }
        while clients.join_next().await.is_some() {}

        if let Some(task) = autosave {
            task.abort();
        }

        let registry = Arc::clone(&self.registry);
        let saved = tokio::task::spawn_blocking(move || registry.save())
            .await
            .context("final save task failed")?
            .context("failed to save state on shutdown")?;
        info!("saved {saved} nodes on shutdown");
        Ok(())
    }

    async fn admit(
        &self,
        mut stream: TcpStream,
        peer: SocketAddr,
        clients: &mut JoinSet<()>,
        stop: watch::Receiver<bool>,
    ) {
        let Ok(permit) = Arc::clone(&self.connections).try_acquire_owned() else {
            warn!("rejecting {peer}: connection limit reached");
            let _ = stream.write_all(BUSY_RESPONSE.as_bytes()).await;
            return;
        };

        let registry = Arc::clone(&self.registry);
        clients.spawn(async move {
            info!("client connected from {peer}");
            if let Err(e) = handle_connection(stream, &registry, stop).await {
                debug!("connection {peer} ended: {e:#}");
            }
            info!("client disconnected from {peer}");
            drop(permit);
        });
    }
}

/// Read commands from one client until it disconnects, goes idle, or the
/// server stops. An oversized or undecodable line is discarded and
/// answered with an error.
async fn handle_connection(
    stream: TcpStream,
    registry: &Arc<Registry>,
    mut stop: watch::Receiver<bool>,
) -> Result<()> {
    let network = &registry.config().network;
    let idle = network.idle_timeout();
    let max_line = network.max_line_bytes;

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        if *stop.borrow() {
            return Ok(());
        }
        line.clear();
        let mut limited = (&mut reader).take(max_line as u64 + 1);
        let read = tokio::select! {
            biased;
            _ = stop.changed() => return Ok(()),
            read = tokio::time::timeout(idle, limited.read_until(b'\n', &mut line)) => read,
        };
        let n = match read {
            Ok(result) => result.context("read failed")?,
            Err(_) => {
                debug!("idle for {idle:?}, closing");
                return Ok(());
            }
        };
        if n == 0 {
            return Ok(());
        }
        if line.len() > max_line && line.last() != Some(&b'\n') {
            match tokio::time::timeout(idle, skip_line(&mut reader)).await {
                Ok(result) => result.context("read failed")?,
                Err(_) => return Ok(()),
            }
            let response = format!("Failed to read command: line exceeds {max_line} bytes\n\n");
            writer.write_all(response.as_bytes()).await?;
            continue;
        }

        let command = match std::str::from_utf8(&line) {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                let response = format!("Failed to read command: {e}\n\n");
                writer.write_all(response.as_bytes()).await?;
                continue;
            }
        };
        if command.is_empty() {
            continue;
        }

        let shared = Arc::clone(registry);
        let mut response = tokio::task::spawn_blocking(move || shared.execute(&command))
            .await
            .context("command task failed")?;
        response.push_str("\n\n");
        writer.write_all(response.as_bytes()).await?;
    }
}

/// Consume input up to and including the next newline.
async fn skip_line<R>(reader: &mut R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let (used, done) = {
            let buf = reader.fill_buf().await?;
            if buf.is_empty() {
                return Ok(());
            }
            match buf.iter().position(|b| *b == b'\n') {
                Some(i) => (i + 1, true),
                None => (buf.len(), false),
            }
        };
        reader.consume(used);
        if done {
            return Ok(());
        }
    }
}

async fn autosave_loop(registry: Arc<Registry>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let shared = Arc::clone(&registry);
        match tokio::task::spawn_blocking(move || shared.save_if_dirty()).await {
            Ok(Ok(Some(count))) => info!("auto-saved {count} nodes"),
            Ok(Ok(None)) => debug!("auto-save skipped, no changes"),
            Ok(Err(e)) => error!("auto-save failed: {e}"),
            Err(e) => error!("auto-save task failed: {e}"),
        }
    }
}
