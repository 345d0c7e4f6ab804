// lansync node: discovery, transfer server and reconciliation over one shared directory.

mod client;
mod config;
mod discovery;
mod engine;
mod error;
mod index;
mod registry;
mod shutdown;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::discovery::DiscoveryConfig;
use crate::engine::Engine;
use crate::index::FileIndex;
use crate::registry::PeerRegistry;
use crate::shutdown::Shutdown;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Default)]
struct Args {
    dir: Option<PathBuf>,
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let mut args = Args::default();
    let mut argv = std::env::args().skip(1);
    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("lansync-node {}", VERSION);
                return Ok(());
            }
            "--dir" => args.dir = Some(argv.next().context("--dir needs a path")?.into()),
            "--config" => args.config = Some(argv.next().context("--config needs a path")?.into()),
            other => anyhow::bail!("unknown argument {other:?}"),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut cfg = config::load(args.config.as_deref())?;
    if let Some(dir) = args.dir {
        cfg.shared_dir = dir;
    }
    std::fs::create_dir_all(&cfg.shared_dir)
        .with_context(|| format!("cannot create {}", cfg.shared_dir.display()))?;
    let shared_dir = std::fs::canonicalize(&cfg.shared_dir)?;
    let empty = std::fs::read_dir(&shared_dir)?.next().is_none();
    info!(dir = %shared_dir.display(), empty, "shared directory ready");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let shutdown = Shutdown::new();
        let index = Arc::new(FileIndex::new(
            shared_dir,
            cfg.block_size(),
            cfg.scan_interval(),
        ));
        let (registry, admitted) = PeerRegistry::new();
        let registry = Arc::new(registry);

        let listener = transport::bind(cfg.peer_port)
            .await
            .with_context(|| format!("cannot listen on port {}", cfg.peer_port))?;
        info!(port = cfg.peer_port, dir = %index.dir().display(), "node started");
        let transport_task = tokio::spawn(transport::run_transport(
            listener,
            index.clone(),
            shutdown.clone(),
        ));

        let disc_cfg = DiscoveryConfig {
            group: cfg.multicast_group,
            port: cfg.multicast_port,
            peer_port: cfg.peer_port,
        };
        let disc_registry = registry.clone();
        let disc_shutdown = shutdown.clone();
        let discovery_task = tokio::spawn(async move {
            if let Err(e) = discovery::run_discovery(disc_registry, disc_cfg, disc_shutdown).await {
                error!(error = %e, "discovery unavailable");
            }
        });

        let engine = Arc::new(Engine::new(
            registry.clone(),
            index,
            cfg.sync_interval(),
            shutdown.clone(),
        ));
        let engine_task = tokio::spawn(engine.run(admitted));

        shutdown_signal().await?;
        info!("shutting down");
        shutdown.trigger();
        let _ = tokio::join!(transport_task, discovery_task, engine_task);
        info!(peers = registry.len().await, "stopped");
        Ok::<(), anyhow::Error>(())
    })
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
