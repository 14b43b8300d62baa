//! Stagehand daemon.
//!
//! Connects to the audio engine, restores the last session, and keeps the
//! engine, control surface and editor mirror in sync until shut down. The
//! engine link is re-established (and the engine re-seeded from state)
//! whenever the write socket drops.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_stream::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stageproto::{EngineLink, LinkEvent};

use stagehand::hmi::NullHmi;
use stagehand::{
    stats, Broadcaster, JsonCatalog, NullRouter, Session, SessionOptions, StagehandConfig,
};

#[derive(Debug, Parser)]
#[command(name = "stagehand", about = "Session coordinator for a live audio-plugin host")]
struct Args {
    /// Extra config file, applied after the standard locations.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Engine write-socket port override (read socket is port + 1).
    #[arg(long)]
    engine_port: Option<u16>,
}

fn session_options(config: &StagehandConfig) -> SessionOptions {
    let presets_dir = directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".lv2"))
        .unwrap_or_else(|| config.paths.data_dir.join("lv2"));

    SessionOptions {
        pedalboards_dir: config.paths.pedalboards_dir.clone(),
        data_dir: config.paths.data_dir.clone(),
        presets_dir,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => StagehandConfig::load_from(&[path.clone()]).context("loading config")?,
        None => StagehandConfig::load().context("loading config")?,
    };
    if let Some(port) = args.engine_port {
        config.engine.port = port;
    }

    let catalog = match JsonCatalog::open(&config.paths.catalog_dir) {
        Ok(catalog) => catalog,
        Err(err) => {
            warn!(%err, "no plugin catalog available, starting empty");
            JsonCatalog::empty()
        }
    };

    let broadcaster = Broadcaster::new();
    let mut session = Session::new(
        session_options(&config),
        Arc::new(catalog),
        Arc::new(NullRouter),
        Box::new(NullHmi),
        broadcaster.clone(),
    );

    let engine_addr = (config.engine.host, config.engine.port);
    let mut first_boot = true;

    loop {
        let (link, mut events) = match EngineLink::connect(engine_addr).await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(%err, ?engine_addr, "engine unreachable, retrying");
                tokio::time::sleep(Duration::from_secs(2)).await;
                continue;
            }
        };

        if let Err(err) = session.reconnect(link).await {
            warn!(%err, "state replay failed, reconnecting");
            tokio::time::sleep(Duration::from_secs(1)).await;
            continue;
        }
        info!(?engine_addr, "engine connected");

        if first_boot {
            first_boot = false;
            session
                .bootstrap(config.paths.default_pedalboard.as_deref())
                .await;
        }

        let mut stats_tick = tokio::time::interval(Duration::from_secs(1));
        let mut mem_tick = tokio::time::interval(Duration::from_secs(5));

        loop {
            tokio::select! {
                event = events.next() => {
                    let Some(event) = event else { break };
                    let write_closed = matches!(event, LinkEvent::WriteClosed);
                    session.handle_link_event(event).await;
                    session.run_pending_pedalboard_loads().await;
                    if write_closed {
                        break;
                    }
                }
                _ = stats_tick.tick() => {
                    broadcaster.send(session.stats_message());
                }
                _ = mem_tick.tick() => {
                    if let Some(pct) = stats::memory_used_percent() {
                        broadcaster.send(format!("mem_load {:.1}", pct));
                    }
                }
            }
        }

        warn!("engine link lost");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}
