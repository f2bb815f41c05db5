//! TiA acquisition client entry point.
//!
//! Opens a session against a TiA server, optionally starts transmission, and
//! counts the decoded blocks until Ctrl+C, a time limit, or a reader failure.
//!
//! # What happens at startup
//!
//! 1. CLI arguments are parsed with `clap`.
//! 2. The TOML config is loaded from `--config` or the platform default path;
//!    CLI values (and `TIA_HOST` / `TIA_PORT`) override it.
//! 3. `tracing_subscriber` is initialised.  `RUST_LOG` wins; otherwise the
//!    configured log level applies.
//! 4. The session is opened and, if `auto_start` is set, started.
//! 5. On shutdown the session is stopped and closed in order: reader first,
//!    control connection last.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use tia_client::application::acquire::AcquisitionSession;
use tia_client::infrastructure::sinks::stats::StatsSink;
use tia_client::infrastructure::storage::config::{
    config_file_path, load_config, save_config, AppConfig,
};
use tia_core::domain::channel_map::DomainCategory;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// TiA biosignal acquisition client.
#[derive(Debug, Parser)]
#[command(
    name = "tia-client",
    about = "Connects to a TiA server and receives its sample stream",
    version
)]
struct Cli {
    /// Path to the TOML config file.  Defaults to the platform config dir.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Server endpoint: `host`, `host:port`, an IPv6 literal, or `[literal]:port`.
    #[arg(long, env = "TIA_HOST")]
    host: Option<String>,

    /// Control port used when the endpoint carries none.
    #[arg(long, env = "TIA_PORT")]
    port: Option<u16>,

    /// Stop after this many seconds instead of waiting for Ctrl+C.
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Log filter used when `RUST_LOG` is unset (e.g. `debug`, `tia_client=trace`).
    #[arg(long)]
    log_level: Option<String>,

    /// Write the effective config (file plus overrides) back and exit.
    #[arg(long)]
    save_config: bool,
}

impl Cli {
    /// The explicit `--config` path, else the platform default.
    fn config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(|| config_file_path().ok())
    }

    /// Loads the config file and applies CLI overrides on top.
    fn resolve_config(&self) -> anyhow::Result<AppConfig> {
        let mut config = match self.config_path() {
            Some(path) => load_config(&path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => AppConfig::default(),
        };
        self.apply_overrides(&mut config);
        Ok(config)
    }

    fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(level) = &self.log_level {
            config.logging.log_level = level.clone();
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.log_level)),
        )
        .init();

    if cli.save_config {
        let path = cli
            .config_path()
            .context("no --config given and no platform config directory")?;
        save_config(&path, &config)
            .with_context(|| format!("saving config to {}", path.display()))?;
        info!("config written to {}", path.display());
        return Ok(());
    }

    info!("TiA client starting, server {}", config.server.host);

    let sink = Arc::new(StatsSink::new(config.acquisition.log_every_blocks));
    let mut session = AcquisitionSession::open(
        &config.server.host,
        config.server.port,
        sink.clone(),
        sink.clone(),
    )
    .await
    .with_context(|| format!("opening session to {}", config.server.host))?;

    log_capabilities(&session);

    if config.acquisition.auto_start {
        session.start().await.context("starting data transmission")?;
    }

    wait_for_shutdown(&session, cli.duration_secs.map(Duration::from_secs)).await;

    if config.acquisition.auto_start && session.is_reading() {
        if let Err(e) = session.stop().await {
            warn!("stop failed: {e}");
        }
    }

    let summary = session.close().await.context("closing session")?;
    info!(
        "TiA client stopped: {} packets, {} blocks, {} samples",
        summary.packets,
        summary.blocks,
        sink.samples()
    );

    if let Some(e) = sink.last_error() {
        anyhow::bail!("acquisition failed: {e}");
    }
    Ok(())
}

fn log_capabilities(session: &AcquisitionSession) {
    let caps = session.capabilities();
    info!(
        "{} at {}: {} Hz, {} channels ({} eeg, {} trigger, {} sensor), block size {}",
        caps.device_type,
        caps.device_id,
        caps.sampling_rate,
        caps.channel_count,
        caps.eeg_channels,
        caps.trigger_channels,
        caps.sensor_channels,
        caps.block_size
    );
    for category in DomainCategory::ALL {
        let mut n = 0;
        while let Some(info) = session.channel_info(category, n) {
            debug!(
                "{category:?}[{n}] {} unit={} transducer={} range={:?}",
                info.label, info.unit, info.transducer, info.range
            );
            n += 1;
        }
    }
}

/// Returns on Ctrl+C, when `limit` elapses, or when the reader stops.
async fn wait_for_shutdown(session: &AcquisitionSession, limit: Option<Duration>) {
    let deadline = async {
        match limit {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    let reader_done = async {
        let mut tick = tokio::time::interval(Duration::from_millis(200));
        while session.is_reading() {
            tick.tick().await;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("received Ctrl+C, shutting down"),
            Err(e) => warn!("failed to listen for Ctrl+C: {e}"),
        },
        _ = deadline => info!("time limit reached"),
        _ = reader_done => warn!("data reader stopped"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
