//! # tabletop
//!
//! Runs the relay, or a headless client that mirrors the shared board.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tabletop_client::GameClient;
use tabletop_client::board::headless::HeadlessScene;
use tabletop_relay::RelayServer;
use tabletop_settings::TabletopSettings;
use tokio_util::sync::CancellationToken;

/// Shared-board relay and observer.
#[derive(Parser, Debug)]
#[command(name = "tabletop", about = "Shared tabletop piece sync")]
struct Cli {
    /// Settings file (defaults to `~/.tabletop/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Emit JSON log lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay.
    Relay {
        /// Host to bind.
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (0 for auto-assign).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Connect a headless client and mirror the board until ctrl-c.
    Observe {
        /// Relay WebSocket URL.
        #[arg(long)]
        url: Option<String>,
        /// Session identity stamped on outbound envelopes.
        #[arg(long)]
        identity: Option<String>,
    },
}

impl Cli {
    fn load_settings(&self) -> Result<TabletopSettings> {
        let path = self
            .settings
            .clone()
            .unwrap_or_else(tabletop_settings::settings_path);
        tabletop_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = cli.load_settings()?;

    if cli.json_logs || settings.logging.json {
        tabletop_core::logging::init_json_subscriber(&settings.logging.level);
    } else {
        tabletop_core::logging::init_subscriber(&settings.logging.level);
    }

    let relay = cli.command.apply_to(&mut settings);
    if tabletop_settings::init_settings(settings).is_err() {
        anyhow::bail!("settings were initialized before startup");
    }
    let settings = tabletop_settings::get_settings();

    if relay {
        run_relay(settings).await
    } else {
        run_observer(settings).await
    }
}

impl Command {
    /// Fold flag overrides into `settings`. Returns whether this runs the relay.
    fn apply_to(self, settings: &mut TabletopSettings) -> bool {
        match self {
            Command::Relay { host, port } => {
                if let Some(host) = host {
                    settings.relay.host = host;
                }
                if let Some(port) = port {
                    settings.relay.port = port;
                }
                true
            }
            Command::Observe { url, identity } => {
                if let Some(url) = url {
                    settings.client.url = url;
                }
                if let Some(identity) = identity {
                    settings.client.identity = identity;
                }
                false
            }
        }
    }
}

async fn run_relay(settings: &TabletopSettings) -> Result<()> {
    let metrics = tabletop_relay::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;
    let server = RelayServer::new(settings.relay.clone(), Some(metrics));
    let (addr, handle) = server.listen().await.context("Failed to bind relay")?;
    tracing::info!("tabletop relay listening on ws://{addr}/ws");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    let report = server
        .shutdown()
        .graceful_shutdown(handle, Some(Duration::from_secs(10)))
        .await;
    tracing::info!(
        drained = report.drained,
        abandoned = report.abandoned,
        "shutdown complete"
    );
    Ok(())
}

async fn run_observer(settings: &TabletopSettings) -> Result<()> {
    let cancel = CancellationToken::new();
    let client = GameClient::from_settings(&settings.client, HeadlessScene::open(), cancel.clone());
    let session = client.session().clone();
    let handle = client.handle();
    let actor = tokio::spawn(client.run());

    let reader = session
        .connect(&settings.client.url)
        .await
        .with_context(|| format!("Failed to connect to {}", settings.client.url))?;
    if !session.login_with(&settings.client.credentials) {
        anyhow::bail!("login could not be sent");
    }
    tracing::info!(identity = %session.identity(), url = %settings.client.url, "observing");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for ctrl-c")?;
        }
        _ = reader => tracing::warn!("relay closed the connection"),
    }

    if let Some(pieces) = handle.snapshot().await {
        let held = pieces.iter().filter(|p| p.is_picked).count();
        tracing::info!(pieces = pieces.len(), held, "final board");
    }
    session.disconnect();
    cancel.cancel();
    let _ = actor.await;
    Ok(())
}
