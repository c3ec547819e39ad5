//! # parley
//!
//! Notification server binary: loads settings, initialises logging and
//! metrics, wires the hub, resolver, chat commands and HTTP server, then
//! runs until ctrl-c.
//!
//! The binary exposes only the WebSocket surface: clients can post to
//! existing conversations with the `message` kind. It has no HTTP routes for
//! creating conversations or registering user profiles, and the chat store is
//! in memory, so a fresh process starts empty. Until those routes exist,
//! every send is rejected as an unknown conversation. Authors without a
//! profile are rendered as "Unknown". Embedders drive `ChatCommands`
//! directly to populate the store.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use parley_chat::{ChatCommands, MemoryChatStore};
use parley_hub::{DispatchTable, Hub, NotificationResolver, ResolverConfig};
use parley_server::websocket::handlers;
use parley_server::{JwtVerifier, ParleyServer, ServerConfig};
use parley_settings::ParleySettings;
use tokio::task::JoinHandle;

/// Deadline for the whole drain: listener, sessions, then hub and resolver.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Parley notification server.
#[derive(Parser, Debug)]
#[command(name = "parley", about = "Real-time chat notification server")]
struct Cli {
    /// Settings file (defaults to `~/.parley/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log level filter (overrides settings; `RUST_LOG` still wins).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn load_settings(&self) -> Result<ParleySettings> {
        let path = self
            .settings
            .clone()
            .unwrap_or_else(parley_settings::settings_path);
        let mut settings = parley_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        self.apply_overrides(&mut settings);
        Ok(settings)
    }

    fn apply_overrides(&self, settings: &mut ParleySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

/// Everything `main` starts, kept so shutdown can wait on it.
struct App {
    server: ParleyServer,
    background: Vec<JoinHandle<()>>,
}

/// Build the running system. Must be called inside a Tokio runtime.
fn wire(settings: &ParleySettings, metrics: PrometheusHandle) -> App {
    let (hub, hub_task) = Hub::spawn(settings.hub.command_capacity);
    let store = Arc::new(MemoryChatStore::new());
    let (resolver, mut background) =
        NotificationResolver::start_with(hub.clone(), store.clone(), ResolverConfig::from(&settings.resolver));
    background.push(hub_task);

    let commands = ChatCommands::new(store.clone(), hub.clone(), resolver);
    let mut dispatch = DispatchTable::new();
    handlers::register_all(&mut dispatch, &commands);
    tracing::debug!(kinds = ?dispatch.kinds(), "dispatch table ready");

    let server = ParleyServer::new(
        ServerConfig::from(settings),
        hub,
        dispatch,
        store,
        Arc::new(JwtVerifier::new(&settings.auth.jwt_secret)),
        metrics,
    );
    App { server, background }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.load_settings()?;
    parley_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);

    if settings.auth.jwt_secret.is_empty() {
        tracing::warn!("auth.jwtSecret is empty; every websocket upgrade will be rejected");
    }

    let metrics = parley_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;
    let App { server, background } = wire(&settings, metrics);

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("Parley listening on http://{addr} (ws://{addr}/ws)");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let shutdown = server.shutdown().clone();
    let report = shutdown
        .drain(handle, server, background, Some(DRAIN_TIMEOUT))
        .await;
    if report.is_complete() {
        tracing::info!("Shutdown complete");
    } else {
        tracing::warn!(?report, "Shutdown finished with stages still running");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use metrics_exporter_prometheus::PrometheusBuilder;

    use super::*;

    fn test_metrics() -> PrometheusHandle {
        PrometheusBuilder::new().build_recorder().handle()
    }

    #[test]
    fn cli_defaults_leave_settings_alone() {
        let cli = Cli::parse_from(["parley"]);
        let mut settings = ParleySettings::default();
        cli.apply_overrides(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn cli_overrides_settings() {
        let cli = Cli::parse_from([
            "parley",
            "--host",
            "0.0.0.0",
            "--port",
            "0",
            "--log-level",
            "debug",
        ]);
        let mut settings = ParleySettings::default();
        cli.apply_overrides(&mut settings);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 0);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn settings_file_then_cli() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 9100, "maxConnections": 5}}"#).unwrap();

        let cli = Cli::parse_from([
            "parley",
            "--settings",
            path.to_str().unwrap(),
            "--host",
            "10.0.0.1",
        ]);
        let settings = cli.load_settings().unwrap();
        assert_eq!(settings.server.host, "10.0.0.1");
        assert_eq!(settings.server.max_connections, 5);
    }

    #[test]
    fn malformed_settings_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ nope").unwrap();

        let cli = Cli::parse_from(["parley", "--settings", path.to_str().unwrap()]);
        let err = cli.load_settings().unwrap_err();
        assert!(err.to_string().contains("Failed to load settings"));
    }

    #[tokio::test]
    async fn server_graceful_shutdown() {
        let mut settings = ParleySettings::default();
        settings.server.port = 0;
        settings.auth.jwt_secret = "secret".into();

        let App { server, background } = wire(&settings, test_metrics());
        let (_, handle) = server.listen().await.unwrap();

        let shutdown = server.shutdown().clone();
        let report = shutdown
            .drain(handle, server, background, Some(Duration::from_secs(5)))
            .await;
        assert!(report.is_complete(), "{report:?}");
        assert!(shutdown.is_shutting_down());
    }
}
