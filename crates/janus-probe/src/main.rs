//! # janus-probe
//!
//! Connects to a gateway with layered settings, prints what the gateway
//! reports about itself, and optionally exercises a session and a plugin
//! handle before tearing everything down.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use janus_client::{ClientConfig, Connection, ServerInfo, WsTransport};
use janus_settings::JanusSettings;

/// Janus gateway probe.
#[derive(Parser, Debug)]
#[command(name = "janus-probe", about = "Probe a Janus gateway", version = janus_core::constants::VERSION)]
struct Cli {
    /// Gateway URL (overrides settings).
    #[arg(long)]
    url: Option<String>,

    /// Settings file (defaults to `~/.janus/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Opaque token (overrides settings).
    #[arg(long)]
    token: Option<String>,

    /// Opaque API secret (overrides settings).
    #[arg(long)]
    api_secret: Option<String>,

    /// Create a session and keep it alive for one heartbeat.
    #[arg(long)]
    session: bool,

    /// Attach to this plugin (implies `--session`).
    #[arg(long)]
    plugin: Option<String>,

    /// Print the raw `server_info` reply as JSON.
    #[arg(long)]
    json: bool,

    /// Log filter, e.g. `info` or `janus_client=debug`.
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn load_settings(&self) -> Result<JanusSettings> {
        let mut settings = match &self.settings {
            Some(path) => janus_settings::load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => janus_settings::load_settings().with_context(|| {
                format!(
                    "Failed to load settings from {}",
                    janus_settings::settings_path().display()
                )
            })?,
        };

        if let Some(url) = &self.url {
            settings.connection.url.clone_from(url);
        }
        if let Some(token) = &self.token {
            settings.connection.token = Some(token.clone());
        }
        if let Some(secret) = &self.api_secret {
            settings.connection.api_secret = Some(secret.clone());
        }
        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }

    fn wants_session(&self) -> bool {
        self.session || self.plugin.is_some()
    }
}

fn print_info(info: &ServerInfo, json: bool) -> Result<()> {
    if json {
        let text = serde_json::to_string_pretty(info.frame()).context("Failed to encode info")?;
        println!("{text}");
        return Ok(());
    }
    println!("name:    {}", info.name().unwrap_or("?"));
    println!("version: {}", info.version_string().unwrap_or("?"));
    let plugins = info.plugins();
    if plugins.is_empty() {
        println!("plugins: none");
    } else {
        println!("plugins:");
        for plugin in plugins {
            println!("  {plugin}");
        }
    }
    Ok(())
}

async fn exercise_session(conn: &Connection, plugin: Option<&str>) -> Result<()> {
    let session = conn
        .create_session()
        .await
        .context("Failed to create session")?;
    println!("session: {}", session.id());

    session.keepalive().await.context("Keepalive failed")?;
    println!("keepalive: ok");

    if let Some(plugin) = plugin {
        let handle = session
            .attach(plugin, None)
            .await
            .with_context(|| format!("Failed to attach to {plugin}"))?;
        println!("handle:  {} ({plugin})", handle.id());
        handle.dispose().await.context("Failed to detach handle")?;
    }

    session.destroy().await.context("Failed to destroy session")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    if args.log_json {
        janus_core::logging::init_json_subscriber(&args.log_level);
    } else {
        janus_core::logging::init_subscriber(&args.log_level);
    }

    let settings = args.load_settings()?;
    let config = ClientConfig::from_settings(&settings);
    tracing::info!(url = %config.url, "probing gateway");

    let conn = Connection::new(config, Arc::new(WsTransport::new()));
    let info = conn
        .open()
        .await
        .with_context(|| format!("Failed to connect to {}", settings.connection.url))?;
    print_info(&info, args.json)?;

    let outcome = if args.wants_session() {
        exercise_session(&conn, args.plugin.as_deref()).await
    } else {
        Ok(())
    };

    conn.close().await.context("Failed to close connection")?;
    outcome
}
