//! relay-server: WebSocket-to-TCP relay.
//!
//! Accepts WebSocket connections on a secret path, reads one handshake
//! message naming a TCP destination (resolving domains over DNS-over-HTTPS),
//! and then pipes bytes between the WebSocket and that destination.

mod agent;
mod auth;
mod config;
mod gateway;
mod handshake;
mod page;
mod server;
mod session;
mod transport;

use clap::builder::BoolishValueParser;
use clap::Parser;
use config::{ConfigOverrides, RelayConfig};
use server::RelayServer;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// relay-server: WebSocket-to-TCP relay
#[derive(Parser, Debug)]
#[command(name = "relay-server", version, about = "WebSocket-to-TCP relay")]
struct Cli {
    /// Listen port
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Listen address
    #[arg(long, env = "BIND")]
    bind: Option<IpAddr>,

    /// Client identity (UUID, hyphens optional)
    #[arg(long, env = "UUID")]
    uuid: Option<String>,

    /// WebSocket path (default: "/" + UUID without hyphens)
    #[arg(long, env = "WS_PATH")]
    ws_path: Option<String>,

    /// Username for the link page (and the gate, with --gate-auth)
    #[arg(long, env = "WEB_USERNAME")]
    web_username: Option<String>,

    /// Password for the link page (and the gate, with --gate-auth)
    #[arg(long, env = "WEB_PASSWORD", hide_env_values = true)]
    web_password: Option<String>,

    /// Protect the link page with basic auth
    #[arg(long, env = "PAGE_AUTH", value_parser = BoolishValueParser::new())]
    page_auth: Option<bool>,

    /// Require basic auth on WebSocket upgrades
    #[arg(long, env = "GATE_AUTH", value_parser = BoolishValueParser::new())]
    gate_auth: Option<bool>,

    /// DNS-over-HTTPS JSON endpoint
    #[arg(long, env = "DOH_SERVER")]
    doh_server: Option<String>,

    /// DoH request timeout in seconds
    #[arg(long, env = "DOH_TIMEOUT")]
    doh_timeout: Option<u64>,

    /// Upstream TCP connect timeout in seconds
    #[arg(long, env = "CONNECT_TIMEOUT")]
    connect_timeout: Option<u64>,

    /// Seconds between heartbeat pings
    #[arg(long, env = "HEARTBEAT_INTERVAL")]
    heartbeat_interval: Option<u64>,

    /// Seconds to wait for sessions on shutdown
    #[arg(long, env = "SHUTDOWN_TIMEOUT")]
    shutdown_timeout: Option<u64>,

    /// Seconds a connection may take to send its request head
    #[arg(long, env = "HEAD_TIMEOUT")]
    head_timeout: Option<u64>,

    /// Address type code points: "socks" or "compact"
    #[arg(long, env = "ATYP_MAPPING")]
    atyp_mapping: Option<String>,

    /// Scheme of the share link on the link page
    #[arg(long, env = "LINK_SCHEME")]
    link_scheme: Option<String>,

    /// Shell command started once in the background at startup
    #[arg(long, env = "AGENT_COMMAND")]
    agent_command: Option<String>,

    /// Config file path
    #[arg(long, default_value = "relay.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            port: self.port,
            bind: self.bind,
            uuid: self.uuid.clone(),
            ws_path: self.ws_path.clone(),
            web_username: self.web_username.clone(),
            web_password: self.web_password.clone(),
            page_auth: self.page_auth,
            gate_auth: self.gate_auth,
            doh_server: self.doh_server.clone(),
            doh_timeout: self.doh_timeout,
            connect_timeout: self.connect_timeout,
            heartbeat_interval: self.heartbeat_interval,
            shutdown_timeout: self.shutdown_timeout,
            head_timeout: self.head_timeout,
            atyp_mapping: self.atyp_mapping.clone(),
            link_scheme: self.link_scheme.clone(),
            agent_command: self.agent_command.clone(),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting relay-server");

    // Load config (file + env/CLI overrides)
    let config_path = PathBuf::from(&cli.config);
    let config = match RelayConfig::load(Some(&config_path), cli.overrides()) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    if let Some(command) = &config.agent_command {
        if let Err(e) = agent::launch(command) {
            warn!(error = %e, "agent not started");
        }
    }

    let server = match RelayServer::bind(config).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run(shutdown_signal()).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
