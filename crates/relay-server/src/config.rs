//! Server configuration: TOML file + environment/CLI overrides.
//!
//! Every setting can come from three places, highest priority first:
//! a CLI flag, its environment variable (`UUID`, `PORT`, `DOH_SERVER`, ...),
//! or the optional TOML file. The result is an immutable [`RelayConfig`]
//! built once at startup and shared by `Arc`.

use relay_core::{AddressTypeTable, ClientId, RelayError, RelayResult};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub doh: DohSection,
    #[serde(default)]
    pub protocol: ProtocolSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: IpAddr,
    /// Fixed WebSocket path; derived from the UUID when unset.
    #[serde(default)]
    pub ws_path: Option<String>,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
    /// Seconds a new connection has to deliver its request head.
    #[serde(default = "default_head_timeout")]
    pub head_timeout: u64,
    #[serde(default)]
    pub agent_command: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            ws_path: None,
            heartbeat_interval: default_heartbeat_interval(),
            connect_timeout: default_connect_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
            head_timeout: default_head_timeout(),
            agent_command: None,
        }
    }
}

/// `[auth]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSection {
    #[serde(default = "default_uuid")]
    pub uuid: String,
    #[serde(default = "default_username")]
    pub web_username: String,
    #[serde(default = "default_password")]
    pub web_password: String,
    /// Basic auth on the link page.
    #[serde(default = "default_true")]
    pub page_auth: bool,
    /// Basic auth on the WebSocket upgrade as well as the path check.
    #[serde(default)]
    pub gate_auth: bool,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            uuid: default_uuid(),
            web_username: default_username(),
            web_password: default_password(),
            page_auth: true,
            gate_auth: false,
        }
    }
}

/// `[doh]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct DohSection {
    #[serde(default = "default_doh_server")]
    pub server: String,
    #[serde(default = "default_doh_timeout")]
    pub timeout: u64,
}

impl Default for DohSection {
    fn default() -> Self {
        Self {
            server: default_doh_server(),
            timeout: default_doh_timeout(),
        }
    }
}

/// `[protocol]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolSection {
    /// `"socks"` or `"compact"`.
    #[serde(default = "default_atyp_mapping")]
    pub atyp_mapping: String,
    #[serde(default = "default_link_scheme")]
    pub link_scheme: String,
}

impl Default for ProtocolSection {
    fn default() -> Self {
        Self {
            atyp_mapping: default_atyp_mapping(),
            link_scheme: default_link_scheme(),
        }
    }
}

fn default_port() -> u16 {
    7860
}
fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_heartbeat_interval() -> u64 {
    30
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_shutdown_timeout() -> u64 {
    10
}
fn default_head_timeout() -> u64 {
    10
}
fn default_uuid() -> String {
    "37a0bd7c-8b9f-4693-8916-bd1e2da0a817".to_string()
}
fn default_username() -> String {
    "admin".to_string()
}
fn default_password() -> String {
    "password".to_string()
}
fn default_true() -> bool {
    true
}
fn default_doh_server() -> String {
    "https://dns.nextdns.io/7df33f".to_string()
}
fn default_doh_timeout() -> u64 {
    10
}
fn default_atyp_mapping() -> String {
    "socks".to_string()
}
fn default_link_scheme() -> String {
    "vless".to_string()
}

/// Values supplied on the command line or through the environment.
///
/// `None` means "not given"; the file (or built-in default) applies.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub bind: Option<IpAddr>,
    pub uuid: Option<String>,
    pub ws_path: Option<String>,
    pub web_username: Option<String>,
    pub web_password: Option<String>,
    pub page_auth: Option<bool>,
    pub gate_auth: Option<bool>,
    pub doh_server: Option<String>,
    pub doh_timeout: Option<u64>,
    pub connect_timeout: Option<u64>,
    pub heartbeat_interval: Option<u64>,
    pub shutdown_timeout: Option<u64>,
    pub head_timeout: Option<u64>,
    pub atyp_mapping: Option<String>,
    pub link_scheme: Option<String>,
    pub agent_command: Option<String>,
}

/// Resolved relay configuration (overrides applied, values validated).
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    pub bind: IpAddr,
    /// The identifier as configured (hyphens kept), used in the share link.
    pub uuid: String,
    pub client_id: ClientId,
    /// Path a WebSocket upgrade must target.
    pub ws_path: String,
    pub web_username: String,
    pub web_password: String,
    pub page_auth: bool,
    pub gate_auth: bool,
    pub doh_server: String,
    pub doh_timeout: Duration,
    pub connect_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub shutdown_timeout: Duration,
    pub head_timeout: Duration,
    pub address_table: AddressTypeTable,
    pub link_scheme: String,
    pub agent_command: Option<String>,
}

impl RelayConfig {
    /// Load config from the TOML file (if present), then apply overrides.
    pub fn load(config_path: Option<&Path>, overrides: ConfigOverrides) -> RelayResult<Self> {
        let file_config = match config_path {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "loading config file");
                let content = std::fs::read_to_string(path)?;
                toml::from_str::<ConfigFile>(&content)
                    .map_err(|e| RelayError::Config(format!("config parse error: {e}")))?
            }
            Some(path) => {
                info!(path = %path.display(), "config file not found, using defaults");
                ConfigFile::default()
            }
            None => ConfigFile::default(),
        };

        Self::resolve(file_config, overrides)
    }

    /// Merge file values with overrides and validate the result.
    pub fn resolve(file: ConfigFile, overrides: ConfigOverrides) -> RelayResult<Self> {
        let uuid = overrides.uuid.unwrap_or(file.auth.uuid);
        let client_id = ClientId::parse(&uuid)?;

        let ws_path = match overrides.ws_path.or(file.server.ws_path) {
            Some(path) if path.starts_with('/') => path,
            Some(path) => format!("/{path}"),
            None => format!("/{}", client_id.simple()),
        };

        let atyp_mapping = overrides.atyp_mapping.unwrap_or(file.protocol.atyp_mapping);
        let address_table = AddressTypeTable::from_name(&atyp_mapping).ok_or_else(|| {
            RelayError::Config(format!(
                "unknown address type mapping {atyp_mapping:?} (expected \"socks\" or \"compact\")"
            ))
        })?;

        let doh_server = overrides.doh_server.unwrap_or(file.doh.server);
        if !(doh_server.starts_with("https://") || doh_server.starts_with("http://")) {
            return Err(RelayError::Config(format!(
                "DoH server must be an http(s) URL: {doh_server}"
            )));
        }

        let heartbeat_secs = overrides
            .heartbeat_interval
            .unwrap_or(file.server.heartbeat_interval);
        if heartbeat_secs == 0 {
            return Err(RelayError::Config("heartbeat interval must be > 0".into()));
        }

        let head_secs = overrides.head_timeout.unwrap_or(file.server.head_timeout);
        if head_secs == 0 {
            return Err(RelayError::Config("head timeout must be > 0".into()));
        }

        Ok(Self {
            port: overrides.port.unwrap_or(file.server.port),
            bind: overrides.bind.unwrap_or(file.server.bind),
            uuid,
            client_id,
            ws_path,
            web_username: overrides.web_username.unwrap_or(file.auth.web_username),
            web_password: overrides.web_password.unwrap_or(file.auth.web_password),
            page_auth: overrides.page_auth.unwrap_or(file.auth.page_auth),
            gate_auth: overrides.gate_auth.unwrap_or(file.auth.gate_auth),
            doh_server,
            doh_timeout: Duration::from_secs(overrides.doh_timeout.unwrap_or(file.doh.timeout)),
            connect_timeout: Duration::from_secs(
                overrides.connect_timeout.unwrap_or(file.server.connect_timeout),
            ),
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
            shutdown_timeout: Duration::from_secs(
                overrides.shutdown_timeout.unwrap_or(file.server.shutdown_timeout),
            ),
            head_timeout: Duration::from_secs(head_secs),
            address_table,
            link_scheme: overrides.link_scheme.unwrap_or(file.protocol.link_scheme),
            agent_command: overrides
                .agent_command
                .or(file.server.agent_command)
                .filter(|cmd| !cmd.trim().is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_stock_deployment() {
        let cfg = RelayConfig::resolve(ConfigFile::default(), ConfigOverrides::default()).unwrap();
        assert_eq!(cfg.port, 7860);
        assert_eq!(cfg.ws_path, "/37a0bd7c8b9f46938916bd1e2da0a817");
        assert_eq!(cfg.uuid, "37a0bd7c-8b9f-4693-8916-bd1e2da0a817");
        assert_eq!(cfg.web_username, "admin");
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(cfg.head_timeout, Duration::from_secs(10));
        assert_eq!(cfg.address_table, AddressTypeTable::SOCKS);
        assert!(cfg.page_auth);
        assert!(!cfg.gate_auth);
        assert!(cfg.agent_command.is_none());
    }

    #[test]
    fn overrides_win_over_file() {
        let file: ConfigFile = toml::from_str(
            r#"
            [server]
            port = 9000
            ws_path = "tunnel"

            [auth]
            uuid = "00000000-0000-0000-0000-000000000001"

            [doh]
            server = "https://cloudflare-dns.com/dns-query"
            timeout = 3

            [protocol]
            atyp_mapping = "compact"
            "#,
        )
        .unwrap();
        let overrides = ConfigOverrides {
            port: Some(8080),
            gate_auth: Some(true),
            ..Default::default()
        };
        let cfg = RelayConfig::resolve(file, overrides).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.ws_path, "/tunnel");
        assert_eq!(cfg.client_id.simple(), "00000000000000000000000000000001");
        assert_eq!(cfg.doh_server, "https://cloudflare-dns.com/dns-query");
        assert_eq!(cfg.doh_timeout, Duration::from_secs(3));
        assert_eq!(cfg.address_table, AddressTypeTable::COMPACT);
        assert!(cfg.gate_auth);
    }

    #[test]
    fn invalid_values_rejected() {
        let bad_uuid = ConfigOverrides {
            uuid: Some("nope".into()),
            ..Default::default()
        };
        assert!(RelayConfig::resolve(ConfigFile::default(), bad_uuid).is_err());

        let bad_table = ConfigOverrides {
            atyp_mapping: Some("weird".into()),
            ..Default::default()
        };
        assert!(RelayConfig::resolve(ConfigFile::default(), bad_table).is_err());

        let bad_doh = ConfigOverrides {
            doh_server: Some("dns.google".into()),
            ..Default::default()
        };
        assert!(RelayConfig::resolve(ConfigFile::default(), bad_doh).is_err());

        let zero_heartbeat = ConfigOverrides {
            heartbeat_interval: Some(0),
            ..Default::default()
        };
        assert!(RelayConfig::resolve(ConfigFile::default(), zero_heartbeat).is_err());

        let zero_head_timeout = ConfigOverrides {
            head_timeout: Some(0),
            ..Default::default()
        };
        assert!(RelayConfig::resolve(ConfigFile::default(), zero_head_timeout).is_err());
    }

    #[test]
    fn head_timeout_from_file_and_override() {
        let file: ConfigFile = toml::from_str("[server]\nhead_timeout = 4\n").unwrap();
        let cfg = RelayConfig::resolve(file.clone(), ConfigOverrides::default()).unwrap();
        assert_eq!(cfg.head_timeout, Duration::from_secs(4));

        let overrides = ConfigOverrides {
            head_timeout: Some(2),
            ..Default::default()
        };
        let cfg = RelayConfig::resolve(file, overrides).unwrap();
        assert_eq!(cfg.head_timeout, Duration::from_secs(2));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let cfg = RelayConfig::load(
            Some(Path::new("/nonexistent/relay.toml")),
            ConfigOverrides::default(),
        )
        .unwrap();
        assert_eq!(cfg.port, 7860);
    }

    #[test]
    fn blank_agent_command_is_ignored() {
        let overrides = ConfigOverrides {
            agent_command: Some("   ".into()),
            ..Default::default()
        };
        let cfg = RelayConfig::resolve(ConfigFile::default(), overrides).unwrap();
        assert!(cfg.agent_command.is_none());
    }
}
