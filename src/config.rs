// Configuration management for the device router
// Supports CLI arguments, config file (TOML), and environment variables

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

use crate::error::RouterError;
use crate::routes::parser::PROC_NET_ROUTE;

/// Device router - transparent TCP proxy that picks the egress interface per destination
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "device-router")]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Transparent proxy listen address
    #[arg(short = 'L', long, env = "DR_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Status endpoint listen address
    #[arg(long, env = "DR_STATUS_LISTEN")]
    pub status_listen: Option<SocketAddr>,

    /// Disable the status endpoint
    #[arg(long, env = "DR_NO_STATUS")]
    pub no_status: bool,

    /// Logging level (error, warn, info, debug, trace)
    #[arg(short, long, env = "DR_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Path to configuration file
    #[arg(short, long, env = "DR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Per-device connect timeout in milliseconds
    #[arg(long, env = "DR_CONNECT_TIMEOUT_MS")]
    pub connect_timeout_ms: Option<u64>,

    /// Default-route device refresh interval in milliseconds (0 disables)
    #[arg(long, env = "DR_DEVICE_REFRESH_MS")]
    pub device_refresh_ms: Option<u64>,

    /// Preferred devices in dial order, `*` for all others (repeatable)
    #[arg(short = 'd', long = "device", env = "DR_DEVICES", value_delimiter = ',')]
    pub devices: Vec<String>,
}

/// Configuration file structure (TOML format)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub status: StatusConfig,

    #[serde(default)]
    pub dial: DialConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Host or address -> device it must always use
    #[serde(default)]
    pub fixed: BTreeMap<String, String>,

    /// Host or address -> IPv4 address to connect to instead
    #[serde(default)]
    pub redirect: BTreeMap<String, Ipv4Addr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Address the intercepted connections arrive on
    #[serde(default = "default_proxy_listen")]
    pub listen: SocketAddr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_status_listen")]
    pub listen: SocketAddr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// 0 keeps the startup device list forever
    #[serde(default = "default_device_refresh_ms")]
    pub device_refresh_ms: u64,

    #[serde(default)]
    pub preferred_devices: Vec<String>,

    #[serde(default = "default_route_table")]
    pub route_table: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_proxy_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3129))
}
fn default_status_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3130))
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_device_refresh_ms() -> u64 {
    10_000
}
fn default_route_table() -> PathBuf {
    PathBuf::from(PROC_NET_ROUTE)
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            listen: default_proxy_listen(),
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        StatusConfig {
            enabled: default_true(),
            listen: default_status_listen(),
        }
    }
}

impl Default for DialConfig {
    fn default() -> Self {
        DialConfig {
            connect_timeout_ms: default_connect_timeout_ms(),
            device_refresh_ms: default_device_refresh_ms(),
            preferred_devices: Vec::new(),
            route_table: default_route_table(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

/// Merged configuration from all sources, built once in `main` and handed
/// to the components that need it
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub status_enabled: bool,
    pub status_listen: SocketAddr,
    pub log_level: Level,
    pub connect_timeout: Duration,
    pub device_refresh: Duration,
    pub preferred_devices: Vec<String>,
    pub route_table: PathBuf,
    pub fixed: BTreeMap<String, String>,
    pub redirect: BTreeMap<String, Ipv4Addr>,
}

impl Config {
    /// Load configuration from all sources (CLI args, config file, defaults)
    /// Priority: CLI args > Config file > Defaults
    pub fn load() -> anyhow::Result<Self> {
        let cli_args = CliArgs::parse();

        let config_file = if let Some(config_path) = &cli_args.config {
            read_config_file(config_path)?
        } else {
            // Try loading from default locations
            let default_paths = [PathBuf::from("device-router.toml"), PathBuf::from("config.toml")];

            let mut loaded_config = None;
            for path in default_paths {
                if path.exists() {
                    loaded_config = Some(read_config_file(&path)?);
                    break;
                }
            }

            loaded_config.unwrap_or_default()
        };

        Ok(Self::merge(cli_args, config_file)?)
    }

    /// Overlay CLI arguments on the config file
    pub fn merge(cli_args: CliArgs, config_file: ConfigFile) -> Result<Self, RouterError> {
        let log_level = parse_log_level(cli_args.log_level.as_deref().unwrap_or(&config_file.logging.level))?;

        let preferred_devices = if cli_args.devices.is_empty() {
            config_file.dial.preferred_devices
        } else {
            cli_args.devices
        };

        let connect_timeout_ms = cli_args
            .connect_timeout_ms
            .unwrap_or(config_file.dial.connect_timeout_ms);
        if connect_timeout_ms == 0 {
            return Err(RouterError::Config("connect timeout must be positive".to_string()));
        }

        Ok(Config {
            listen: cli_args.listen.unwrap_or(config_file.proxy.listen),
            status_enabled: !cli_args.no_status && config_file.status.enabled,
            status_listen: cli_args.status_listen.unwrap_or(config_file.status.listen),
            log_level,
            connect_timeout: Duration::from_millis(connect_timeout_ms),
            device_refresh: Duration::from_millis(
                cli_args
                    .device_refresh_ms
                    .unwrap_or(config_file.dial.device_refresh_ms),
            ),
            preferred_devices,
            route_table: config_file.dial.route_table,
            fixed: config_file.fixed,
            redirect: config_file.redirect,
        })
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile, RouterError> {
    tracing::info!("Loading configuration from: {}", path.display());
    let config_content = std::fs::read_to_string(path)?;
    toml::from_str::<ConfigFile>(&config_content)
        .map_err(|e| RouterError::Config(format!("{}: {}", path.display(), e)))
}

fn parse_log_level(level_str: &str) -> Result<Level, RouterError> {
    match level_str.to_lowercase().as_str() {
        "error" => Ok(Level::ERROR),
        "warn" => Ok(Level::WARN),
        "info" => Ok(Level::INFO),
        "debug" => Ok(Level::DEBUG),
        "trace" => Ok(Level::TRACE),
        _ => Err(RouterError::Config(format!("Invalid log level: {}", level_str))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[proxy]
listen = "0.0.0.0:3129"

[status]
enabled = false

[dial]
connect_timeout_ms = 1500
device_refresh_ms = 0
preferred_devices = ["eth0", "*", "wlan0"]

[logging]
level = "debug"

[fixed]
"10.17.0.1" = "tun0"
"intranet.example" = "tun0"

[redirect]
"ads.example" = "127.0.0.1"
"#;

    #[test]
    fn test_default_config() {
        let config = Config::merge(CliArgs::default(), ConfigFile::default()).unwrap();
        assert_eq!(config.listen, "127.0.0.1:3129".parse().unwrap());
        assert!(config.status_enabled);
        assert_eq!(config.connect_timeout, Duration::from_millis(5000));
        assert_eq!(config.device_refresh, Duration::from_millis(10_000));
        assert_eq!(config.route_table, PathBuf::from("/proc/net/route"));
        assert!(config.preferred_devices.is_empty());
    }

    #[test]
    fn test_parse_config_file() {
        let file: ConfigFile = toml::from_str(SAMPLE).unwrap();
        let config = Config::merge(CliArgs::default(), file).unwrap();

        assert_eq!(config.listen, "0.0.0.0:3129".parse().unwrap());
        assert!(!config.status_enabled);
        assert_eq!(config.connect_timeout, Duration::from_millis(1500));
        assert!(config.device_refresh.is_zero());
        assert_eq!(config.preferred_devices, vec!["eth0", "*", "wlan0"]);
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.fixed.get("intranet.example").map(String::as_str), Some("tun0"));
        assert_eq!(config.redirect.get("ads.example"), Some(&Ipv4Addr::new(127, 0, 0, 1)));
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: ConfigFile = toml::from_str(SAMPLE).unwrap();
        let cli = CliArgs {
            devices: vec!["tun0".to_string()],
            connect_timeout_ms: Some(250),
            log_level: Some("warn".to_string()),
            ..CliArgs::default()
        };
        let config = Config::merge(cli, file).unwrap();

        assert_eq!(config.preferred_devices, vec!["tun0"]);
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.log_level, Level::WARN);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let cli = CliArgs {
            connect_timeout_ms: Some(0),
            ..CliArgs::default()
        };
        assert!(matches!(
            Config::merge(cli, ConfigFile::default()),
            Err(RouterError::Config(_))
        ));
    }

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("info"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("DEBUG"), Ok(Level::DEBUG)));
        assert!(parse_log_level("invalid").is_err());
    }
}
