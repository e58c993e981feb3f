#![deny(unsafe_code)]

//! Configuration loading and validation for the VPNHT helper service.
//!
//! Loads TOML configuration files and validates them. [`ServiceConfig`] is
//! built once at startup, adjusted by command-line overrides, and then frozen
//! behind an `Arc` for the lifetime of the process. Nothing reads process-wide
//! mutable state; every component that needs a setting receives the config.

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level service configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Process-level settings.
    #[serde(default)]
    pub service: ServiceSection,

    /// Control API transport.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Request server limits.
    #[serde(default)]
    pub server: ServerConfig,

    /// Shutdown grace windows.
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Background server pinger.
    #[serde(default)]
    pub ping: PingConfig,

    /// Authentication bootstrap.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Process-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSection {
    /// Development mode. Only affects collaborators (log verbosity, pinger
    /// targets), never the lifecycle itself.
    #[serde(default)]
    pub development: bool,

    /// PID file used to refuse a second instance.
    #[serde(default = "default_pid_file")]
    pub pid_file: String,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            development: false,
            pid_file: default_pid_file(),
        }
    }
}

fn default_pid_file() -> String {
    "/var/run/vpnht.pid".to_string()
}

/// Which transport the control API listens on.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Domain socket where the platform has one, loopback TCP otherwise.
    #[default]
    Auto,
    /// Always a Unix domain socket. Rejected on non-Unix targets.
    Unix,
    /// Always loopback TCP.
    Tcp,
}

impl std::str::FromStr for TransportMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "unix" => Ok(Self::Unix),
            "tcp" => Ok(Self::Tcp),
            other => Err(ConfigError::Validation(format!(
                "transport mode must be one of \"auto\", \"unix\", \"tcp\", got {other:?}"
            ))),
        }
    }
}

/// Control API transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub mode: TransportMode,

    /// Well-known domain socket path.
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Permission bits applied to the socket file after bind.
    #[serde(default = "default_socket_mode")]
    pub socket_mode: u32,

    /// Loopback address for the TCP transport.
    #[serde(default = "default_tcp_addr")]
    pub tcp_addr: String,

    /// TCP port. `0` asks the OS for an ephemeral port.
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::default(),
            socket_path: default_socket_path(),
            socket_mode: default_socket_mode(),
            tcp_addr: default_tcp_addr(),
            tcp_port: default_tcp_port(),
        }
    }
}

fn default_socket_path() -> String {
    "/var/run/vpnht.sock".to_string()
}

fn default_socket_mode() -> u32 {
    0o777
}

fn default_tcp_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_tcp_port() -> u16 {
    9770
}

/// Request server limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Deadline for reading a request's headers.
    #[serde(default = "default_io_timeout_secs")]
    pub read_timeout_secs: u64,

    /// Deadline for producing a response.
    #[serde(default = "default_io_timeout_secs")]
    pub write_timeout_secs: u64,

    /// Upper bound on request line plus headers, in bytes.
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            read_timeout_secs: default_io_timeout_secs(),
            write_timeout_secs: default_io_timeout_secs(),
            max_header_bytes: default_max_header_bytes(),
        }
    }
}

impl ServerConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

fn default_io_timeout_secs() -> u64 {
    30
}

fn default_max_header_bytes() -> usize {
    4096
}

/// What happens to the background ticker at shutdown.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickerPolicy {
    /// Cancel the ticker and join it before tearing down the server.
    #[default]
    Cancel,
    /// Leave the ticker running until the process exits.
    Detach,
}

/// Shutdown grace windows, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// How long in-flight requests may run before connections are forced closed.
    #[serde(default = "default_server_window_ms")]
    pub server_window_ms: u64,

    /// Pause after the endpoint artifact is removed.
    #[serde(default = "default_endpoint_grace_ms")]
    pub endpoint_grace_ms: u64,

    /// Pause after every session was asked to stop.
    #[serde(default = "default_session_grace_ms")]
    pub session_grace_ms: u64,

    /// Upper bound on joining a cancelled ticker. Must fit inside the
    /// server window.
    #[serde(default = "default_ticker_join_ms")]
    pub ticker_join_ms: u64,

    #[serde(default)]
    pub ticker_policy: TickerPolicy,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            server_window_ms: default_server_window_ms(),
            endpoint_grace_ms: default_endpoint_grace_ms(),
            session_grace_ms: default_session_grace_ms(),
            ticker_join_ms: default_ticker_join_ms(),
            ticker_policy: TickerPolicy::default(),
        }
    }
}

impl ShutdownConfig {
    pub fn server_window(&self) -> Duration {
        Duration::from_millis(self.server_window_ms)
    }

    pub fn endpoint_grace(&self) -> Duration {
        Duration::from_millis(self.endpoint_grace_ms)
    }

    pub fn session_grace(&self) -> Duration {
        Duration::from_millis(self.session_grace_ms)
    }

    pub fn ticker_join(&self) -> Duration {
        Duration::from_millis(self.ticker_join_ms)
    }

    /// Worst-case time spent in fixed windows, excluding session stop work.
    /// The ticker join overlaps the server window.
    pub fn total_budget(&self) -> Duration {
        self.server_window() + self.endpoint_grace() + self.session_grace()
    }
}

fn default_server_window_ms() -> u64 {
    1000
}

fn default_endpoint_grace_ms() -> u64 {
    250
}

fn default_session_grace_ms() -> u64 {
    750
}

fn default_ticker_join_ms() -> u64 {
    500
}

/// Background pinger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingConfig {
    /// Seconds between ping rounds.
    #[serde(default = "default_ping_interval_secs")]
    pub interval_secs: u64,

    /// Per-request timeout in seconds.
    #[serde(default = "default_ping_timeout_secs")]
    pub timeout_secs: u64,

    /// URLs to ping each round. Empty means the pinger idles.
    #[serde(default)]
    pub targets: Vec<String>,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_ping_interval_secs(),
            timeout_secs: default_ping_timeout_secs(),
            targets: Vec::new(),
        }
    }
}

impl PingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_ping_interval_secs() -> u64 {
    300
}

fn default_ping_timeout_secs() -> u64 {
    5
}

/// Authentication bootstrap configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// File holding the control API token, created on first start.
    #[serde(default = "default_token_path")]
    pub token_path: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_path: default_token_path(),
        }
    }
}

fn default_token_path() -> String {
    "/var/lib/vpnht/auth.token".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ServiceConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        tracing::debug!(path = %path.display(), "Loaded config file");
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Log level to use when `RUST_LOG` is not set.
    pub fn effective_log_level(&self) -> &str {
        if self.service.development && self.logging.level == default_log_level() {
            "debug"
        } else {
            &self.logging.level
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.pid_file.is_empty() {
            return Err(ConfigError::Validation(
                "service.pid_file must not be empty".to_string(),
            ));
        }

        if self.transport.mode == TransportMode::Unix && !cfg!(unix) {
            return Err(ConfigError::Validation(
                "transport.mode \"unix\" is not available on this platform".to_string(),
            ));
        }
        if self.transport.socket_path.is_empty() {
            return Err(ConfigError::Validation(
                "transport.socket_path must not be empty".to_string(),
            ));
        }
        if self.transport.socket_mode > 0o777 {
            return Err(ConfigError::Validation(format!(
                "transport.socket_mode must be a permission mask, got {:#o}",
                self.transport.socket_mode
            )));
        }
        match self.transport.tcp_addr.parse::<IpAddr>() {
            Ok(ip) if ip.is_loopback() => {}
            Ok(ip) => {
                return Err(ConfigError::Validation(format!(
                    "transport.tcp_addr must be a loopback address, got {ip}"
                )));
            }
            Err(_) => {
                return Err(ConfigError::Validation(format!(
                    "transport.tcp_addr is not an IP address: {:?}",
                    self.transport.tcp_addr
                )));
            }
        }

        if self.server.read_timeout_secs == 0 || self.server.write_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "server timeouts must be non-zero".to_string(),
            ));
        }
        if self.server.max_header_bytes == 0 {
            return Err(ConfigError::Validation(
                "server.max_header_bytes must be non-zero".to_string(),
            ));
        }

        if self.shutdown.ticker_join_ms > self.shutdown.server_window_ms {
            return Err(ConfigError::Validation(format!(
                "shutdown.ticker_join_ms ({}) must not exceed shutdown.server_window_ms ({})",
                self.shutdown.ticker_join_ms, self.shutdown.server_window_ms
            )));
        }

        if self.ping.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "ping.interval_secs must be non-zero".to_string(),
            ));
        }
        for (i, target) in self.ping.targets.iter().enumerate() {
            if !(target.starts_with("http://") || target.starts_with("https://")) {
                return Err(ConfigError::Validation(format!(
                    "ping.targets[{i}] must be an http(s) URL, got {target:?}"
                )));
            }
        }

        if self.auth.token_path.is_empty() {
            return Err(ConfigError::Validation(
                "auth.token_path must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
