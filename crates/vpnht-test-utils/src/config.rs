//! Configuration builders for tests.
//!
//! Every path a test config points at lives inside a [`TestEnv`] temp
//! directory, and the grace windows are shortened so a full shutdown takes
//! milliseconds instead of seconds.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use vpnht_config::{ServiceConfig, TickerPolicy, TransportMode};

/// Fluent builder for [`ServiceConfig`] in tests.
///
/// # Example
///
/// ```ignore
/// let env = TestEnv::new();
/// let config = env.builder().tcp().server_window_ms(200).build();
/// ```
pub struct TestConfigBuilder {
    config: ServiceConfig,
}

impl TestConfigBuilder {
    /// Paths under `root`, ephemeral TCP port, short grace windows.
    pub fn new(root: &Path) -> Self {
        let mut config = ServiceConfig::default();
        config.service.pid_file = path_string(root.join("vpnht.pid"));
        config.transport.socket_path = path_string(root.join("vpnht.sock"));
        config.transport.tcp_port = 0;
        config.auth.token_path = path_string(root.join("auth.token"));
        config.shutdown.server_window_ms = 500;
        config.shutdown.endpoint_grace_ms = 20;
        config.shutdown.session_grace_ms = 20;
        config.shutdown.ticker_join_ms = 200;
        Self { config }
    }

    pub fn tcp(mut self) -> Self {
        self.config.transport.mode = TransportMode::Tcp;
        self
    }

    pub fn unix(mut self) -> Self {
        self.config.transport.mode = TransportMode::Unix;
        self
    }

    pub fn tcp_port(mut self, port: u16) -> Self {
        self.config.transport.tcp_port = port;
        self
    }

    pub fn server_window_ms(mut self, ms: u64) -> Self {
        self.config.shutdown.server_window_ms = ms;
        self
    }

    pub fn session_grace_ms(mut self, ms: u64) -> Self {
        self.config.shutdown.session_grace_ms = ms;
        self
    }

    pub fn ticker_policy(mut self, policy: TickerPolicy) -> Self {
        self.config.shutdown.ticker_policy = policy;
        self
    }

    /// Use the production grace windows (1 s, 250 ms, 750 ms).
    pub fn production_windows(mut self) -> Self {
        let defaults = vpnht_config::ShutdownConfig::default();
        self.config.shutdown.server_window_ms = defaults.server_window_ms;
        self.config.shutdown.endpoint_grace_ms = defaults.endpoint_grace_ms;
        self.config.shutdown.session_grace_ms = defaults.session_grace_ms;
        self.config.shutdown.ticker_join_ms = defaults.ticker_join_ms;
        self
    }

    pub fn build(self) -> ServiceConfig {
        self.config
    }

    pub fn build_arc(self) -> Arc<ServiceConfig> {
        Arc::new(self.config)
    }
}

/// A temp directory that outlives the service under test.
///
/// Dropped at the end of the test, removing everything the service wrote,
/// even on panic.
pub struct TestEnv {
    dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("failed to create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn builder(&self) -> TestConfigBuilder {
        TestConfigBuilder::new(self.dir.path())
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

fn path_string(path: PathBuf) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_paths_under_root() {
        let env = TestEnv::new();
        let config = env.builder().tcp().build();

        assert!(config.service.pid_file.starts_with(&path_string(env.path().to_path_buf())));
        assert_eq!(config.transport.mode, TransportMode::Tcp);
        assert_eq!(config.transport.tcp_port, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_production_windows() {
        let env = TestEnv::new();
        let config = env.builder().production_windows().build();
        assert_eq!(config.shutdown.total_budget().as_millis(), 2000);
    }
}
