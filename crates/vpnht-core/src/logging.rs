//! Log sink initialization.
//!
//! `RUST_LOG` always wins. Without it, each `-v` raises the level one step
//! above the configured one; with no `-v` the configured level is used, and
//! development mode turns the default `info` into `debug`.

use tracing_subscriber::EnvFilter;

use vpnht_config::ServiceConfig;

/// Filter directive used when `RUST_LOG` is not set.
pub fn default_directive(config: &ServiceConfig, verbose: u8) -> &str {
    match verbose {
        0 => config.effective_log_level(),
        1 => "debug",
        _ => "trace",
    }
}

/// Install the global `fmt` subscriber. Call once, before the daemon starts.
///
/// Returns an error if a global subscriber is already set.
pub fn init(
    config: &ServiceConfig,
    verbose: u8,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(config, verbose)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.service.development)
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_follows_config() {
        let mut config = ServiceConfig::default();
        assert_eq!(default_directive(&config, 0), "info");

        config.logging.level = "warn".to_string();
        assert_eq!(default_directive(&config, 0), "warn");
    }

    #[test]
    fn test_development_mode_raises_default() {
        let mut config = ServiceConfig::default();
        config.service.development = true;
        assert_eq!(default_directive(&config, 0), "debug");
    }

    #[test]
    fn test_verbosity_overrides_config() {
        let config = ServiceConfig::default();
        assert_eq!(default_directive(&config, 1), "debug");
        assert_eq!(default_directive(&config, 3), "trace");
    }
}
