//! Fuzz target for the service configuration parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_config_parser
//!
//! Feeds arbitrary UTF-8 to `ServiceConfig::parse()`. Anything that parses
//! has passed validation, so the derived durations must be computable
//! without overflow.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(config) = vpnht_config::ServiceConfig::parse(s) {
            let _ = config.shutdown.total_budget();
            let _ = config.server.read_timeout();
            let _ = config.ping.interval();
            let _ = config.effective_log_level();
        }
    }
});
