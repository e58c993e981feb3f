//! Build-time metadata embedded by the build script.

/// `git describe` output at build time, or the packager-provided hash.
pub const GIT_HASH: &str = env!("VPNHT_GIT_HASH");

/// Seconds since the Unix epoch when the crate was built.
pub const BUILD_TIMESTAMP: &str = env!("VPNHT_BUILD_TIMESTAMP");

/// Cargo profile (`debug` or `release`).
pub const BUILD_PROFILE: &str = env!("VPNHT_BUILD_PROFILE");

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// `"0.1.0 (abc1234, release)"`
pub fn version_string() -> String {
    format!("{VERSION} ({GIT_HASH}, {BUILD_PROFILE})")
}

/// True when the binary was built from a tree with uncommitted changes.
pub fn is_dirty() -> bool {
    GIT_HASH.ends_with("-dirty")
}
