#![deny(unsafe_code)]

//! Shared test utilities for the VPNHT workspace.
//!
//! Provides config builders rooted in a temp directory, fake collaborators
//! that record what the lifecycle did to them.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! vpnht-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod fixtures;

pub use config::{TestConfigBuilder, TestEnv};
pub use fixtures::{
    CountingTask, FakeCollaborators, RecordingSession, RecordingWatcher, StaticSessions,
    StopBehavior,
};
