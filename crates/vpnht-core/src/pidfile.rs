//! Single-instance guard backed by a PID file.
//!
//! Consulted once at startup. A file naming a live process other than this
//! one refuses the start; a file naming a dead process is overwritten.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::outcome::BestEffort;

/// Errors from acquiring the PID file.
#[derive(Debug, thiserror::Error)]
pub enum PidFileError {
    #[error("another instance is already running (pid {pid}, recorded in {path})")]
    AlreadyRunning { pid: u32, path: PathBuf },

    #[error("PID file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A held PID file. Released explicitly at the end of shutdown.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Claim the PID file for this process.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, PidFileError> {
        let path = path.into();
        let io_err = |source| PidFileError::Io {
            path: path.clone(),
            source,
        };

        match fs::read_to_string(&path) {
            Ok(contents) => match contents.trim().parse::<u32>() {
                Ok(pid) if pid != std::process::id() && process_alive(pid) => {
                    return Err(PidFileError::AlreadyRunning {
                        pid,
                        path: path.clone(),
                    });
                }
                Ok(pid) => warn!(pid, path = %path.display(), "Replacing stale PID file"),
                Err(_) => warn!(path = %path.display(), "Replacing unreadable PID file"),
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(e)),
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(&path, format!("{}\n", std::process::id())).map_err(io_err)?;
        debug!(path = %path.display(), pid = std::process::id(), "PID file written");

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the PID file. A file already gone counts as done.
    pub fn release(self) -> BestEffort {
        match fs::remove_file(&self.path) {
            Ok(()) => BestEffort::Done,
            Err(e) if e.kind() == ErrorKind::NotFound => BestEffort::Done,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to remove PID file");
                BestEffort::recovered(format!("remove {}: {e}", self.path.display()))
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn process_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    false
}
