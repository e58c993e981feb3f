//! Best-effort step outcomes and panic payload formatting.
//!
//! Teardown steps never fail the shutdown sequence. Each one reports a
//! [`BestEffort`] instead of a `Result`, so the signature itself says the
//! caller keeps going no matter what happened.

use std::any::Any;
use std::fmt;

/// Outcome of a step that must not block progress.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BestEffort {
    /// The step completed as intended.
    Done,
    /// The step went wrong; the failure was logged and the sequence continued.
    Recovered { reason: String },
}

impl BestEffort {
    pub fn recovered(reason: impl Into<String>) -> Self {
        Self::Recovered {
            reason: reason.into(),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for BestEffort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done => f.write_str("done"),
            Self::Recovered { reason } => write!(f, "recovered: {reason}"),
        }
    }
}

/// Render a panic payload from `JoinError::into_panic` or `catch_unwind`.
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
