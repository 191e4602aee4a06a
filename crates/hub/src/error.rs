//! Named failures of the administrative operations (profile save, cycle
//! start/stop, calibration updates).
//!
//! Everything else that can go wrong at runtime degrades to a value instead
//! (`None` readings, no active stage, deferred ticks) and never reaches this
//! type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("profile '{0}' not found")]
    ProfileNotFound(String),

    #[error("profile catalog is full ({capacity} profiles)")]
    CapacityExceeded { capacity: usize },

    #[error("invalid calibration: {0}")]
    InvalidCalibration(String),

    #[error("invalid profile: {0}")]
    InvalidProfile(String),

    #[error("system clock is not synchronized yet")]
    ClockNotSynchronized,

    /// The durability commit failed; in-memory state was left untouched.
    #[error("persistence failed: {0:#}")]
    Persistence(#[from] anyhow::Error),
}

impl AdminError {
    /// Short machine-readable code used in API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ProfileNotFound(_) => "profile_not_found",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::InvalidCalibration(_) => "invalid_calibration",
            Self::InvalidProfile(_) => "invalid_profile",
            Self::ClockNotSynchronized => "clock_not_synchronized",
            Self::Persistence(_) => "persistence_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_profile() {
        let err = AdminError::ProfileNotFound("basil".into());
        assert_eq!(err.to_string(), "profile 'basil' not found");
        assert_eq!(err.code(), "profile_not_found");
    }

    #[test]
    fn persistence_keeps_context_chain() {
        let inner = anyhow::anyhow!("disk full").context("commit_catalog failed");
        let err = AdminError::from(inner);
        let msg = err.to_string();
        assert!(msg.contains("commit_catalog failed"), "got: {msg}");
        assert!(msg.contains("disk full"), "got: {msg}");
    }
}
