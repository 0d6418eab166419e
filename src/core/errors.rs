//! Crate-wide error type.
//!
//! Every variant carries a stable `[ACP-XXXX]` code for log correlation and
//! `is_retryable()` so callers (chiefly the daemon loop) can decide whether a
//! failure is transient or terminal without re-deriving that from a message
//! string.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AcpError>;

/// All error conditions the control plane can encounter.
#[derive(Debug, Error)]
pub enum AcpError {
    /// Configuration failed cross-field or per-field validation.
    #[error("[ACP-1001] invalid configuration: {details}")]
    InvalidConfig {
        /// Human-readable description of every violated rule.
        details: String,
    },

    /// A configured canonical SLO query string does not match the embedded
    /// canonical constant.
    #[error("[ACP-1002] configuration drift: {details}")]
    ConfigDrift {
        /// Which query drifted and what was expected vs. configured.
        details: String,
    },

    /// Filesystem I/O failed for a specific path.
    #[error("[ACP-1100] I/O error at {path}: {source}", path = path.display())]
    Io {
        /// The path the operation was attempted against.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// JSON (de)serialization failed.
    #[error("[ACP-1200] JSON error: {source}")]
    Json {
        /// Underlying serde_json error.
        #[source]
        source: serde_json::Error,
    },

    /// TOML deserialization failed.
    #[error("[ACP-1201] TOML error: {source}")]
    Toml {
        /// Underlying toml error.
        #[source]
        source: toml::de::Error,
    },

    /// The structured event log could not be written to any of its
    /// degradation tiers.
    #[error("[ACP-1300] event log error: {details}")]
    EventLog {
        /// What went wrong while writing the event log.
        details: String,
    },

    /// A subsystem callback (`guard_mode_setter` / `pdf_backpressure_setter`)
    /// failed or timed out.
    #[error("[ACP-1400] callback failure for subsystem '{subsystem_id}': {details}")]
    CallbackFailure {
        /// Which subsystem's callback failed.
        subsystem_id: String,
        /// Failure or timeout description.
        details: String,
    },

    /// An unhandled internal fault during tick evaluation. Caught exactly
    /// once, at the public `tick` boundary, and converted into a transition
    /// to `FAILSAFE`.
    #[error("[ACP-1900] internal decision error: {details}")]
    Internal {
        /// Description of the fault (propagated into `failsafe_reason`).
        details: String,
    },
}

impl AcpError {
    /// Stable short code for log correlation, independent of message text.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "ACP-1001",
            Self::ConfigDrift { .. } => "ACP-1002",
            Self::Io { .. } => "ACP-1100",
            Self::Json { .. } => "ACP-1200",
            Self::Toml { .. } => "ACP-1201",
            Self::EventLog { .. } => "ACP-1300",
            Self::CallbackFailure { .. } => "ACP-1400",
            Self::Internal { .. } => "ACP-1900",
        }
    }

    /// Whether a caller should treat this as transient (retry later) rather
    /// than terminal.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::EventLog { .. } | Self::CallbackFailure { .. }
        )
    }

    /// Build an [`AcpError::Io`] tagging the offending path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for AcpError {
    fn from(source: serde_json::Error) -> Self {
        Self::Json { source }
    }
}

impl From<toml::de::Error> for AcpError {
    fn from(source: toml::de::Error) -> Self {
        Self::Toml { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_and_unique() {
        let errs = [
            AcpError::InvalidConfig {
                details: String::new(),
            },
            AcpError::ConfigDrift {
                details: String::new(),
            },
            AcpError::io("/tmp/x", io::Error::other("boom")),
            AcpError::EventLog {
                details: String::new(),
            },
            AcpError::CallbackFailure {
                subsystem_id: "guard".into(),
                details: String::new(),
            },
            AcpError::Internal {
                details: String::new(),
            },
        ];
        let mut codes: Vec<&str> = errs.iter().map(AcpError::code).collect();
        let before = codes.len();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), before, "duplicate error codes");
    }

    #[test]
    fn io_errors_are_retryable_config_errors_are_not() {
        assert!(AcpError::io("/tmp/x", io::Error::other("boom")).is_retryable());
        assert!(
            !AcpError::InvalidConfig {
                details: "bad".into()
            }
            .is_retryable()
        );
        assert!(
            !AcpError::ConfigDrift {
                details: "bad".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn internal_error_message_carries_details_for_failsafe_reason() {
        let err = AcpError::Internal {
            details: "boom".into(),
        };
        assert!(err.to_string().contains("boom"));
        assert_eq!(err.code(), "ACP-1900");
    }
}
