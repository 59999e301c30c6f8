//! Error types for the backup tracker
//!
//! Every fatal condition surfaced to the enclosing backup framework is one of
//! these variants. Conflicts and not-found responses from the API server stay
//! wrapped in [`Error::KubeError`] and are recognised with [`Error::is_conflict`]
//! and [`Error::is_not_found`].

use std::time::Duration;

use thiserror::Error;

use crate::controller::WatchedKind;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Discovery error: {0}")]
    DiscoveryError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// A watched job reported a terminal failure; it will not self-heal.
    #[error("{kind} {name} reported phase {phase}{}", detail_suffix(.message))]
    BackupJobFailed {
        kind: WatchedKind,
        name: String,
        phase: String,
        message: Option<String>,
    },

    #[error("timed out after {timeout:?} waiting for {operation} (last state at {observed_at}: {last_state})")]
    PollTimeout {
        operation: String,
        timeout: Duration,
        last_state: String,
        observed_at: String,
    },

    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },
}

impl Error {
    /// True for an optimistic-concurrency conflict (HTTP 409) from the API server
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::KubeError(kube::Error::Api(e)) if e.code == 409)
    }

    /// True when the API server answered 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::KubeError(kube::Error::Api(e)) if e.code == 404)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

fn detail_suffix(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|m| format!(": {m}"))
        .unwrap_or_default()
}

#[cfg(test)]
pub(crate) fn api_error(code: u16, reason: &str) -> Error {
    Error::KubeError(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("simulated {reason}"),
        reason: reason.to_string(),
        code,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_detection() {
        assert!(api_error(409, "Conflict").is_conflict());
        assert!(!api_error(404, "NotFound").is_conflict());
        assert!(!Error::ConfigError("x".to_string()).is_conflict());
    }

    #[test]
    fn test_not_found_detection() {
        assert!(api_error(404, "NotFound").is_not_found());
        assert!(!api_error(500, "InternalError").is_not_found());
    }

    #[test]
    fn test_job_failure_message() {
        let err = Error::BackupJobFailed {
            kind: WatchedKind::DataUpload,
            name: "nightly-x7k2p".to_string(),
            phase: "Failed".to_string(),
            message: Some("node agent restarted".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "DataUpload nightly-x7k2p reported phase Failed: node agent restarted"
        );
    }
}
