//! Orchestration engine for Armada deployments.
//!
//! This crate ties the document model, cluster access and manifest sources
//! together into the `Engine`: it reconciles prerequisites (namespaces and the
//! ArmadaChart resource definition), walks chart groups in manifest order,
//! installs charts with optimistic-concurrency retry, and blocks on the
//! readiness wait engine until each chart's resources converge.

pub mod concurrency;
pub mod engine;
pub mod prereq;
pub mod readiness;
pub mod retry;
pub mod wait;

pub use concurrency::Shutdown;
pub use engine::{load_documents, ApplyReport, Engine, EngineOptions, InstallAction, InstallOutcome};
pub use prereq::{ensure_namespaces, ensure_resource_schema, load_resource_definition};
pub use readiness::{
    ArmadaChartReadiness, HasReadiness, Readiness, ReadinessRegistry, ReadinessState,
};
pub use retry::RetryPolicy;
pub use wait::{MinReady, WaitOutcome, WaitRequest, Waiter};

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to load manifests: {0}")]
    Load(#[from] armada_remote::RemoteError),
    #[error("manifest error: {0}")]
    Documents(#[from] armada_schema::DocumentError),
    #[error("prerequisite {what} failed: {source}")]
    Prerequisite {
        what: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("cluster error: {0}")]
    Cluster(#[from] armada_cluster::ClusterError),
    #[error("update of {name} kept conflicting after {attempts} attempts")]
    ConflictRetriesExhausted { name: String, attempts: u32 },
    #[error("timed out after {timeout:?} waiting for resources matching {selector}")]
    ReadinessTimeout { selector: String, timeout: Duration },
    #[error("resource {name}: got error event: {message}")]
    ReadinessObserved { name: String, message: String },
    #[error("invalid wait option: {0}")]
    InvalidOption(String),
    #[error("interrupted")]
    Interrupted,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    pub(crate) fn prerequisite(
        what: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Prerequisite {
            what: what.into(),
            source: Box::new(source),
        }
    }

    /// True when the run never touched the cluster because the documents
    /// could not be read or did not validate.
    pub fn is_manifest_error(&self) -> bool {
        matches!(self, Self::Load(_) | Self::Documents(_))
    }

    pub fn is_cluster_error(&self) -> bool {
        matches!(
            self,
            Self::Cluster(_)
                | Self::Prerequisite { .. }
                | Self::ConflictRetriesExhausted { .. }
                | Self::ReadinessTimeout { .. }
                | Self::ReadinessObserved { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_are_classified() {
        let doc = CoreError::from(armada_schema::DocumentError::NoManifest);
        assert!(doc.is_manifest_error());
        assert!(!doc.is_cluster_error());

        let timeout = CoreError::ReadinessTimeout {
            selector: "a=b".to_owned(),
            timeout: Duration::from_secs(3),
        };
        assert!(timeout.is_cluster_error());
        assert_eq!(
            timeout.to_string(),
            "timed out after 3s waiting for resources matching a=b"
        );
        assert!(!CoreError::Interrupted.is_cluster_error());
    }

    #[test]
    fn prerequisite_keeps_source() {
        let err = CoreError::prerequisite(
            "namespace ucp",
            armada_cluster::ClusterError::Http("connection refused".to_owned()),
        );
        assert_eq!(
            err.to_string(),
            "prerequisite namespace ucp failed: HTTP error: connection refused"
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}
