//! Cluster API access for Armada.
//!
//! The orchestrator talks to the cluster only through the [`ClusterClient`]
//! trait: namespaces, the custom resource definition for charts, and generic
//! get/create/update/list/watch on namespaced resources. [`KubeClient`] speaks
//! the Kubernetes REST API over HTTP; [`MockCluster`] is an in-memory stand-in
//! used by tests across the workspace.

pub mod kube;
pub mod mock;
pub mod object;
pub mod resource;
pub mod selector;

pub use kube::{KubeClient, KubeConfig};
pub use mock::{ClusterCall, MockCluster, MockOp, WatchFeed};
pub use object::{ApiStatus, DynamicObject, ObjectList, ObjectMeta, StatusDetails, WatchEvent};
pub use resource::{
    ResourceType, ARMADA_CHART_KIND, ARMADA_CHART_PLURAL, ARMADA_GROUP, ARMADA_VERSION, CRD_NAME,
    RELEASE_LABEL,
};
pub use selector::LabelSelector;

use std::time::Duration;
use thiserror::Error;

/// Message fragment the API server uses for optimistic-concurrency rejections.
pub const CONFLICT_MESSAGE: &str = "the object has been modified";

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("cluster API error {code}: {message}")]
    Api { code: u16, message: String },
    #[error("resource version expired: {0}")]
    Gone(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("cluster I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("cluster config error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for ClusterError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl ClusterError {
    /// Classify a failed API response by status code and message.
    pub fn from_status(code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            404 => Self::NotFound(message),
            409 if message.contains(CONFLICT_MESSAGE) => Self::Conflict(message),
            409 => Self::AlreadyExists(message),
            410 => Self::Gone(message),
            _ => Self::Api { code, message },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Options for opening a watch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchParams {
    /// Resume point; events after this collection version are delivered.
    pub resource_version: Option<String>,
    /// Watch lifetime. Implementations end the stream once it elapses, even
    /// when the server keeps the connection open.
    pub timeout: Option<Duration>,
}

/// Stream of watch events. It ends when the server closes the watch; dropping
/// it tears the watch down.
pub type WatchStream = Box<dyn Iterator<Item = Result<WatchEvent, ClusterError>> + Send>;

/// Operations the orchestrator needs from a cluster.
pub trait ClusterClient: Send + Sync {
    /// Human-readable backend name for logs.
    fn name(&self) -> &str;

    fn get_namespace(&self, name: &str) -> Result<DynamicObject, ClusterError>;

    fn create_namespace(&self, name: &str) -> Result<DynamicObject, ClusterError>;

    fn get_crd(&self, name: &str) -> Result<DynamicObject, ClusterError>;

    /// Register a custom resource definition from its full JSON body.
    fn create_crd(&self, definition: &serde_json::Value) -> Result<DynamicObject, ClusterError>;

    fn get(
        &self,
        resource: &ResourceType,
        namespace: &str,
        name: &str,
    ) -> Result<DynamicObject, ClusterError>;

    fn create(
        &self,
        resource: &ResourceType,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError>;

    /// Replace an object. `metadata.resourceVersion` must carry the version
    /// last read, or the update fails with [`ClusterError::Conflict`].
    fn update(
        &self,
        resource: &ResourceType,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError>;

    fn list(
        &self,
        resource: &ResourceType,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<ObjectList, ClusterError>;

    fn watch(
        &self,
        resource: &ResourceType,
        namespace: &str,
        selector: &LabelSelector,
        params: &WatchParams,
    ) -> Result<WatchStream, ClusterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_classified() {
        assert!(ClusterError::from_status(404, "armadacharts \"x\" not found").is_not_found());
        assert!(ClusterError::from_status(
            409,
            "Operation cannot be fulfilled on armadacharts \"x\": the object has been modified; please apply your changes to the latest version and try again"
        )
        .is_conflict());
        assert!(matches!(
            ClusterError::from_status(409, "armadacharts \"x\" already exists"),
            ClusterError::AlreadyExists(_)
        ));
        assert!(matches!(
            ClusterError::from_status(410, "too old resource version"),
            ClusterError::Gone(_)
        ));
        assert!(matches!(
            ClusterError::from_status(403, "forbidden"),
            ClusterError::Api { code: 403, .. }
        ));
    }

    #[test]
    fn error_display() {
        let e = ClusterError::Api {
            code: 500,
            message: "etcd unavailable".to_owned(),
        };
        assert_eq!(e.to_string(), "cluster API error 500: etcd unavailable");
    }
}
