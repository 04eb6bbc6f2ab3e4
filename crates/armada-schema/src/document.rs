use crate::types::{DocumentName, ResourceName};
use serde::{Deserialize, Serialize};

pub const MANIFEST_SCHEMA: &str = "armada/Manifest/v1";
pub const CHART_GROUP_SCHEMA: &str = "armada/ChartGroup/v1";
pub const CHART_SCHEMA: &str = "armada/Chart/v1";

/// The document kinds this crate routes; anything else in a stream is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Manifest,
    ChartGroup,
    Chart,
}

impl DocumentKind {
    pub fn from_schema(schema: &str) -> Option<Self> {
        match schema {
            MANIFEST_SCHEMA => Some(Self::Manifest),
            CHART_GROUP_SCHEMA => Some(Self::ChartGroup),
            CHART_SCHEMA => Some(Self::Chart),
            _ => None,
        }
    }

    pub fn schema(self) -> &'static str {
        match self {
            Self::Manifest => MANIFEST_SCHEMA,
            Self::ChartGroup => CHART_GROUP_SCHEMA,
            Self::Chart => CHART_SCHEMA,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Metadata {
    #[serde(default)]
    pub name: DocumentName,
}

/// The header decoded from every document before routing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocumentHeader {
    #[serde(default)]
    pub schema: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl DocumentHeader {
    pub fn kind(&self) -> Option<DocumentKind> {
        DocumentKind::from_schema(&self.schema)
    }
}

/// A routed document: header fields plus its typed `data` payload.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(bound(deserialize = "T: Deserialize<'de> + Default"))]
pub struct Document<T> {
    #[serde(default)]
    pub schema: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub data: T,
}

impl<T> Document<T> {
    pub fn name(&self) -> &DocumentName {
        &self.metadata.name
    }
}

pub type Manifest = Document<ManifestData>;
pub type ChartGroup = Document<ChartGroupData>;
pub type Chart = Document<ChartSpec>;

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ManifestData {
    #[serde(default)]
    pub chart_groups: Vec<DocumentName>,
    #[serde(default)]
    pub release_prefix: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ChartGroupData {
    #[serde(default)]
    pub chart_group: Vec<DocumentName>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub sequenced: bool,
}

/// Deployment specification of a chart.
///
/// Only the fields the orchestrator reads are typed; everything else is kept
/// in `extra` and handed to the cluster resource untouched.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ChartSpec {
    #[serde(default)]
    pub release: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<ChartWait>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ChartWait {
    /// Readiness timeout in seconds; 0 waits without a deadline.
    #[serde(default)]
    pub timeout: u64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ChartSpec {
    pub fn wait_timeout_secs(&self) -> u64 {
        self.wait.as_ref().map_or(0, |w| w.timeout)
    }

    /// The spec as the JSON payload of the cluster resource.
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

impl Manifest {
    pub fn resource_name(&self, chart: &Chart) -> ResourceName {
        ResourceName::derive(&self.data.release_prefix, &chart.data.release)
    }
}
