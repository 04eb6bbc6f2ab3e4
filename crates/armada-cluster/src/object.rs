//! Wire model for cluster objects, lists and watch events.

use crate::ClusterError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An object of any kind; `spec`, `status` and the rest of the body live in
/// `data` so nothing is lost when the object is sent back to the cluster.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DynamicObject {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl DynamicObject {
    pub fn new(api_version: &str, kind: &str, name: &str, namespace: &str) -> Self {
        Self {
            api_version: api_version.to_owned(),
            kind: kind.to_owned(),
            metadata: ObjectMeta {
                name: name.to_owned(),
                namespace: Some(namespace.to_owned()),
                ..ObjectMeta::default()
            },
            data: Map::new(),
        }
    }

    #[must_use]
    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.metadata
            .labels
            .insert(key.to_owned(), value.to_owned());
        self
    }

    #[must_use]
    pub fn with_spec(mut self, spec: Value) -> Self {
        self.data.insert("spec".to_owned(), spec);
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.metadata.resource_version.as_deref()
    }

    pub fn spec(&self) -> Option<&Value> {
        self.data.get("spec")
    }

    pub fn status(&self) -> Option<&Value> {
        self.data.get("status")
    }

    pub fn set_status(&mut self, status: Value) {
        self.data.insert("status".to_owned(), status);
    }
}

/// Result of a list call: the items plus the collection version a watch can
/// resume from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectList {
    pub resource_version: String,
    pub items: Vec<DynamicObject>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawList {
    #[serde(default)]
    pub metadata: ListMeta,
    #[serde(default)]
    pub items: Vec<DynamicObject>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListMeta {
    #[serde(default)]
    pub resource_version: String,
}

/// The `Status` object the API server returns for failures, also carried by
/// `ERROR` watch events.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ApiStatus {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: Option<StatusDetails>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct StatusDetails {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: String,
}

impl ApiStatus {
    /// Name of the object the status refers to, if the server reported one.
    pub fn object_name(&self) -> Option<&str> {
        self.details
            .as_ref()
            .map(|d| d.name.as_str())
            .filter(|n| !n.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Added(DynamicObject),
    Modified(DynamicObject),
    Deleted(DynamicObject),
    Bookmark { resource_version: String },
    Error(ApiStatus),
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    object: Value,
}

impl WatchEvent {
    /// Decode one line of a watch stream.
    pub fn from_json(line: &str) -> Result<Self, ClusterError> {
        let raw: RawEvent = serde_json::from_str(line)?;
        let event = match raw.event_type.as_str() {
            "ADDED" => Self::Added(serde_json::from_value(raw.object)?),
            "MODIFIED" => Self::Modified(serde_json::from_value(raw.object)?),
            "DELETED" => Self::Deleted(serde_json::from_value(raw.object)?),
            "BOOKMARK" => {
                let obj: DynamicObject = serde_json::from_value(raw.object)?;
                Self::Bookmark {
                    resource_version: obj.metadata.resource_version.unwrap_or_default(),
                }
            }
            "ERROR" => Self::Error(serde_json::from_value(raw.object)?),
            other => {
                return Err(ClusterError::Serialization(format!(
                    "unknown watch event type '{other}'"
                )))
            }
        };
        Ok(event)
    }

    pub fn object(&self) -> Option<&DynamicObject> {
        match self {
            Self::Added(o) | Self::Modified(o) | Self::Deleted(o) => Some(o),
            Self::Bookmark { .. } | Self::Error(_) => None,
        }
    }

    pub fn resource_version(&self) -> Option<&str> {
        match self {
            Self::Bookmark { resource_version } => Some(resource_version),
            Self::Error(_) => None,
            other => other.object().and_then(DynamicObject::resource_version),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Added(_) => "ADDED",
            Self::Modified(_) => "MODIFIED",
            Self::Deleted(_) => "DELETED",
            Self::Bookmark { .. } => "BOOKMARK",
            Self::Error(_) => "ERROR",
        }
    }
}
