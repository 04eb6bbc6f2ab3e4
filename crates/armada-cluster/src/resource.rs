use serde::{Deserialize, Serialize};
use std::fmt;

pub const ARMADA_GROUP: &str = "armada.airshipit.org";
pub const ARMADA_VERSION: &str = "v1";
pub const ARMADA_CHART_KIND: &str = "ArmadaChart";
pub const ARMADA_CHART_PLURAL: &str = "armadacharts";
pub const CRD_NAME: &str = "armadacharts.armada.airshipit.org";

/// Label carrying a chart's derived resource name; readiness waits select on it.
pub const RELEASE_LABEL: &str = "armada.airshipit.org/release-name";

/// A namespaced resource collection on the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceType {
    /// API group; empty for the core group.
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
}

impl ResourceType {
    pub fn new(group: &str, version: &str, kind: &str, plural: &str) -> Self {
        Self {
            group: group.to_owned(),
            version: version.to_owned(),
            kind: kind.to_owned(),
            plural: plural.to_owned(),
        }
    }

    pub fn armada_charts() -> Self {
        Self::new(
            ARMADA_GROUP,
            ARMADA_VERSION,
            ARMADA_CHART_KIND,
            ARMADA_CHART_PLURAL,
        )
    }

    /// Resource types known by name, for `--resource-type` style lookups.
    /// Accepts the plural, the kind, or `plural.group`.
    pub fn lookup(name: &str) -> Option<Self> {
        Self::builtin().into_iter().find(|rt| {
            name == rt.plural
                || name.eq_ignore_ascii_case(&rt.kind)
                || name == format!("{}.{}", rt.plural, rt.group)
        })
    }

    fn builtin() -> Vec<Self> {
        vec![
            Self::armada_charts(),
            Self::new("", "v1", "Pod", "pods"),
            Self::new("apps", "v1", "Deployment", "deployments"),
            Self::new("apps", "v1", "StatefulSet", "statefulsets"),
            Self::new("apps", "v1", "DaemonSet", "daemonsets"),
            Self::new("batch", "v1", "Job", "jobs"),
        ]
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Collection path relative to the API server root.
    pub fn collection_path(&self, namespace: &str) -> String {
        let prefix = if self.group.is_empty() {
            format!("/api/{}", self.version)
        } else {
            format!("/apis/{}/{}", self.group, self.version)
        };
        format!("{prefix}/namespaces/{namespace}/{}", self.plural)
    }

    pub fn object_path(&self, namespace: &str, name: &str) -> String {
        format!("{}/{name}", self.collection_path(namespace))
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.plural)
        } else {
            write!(f, "{}.{}", self.plural, self.group)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn armada_chart_paths() {
        let rt = ResourceType::armada_charts();
        assert_eq!(rt.api_version(), "armada.airshipit.org/v1");
        assert_eq!(
            rt.object_path("ucp", "airship-db"),
            "/apis/armada.airshipit.org/v1/namespaces/ucp/armadacharts/airship-db"
        );
        assert_eq!(rt.to_string(), CRD_NAME);
    }

    #[test]
    fn core_group_paths() {
        let pods = ResourceType::lookup("pods").unwrap();
        assert_eq!(pods.api_version(), "v1");
        assert_eq!(pods.collection_path("kube-system"), "/api/v1/namespaces/kube-system/pods");
        assert_eq!(pods.to_string(), "pods");
    }

    #[test]
    fn lookup_by_plural_kind_or_qualified_name() {
        assert_eq!(
            ResourceType::lookup("armadacharts"),
            Some(ResourceType::armada_charts())
        );
        assert_eq!(
            ResourceType::lookup("ArmadaChart"),
            Some(ResourceType::armada_charts())
        );
        assert_eq!(
            ResourceType::lookup("armadacharts.armada.airshipit.org"),
            Some(ResourceType::armada_charts())
        );
        assert_eq!(ResourceType::lookup("widgets"), None);
    }
}
