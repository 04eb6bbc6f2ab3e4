use crate::CoreError;
use armada_cluster::{ClusterClient, CRD_NAME};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};

/// Make sure every namespace exists, creating the missing ones.
pub fn ensure_namespaces(
    cluster: &dyn ClusterClient,
    namespaces: &BTreeSet<String>,
) -> Result<(), CoreError> {
    for ns in namespaces {
        match cluster.get_namespace(ns) {
            Ok(_) => debug!("namespace {ns} exists"),
            Err(e) if e.is_not_found() => {
                info!("creating namespace {ns}");
                cluster
                    .create_namespace(ns)
                    .map_err(|e| CoreError::prerequisite(format!("create namespace {ns}"), e))?;
            }
            Err(e) => return Err(CoreError::prerequisite(format!("get namespace {ns}"), e)),
        }
    }
    Ok(())
}

/// Register the ArmadaChart resource definition unless the cluster already
/// knows it. The definition file is only read when it is needed.
pub fn ensure_resource_schema(cluster: &dyn ClusterClient, crd_path: &Path) -> Result<(), CoreError> {
    match cluster.get_crd(CRD_NAME) {
        Ok(_) => {
            debug!("resource definition {CRD_NAME} already registered");
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            info!(
                "registering resource definition {CRD_NAME} from {}",
                crd_path.display()
            );
            let definition = load_resource_definition(crd_path)?;
            cluster
                .create_crd(&definition)
                .map_err(|e| CoreError::prerequisite(format!("create {CRD_NAME}"), e))?;
            Ok(())
        }
        Err(e) => Err(CoreError::prerequisite(format!("get {CRD_NAME}"), e)),
    }
}

/// Read a YAML resource definition into its JSON form.
pub fn load_resource_definition(path: &Path) -> Result<serde_json::Value, CoreError> {
    let what = || format!("read resource definition {}", path.display());
    let content = std::fs::read_to_string(path).map_err(|e| CoreError::prerequisite(what(), e))?;
    serde_yaml::from_str(&content).map_err(|e| CoreError::prerequisite(what(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_cluster::{ClusterCall, MockCluster, MockOp};

    const CRD: &str = "\
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: armadacharts.armada.airshipit.org
spec:
  group: armada.airshipit.org
";

    fn namespaces(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn missing_namespaces_are_created() {
        let mock = MockCluster::new();
        mock.add_namespace("ucp");
        ensure_namespaces(&mock, &namespaces(&["openstack", "ucp"])).unwrap();
        assert!(mock.has_namespace("openstack"));
        assert_eq!(
            mock.calls_matching(ClusterCall::is_mutation),
            vec![ClusterCall::CreateNamespace("openstack".to_owned())]
        );
    }

    #[test]
    fn other_namespace_errors_are_fatal() {
        let mock = MockCluster::new();
        mock.fail(MockOp::GetNamespace, "ucp", 403, "forbidden");
        let err = ensure_namespaces(&mock, &namespaces(&["ucp"])).unwrap_err();
        assert!(matches!(err, CoreError::Prerequisite { .. }));
        assert!(!mock.has_namespace("ucp"));
    }

    #[test]
    fn schema_is_registered_from_file_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crd.yaml");
        std::fs::write(&path, CRD).unwrap();
        let mock = MockCluster::new();
        ensure_resource_schema(&mock, &path).unwrap();
        assert!(mock.crd(CRD_NAME).is_some());

        // Second run finds it and never reads the file.
        std::fs::remove_file(&path).unwrap();
        ensure_resource_schema(&mock, &path).unwrap();
    }

    #[test]
    fn unreadable_definition_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockCluster::new();
        let err = ensure_resource_schema(&mock, &dir.path().join("missing.yaml")).unwrap_err();
        assert!(err.to_string().contains("read resource definition"));

        let bad = dir.path().join("bad.yaml");
        std::fs::write(&bad, "spec: [unclosed\n").unwrap();
        assert!(matches!(
            load_resource_definition(&bad),
            Err(CoreError::Prerequisite { .. })
        ));
    }
}
