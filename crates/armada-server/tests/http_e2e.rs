//! HTTP end-to-end tests: a real server on a random port, backed by the
//! in-memory cluster, driven with a real HTTP client.

use armada_cluster::{ClusterCall, MockCluster, ResourceType};
use armada_core::{EngineOptions, RetryPolicy};
use armada_remote::KeystoneConfig;
use armada_server::{PolicyEnforcer, ServerState, TestServer, RULE_APPLY, RULE_RELEASES};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const POLICY: &str = r#"
admin_required = "role:admin"
"armada:create_endpoints" = "rule:admin_required"
"armada:validate_manifest" = "role:admin or role:reader"
"armada:get_release" = "@"
"#;

const SITE: &str = "\
---
schema: armada/Manifest/v1
metadata:
  name: site
data:
  release_prefix: airship
  chart_groups: [infra]
---
schema: armada/ChartGroup/v1
metadata:
  name: infra
data:
  chart_group: [db, cache]
---
schema: armada/Chart/v1
metadata:
  name: db
data:
  release: postgresql
  namespace: ucp
  wait:
    timeout: 10
---
schema: armada/Chart/v1
metadata:
  name: cache
data:
  release: memcached
  namespace: ucp
  wait:
    timeout: 10
";

fn start(mock: &Arc<MockCluster>, policy: PolicyEnforcer) -> TestServer {
    TestServer::start(ServerState {
        cluster: mock.clone(),
        options: EngineOptions {
            retry: RetryPolicy::immediate(),
            crd_path: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../crd.yaml"),
        },
        policy,
        keystone: KeystoneConfig::default(),
        release_namespaces: vec!["ucp".to_owned()],
    })
}

fn write_site(dir: &Path, content: &str) -> String {
    let path = dir.join("site.yaml");
    std::fs::write(&path, content).unwrap();
    path.display().to_string()
}

fn agent() -> ureq::Agent {
    ureq::Agent::config_builder()
        .http_status_as_error(false)
        .build()
        .new_agent()
}

fn post(url: &str, roles: &str, body: &str) -> (u16, String) {
    let mut resp = agent()
        .post(url)
        .header("X-Identity-Status", "Confirmed")
        .header("X-Roles", roles)
        .header("Content-Type", "application/json")
        .send(body)
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.body_mut().read_to_string().unwrap())
}

fn get(url: &str, confirmed: bool) -> (u16, String) {
    let mut req = agent().get(url);
    if confirmed {
        req = req.header("X-Identity-Status", "Confirmed");
    }
    let mut resp = req.call().unwrap();
    let status = resp.status().as_u16();
    (status, resp.body_mut().read_to_string().unwrap())
}

#[test]
fn health_needs_no_identity() {
    let mock = Arc::new(MockCluster::new());
    let server = start(&mock, PolicyEnforcer::default());
    let (status, body) = get(&format!("{}/api/v1.0/health", server.url), false);
    assert_eq!(status, 200);
    assert_eq!(body, "OK");
}

#[test]
fn unconfirmed_identity_is_rejected() {
    let mock = Arc::new(MockCluster::new());
    let server = start(&mock, PolicyEnforcer::allow_all(&[RULE_RELEASES]));
    let (status, _) = get(&format!("{}/api/v1.0/releases", server.url), false);
    assert_eq!(status, 401);
}

#[test]
fn apply_installs_charts_and_reports_releases() {
    let dir = tempfile::tempdir().unwrap();
    let href = write_site(dir.path(), SITE);
    let mock = Arc::new(MockCluster::new());
    let server = start(&mock, PolicyEnforcer::parse(POLICY).unwrap());

    let body = serde_json::json!({"hrefs": href, "overrides": []}).to_string();
    let (status, text) = post(&format!("{}/api/v1.0/apply", server.url), "admin", &body);
    assert_eq!(status, 200, "{text}");
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    let mut installed: Vec<&str> = json["message"]["install"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    installed.sort_unstable();
    assert_eq!(installed, vec!["airship-memcached", "airship-postgresql"]);
    assert_eq!(json["message"]["upgrade"].as_array().unwrap().len(), 0);

    let rt = ResourceType::armada_charts();
    assert!(mock.object(&rt, "ucp", "airship-postgresql").is_some());

    let (status, text) = get(&format!("{}/api/v1.0/releases", server.url), true);
    assert_eq!(status, 200);
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["releases"]["ucp"].as_array().unwrap().len(), 2);

    // A second apply upgrades both.
    let (status, text) = post(&format!("{}/api/v1.0/apply", server.url), "admin", &body);
    assert_eq!(status, 200);
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["message"]["upgrade"].as_array().unwrap().len(), 2);
}

#[test]
fn apply_denied_by_policy_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let href = write_site(dir.path(), SITE);
    let mock = Arc::new(MockCluster::new());
    let server = start(&mock, PolicyEnforcer::parse(POLICY).unwrap());

    let body = serde_json::json!({"hrefs": href}).to_string();
    let (status, _) = post(&format!("{}/api/v1.0/apply", server.url), "reader", &body);
    assert_eq!(status, 403);
    assert!(mock.calls().is_empty());
}

#[test]
fn apply_with_target_manifest_query() {
    let dir = tempfile::tempdir().unwrap();
    let href = write_site(dir.path(), SITE);
    let mock = Arc::new(MockCluster::new());
    let server = start(&mock, PolicyEnforcer::allow_all(&[RULE_APPLY]));

    let body = serde_json::json!({"hrefs": href}).to_string();
    let (status, text) = post(
        &format!("{}/api/v1.0/apply?target_manifest=other", server.url),
        "",
        &body,
    );
    assert_eq!(status, 500);
    assert!(text.contains("target manifest 'other' not found"), "{text}");
    assert!(mock
        .calls_matching(|c| matches!(c, ClusterCall::Create { .. }))
        .is_empty());
}

#[test]
fn apply_rejects_bad_bodies() {
    let mock = Arc::new(MockCluster::new());
    let server = start(&mock, PolicyEnforcer::allow_all(&[RULE_APPLY]));
    let (status, _) = post(&format!("{}/api/v1.0/apply", server.url), "", "not json");
    assert_eq!(status, 400);

    let mut resp = agent()
        .post(&format!("{}/api/v1.0/apply", server.url))
        .header("X-Identity-Status", "Confirmed")
        .header("Content-Type", "text/plain")
        .send("{}")
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let _ = resp.body_mut().read_to_string();
}

#[test]
fn validatedesign_reports_status_document() {
    let dir = tempfile::tempdir().unwrap();
    let mock = Arc::new(MockCluster::new());
    let server = start(&mock, PolicyEnforcer::parse(POLICY).unwrap());
    let url = format!("{}/api/v1.0/validatedesign", server.url);

    let good = write_site(dir.path(), SITE);
    let (status, text) = post(&url, "reader", &serde_json::json!({"href": good}).to_string());
    assert_eq!(status, 200);
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["status"], "Success");
    assert_eq!(json["details"]["errorCount"], 0);

    let broken = write_site(dir.path(), &SITE.replace("[db, cache]", "[db, ghost]"));
    let (status, text) = post(&url, "reader", &serde_json::json!({"href": broken}).to_string());
    assert_eq!(status, 400);
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["status"], "Failure");
    assert_eq!(json["details"]["errorCount"], 1);
    assert!(json["details"]["messageList"][0]["message"]
        .as_str()
        .unwrap()
        .contains("ghost"));
    assert!(mock.calls().is_empty());
}

#[test]
fn unknown_routes_and_methods() {
    let mock = Arc::new(MockCluster::new());
    let server = start(&mock, PolicyEnforcer::default());
    let (status, _) = get(&format!("{}/api/v1.0/nothing", server.url), true);
    assert_eq!(status, 404);
    let (status, _) = get(&format!("{}/api/v1.0/apply", server.url), true);
    assert_eq!(status, 405);
}
