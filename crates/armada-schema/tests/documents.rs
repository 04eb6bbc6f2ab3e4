//! Document stream parsing, manifest selection and referential integrity.

use armada_schema::{DocumentError, DocumentSet};

const FIXTURE: &str = include_str!("fixtures/core.yaml");

fn manifest_doc(name: &str, groups: &[&str]) -> String {
    format!(
        "schema: armada/Manifest/v1\nmetadata:\n  name: {name}\ndata:\n  release_prefix: {name}\n  chart_groups: [{}]\n",
        groups.join(", ")
    )
}

fn group_doc(name: &str, charts: &[&str], sequenced: bool) -> String {
    format!(
        "schema: armada/ChartGroup/v1\nmetadata:\n  name: {name}\ndata:\n  sequenced: {sequenced}\n  chart_group: [{}]\n",
        charts.join(", ")
    )
}

fn chart_doc(name: &str, release: &str, namespace: &str) -> String {
    format!(
        "schema: armada/Chart/v1\nmetadata:\n  name: {name}\ndata:\n  release: {release}\n  namespace: {namespace}\n"
    )
}

fn stream(docs: &[String]) -> String {
    docs.iter()
        .map(|d| format!("---\n{d}"))
        .collect::<Vec<_>>()
        .join("")
}

#[test]
fn scenario_core_fixture_loads_groups_and_charts() {
    let set = DocumentSet::parse(FIXTURE, None).unwrap();
    assert_eq!(set.manifest().name(), "core");
    assert_eq!(set.manifest().data.release_prefix, "airship");

    let charts: Vec<&str> = set.charts().keys().map(|k| k.as_str()).collect();
    assert_eq!(charts, vec!["cache", "db"]);
    assert!(set.group("infra").is_some());

    let ordered = set.ordered_groups();
    assert_eq!(ordered.len(), 1);
    assert_eq!(ordered[0].name(), "infra");
    assert!(!ordered[0].data.sequenced);

    let names: Vec<&str> = set
        .group_charts(ordered[0])
        .iter()
        .map(|c| c.name().as_str())
        .collect();
    assert_eq!(names, vec!["db", "cache"]);

    let db = set.chart("db").unwrap();
    assert_eq!(set.resource_name(db), "airship-postgresql");
    assert_eq!(db.data.wait_timeout_secs(), 900);
}

#[test]
fn scenario_namespaces_cover_reachable_charts() {
    let set = DocumentSet::parse(FIXTURE, None).unwrap();
    let namespaces: Vec<String> = set.namespaces().into_iter().collect();
    assert_eq!(namespaces, vec!["openstack".to_owned(), "ucp".to_owned()]);
}

#[test]
fn commented_separators_keep_documents_apart() {
    let input = format!(
        "{}--- # groups\n{}---   # charts\n{}",
        manifest_doc("core", &["infra"]),
        group_doc("infra", &["db"], false),
        chart_doc("db", "postgresql", "ucp")
    );
    let set = DocumentSet::parse(&input, None).unwrap();
    assert_eq!(set.manifest().name(), "core");
    assert!(set.group("infra").is_some());
    assert!(set.chart("db").is_some());
}

#[test]
fn first_manifest_wins_without_target() {
    let input = stream(&[
        manifest_doc("a", &["g"]),
        manifest_doc("b", &["g"]),
        group_doc("g", &["c"], false),
        chart_doc("c", "rel", "ns"),
    ]);
    let set = DocumentSet::parse(&input, None).unwrap();
    assert_eq!(set.manifest().name(), "a");
}

#[test]
fn target_manifest_is_selected_by_name() {
    let input = stream(&[
        manifest_doc("a", &["g"]),
        manifest_doc("b", &["g"]),
        group_doc("g", &["c"], false),
        chart_doc("c", "rel", "ns"),
    ]);
    let set = DocumentSet::parse(&input, Some("b")).unwrap();
    assert_eq!(set.manifest().name(), "b");
}

#[test]
fn absent_target_manifest_fails() {
    let input = stream(&[
        manifest_doc("a", &["g"]),
        manifest_doc("b", &["g"]),
        group_doc("g", &["c"], false),
        chart_doc("c", "rel", "ns"),
    ]);
    let err = DocumentSet::parse(&input, Some("c")).unwrap_err();
    assert!(matches!(err, DocumentError::TargetManifestNotFound(ref n) if n == "c"));
    assert!(err.is_validation());
}

#[test]
fn stream_without_manifest_fails() {
    let input = stream(&[group_doc("g", &["c"], false), chart_doc("c", "rel", "ns")]);
    let err = DocumentSet::parse(&input, None).unwrap_err();
    assert!(matches!(err, DocumentError::NoManifest));
}

#[test]
fn dangling_group_reference_fails_validation() {
    let input = stream(&[manifest_doc("m", &["missing"]), chart_doc("c", "rel", "ns")]);
    let err = DocumentSet::parse(&input, None).unwrap_err();
    assert!(matches!(err, DocumentError::MissingChartGroup(ref g) if g == "missing"));
    assert!(err.is_validation());
}

#[test]
fn dangling_chart_reference_fails_validation() {
    let input = stream(&[
        manifest_doc("m", &["g"]),
        group_doc("g", &["c", "ghost"], true),
        chart_doc("c", "rel", "ns"),
    ]);
    let err = DocumentSet::parse(&input, None).unwrap_err();
    match err {
        DocumentError::MissingChart { group, chart } => {
            assert_eq!(group, "g");
            assert_eq!(chart, "ghost");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn chart_without_release_or_namespace_fails_validation() {
    let input = stream(&[
        manifest_doc("m", &["g"]),
        group_doc("g", &["c"], false),
        chart_doc("c", "rel", "\"\""),
    ]);
    let err = DocumentSet::parse(&input, None).unwrap_err();
    assert!(matches!(err, DocumentError::IncompleteChart(ref c) if c == "c"));
}

#[test]
fn unreachable_documents_are_not_validated() {
    let input = stream(&[
        manifest_doc("m", &["g"]),
        group_doc("g", &["c"], false),
        group_doc("orphan", &["nowhere"], false),
        chart_doc("c", "rel", "ns"),
    ]);
    assert!(DocumentSet::parse(&input, None).is_ok());
}

#[test]
fn malformed_and_foreign_documents_are_skipped() {
    let input = format!(
        "{}---\nschema: [unclosed\n---\n- just\n- a list\n---\nschema: deckhand/Passphrase/v1\nmetadata:\n  name: secret\ndata: hunter2\n",
        stream(&[
            manifest_doc("m", &["g"]),
            group_doc("g", &["c"], false),
            chart_doc("c", "rel", "ns"),
        ])
    );
    let set = DocumentSet::parse(&input, None).unwrap();
    assert_eq!(set.charts().len(), 1);
    assert_eq!(set.groups().len(), 1);
}

#[test]
fn recognized_document_with_bad_payload_is_fatal() {
    let input = stream(&[
        manifest_doc("m", &["g"]),
        "schema: armada/ChartGroup/v1\nmetadata:\n  name: g\ndata:\n  chart_group: not-a-list\n"
            .to_owned(),
    ]);
    let err = DocumentSet::parse(&input, None).unwrap_err();
    assert!(matches!(err, DocumentError::Yaml { .. }));
    assert!(!err.is_validation());
}

#[test]
fn colliding_resource_names_are_reported() {
    let input = stream(&[
        manifest_doc("m", &["g"]),
        group_doc("g", &["a", "b", "c"], false),
        chart_doc("a", "shared", "ns"),
        chart_doc("b", "shared", "ns"),
        chart_doc("c", "shared", "other"),
    ]);
    let set = DocumentSet::parse(&input, None).unwrap();
    let collisions = set.resource_name_collisions();
    assert_eq!(collisions.len(), 1);
    assert_eq!(collisions[0].0, "ns");
    assert_eq!(collisions[0].1, "m-shared");
}

#[test]
fn from_file_reads_fixture() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("site.yaml");
    std::fs::write(&path, FIXTURE).unwrap();
    let set = DocumentSet::from_file(&path, Some("core")).unwrap();
    assert_eq!(set.reachable_charts().len(), 2);
}
