use crate::document::{Chart, ChartGroup, DocumentHeader, DocumentKind, Manifest};
use crate::types::{DocumentName, ResourceName};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to read documents: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode {kind} document '{name}': {source}")]
    Yaml {
        kind: &'static str,
        name: String,
        source: serde_yaml::Error,
    },
    #[error("no armada manifest found")]
    NoManifest,
    #[error("target manifest '{0}' not found")]
    TargetManifestNotFound(String),
    #[error("no group document with name {0} found")]
    MissingChartGroup(String),
    #[error("no chart document with name {chart} found (referenced by group {group})")]
    MissingChart { group: String, chart: String },
    #[error("chart document with name {0} does not have release or namespace")]
    IncompleteChart(String),
}

impl DocumentError {
    /// True for referential-integrity failures, false for unreadable input.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::NoManifest
                | Self::TargetManifestNotFound(_)
                | Self::MissingChartGroup(_)
                | Self::MissingChart { .. }
                | Self::IncompleteChart(_)
        )
    }
}

/// Split a multi-document YAML stream on `---` separator lines.
///
/// A separator may carry a trailing comment (`--- # groups`). Chunks
/// containing nothing but whitespace and comments are dropped.
pub fn split_documents(input: &str) -> Vec<&str> {
    let mut docs = Vec::new();
    let mut start = 0;
    let mut offset = 0;
    for line in input.split_inclusive('\n') {
        if is_separator(line) {
            docs.push(&input[start..offset]);
            start = offset + line.len();
        }
        offset += line.len();
    }
    docs.push(&input[start..]);
    docs.into_iter().filter(|d| has_content(d)).collect()
}

fn is_separator(line: &str) -> bool {
    let line = line.trim_end();
    if line == "..." {
        return true;
    }
    // A comment needs whitespace before it; `---#x` is not a separator.
    line.strip_prefix("---").is_some_and(|rest| {
        rest.is_empty() || (rest.starts_with(char::is_whitespace) && rest.trim_start().starts_with('#'))
    })
}

fn has_content(doc: &str) -> bool {
    doc.lines().any(|l| {
        let l = l.trim();
        !l.is_empty() && !l.starts_with('#')
    })
}

/// The validated document maps for one orchestration run.
///
/// Built once per invocation and read-only afterwards, so it can be shared
/// across concurrent chart installs by reference.
#[derive(Debug, Clone)]
pub struct DocumentSet {
    manifest: Manifest,
    groups: BTreeMap<DocumentName, ChartGroup>,
    charts: BTreeMap<DocumentName, Chart>,
}

impl DocumentSet {
    pub fn from_file(path: impl AsRef<Path>, target: Option<&str>) -> Result<Self, DocumentError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, target)
    }

    /// Parse a document stream, select the manifest and validate references.
    ///
    /// With a `target`, the manifest of that name is selected; otherwise the
    /// first manifest in stream order wins and later ones are ignored.
    pub fn parse(input: &str, target: Option<&str>) -> Result<Self, DocumentError> {
        let target = target.filter(|t| !t.is_empty());
        let mut manifest: Option<Manifest> = None;
        let mut groups = BTreeMap::new();
        let mut charts = BTreeMap::new();

        for (index, raw) in split_documents(input).into_iter().enumerate() {
            let header: DocumentHeader = match serde_yaml::from_str(raw) {
                Ok(h) => h,
                Err(e) => {
                    warn!("skipping document #{index}: {e}");
                    continue;
                }
            };
            let Some(kind) = header.kind() else {
                debug!(
                    "ignoring document #{index} with schema '{}'",
                    header.schema
                );
                continue;
            };
            let name = header.metadata.name.clone();

            match kind {
                DocumentKind::Manifest => {
                    let selected = match target {
                        Some(t) => name == t,
                        None => manifest.is_none(),
                    };
                    if selected {
                        let doc: Manifest = decode(raw, kind, &name)?;
                        info!("found armada manifest {name}");
                        manifest = Some(doc);
                    } else {
                        debug!("ignoring manifest {name}");
                    }
                }
                DocumentKind::ChartGroup => {
                    let doc: ChartGroup = decode(raw, kind, &name)?;
                    if groups.insert(name.clone(), doc).is_some() {
                        debug!("chart group {name} redefined, keeping the later document");
                    }
                }
                DocumentKind::Chart => {
                    let doc: Chart = decode(raw, kind, &name)?;
                    if charts.insert(name.clone(), doc).is_some() {
                        debug!("chart {name} redefined, keeping the later document");
                    }
                }
            }
        }

        let manifest = match (manifest, target) {
            (Some(m), _) => m,
            (None, Some(t)) => return Err(DocumentError::TargetManifestNotFound(t.to_owned())),
            (None, None) => return Err(DocumentError::NoManifest),
        };

        let set = Self {
            manifest,
            groups,
            charts,
        };
        set.validate()?;
        Ok(set)
    }

    /// Check that every reference from the manifest resolves and every
    /// reachable chart has a release and a namespace.
    pub fn validate(&self) -> Result<(), DocumentError> {
        for group_name in &self.manifest.data.chart_groups {
            let group = self
                .groups
                .get(group_name)
                .ok_or_else(|| DocumentError::MissingChartGroup(group_name.to_string()))?;
            for chart_name in &group.data.chart_group {
                let chart =
                    self.charts
                        .get(chart_name)
                        .ok_or_else(|| DocumentError::MissingChart {
                            group: group_name.to_string(),
                            chart: chart_name.to_string(),
                        })?;
                if chart.data.release.is_empty() || chart.data.namespace.is_empty() {
                    return Err(DocumentError::IncompleteChart(chart_name.to_string()));
                }
            }
        }
        debug!("all armada documents validated successfully");
        Ok(())
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn groups(&self) -> &BTreeMap<DocumentName, ChartGroup> {
        &self.groups
    }

    pub fn charts(&self) -> &BTreeMap<DocumentName, Chart> {
        &self.charts
    }

    pub fn group(&self, name: &str) -> Option<&ChartGroup> {
        self.groups.get(name)
    }

    pub fn chart(&self, name: &str) -> Option<&Chart> {
        self.charts.get(name)
    }

    /// Chart groups in manifest order.
    pub fn ordered_groups(&self) -> Vec<&ChartGroup> {
        self.manifest
            .data
            .chart_groups
            .iter()
            .filter_map(|n| self.groups.get(n))
            .collect()
    }

    /// Charts of a group in declared order.
    pub fn group_charts(&self, group: &ChartGroup) -> Vec<&Chart> {
        group
            .data
            .chart_group
            .iter()
            .filter_map(|n| self.charts.get(n))
            .collect()
    }

    /// Every chart reachable from the manifest, in execution order.
    pub fn reachable_charts(&self) -> Vec<&Chart> {
        self.ordered_groups()
            .into_iter()
            .flat_map(|g| self.group_charts(g))
            .collect()
    }

    /// Distinct namespaces of all reachable charts.
    pub fn namespaces(&self) -> BTreeSet<String> {
        self.reachable_charts()
            .into_iter()
            .map(|c| c.data.namespace.clone())
            .collect()
    }

    pub fn resource_name(&self, chart: &Chart) -> ResourceName {
        self.manifest.resource_name(chart)
    }

    /// `(namespace, resource name)` pairs claimed by more than one reachable
    /// chart document. Such charts would share one cluster resource and one
    /// readiness selector.
    pub fn resource_name_collisions(&self) -> Vec<(String, ResourceName)> {
        let mut seen: BTreeMap<(String, ResourceName), BTreeSet<&str>> = BTreeMap::new();
        for chart in self.reachable_charts() {
            seen.entry((chart.data.namespace.clone(), self.resource_name(chart)))
                .or_default()
                .insert(chart.name().as_str());
        }
        seen.into_iter()
            .filter(|(_, charts)| charts.len() > 1)
            .map(|(key, _)| key)
            .collect()
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    raw: &str,
    kind: DocumentKind,
    name: &DocumentName,
) -> Result<T, DocumentError> {
    serde_yaml::from_str(raw).map_err(|source| DocumentError::Yaml {
        kind: kind.schema(),
        name: name.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_on_separator_lines_only() {
        let input = "a: 1\n---\nb: '---'\n--- \nc: 3\n";
        let docs = split_documents(input);
        assert_eq!(docs.len(), 3);
        assert!(docs[1].contains("b: '---'"));
        assert!(docs[2].contains("c: 3"));
    }

    #[test]
    fn split_drops_empty_and_comment_only_chunks() {
        let input = "---\n# leading comment\n---\nschema: x\n---\n\n";
        let docs = split_documents(input);
        assert_eq!(docs, vec!["schema: x\n"]);
    }

    #[test]
    fn separator_may_carry_a_comment() {
        let input = "a: 1\n--- # groups\nb: 2\n---\t# charts\nc: 3\n---# not a separator\n";
        let docs = split_documents(input);
        assert_eq!(docs, vec!["a: 1\n", "b: 2\n", "c: 3\n---# not a separator\n"]);
    }

    #[test]
    fn split_handles_missing_trailing_newline() {
        let docs = split_documents("a: 1\n---\nb: 2");
        assert_eq!(docs, vec!["a: 1\n", "b: 2"]);
    }

    #[test]
    fn validation_errors_are_classified() {
        assert!(DocumentError::NoManifest.is_validation());
        assert!(DocumentError::MissingChartGroup("g".into()).is_validation());
        let io = DocumentError::Io(std::io::Error::other("boom"));
        assert!(!io.is_validation());
    }
}
