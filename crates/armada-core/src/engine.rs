use crate::concurrency::Shutdown;
use crate::prereq::{ensure_namespaces, ensure_resource_schema};
use crate::readiness::ReadinessRegistry;
use crate::retry::RetryPolicy;
use crate::wait::{WaitOutcome, WaitRequest, Waiter};
use crate::CoreError;
use armada_cluster::{ClusterClient, DynamicObject, ResourceType, ARMADA_CHART_KIND, RELEASE_LABEL};
use armada_remote::{ApplyConfig, ManifestSource, TokenProvider};
use armada_schema::{Chart, ChartGroup, DocumentSet};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use tracing::{debug, error, info, info_span, warn, Span};

/// Fetch a document stream and build the validated document maps.
///
/// Nothing here touches the cluster.
pub fn load_documents(
    source: &ManifestSource,
    target: Option<&str>,
    auth: &dyn TokenProvider,
) -> Result<DocumentSet, CoreError> {
    info!("loading manifests from {source}");
    let content = source.fetch(auth)?;
    Ok(DocumentSet::parse(&content, target)?)
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub retry: RetryPolicy,
    /// Resource definition registered when the cluster lacks it.
    pub crd_path: PathBuf,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from_config(&ApplyConfig::default())
    }
}

impl EngineOptions {
    pub fn from_config(config: &ApplyConfig) -> Self {
        Self {
            retry: RetryPolicy::from_config(config),
            crd_path: config.crd_path.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallAction {
    Created,
    Updated,
}

/// One chart that was written and observed ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallOutcome {
    /// Chart document name.
    pub chart: String,
    /// Cluster resource name, `<prefix>-<release>`.
    pub name: String,
    pub namespace: String,
    pub action: InstallAction,
    /// Install attempts, more than one after update conflicts.
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub installed: Vec<InstallOutcome>,
    pub upgraded: Vec<InstallOutcome>,
}

impl ApplyReport {
    fn record(&mut self, outcome: InstallOutcome) {
        match outcome.action {
            InstallAction::Created => self.installed.push(outcome),
            InstallAction::Updated => self.upgraded.push(outcome),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.installed.is_empty() && self.upgraded.is_empty()
    }
}

/// Drives one manifest onto a cluster.
///
/// Groups run strictly in manifest order. A sequenced group installs its
/// charts one by one; any other group installs all charts on scoped worker
/// threads and reports the first error once every worker has finished.
pub struct Engine {
    cluster: Arc<dyn ClusterClient>,
    registry: ReadinessRegistry,
    options: EngineOptions,
    shutdown: Shutdown,
}

impl Engine {
    pub fn new(cluster: Arc<dyn ClusterClient>, options: EngineOptions) -> Self {
        Self {
            cluster,
            registry: ReadinessRegistry::default(),
            options,
            shutdown: Shutdown::new(),
        }
    }

    #[must_use]
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    #[must_use]
    pub fn with_registry(mut self, registry: ReadinessRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn cluster(&self) -> &dyn ClusterClient {
        self.cluster.as_ref()
    }

    /// Create missing namespaces and register the chart resource definition.
    pub fn prepare(&self, docs: &DocumentSet) -> Result<(), CoreError> {
        let namespaces = docs.namespaces();
        debug!("ensuring namespaces {namespaces:?}");
        ensure_namespaces(self.cluster(), &namespaces)?;
        ensure_resource_schema(self.cluster(), &self.options.crd_path)
    }

    /// Prerequisites followed by the full run.
    pub fn apply(&self, docs: &DocumentSet) -> Result<ApplyReport, CoreError> {
        let span = info_span!("apply", manifest = %docs.manifest().name());
        let _entered = span.enter();
        for (namespace, name) in docs.resource_name_collisions() {
            warn!("several charts map to resource {name} in namespace {namespace}; they share one resource and one readiness wait");
        }
        self.prepare(docs)?;
        self.run(docs)
    }

    /// Install every chart group in manifest order.
    pub fn run(&self, docs: &DocumentSet) -> Result<ApplyReport, CoreError> {
        let mut report = ApplyReport::default();
        for group in docs.ordered_groups() {
            if self.shutdown.is_requested() {
                warn!("shutdown requested, not starting chart group {}", group.name());
                return Err(CoreError::Interrupted);
            }
            let span = info_span!("chart_group", name = %group.name());
            let _entered = span.enter();
            let charts = docs.group_charts(group);
            info!(
                "processing chart group with {} charts ({})",
                charts.len(),
                if group.data.sequenced { "sequenced" } else { "parallel" }
            );
            let outcomes = if group.data.sequenced {
                self.run_sequenced(docs, &charts)
            } else {
                self.run_parallel(docs, group, &charts)
            }
            .inspect_err(|e| error!("chart group {} failed: {e}", group.name()))?;
            for outcome in outcomes {
                report.record(outcome);
            }
        }
        info!(
            "apply finished: {} installed, {} upgraded",
            report.installed.len(),
            report.upgraded.len()
        );
        Ok(report)
    }

    fn run_sequenced(&self, docs: &DocumentSet, charts: &[&Chart]) -> Result<Vec<InstallOutcome>, CoreError> {
        let mut outcomes = Vec::with_capacity(charts.len());
        for chart in charts {
            if self.shutdown.is_requested() {
                warn!("shutdown requested, not starting chart {}", chart.name());
                return Err(CoreError::Interrupted);
            }
            outcomes.push(self.install_chart(docs, chart)?);
        }
        Ok(outcomes)
    }

    fn run_parallel(
        &self,
        docs: &DocumentSet,
        group: &ChartGroup,
        charts: &[&Chart],
    ) -> Result<Vec<InstallOutcome>, CoreError> {
        let parent = Span::current();
        let (tx, rx) = mpsc::channel();
        std::thread::scope(|scope| {
            for (index, chart) in charts.iter().enumerate() {
                let tx = tx.clone();
                let parent = parent.clone();
                scope.spawn(move || {
                    let _entered = parent.enter();
                    let _ = tx.send((index, self.install_chart(docs, chart)));
                });
            }
        });
        drop(tx);

        // Every worker has finished here; the first failure to arrive wins.
        let mut outcomes = Vec::with_capacity(charts.len());
        let mut first_error = None;
        for (index, result) in rx {
            match result {
                Ok(outcome) => outcomes.push((index, outcome)),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    } else {
                        debug!("further failure in group {}: {e}", group.name());
                    }
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        outcomes.sort_by_key(|(index, _)| *index);
        Ok(outcomes.into_iter().map(|(_, o)| o).collect())
    }

    /// Create or update one chart's cluster resource, then wait for it.
    ///
    /// An update rejected as a concurrent modification restarts from the
    /// fetch, as often as the retry policy allows.
    pub fn install_chart(&self, docs: &DocumentSet, chart: &Chart) -> Result<InstallOutcome, CoreError> {
        let name = docs.resource_name(chart).into_inner();
        let namespace = chart.data.namespace.clone();
        let span = info_span!("chart", name = %chart.name());
        let _entered = span.enter();
        let resource = ResourceType::armada_charts();
        let retry = self.options.retry;

        let mut attempts = 0u32;
        let action = loop {
            attempts += 1;
            let mut desired = chart_resource(&resource, &name, chart)?;
            match self.cluster.get(&resource, &namespace, &name) {
                Err(e) if e.is_not_found() => {
                    info!("creating {resource} {namespace}/{name}");
                    self.cluster.create(&resource, &desired)?;
                    break InstallAction::Created;
                }
                Err(e) => return Err(e.into()),
                Ok(existing) => {
                    desired.metadata.resource_version = existing.metadata.resource_version;
                    info!("updating {resource} {namespace}/{name}");
                    match self.cluster.update(&resource, &desired) {
                        Ok(_) => break InstallAction::Updated,
                        Err(e) if e.is_conflict() => {
                            if !retry.allows_retry(attempts) {
                                return Err(CoreError::ConflictRetriesExhausted { name, attempts });
                            }
                            let delay = retry.delay(attempts);
                            warn!("update of {name} conflicted (attempt {attempts}), retrying in {delay:?}");
                            if !delay.is_zero() {
                                std::thread::sleep(delay);
                            }
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        };

        let request = WaitRequest::for_chart(&namespace, &name, chart.data.wait_timeout_secs());
        self.wait(&request)?;
        info!("chart {} installed", chart.name());
        Ok(InstallOutcome {
            chart: chart.name().to_string(),
            name,
            namespace,
            action,
            attempts,
        })
    }

    /// Run the readiness wait engine with this engine's cluster and rules.
    pub fn wait(&self, request: &WaitRequest) -> Result<WaitOutcome, CoreError> {
        Waiter::new(self.cluster(), &self.registry).wait(request)
    }
}

/// The ArmadaChart body for a chart: its spec verbatim plus the release label.
fn chart_resource(resource: &ResourceType, name: &str, chart: &Chart) -> Result<DynamicObject, CoreError> {
    Ok(
        DynamicObject::new(&resource.api_version(), ARMADA_CHART_KIND, name, &chart.data.namespace)
            .with_label(RELEASE_LABEL, name)
            .with_spec(chart.data.to_json()?),
    )
}
