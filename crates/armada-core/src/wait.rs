use crate::readiness::{ReadinessRegistry, ReadinessState};
use crate::CoreError;
use armada_cluster::{
    ClusterClient, ClusterError, DynamicObject, LabelSelector, ResourceType, WatchEvent,
    WatchParams, RELEASE_LABEL,
};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn};

/// How many members of the watched set must be settled for convergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MinReady {
    #[default]
    All,
    Count(usize),
    Percent(u8),
}

impl MinReady {
    /// Number of settled objects required out of `total`.
    pub fn required(self, total: usize) -> usize {
        match self {
            Self::All => total,
            Self::Count(n) => n.min(total),
            Self::Percent(p) => (total * usize::from(p)).div_ceil(100),
        }
    }
}

impl FromStr for MinReady {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::All);
        }
        let invalid = || CoreError::InvalidOption(format!("invalid min-ready value '{s}'"));
        if let Some(pct) = s.strip_suffix('%') {
            let p: u8 = pct.trim().parse().map_err(|_| invalid())?;
            if p > 100 {
                return Err(invalid());
            }
            return Ok(Self::Percent(p));
        }
        s.parse().map(Self::Count).map_err(|_| invalid())
    }
}

/// What to wait for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitRequest {
    pub resource: ResourceType,
    pub namespace: String,
    pub selector: LabelSelector,
    /// `None` waits without a deadline.
    pub timeout: Option<Duration>,
    pub min_ready: MinReady,
}

impl WaitRequest {
    /// Wait on the ArmadaChart resource a chart install created.
    pub fn for_chart(namespace: &str, resource_name: &str, timeout_secs: u64) -> Self {
        Self {
            resource: ResourceType::armada_charts(),
            namespace: namespace.to_owned(),
            selector: LabelSelector::eq(RELEASE_LABEL, resource_name),
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            min_ready: MinReady::All,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The selector matched nothing.
    NothingToWait,
    /// The initial snapshot already satisfied the predicate.
    AlreadyReady { total: usize },
    /// The predicate held after `events` watch events.
    Converged { total: usize, events: usize },
}

/// States of one wait.
enum Phase {
    Snapshot { initial: bool },
    Evaluate { initial: bool, resource_version: String },
    Watching { resource_version: String },
}

/// How one watch stream ended without converging.
enum WatchExit {
    Converged,
    Ended { resource_version: String },
    Expired,
}

/// Watch-driven convergence detector for a set of resources.
pub struct Waiter<'a> {
    cluster: &'a dyn ClusterClient,
    registry: &'a ReadinessRegistry,
}

impl<'a> Waiter<'a> {
    pub fn new(cluster: &'a dyn ClusterClient, registry: &'a ReadinessRegistry) -> Self {
        Self { cluster, registry }
    }

    /// Block until the resources selected by `request` converge, the deadline
    /// passes, or an error event arrives.
    pub fn wait(&self, request: &WaitRequest) -> Result<WaitOutcome, CoreError> {
        let span = info_span!("wait", selector = %request.selector);
        let _entered = span.enter();
        info!(
            "waiting on {} in {} (timeout {:?})",
            request.resource, request.namespace, request.timeout
        );
        let deadline = request.timeout.map(|t| Instant::now() + t);
        let mut cache: BTreeMap<String, DynamicObject> = BTreeMap::new();
        let mut events = 0usize;
        let mut phase = Phase::Snapshot { initial: true };

        loop {
            phase = match phase {
                Phase::Snapshot { initial } => {
                    self.check_deadline(request, deadline)?;
                    let list =
                        self.cluster
                            .list(&request.resource, &request.namespace, &request.selector)?;
                    cache = list
                        .items
                        .into_iter()
                        .map(|obj| (obj.name().to_owned(), obj))
                        .collect();
                    if initial && cache.is_empty() {
                        info!("skipping non-required wait, no resources found");
                        return Ok(WaitOutcome::NothingToWait);
                    }
                    Phase::Evaluate {
                        initial,
                        resource_version: list.resource_version,
                    }
                }
                Phase::Evaluate {
                    initial,
                    resource_version,
                } => {
                    if self.all_match(&cache, request.min_ready) {
                        info!("all {} objects are ready", cache.len());
                        let total = cache.len();
                        return Ok(if initial {
                            WaitOutcome::AlreadyReady { total }
                        } else {
                            WaitOutcome::Converged { total, events }
                        });
                    }
                    Phase::Watching { resource_version }
                }
                Phase::Watching { resource_version } => {
                    match self.watch_once(request, deadline, resource_version, &mut cache, &mut events)? {
                        WatchExit::Converged => {
                            return Ok(WaitOutcome::Converged {
                                total: cache.len(),
                                events,
                            })
                        }
                        WatchExit::Ended { resource_version } => {
                            debug!("watch ended, resuming from {resource_version}");
                            Phase::Watching { resource_version }
                        }
                        WatchExit::Expired => {
                            warn!("watch resource version expired, taking a new snapshot");
                            Phase::Snapshot { initial: false }
                        }
                    }
                }
            };
        }
    }

    fn check_deadline(&self, request: &WaitRequest, deadline: Option<Instant>) -> Result<(), CoreError> {
        match deadline {
            Some(d) if Instant::now() >= d => Err(self.timeout_error(request)),
            _ => Ok(()),
        }
    }

    fn timeout_error(&self, request: &WaitRequest) -> CoreError {
        CoreError::ReadinessTimeout {
            selector: request.selector.to_string(),
            timeout: request.timeout.unwrap_or_default(),
        }
    }

    /// The all-match predicate over the whole cached set.
    fn all_match(&self, cache: &BTreeMap<String, DynamicObject>, min_ready: MinReady) -> bool {
        let mut settled = 0;
        for obj in cache.values() {
            let readiness = self.registry.evaluate(obj);
            debug!("{}: {} ({})", obj.name(), readiness.state, readiness.message);
            if readiness.state.is_settled() {
                settled += 1;
            } else if min_ready == MinReady::All {
                return false;
            }
        }
        settled >= min_ready.required(cache.len())
    }

    /// Consume one watch stream until convergence, its end, or the deadline.
    fn watch_once(
        &self,
        request: &WaitRequest,
        deadline: Option<Instant>,
        mut resource_version: String,
        cache: &mut BTreeMap<String, DynamicObject>,
        events: &mut usize,
    ) -> Result<WatchExit, CoreError> {
        self.check_deadline(request, deadline)?;
        let params = WatchParams {
            resource_version: Some(resource_version.clone()).filter(|rv| !rv.is_empty()),
            timeout: deadline.map(|d| d.saturating_duration_since(Instant::now())),
        };
        // The stream is owned by this frame, so every return below drops it
        // and tears the watch down. It ends by itself once the watch lifetime
        // requested in `params` elapses.
        let stream = match self
            .cluster
            .watch(&request.resource, &request.namespace, &request.selector, &params)
        {
            Ok(s) => s,
            Err(ClusterError::Gone(_)) => return Ok(WatchExit::Expired),
            Err(e) => return Err(e.into()),
        };

        for item in stream {
            let event = match item {
                Ok(event) => event,
                Err(ClusterError::Gone(_)) => return Ok(WatchExit::Expired),
                Err(e) => {
                    // A read cut off by the watch lifetime is the deadline.
                    self.check_deadline(request, deadline)?;
                    return Err(e.into());
                }
            };
            *events += 1;
            if let Some(rv) = event.resource_version() {
                resource_version = rv.to_owned();
            }
            match event {
                WatchEvent::Error(status) if status.code == 410 => return Ok(WatchExit::Expired),
                WatchEvent::Error(status) => {
                    return Err(CoreError::ReadinessObserved {
                        name: status
                            .object_name()
                            .map_or_else(|| request.selector.to_string(), str::to_owned),
                        message: status.message,
                    })
                }
                WatchEvent::Bookmark { .. } => {}
                WatchEvent::Deleted(obj) => {
                    debug!("watch event: DELETED {}", obj.name());
                    cache.remove(obj.name());
                }
                WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
                    let readiness = self.registry.evaluate(&obj);
                    debug!(
                        "watch event: {} rv={} state={} ({})",
                        obj.name(),
                        obj.resource_version().unwrap_or_default(),
                        readiness.state,
                        readiness.message
                    );
                    cache.insert(obj.name().to_owned(), obj);
                    if readiness.state == ReadinessState::Ready
                        && self.all_match(cache, request.min_ready)
                    {
                        info!("all {} objects are ready", cache.len());
                        return Ok(WatchExit::Converged);
                    }
                }
            }
        }
        // The server closed the watch, or the requested lifetime ran out.
        self.check_deadline(request, deadline)?;
        Ok(WatchExit::Ended { resource_version })
    }
}
