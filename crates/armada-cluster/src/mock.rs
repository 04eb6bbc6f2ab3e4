use crate::{
    ApiStatus, ClusterClient, ClusterError, DynamicObject, LabelSelector, ObjectList,
    ResourceType, WatchEvent, WatchParams, WatchStream,
};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// One recorded call against the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterCall {
    GetNamespace(String),
    CreateNamespace(String),
    GetCrd(String),
    CreateCrd(String),
    Get {
        namespace: String,
        name: String,
    },
    Create {
        namespace: String,
        name: String,
    },
    Update {
        namespace: String,
        name: String,
        resource_version: Option<String>,
    },
    List {
        namespace: String,
        selector: String,
    },
    Watch {
        namespace: String,
        selector: String,
        resource_version: Option<String>,
    },
}

impl ClusterCall {
    /// Object name the call targets, for namespace and CRD calls the name
    /// of that namespace or definition.
    pub fn target(&self) -> &str {
        match self {
            Self::GetNamespace(n) | Self::CreateNamespace(n) | Self::GetCrd(n) | Self::CreateCrd(n) => n,
            Self::Get { name, .. } | Self::Create { name, .. } | Self::Update { name, .. } => name,
            Self::List { selector, .. } | Self::Watch { selector, .. } => selector,
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::CreateNamespace(_) | Self::CreateCrd(_) | Self::Create { .. } | Self::Update { .. }
        )
    }
}

/// Operations a failure can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MockOp {
    GetNamespace,
    CreateNamespace,
    GetCrd,
    CreateCrd,
    Get,
    Create,
    Update,
    List,
    Watch,
}

type EventSender = Sender<Result<WatchEvent, ClusterError>>;

/// Test-side handle of a scripted watch; events sent here are delivered to
/// the next `watch` call. Dropping it ends that stream.
pub struct WatchFeed {
    tx: EventSender,
}

impl WatchFeed {
    pub fn send(&self, event: WatchEvent) {
        let _ = self.tx.send(Ok(event));
    }

    pub fn modified(&self, object: DynamicObject) {
        self.send(WatchEvent::Modified(object));
    }

    pub fn error(&self, code: u16, message: &str) {
        self.send(WatchEvent::Error(ApiStatus {
            code,
            reason: String::new(),
            message: message.to_owned(),
            details: None,
        }));
    }

    pub fn fail(&self, error: ClusterError) {
        let _ = self.tx.send(Err(error));
    }
}

struct Watcher {
    plural: String,
    namespace: String,
    selector: LabelSelector,
    tx: EventSender,
}

#[derive(Default)]
struct State {
    namespaces: BTreeSet<String>,
    crds: BTreeMap<String, DynamicObject>,
    objects: BTreeMap<(String, String, String), DynamicObject>,
    revision: u64,
    history: Vec<(u64, String, WatchEvent)>,
    calls: Vec<ClusterCall>,
    conflicts: BTreeMap<String, u32>,
    failures: BTreeMap<(MockOp, String), (u16, String)>,
    unready: BTreeSet<String>,
    scripted: VecDeque<Receiver<Result<WatchEvent, ClusterError>>>,
    watchers: Vec<Watcher>,
    manual_status: bool,
}

impl State {
    fn bump(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn injected(&self, op: MockOp, name: &str) -> Result<(), ClusterError> {
        let hit = self
            .failures
            .get(&(op, name.to_owned()))
            .or_else(|| self.failures.get(&(op, String::new())));
        match hit {
            Some((code, message)) => Err(ClusterError::from_status(*code, message.clone())),
            None => Ok(()),
        }
    }

    fn ready_status(&self, object: &DynamicObject) -> serde_json::Value {
        let generation = object.metadata.generation.unwrap_or(1);
        if self.unready.contains(object.name()) {
            json!({
                "observedGeneration": generation - 1,
                "conditions": [{"type": "Ready", "status": "False", "reason": "Progressing"}]
            })
        } else {
            json!({
                "observedGeneration": generation,
                "conditions": [{"type": "Ready", "status": "True"}]
            })
        }
    }

    /// Store an object under a new revision and notify matching watchers.
    fn commit(&mut self, plural: &str, mut object: DynamicObject, added: bool) -> DynamicObject {
        object.metadata.resource_version = Some(self.bump());
        let key = (
            plural.to_owned(),
            object.namespace().to_owned(),
            object.name().to_owned(),
        );
        self.objects.insert(key, object.clone());
        let event = if added {
            WatchEvent::Added(object.clone())
        } else {
            WatchEvent::Modified(object.clone())
        };
        self.publish(plural, event);
        object
    }

    fn publish(&mut self, plural: &str, event: WatchEvent) {
        self.history
            .push((self.revision, plural.to_owned(), event.clone()));
        let Some(object) = event.object() else { return };
        let (namespace, labels) = (object.namespace().to_owned(), object.metadata.labels.clone());
        self.watchers.retain(|w| {
            if w.plural != plural || w.namespace != namespace || !w.selector.matches(&labels) {
                return true;
            }
            w.tx.send(Ok(event.clone())).is_ok()
        });
    }
}

/// In-memory cluster for tests.
///
/// Objects get a fresh `resourceVersion` on every write and, unless status
/// management is switched to manual, a status that the ArmadaChart readiness
/// rule reports as ready. Watches replay history after the requested version
/// and then follow live writes; `scripted_watch` overrides the next watch with
/// a test-controlled stream.
pub struct MockCluster {
    state: Mutex<State>,
    latency: Mutex<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Default for MockCluster {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::default()),
            latency: Mutex::new(Duration::ZERO),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every call so far, in arrival order.
    pub fn calls(&self) -> Vec<ClusterCall> {
        self.state().calls.clone()
    }

    pub fn calls_matching(&self, pred: impl Fn(&ClusterCall) -> bool) -> Vec<ClusterCall> {
        self.state().calls.iter().filter(|c| pred(c)).cloned().collect()
    }

    pub fn creates(&self) -> usize {
        self.calls_matching(|c| matches!(c, ClusterCall::Create { .. }))
            .len()
    }

    pub fn updates(&self) -> usize {
        self.calls_matching(|c| matches!(c, ClusterCall::Update { .. }))
            .len()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn add_namespace(&self, name: &str) {
        self.state().namespaces.insert(name.to_owned());
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.state().namespaces.contains(name)
    }

    pub fn add_crd(&self, name: &str) {
        let crd = DynamicObject::new(
            "apiextensions.k8s.io/v1",
            "CustomResourceDefinition",
            name,
            "",
        );
        self.state().crds.insert(name.to_owned(), crd);
    }

    pub fn crd(&self, name: &str) -> Option<DynamicObject> {
        self.state().crds.get(name).cloned()
    }

    /// Store an object as-is, bypassing call recording and status management.
    pub fn insert(&self, resource: &ResourceType, object: DynamicObject) -> DynamicObject {
        self.state().commit(&resource.plural, object, true)
    }

    pub fn object(&self, resource: &ResourceType, namespace: &str, name: &str) -> Option<DynamicObject> {
        self.state()
            .objects
            .get(&(resource.plural.clone(), namespace.to_owned(), name.to_owned()))
            .cloned()
    }

    /// Replace the status of a stored object, notifying watchers.
    pub fn set_status(
        &self,
        resource: &ResourceType,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Option<DynamicObject> {
        let mut state = self.state();
        let key = (resource.plural.clone(), namespace.to_owned(), name.to_owned());
        let mut object = state.objects.get(&key)?.clone();
        object.set_status(status);
        Some(state.commit(&resource.plural, object, false))
    }

    /// Release a held object: give it a ready status and notify watchers.
    pub fn mark_ready(&self, resource: &ResourceType, namespace: &str, name: &str) -> Option<DynamicObject> {
        let mut state = self.state();
        state.unready.remove(name);
        let key = (resource.plural.clone(), namespace.to_owned(), name.to_owned());
        let mut object = state.objects.get(&key)?.clone();
        let status = state.ready_status(&object);
        object.set_status(status);
        Some(state.commit(&resource.plural, object, false))
    }

    pub fn delete(&self, resource: &ResourceType, namespace: &str, name: &str) -> Option<DynamicObject> {
        let mut state = self.state();
        let key = (resource.plural.clone(), namespace.to_owned(), name.to_owned());
        let mut object = state.objects.remove(&key)?;
        object.metadata.resource_version = Some(state.bump());
        state.publish(&resource.plural, WatchEvent::Deleted(object.clone()));
        Some(object)
    }

    /// Objects with this name get a not-ready status on create and update
    /// until `mark_ready` is called.
    pub fn hold_unready(&self, name: &str) {
        self.state().unready.insert(name.to_owned());
    }

    /// Leave `status` untouched on create and update.
    pub fn manual_status(&self) {
        self.state().manual_status = true;
    }

    /// The next `times` updates of `name` fail with an optimistic-concurrency
    /// conflict.
    pub fn inject_conflicts(&self, name: &str, times: u32) {
        self.state().conflicts.insert(name.to_owned(), times);
    }

    /// Every `op` on `name` fails with the given status; an empty name
    /// matches any target.
    pub fn fail(&self, op: MockOp, name: &str, code: u16, message: &str) {
        self.state()
            .failures
            .insert((op, name.to_owned()), (code, message.to_owned()));
    }

    /// The next `watch` call streams whatever the returned feed sends.
    pub fn scripted_watch(&self) -> WatchFeed {
        let (tx, rx) = mpsc::channel();
        self.state().scripted.push_back(rx);
        WatchFeed { tx }
    }

    /// Artificial delay applied to every get, create and update.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// Highest number of get/create/update calls observed in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn simulate_latency(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
        InFlight(&self.in_flight)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Watch stream backed by a channel; ends when the sender side is gone or
/// the requested watch lifetime elapses.
struct ChannelWatch {
    rx: Receiver<Result<WatchEvent, ClusterError>>,
    deadline: Option<Instant>,
}

impl Iterator for ChannelWatch {
    type Item = Result<WatchEvent, ClusterError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                self.rx.recv_timeout(remaining).ok()
            }
            None => self.rx.recv().ok(),
        }
    }
}

impl ClusterClient for MockCluster {
    fn name(&self) -> &str {
        "mock"
    }

    fn get_namespace(&self, name: &str) -> Result<DynamicObject, ClusterError> {
        let mut state = self.state();
        state.calls.push(ClusterCall::GetNamespace(name.to_owned()));
        state.injected(MockOp::GetNamespace, name)?;
        if state.namespaces.contains(name) {
            Ok(DynamicObject::new("v1", "Namespace", name, ""))
        } else {
            Err(ClusterError::NotFound(format!("namespaces \"{name}\" not found")))
        }
    }

    fn create_namespace(&self, name: &str) -> Result<DynamicObject, ClusterError> {
        let mut state = self.state();
        state.calls.push(ClusterCall::CreateNamespace(name.to_owned()));
        state.injected(MockOp::CreateNamespace, name)?;
        if !state.namespaces.insert(name.to_owned()) {
            return Err(ClusterError::AlreadyExists(format!(
                "namespaces \"{name}\" already exists"
            )));
        }
        Ok(DynamicObject::new("v1", "Namespace", name, ""))
    }

    fn get_crd(&self, name: &str) -> Result<DynamicObject, ClusterError> {
        let mut state = self.state();
        state.calls.push(ClusterCall::GetCrd(name.to_owned()));
        state.injected(MockOp::GetCrd, name)?;
        state.crds.get(name).cloned().ok_or_else(|| {
            ClusterError::NotFound(format!(
                "customresourcedefinitions.apiextensions.k8s.io \"{name}\" not found"
            ))
        })
    }

    fn create_crd(&self, definition: &serde_json::Value) -> Result<DynamicObject, ClusterError> {
        let crd: DynamicObject = serde_json::from_value(definition.clone())?;
        let name = crd.name().to_owned();
        let mut state = self.state();
        state.calls.push(ClusterCall::CreateCrd(name.clone()));
        state.injected(MockOp::CreateCrd, &name)?;
        if state.crds.contains_key(&name) {
            return Err(ClusterError::AlreadyExists(format!(
                "customresourcedefinitions.apiextensions.k8s.io \"{name}\" already exists"
            )));
        }
        state.crds.insert(name, crd.clone());
        Ok(crd)
    }

    fn get(
        &self,
        resource: &ResourceType,
        namespace: &str,
        name: &str,
    ) -> Result<DynamicObject, ClusterError> {
        let _guard = self.simulate_latency();
        let mut state = self.state();
        state.calls.push(ClusterCall::Get {
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        });
        state.injected(MockOp::Get, name)?;
        state
            .objects
            .get(&(resource.plural.clone(), namespace.to_owned(), name.to_owned()))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("{} \"{name}\" not found", resource.plural)))
    }

    fn create(
        &self,
        resource: &ResourceType,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError> {
        let _guard = self.simulate_latency();
        let mut state = self.state();
        let (namespace, name) = (object.namespace().to_owned(), object.name().to_owned());
        state.calls.push(ClusterCall::Create {
            namespace: namespace.clone(),
            name: name.clone(),
        });
        state.injected(MockOp::Create, &name)?;
        let key = (resource.plural.clone(), namespace, name.clone());
        if state.objects.contains_key(&key) {
            return Err(ClusterError::AlreadyExists(format!(
                "{} \"{name}\" already exists",
                resource.plural
            )));
        }
        let mut stored = object.clone();
        stored.metadata.generation = Some(1);
        if !state.manual_status {
            let status = state.ready_status(&stored);
            stored.set_status(status);
        }
        Ok(state.commit(&resource.plural, stored, true))
    }

    fn update(
        &self,
        resource: &ResourceType,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError> {
        let _guard = self.simulate_latency();
        let mut state = self.state();
        let (namespace, name) = (object.namespace().to_owned(), object.name().to_owned());
        state.calls.push(ClusterCall::Update {
            namespace: namespace.clone(),
            name: name.clone(),
            resource_version: object.metadata.resource_version.clone(),
        });
        state.injected(MockOp::Update, &name)?;

        let conflict = || {
            ClusterError::Conflict(format!(
                "Operation cannot be fulfilled on {resource} \"{name}\": the object has been modified; please apply your changes to the latest version and try again"
            ))
        };
        if let Some(remaining) = state.conflicts.get_mut(&name) {
            if *remaining > 0 {
                *remaining -= 1;
                // Someone else wrote in between: the stored version moves on.
                let key = (resource.plural.clone(), namespace.clone(), name.clone());
                if let Some(current) = state.objects.get(&key).cloned() {
                    state.commit(&resource.plural, current, false);
                }
                return Err(conflict());
            }
        }

        let key = (resource.plural.clone(), namespace, name.clone());
        let current = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("{} \"{name}\" not found", resource.plural)))?;
        if object.metadata.resource_version != current.metadata.resource_version {
            return Err(conflict());
        }

        let mut stored = object.clone();
        stored.metadata.generation = Some(current.metadata.generation.unwrap_or(0) + 1);
        if state.manual_status {
            if let Some(status) = current.status() {
                stored.set_status(status.clone());
            }
        } else {
            let status = state.ready_status(&stored);
            stored.set_status(status);
        }
        Ok(state.commit(&resource.plural, stored, false))
    }

    fn list(
        &self,
        resource: &ResourceType,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<ObjectList, ClusterError> {
        let mut state = self.state();
        state.calls.push(ClusterCall::List {
            namespace: namespace.to_owned(),
            selector: selector.to_string(),
        });
        state.injected(MockOp::List, "")?;
        let items = state
            .objects
            .iter()
            .filter(|((plural, ns, _), obj)| {
                *plural == resource.plural
                    && ns == namespace
                    && selector.matches(&obj.metadata.labels)
            })
            .map(|(_, obj)| obj.clone())
            .collect();
        Ok(ObjectList {
            resource_version: state.revision.to_string(),
            items,
        })
    }

    fn watch(
        &self,
        resource: &ResourceType,
        namespace: &str,
        selector: &LabelSelector,
        params: &WatchParams,
    ) -> Result<WatchStream, ClusterError> {
        let mut state = self.state();
        state.calls.push(ClusterCall::Watch {
            namespace: namespace.to_owned(),
            selector: selector.to_string(),
            resource_version: params.resource_version.clone(),
        });
        state.injected(MockOp::Watch, "")?;
        let deadline = params.timeout.map(|t| Instant::now() + t);

        if let Some(rx) = state.scripted.pop_front() {
            return Ok(Box::new(ChannelWatch { rx, deadline }));
        }

        let since: u64 = match params.resource_version.as_deref() {
            Some(rv) => rv
                .parse()
                .map_err(|_| ClusterError::Api {
                    code: 400,
                    message: format!("invalid resource version '{rv}'"),
                })?,
            None => state.revision,
        };
        let (tx, rx) = mpsc::channel();
        for (rev, plural, event) in &state.history {
            let Some(object) = event.object() else { continue };
            if *rev > since
                && *plural == resource.plural
                && object.namespace() == namespace
                && selector.matches(&object.metadata.labels)
            {
                let _ = tx.send(Ok(event.clone()));
            }
        }
        state.watchers.push(Watcher {
            plural: resource.plural.clone(),
            namespace: namespace.to_owned(),
            selector: selector.clone(),
            tx,
        });
        Ok(Box::new(ChannelWatch { rx, deadline }))
    }
}
