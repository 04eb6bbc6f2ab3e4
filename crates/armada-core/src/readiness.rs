use armada_cluster::{DynamicObject, ARMADA_CHART_KIND};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReadinessState {
    Ready,
    Skipped,
    Unready,
    Error,
}

impl ReadinessState {
    /// Ready and skipped objects both count toward convergence.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Ready | Self::Skipped)
    }
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ready => "READY",
            Self::Skipped => "SKIPPED",
            Self::Unready => "UNREADY",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readiness {
    pub state: ReadinessState,
    pub message: String,
}

impl Readiness {
    pub fn new(state: ReadinessState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
        }
    }
}

/// Readiness rule for one resource kind.
pub trait HasReadiness: Send + Sync {
    fn readiness(&self, object: &DynamicObject) -> Readiness;
}

/// An ArmadaChart is ready once the controller has observed its latest
/// generation and reports a `Ready=True` condition.
pub struct ArmadaChartReadiness;

impl HasReadiness for ArmadaChartReadiness {
    fn readiness(&self, object: &DynamicObject) -> Readiness {
        let name = object.name();
        let status = object.status();
        let observed = status
            .and_then(|s| s.get("observedGeneration"))
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(0);
        let generation = object.metadata.generation.unwrap_or(0);
        if observed == generation {
            let ready = status
                .and_then(|s| s.get("conditions"))
                .and_then(serde_json::Value::as_array)
                .is_some_and(|conds| {
                    conds
                        .iter()
                        .any(|c| c["type"] == "Ready" && c["status"] == "True")
                });
            if ready {
                return Readiness::new(ReadinessState::Ready, format!("armadachart {name} ready"));
            }
        }
        Readiness::new(
            ReadinessState::Unready,
            format!("waiting for armadachart {name} to be ready"),
        )
    }
}

/// Maps resource kinds to their readiness rule.
pub struct ReadinessRegistry {
    rules: HashMap<String, Box<dyn HasReadiness>>,
}

impl Default for ReadinessRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(ARMADA_CHART_KIND, ArmadaChartReadiness);
        registry
    }
}

impl ReadinessRegistry {
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: &str, rule: impl HasReadiness + 'static) {
        self.rules.insert(kind.to_owned(), Box::new(rule));
    }

    pub fn supports(&self, kind: &str) -> bool {
        self.rules.contains_key(kind)
    }

    /// Objects of an unregistered kind evaluate to `ERROR`.
    pub fn evaluate(&self, object: &DynamicObject) -> Readiness {
        match self.rules.get(&object.kind) {
            Some(rule) => rule.readiness(object),
            None => Readiness::new(
                ReadinessState::Error,
                format!(
                    "no readiness rule for kind '{}' (object {})",
                    object.kind,
                    object.name()
                ),
            ),
        }
    }
}
