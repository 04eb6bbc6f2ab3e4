use super::{Context, Failure, EXIT_FAILURE, EXIT_SUCCESS};
use armada_cluster::{LabelSelector, ResourceType};
use armada_core::{MinReady, ReadinessRegistry, WaitOutcome, WaitRequest, Waiter};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct WaitArgs {
    pub resource_type: String,
    pub namespace: String,
    pub label_selector: String,
    pub timeout: Option<Duration>,
    pub min_ready: String,
}

impl WaitArgs {
    /// Validate the flags into a wait request before any cluster call.
    pub fn request(&self) -> Result<WaitRequest, Failure> {
        let resource = ResourceType::lookup(&self.resource_type).ok_or_else(|| {
            Failure::new(
                EXIT_FAILURE,
                format!("unknown resource type '{}'", self.resource_type),
            )
        })?;
        let selector = LabelSelector::parse(&self.label_selector)
            .map_err(|e| Failure::new(EXIT_FAILURE, e.to_string()))?;
        let min_ready = self
            .min_ready
            .parse::<MinReady>()
            .map_err(|e| Failure::new(EXIT_FAILURE, e.to_string()))?;
        Ok(WaitRequest {
            resource,
            namespace: self.namespace.clone(),
            selector,
            timeout: self.timeout,
            min_ready,
        })
    }
}

pub fn run(ctx: &Context, args: &WaitArgs) -> Result<u8, Failure> {
    let request = args.request()?;
    let cluster = ctx.cluster()?;
    let registry = ReadinessRegistry::default();
    let outcome = Waiter::new(&*cluster, &registry).wait(&request)?;

    match outcome {
        WaitOutcome::NothingToWait => {
            println!("no {} match {} in {}", request.resource, request.selector, request.namespace);
        }
        WaitOutcome::AlreadyReady { total } => {
            println!("all {total} {} already ready", request.resource);
        }
        WaitOutcome::Converged { total, events } => {
            println!("{total} {} ready after {events} events", request.resource);
        }
    }
    Ok(EXIT_SUCCESS)
}
