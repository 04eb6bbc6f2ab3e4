use super::{Context, Failure, EXIT_SUCCESS};
use armada_core::{load_documents, CoreError};
use armada_remote::{token_provider, ManifestSource};
use tracing::warn;

pub fn run(ctx: &Context, source: &str, target_manifest: Option<&str>) -> Result<u8, Failure> {
    let source = ManifestSource::parse(source).map_err(CoreError::from)?;
    let auth = token_provider(&ctx.config.keystone_authtoken);
    let docs = load_documents(&source, target_manifest, &*auth)?;

    for (namespace, name) in docs.resource_name_collisions() {
        warn!("several charts map to resource {name} in namespace {namespace}");
    }
    println!(
        "manifest {} is valid: {} chart groups, {} charts",
        docs.manifest().name(),
        docs.ordered_groups().len(),
        docs.reachable_charts().len()
    );
    Ok(EXIT_SUCCESS)
}
