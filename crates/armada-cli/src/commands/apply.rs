use super::{
    colorize_action, json_pretty, spin_fail, spin_ok, spinner, Context, Failure, EXIT_SUCCESS,
};
use armada_core::{load_documents, CoreError, Engine, EngineOptions, Shutdown};
use armada_remote::{token_provider, ManifestSource};

pub fn run(
    ctx: &Context,
    source: &str,
    target_manifest: Option<&str>,
    json: bool,
) -> Result<u8, Failure> {
    let source = ManifestSource::parse(source).map_err(CoreError::from)?;
    let auth = token_provider(&ctx.config.keystone_authtoken);
    let docs = load_documents(&source, target_manifest, &*auth)?;
    let cluster = ctx.cluster()?;

    let shutdown = Shutdown::new();
    shutdown.install_signal_handler();
    let engine = Engine::new(cluster, EngineOptions::from_config(&ctx.config.apply))
        .with_shutdown(shutdown);

    let manifest = docs.manifest().name().to_string();
    let pb = if json {
        None
    } else {
        Some(spinner(&format!("applying manifest {manifest}...")))
    };
    let report = match engine.apply(&docs) {
        Ok(r) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, &format!("manifest {manifest} applied"));
            }
            r
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, &format!("manifest {manifest} failed"));
            }
            return Err(e.into());
        }
    };

    if json {
        println!("{}", json_pretty(&report)?);
    } else if report.is_empty() {
        println!("no charts to apply");
    } else {
        for outcome in report.installed.iter().chain(&report.upgraded) {
            println!(
                "{:<10} {} ({}/{})",
                colorize_action(outcome.action),
                outcome.chart,
                outcome.namespace,
                outcome.name
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
