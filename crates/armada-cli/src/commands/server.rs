use super::{Context, Failure, EXIT_FAILURE, EXIT_SUCCESS};
use armada_core::EngineOptions;
use armada_server::{run_server, PolicyEnforcer, ServerState};
use std::sync::Arc;

pub fn run(ctx: &Context, bind: Option<&str>) -> Result<u8, Failure> {
    let server = &ctx.config.server;
    let policy = PolicyEnforcer::load(&server.policy_file)
        .map_err(|e| Failure::new(EXIT_FAILURE, e.to_string()))?;
    let state = Arc::new(ServerState {
        cluster: ctx.cluster()?,
        options: EngineOptions::from_config(&ctx.config.apply),
        policy,
        keystone: ctx.config.keystone_authtoken.clone(),
        release_namespaces: server.release_namespaces.clone(),
    });
    let addr = bind.unwrap_or(&server.bind);
    run_server(&state, addr).map_err(|e| Failure::new(EXIT_FAILURE, e.to_string()))?;
    Ok(EXIT_SUCCESS)
}
