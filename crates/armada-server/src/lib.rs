//! HTTP front-end for the Armada orchestration engine.
//!
//! Routes, all under `/api/v1.0`:
//!
//! - `POST /apply?target_manifest=NAME` runs a full apply of the manifests at
//!   the `hrefs` source in the JSON body.
//! - `POST /validatedesign` loads and validates the documents at `href`.
//! - `GET /releases` lists ArmadaChart releases per configured namespace.
//! - `GET /health` answers `OK` without authentication.
//!
//! Every other route requires `X-Identity-Status: Confirmed` and passes the
//! caller's `X-Roles` through the [`PolicyEnforcer`].
//!
//! The [`TestServer`] helper starts a server on a random port for integration testing.

pub mod policy;

pub use policy::{split_roles, PolicyEnforcer};

use armada_cluster::{ClusterClient, LabelSelector, ResourceType};
use armada_core::{load_documents, Engine, EngineOptions, InstallOutcome};
use armada_remote::{token_provider, KeystoneConfig, ManifestSource};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;
use thiserror::Error;
use tiny_http::{Header, Method, Response, Server, StatusCode};
use tracing::{debug, error, info, warn};
use url::form_urlencoded;

pub const RULE_APPLY: &str = "armada:create_endpoints";
pub const RULE_VALIDATE: &str = "armada:validate_manifest";
pub const RULE_RELEASES: &str = "armada:get_release";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {message}")]
    Bind { addr: String, message: String },
    #[error("policy error: {0}")]
    Policy(String),
}

/// Everything a request handler needs; shared by all worker threads.
pub struct ServerState {
    pub cluster: Arc<dyn ClusterClient>,
    pub options: EngineOptions,
    pub policy: PolicyEnforcer,
    pub keystone: KeystoneConfig,
    pub release_namespaces: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ApplyRequest {
    hrefs: String,
    #[serde(default)]
    overrides: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ValidateRequest {
    href: String,
}

fn respond_err(req: tiny_http::Request, code: u16, msg: &str) {
    let _ = req.respond(Response::from_string(msg).with_status_code(StatusCode(code)));
}

fn respond_json(req: tiny_http::Request, code: u16, body: &serde_json::Value) {
    let header = Header::from_bytes("Content-Type", "application/json").expect("valid header");
    let _ = req.respond(
        Response::from_string(body.to_string())
            .with_header(header)
            .with_status_code(StatusCode(code)),
    );
}

fn read_body(req: &mut tiny_http::Request) -> Option<Vec<u8>> {
    let mut body = Vec::new();
    if req.as_reader().read_to_end(&mut body).is_ok() {
        Some(body)
    } else {
        None
    }
}

fn header_value(req: &tiny_http::Request, name: &'static str) -> Option<String> {
    req.headers()
        .iter()
        .find(|h| h.field.equiv(name))
        .map(|h| h.value.as_str().to_owned())
}

fn is_json(req: &tiny_http::Request) -> bool {
    header_value(req, "Content-Type")
        .is_some_and(|ct| ct.split(';').next().is_some_and(|m| m.trim() == "application/json"))
}

/// Split a request URL into its path and decoded query parameters.
pub fn parse_url(url: &str) -> (&str, BTreeMap<String, String>) {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    let params = form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    (path, params)
}

/// Identity and policy gate. Responds and returns `None` when the caller
/// may not proceed.
fn authorize(state: &ServerState, req: tiny_http::Request, rule: &str) -> Option<tiny_http::Request> {
    if header_value(&req, "X-Identity-Status").as_deref() != Some("Confirmed") {
        respond_err(req, 401, "unauthenticated");
        return None;
    }
    let roles = split_roles(&header_value(&req, "X-Roles").unwrap_or_default());
    if !state.policy.enforce(rule, &roles) {
        warn!("policy {rule} denied for roles {roles:?}");
        respond_err(req, 403, "policy does not allow this request");
        return None;
    }
    Some(req)
}

fn release_names(outcomes: &[InstallOutcome]) -> Vec<&str> {
    outcomes.iter().map(|o| o.name.as_str()).collect()
}

fn handle_apply(state: &ServerState, mut req: tiny_http::Request, target: Option<&str>) {
    if !is_json(&req) {
        respond_err(req, 400, "expected application/json");
        return;
    }
    let Some(body) = read_body(&mut req) else {
        respond_err(req, 500, "read error");
        return;
    };
    let request: ApplyRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            respond_err(req, 400, &format!("invalid request body: {e}"));
            return;
        }
    };
    if !request.overrides.is_empty() {
        warn!("ignoring {} document overrides", request.overrides.len());
    }

    let result = ManifestSource::parse(&request.hrefs)
        .map_err(armada_core::CoreError::from)
        .and_then(|source| {
            let auth = token_provider(&state.keystone);
            load_documents(&source, target, &*auth)
        })
        .and_then(|docs| Engine::new(Arc::clone(&state.cluster), state.options.clone()).apply(&docs));
    match result {
        Ok(report) => {
            info!(
                "apply of {} finished: {} installed, {} upgraded",
                request.hrefs,
                report.installed.len(),
                report.upgraded.len()
            );
            let body = json!({
                "message": {
                    "install": release_names(&report.installed),
                    "upgrade": release_names(&report.upgraded),
                    "diff": [],
                    "purge": [],
                    "protected": [],
                }
            });
            respond_json(req, 200, &body);
        }
        Err(e) => {
            error!("apply of {} failed: {e}", request.hrefs);
            respond_err(req, 500, &format!("apply error: {e}"));
        }
    }
}

fn validation_status(errors: &[String]) -> serde_json::Value {
    let ok = errors.is_empty();
    let messages: Vec<_> = errors
        .iter()
        .map(|m| json!({"message": m, "error": true}))
        .collect();
    json!({
        "kind": "Status",
        "apiVersion": "v1.0",
        "metadata": {},
        "reason": "Validation",
        "details": {"errorCount": errors.len(), "messageList": messages},
        "status": if ok { "Success" } else { "Failure" },
        "message": if ok { "Armada validations succeeded" } else { "Armada validations failed" },
        "code": if ok { 200 } else { 400 },
    })
}

fn handle_validate(state: &ServerState, mut req: tiny_http::Request) {
    let Some(body) = read_body(&mut req) else {
        respond_err(req, 500, "read error");
        return;
    };
    let request: ValidateRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            respond_err(req, 400, &format!("invalid request body: {e}"));
            return;
        }
    };
    let result = ManifestSource::parse(&request.href)
        .map_err(armada_core::CoreError::from)
        .and_then(|source| {
            let auth = token_provider(&state.keystone);
            load_documents(&source, None, &*auth)
        });
    match result {
        Ok(docs) => {
            debug!("validated {} charts from {}", docs.charts().len(), request.href);
            respond_json(req, 200, &validation_status(&[]));
        }
        Err(e) => {
            info!("validation of {} failed: {e}", request.href);
            respond_json(req, 400, &validation_status(&[e.to_string()]));
        }
    }
}

fn handle_releases(state: &ServerState, req: tiny_http::Request) {
    let resource = ResourceType::armada_charts();
    let mut releases = serde_json::Map::new();
    for ns in &state.release_namespaces {
        match state.cluster.list(&resource, ns, &LabelSelector::everything()) {
            Ok(list) => {
                let names: Vec<_> = list.items.iter().map(|o| json!(o.name())).collect();
                releases.insert(ns.clone(), serde_json::Value::Array(names));
            }
            Err(e) => {
                error!("listing releases in {ns}: {e}");
                respond_err(req, 500, &format!("cluster error: {e}"));
                return;
            }
        }
    }
    respond_json(req, 200, &json!({ "releases": releases }));
}

/// Handle a single HTTP request, dispatching to the appropriate route handler.
pub fn handle_request(state: &ServerState, req: tiny_http::Request) {
    let method = req.method().clone();
    let url = req.url().to_owned();
    debug!("{method} {url}");
    let (path, params) = parse_url(&url);

    match (&method, path) {
        (Method::Get, "/api/v1.0/health") => {
            let _ = req.respond(Response::from_string("OK"));
        }
        (Method::Post, "/api/v1.0/apply") => {
            if let Some(req) = authorize(state, req, RULE_APPLY) {
                let target = params.get("target_manifest").map(String::as_str);
                handle_apply(state, req, target.filter(|t| !t.is_empty()));
            }
        }
        (Method::Post, "/api/v1.0/validatedesign") => {
            if let Some(req) = authorize(state, req, RULE_VALIDATE) {
                handle_validate(state, req);
            }
        }
        (Method::Get, "/api/v1.0/releases") => {
            if let Some(req) = authorize(state, req, RULE_RELEASES) {
                handle_releases(state, req);
            }
        }
        (_, "/api/v1.0/health" | "/api/v1.0/apply" | "/api/v1.0/validatedesign" | "/api/v1.0/releases") => {
            respond_err(req, 405, "method not allowed");
        }
        _ => respond_err(req, 404, "not found"),
    }
}

fn serve(server: &Server, state: &Arc<ServerState>) {
    for request in server.incoming_requests() {
        let state = Arc::clone(state);
        std::thread::spawn(move || handle_request(&state, request));
    }
}

/// Start the server loop, blocking the current thread. Each request is
/// handled on its own thread so long applies do not block health checks.
pub fn run_server(state: &Arc<ServerState>, addr: &str) -> Result<(), ServerError> {
    let server = Server::http(addr).map_err(|e| ServerError::Bind {
        addr: addr.to_owned(),
        message: e.to_string(),
    })?;
    info!("armada server listening on {addr}");
    serve(&server, state);
    Ok(())
}

/// A test helper that starts the server on a random port in a background thread.
///
/// Drop the `TestServer` to stop the server (via `Server::unblock`).
pub struct TestServer {
    pub url: String,
    pub port: u16,
    server: Arc<Server>,
    _handle: std::thread::JoinHandle<()>,
}

impl TestServer {
    pub fn start(state: ServerState) -> Self {
        let server =
            Arc::new(Server::http("127.0.0.1:0").expect("failed to bind test HTTP server"));
        let port = server
            .server_addr()
            .to_ip()
            .expect("not an IP addr")
            .port();
        let url = format!("http://127.0.0.1:{port}");

        let state = Arc::new(state);
        let srv = Arc::clone(&server);
        let handle = std::thread::spawn(move || serve(&srv, &state));

        Self {
            url,
            port,
            server,
            _handle: handle,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.unblock();
    }
}
