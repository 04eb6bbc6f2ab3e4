use crate::object::RawList;
use crate::{
    ApiStatus, ClusterClient, ClusterError, DynamicObject, LabelSelector, ObjectList,
    ResourceType, WatchEvent, WatchParams, WatchStream,
};
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const CRD_COLLECTION: &str = "/apis/apiextensions.k8s.io/v1/customresourcedefinitions";
const NAMESPACE_COLLECTION: &str = "/api/v1/namespaces";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Slack past a watch's `timeoutSeconds` before the client gives up on a
/// server that did not close the stream.
const WATCH_GRACE: Duration = Duration::from_secs(5);

/// Connection settings for one API server.
#[derive(Debug, Clone, Default)]
pub struct KubeConfig {
    pub server: String,
    pub ca_pem: Option<Vec<u8>>,
    pub token: Option<String>,
    pub client_cert_pem: Option<Vec<u8>>,
    pub client_key_pem: Option<Vec<u8>>,
    pub insecure: bool,
}

impl KubeConfig {
    /// Resolve the connection: an explicit kubeconfig wins, then the in-cluster
    /// service account, then `KUBECONFIG`, then `~/.kube/config`.
    pub fn infer(kubeconfig: Option<&Path>) -> Result<Self, ClusterError> {
        if let Some(path) = kubeconfig {
            return Self::from_kubeconfig(path);
        }
        match Self::in_cluster() {
            Ok(config) => return Ok(config),
            Err(e) => debug!("unable to load in-cluster config: {e}"),
        }
        let path = match std::env::var("KUBECONFIG") {
            Ok(v) if !v.is_empty() => {
                PathBuf::from(v.split(':').next().unwrap_or_default())
            }
            _ => {
                let home = std::env::var("HOME").map_err(|_| {
                    ClusterError::Config("no kubeconfig found and HOME is not set".to_owned())
                })?;
                PathBuf::from(home).join(".kube").join("config")
            }
        };
        Self::from_kubeconfig(&path)
    }

    pub fn in_cluster() -> Result<Self, ClusterError> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| ClusterError::Config("KUBERNETES_SERVICE_HOST is not set".to_owned()))?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT")
            .map_err(|_| ClusterError::Config("KUBERNETES_SERVICE_PORT is not set".to_owned()))?;
        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        let token = std::fs::read_to_string(dir.join("token"))?;
        let ca = std::fs::read(dir.join("ca.crt"))?;
        let host = if host.contains(':') {
            format!("[{host}]")
        } else {
            host
        };
        Ok(Self {
            server: format!("https://{host}:{port}"),
            ca_pem: Some(ca),
            token: Some(token.trim().to_owned()),
            ..Self::default()
        })
    }

    pub fn from_kubeconfig(path: &Path) -> Result<Self, ClusterError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClusterError::Config(format!("failed to read kubeconfig {}: {e}", path.display()))
        })?;
        Self::from_kubeconfig_str(&content, path.parent())
    }

    /// Parse kubeconfig YAML and resolve its current context. Relative file
    /// references resolve against `base_dir`.
    pub fn from_kubeconfig_str(content: &str, base_dir: Option<&Path>) -> Result<Self, ClusterError> {
        let file: KubeconfigFile = serde_yaml::from_str(content)
            .map_err(|e| ClusterError::Config(format!("invalid kubeconfig: {e}")))?;

        let context_name = file.current_context.as_str();
        let context = file
            .contexts
            .iter()
            .find(|c| c.name == context_name)
            .map(|c| &c.context)
            .ok_or_else(|| {
                ClusterError::Config(format!("context '{context_name}' not found in kubeconfig"))
            })?;
        let cluster = file
            .clusters
            .iter()
            .find(|c| c.name == context.cluster)
            .map(|c| &c.cluster)
            .ok_or_else(|| {
                ClusterError::Config(format!("cluster '{}' not found in kubeconfig", context.cluster))
            })?;
        let user = file
            .users
            .iter()
            .find(|u| u.name == context.user)
            .map(|u| u.user.clone())
            .unwrap_or_default();

        let resolve = |p: &str| match base_dir {
            Some(dir) if Path::new(p).is_relative() => dir.join(p),
            _ => PathBuf::from(p),
        };
        let load = |data: Option<&String>, file: Option<&String>| -> Result<Option<Vec<u8>>, ClusterError> {
            if let Some(data) = data {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(data.trim())
                    .map_err(|e| ClusterError::Config(format!("invalid base64 in kubeconfig: {e}")))?;
                return Ok(Some(bytes));
            }
            match file {
                Some(f) => Ok(Some(std::fs::read(resolve(f))?)),
                None => Ok(None),
            }
        };

        let token = match (&user.token, &user.token_file) {
            (Some(t), _) => Some(t.clone()),
            (None, Some(f)) => Some(std::fs::read_to_string(resolve(f))?.trim().to_owned()),
            (None, None) => None,
        };

        Ok(Self {
            server: cluster.server.trim_end_matches('/').to_owned(),
            ca_pem: load(
                cluster.certificate_authority_data.as_ref(),
                cluster.certificate_authority.as_ref(),
            )?,
            token,
            client_cert_pem: load(
                user.client_certificate_data.as_ref(),
                user.client_certificate.as_ref(),
            )?,
            client_key_pem: load(user.client_key_data.as_ref(), user.client_key.as_ref())?,
            insecure: cluster.insecure_skip_tls_verify,
        })
    }

    fn tls_config(&self) -> Result<ureq::tls::TlsConfig, ClusterError> {
        use ureq::tls::{ClientCert, PrivateKey, RootCerts, TlsConfig};

        let mut builder = TlsConfig::builder().disable_verification(self.insecure);
        if let Some(ca) = &self.ca_pem {
            let certs = pem_certificates(ca)?;
            builder = builder.root_certs(RootCerts::new_with_certs(&certs));
        }
        if let (Some(cert), Some(key)) = (&self.client_cert_pem, &self.client_key_pem) {
            let chain = pem_certificates(cert)?;
            let key = PrivateKey::from_pem(key)
                .map_err(|e| ClusterError::Config(format!("invalid client key: {e}")))?;
            builder = builder.client_cert(Some(ClientCert::new_with_certs(&chain, key)));
        }
        Ok(builder.build())
    }
}

fn pem_certificates(pem: &[u8]) -> Result<Vec<ureq::tls::Certificate<'static>>, ClusterError> {
    let mut certs = Vec::new();
    for item in ureq::tls::parse_pem(pem) {
        let item = item.map_err(|e| ClusterError::Config(format!("invalid PEM: {e}")))?;
        if let ureq::tls::PemItem::Certificate(c) = item {
            certs.push(c);
        }
    }
    if certs.is_empty() {
        return Err(ClusterError::Config("no certificate in PEM data".to_owned()));
    }
    Ok(certs)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct KubeconfigFile {
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    users: Vec<NamedUser>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default)]
    current_context: String,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: ClusterEntry,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClusterEntry {
    server: String,
    #[serde(default)]
    certificate_authority: Option<String>,
    #[serde(default)]
    certificate_authority_data: Option<String>,
    #[serde(default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: UserEntry,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct UserEntry {
    #[serde(default)]
    token: Option<String>,
    #[serde(default, rename = "tokenFile")]
    token_file: Option<String>,
    #[serde(default)]
    client_certificate: Option<String>,
    #[serde(default)]
    client_certificate_data: Option<String>,
    #[serde(default)]
    client_key: Option<String>,
    #[serde(default)]
    client_key_data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: ContextEntry,
}

#[derive(Debug, Deserialize)]
struct ContextEntry {
    cluster: String,
    #[serde(default)]
    user: String,
}

/// Kubernetes REST client.
///
/// Plain requests share a bounded agent; watches use a second agent without
/// a global timeout since their lifetime is set server-side.
pub struct KubeClient {
    config: KubeConfig,
    agent: ureq::Agent,
    watch_agent: ureq::Agent,
}

impl KubeClient {
    pub fn new(config: KubeConfig) -> Result<Self, ClusterError> {
        let tls = config.tls_config()?;
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .tls_config(tls.clone())
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build()
            .new_agent();
        let watch_agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .tls_config(tls)
            .build()
            .new_agent();
        Ok(Self {
            config,
            agent,
            watch_agent,
        })
    }

    pub fn infer(kubeconfig: Option<&Path>) -> Result<Self, ClusterError> {
        Self::new(KubeConfig::infer(kubeconfig)?)
    }

    pub fn server(&self) -> &str {
        &self.config.server
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.server)
    }

    fn bearer(&self) -> Option<String> {
        self.config.token.as_ref().map(|t| format!("Bearer {t}"))
    }

    fn do_get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ClusterError> {
        let url = self.url(path);
        debug!("GET {url}");
        let mut req = self.agent.get(&url).header("Accept", "application/json");
        if let Some(auth) = self.bearer() {
            req = req.header("Authorization", &auth);
        }
        for (k, v) in query {
            req = req.query(k, v);
        }
        let resp = req.call().map_err(|e| ClusterError::Http(e.to_string()))?;
        read_json(resp)
    }

    fn do_write<T: DeserializeOwned>(
        &self,
        method: WriteMethod,
        path: &str,
        body: &impl serde::Serialize,
    ) -> Result<T, ClusterError> {
        let url = self.url(path);
        let payload = serde_json::to_vec(body)?;
        let mut req = match method {
            WriteMethod::Post => {
                debug!("POST {url}");
                self.agent.post(&url)
            }
            WriteMethod::Put => {
                debug!("PUT {url}");
                self.agent.put(&url)
            }
        }
        .header("Accept", "application/json")
        .header("Content-Type", "application/json");
        if let Some(auth) = self.bearer() {
            req = req.header("Authorization", &auth);
        }
        let resp = req
            .send(&payload[..])
            .map_err(|e| ClusterError::Http(e.to_string()))?;
        read_json(resp)
    }
}

#[derive(Clone, Copy)]
enum WriteMethod {
    Post,
    Put,
}

fn read_json<T: DeserializeOwned>(resp: ureq::http::Response<ureq::Body>) -> Result<T, ClusterError> {
    let code = resp.status().as_u16();
    let mut body = String::new();
    resp.into_body()
        .into_reader()
        .read_to_string(&mut body)?;
    if code >= 400 {
        return Err(status_error(code, &body));
    }
    Ok(serde_json::from_str(&body)?)
}

fn status_error(code: u16, body: &str) -> ClusterError {
    let message = serde_json::from_str::<ApiStatus>(body)
        .ok()
        .map(|s| s.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("HTTP {code}"));
    ClusterError::from_status(code, message)
}

fn namespace_body(name: &str) -> serde_json::Value {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {"name": name},
    })
}

impl ClusterClient for KubeClient {
    fn name(&self) -> &str {
        "kubernetes"
    }

    fn get_namespace(&self, name: &str) -> Result<DynamicObject, ClusterError> {
        self.do_get(&format!("{NAMESPACE_COLLECTION}/{name}"), &[])
    }

    fn create_namespace(&self, name: &str) -> Result<DynamicObject, ClusterError> {
        self.do_write(WriteMethod::Post, NAMESPACE_COLLECTION, &namespace_body(name))
    }

    fn get_crd(&self, name: &str) -> Result<DynamicObject, ClusterError> {
        self.do_get(&format!("{CRD_COLLECTION}/{name}"), &[])
    }

    fn create_crd(&self, definition: &serde_json::Value) -> Result<DynamicObject, ClusterError> {
        self.do_write(WriteMethod::Post, CRD_COLLECTION, definition)
    }

    fn get(
        &self,
        resource: &ResourceType,
        namespace: &str,
        name: &str,
    ) -> Result<DynamicObject, ClusterError> {
        self.do_get(&resource.object_path(namespace, name), &[])
    }

    fn create(
        &self,
        resource: &ResourceType,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError> {
        self.do_write(
            WriteMethod::Post,
            &resource.collection_path(object.namespace()),
            object,
        )
    }

    fn update(
        &self,
        resource: &ResourceType,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError> {
        self.do_write(
            WriteMethod::Put,
            &resource.object_path(object.namespace(), object.name()),
            object,
        )
    }

    fn list(
        &self,
        resource: &ResourceType,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<ObjectList, ClusterError> {
        let mut query = Vec::new();
        if !selector.is_empty() {
            query.push(("labelSelector", selector.to_string()));
        }
        let raw: RawList = self.do_get(&resource.collection_path(namespace), &query)?;
        let api_version = resource.api_version();
        let items = raw
            .items
            .into_iter()
            .map(|mut item| {
                if item.kind.is_empty() {
                    item.kind.clone_from(&resource.kind);
                }
                if item.api_version.is_empty() {
                    item.api_version.clone_from(&api_version);
                }
                item
            })
            .collect();
        Ok(ObjectList {
            resource_version: raw.metadata.resource_version,
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
        let url = self.url(&resource.collection_path(namespace));
        debug!("WATCH {url} selector={selector}");
        let mut req = self
            .watch_agent
            .get(&url)
            .header("Accept", "application/json")
            .query("watch", "1")
            .query("allowWatchBookmarks", "true");
        if let Some(auth) = self.bearer() {
            req = req.header("Authorization", &auth);
        }
        if !selector.is_empty() {
            req = req.query("labelSelector", selector.to_string());
        }
        if let Some(rv) = &params.resource_version {
            req = req.query("resourceVersion", rv);
        }
        if let Some(timeout) = params.timeout {
            req = req
                .query("timeoutSeconds", timeout.as_secs().max(1).to_string())
                .config()
                .timeout_global(Some(timeout + WATCH_GRACE))
                .build();
        }
        let resp = req.call().map_err(|e| ClusterError::Http(e.to_string()))?;
        let code = resp.status().as_u16();
        if code >= 400 {
            let mut body = String::new();
            resp.into_body().into_reader().read_to_string(&mut body)?;
            return Err(status_error(code, &body));
        }
        let reader = BufReader::new(resp.into_body().into_reader());
        Ok(Box::new(EventLines { reader }))
    }
}

/// Newline-delimited JSON watch events read off a streaming response body.
struct EventLines<R> {
    reader: R,
}

impl<R: BufRead> Iterator for EventLines<R> {
    type Item = Result<WatchEvent, ClusterError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) => return None,
                Ok(_) if line.trim().is_empty() => {}
                Ok(_) => return Some(WatchEvent::from_json(line.trim())),
                Err(e) => return Some(Err(ClusterError::Io(e))),
            }
        }
    }
}
