use crate::RemoteError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming the config file when no flag is given.
pub const CONFIG_ENV: &str = "ARMADA_CONFIG";

/// On-disk configuration shared by the CLI and the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArmadaConfig {
    #[serde(default)]
    pub keystone_authtoken: KeystoneConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub apply: ApplyConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeystoneConfig {
    #[serde(default)]
    pub auth_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub project_name: String,
    #[serde(default = "default_domain")]
    pub user_domain_name: String,
    #[serde(default = "default_domain")]
    pub project_domain_name: String,
}

fn default_domain() -> String {
    "default".to_owned()
}

impl Default for KeystoneConfig {
    fn default() -> Self {
        Self {
            auth_url: String::new(),
            username: String::new(),
            password: String::new(),
            project_name: String::new(),
            user_domain_name: default_domain(),
            project_domain_name: default_domain(),
        }
    }
}

impl KeystoneConfig {
    pub fn is_configured(&self) -> bool {
        !self.auth_url.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_policy_file")]
    pub policy_file: PathBuf,
    /// Namespaces whose ArmadaChart releases the releases route reports.
    #[serde(default = "default_release_namespaces")]
    pub release_namespaces: Vec<String>,
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_owned()
}

fn default_policy_file() -> PathBuf {
    PathBuf::from("/etc/armada/policy.toml")
}

fn default_release_namespaces() -> Vec<String> {
    vec!["ucp".to_owned()]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            policy_file: default_policy_file(),
            release_namespaces: default_release_namespaces(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyConfig {
    /// Bundled ArmadaChart resource definition, registered when missing.
    #[serde(default = "default_crd_path")]
    pub crd_path: PathBuf,
    /// Update attempts per chart when the cluster reports a concurrent
    /// modification; 0 retries until a different outcome.
    #[serde(default)]
    pub conflict_max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub conflict_backoff_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub conflict_backoff_max_ms: u64,
}

fn default_crd_path() -> PathBuf {
    PathBuf::from("crd.yaml")
}

fn default_backoff_ms() -> u64 {
    100
}

fn default_backoff_max_ms() -> u64 {
    5000
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            crd_path: default_crd_path(),
            conflict_max_attempts: 0,
            conflict_backoff_ms: default_backoff_ms(),
            conflict_backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<PathBuf>,
}

impl ArmadaConfig {
    pub fn load(path: &Path) -> Result<Self, RemoteError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            RemoteError::Config(format!("invalid config {}: {e}", path.display()))
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), RemoteError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| RemoteError::Serialization(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load the config at `path`; if no file exists there, write the defaults
    /// to it and return them.
    pub fn load_or_init(path: &Path) -> Result<Self, RemoteError> {
        if path.exists() {
            debug!("loading config from {}", path.display());
            return Self::load(path);
        }
        let config = Self::default();
        match config.save(path) {
            Ok(()) => info!("wrote default config to {}", path.display()),
            Err(e) => debug!("could not write default config to {}: {e}", path.display()),
        }
        Ok(config)
    }
}

/// Config file location: the explicit path, then `ARMADA_CONFIG`, then
/// `~/.armada/config.toml`.
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf, RemoteError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    match std::env::var(CONFIG_ENV) {
        Ok(v) if !v.is_empty() => return Ok(PathBuf::from(v)),
        _ => {}
    }
    let home = std::env::var("HOME").map_err(|_| RemoteError::Config("HOME not set".to_owned()))?;
    Ok(PathBuf::from(home).join(".armada").join("config.toml"))
}
