pub mod apply;
pub mod completions;
pub mod server;
pub mod validate;
pub mod wait;

pub use wait::WaitArgs;

use armada_cluster::{ClusterClient, ClusterError, KubeClient};
use armada_core::{CoreError, InstallAction};
use armada_remote::{resolve_config_path, ArmadaConfig, RemoteError};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_MANIFEST_ERROR: u8 = 2;
pub const EXIT_CLUSTER_ERROR: u8 = 3;

/// A command that did not succeed: the message for stderr and the exit code.
#[derive(Debug)]
pub struct Failure {
    pub code: u8,
    pub message: String,
}

impl Failure {
    pub fn new(code: u8, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<CoreError> for Failure {
    fn from(e: CoreError) -> Self {
        let code = if e.is_manifest_error() {
            EXIT_MANIFEST_ERROR
        } else if e.is_cluster_error() {
            EXIT_CLUSTER_ERROR
        } else {
            EXIT_FAILURE
        };
        Self::new(code, e.to_string())
    }
}

impl From<ClusterError> for Failure {
    fn from(e: ClusterError) -> Self {
        Self::new(EXIT_CLUSTER_ERROR, format!("cluster error: {e}"))
    }
}

impl From<RemoteError> for Failure {
    fn from(e: RemoteError) -> Self {
        Self::new(EXIT_FAILURE, e.to_string())
    }
}

/// Configuration shared by every command that reads the config file.
pub struct Context {
    pub config: ArmadaConfig,
    kubeconfig: Option<PathBuf>,
}

impl Context {
    pub fn load(armadaconf: Option<&Path>, kubeconfig: Option<PathBuf>) -> Result<Self, Failure> {
        let path = resolve_config_path(armadaconf)?;
        let config = ArmadaConfig::load_or_init(&path)?;
        let kubeconfig = kubeconfig.or_else(|| config.cluster.kubeconfig.clone());
        Ok(Self { config, kubeconfig })
    }

    /// Connect to the cluster named by `--kubeconfig`, the config file, or
    /// the environment.
    pub fn cluster(&self) -> Result<Arc<dyn ClusterClient>, Failure> {
        let client = KubeClient::infer(self.kubeconfig.as_deref())?;
        info!("using cluster {}", client.server());
        Ok(Arc::new(client))
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, Failure> {
    serde_json::to_string_pretty(value)
        .map_err(|e| Failure::new(EXIT_FAILURE, format!("JSON serialization failed: {e}")))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_action(action: InstallAction) -> String {
    use console::Style;
    match action {
        InstallAction::Created => Style::new().green().apply_to("installed").to_string(),
        InstallAction::Updated => Style::new().cyan().apply_to("upgraded").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        assert_ne!(EXIT_SUCCESS, EXIT_FAILURE);
        assert_ne!(EXIT_FAILURE, EXIT_MANIFEST_ERROR);
        assert_ne!(EXIT_MANIFEST_ERROR, EXIT_CLUSTER_ERROR);
    }

    #[test]
    fn core_errors_map_to_exit_codes() {
        let manifest = Failure::from(CoreError::from(armada_schema::DocumentError::NoManifest));
        assert_eq!(manifest.code, EXIT_MANIFEST_ERROR);

        let timeout = Failure::from(CoreError::ReadinessTimeout {
            selector: "a=b".to_owned(),
            timeout: Duration::from_secs(1),
        });
        assert_eq!(timeout.code, EXIT_CLUSTER_ERROR);

        let interrupted = Failure::from(CoreError::Interrupted);
        assert_eq!(interrupted.code, EXIT_FAILURE);
        assert_eq!(interrupted.message, "interrupted");
    }

    #[test]
    fn cluster_config_errors_are_cluster_failures() {
        let f = Failure::from(ClusterError::Config("no kubeconfig".to_owned()));
        assert_eq!(f.code, EXIT_CLUSTER_ERROR);
        assert!(f.message.contains("no kubeconfig"));
    }

    #[test]
    fn context_prefers_flag_kubeconfig() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("config.toml");
        std::fs::write(&conf, "[cluster]\nkubeconfig = \"/from/config\"\n").unwrap();

        let ctx = Context::load(Some(&conf), None).unwrap();
        assert_eq!(ctx.kubeconfig, Some(PathBuf::from("/from/config")));

        let ctx = Context::load(Some(&conf), Some(PathBuf::from("/from/flag"))).unwrap();
        assert_eq!(ctx.kubeconfig, Some(PathBuf::from("/from/flag")));
    }

    #[test]
    fn missing_config_file_is_initialized() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("nested").join("config.toml");
        let ctx = Context::load(Some(&conf), None).unwrap();
        assert_eq!(ctx.config, ArmadaConfig::default());
        assert!(conf.exists());
    }

    #[test]
    fn json_pretty_serializes() {
        let out = json_pretty(&serde_json::json!({"install": ["a"]})).unwrap();
        assert!(out.contains("\"install\""));
    }

    #[test]
    fn actions_are_labelled() {
        assert!(colorize_action(InstallAction::Created).contains("installed"));
        assert!(colorize_action(InstallAction::Updated).contains("upgraded"));
    }

    #[test]
    fn spinner_finishes() {
        let pb = spinner("applying...");
        spin_ok(&pb, "done");
        let pb = spinner("applying...");
        spin_fail(&pb, "failed");
    }
}
