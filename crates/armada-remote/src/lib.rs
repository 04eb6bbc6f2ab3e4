//! Everything Armada reads from outside the cluster.
//!
//! This crate resolves manifest source references (local files or the
//! `deckhand+http://` document service), obtains bearer tokens from the
//! identity service, and loads the on-disk TOML configuration.

pub mod auth;
pub mod config;
pub mod source;

#[cfg(test)]
mod test_support;

pub use auth::{KeystoneAuth, NoAuth, StaticToken, TokenProvider};
pub use config::{
    resolve_config_path, ApplyConfig, ArmadaConfig, ClusterConfig, KeystoneConfig, ServerConfig,
    CONFIG_ENV,
};
pub use source::ManifestSource;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("unsupported manifest source scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("config error: {0}")]
    Config(String),
}

/// Token provider for the configured identity service, or [`NoAuth`] when
/// none is configured.
pub fn token_provider(config: &KeystoneConfig) -> Box<dyn TokenProvider> {
    if config.is_configured() {
        Box::new(KeystoneAuth::new(config.clone()))
    } else {
        Box::new(NoAuth)
    }
}
