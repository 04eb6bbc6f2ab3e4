use crate::config::KeystoneConfig;
use crate::RemoteError;
use serde_json::json;
use std::sync::Mutex;
use tracing::debug;

/// Supplies bearer tokens for requests to authenticated document services.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Result<String, RemoteError>;
}

/// A fixed token, e.g. one forwarded from an incoming API request.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: &str) -> Self {
        Self(token.to_owned())
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> Result<String, RemoteError> {
        Ok(self.0.clone())
    }
}

/// Used where no identity service is configured; any request needing a
/// token fails.
pub struct NoAuth;

impl TokenProvider for NoAuth {
    fn token(&self) -> Result<String, RemoteError> {
        Err(RemoteError::Auth(
            "no identity service configured (keystone_authtoken.auth_url)".to_owned(),
        ))
    }
}

/// Identity v3 password authentication. The issued token is cached for
/// the lifetime of the provider.
pub struct KeystoneAuth {
    config: KeystoneConfig,
    agent: ureq::Agent,
    cached: Mutex<Option<String>>,
}

impl KeystoneAuth {
    pub fn new(config: KeystoneConfig) -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self {
            config,
            agent,
            cached: Mutex::new(None),
        }
    }

    fn request_body(&self) -> serde_json::Value {
        let c = &self.config;
        json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": c.username,
                            "domain": {"name": c.user_domain_name},
                            "password": c.password,
                        }
                    }
                },
                "scope": {
                    "project": {
                        "name": c.project_name,
                        "domain": {"name": c.project_domain_name},
                    }
                }
            }
        })
    }

    fn authenticate(&self) -> Result<String, RemoteError> {
        let url = format!("{}/auth/tokens", self.config.auth_url.trim_end_matches('/'));
        debug!("POST {url}");
        let body = serde_json::to_vec(&self.request_body())
            .map_err(|e| RemoteError::Serialization(e.to_string()))?;
        let resp = self
            .agent
            .post(&url)
            .header("Content-Type", "application/json")
            .send(&body[..])
            .map_err(|e| RemoteError::Http(e.to_string()))?;
        let code = resp.status().as_u16();
        if code >= 400 {
            return Err(RemoteError::Auth(format!(
                "identity service returned HTTP {code} for {url}"
            )));
        }
        resp.headers()
            .get("X-Subject-Token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| RemoteError::Auth("identity response carried no X-Subject-Token".to_owned()))
    }
}

impl TokenProvider for KeystoneAuth {
    fn token(&self) -> Result<String, RemoteError> {
        let mut cached = self
            .cached
            .lock()
            .map_err(|e| RemoteError::Auth(format!("mutex poisoned: {e}")))?;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }
        let token = self.authenticate()?;
        *cached = Some(token.clone());
        Ok(token)
    }
}
