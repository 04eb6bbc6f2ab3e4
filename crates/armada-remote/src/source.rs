use crate::auth::TokenProvider;
use crate::RemoteError;
use std::io::Read;
use std::path::PathBuf;
use tracing::debug;

const DECKHAND_PREFIX: &str = "deckhand+";

/// Where a manifest document stream comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestSource {
    Path(PathBuf),
    /// A document service URL with the `deckhand+` prefix already stripped.
    Deckhand(String),
}

impl ManifestSource {
    /// Classify a source reference. Anything without a `scheme://` part is a
    /// local path; `deckhand+http(s)://` is the document service; other
    /// schemes are rejected.
    pub fn parse(reference: &str) -> Result<Self, RemoteError> {
        let Some((scheme, _)) = reference.split_once("://") else {
            return Ok(Self::Path(PathBuf::from(reference)));
        };
        match scheme {
            "deckhand+http" | "deckhand+https" => Ok(Self::Deckhand(
                reference[DECKHAND_PREFIX.len()..].to_owned(),
            )),
            other => Err(RemoteError::UnsupportedScheme(other.to_owned())),
        }
    }

    /// Read the whole document stream.
    pub fn fetch(&self, auth: &dyn TokenProvider) -> Result<String, RemoteError> {
        match self {
            Self::Path(path) => {
                debug!("reading manifests from {}", path.display());
                Ok(std::fs::read_to_string(path)?)
            }
            Self::Deckhand(url) => {
                let token = auth.token()?;
                debug!("GET {url}");
                let agent = ureq::Agent::config_builder()
                    .http_status_as_error(false)
                    .build()
                    .new_agent();
                let resp = agent
                    .get(url)
                    .header("X-Auth-Token", &token)
                    .call()
                    .map_err(|e| RemoteError::Http(e.to_string()))?;
                let code = resp.status().as_u16();
                if code >= 400 {
                    return Err(RemoteError::Http(format!("HTTP {code} for {url}")));
                }
                let mut body = String::new();
                resp.into_body().into_reader().read_to_string(&mut body)?;
                Ok(body)
            }
        }
    }
}

impl std::fmt::Display for ManifestSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path(p) => write!(f, "{}", p.display()),
            Self::Deckhand(url) => write!(f, "{DECKHAND_PREFIX}{url}"),
        }
    }
}
