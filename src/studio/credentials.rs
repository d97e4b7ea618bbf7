//! Cookie credentials: parsing uploaded files, saving them, and verifying
//! them against the remote service to obtain a `VerifiedSession`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::VerificationSection;
use crate::errors::CredentialError;

/// Extensions accepted for cookie and prompt uploads.
pub const ALLOWED_EXTENSIONS: &[&str] = &["txt", "json"];

/// Cookie name → value. Opaque to the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Credentials(BTreeMap<String, String>);

impl Credentials {
    pub fn new(cookies: BTreeMap<String, String>) -> Self {
        Self(cookies)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Render as a `Cookie:` header value.
    pub fn cookie_header(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Credentials {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Proof that a set of credentials was accepted by the remote service.
///
/// Clones share a revocation flag: when a newer upload supersedes this
/// session, `revoke()` is visible to every run still holding a clone.
#[derive(Debug, Clone)]
pub struct VerifiedSession {
    id: Uuid,
    credentials: Arc<Credentials>,
    verified_at: DateTime<Utc>,
    revoked: Arc<AtomicBool>,
}

impl VerifiedSession {
    /// Wrap credentials without contacting the remote service. Used by
    /// verifiers after a successful check and by hosts that opt out of
    /// verification.
    pub fn assume_verified(credentials: Credentials) -> Self {
        Self {
            id: Uuid::new_v4(),
            credentials: Arc::new(credentials),
            verified_at: Utc::now(),
            revoked: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn verified_at(&self) -> DateTime<Utc> {
        self.verified_at
    }

    pub fn cookie_header(&self) -> String {
        self.credentials.cookie_header()
    }

    pub fn revoke(&self) {
        self.revoked.store(true, Ordering::SeqCst);
    }

    pub fn is_valid(&self) -> bool {
        !self.revoked.load(Ordering::SeqCst)
    }
}

/// Parses, stores and loads credential files.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    cookies_dir: PathBuf,
}

impl CredentialStore {
    pub fn new(cookies_dir: impl Into<PathBuf>) -> Self {
        Self {
            cookies_dir: cookies_dir.into(),
        }
    }

    pub fn cookies_dir(&self) -> &Path {
        &self.cookies_dir
    }

    /// Parse credential material. Accepts, in order of preference:
    /// a JSON object of name → value, a JSON array of browser-exported cookie
    /// objects with `name`/`value` fields, or `name=value` lines.
    pub fn parse(bytes: &[u8]) -> Result<Credentials, CredentialError> {
        let text = std::str::from_utf8(bytes).map_err(|_| CredentialError::NotUtf8)?;
        let text = text.trim_start_matches('\u{feff}').trim();

        let credentials: Credentials = match serde_json::from_str::<serde_json::Value>(text) {
            Ok(serde_json::Value::Object(map)) => map
                .into_iter()
                .filter_map(|(name, value)| scalar_to_string(value).map(|v| (name, v)))
                .collect(),
            Ok(serde_json::Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| {
                    let name = item.get("name")?.as_str()?.to_string();
                    let value = scalar_to_string(item.get("value")?.clone())?;
                    Some((name, value))
                })
                .collect(),
            _ => parse_key_value_lines(text),
        };

        if credentials.is_empty() {
            return Err(CredentialError::Empty);
        }
        Ok(credentials)
    }

    /// Read and parse a credential file from disk.
    pub async fn load_file(path: &Path) -> Result<Credentials, CredentialError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| CredentialError::ReadFailed {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(&bytes)
    }

    /// Persist credentials as pretty JSON under the cookies directory.
    pub async fn save(&self, credentials: &Credentials, filename: &str) -> Result<PathBuf, CredentialError> {
        let name = secure_filename(filename).ok_or_else(|| CredentialError::UnsupportedFile {
            filename: filename.to_string(),
        })?;
        let path = self.cookies_dir.join(name);
        let body = serde_json::to_vec_pretty(credentials).map_err(|e| CredentialError::SaveFailed {
            path: path.clone(),
            source: std::io::Error::other(e),
        })?;
        tokio::fs::create_dir_all(&self.cookies_dir)
            .await
            .map_err(|source| CredentialError::SaveFailed {
                path: path.clone(),
                source,
            })?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|source| CredentialError::SaveFailed {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), cookies = credentials.len(), "saved credentials");
        Ok(path)
    }
}

fn scalar_to_string(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_key_value_lines(text: &str) -> Credentials {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

/// Whether an uploaded filename has an accepted extension.
pub fn allowed_file(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ALLOWED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Reduce an uploaded filename to a safe basename: ASCII alphanumerics,
/// `.`, `-` and `_` only, whitespace collapsed to `_`, no leading dots.
/// Returns `None` if nothing usable remains.
pub fn secure_filename(filename: &str) -> Option<String> {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    let cleaned = cleaned.trim_start_matches(['.', '_']).to_string();
    if cleaned.is_empty() { None } else { Some(cleaned) }
}

/// Confirms credentials with the remote service.
#[async_trait]
pub trait SessionVerifier: Send + Sync {
    async fn verify(&self, credentials: Credentials) -> Result<VerifiedSession, CredentialError>;
}

/// Verifies cookies by loading the service's app page with them attached.
pub struct HttpSessionVerifier {
    client: reqwest::Client,
    url: String,
    marker: String,
}

impl HttpSessionVerifier {
    pub fn new(section: &VerificationSection, user_agent: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(section.timeout_secs))
            .user_agent(user_agent)
            .build()?;
        Ok(Self {
            client,
            url: section.url.clone(),
            marker: section.marker.to_lowercase(),
        })
    }
}

#[async_trait]
impl SessionVerifier for HttpSessionVerifier {
    async fn verify(&self, credentials: Credentials) -> Result<VerifiedSession, CredentialError> {
        let resp = self
            .client
            .get(&self.url)
            .header(reqwest::header::COOKIE, credentials.cookie_header())
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "cookie verification request failed");
                CredentialError::Request(e.to_string())
            })?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| CredentialError::Request(e.to_string()))?;

        if status != reqwest::StatusCode::OK {
            return Err(CredentialError::Invalid(format!("HTTP {}", status.as_u16())));
        }
        if !body.to_lowercase().contains(&self.marker) {
            return Err(CredentialError::Invalid("unexpected verification page".into()));
        }

        let session = VerifiedSession::assume_verified(credentials);
        info!(session_id = %session.id(), "cookies verified");
        Ok(session)
    }
}
