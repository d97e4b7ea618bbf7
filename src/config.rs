//! Layered configuration for the studio.
//!
//! Settings are read from `.veo/studio.toml`, then overridden by `VEO_*`
//! environment variables (a `.env` file is loaded first), then by CLI flags.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 5000
//! max_upload_bytes = 16777216
//!
//! [storage]
//! download_dir = "downloads"
//! upload_dir = "uploads"
//! cookies_dir = "cookies"
//!
//! [generation]
//! endpoint = "https://generativelanguage.example.com/v1/veo3"
//! model = "veo3"
//! generate_timeout_secs = 300
//! download_timeout_secs = 120
//!
//! [verification]
//! url = "https://gemini.google.com/app"
//! marker = "gemini"
//! timeout_secs = 10
//!
//! [status]
//! recent_records = 5
//!
//! [logging]
//! format = "text"
//! dir = ".veo/logs"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const CONFIG_DIR: &str = ".veo";
pub const CONFIG_FILE: &str = "studio.toml";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub dev_mode: bool,
    pub max_upload_bytes: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            dev_mode: false,
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub download_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub cookies_dir: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            upload_dir: PathBuf::from("uploads"),
            cookies_dir: PathBuf::from("cookies"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSection {
    pub endpoint: String,
    pub model: String,
    pub generate_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for GenerationSection {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta/veo3:generate".to_string(),
            model: "veo3".to_string(),
            generate_timeout_secs: 300,
            download_timeout_secs: 120,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl GenerationSection {
    pub fn generate_timeout(&self) -> Duration {
        Duration::from_secs(self.generate_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationSection {
    pub url: String,
    /// Case-insensitive substring the verification page must contain.
    pub marker: String,
    pub timeout_secs: u64,
}

impl Default for VerificationSection {
    fn default() -> Self {
        Self {
            url: "https://gemini.google.com/app".to_string(),
            marker: "gemini".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusSection {
    /// Number of records included in a status snapshot.
    pub recent_records: usize,
}

impl Default for StatusSection {
    fn default() -> Self {
        Self { recent_records: 5 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("Invalid log format: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub format: LogFormat,
    /// When set, logs are also written to a daily rolling file here.
    pub dir: Option<PathBuf>,
}

/// The complete studio.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioConfig {
    pub server: ServerSection,
    pub storage: StorageSection,
    pub generation: GenerationSection,
    pub verification: VerificationSection,
    pub status: StatusSection,
    pub logging: LoggingSection,
}

impl StudioConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse studio.toml")
    }

    /// Load `path` if given, else `.veo/studio.toml` under `project_dir` when it
    /// exists, else defaults. Environment overrides are applied afterwards.
    pub fn resolve(project_dir: &Path, path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut config = match path {
            Some(p) => Self::load(p)?,
            None => {
                let default_path = project_dir.join(CONFIG_DIR).join(CONFIG_FILE);
                if default_path.exists() {
                    Self::load(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `VEO_*` overrides using the given lookup.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("VEO_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("VEO_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(dir) = lookup("VEO_DOWNLOAD_DIR") {
            self.storage.download_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("VEO_UPLOAD_DIR") {
            self.storage.upload_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("VEO_COOKIES_DIR") {
            self.storage.cookies_dir = PathBuf::from(dir);
        }
        if let Some(endpoint) = lookup("VEO_GENERATION_ENDPOINT") {
            self.generation.endpoint = endpoint;
        }
        if let Some(secs) = lookup("VEO_GENERATE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.generation.generate_timeout_secs = secs;
        }
        if let Some(secs) = lookup("VEO_DOWNLOAD_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.generation.download_timeout_secs = secs;
        }
        if let Some(url) = lookup("VEO_VERIFY_URL") {
            self.verification.url = url;
        }
        if let Some(format) = lookup("VEO_LOG_FORMAT").and_then(|v| v.parse().ok()) {
            self.logging.format = format;
        }
        if let Some(dir) = lookup("VEO_LOG_DIR") {
            self.logging.dir = Some(PathBuf::from(dir));
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize studio.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Create the upload, download and cookie directories.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            &self.storage.download_dir,
            &self.storage.upload_dir,
            &self.storage.cookies_dir,
        ] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        }
        Ok(())
    }

    /// Return human-readable warnings for suspicious values.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.generation.generate_timeout_secs == 0 {
            warnings.push("generation.generate_timeout_secs is 0; every submit will time out".to_string());
        }
        if self.generation.download_timeout_secs == 0 {
            warnings.push("generation.download_timeout_secs is 0; every download will time out".to_string());
        }
        if self.status.recent_records == 0 {
            warnings.push("status.recent_records is 0; snapshots will list no records".to_string());
        }
        if !self.generation.endpoint.starts_with("http://")
            && !self.generation.endpoint.starts_with("https://")
        {
            warnings.push(format!(
                "generation.endpoint '{}' is not an http(s) URL",
                self.generation.endpoint
            ));
        }
        warnings
    }
}
