use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::credentials::VerifiedSession;
use super::settings::Settings;
use crate::config::GenerationSection;
use crate::errors::GenerationError;

/// A generated video awaiting download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedAsset {
    pub asset_url: String,
    pub video_id: Option<String>,
    pub duration: u32,
    pub resolution: String,
}

/// The remote generation service. Implementations own their timeouts and
/// must surface them as `GenerationError::Timeout` rather than hang.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn submit(
        &self,
        session: &VerifiedSession,
        prompt: &str,
        settings: &Settings,
    ) -> Result<GeneratedAsset, GenerationError>;

    async fn fetch(&self, session: &VerifiedSession, url: &str) -> Result<Vec<u8>, GenerationError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    aspect_ratio: &'static str,
    duration: u32,
    resolution: &'static str,
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    status: String,
    #[serde(default)]
    video_url: Option<String>,
    #[serde(default)]
    video_id: Option<String>,
    #[serde(default)]
    duration: Option<u32>,
    #[serde(default)]
    resolution: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// `GenerationClient` over HTTP using the session's cookies.
pub struct HttpGenerationClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    generate_timeout: Duration,
    download_timeout: Duration,
}

impl HttpGenerationClient {
    pub fn new(section: &GenerationSection) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(section.user_agent.as_str())
            .build()?;
        Ok(Self {
            client,
            endpoint: section.endpoint.clone(),
            model: section.model.clone(),
            generate_timeout: section.generate_timeout(),
            download_timeout: section.download_timeout(),
        })
    }
}

/// Resolve `video_url` against the generation endpoint. Absolute URLs pass
/// through unchanged.
fn resolve_asset_url(endpoint: &str, video_url: &str) -> Result<String, GenerationError> {
    let base = reqwest::Url::parse(endpoint)
        .map_err(|e| GenerationError::Generation(format!("invalid endpoint {}: {}", endpoint, e)))?;
    base.join(video_url)
        .map(|url| url.to_string())
        .map_err(|e| GenerationError::Generation(format!("invalid video_url {}: {}", video_url, e)))
}

fn is_auth_failure(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    async fn submit(
        &self,
        session: &VerifiedSession,
        prompt: &str,
        settings: &Settings,
    ) -> Result<GeneratedAsset, GenerationError> {
        let body = GenerateRequest {
            prompt,
            aspect_ratio: settings.aspect_ratio().as_str(),
            duration: settings.duration(),
            resolution: settings.resolution().as_str(),
            model: &self.model,
        };
        debug!(?body, "submitting generation request");

        let timeout = self.generate_timeout;
        let resp = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::COOKIE, session.cookie_header())
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout(timeout)
                } else {
                    GenerationError::Generation(e.to_string())
                }
            })?;

        let status = resp.status();
        if is_auth_failure(status) {
            return Err(GenerationError::SessionExpired);
        }
        if !status.is_success() {
            return Err(GenerationError::Generation(format!("HTTP {}", status.as_u16())));
        }

        let parsed: GenerateResponse = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout(timeout)
            } else {
                GenerationError::Generation(format!("malformed response: {}", e))
            }
        })?;

        if parsed.status != "success" {
            let message = parsed.message.unwrap_or_else(|| "Unknown error".to_string());
            warn!(%message, "generation rejected");
            return Err(GenerationError::Generation(message));
        }
        let video_url = parsed
            .video_url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| GenerationError::Generation("response has no video_url".into()))?;
        let asset_url = resolve_asset_url(&self.endpoint, &video_url)?;

        Ok(GeneratedAsset {
            asset_url,
            video_id: parsed.video_id,
            duration: parsed.duration.unwrap_or(settings.duration()),
            resolution: parsed
                .resolution
                .unwrap_or_else(|| settings.resolution().as_str().to_string()),
        })
    }

    async fn fetch(&self, session: &VerifiedSession, url: &str) -> Result<Vec<u8>, GenerationError> {
        let timeout = self.download_timeout;
        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                GenerationError::Timeout(timeout)
            } else {
                GenerationError::Download(e.to_string())
            }
        };

        let resp = self
            .client
            .get(url)
            .header(reqwest::header::COOKIE, session.cookie_header())
            .timeout(timeout)
            .send()
            .await
            .map_err(map_err)?;

        let status = resp.status();
        if is_auth_failure(status) {
            return Err(GenerationError::SessionExpired);
        }
        if status != reqwest::StatusCode::OK {
            return Err(GenerationError::Download(format!("HTTP {}", status.as_u16())));
        }

        let bytes = resp.bytes().await.map_err(map_err)?;
        Ok(bytes.to_vec())
    }
}
