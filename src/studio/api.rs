use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use axum::{
    Json, Router,
    body::Body,
    extract::{Multipart, Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use super::client::GenerationClient;
use super::credentials::{CredentialStore, SessionVerifier, VerifiedSession, allowed_file, secure_filename};
use super::models::RunStatusSnapshot;
use super::orchestrator::BatchOrchestrator;
use super::prompts::{PromptSet, optimize_prompt};
use super::settings::{Settings, SettingsRequest};
use super::storage::{DirectorySink, PARTIAL_SUFFIX};
use super::ws::{WsMessage, broadcast_message};
use crate::config::StudioConfig;
use crate::errors::{CredentialError, ErrorKind, OrchestratorError, StudioError};

/// Number of prompts echoed back after an upload.
const PROMPT_PREVIEW: usize = 5;

// ── Shared application state ──────────────────────────────────────────

/// The verified cookies currently installed for new runs.
pub struct LoadedCookies {
    pub session: VerifiedSession,
    pub filename: String,
    pub cookie_count: usize,
}

pub struct AppState {
    pub config: StudioConfig,
    pub credential_store: CredentialStore,
    pub verifier: Arc<dyn SessionVerifier>,
    pub cookies: Mutex<Option<LoadedCookies>>,
    pub prompts: Mutex<Option<PromptSet>>,
    pub orchestrator: BatchOrchestrator,
    pub ws_tx: broadcast::Sender<String>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire the orchestrator to a download directory sink and the WebSocket
    /// broadcast channel.
    pub fn new(
        config: StudioConfig,
        verifier: Arc<dyn SessionVerifier>,
        client: Arc<dyn GenerationClient>,
    ) -> Self {
        let (ws_tx, _rx) = broadcast::channel::<String>(256);
        let sink = Arc::new(DirectorySink::new(config.storage.download_dir.clone()));
        let orchestrator = BatchOrchestrator::new(client, sink, config.status.recent_records)
            .with_events(ws_tx.clone());
        Self {
            credential_store: CredentialStore::new(config.storage.cookies_dir.clone()),
            config,
            verifier,
            cookies: Mutex::new(None),
            prompts: Mutex::new(None),
            orchestrator,
            ws_tx,
        }
    }

    fn current_session(&self) -> Option<VerifiedSession> {
        self.cookies
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .map(|c| c.session.clone())
    }

    fn current_prompts(&self) -> Option<PromptSet> {
        self.prompts.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Install a new session, revoking the one it replaces.
    fn install_cookies(&self, loaded: LoadedCookies) {
        let mut cookies = self.cookies.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = cookies.replace(loaded) {
            previous.session.revoke();
            info!(session_id = %previous.session.id(), "previous session superseded");
        }
    }
}

// ── Request / response payload types ──────────────────────────────────

#[derive(Deserialize)]
pub struct OptimizeRequest {
    #[serde(default)]
    pub description: String,
}

#[derive(Serialize)]
pub struct AppStatus {
    pub cookies_loaded: bool,
    pub cookies_file: Option<String>,
    pub cookie_count: usize,
    pub prompt_count: usize,
    pub run: RunStatusSnapshot,
}

#[derive(Serialize)]
pub struct CookiesUploaded {
    pub message: String,
    pub filename: String,
    pub cookie_count: usize,
}

#[derive(Serialize)]
pub struct PromptsUploaded {
    pub message: String,
    pub count: usize,
    pub preview: Vec<String>,
}

#[derive(Serialize)]
pub struct RunStarted {
    pub run_id: uuid::Uuid,
    pub total: usize,
}

// ── Error handling ────────────────────────────────────────────────────

impl StudioError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            StudioError::NoSession
            | StudioError::NoPrompts
            | StudioError::BadRequest(_)
            | StudioError::Prompt(_)
            | StudioError::Settings(_) => StatusCode::BAD_REQUEST,
            StudioError::NoActiveRun => StatusCode::CONFLICT,
            StudioError::FileNotFound(_) => StatusCode::NOT_FOUND,
            StudioError::Orchestrator(e) => match e.kind() {
                ErrorKind::AlreadyRunning => StatusCode::CONFLICT,
                _ => StatusCode::BAD_REQUEST,
            },
            StudioError::Credential(e) => match e {
                CredentialError::Invalid(_) => StatusCode::UNAUTHORIZED,
                CredentialError::Request(_) => StatusCode::BAD_GATEWAY,
                CredentialError::ReadFailed { .. } | CredentialError::SaveFailed { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                _ => StatusCode::BAD_REQUEST,
            },
            StudioError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for StudioError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(serde_json::json!({"error": self.to_string()}))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/status", get(app_status))
        .route("/api/cookies", post(upload_cookies))
        .route("/api/prompts", post(upload_prompts))
        .route("/api/prompts/optimize", post(optimize))
        .route("/api/runs", post(start_run))
        .route("/api/runs/current", get(current_run))
        .route("/api/runs/current/records", get(current_records))
        .route("/api/runs/current/cancel", post(cancel_run))
        .route("/api/downloads/{filename}", get(download))
        .route("/health", get(health_check))
}

async fn health_check() -> &'static str {
    "ok"
}

async fn app_status(State(state): State<SharedState>) -> Json<AppStatus> {
    let (cookies_loaded, cookies_file, cookie_count) = {
        let cookies = state.cookies.lock().unwrap_or_else(|p| p.into_inner());
        match cookies.as_ref() {
            Some(c) => (c.session.is_valid(), Some(c.filename.clone()), c.cookie_count),
            None => (false, None, 0),
        }
    };
    let prompt_count = state.current_prompts().map(|p| p.len()).unwrap_or(0);
    Json(AppStatus {
        cookies_loaded,
        cookies_file,
        cookie_count,
        prompt_count,
        run: state.orchestrator.status(),
    })
}

/// An uploaded file pulled out of a multipart form.
struct Upload {
    filename: String,
    bytes: Vec<u8>,
}

/// Find the file field named `field` and validate its filename.
async fn read_upload(mut multipart: Multipart, field: &str) -> Result<Upload, StudioError> {
    while let Some(part) = multipart
        .next_field()
        .await
        .map_err(|e| StudioError::BadRequest(e.body_text()))?
    {
        if part.name() != Some(field) {
            continue;
        }
        let submitted = part.file_name().unwrap_or_default().to_string();
        if submitted.is_empty() {
            return Err(StudioError::BadRequest("No file selected".into()));
        }
        if !allowed_file(&submitted) {
            return Err(CredentialError::UnsupportedFile { filename: submitted }.into());
        }
        let filename = secure_filename(&submitted)
            .ok_or_else(|| StudioError::BadRequest(format!("Invalid filename '{}'", submitted)))?;
        let bytes = part
            .bytes()
            .await
            .map_err(|e| StudioError::BadRequest(e.body_text()))?;
        return Ok(Upload {
            filename,
            bytes: bytes.to_vec(),
        });
    }
    Err(StudioError::BadRequest(format!("No {} provided", field)))
}

async fn upload_cookies(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> Result<impl IntoResponse, StudioError> {
    let upload = read_upload(multipart, "cookies_file").await?;
    let credentials = CredentialStore::parse(&upload.bytes)?;
    let session = state.verifier.verify(credentials.clone()).await.map_err(|e| {
        warn!(filename = %upload.filename, error = %e, "cookie verification failed");
        e
    })?;
    let saved = state.credential_store.save(&credentials, &upload.filename).await?;
    info!(path = %saved.display(), cookie_count = credentials.len(), "cookies loaded");

    let cookie_count = credentials.len();
    state.install_cookies(LoadedCookies {
        session,
        filename: upload.filename.clone(),
        cookie_count,
    });
    broadcast_message(
        &state.ws_tx,
        &WsMessage::CookiesLoaded {
            filename: upload.filename.clone(),
            cookie_count,
        },
    );

    Ok(Json(CookiesUploaded {
        message: "Cookies loaded and verified".into(),
        filename: upload.filename,
        cookie_count,
    }))
}

async fn upload_prompts(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> Result<impl IntoResponse, StudioError> {
    let upload = read_upload(multipart, "prompts_file").await?;
    let prompts = PromptSet::parse_bytes(&upload.bytes)?;

    let dir = state.config.storage.upload_dir.clone();
    let path = dir.join(&upload.filename);
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    tokio::fs::write(&path, &upload.bytes)
        .await
        .with_context(|| format!("Failed to save {}", path.display()))?;
    info!(path = %path.display(), count = prompts.len(), "prompts loaded");

    let count = prompts.len();
    let preview = prompts.preview(PROMPT_PREVIEW).to_vec();
    *state.prompts.lock().unwrap_or_else(|p| p.into_inner()) = Some(prompts);
    broadcast_message(&state.ws_tx, &WsMessage::PromptsLoaded { count });

    Ok(Json(PromptsUploaded {
        message: format!("Loaded {} prompts", count),
        count,
        preview,
    }))
}

async fn optimize(Json(req): Json<OptimizeRequest>) -> Result<impl IntoResponse, StudioError> {
    let optimized = optimize_prompt(&req.description)?;
    Ok(Json(serde_json::json!({"optimized_prompt": optimized})))
}

async fn start_run(
    State(state): State<SharedState>,
    Json(req): Json<SettingsRequest>,
) -> Result<impl IntoResponse, StudioError> {
    let settings = Settings::try_from(req)?;
    let session = state.current_session().ok_or(StudioError::NoSession)?;
    let prompts = state.current_prompts().ok_or(StudioError::NoPrompts)?;

    let handle = state
        .orchestrator
        .start(session, &prompts, settings)
        .map_err(|e| {
            if matches!(e, OrchestratorError::AlreadyRunning) {
                warn!("rejected run start: a run is already in progress");
            }
            e
        })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(RunStarted {
            run_id: handle.run_id(),
            total: handle.total(),
        }),
    ))
}

async fn current_run(State(state): State<SharedState>) -> Json<RunStatusSnapshot> {
    Json(state.orchestrator.status())
}

async fn current_records(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.orchestrator.reporter().records())
}

async fn cancel_run(State(state): State<SharedState>) -> Result<impl IntoResponse, StudioError> {
    if !state.orchestrator.cancel() {
        return Err(StudioError::NoActiveRun);
    }
    Ok(Json(serde_json::json!({"cancelled": true})))
}

async fn download(
    State(state): State<SharedState>,
    Path(filename): Path<String>,
) -> Result<Response, StudioError> {
    // Only plain basenames; anything that sanitising would change is rejected.
    if secure_filename(&filename).as_deref() != Some(filename.as_str()) {
        return Err(StudioError::BadRequest("Invalid filename".into()));
    }
    if filename.ends_with(PARTIAL_SUFFIX) {
        return Err(StudioError::FileNotFound(filename));
    }
    let path: PathBuf = state.config.storage.download_dir.join(&filename);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StudioError::FileNotFound(filename));
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to read {}: {}", path.display(), e).into()),
    };

    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime.as_ref())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        )
        .body(Body::from(bytes))
        .map_err(|e| StudioError::Other(e.into()))
}
