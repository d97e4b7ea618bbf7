//! Typed error hierarchy for the studio.
//!
//! `ErrorKind` is the serialisable classification recorded on job records and
//! reported to pollers. The enums below it cover the subsystems:
//! - `OrchestratorError`: rejected `start()` calls
//! - `CredentialError`: cookie parsing, saving and verification
//! - `PromptError` / `SettingsError`: input validation
//! - `GenerationError`: remote generation and download calls
//! - `StudioError`: HTTP API failures

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failure, as recorded on a `JobRecord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    AlreadyRunning,
    Invalid,
    GenerationFailed,
    DownloadFailed,
    Timeout,
    Aborted,
    Unexpected,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::AlreadyRunning => "already_running",
            Self::Invalid => "invalid",
            Self::GenerationFailed => "generation_failed",
            Self::DownloadFailed => "download_failed",
            Self::Timeout => "timeout",
            Self::Aborted => "aborted",
            Self::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned when a batch run cannot be started.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("A generation run is already in progress")]
    AlreadyRunning,

    #[error("Session is no longer valid")]
    SessionInvalid,
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyRunning => ErrorKind::AlreadyRunning,
            Self::SessionInvalid => ErrorKind::Invalid,
        }
    }
}

/// Errors from loading, saving and verifying credentials.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Credential file is not valid UTF-8")]
    NotUtf8,

    #[error("No cookies found in credential file")]
    Empty,

    #[error("Unsupported credential file '{filename}': only .txt and .json are accepted")]
    UnsupportedFile { filename: String },

    #[error("Failed to read credential file {path}: {source}")]
    ReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to save credentials to {path}: {source}")]
    SaveFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cookies were rejected or have expired: {0}")]
    Invalid(String),

    #[error("Verification request failed: {0}")]
    Request(String),
}

impl CredentialError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotUtf8 | Self::Empty | Self::UnsupportedFile { .. } => ErrorKind::InvalidInput,
            Self::Invalid(_) => ErrorKind::Invalid,
            Self::ReadFailed { .. } | Self::SaveFailed { .. } | Self::Request(_) => {
                ErrorKind::Unexpected
            }
        }
    }
}

/// Errors from parsing an uploaded prompt file.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PromptError {
    #[error("Prompt file is not valid UTF-8")]
    NotUtf8,

    #[error("Prompt file contains no prompts")]
    Empty,

    #[error("Description must not be empty")]
    EmptyDescription,
}

impl PromptError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidInput
    }
}

/// Errors from validating generation settings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Unsupported aspect ratio '{0}'")]
    AspectRatio(String),

    #[error("Unsupported resolution '{0}'")]
    Resolution(String),

    #[error("Duration must be between {min} and {max} seconds, got {value}")]
    Duration { value: i64, min: u32, max: u32 },
}

/// Errors from the remote generation service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Session rejected by remote service")]
    SessionExpired,

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl GenerationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Generation(_) => ErrorKind::GenerationFailed,
            Self::Download(_) => ErrorKind::DownloadFailed,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::SessionExpired => ErrorKind::Invalid,
            Self::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    /// Whether this failure invalidates the whole run rather than one job.
    pub fn is_run_level(&self) -> bool {
        matches!(self, Self::SessionExpired)
    }
}

/// Errors surfaced by the HTTP API.
#[derive(Debug, Error)]
pub enum StudioError {
    #[error("No verified cookies loaded; upload cookies first")]
    NoSession,

    #[error("No prompts loaded; upload a prompt file first")]
    NoPrompts,

    #[error("No generation run in progress")]
    NoActiveRun,

    #[error("File {0} not found")]
    FileNotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
