use serde::Serialize;
use std::io;
use thiserror::Error;

/// Pipeline stage that an archive installation failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStage {
    Download,
    Extract,
    Relocate,
}

impl std::fmt::Display for InstallStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstallStage::Download => write!(f, "download"),
            InstallStage::Extract => write!(f, "extract"),
            InstallStage::Relocate => write!(f, "relocate"),
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Filesystem operation error (fs_extra): {0}")]
    FsExtra(#[from] fs_extra::error::Error),

    #[error("Download error: {0}")]
    Download(String),

    #[error("Runtime acquisition error: {0}")]
    RuntimeAcquisition(String),

    #[error("Loader profile fetch error: {0}")]
    LoaderFetch(String),

    #[error("Loader installer error: {0}")]
    LoaderInstaller(String),

    #[error("Install error during {stage}: {message}")]
    Install {
        stage: InstallStage,
        message: String,
    },

    #[error("Install already in progress for instance '{0}'")]
    InstallInProgress(String),

    #[error("Launcher configuration error: {0}")]
    LauncherConfig(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Rate limited - please wait a moment and try again")]
    AuthRateLimited,

    #[error("A session check is already running")]
    AuthNotReady,

    #[error("Process spawn failed: {0}")]
    ProcessSpawnFailed(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl AppError {
    pub fn install(stage: InstallStage, message: impl Into<String>) -> Self {
        AppError::Install {
            stage,
            message: message.into(),
        }
    }
}

/// Serializable error shape handed across the process boundary, so the UI
/// layer only ever inspects results instead of handling exceptions.
#[derive(Serialize, Debug)]
pub struct CommandError {
    pub message: String,
    pub kind: String,
}

impl From<AppError> for CommandError {
    fn from(error: AppError) -> Self {
        CommandError {
            message: error.to_string(),
            kind: format!("{:?}", error),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
