use crate::error::{AppError, Result};
use async_trait::async_trait;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::sync::Mutex;

const SESSION_CACHE_DURATION: Duration = Duration::from_secs(5 * 60);
const AVATAR_URL_BASE: &str = "https://minotar.net/helm";

/// Session handed back by the identity provider after a login or refresh.
/// The raw provider profile is persisted verbatim so a later refresh can be
/// replayed without this crate understanding the provider's schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub name: String,
    pub uuid: String,
    pub access_token: String,
    pub licensed: bool,
    pub demo: bool,
    pub raw_profile: serde_json::Value,
}

/// Opaque identity provider. Implementations should surface HTTP 429 style
/// throttling as [`AppError::AuthRateLimited`] so the manager can keep the
/// session file instead of discarding it.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn login(&self) -> Result<AuthSession>;
    async fn refresh(&self, saved_profile: &serde_json::Value) -> Result<AuthSession>;
}

/// Credentials the launch assembler needs from an authenticated session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionProfile {
    pub name: String,
    pub uuid: String,
    pub access_token: String,
}

/// Uniform result shape of the session operations.
#[derive(Debug, Clone, Serialize)]
pub struct SessionOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionOutcome {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            name: None,
            uuid: None,
            avatar: None,
            error: Some(error.into()),
        }
    }

    fn not_logged_in() -> Self {
        Self {
            success: false,
            name: None,
            uuid: None,
            avatar: None,
            error: None,
        }
    }

    fn from_session(session: &AuthSession) -> Self {
        Self {
            success: true,
            name: Some(session.name.clone()),
            uuid: Some(session.uuid.clone()),
            avatar: Some(format!("{}/{}/100.png", AVATAR_URL_BASE, session.uuid)),
            error: None,
        }
    }
}

struct CachedOutcome {
    outcome: SessionOutcome,
    expires_at: Instant,
}

/// Owns the persisted session file and the short-lived refresh cache.
/// Constructed once by the orchestrator and shared by reference; there is no
/// module-level session state.
pub struct SessionManager {
    session_file: PathBuf,
    provider: Arc<dyn AuthProvider>,
    cached: Mutex<Option<CachedOutcome>>,
    profile: Mutex<Option<SessionProfile>>,
    checking: AtomicBool,
}

impl SessionManager {
    pub fn new(session_file: PathBuf, provider: Arc<dyn AuthProvider>) -> Self {
        info!("Initializing SessionManager...");
        Self {
            session_file,
            provider,
            cached: Mutex::new(None),
            profile: Mutex::new(None),
            checking: AtomicBool::new(false),
        }
    }

    /// Interactive login through the identity provider. Demo and unlicensed
    /// accounts are rejected before any state is persisted.
    pub async fn login(&self) -> SessionOutcome {
        info!("Starting login process...");
        match self.provider.login().await {
            Ok(session) => {
                if let Err(e) = validate_ownership(&session) {
                    return SessionOutcome::failure(e.to_string());
                }

                self.store_profile(&session).await;

                if let Some(parent) = self.session_file.parent() {
                    if let Err(e) = fs::create_dir_all(parent).await {
                        error!("Failed to create session directory: {}", e);
                    }
                }
                match serde_json::to_vec(&session.raw_profile) {
                    Ok(bytes) => {
                        if let Err(e) = fs::write(&self.session_file, bytes).await {
                            error!("Failed to save session: {}", e);
                        }
                    }
                    Err(e) => error!("Failed to serialize session: {}", e),
                }

                info!("Login successful for: {}", session.name);
                SessionOutcome::from_session(&session)
            }
            Err(e) => {
                error!("Login error: {}", e);
                SessionOutcome::failure(e.to_string())
            }
        }
    }

    /// Validates the persisted session against the provider, refreshing it if
    /// needed. Results are cached for a few minutes; a second concurrent call
    /// gets a "not ready" failure rather than queueing behind the first.
    pub async fn check_session(&self) -> SessionOutcome {
        {
            let cached = self.cached.lock().await;
            if let Some(entry) = cached.as_ref() {
                if Instant::now() < entry.expires_at {
                    info!("Returning cached session");
                    return entry.outcome.clone();
                }
            }
        }

        if self.checking.swap(true, Ordering::SeqCst) {
            return SessionOutcome::failure(AppError::AuthNotReady.to_string());
        }

        let result = self.refresh_session().await;
        self.checking.store(false, Ordering::SeqCst);

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Session check failed: {}", e);
                self.invalidate_cache().await;

                if matches!(e, AppError::AuthRateLimited) {
                    // The session file may still be valid, keep it for a retry.
                    warn!("Rate limited by identity provider - keeping session file");
                    return SessionOutcome::failure(e.to_string());
                }

                if self.session_file.exists() {
                    info!("Deleting invalid/expired session file");
                    if let Err(remove_err) = fs::remove_file(&self.session_file).await {
                        error!("Failed to delete session file: {}", remove_err);
                    }
                }
                SessionOutcome::failure(e.to_string())
            }
        }
    }

    async fn refresh_session(&self) -> Result<SessionOutcome> {
        if !self.session_file.exists() {
            info!("No session file found at: {:?}", self.session_file);
            return Ok(SessionOutcome::not_logged_in());
        }

        let bytes = fs::read(&self.session_file).await?;
        let saved_profile: serde_json::Value = serde_json::from_slice(&bytes)?;

        info!("Checking saved session...");
        let session = self.provider.refresh(&saved_profile).await?;
        validate_ownership(&session)?;

        self.store_profile(&session).await;

        // Keep the session file current with the refreshed profile.
        if let Err(e) = fs::write(
            &self.session_file,
            serde_json::to_vec(&session.raw_profile)?,
        )
        .await
        {
            error!("Failed to update session file: {}", e);
        }

        let outcome = SessionOutcome::from_session(&session);
        let mut cached = self.cached.lock().await;
        *cached = Some(CachedOutcome {
            outcome: outcome.clone(),
            expires_at: Instant::now() + SESSION_CACHE_DURATION,
        });
        info!("Session restored for: {}", session.name);
        Ok(outcome)
    }

    /// Drops all session state and deletes the session file. Always succeeds.
    pub async fn logout(&self) -> SessionOutcome {
        self.invalidate_cache().await;
        {
            let mut profile = self.profile.lock().await;
            *profile = None;
        }
        if self.session_file.exists() {
            if let Err(e) = fs::remove_file(&self.session_file).await {
                warn!("Failed to delete session file on logout: {}", e);
            }
        }
        SessionOutcome {
            success: true,
            name: None,
            uuid: None,
            avatar: None,
            error: None,
        }
    }

    /// Credentials from the most recent successful login or refresh.
    pub async fn current_profile(&self) -> Option<SessionProfile> {
        self.profile.lock().await.clone()
    }

    async fn store_profile(&self, session: &AuthSession) {
        let mut profile = self.profile.lock().await;
        *profile = Some(SessionProfile {
            name: session.name.clone(),
            uuid: session.uuid.clone(),
            access_token: session.access_token.clone(),
        });
    }

    async fn invalidate_cache(&self) {
        let mut cached = self.cached.lock().await;
        *cached = None;
    }
}

fn validate_ownership(session: &AuthSession) -> Result<()> {
    if !session.licensed {
        return Err(AppError::Auth(
            "No valid game license found on this account".to_string(),
        ));
    }
    if session.demo {
        return Err(AppError::Auth(
            "This account is a demo account and cannot play".to_string(),
        ));
    }
    Ok(())
}
