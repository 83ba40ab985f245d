//! ============================================================================
//! Auth Store - Session Identity and Token Refresh
//! ============================================================================
//! One authenticated identity per application. Tokens persist in the
//! local store; the CSRF token never does. A background loop refreshes
//! the access token ahead of expiry, and only one refresh may be in
//! flight at a time.
//! ============================================================================

use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::net::ApiClient;
use crate::store::ClientDb;

/// Lead time before expiry at which a refresh is scheduled.
pub const REFRESH_LEAD_SECS: i64 = 120;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix epoch seconds
    pub expires_at: i64,
}

impl AuthTokens {
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    /// Epoch second at which the refresh loop should fire.
    pub fn refresh_due_at(&self) -> i64 {
        self.expires_at - REFRESH_LEAD_SECS
    }

    pub fn should_refresh(&self, now: i64) -> bool {
        now >= self.refresh_due_at()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRecord {
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    refresh_token: String,
    expires_at: i64,
}

/// Application-scoped identity holder. The network adapter is the only
/// component that reads the bearer out of here.
pub struct AuthStore {
    api: Arc<ApiClient>,
    db: Arc<ClientDb>,
    tokens: RwLock<Option<AuthTokens>>,
    user: RwLock<Option<UserRecord>>,
    refresh_flight: Mutex<()>,
}

impl AuthStore {
    /// Load any persisted identity and arm the API client with it.
    pub fn open(api: Arc<ApiClient>, db: Arc<ClientDb>) -> Result<Self> {
        let tokens = db.load_tokens()?;
        let user = db.load_user()?;
        if let Some(t) = &tokens {
            api.set_bearer(Some(t.access_token.clone()));
        }
        Ok(Self {
            api,
            db,
            tokens: RwLock::new(tokens),
            user: RwLock::new(user),
            refresh_flight: Mutex::new(()),
        })
    }

    pub fn tokens(&self) -> Option<AuthTokens> {
        self.tokens.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn user(&self) -> Option<UserRecord> {
        self.user.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_authenticated(&self, now: i64) -> bool {
        self.tokens().map(|t| !t.is_expired(now)).unwrap_or(false)
    }

    /// Install a fresh identity (login or external handoff).
    pub fn install(&self, tokens: AuthTokens, user: Option<UserRecord>) -> Result<()> {
        self.api.set_bearer(Some(tokens.access_token.clone()));
        self.db.save_tokens(&tokens)?;
        if let Some(u) = &user {
            self.db.save_user(u)?;
        }
        *self.tokens.write().unwrap_or_else(|e| e.into_inner()) = Some(tokens);
        if user.is_some() {
            *self.user.write().unwrap_or_else(|e| e.into_inner()) = user;
        }
        Ok(())
    }

    /// Tear down the identity everywhere: memory, store, API client.
    pub fn clear(&self) -> Result<()> {
        *self.tokens.write().unwrap_or_else(|e| e.into_inner()) = None;
        *self.user.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.api.set_bearer(None);
        self.api.clear_csrf();
        self.db.clear_identity()?;
        Ok(())
    }

    /// Refresh the access token. Single-flight: concurrent callers wait
    /// on the first refresh and then observe its result.
    pub async fn refresh(&self, now: i64) -> Result<()> {
        let _flight = self.refresh_flight.lock().await;

        // A concurrent caller may have already refreshed while we waited
        let tokens = match self.tokens() {
            Some(t) if t.should_refresh(now) => t,
            Some(_) => return Ok(()),
            None => return Err(anyhow!("no session to refresh")),
        };

        let body = serde_json::json!({ "refresh_token": tokens.refresh_token });
        match self.api.post_plain("/auth/refresh", &body).await {
            Ok(value) => {
                let parsed: RefreshResponse = serde_json::from_value(value)
                    .map_err(|e| anyhow!("bad refresh response: {}", e))?;
                let fresh = AuthTokens {
                    access_token: parsed.access_token,
                    refresh_token: parsed.refresh_token,
                    expires_at: parsed.expires_at,
                };
                info!("Access token refreshed, expires at {}", fresh.expires_at);
                self.install(fresh, None)
            }
            Err(e) if e.is_auth_failure() => {
                warn!("Token refresh rejected, clearing session");
                self.clear()?;
                Err(anyhow!("session expired"))
            }
            Err(e) => Err(anyhow!("token refresh failed: {}", e)),
        }
    }

    /// Seconds until the next scheduled refresh, floored at zero.
    pub fn refresh_delay(&self, now: i64) -> Option<Duration> {
        let tokens = self.tokens()?;
        let wait = (tokens.refresh_due_at() - now).max(0) as u64;
        Some(Duration::from_secs(wait))
    }
}

/// Background loop keeping the access token fresh. Exits when the
/// identity is cleared or a refresh fails terminally.
pub async fn run_refresh_loop(store: Arc<AuthStore>) {
    loop {
        let delay = match store.refresh_delay(chrono::Utc::now().timestamp()) {
            Some(delay) => delay,
            None => return,
        };
        tokio::time::sleep(delay).await;
        if store.refresh(chrono::Utc::now().timestamp()).await.is_err() {
            return;
        }
    }
}
