//! ============================================================================
//! API Client - HTTP Surface of the Accountability Backend
//! ============================================================================
//! Thin typed wrapper over reqwest. Owns the CSRF token lifecycle for
//! mutating calls (fetch once, retry once on rejection), bearer
//! attachment, and the latest-wins guard used by list reloads.
//! ============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::submit::SubmissionEnvelope;
use crate::types::MergeSuggestion;

/// Shown in place of media the client cannot resolve.
pub const MEDIA_PLACEHOLDER: &str = "/media-placeholder.png";

/// Pause between keystroke and fetch on type-ahead inputs.
pub const DEBOUNCE: Duration = Duration::from_millis(300);

const CSRF_HEADER: &str = "X-CSRF-Token";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not authenticated")]
    Unauthorized,
    #[error("csrf token rejected")]
    CsrfRejected,
    #[error("rate limited")]
    RateLimited,
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected response shape: {0}")]
    Decode(String),
}

impl ApiError {
    /// Auth failures mean the stored session is no longer usable.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitReceipt {
    pub task_id: String,
}

#[derive(Debug, Deserialize)]
struct CsrfResponse {
    csrf_token: String,
}

#[derive(Debug, Serialize)]
struct MergeRequest<'a> {
    officer_ids: &'a [u64],
    confidence: f64,
    auto_merged: bool,
}

#[derive(Debug, Deserialize)]
pub struct MergeReceipt {
    pub group_id: u64,
    #[serde(default)]
    pub primary_id: Option<u64>,
}

/// Typed client over the backend REST surface.
pub struct ApiClient {
    http: reqwest::Client,
    api_base: String,
    bearer: RwLock<Option<String>>,
    // CSRF token lives in memory only, never in the local store
    csrf: RwLock<Option<String>>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            api_base: config.api_base.clone(),
            bearer: RwLock::new(None),
            csrf: RwLock::new(None),
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Install or clear the bearer token attached to every request.
    pub fn set_bearer(&self, token: Option<String>) {
        *self.bearer.write().unwrap_or_else(|e| e.into_inner()) = token;
    }

    /// Drop the in-memory CSRF token so the next mutation re-fetches it.
    pub fn clear_csrf(&self) {
        *self.csrf.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn bearer(&self) -> Option<String> {
        self.bearer.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn csrf(&self) -> Option<String> {
        self.csrf.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn apply_bearer(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.bearer() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Submit footage for ingestion and analysis.
    pub async fn submit_ingest(
        &self,
        envelope: &SubmissionEnvelope,
    ) -> Result<SubmitReceipt, ApiError> {
        let url = format!("{}/ingest/submit", self.api_base);
        let body = serde_json::to_value(envelope)
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        let value = self.post_mutating(&url, &body).await?;
        serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Suggestions at or above `threshold`, server-ordered is not trusted;
    /// callers re-sort by confidence descending.
    pub async fn merge_suggestions(
        &self,
        media_id: u64,
        threshold: f64,
    ) -> Result<Vec<MergeSuggestion>, ApiError> {
        let url = format!(
            "{}/media/{}/merge-suggestions?threshold={}",
            self.api_base, media_id, threshold
        );
        let req = self.apply_bearer(self.http.get(&url));
        let response = req.send().await?;
        let value = decode(response).await?;
        serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Commit a merge of two or more officer candidates.
    pub async fn merge_officers(
        &self,
        media_id: u64,
        officer_ids: &[u64],
        confidence: f64,
        auto_merged: bool,
    ) -> Result<MergeReceipt, ApiError> {
        let url = format!("{}/media/{}/officers/merge", self.api_base, media_id);
        let body = serde_json::to_value(MergeRequest {
            officer_ids,
            confidence,
            auto_merged,
        })
        .map_err(|e| ApiError::Decode(e.to_string()))?;
        let value = self.post_mutating(&url, &body).await?;
        serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// POST without CSRF, used by the token refresh path.
    pub async fn post_plain(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        let url = format!("{}{}", self.api_base, path);
        let req = self.apply_bearer(self.http.post(&url)).json(body);
        let response = req.send().await?;
        decode(response).await
    }

    /// POST with CSRF attached. On a csrf_validation_failed rejection the
    /// token is refreshed and the call retried exactly once.
    async fn post_mutating(&self, url: &str, body: &Value) -> Result<Value, ApiError> {
        match self.post_with_csrf(url, body).await {
            Err(ApiError::CsrfRejected) => {
                debug!("CSRF token rejected, refreshing and retrying once");
                self.clear_csrf();
                self.post_with_csrf(url, body).await
            }
            other => other,
        }
    }

    async fn post_with_csrf(&self, url: &str, body: &Value) -> Result<Value, ApiError> {
        let token = match self.csrf() {
            Some(token) => token,
            None => self.fetch_csrf().await?,
        };
        let req = self
            .apply_bearer(self.http.post(url))
            .header(CSRF_HEADER, token)
            .json(body);
        let response = req.send().await?;
        decode(response).await
    }

    async fn fetch_csrf(&self) -> Result<String, ApiError> {
        let url = format!("{}/csrf/token", self.api_base);
        let req = self.apply_bearer(self.http.get(&url));
        let response = req.send().await?;
        let value = decode(response).await?;
        let parsed: CsrfResponse =
            serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))?;
        *self.csrf.write().unwrap_or_else(|e| e.into_inner()) =
            Some(parsed.csrf_token.clone());
        Ok(parsed.csrf_token)
    }
}

/// Map a response to JSON or a typed error from the body envelope.
async fn decode(response: reqwest::Response) -> Result<Value, ApiError> {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);

    if status.is_success() {
        if error_code(&body).as_deref() == Some("csrf_validation_failed") {
            return Err(ApiError::CsrfRejected);
        }
        return Ok(body);
    }

    let code = error_code(&body);
    let message = error_message(&body).unwrap_or_else(|| status.to_string());
    warn!(status = status.as_u16(), "API error: {}", message);

    match (status.as_u16(), code.as_deref()) {
        (_, Some("csrf_validation_failed")) | (403, _) if looks_like_csrf(&message) => {
            Err(ApiError::CsrfRejected)
        }
        (_, Some("csrf_validation_failed")) => Err(ApiError::CsrfRejected),
        (401, _) => Err(ApiError::Unauthorized),
        (429, _) | (_, Some("rate_limited")) => Err(ApiError::RateLimited),
        _ => Err(ApiError::Server {
            status: status.as_u16(),
            message,
        }),
    }
}

fn looks_like_csrf(message: &str) -> bool {
    message.to_lowercase().contains("csrf")
}

/// Error envelopes come in two shapes: {"error":{"code","message"}} and
/// {"detail": "..."}.
fn error_code(body: &Value) -> Option<String> {
    body.get("error")?
        .get("code")?
        .as_str()
        .map(|s| s.to_string())
}

fn error_message(body: &Value) -> Option<String> {
    if let Some(message) = body
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
    {
        return Some(message.to_string());
    }
    body.get("detail").and_then(Value::as_str).map(String::from)
}

/// Resolve a backend media reference into a fetchable URL.
///
/// Absolute http(s) URLs pass through unchanged. Relative refs have any
/// "../data/" walk and leading slashes stripped, then get served from
/// the backend's /data/ mount. Anything unusable maps to the placeholder.
/// Resolving an already-resolved URL is a no-op.
pub fn resolve_media_url(api_base: &str, raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return MEDIA_PLACEHOLDER.to_string();
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return trimmed.to_string();
    }

    let mut path = trimmed;
    while let Some(rest) = path.strip_prefix("../") {
        path = rest;
    }
    let path = path.trim_start_matches('/');
    let path = path.strip_prefix("data/").unwrap_or(path);
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return MEDIA_PLACEHOLDER.to_string();
    }
    format!("{}/data/{}", api_base, path)
}

/// Latest-wins guard for overlapping list loads. Each load takes a
/// ticket; results from a superseded ticket are discarded.
#[derive(Default)]
pub struct LoadGuard {
    generation: AtomicU64,
}

impl LoadGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new load, invalidating all earlier tickets.
    pub fn begin(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// True while `ticket` is still the most recent load.
    pub fn is_current(&self, ticket: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == ticket
    }
}

/// Debounce gate for type-ahead inputs. Each keystroke arms the gate;
/// `settle` resolves true only for the arming that survived the pause.
#[derive(Clone)]
pub struct Debouncer {
    delay: Duration,
    generation: Arc<AtomicU64>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn settle(&self) -> bool {
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;
        self.generation.load(Ordering::SeqCst) == ticket
    }
}
