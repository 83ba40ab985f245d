//! ============================================================================
//! Client Configuration
//! ============================================================================
//! Environment-driven configuration. The API base is required and must be
//! an absolute http(s) URL; the websocket base is derived from it.
//! ============================================================================

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// Environment variable holding the platform API base URL.
pub const ENV_API_BASE: &str = "PAC_API_BASE";

/// Environment variable switching dev mode (wider logging only).
pub const ENV_DEV_MODE: &str = "PAC_DEV";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Absolute http(s) API base, trailing slash stripped
    pub api_base: String,
    /// Derived ws(s) base for the event channel
    pub ws_base: String,
    /// Dev/prod flag; influences logging verbosity only
    pub dev_mode: bool,
}

impl ClientConfig {
    /// Build a config from an explicit API base URL.
    pub fn new(api_base: &str, dev_mode: bool) -> Result<Self> {
        let api_base = validate_api_base(api_base)?;
        let ws_base = derive_ws_base(&api_base);
        Ok(Self {
            api_base,
            ws_base,
            dev_mode,
        })
    }

    /// Build a config from the environment.
    pub fn from_env() -> Result<Self> {
        let api_base = std::env::var(ENV_API_BASE)
            .map_err(|_| anyhow!("{} is not set", ENV_API_BASE))?;
        let dev_mode = std::env::var(ENV_DEV_MODE)
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Self::new(&api_base, dev_mode)
    }

    /// Websocket endpoint for a task-scoped event stream.
    pub fn task_stream_url(&self, task_id: &str) -> String {
        format!("{}/ingest/tasks/{}/stream", self.ws_base, task_id)
    }
}

/// True for an absolute http(s) URL with a host.
pub fn is_absolute_http_url(raw: &str) -> bool {
    match Url::parse(raw) {
        Ok(parsed) => {
            matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some()
        }
        Err(_) => false,
    }
}

/// Validate and normalize the API base: absolute http(s), no trailing slash.
fn validate_api_base(raw: &str) -> Result<String> {
    if !is_absolute_http_url(raw) {
        return Err(anyhow!("API base must be an absolute http(s) URL: '{}'", raw));
    }
    Ok(raw.trim_end_matches('/').to_string())
}

/// http -> ws, https -> wss.
fn derive_ws_base(api_base: &str) -> String {
    if let Some(rest) = api_base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = api_base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        api_base.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_api_base_strips_trailing_slash() {
        let config = ClientConfig::new("https://api.example.org/", false).unwrap();
        assert_eq!(config.api_base, "https://api.example.org");
        assert_eq!(config.ws_base, "wss://api.example.org");
    }

    #[test]
    fn test_http_derives_ws() {
        let config = ClientConfig::new("http://localhost:8080", true).unwrap();
        assert_eq!(config.ws_base, "ws://localhost:8080");
        assert!(config.dev_mode);
    }

    #[test]
    fn test_rejects_non_http_scheme() {
        assert!(ClientConfig::new("ftp://example.org", false).is_err());
        assert!(ClientConfig::new("not a url", false).is_err());
    }

    #[test]
    fn test_task_stream_url() {
        let config = ClientConfig::new("https://api.example.org", false).unwrap();
        assert_eq!(
            config.task_stream_url("T1"),
            "wss://api.example.org/ingest/tasks/T1/stream"
        );
    }
}
