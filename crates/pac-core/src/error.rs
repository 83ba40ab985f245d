//! ============================================================================
//! Client Error Taxonomy - Classification & Backoff
//! ============================================================================
//! Every failure that can reach the UI is mapped into ClientError first:
//! - Transport failures are classified by message text (never shown raw)
//! - Each kind carries a title, a user-facing message, a recoverable bit,
//!   and a suggested retry delay
//! - Reconnect backoff uses exponential delay with optional jitter
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection handshake timeout.
pub const T_CONNECT: Duration = Duration::from_secs(20);

/// No-event threshold before a session is considered stale.
pub const T_STALE: Duration = Duration::from_secs(60);

/// Reconnect attempt ceiling.
pub const R_MAX: u32 = 5;

/// Typed error for everything the client surfaces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ClientError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection timed out: {0}")]
    ConnectionTimeout(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Processing error: {0}")]
    ProcessingError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Connection stale: {0}")]
    StaleConnection(String),
}

impl ClientError {
    /// Short human title for banners.
    pub fn title(&self) -> &'static str {
        match self {
            ClientError::ConnectionFailed(_) => "Connection Failed",
            ClientError::ConnectionTimeout(_) => "Connection Timed Out",
            ClientError::ConnectionLost(_) => "Connection Lost",
            ClientError::ProcessingError(_) => "Processing Error",
            ClientError::RateLimited(_) => "Too Many Requests",
            ClientError::ServerError(_) => "Server Error",
            ClientError::StaleConnection(_) => "Connection Stalled",
        }
    }

    /// User-facing message (no raw transport text).
    pub fn message(&self) -> String {
        match self {
            ClientError::ConnectionFailed(_) => {
                "Could not reach the analysis server. Check your connection and retry.".into()
            }
            ClientError::ConnectionTimeout(_) => {
                "The analysis server took too long to respond.".into()
            }
            ClientError::ConnectionLost(_) => {
                "The live connection dropped. Your progress is preserved.".into()
            }
            ClientError::ProcessingError(d) => format!("The pipeline reported a problem: {}", d),
            ClientError::RateLimited(_) => {
                "The server is throttling requests. Please wait before retrying.".into()
            }
            ClientError::ServerError(_) => "The server reported an internal error.".into(),
            ClientError::StaleConnection(_) => {
                "No updates received for a while. The connection may have stalled.".into()
            }
        }
    }

    /// Whether a retry action should be offered.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ClientError::ConnectionFailed(_) => true,
            ClientError::ConnectionTimeout(_) => true,
            ClientError::ConnectionLost(_) => true,
            ClientError::ProcessingError(_) => false,
            ClientError::RateLimited(_) => true,
            ClientError::ServerError(_) => true,
            ClientError::StaleConnection(_) => true,
        }
    }

    /// Suggested delay before the retry action is attempted.
    pub fn retry_delay(&self) -> Duration {
        match self {
            ClientError::RateLimited(_) => Duration::from_secs(30),
            ClientError::StaleConnection(_) => Duration::from_secs(0),
            _ => Duration::from_secs(3),
        }
    }

    /// Banner payload for presenters.
    pub fn surface(&self) -> SurfacedError {
        SurfacedError {
            kind: self.clone(),
            title: self.title().to_string(),
            message: self.message(),
            recoverable: self.is_recoverable(),
            retry_delay_ms: self.retry_delay().as_millis() as u64,
        }
    }
}

/// Fully rendered error for the UI layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SurfacedError {
    pub kind: ClientError,
    pub title: String,
    pub message: String,
    pub recoverable: bool,
    pub retry_delay_ms: u64,
}

/// Classify a raw transport/server error message into the taxonomy.
/// First match wins; unknown errors default to ConnectionFailed since
/// an unclassified failure on the stream is a connectivity problem.
pub fn classify_transport_error(error: &str) -> ClientError {
    let lower = error.to_lowercase();

    if lower.contains("rate limit") || lower.contains("too many requests") || lower.contains("429")
    {
        return ClientError::RateLimited(error.to_string());
    }

    if lower.contains("timed out") || lower.contains("timeout") {
        return ClientError::ConnectionTimeout(error.to_string());
    }

    if lower.contains("reset") || lower.contains("closed") || lower.contains("eof") {
        return ClientError::ConnectionLost(error.to_string());
    }

    if lower.contains("500")
        || lower.contains("502")
        || lower.contains("503")
        || lower.contains("internal server")
    {
        return ClientError::ServerError(error.to_string());
    }

    ClientError::ConnectionFailed(error.to_string())
}

/// Reconnect/backoff behavior for the event channel.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Maximum reconnect attempts before the session goes terminal
    pub max_attempts: u32,
    /// Base delay between attempts (multiplied by 2^attempt)
    pub base_delay_ms: u64,
    /// Cap on any single delay
    pub max_delay_ms: u64,
    /// Whether to add random jitter to delays
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: R_MAX,
            base_delay_ms: 1000,
            max_delay_ms: 15000,
            jitter: true,
        }
    }
}

/// Exponential backoff delay for a given attempt (0-based).
pub fn backoff_delay(attempt: u32, config: &BackoffConfig) -> Duration {
    let multiplier = 2u64.saturating_pow(attempt.min(63));
    let base = config.base_delay_ms.saturating_mul(multiplier);
    let capped = base.min(config.max_delay_ms);

    let final_delay = if config.jitter {
        // 0-50% jitter on top of the capped delay
        let factor = 1.0 + (rand::random::<f64>() * 0.5);
        (capped as f64 * factor) as u64
    } else {
        capped
    };

    Duration::from_millis(final_delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rate_limit() {
        let rate_limited = [
            "HTTP 429 Too Many Requests",
            "rate limit exceeded",
            "too many requests, slow down",
        ];
        for error in rate_limited {
            assert!(
                matches!(classify_transport_error(error), ClientError::RateLimited(_)),
                "Expected RateLimited for: {}",
                error
            );
        }
    }

    #[test]
    fn test_classify_timeout() {
        assert!(matches!(
            classify_transport_error("connection timed out after 20s"),
            ClientError::ConnectionTimeout(_)
        ));
    }

    #[test]
    fn test_classify_lost() {
        let lost = ["connection reset by peer", "stream closed", "unexpected EOF"];
        for error in lost {
            assert!(
                matches!(classify_transport_error(error), ClientError::ConnectionLost(_)),
                "Expected ConnectionLost for: {}",
                error
            );
        }
    }

    #[test]
    fn test_classify_server_error() {
        assert!(matches!(
            classify_transport_error("HTTP 503 Service Unavailable"),
            ClientError::ServerError(_)
        ));
    }

    #[test]
    fn test_classify_unknown_defaults_to_connection_failed() {
        assert!(matches!(
            classify_transport_error("something strange"),
            ClientError::ConnectionFailed(_)
        ));
    }

    #[test]
    fn test_recoverable_bits() {
        assert!(ClientError::ConnectionLost("x".into()).is_recoverable());
        assert!(ClientError::StaleConnection("x".into()).is_recoverable());
        assert!(!ClientError::ProcessingError("x".into()).is_recoverable());
    }

    #[test]
    fn test_surface_carries_title_and_delay() {
        let surfaced = ClientError::RateLimited("429".into()).surface();
        assert_eq!(surfaced.title, "Too Many Requests");
        assert!(surfaced.recoverable);
        assert_eq!(surfaced.retry_delay_ms, 30_000);
    }

    #[test]
    fn test_backoff_delay_deterministic() {
        let config = BackoffConfig {
            jitter: false,
            base_delay_ms: 1000,
            max_delay_ms: 15000,
            max_attempts: 5,
        };

        assert_eq!(backoff_delay(0, &config), Duration::from_millis(1000));
        assert_eq!(backoff_delay(1, &config), Duration::from_millis(2000));
        assert_eq!(backoff_delay(2, &config), Duration::from_millis(4000));
        assert_eq!(backoff_delay(3, &config), Duration::from_millis(8000));
        // Capped at max_delay_ms
        assert_eq!(backoff_delay(6, &config), Duration::from_millis(15000));
    }

    #[test]
    fn test_backoff_delay_with_jitter() {
        let config = BackoffConfig {
            jitter: true,
            base_delay_ms: 1000,
            max_delay_ms: 15000,
            max_attempts: 5,
        };

        for _ in 0..10 {
            let delay = backoff_delay(0, &config);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn test_constants() {
        assert_eq!(T_CONNECT, Duration::from_secs(20));
        assert_eq!(T_STALE, Duration::from_secs(60));
        assert_eq!(R_MAX, 5);
    }
}
