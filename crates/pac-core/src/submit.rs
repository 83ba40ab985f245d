//! ============================================================================
//! Submission Questionnaire - Footage Intake Envelope
//! ============================================================================

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::is_absolute_http_url;

#[derive(Debug, Error, PartialEq)]
pub enum SubmitError {
    #[error("url must be an absolute http(s) url")]
    InvalidUrl,
    #[error("human verification is required before submitting")]
    MissingHumanToken,
}

/// Immutable envelope sent to the ingestion endpoint. Built through
/// [`SubmissionDraft`] so invalid envelopes cannot exist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmissionEnvelope {
    pub url: String,
    #[serde(rename = "hasPoliceImagery")]
    pub has_police_imagery: bool,
    #[serde(rename = "hasVideo")]
    pub has_video: bool,
    #[serde(rename = "hasImages")]
    pub has_images: bool,
    #[serde(rename = "hasArticle")]
    pub has_article: bool,
    #[serde(rename = "protestId", skip_serializing_if = "Option::is_none")]
    pub protest_id: Option<u64>,
    pub human_token: String,
}

/// Mutable questionnaire state. Content flags default to false and the
/// protest link to none.
#[derive(Debug, Clone, Default)]
pub struct SubmissionDraft {
    pub url: String,
    pub has_police_imagery: bool,
    pub has_video: bool,
    pub has_images: bool,
    pub has_article: bool,
    pub protest_id: Option<u64>,
    pub human_token: Option<String>,
}

impl SubmissionDraft {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim().to_string(),
            ..Self::default()
        }
    }

    /// The submit button stays disabled until this returns true.
    pub fn is_submittable(&self) -> bool {
        self.validate().is_ok()
    }

    fn validate(&self) -> Result<(), SubmitError> {
        if !is_absolute_http_url(&self.url) {
            return Err(SubmitError::InvalidUrl);
        }
        match &self.human_token {
            Some(token) if !token.trim().is_empty() => Ok(()),
            _ => Err(SubmitError::MissingHumanToken),
        }
    }

    /// Freeze the draft into a sendable envelope.
    pub fn seal(&self) -> Result<SubmissionEnvelope, SubmitError> {
        self.validate()?;
        Ok(SubmissionEnvelope {
            url: self.url.trim().to_string(),
            has_police_imagery: self.has_police_imagery,
            has_video: self.has_video,
            has_images: self.has_images,
            has_article: self.has_article,
            protest_id: self.protest_id,
            // validate() guarantees the token is present
            human_token: self.human_token.clone().unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_requires_human_token() {
        let mut draft = SubmissionDraft::new("https://example.com/footage");
        assert_eq!(draft.seal().unwrap_err(), SubmitError::MissingHumanToken);
        assert!(!draft.is_submittable());

        draft.human_token = Some("ok".into());
        assert!(draft.is_submittable());
        let envelope = draft.seal().unwrap();
        assert_eq!(envelope.url, "https://example.com/footage");
        assert_eq!(envelope.human_token, "ok");
    }

    #[test]
    fn test_seal_rejects_bad_urls() {
        for url in ["", "ftp://example.com/x", "not a url", "/relative/path"] {
            let mut draft = SubmissionDraft::new(url);
            draft.human_token = Some("ok".into());
            assert_eq!(draft.seal().unwrap_err(), SubmitError::InvalidUrl, "{url}");
        }
    }

    #[test]
    fn test_content_flags_default_false() {
        let draft = SubmissionDraft::new("https://example.com/x");
        assert!(!draft.has_police_imagery && !draft.has_video);
        assert!(!draft.has_images && !draft.has_article);
        assert!(draft.protest_id.is_none());
    }

    #[test]
    fn test_envelope_wire_names() {
        let mut draft = SubmissionDraft::new("https://ex/img");
        draft.has_police_imagery = true;
        draft.has_images = true;
        draft.human_token = Some("ok".into());
        let json = serde_json::to_value(draft.seal().unwrap()).unwrap();
        assert_eq!(json["hasPoliceImagery"], true);
        assert_eq!(json["hasImages"], true);
        assert_eq!(json["hasVideo"], false);
        assert!(json.get("protestId").is_none());
        assert_eq!(json["human_token"], "ok");
    }
}
