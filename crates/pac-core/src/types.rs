//! ============================================================================
//! Core Types for the PAC Client
//! ============================================================================
//! Data structures shared across the live session, review workflow, and
//! editor. These types are serialized to JSON for IPC with the frontend.
//! ============================================================================

use serde::{Deserialize, Serialize};

/// Opaque identifier for one server-side analysis pipeline run.
pub type TaskId = String;

/// Source tag for a session log line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    System,
    Info,
    Ai,
    Warning,
    Error,
}

/// One insertion-ordered log line in the session feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub time: i64,
    pub source: LogSource,
    pub message: String,
}

/// What the pipeline found at the submitted URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DetectedContent {
    Video {
        /// Seconds, when the pipeline reported one
        duration: Option<u64>,
    },
    Images {
        count: u64,
    },
    Article {
        count: u64,
    },
}

/// Download phase progress extracted from log lines.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DownloadProgress {
    pub percent: u8,
    pub bytes_current: Option<f64>,
    pub unit: Option<String>,
}

/// Video analysis phase progress.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnalysisProgress {
    pub frames_processed: u64,
    pub frames_total: Option<u64>,
}

/// Running detection statistics for the session.
///
/// `confidence_avg` is the iterated mean `avg = (avg + c) / 2` with
/// avg_0 = 0, updated on each new candidate. This is what the server-side
/// consumers expect; it is not an arithmetic mean.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionStats {
    pub faces: u64,
    pub confidence_avg: f64,
}

impl SessionStats {
    /// Fold one new candidate's confidence into the running stats.
    pub fn observe(&mut self, confidence: f64) {
        self.faces += 1;
        self.confidence_avg = (self.confidence_avg + confidence) / 2.0;
    }
}

/// A frame the pipeline is currently examining, for the live overlay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrameRef {
    pub url: String,
    pub timestamp: Option<String>,
}

/// Metadata scraped from an article-type source.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ArticleMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub site_name: Option<String>,
}

/// Reconnaissance summary emitted before candidate detection starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReconResult {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub estimated_officers: Option<u64>,
}

/// Observable state of the task event stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    /// Open but no events for longer than the stale threshold
    Degraded,
    Closed(String),
    Failed(String),
}

impl ConnectionState {
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Open | ConnectionState::Degraded)
    }
}

/// A file the pipeline scraped from the source. Append-only per session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScrapedMedia {
    pub url_ref: String,
    pub filename: String,
}

// ============================================================================
// Candidates
// ============================================================================

/// Review decision on a candidate.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

/// Frame-quality hints attached by the pipeline.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct CandidateQuality {
    #[serde(default)]
    pub is_blurry: bool,
}

/// User corrections layered over AI/OCR suggestions.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CandidateEdits {
    #[serde(default)]
    pub name_override: Option<String>,
    #[serde(default)]
    pub badge_override: Option<String>,
    #[serde(default)]
    pub force_override: Option<String>,
    #[serde(default)]
    pub rank_override: Option<String>,
    #[serde(default)]
    pub roles: Option<Vec<String>>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl CandidateEdits {
    pub fn is_empty(&self) -> bool {
        self.name_override.is_none()
            && self.badge_override.is_none()
            && self.force_override.is_none()
            && self.rank_override.is_none()
            && self.roles.is_none()
            && self.notes.is_none()
    }
}

/// Review state on a buffered candidate.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CandidateReview {
    pub status: ReviewStatus,
    pub decided_at: Option<i64>,
}

/// A detected officer appearance proposed by the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    /// Local identity; see CandidateBuffer for the minting rule
    pub id: u64,
    #[serde(default)]
    pub appearance_id: Option<u64>,
    #[serde(default)]
    pub officer_id: Option<u64>,
    pub confidence: f64,
    /// Media time, e.g. "01:23"
    pub timestamp: String,
    #[serde(default)]
    pub face_crop_ref: Option<String>,
    #[serde(default)]
    pub body_crop_ref: Option<String>,
    #[serde(default)]
    pub quality: CandidateQuality,
    #[serde(default)]
    pub ai_name: Option<String>,
    #[serde(default)]
    pub ai_name_confidence: Option<f64>,
    #[serde(default)]
    pub ocr_badge_result: Option<String>,
    #[serde(default)]
    pub ocr_badge_confidence: Option<f64>,
    #[serde(default)]
    pub ocr_name_result: Option<String>,
    #[serde(default)]
    pub ocr_name_confidence: Option<f64>,
    #[serde(default)]
    pub ai_force: Option<String>,
    #[serde(default)]
    pub ai_rank: Option<String>,
    #[serde(default)]
    pub ai_meta: Option<serde_json::Value>,
    #[serde(default)]
    pub edits: CandidateEdits,
    #[serde(default)]
    pub review: CandidateReview,
}

impl Candidate {
    /// Effective name: override > OCR > AI > none.
    pub fn effective_name(&self) -> Option<&str> {
        self.edits
            .name_override
            .as_deref()
            .or(self.ocr_name_result.as_deref())
            .or(self.ai_name.as_deref())
    }

    /// Effective badge number: override > OCR > none.
    pub fn effective_badge(&self) -> Option<&str> {
        self.edits
            .badge_override
            .as_deref()
            .or(self.ocr_badge_result.as_deref())
    }

    /// Effective force: override > AI > none.
    pub fn effective_force(&self) -> Option<&str> {
        self.edits
            .force_override
            .as_deref()
            .or(self.ai_force.as_deref())
    }

    /// Effective rank: override > AI > none.
    pub fn effective_rank(&self) -> Option<&str> {
        self.edits
            .rank_override
            .as_deref()
            .or(self.ai_rank.as_deref())
    }
}

// ============================================================================
// Merging
// ============================================================================

/// Server-proposed merge between two detected officer identities.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergeSuggestion {
    pub officer_a_id: u64,
    pub officer_b_id: u64,
    pub confidence: f64,
    #[serde(default)]
    pub crop_a: Option<String>,
    #[serde(default)]
    pub crop_b: Option<String>,
    /// Derived client-side: confidence >= the auto-merge threshold
    #[serde(default)]
    pub auto_merge: bool,
}

impl MergeSuggestion {
    pub fn involves(&self, officer_id: u64) -> bool {
        self.officer_a_id == officer_id || self.officer_b_id == officer_id
    }

    /// True when the two suggestions share any officer.
    pub fn overlaps(&self, other: &MergeSuggestion) -> bool {
        self.involves(other.officer_a_id) || self.involves(other.officer_b_id)
    }
}

/// A confirmed grouping of officer identities into one person.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergedGroup {
    pub group_id: u64,
    pub primary_id: u64,
    /// Always contains primary_id; size >= 2
    pub member_ids: Vec<u64>,
    /// 0.0 for manual merges
    pub confidence: f64,
}

impl MergedGroup {
    pub fn contains(&self, officer_id: u64) -> bool {
        self.member_ids.contains(&officer_id)
    }
}

/// An approved, post-merge officer to be persisted on completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerifiedOfficer {
    pub candidate: Candidate,
    /// Set when this officer is the primary of a merged group
    pub group_id: Option<u64>,
    /// Appearances folded into this officer via merging
    pub merged_appearance_ids: Vec<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate() -> Candidate {
        Candidate {
            id: 1,
            appearance_id: Some(101),
            officer_id: None,
            confidence: 0.9,
            timestamp: "00:00".into(),
            face_crop_ref: None,
            body_crop_ref: None,
            quality: CandidateQuality::default(),
            ai_name: Some("J. Doe".into()),
            ai_name_confidence: Some(0.4),
            ocr_badge_result: Some("AB123".into()),
            ocr_badge_confidence: Some(0.8),
            ocr_name_result: Some("SMITH".into()),
            ocr_name_confidence: Some(0.7),
            ai_force: Some("Kent Police".into()),
            ai_rank: Some("Sergeant".into()),
            ai_meta: None,
            edits: CandidateEdits::default(),
            review: CandidateReview::default(),
        }
    }

    #[test]
    fn test_effective_precedence_override_wins() {
        let mut c = candidate();
        c.edits.force_override = Some("Essex Police".into());
        assert_eq!(c.effective_force(), Some("Essex Police"));
        // Name has no override; OCR beats AI
        assert_eq!(c.effective_name(), Some("SMITH"));
    }

    #[test]
    fn test_effective_falls_back_to_ai() {
        let mut c = candidate();
        c.ocr_name_result = None;
        assert_eq!(c.effective_name(), Some("J. Doe"));
        assert_eq!(c.effective_rank(), Some("Sergeant"));
    }

    #[test]
    fn test_effective_empty_when_no_source() {
        let mut c = candidate();
        c.ocr_badge_result = None;
        assert_eq!(c.effective_badge(), None);
    }

    #[test]
    fn test_stats_running_mean() {
        let mut stats = SessionStats::default();
        stats.observe(0.9);
        assert_eq!(stats.faces, 1);
        assert!((stats.confidence_avg - 0.45).abs() < f64::EPSILON);

        stats.observe(0.5);
        assert_eq!(stats.faces, 2);
        assert!((stats.confidence_avg - 0.475).abs() < f64::EPSILON);
    }

    #[test]
    fn test_suggestion_overlap() {
        let a = MergeSuggestion {
            officer_a_id: 1,
            officer_b_id: 2,
            confidence: 0.97,
            crop_a: None,
            crop_b: None,
            auto_merge: false,
        };
        let b = MergeSuggestion {
            officer_a_id: 2,
            officer_b_id: 3,
            confidence: 0.9,
            crop_a: None,
            crop_b: None,
            auto_merge: false,
        };
        let c = MergeSuggestion {
            officer_a_id: 4,
            officer_b_id: 5,
            confidence: 0.9,
            crop_a: None,
            crop_b: None,
            auto_merge: false,
        };
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }
}
