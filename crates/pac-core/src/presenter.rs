//! ============================================================================
//! Session Presenter - Snapshot to View Model
//! ============================================================================
//! Pure projection. Every field here is derived from a SessionSnapshot
//! plus the API base for media resolution; calling it twice with the
//! same inputs yields the same view.
//! ============================================================================

use serde::{Deserialize, Serialize};

use crate::net::resolve_media_url;
use crate::session::{SessionSnapshot, SessionStatus};
use crate::stage::PipelineStage;
use crate::types::{Candidate, ConnectionState, DetectedContent, ReviewStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BadgeTone {
    Neutral,
    Live,
    Warn,
    Success,
    Danger,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusBadge {
    pub label: String,
    pub tone: BadgeTone,
}

/// One of the seven stage visuals the session screen can show.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageVisual {
    Pulse,
    UrlProbe,
    ContentScan,
    DownloadGauge,
    FrameSweep,
    FaceGrid,
    ReportSeal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionBanner {
    pub title: String,
    pub message: String,
    pub can_retry: bool,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatTile {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrameOverlay {
    pub url: String,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateCard {
    pub id: u64,
    pub display_name: String,
    pub badge: Option<String>,
    pub confidence_pct: u8,
    pub crop_url: String,
    pub status: ReviewStatus,
    pub is_blurry: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionFlags {
    pub can_finish_early: bool,
    pub can_retry: bool,
    pub can_review: bool,
}

/// Everything the session screen renders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionView {
    pub badge: StatusBadge,
    pub visual: StageVisual,
    pub banner: Option<ConnectionBanner>,
    pub frame_overlay: Option<FrameOverlay>,
    pub tiles: Vec<StatTile>,
    pub cards: Vec<CandidateCard>,
    pub actions: ActionFlags,
}

/// Project a snapshot into the view model. No side effects.
pub fn present(snapshot: &SessionSnapshot, api_base: &str) -> SessionView {
    SessionView {
        badge: status_badge(snapshot),
        visual: stage_visual(snapshot.stage),
        banner: connection_banner(snapshot),
        frame_overlay: snapshot.current_frame.as_ref().map(|frame| FrameOverlay {
            url: resolve_media_url(api_base, &frame.url),
            timestamp: frame.timestamp.clone(),
        }),
        tiles: stat_tiles(snapshot),
        cards: snapshot
            .candidates
            .iter()
            .map(|c| candidate_card(c, api_base))
            .collect(),
        actions: action_flags(snapshot),
    }
}

fn status_badge(snapshot: &SessionSnapshot) -> StatusBadge {
    let (label, tone) = match snapshot.status {
        SessionStatus::Connecting => ("Connecting", BadgeTone::Neutral),
        SessionStatus::Active => match snapshot.connection {
            ConnectionState::Degraded => ("Stalled", BadgeTone::Warn),
            ConnectionState::Reconnecting => ("Reconnecting", BadgeTone::Warn),
            _ => ("Live", BadgeTone::Live),
        },
        SessionStatus::PausedByError => ("Paused", BadgeTone::Warn),
        SessionStatus::CompleteNormal => ("Complete", BadgeTone::Success),
        SessionStatus::CompleteEarly => ("Finished early", BadgeTone::Success),
        SessionStatus::TerminalError => ("Failed", BadgeTone::Danger),
    };
    StatusBadge {
        label: label.to_string(),
        tone,
    }
}

fn stage_visual(stage: PipelineStage) -> StageVisual {
    match stage {
        PipelineStage::Initializing => StageVisual::Pulse,
        PipelineStage::UrlAnalysis => StageVisual::UrlProbe,
        PipelineStage::ContentDetection => StageVisual::ContentScan,
        PipelineStage::Downloading => StageVisual::DownloadGauge,
        PipelineStage::VideoAnalysis => StageVisual::FrameSweep,
        PipelineStage::OfficerDetection => StageVisual::FaceGrid,
        PipelineStage::Finalizing => StageVisual::ReportSeal,
    }
}

fn connection_banner(snapshot: &SessionSnapshot) -> Option<ConnectionBanner> {
    let error = snapshot.error.as_ref()?;
    Some(ConnectionBanner {
        title: error.title.clone(),
        message: error.message.clone(),
        can_retry: error.recoverable,
        retry_delay_ms: error.retry_delay_ms,
    })
}

fn stat_tiles(snapshot: &SessionSnapshot) -> Vec<StatTile> {
    let mut tiles = vec![
        StatTile {
            label: "Faces".into(),
            value: snapshot.stats.faces.to_string(),
        },
        StatTile {
            label: "Avg confidence".into(),
            value: format!("{:.0}%", snapshot.stats.confidence_avg * 100.0),
        },
    ];

    match &snapshot.detected_content {
        Some(DetectedContent::Video { duration }) => tiles.push(StatTile {
            label: "Video".into(),
            value: duration
                .map(|d| format!("{}s", d))
                .unwrap_or_else(|| "detected".into()),
        }),
        Some(DetectedContent::Images { count }) => tiles.push(StatTile {
            label: "Images".into(),
            value: count.to_string(),
        }),
        Some(DetectedContent::Article { .. }) => tiles.push(StatTile {
            label: "Article".into(),
            value: "1".into(),
        }),
        None => {}
    }

    if snapshot.stage == PipelineStage::Downloading || snapshot.download_progress.percent > 0 {
        tiles.push(StatTile {
            label: "Download".into(),
            value: format!("{}%", snapshot.download_progress.percent),
        });
    }
    if snapshot.analysis_progress.frames_processed > 0 {
        let value = match snapshot.analysis_progress.frames_total {
            Some(total) => format!(
                "{}/{}",
                snapshot.analysis_progress.frames_processed, total
            ),
            None => snapshot.analysis_progress.frames_processed.to_string(),
        };
        tiles.push(StatTile {
            label: "Frames".into(),
            value,
        });
    }

    tiles
}

fn candidate_card(candidate: &Candidate, api_base: &str) -> CandidateCard {
    let crop_url = candidate
        .face_crop_ref
        .as_deref()
        .or(candidate.body_crop_ref.as_deref())
        .map(|r| resolve_media_url(api_base, r))
        .unwrap_or_else(|| resolve_media_url(api_base, ""));

    CandidateCard {
        id: candidate.id,
        display_name: candidate
            .effective_name()
            .unwrap_or("Unidentified officer")
            .to_string(),
        badge: candidate.effective_badge().map(String::from),
        confidence_pct: (candidate.confidence * 100.0).round().clamp(0.0, 100.0) as u8,
        crop_url,
        status: candidate.review.status,
        is_blurry: candidate.quality.is_blurry,
    }
}

fn action_flags(snapshot: &SessionSnapshot) -> ActionFlags {
    ActionFlags {
        can_finish_early: snapshot.status == SessionStatus::Active,
        can_retry: snapshot.status == SessionStatus::PausedByError
            || snapshot
                .error
                .as_ref()
                .map(|e| e.recoverable)
                .unwrap_or(false),
        can_review: matches!(
            snapshot.status,
            SessionStatus::CompleteNormal | SessionStatus::CompleteEarly
        ) && snapshot.media_id.is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionMachine;
    use crate::types::FrameRef;

    fn snapshot() -> SessionSnapshot {
        SessionMachine::new("T1".into()).snapshot()
    }

    #[test]
    fn test_every_stage_has_a_distinct_visual() {
        let stages = [
            PipelineStage::Initializing,
            PipelineStage::UrlAnalysis,
            PipelineStage::ContentDetection,
            PipelineStage::Downloading,
            PipelineStage::VideoAnalysis,
            PipelineStage::OfficerDetection,
            PipelineStage::Finalizing,
        ];
        let mut visuals: Vec<StageVisual> = stages.iter().map(|s| stage_visual(*s)).collect();
        visuals.dedup();
        assert_eq!(visuals.len(), 7);
    }

    #[test]
    fn test_connecting_badge_and_actions() {
        let view = present(&snapshot(), "http://api.test");
        assert_eq!(view.badge.label, "Connecting");
        assert_eq!(view.badge.tone, BadgeTone::Neutral);
        assert!(!view.actions.can_finish_early);
        assert!(!view.actions.can_review);
        assert!(view.banner.is_none());
    }

    #[test]
    fn test_frame_overlay_resolves_media() {
        let mut snap = snapshot();
        snap.current_frame = Some(FrameRef {
            url: "../data/frames/f1.jpg".into(),
            timestamp: Some("00:12".into()),
        });
        let view = present(&snap, "http://api.test");
        let overlay = view.frame_overlay.unwrap();
        assert_eq!(overlay.url, "http://api.test/data/frames/f1.jpg");
        assert_eq!(overlay.timestamp.as_deref(), Some("00:12"));
    }

    #[test]
    fn test_stats_tiles_include_running_mean() {
        let mut snap = snapshot();
        snap.stats.faces = 1;
        snap.stats.confidence_avg = 0.45;
        let view = present(&snap, "http://api.test");
        assert_eq!(view.tiles[0].value, "1");
        assert_eq!(view.tiles[1].value, "45%");
    }

    #[test]
    fn test_unnamed_candidate_card_uses_fallbacks() {
        let mut snap = snapshot();
        snap.candidates.push(Candidate {
            id: 3,
            confidence: 0.9,
            ..Candidate::default()
        });
        let view = present(&snap, "http://api.test");
        let card = &view.cards[0];
        assert_eq!(card.display_name, "Unidentified officer");
        assert_eq!(card.confidence_pct, 90);
        assert_eq!(card.crop_url, crate::net::MEDIA_PLACEHOLDER);
    }

    #[test]
    fn test_presentation_is_deterministic() {
        let snap = snapshot();
        assert_eq!(present(&snap, "http://a"), present(&snap, "http://a"));
    }
}
