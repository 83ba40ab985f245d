//! ============================================================================
//! Pipeline Stage Classifier
//! ============================================================================
//! Maps free-form pipeline log lines onto the fixed stage progression
//!   initializing -> url_analysis -> content_detection -> downloading ->
//!   video_analysis -> officer_detection -> finalizing
//! and extracts progress metrics. Rules are first-match, case-insensitive
//! substring checks; a message that would move the stage backwards is
//! ignored by the caller (stage and progress are monotonic per session).
//! ============================================================================

use serde::{Deserialize, Serialize};

use crate::types::{AnalysisProgress, DetectedContent, DownloadProgress};

/// Coarse pipeline phase, in progression order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Initializing,
    UrlAnalysis,
    ContentDetection,
    Downloading,
    VideoAnalysis,
    OfficerDetection,
    Finalizing,
}

impl PipelineStage {
    /// Position in the progression, for monotonicity checks.
    pub fn rank(self) -> u8 {
        self as u8
    }
}

/// What one log line tells us, if anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageUpdate {
    pub stage: Option<PipelineStage>,
    pub detected_content: Option<DetectedContent>,
    pub download: Option<DownloadProgress>,
    pub analysis: Option<AnalysisProgress>,
}

/// Classify one log message. `previous` is the session's current stage;
/// returned stages never regress below it.
pub fn classify(message: &str, previous: PipelineStage) -> StageUpdate {
    let lower = message.to_lowercase();
    let mut update = raw_classify(&lower);

    // Stage monotonicity: a matched stage behind the current one is dropped
    // (the metric extraction, if any, is kept).
    if let Some(stage) = update.stage {
        if stage.rank() < previous.rank() {
            update.stage = None;
        }
    }

    update
}

fn raw_classify(lower: &str) -> StageUpdate {
    // 1. URL analysis
    if lower.contains("fetching url")
        || lower.contains("analyzing url")
        || lower.contains("checking url")
        || lower.contains("requesting")
    {
        return StageUpdate {
            stage: Some(PipelineStage::UrlAnalysis),
            ..Default::default()
        };
    }

    // 2. Video found
    if lower.contains("found video") || lower.contains("detected video") {
        return StageUpdate {
            stage: Some(PipelineStage::ContentDetection),
            detected_content: Some(DetectedContent::Video {
                duration: first_integer(lower),
            }),
            ..Default::default()
        };
    }

    // 3. Images found: a number followed by "image"
    if let Some(count) = number_before(lower, "image") {
        if lower.contains("found") {
            return StageUpdate {
                stage: Some(PipelineStage::ContentDetection),
                detected_content: Some(DetectedContent::Images { count }),
                ..Default::default()
            };
        }
    }

    // 4. Article
    if lower.contains("article") || lower.contains("text content") {
        return StageUpdate {
            stage: Some(PipelineStage::ContentDetection),
            detected_content: Some(DetectedContent::Article { count: 1 }),
            ..Default::default()
        };
    }

    // 5. Downloading
    if lower.contains("download") || lower.contains("fetch") {
        let (bytes_current, unit) = size_and_unit(lower)
            .map(|(b, u)| (Some(b), Some(u)))
            .unwrap_or((None, None));
        return StageUpdate {
            stage: Some(PipelineStage::Downloading),
            download: Some(DownloadProgress {
                percent: percent(lower).unwrap_or(0),
                bytes_current,
                unit,
            }),
            ..Default::default()
        };
    }

    // 6. Video analysis
    if lower.contains("processing video")
        || lower.contains("extracting frame")
        || lower.contains("scanning video")
        || lower.contains("analyzing video")
    {
        return StageUpdate {
            stage: Some(PipelineStage::VideoAnalysis),
            analysis: Some(AnalysisProgress {
                frames_processed: number_after(lower, "frame ").unwrap_or(0),
                frames_total: number_after(lower, "of ")
                    .or_else(|| number_after(lower, "total: ")),
            }),
            ..Default::default()
        };
    }

    // 7. Officer detection
    let detect_target = lower.contains("officer") || lower.contains("police") || lower.contains("face");
    if (lower.contains("detect") && detect_target)
        || lower.contains("analyz")
        || lower.contains("scan")
    {
        return StageUpdate {
            stage: Some(PipelineStage::OfficerDetection),
            ..Default::default()
        };
    }

    // 8. Finalizing
    if lower.contains("sav")
        || lower.contains("final")
        || lower.contains("complet")
        || lower.contains("generating report")
    {
        return StageUpdate {
            stage: Some(PipelineStage::Finalizing),
            ..Default::default()
        };
    }

    StageUpdate::default()
}

// ============================================================================
// Numeric extraction helpers
// ============================================================================

/// First integer anywhere in the message.
fn first_integer(s: &str) -> Option<u64> {
    let mut digits = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
        } else if !digits.is_empty() {
            break;
        }
    }
    digits.parse().ok()
}

/// Integer that appears immediately before `word` (e.g. "3 images").
fn number_before(s: &str, word: &str) -> Option<u64> {
    let idx = s.find(word)?;
    let head = s[..idx].trim_end();
    let start = head
        .rfind(|c: char| !c.is_ascii_digit())
        .map(|i| i + 1)
        .unwrap_or(0);
    let digits = &head[start..];
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

/// Integer that appears immediately after `prefix` (e.g. "frame 12").
fn number_after(s: &str, prefix: &str) -> Option<u64> {
    let idx = s.find(prefix)?;
    let tail = &s[idx + prefix.len()..];
    let digits: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

/// "NN%" anywhere in the message.
fn percent(s: &str) -> Option<u8> {
    let idx = s.find('%')?;
    let head = &s[..idx];
    let start = head
        .rfind(|c: char| !c.is_ascii_digit())
        .map(|i| i + 1)
        .unwrap_or(0);
    let value: u64 = head[start..].parse().ok()?;
    Some(value.min(100) as u8)
}

/// "F.F MB" style size: a decimal number followed by KB/MB/GB.
fn size_and_unit(s: &str) -> Option<(f64, String)> {
    for unit in ["gb", "mb", "kb"] {
        if let Some(idx) = s.find(unit) {
            let head = s[..idx].trim_end();
            let start = head
                .rfind(|c: char| !c.is_ascii_digit() && c != '.')
                .map(|i| i + 1)
                .unwrap_or(0);
            if let Ok(value) = head[start..].parse::<f64>() {
                return Some((value, unit.to_uppercase()));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_analysis_phrases() {
        for msg in [
            "Fetching URL https://ex.org",
            "analyzing url structure",
            "Checking URL headers",
            "Requesting page",
        ] {
            let update = classify(msg, PipelineStage::Initializing);
            assert_eq!(update.stage, Some(PipelineStage::UrlAnalysis), "msg: {}", msg);
        }
    }

    #[test]
    fn test_found_video_with_duration() {
        let update = classify("Found video, 120 seconds long", PipelineStage::UrlAnalysis);
        assert_eq!(update.stage, Some(PipelineStage::ContentDetection));
        assert_eq!(
            update.detected_content,
            Some(DetectedContent::Video {
                duration: Some(120)
            })
        );
    }

    #[test]
    fn test_found_images_with_count() {
        let update = classify("found 3 images on page", PipelineStage::UrlAnalysis);
        assert_eq!(update.stage, Some(PipelineStage::ContentDetection));
        assert_eq!(update.detected_content, Some(DetectedContent::Images { count: 3 }));
    }

    #[test]
    fn test_article_detection() {
        let update = classify("Found text content in article body", PipelineStage::UrlAnalysis);
        assert_eq!(update.detected_content, Some(DetectedContent::Article { count: 1 }));
    }

    #[test]
    fn test_download_with_percent_and_size() {
        let update = classify(
            "Downloading video: 42% (12.5 MB)",
            PipelineStage::ContentDetection,
        );
        assert_eq!(update.stage, Some(PipelineStage::Downloading));
        let progress = update.download.unwrap();
        assert_eq!(progress.percent, 42);
        assert_eq!(progress.bytes_current, Some(12.5));
        assert_eq!(progress.unit.as_deref(), Some("MB"));
    }

    #[test]
    fn test_video_analysis_frame_progress() {
        let update = classify(
            "Processing video frame 17 of 480",
            PipelineStage::Downloading,
        );
        assert_eq!(update.stage, Some(PipelineStage::VideoAnalysis));
        let progress = update.analysis.unwrap();
        assert_eq!(progress.frames_processed, 17);
        assert_eq!(progress.frames_total, Some(480));
    }

    #[test]
    fn test_video_analysis_total_variant() {
        let update = classify(
            "Extracting frame 4, total: 250",
            PipelineStage::VideoAnalysis,
        );
        let progress = update.analysis.unwrap();
        assert_eq!(progress.frames_processed, 4);
        assert_eq!(progress.frames_total, Some(250));
    }

    #[test]
    fn test_officer_detection_phrases() {
        for msg in [
            "Detecting officer uniforms",
            "detected 2 faces",
            "detecting police insignia",
        ] {
            let update = classify(msg, PipelineStage::VideoAnalysis);
            assert_eq!(update.stage, Some(PipelineStage::OfficerDetection), "msg: {}", msg);
        }
    }

    #[test]
    fn test_finalizing_phrases() {
        for msg in ["Saving results", "Finalizing output", "Generating report"] {
            let update = classify(msg, PipelineStage::OfficerDetection);
            assert_eq!(update.stage, Some(PipelineStage::Finalizing), "msg: {}", msg);
        }
    }

    #[test]
    fn test_stage_never_regresses() {
        // "requesting" would map to url_analysis, but the session is past it
        let update = classify("requesting thumbnails", PipelineStage::OfficerDetection);
        assert_eq!(update.stage, None);
    }

    #[test]
    fn test_first_match_wins_over_later_rules() {
        // Contains "analyz" (officer_detection) but "analyzing url" matches first
        let update = classify("analyzing url", PipelineStage::Initializing);
        assert_eq!(update.stage, Some(PipelineStage::UrlAnalysis));

        // "analyzing video" hits the video_analysis rule, not officer_detection
        let update = classify("analyzing video stream", PipelineStage::Downloading);
        assert_eq!(update.stage, Some(PipelineStage::VideoAnalysis));
    }

    #[test]
    fn test_unmatched_message() {
        let update = classify("heartbeat", PipelineStage::Initializing);
        assert_eq!(update, StageUpdate::default());
    }

    #[test]
    fn test_stage_ordering() {
        assert!(PipelineStage::Initializing < PipelineStage::UrlAnalysis);
        assert!(PipelineStage::OfficerDetection < PipelineStage::Finalizing);
    }
}
