//! ============================================================================
//! Task Event Wire Format
//! ============================================================================
//! The server pushes JSON text frames of the shape {"event": ..., "data": ...}
//! over the task stream. Decoding is deliberately lenient: the `complete`
//! payload may be a bare string or an object, and unknown events are
//! surfaced as such rather than killing the stream.
//! ============================================================================

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ArticleMetadata, CandidateQuality, FrameRef, ReconResult, ScrapedMedia};

/// Pipeline status values carried by `status_update`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatusUpdate {
    Queued,
    Active,
    Paused,
    Failed,
}

/// Candidate projection as it arrives on the wire (no local identity yet;
/// the buffer mints ids and owns edits/review state).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CandidateWire {
    #[serde(default)]
    pub appearance_id: Option<u64>,
    #[serde(default)]
    pub officer_id: Option<u64>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
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
    pub ai_meta: Option<Value>,
}

/// One decoded server event.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// `log` / `log_message`: free-text pipeline output
    Log { message: String },
    /// `analyzing_frame`: the frame currently under examination
    AnalyzingFrame(FrameRef),
    /// `recon_result`
    Recon(ReconResult),
    /// `article_metadata`
    Article(ArticleMetadata),
    /// `media_created`: the persistent media row was created
    MediaCreated { media_id: u64 },
    /// `scraped_image`
    ScrapedImage(ScrapedMedia),
    /// `status_update`
    StatusUpdate(TaskStatusUpdate),
    /// `candidate_officer`
    CandidateOfficer(Box<CandidateWire>),
    /// `complete`: string or {message, media_id}
    Complete {
        message: String,
        media_id: Option<u64>,
    },
    /// `Error`: server-side processing error, free text
    Error { message: String },
    /// Anything we do not recognize; logged and skipped by the consumer
    Unknown { event: String },
}

impl TaskEvent {
    /// Decode one text frame. Fails only on malformed JSON or a frame
    /// with no event name.
    pub fn parse(frame: &str) -> Result<TaskEvent> {
        let value: Value =
            serde_json::from_str(frame).map_err(|e| anyhow!("Malformed event frame: {}", e))?;

        let event = value
            .get("event")
            .or_else(|| value.get("type"))
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("Event frame missing 'event' field"))?
            .to_string();

        let data = value.get("data").cloned().unwrap_or(Value::Null);

        let parsed = match event.as_str() {
            "log" | "log_message" => TaskEvent::Log {
                message: string_payload(&data),
            },
            "analyzing_frame" => TaskEvent::AnalyzingFrame(FrameRef {
                url: field_str(&data, "url").unwrap_or_default(),
                timestamp: field_str(&data, "timestamp"),
            }),
            "recon_result" => {
                TaskEvent::Recon(serde_json::from_value(data).unwrap_or_default())
            }
            "article_metadata" => {
                TaskEvent::Article(serde_json::from_value(data).unwrap_or_default())
            }
            "media_created" => {
                let media_id = data
                    .get("media_id")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| anyhow!("media_created without media_id"))?;
                TaskEvent::MediaCreated { media_id }
            }
            "scraped_image" => TaskEvent::ScrapedImage(ScrapedMedia {
                url_ref: field_str(&data, "url")
                    .or_else(|| field_str(&data, "url_ref"))
                    .unwrap_or_default(),
                filename: field_str(&data, "filename").unwrap_or_default(),
            }),
            "status_update" => {
                let raw = string_payload(&data);
                let status = match raw.to_lowercase().as_str() {
                    "queued" => TaskStatusUpdate::Queued,
                    "active" | "processing" | "running" => TaskStatusUpdate::Active,
                    "paused" => TaskStatusUpdate::Paused,
                    "failed" | "error" => TaskStatusUpdate::Failed,
                    other => return Err(anyhow!("Unknown status_update '{}'", other)),
                };
                TaskEvent::StatusUpdate(status)
            }
            "candidate_officer" => {
                let wire: CandidateWire = serde_json::from_value(data)
                    .map_err(|e| anyhow!("Bad candidate_officer payload: {}", e))?;
                TaskEvent::CandidateOfficer(Box::new(wire))
            }
            "complete" => match &data {
                Value::String(s) => TaskEvent::Complete {
                    message: s.clone(),
                    media_id: None,
                },
                Value::Object(_) => TaskEvent::Complete {
                    message: field_str(&data, "message").unwrap_or_else(|| "complete".into()),
                    media_id: data.get("media_id").and_then(Value::as_u64),
                },
                _ => TaskEvent::Complete {
                    message: "complete".into(),
                    media_id: None,
                },
            },
            "Error" | "error" => TaskEvent::Error {
                message: string_payload(&data),
            },
            _ => TaskEvent::Unknown { event },
        };

        Ok(parsed)
    }
}

/// A payload that is either a bare string or {message: ...}.
fn string_payload(data: &Value) -> String {
    match data {
        Value::String(s) => s.clone(),
        Value::Object(_) => field_str(data, "message").unwrap_or_default(),
        _ => String::new(),
    }
}

fn field_str(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Client-to-server join message sent after every (re)connect.
#[derive(Debug, Serialize)]
pub struct JoinTask<'a> {
    pub action: &'static str,
    pub task_id: &'a str,
}

impl<'a> JoinTask<'a> {
    pub fn new(task_id: &'a str) -> Self {
        Self {
            action: "join_task",
            task_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_string_payload() {
        let event = TaskEvent::parse(r#"{"event":"log","data":"Connected"}"#).unwrap();
        assert_eq!(
            event,
            TaskEvent::Log {
                message: "Connected".into()
            }
        );
    }

    #[test]
    fn test_parse_log_object_payload() {
        let event =
            TaskEvent::parse(r#"{"event":"log_message","data":{"message":"found 1 image"}}"#)
                .unwrap();
        assert_eq!(
            event,
            TaskEvent::Log {
                message: "found 1 image".into()
            }
        );
    }

    #[test]
    fn test_parse_status_update() {
        let event =
            TaskEvent::parse(r#"{"event":"status_update","data":"active"}"#).unwrap();
        assert_eq!(event, TaskEvent::StatusUpdate(TaskStatusUpdate::Active));
    }

    #[test]
    fn test_parse_scraped_image() {
        let event = TaskEvent::parse(
            r#"{"event":"scraped_image","data":{"url":"/data/a.jpg","filename":"a.jpg"}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            TaskEvent::ScrapedImage(ScrapedMedia {
                url_ref: "/data/a.jpg".into(),
                filename: "a.jpg".into()
            })
        );
    }

    #[test]
    fn test_parse_candidate_officer() {
        let event = TaskEvent::parse(
            r#"{"event":"candidate_officer","data":{"appearance_id":101,"confidence":0.9,"timestamp":"00:00"}}"#,
        )
        .unwrap();
        match event {
            TaskEvent::CandidateOfficer(wire) => {
                assert_eq!(wire.appearance_id, Some(101));
                assert!((wire.confidence - 0.9).abs() < f64::EPSILON);
                assert_eq!(wire.timestamp, "00:00");
            }
            other => panic!("expected candidate_officer, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_complete_string() {
        let event = TaskEvent::parse(r#"{"event":"complete","data":"done"}"#).unwrap();
        assert_eq!(
            event,
            TaskEvent::Complete {
                message: "done".into(),
                media_id: None
            }
        );
    }

    #[test]
    fn test_parse_complete_object_with_media_id() {
        let event =
            TaskEvent::parse(r#"{"event":"complete","data":{"message":"done","media_id":9}}"#)
                .unwrap();
        assert_eq!(
            event,
            TaskEvent::Complete {
                message: "done".into(),
                media_id: Some(9)
            }
        );
    }

    #[test]
    fn test_parse_error_event_capitalized() {
        let event = TaskEvent::parse(r#"{"event":"Error","data":"boom"}"#).unwrap();
        assert_eq!(
            event,
            TaskEvent::Error {
                message: "boom".into()
            }
        );
    }

    #[test]
    fn test_parse_unknown_event_is_not_fatal() {
        let event = TaskEvent::parse(r#"{"event":"telemetry","data":{}}"#).unwrap();
        assert_eq!(
            event,
            TaskEvent::Unknown {
                event: "telemetry".into()
            }
        );
    }

    #[test]
    fn test_parse_rejects_missing_event_name() {
        assert!(TaskEvent::parse(r#"{"data":"x"}"#).is_err());
        assert!(TaskEvent::parse("not json").is_err());
    }

    #[test]
    fn test_join_task_serialization() {
        let join = JoinTask::new("T1");
        let json = serde_json::to_string(&join).unwrap();
        assert_eq!(json, r#"{"action":"join_task","task_id":"T1"}"#);
    }
}
