//! ============================================================================
//! Live Analysis Session State Machine
//! ============================================================================
//! Owns the lifecycle of one analysis task:
//!   Connecting -> Active -> (CompleteNormal | CompleteEarly | TerminalError)
//! with a transient PausedByError detour for recoverable failures. The
//! machine is synchronous and clock-driven (callers pass `now`), which keeps
//! every transition unit-testable; the async channel runner feeds it.
//! ============================================================================

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::buffer::{AddOutcome, CandidateBuffer, CandidateEdit};
use crate::error::{classify_transport_error, ClientError, SurfacedError, R_MAX, T_STALE};
use crate::events::{TaskEvent, TaskStatusUpdate};
use crate::stage::{classify, PipelineStage};
use crate::types::{
    AnalysisProgress, ArticleMetadata, Candidate, ConnectionState, DetectedContent,
    DownloadProgress, FrameRef, LogEntry, LogSource, ReconResult, ScrapedMedia, SessionStats,
    TaskId,
};

/// Bounded log ring size (latest N entries are kept).
const MAX_LOG_ENTRIES: usize = 200;

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Connecting,
    Active,
    PausedByError,
    CompleteNormal,
    CompleteEarly,
    TerminalError,
}

impl SessionStatus {
    /// Complete-* and TerminalError accept no further candidate arrivals.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::CompleteNormal
                | SessionStatus::CompleteEarly
                | SessionStatus::TerminalError
        )
    }
}

/// Immutable projection of the session for presenters and IPC.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSnapshot {
    pub task_id: TaskId,
    pub status: SessionStatus,
    pub stage: PipelineStage,
    pub connection: ConnectionState,
    pub log_entries: Vec<LogEntry>,
    pub reconnect_attempts: u32,
    pub last_event_at: Option<i64>,
    pub stats: SessionStats,
    pub download_progress: DownloadProgress,
    pub analysis_progress: AnalysisProgress,
    pub detected_content: Option<DetectedContent>,
    pub current_frame: Option<FrameRef>,
    pub article_metadata: Option<ArticleMetadata>,
    pub recon: Option<ReconResult>,
    pub media_id: Option<u64>,
    pub scraped_media: Vec<ScrapedMedia>,
    pub candidates: Vec<Candidate>,
    pub error: Option<SurfacedError>,
}

/// State machine for one live analysis session.
pub struct SessionMachine {
    task_id: TaskId,
    status: SessionStatus,
    stage: PipelineStage,
    connection: ConnectionState,
    logs: VecDeque<LogEntry>,
    reconnect_attempts: u32,
    max_reconnect_attempts: u32,
    last_event_at: Option<i64>,
    stats: SessionStats,
    download: DownloadProgress,
    analysis: AnalysisProgress,
    detected_content: Option<DetectedContent>,
    current_frame: Option<FrameRef>,
    article_metadata: Option<ArticleMetadata>,
    recon: Option<ReconResult>,
    media_id: Option<u64>,
    scraped_media: Vec<ScrapedMedia>,
    buffer: CandidateBuffer,
    error: Option<ClientError>,
    /// Set when the server emitted an Error event; promoted to terminal if
    /// the channel closes without `complete`
    pending_processing_error: Option<String>,
    /// Edge trigger so a stalled session surfaces the stale banner once
    stale_surfaced: bool,
}

impl SessionMachine {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            status: SessionStatus::Connecting,
            stage: PipelineStage::Initializing,
            connection: ConnectionState::Idle,
            logs: VecDeque::new(),
            reconnect_attempts: 0,
            max_reconnect_attempts: R_MAX,
            last_event_at: None,
            stats: SessionStats::default(),
            download: DownloadProgress::default(),
            analysis: AnalysisProgress::default(),
            detected_content: None,
            current_frame: None,
            article_metadata: None,
            recon: None,
            media_id: None,
            scraped_media: Vec::new(),
            buffer: CandidateBuffer::new(),
            error: None,
            pending_processing_error: None,
            stale_surfaced: false,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    pub fn media_id(&self) -> Option<u64> {
        self.media_id
    }

    pub fn buffer(&self) -> &CandidateBuffer {
        &self.buffer
    }

    // ========================================================================
    // Connection callbacks (driven by the event channel runner)
    // ========================================================================

    /// The channel finished its handshake and re-joined the task.
    pub fn on_open(&mut self, now: i64) {
        self.connection = ConnectionState::Open;
        self.reconnect_attempts = 0;
        self.last_event_at = Some(now);
        self.stale_surfaced = false;

        if self.status == SessionStatus::Connecting || self.status == SessionStatus::PausedByError {
            info!(task = %self.task_id, "Session active");
            self.status = SessionStatus::Active;
            self.error = None;
            self.push_log(now, LogSource::System, "Connected to analysis stream");
        }
    }

    /// One connect (or reconnect) attempt failed.
    pub fn on_connect_failure(&mut self, message: &str, now: i64) {
        if self.status.is_terminal() {
            return;
        }

        self.reconnect_attempts += 1;
        self.connection = ConnectionState::Reconnecting;
        debug!(
            task = %self.task_id,
            attempt = self.reconnect_attempts,
            "Connect attempt failed: {}",
            message
        );

        if self.reconnect_attempts >= self.max_reconnect_attempts {
            self.fail_terminal(Self::exhaustion_error(message), now);
        } else {
            self.push_log(now, LogSource::Warning, &format!(
                "Connection attempt {} of {} failed",
                self.reconnect_attempts, self.max_reconnect_attempts
            ));
        }
    }

    /// The channel spent every reconnect attempt and stopped for good.
    pub fn on_exhausted(&mut self, message: &str, now: i64) {
        if self.status.is_terminal() {
            self.connection = ConnectionState::Failed(message.to_string());
            return;
        }
        if let Some(detail) = self.pending_processing_error.take() {
            self.fail_terminal(ClientError::ProcessingError(detail), now);
            return;
        }
        self.reconnect_attempts = self.reconnect_attempts.max(self.max_reconnect_attempts);
        self.fail_terminal(Self::exhaustion_error(message), now);
    }

    /// The channel closed without the consumer marking completion.
    pub fn on_connection_lost(&mut self, reason: &str, now: i64) {
        if self.status.is_terminal() {
            self.connection = ConnectionState::Closed(reason.to_string());
            return;
        }

        // A processing error followed by closure without `complete` is fatal
        if let Some(detail) = self.pending_processing_error.take() {
            self.fail_terminal(ClientError::ProcessingError(detail), now);
            return;
        }

        self.connection = ConnectionState::Reconnecting;
        if self.status == SessionStatus::Active {
            self.status = SessionStatus::PausedByError;
            self.error = Some(ClientError::ConnectionLost(reason.to_string()));
            self.push_log(now, LogSource::Warning, "Live connection dropped");
        }
    }

    /// Surface a recoverable error without tearing the session down.
    pub fn surface_error(&mut self, error: ClientError, now: i64) {
        if self.status.is_terminal() {
            return;
        }
        if !error.is_recoverable() {
            self.fail_terminal(error, now);
            return;
        }
        warn!(task = %self.task_id, "Recoverable error surfaced: {}", error);
        if self.status == SessionStatus::Active && !matches!(error, ClientError::StaleConnection(_))
        {
            self.status = SessionStatus::PausedByError;
        }
        self.error = Some(error);
    }

    /// User-invoked retry from a paused or stale state.
    pub fn retry(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = SessionStatus::Connecting;
        self.connection = ConnectionState::Connecting;
        self.error = None;
        self.stale_surfaced = false;
    }

    /// User cut the stream short; buffers freeze, pending = approved.
    pub fn finish_early(&mut self, now: i64) {
        if self.status.is_terminal() {
            return;
        }
        info!(task = %self.task_id, "Session finished early by user");
        self.status = SessionStatus::CompleteEarly;
        self.connection = ConnectionState::Closed("finished early".into());
        self.buffer.freeze();
        self.error = None;
        self.push_log(now, LogSource::System, "Analysis stopped early");
    }

    /// Stale-connection watchdog; called periodically while the session runs.
    /// Surfaces StaleConnection once per stall without leaving Active.
    pub fn check_stale(&mut self, now: i64) {
        if self.status != SessionStatus::Active || self.stale_surfaced {
            return;
        }
        let Some(last) = self.last_event_at else {
            return;
        };
        if now - last >= T_STALE.as_secs() as i64 {
            warn!(task = %self.task_id, "No events for {}s, surfacing stale warning", now - last);
            self.connection = ConnectionState::Degraded;
            self.error = Some(ClientError::StaleConnection(format!(
                "no events for {}s",
                now - last
            )));
            self.stale_surfaced = true;
        }
    }

    // ========================================================================
    // Event consumption
    // ========================================================================

    pub fn handle_event(&mut self, event: TaskEvent, now: i64) {
        // Every observed event refreshes liveness and clears a stale banner
        self.last_event_at = Some(now);
        if self.stale_surfaced {
            self.stale_surfaced = false;
            if matches!(self.error, Some(ClientError::StaleConnection(_))) {
                self.error = None;
            }
            if self.connection == ConnectionState::Degraded {
                self.connection = ConnectionState::Open;
            }
        }

        match event {
            TaskEvent::Log { message } => self.handle_log(&message, now),
            TaskEvent::AnalyzingFrame(frame) => {
                self.current_frame = Some(frame);
            }
            TaskEvent::Recon(recon) => {
                self.recon = Some(recon);
            }
            TaskEvent::Article(meta) => {
                self.article_metadata = Some(meta);
            }
            TaskEvent::MediaCreated { media_id } => {
                self.media_id = Some(media_id);
                self.push_log(now, LogSource::System, "Media record created");
            }
            TaskEvent::ScrapedImage(media) => {
                self.scraped_media.push(media);
            }
            TaskEvent::StatusUpdate(status) => self.handle_status_update(status, now),
            TaskEvent::CandidateOfficer(wire) => {
                if self.status.is_terminal() {
                    debug!(task = %self.task_id, "Dropping late candidate after completion");
                    return;
                }
                let confidence = wire.confidence;
                if let AddOutcome::Inserted(_) = self.buffer.add(*wire, self.media_id) {
                    self.stats.observe(confidence);
                    if self.stage.rank() < PipelineStage::OfficerDetection.rank() {
                        self.stage = PipelineStage::OfficerDetection;
                    }
                }
            }
            TaskEvent::Complete { message, media_id } => self.handle_complete(message, media_id, now),
            TaskEvent::Error { message } => {
                warn!(task = %self.task_id, "Pipeline error event: {}", message);
                self.push_log(now, LogSource::Error, &message);
                self.pending_processing_error = Some(message);
            }
            TaskEvent::Unknown { event } => {
                debug!(task = %self.task_id, "Ignoring unknown event '{}'", event);
            }
        }
    }

    fn handle_log(&mut self, message: &str, now: i64) {
        self.push_log(now, LogSource::Info, message);

        let update = classify(message, self.stage);
        if let Some(stage) = update.stage {
            if stage.rank() > self.stage.rank() {
                self.stage = stage;
            }
        }
        if let Some(content) = update.detected_content {
            self.detected_content = Some(content);
        }
        if let Some(download) = update.download {
            // Progress is monotonic; out-of-order lines never regress it
            if download.percent >= self.download.percent {
                self.download = download;
            }
        }
        if let Some(analysis) = update.analysis {
            if analysis.frames_processed >= self.analysis.frames_processed {
                let frames_total = analysis.frames_total.or(self.analysis.frames_total);
                self.analysis = AnalysisProgress {
                    frames_processed: analysis.frames_processed,
                    frames_total,
                };
            }
        }
    }

    fn handle_status_update(&mut self, status: TaskStatusUpdate, now: i64) {
        match status {
            TaskStatusUpdate::Active => {
                if self.status == SessionStatus::Connecting {
                    self.status = SessionStatus::Active;
                    self.push_log(now, LogSource::System, "Pipeline active");
                }
            }
            TaskStatusUpdate::Queued | TaskStatusUpdate::Paused => {
                self.push_log(now, LogSource::System, "Pipeline queued");
            }
            TaskStatusUpdate::Failed => {
                self.pending_processing_error
                    .get_or_insert_with(|| "pipeline reported failure".into());
            }
        }
    }

    fn handle_complete(&mut self, message: String, media_id: Option<u64>, now: i64) {
        if self.status.is_terminal() {
            return;
        }
        info!(task = %self.task_id, "Analysis complete: {}", message);
        self.status = SessionStatus::CompleteNormal;
        self.stage = PipelineStage::Finalizing;
        if media_id.is_some() {
            self.media_id = media_id;
        }
        self.connection = ConnectionState::Closed("complete".into());
        self.buffer.freeze();
        // Completion supersedes any prior non-fatal error
        self.error = None;
        self.pending_processing_error = None;
        self.push_log(now, LogSource::System, &message);
    }

    /// Exhaustion maps to ConnectionFailed unless the server was explicitly
    /// throttling us.
    fn exhaustion_error(message: &str) -> ClientError {
        match classify_transport_error(message) {
            ClientError::RateLimited(m) => ClientError::RateLimited(m),
            other => ClientError::ConnectionFailed(other.to_string()),
        }
    }

    fn fail_terminal(&mut self, error: ClientError, now: i64) {
        warn!(task = %self.task_id, "Session terminal: {}", error);
        self.status = SessionStatus::TerminalError;
        self.connection = ConnectionState::Failed(error.to_string());
        self.buffer.freeze();
        self.push_log(now, LogSource::Error, &error.message());
        self.error = Some(error);
    }

    fn push_log(&mut self, now: i64, source: LogSource, message: &str) {
        if self.logs.len() == MAX_LOG_ENTRIES {
            self.logs.pop_front();
        }
        self.logs.push_back(LogEntry {
            time: now,
            source,
            message: message.to_string(),
        });
    }

    // ========================================================================
    // User actions on buffered candidates
    // ========================================================================

    pub fn set_candidate_edit(&mut self, id: u64, edit: CandidateEdit) -> bool {
        self.buffer.set_edit(id, edit)
    }

    pub fn decide_candidate(&mut self, id: u64, approved: bool, now: i64) -> bool {
        self.buffer.decide(id, approved, now)
    }

    pub fn undo_candidate(&mut self, id: u64) -> bool {
        self.buffer.undo(id)
    }

    /// Accepted candidates for handoff to the review coordinator.
    /// Hand the buffer to the review phase. Only meaningful once the
    /// session is terminal; the machine keeps an empty frozen buffer
    /// and is read-only from here on.
    pub fn take_buffer(&mut self) -> CandidateBuffer {
        let mut taken = std::mem::take(&mut self.buffer);
        self.buffer.freeze();
        taken.freeze();
        taken
    }

    pub fn export_accepted(&self) -> Vec<Candidate> {
        self.buffer.export_accepted()
    }

    // ========================================================================
    // Snapshot
    // ========================================================================

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            task_id: self.task_id.clone(),
            status: self.status,
            stage: self.stage,
            connection: self.connection.clone(),
            log_entries: self.logs.iter().cloned().collect(),
            reconnect_attempts: self.reconnect_attempts,
            last_event_at: self.last_event_at,
            stats: self.stats.clone(),
            download_progress: self.download.clone(),
            analysis_progress: self.analysis.clone(),
            detected_content: self.detected_content.clone(),
            current_frame: self.current_frame.clone(),
            article_metadata: self.article_metadata.clone(),
            recon: self.recon.clone(),
            media_id: self.media_id,
            scraped_media: self.scraped_media.clone(),
            candidates: self.buffer.all(),
            error: self.error.as_ref().map(ClientError::surface),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CandidateWire;

    fn candidate_event(appearance_id: u64, confidence: f64, timestamp: &str) -> TaskEvent {
        TaskEvent::CandidateOfficer(Box::new(CandidateWire {
            appearance_id: Some(appearance_id),
            officer_id: None,
            confidence,
            timestamp: timestamp.into(),
            face_crop_ref: None,
            body_crop_ref: None,
            quality: Default::default(),
            ai_name: None,
            ai_name_confidence: None,
            ocr_badge_result: None,
            ocr_badge_confidence: None,
            ocr_name_result: None,
            ocr_name_confidence: None,
            ai_force: None,
            ai_rank: None,
            ai_meta: None,
        }))
    }

    /// Happy path with a single image.
    #[test]
    fn test_happy_path_single_image() {
        let mut session = SessionMachine::new("T1".into());
        session.on_open(0);
        session.handle_event(
            TaskEvent::Log {
                message: "Connected".into(),
            },
            1,
        );
        session.handle_event(TaskEvent::StatusUpdate(TaskStatusUpdate::Active), 2);
        session.handle_event(
            TaskEvent::Log {
                message: "found 1 image".into(),
            },
            3,
        );
        session.handle_event(
            TaskEvent::ScrapedImage(ScrapedMedia {
                url_ref: "/data/a.jpg".into(),
                filename: "a.jpg".into(),
            }),
            4,
        );
        session.handle_event(candidate_event(101, 0.9, "00:00"), 5);
        session.handle_event(
            TaskEvent::Complete {
                message: "done".into(),
                media_id: Some(9),
            },
            6,
        );

        let snap = session.snapshot();
        assert_eq!(snap.status, SessionStatus::CompleteNormal);
        assert_eq!(snap.stage, PipelineStage::Finalizing);
        assert_eq!(snap.stats.faces, 1);
        assert!((snap.stats.confidence_avg - 0.45).abs() < f64::EPSILON);
        assert_eq!(snap.candidates.len(), 1);
        assert_eq!(snap.media_id, Some(9));
        assert_eq!(snap.scraped_media.len(), 1);
        assert!(snap.error.is_none());
    }

    /// Rate-limited connect attempts.
    #[test]
    fn test_rate_limit_on_connect() {
        let mut session = SessionMachine::new("T2".into());

        for i in 0..3 {
            session.on_connect_failure("HTTP 429 Too Many Requests", i);
        }
        assert_eq!(session.snapshot().reconnect_attempts, 3);
        assert_eq!(session.status(), SessionStatus::Connecting);
        assert!(session.snapshot().candidates.is_empty());

        session.on_connect_failure("HTTP 429 Too Many Requests", 4);
        session.on_connect_failure("HTTP 429 Too Many Requests", 5);

        let snap = session.snapshot();
        assert_eq!(snap.status, SessionStatus::TerminalError);
        assert!(matches!(
            snap.error.unwrap().kind,
            ClientError::RateLimited(_)
        ));
    }

    /// The channel reports the final failed attempt as exhaustion rather
    /// than another connect failure; the session must still end terminal.
    #[test]
    fn test_exhausted_signal_is_terminal() {
        let mut session = SessionMachine::new("T2".into());

        for i in 0..4 {
            session.on_connect_failure("Connection refused (os error 111)", i);
        }
        assert_eq!(session.status(), SessionStatus::Connecting);
        assert!(session.snapshot().error.is_none());

        session.on_exhausted("Connection refused (os error 111)", 5);

        let snap = session.snapshot();
        assert_eq!(snap.status, SessionStatus::TerminalError);
        assert_eq!(snap.reconnect_attempts, 5);
        assert!(matches!(
            snap.error.unwrap().kind,
            ClientError::ConnectionFailed(_)
        ));
    }

    /// A throttled exhaustion keeps the RateLimited kind.
    #[test]
    fn test_exhausted_preserves_rate_limit_kind() {
        let mut session = SessionMachine::new("T2".into());
        session.on_exhausted("HTTP 429 Too Many Requests", 0);

        let snap = session.snapshot();
        assert_eq!(snap.status, SessionStatus::TerminalError);
        assert!(matches!(
            snap.error.unwrap().kind,
            ClientError::RateLimited(_)
        ));
    }

    /// Stale during active, then late completion.
    #[test]
    fn test_stale_then_complete() {
        let mut session = SessionMachine::new("T3".into());
        session.on_open(0);
        session.handle_event(TaskEvent::StatusUpdate(TaskStatusUpdate::Active), 0);

        session.check_stale(61);
        let snap = session.snapshot();
        assert_eq!(snap.status, SessionStatus::Active);
        let error = snap.error.unwrap();
        assert!(matches!(error.kind, ClientError::StaleConnection(_)));
        assert!(error.recoverable);

        // A later complete must still land normally
        session.handle_event(
            TaskEvent::Complete {
                message: "done".into(),
                media_id: None,
            },
            120,
        );
        let snap = session.snapshot();
        assert_eq!(snap.status, SessionStatus::CompleteNormal);
        assert!(snap.error.is_none());
        assert_eq!(snap.media_id, None);
    }

    #[test]
    fn test_stale_surfaced_once_and_cleared_by_event() {
        let mut session = SessionMachine::new("T".into());
        session.on_open(0);
        session.handle_event(TaskEvent::StatusUpdate(TaskStatusUpdate::Active), 0);
        session.check_stale(61);
        assert!(session.snapshot().error.is_some());

        // Next event clears the banner and restores the connection
        session.handle_event(
            TaskEvent::Log {
                message: "still here".into(),
            },
            62,
        );
        let snap = session.snapshot();
        assert!(snap.error.is_none());
        assert_eq!(snap.connection, ConnectionState::Open);
    }

    /// Early finish exports non-rejected candidates.
    #[test]
    fn test_early_finish() {
        let mut session = SessionMachine::new("T6".into());
        session.on_open(0);
        session.handle_event(candidate_event(1, 0.9, "00:01"), 1);
        session.handle_event(candidate_event(2, 0.8, "00:02"), 2);
        session.handle_event(candidate_event(3, 0.7, "00:03"), 3);
        session.decide_candidate(1, false, 4);

        session.finish_early(5);

        let snap = session.snapshot();
        assert_eq!(snap.status, SessionStatus::CompleteEarly);
        assert!(matches!(snap.connection, ConnectionState::Closed(_)));
        assert_eq!(session.export_accepted().len(), 2);
    }

    #[test]
    fn test_late_candidates_dropped_after_completion() {
        let mut session = SessionMachine::new("T".into());
        session.on_open(0);
        session.handle_event(candidate_event(1, 0.9, "00:01"), 1);
        session.handle_event(
            TaskEvent::Complete {
                message: "done".into(),
                media_id: None,
            },
            2,
        );
        session.handle_event(candidate_event(2, 0.8, "00:02"), 3);

        let snap = session.snapshot();
        assert_eq!(snap.stats.faces, 1);
        assert_eq!(snap.candidates.len(), 1);
    }

    #[test]
    fn test_duplicate_candidate_counted_once() {
        let mut session = SessionMachine::new("T".into());
        session.on_open(0);
        session.handle_event(candidate_event(101, 0.9, "00:00"), 1);
        session.handle_event(candidate_event(101, 0.92, "00:00"), 2);

        let snap = session.snapshot();
        assert_eq!(snap.stats.faces, 1);
        // Running mean folded the confidence exactly once
        assert!((snap.stats.confidence_avg - 0.45).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rejection_does_not_reduce_faces() {
        let mut session = SessionMachine::new("T".into());
        session.on_open(0);
        session.handle_event(candidate_event(1, 0.9, "00:01"), 1);
        session.handle_event(candidate_event(2, 0.8, "00:02"), 2);
        session.decide_candidate(1, false, 3);
        assert_eq!(session.snapshot().stats.faces, 2);
    }

    #[test]
    fn test_processing_error_then_closure_is_terminal() {
        let mut session = SessionMachine::new("T".into());
        session.on_open(0);
        session.handle_event(
            TaskEvent::Error {
                message: "detector crashed".into(),
            },
            1,
        );
        // Still active; the server may continue
        assert_eq!(session.status(), SessionStatus::Active);

        session.on_connection_lost("closed", 2);
        let snap = session.snapshot();
        assert_eq!(snap.status, SessionStatus::TerminalError);
        assert!(matches!(
            snap.error.unwrap().kind,
            ClientError::ProcessingError(_)
        ));
    }

    #[test]
    fn test_connection_lost_pauses_then_retry_reconnects() {
        let mut session = SessionMachine::new("T".into());
        session.on_open(0);
        session.handle_event(candidate_event(1, 0.9, "00:01"), 1);

        session.on_connection_lost("reset", 2);
        let snap = session.snapshot();
        assert_eq!(snap.status, SessionStatus::PausedByError);
        // Buffers survive the pause
        assert_eq!(snap.candidates.len(), 1);

        session.retry();
        assert_eq!(session.status(), SessionStatus::Connecting);
        assert!(session.snapshot().error.is_none());

        session.on_open(3);
        assert_eq!(session.status(), SessionStatus::Active);
        assert_eq!(session.snapshot().reconnect_attempts, 0);
    }

    #[test]
    fn test_zero_candidates_complete() {
        let mut session = SessionMachine::new("T".into());
        session.on_open(0);
        session.handle_event(
            TaskEvent::Complete {
                message: "done".into(),
                media_id: None,
            },
            1,
        );
        let snap = session.snapshot();
        assert_eq!(snap.status, SessionStatus::CompleteNormal);
        assert_eq!(snap.stats.faces, 0);
        assert!(session.export_accepted().is_empty());
    }

    #[test]
    fn test_download_progress_monotonic() {
        let mut session = SessionMachine::new("T".into());
        session.on_open(0);
        session.handle_event(
            TaskEvent::Log {
                message: "Downloading: 40%".into(),
            },
            1,
        );
        session.handle_event(
            TaskEvent::Log {
                message: "Downloading: 20%".into(),
            },
            2,
        );
        assert_eq!(session.snapshot().download_progress.percent, 40);
    }

    #[test]
    fn test_log_ring_bounded() {
        let mut session = SessionMachine::new("T".into());
        session.on_open(0);
        for i in 0..250 {
            session.handle_event(
                TaskEvent::Log {
                    message: format!("line {}", i),
                },
                i,
            );
        }
        let snap = session.snapshot();
        assert_eq!(snap.log_entries.len(), MAX_LOG_ENTRIES);
        assert_eq!(snap.log_entries.last().unwrap().message, "line 249");
    }
}
