//! ============================================================================
//! PAC Client :: Tauri Backend (Async-First)
//! ============================================================================
//! Non-blocking IPC commands using tokio::spawn for all network operations.
//! Ensures the HUD never stalls waiting on the platform API or the task
//! event stream.
//!
//! Pattern: Clone Arc -> tokio::spawn -> JoinHandle -> await result
//! ============================================================================

use std::sync::Arc;

use pac_core::auth::{AuthStore, AuthTokens, UserRecord};
use pac_core::channel::{ChannelSignal, CloseHandle, EventChannel};
use pac_core::editor::{EditorSession, FieldPreview, OfficerEdits, OfficerRank, OfficerRole, PoliceForce};
use pac_core::net::{resolve_media_url, Debouncer, LoadGuard, DEBOUNCE};
use pac_core::presenter::{present, SessionView};
use pac_core::review::{MergeCoordinator, ReviewOutput, MERGE_THRESHOLD};
use pac_core::store::{ClientDb, SubmissionOutcome, SubmissionRecord};
use pac_core::submit::SubmissionDraft;
use pac_core::buffer::CandidateEdit;
use pac_core::types::{MergeSuggestion, MergedGroup, VerifiedOfficer};
use pac_core::{ApiClient, ClientConfig, SessionMachine, SessionSnapshot};
use serde::{Deserialize, Serialize};
use tauri::{Emitter, Manager, State};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Event emitted to the webview whenever the session snapshot changes.
const SNAPSHOT_EVENT: &str = "session://snapshot";

// ============================================================================
// Application State (Thread-Safe)
// ============================================================================

/// One live analysis session: the machine shared with its runner task
/// plus the close control for the underlying channel.
pub struct LiveSession {
    pub task_id: String,
    pub machine: Arc<Mutex<SessionMachine>>,
    pub closer: CloseHandle,
}

/// Shared application state - fields wrapped in Arc<RwLock<T>> for safe
/// concurrent access from multiple tokio tasks
pub struct AppState {
    pub config: Arc<ClientConfig>,
    pub api: Arc<ApiClient>,
    pub db: Arc<RwLock<Option<Arc<ClientDb>>>>,
    pub auth: Arc<RwLock<Option<Arc<AuthStore>>>>,
    pub session: Arc<RwLock<Option<LiveSession>>>,
    pub coordinator: Arc<RwLock<Option<MergeCoordinator>>>,
    pub editor: Arc<RwLock<Option<EditorSession>>>,
    pub suggestion_debounce: Debouncer,
    pub suggestion_loads: Arc<LoadGuard>,
}

// ============================================================================
// Async Task Result Type
// ============================================================================

/// Wrapper for async task results to handle spawn errors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsyncResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> AsyncResult<T> {
    fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    fn err(msg: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(msg.into()) }
    }
}

// ============================================================================
// Session Runner
// ============================================================================

/// Pump channel signals into the machine and mirror each change to the
/// webview. Exits when the channel ends or the session turns terminal.
async fn run_session(
    app: tauri::AppHandle,
    machine: Arc<Mutex<SessionMachine>>,
    mut channel: EventChannel,
) {
    let mut stale_tick = tokio::time::interval(std::time::Duration::from_secs(10));
    stale_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        let snapshot = tokio::select! {
            signal = channel.next() => {
                let Some(signal) = signal else { break };
                let now = chrono::Utc::now().timestamp();
                let mut machine = machine.lock().await;
                match signal {
                    ChannelSignal::Open => machine.on_open(now),
                    ChannelSignal::Event(event) => machine.handle_event(event, now),
                    ChannelSignal::ConnectFailed { message } => {
                        machine.on_connect_failure(&message, now)
                    }
                    ChannelSignal::Lost { reason } => machine.on_connection_lost(&reason, now),
                    ChannelSignal::Exhausted { message } => machine.on_exhausted(&message, now),
                }
                machine.snapshot()
            }
            _ = stale_tick.tick() => {
                let now = chrono::Utc::now().timestamp();
                let mut machine = machine.lock().await;
                machine.check_stale(now);
                machine.snapshot()
            }
        };

        let terminal = snapshot.status.is_terminal();
        if let Err(e) = app.emit(SNAPSHOT_EVENT, &snapshot) {
            warn!("Failed to emit session snapshot: {}", e);
        }
        if terminal {
            break;
        }
    }

    channel.close();
    debug!("Session runner finished");
}

/// Record how a watched submission ended, when we know about it.
async fn settle_submission(state: &AppState, task_id: &str, snapshot: &SessionSnapshot) {
    let db = state.db.read().await;
    let Some(db) = db.as_ref() else { return };
    if db.get_submission(task_id).ok().flatten().is_none() {
        return;
    }
    let outcome = match snapshot.status {
        pac_core::SessionStatus::CompleteNormal | pac_core::SessionStatus::CompleteEarly => {
            SubmissionOutcome::Complete
        }
        pac_core::SessionStatus::TerminalError => SubmissionOutcome::Failed,
        _ => SubmissionOutcome::Abandoned,
    };
    if let Err(e) = db.update_submission_outcome(task_id, outcome, snapshot.media_id) {
        warn!("Failed to record submission outcome: {}", e);
    }
}

// ============================================================================
// Tauri Commands - Submission & Live Session (Non-Blocking)
// ============================================================================

/// Submit footage and open its live analysis session
#[tauri::command]
async fn submit_footage(
    app: tauri::AppHandle,
    state: State<'_, AppState>,
    url: String,
    has_police_imagery: bool,
    has_video: bool,
    has_images: bool,
    has_article: bool,
    protest_id: Option<u64>,
    human_token: String,
) -> Result<AsyncResult<String>, String> {
    info!("[IPC] submit_footage called: {}", url);

    let mut draft = SubmissionDraft::new(&url);
    draft.has_police_imagery = has_police_imagery;
    draft.has_video = has_video;
    draft.has_images = has_images;
    draft.has_article = has_article;
    draft.protest_id = protest_id;
    draft.human_token = Some(human_token);

    let envelope = match draft.seal() {
        Ok(envelope) => envelope,
        Err(e) => return Ok(AsyncResult::err(e.to_string())),
    };

    let api = Arc::clone(&state.api);
    let handle = tokio::spawn(async move { api.submit_ingest(&envelope).await });

    let receipt = match handle.await {
        Ok(Ok(receipt)) => receipt,
        Ok(Err(e)) => {
            error!("[IPC] submit_footage error: {}", e);
            return Ok(AsyncResult::err(e.to_string()));
        }
        Err(e) => {
            error!("[IPC] submit_footage task panic: {}", e);
            return Ok(AsyncResult::err(format!("Task failed: {}", e)));
        }
    };

    if let Some(db) = state.db.read().await.as_ref() {
        let record = SubmissionRecord {
            task_id: receipt.task_id.clone(),
            url,
            submitted_at: chrono::Utc::now().timestamp(),
            outcome: SubmissionOutcome::InFlight,
            media_id: None,
        };
        if let Err(e) = db.record_submission(&record) {
            warn!("Failed to persist submission record: {}", e);
        }
    }

    open_session(&app, &state, &receipt.task_id).await;
    Ok(AsyncResult::ok(receipt.task_id))
}

/// Create the machine, open the channel, and start the runner.
async fn open_session(app: &tauri::AppHandle, state: &State<'_, AppState>, task_id: &str) {
    let machine = Arc::new(Mutex::new(SessionMachine::new(task_id.to_string())));
    let channel = EventChannel::open(&state.config, task_id);
    let closer = channel.close_handle();

    let session = LiveSession {
        task_id: task_id.to_string(),
        machine: Arc::clone(&machine),
        closer,
    };

    // Replacing an existing session closes its channel first
    let mut slot = state.session.write().await;
    if let Some(previous) = slot.take() {
        previous.closer.close();
    }
    *slot = Some(session);
    drop(slot);

    tokio::spawn(run_session(app.clone(), machine, channel));
    info!("Live session opened for task {}", task_id);
}

/// Re-attach to an existing task's event stream (e.g. after app restart)
#[tauri::command]
async fn watch_task(
    app: tauri::AppHandle,
    state: State<'_, AppState>,
    task_id: String,
) -> Result<AsyncResult<bool>, String> {
    info!("[IPC] watch_task: {}", task_id);
    open_session(&app, &state, &task_id).await;
    Ok(AsyncResult::ok(true))
}

/// Current session snapshot - fast in-memory read
#[tauri::command]
async fn get_session_snapshot(
    state: State<'_, AppState>,
) -> Result<AsyncResult<SessionSnapshot>, String> {
    let session = state.session.read().await;
    match session.as_ref() {
        Some(session) => {
            let machine = session.machine.lock().await;
            Ok(AsyncResult::ok(machine.snapshot()))
        }
        None => Ok(AsyncResult::err("No active session".to_string())),
    }
}

/// Projected view model for the session screen
#[tauri::command]
async fn get_session_view(
    state: State<'_, AppState>,
) -> Result<AsyncResult<SessionView>, String> {
    let session = state.session.read().await;
    match session.as_ref() {
        Some(session) => {
            let machine = session.machine.lock().await;
            let view = present(&machine.snapshot(), &state.config.api_base);
            Ok(AsyncResult::ok(view))
        }
        None => Ok(AsyncResult::err("No active session".to_string())),
    }
}

/// Stop the analysis early; buffers freeze and the channel closes
#[tauri::command]
async fn finish_early(state: State<'_, AppState>) -> Result<AsyncResult<SessionSnapshot>, String> {
    info!("[IPC] finish_early called");

    let session = state.session.read().await;
    match session.as_ref() {
        Some(session) => {
            let now = chrono::Utc::now().timestamp();
            let snapshot = {
                let mut machine = session.machine.lock().await;
                machine.finish_early(now);
                machine.snapshot()
            };
            session.closer.close();
            settle_submission(&state, &session.task_id, &snapshot).await;
            Ok(AsyncResult::ok(snapshot))
        }
        None => Ok(AsyncResult::err("No active session".to_string())),
    }
}

/// Retry after a recoverable pause: re-enter Connecting on a fresh channel
#[tauri::command]
async fn retry_session(
    app: tauri::AppHandle,
    state: State<'_, AppState>,
) -> Result<AsyncResult<bool>, String> {
    info!("[IPC] retry_session called");

    let (machine, task_id, old_closer) = {
        let session = state.session.read().await;
        match session.as_ref() {
            Some(live) => (
                Arc::clone(&live.machine),
                live.task_id.clone(),
                live.closer.clone(),
            ),
            None => return Ok(AsyncResult::err("No active session".to_string())),
        }
    };

    {
        let mut machine = machine.lock().await;
        machine.retry();
    }
    old_closer.close();

    let channel = EventChannel::open(&state.config, &task_id);
    let closer = channel.close_handle();
    tokio::spawn(run_session(app.clone(), Arc::clone(&machine), channel));

    // Swap in the new close handle
    let mut slot = state.session.write().await;
    if let Some(live) = slot.as_mut() {
        live.closer = closer;
    }
    Ok(AsyncResult::ok(true))
}

// ============================================================================
// Tauri Commands - Candidate Decisions (Fast In-Memory)
// ============================================================================

#[tauri::command]
async fn decide_candidate(
    state: State<'_, AppState>,
    id: u64,
    approved: bool,
) -> Result<AsyncResult<bool>, String> {
    debug!("[IPC] decide_candidate: {} approved={}", id, approved);
    let now = chrono::Utc::now().timestamp();

    // During review the coordinator owns the buffer
    if let Some(coordinator) = state.coordinator.write().await.as_mut() {
        return Ok(AsyncResult::ok(coordinator.decide(id, approved, now)));
    }
    let session = state.session.read().await;
    match session.as_ref() {
        Some(session) => {
            let mut machine = session.machine.lock().await;
            Ok(AsyncResult::ok(machine.decide_candidate(id, approved, now)))
        }
        None => Ok(AsyncResult::err("No active session".to_string())),
    }
}

#[tauri::command]
async fn undo_candidate(state: State<'_, AppState>, id: u64) -> Result<AsyncResult<bool>, String> {
    debug!("[IPC] undo_candidate: {}", id);

    if let Some(coordinator) = state.coordinator.write().await.as_mut() {
        return Ok(AsyncResult::ok(coordinator.undo(id)));
    }
    let session = state.session.read().await;
    match session.as_ref() {
        Some(session) => {
            let mut machine = session.machine.lock().await;
            Ok(AsyncResult::ok(machine.undo_candidate(id)))
        }
        None => Ok(AsyncResult::err("No active session".to_string())),
    }
}

#[tauri::command]
async fn edit_candidate(
    state: State<'_, AppState>,
    id: u64,
    edit: CandidateEdit,
) -> Result<AsyncResult<bool>, String> {
    debug!("[IPC] edit_candidate: {}", id);

    let session = state.session.read().await;
    match session.as_ref() {
        Some(session) => {
            let mut machine = session.machine.lock().await;
            Ok(AsyncResult::ok(machine.set_candidate_edit(id, edit)))
        }
        None => Ok(AsyncResult::err("No active session".to_string())),
    }
}

// ============================================================================
// Tauri Commands - Review & Merge (Non-Blocking)
// ============================================================================

/// Hand the finished session to the review phase and load suggestions
#[tauri::command]
async fn begin_review(
    state: State<'_, AppState>,
) -> Result<AsyncResult<Vec<MergeSuggestion>>, String> {
    info!("[IPC] begin_review called");

    let (media_id, buffer) = {
        let session = state.session.read().await;
        let Some(session) = session.as_ref() else {
            return Ok(AsyncResult::err("No active session".to_string()));
        };
        let mut machine = session.machine.lock().await;
        if !machine.status().is_terminal() {
            return Ok(AsyncResult::err("Session is still live".to_string()));
        }
        let Some(media_id) = machine.media_id() else {
            return Ok(AsyncResult::err("Session produced no media record".to_string()));
        };
        (media_id, machine.take_buffer())
    };

    let api = Arc::clone(&state.api);
    let handle =
        tokio::spawn(async move { api.merge_suggestions(media_id, MERGE_THRESHOLD).await });

    let suggestions = match handle.await {
        Ok(Ok(suggestions)) => suggestions,
        Ok(Err(e)) => {
            error!("[IPC] begin_review error: {}", e);
            // Review still opens; suggestions can be re-fetched later
            Vec::new()
        }
        Err(e) => {
            error!("[IPC] begin_review task panic: {}", e);
            Vec::new()
        }
    };

    let mut coordinator = MergeCoordinator::new(media_id, buffer);
    coordinator.load_suggestions(suggestions);
    let loaded = coordinator.suggestions().to_vec();
    *state.coordinator.write().await = Some(coordinator);

    Ok(AsyncResult::ok(loaded))
}

/// Re-fetch merge suggestions at a new display threshold. Slider input is
/// debounced; overlapping reloads resolve latest-wins.
#[tauri::command]
async fn reload_suggestions(
    state: State<'_, AppState>,
    threshold: f64,
) -> Result<AsyncResult<Vec<MergeSuggestion>>, String> {
    info!("[IPC] reload_suggestions at {:.2}", threshold);

    if !state.suggestion_debounce.settle().await {
        return Ok(AsyncResult::err("Superseded by newer input".to_string()));
    }

    let media_id = {
        let coordinator = state.coordinator.read().await;
        let Some(coordinator) = coordinator.as_ref() else {
            return Ok(AsyncResult::err("No review in progress".to_string()));
        };
        coordinator.media_id()
    };

    let ticket = state.suggestion_loads.begin();
    let api = Arc::clone(&state.api);
    let threshold = threshold.max(MERGE_THRESHOLD);
    let handle = tokio::spawn(async move { api.merge_suggestions(media_id, threshold).await });

    let suggestions = match handle.await {
        Ok(Ok(suggestions)) => suggestions,
        Ok(Err(e)) => {
            error!("[IPC] reload_suggestions error: {}", e);
            return Ok(AsyncResult::err(e.to_string()));
        }
        Err(e) => {
            error!("[IPC] reload_suggestions task panic: {}", e);
            return Ok(AsyncResult::err(e.to_string()));
        }
    };

    if !state.suggestion_loads.is_current(ticket) {
        return Ok(AsyncResult::err("Superseded by a newer reload".to_string()));
    }

    let mut coordinator = state.coordinator.write().await;
    let Some(coordinator) = coordinator.as_mut() else {
        return Ok(AsyncResult::err("No review in progress".to_string()));
    };
    coordinator.load_suggestions(suggestions);
    Ok(AsyncResult::ok(coordinator.suggestions().to_vec()))
}

/// Accept a server merge suggestion
#[tauri::command]
async fn accept_merge(
    state: State<'_, AppState>,
    officer_a_id: u64,
    officer_b_id: u64,
) -> Result<AsyncResult<MergedGroup>, String> {
    info!("[IPC] accept_merge: {} + {}", officer_a_id, officer_b_id);

    let (media_id, plan) = {
        let mut coordinator = state.coordinator.write().await;
        let Some(coordinator) = coordinator.as_mut() else {
            return Ok(AsyncResult::err("Review has not started".to_string()));
        };
        match coordinator.begin_accept(officer_a_id, officer_b_id) {
            Ok(plan) => (coordinator.media_id(), plan),
            Err(e) => return Ok(AsyncResult::err(e.to_string())),
        }
    };

    commit_merge(&state, media_id, plan).await
}

/// Merge two or more user-selected candidates
#[tauri::command]
async fn manual_merge(
    state: State<'_, AppState>,
    candidate_ids: Vec<u64>,
) -> Result<AsyncResult<MergedGroup>, String> {
    info!("[IPC] manual_merge: {:?}", candidate_ids);

    let (media_id, plan) = {
        let mut coordinator = state.coordinator.write().await;
        let Some(coordinator) = coordinator.as_mut() else {
            return Ok(AsyncResult::err("Review has not started".to_string()));
        };
        match coordinator.begin_manual(&candidate_ids) {
            Ok(plan) => (coordinator.media_id(), plan),
            Err(e) => return Ok(AsyncResult::err(e.to_string())),
        }
    };

    commit_merge(&state, media_id, plan).await
}

/// POST the planned merge; apply or roll back on the coordinator.
async fn commit_merge(
    state: &State<'_, AppState>,
    media_id: u64,
    plan: pac_core::review::MergePlan,
) -> Result<AsyncResult<MergedGroup>, String> {
    let api = Arc::clone(&state.api);
    let officer_ids = plan.officer_ids.clone();
    let confidence = plan.confidence;
    let auto_merged = plan.auto_merged;
    let handle = tokio::spawn(async move {
        api.merge_officers(media_id, &officer_ids, confidence, auto_merged)
            .await
    });

    let result = match handle.await {
        Ok(result) => result,
        Err(e) => {
            error!("[IPC] merge task panic: {}", e);
            if let Some(coordinator) = state.coordinator.write().await.as_mut() {
                coordinator.merge_failed();
            }
            return Ok(AsyncResult::err(format!("Task failed: {}", e)));
        }
    };

    let mut coordinator = state.coordinator.write().await;
    let Some(coordinator) = coordinator.as_mut() else {
        return Ok(AsyncResult::err("Review has not started".to_string()));
    };
    match result {
        Ok(receipt) => match coordinator.merge_succeeded(receipt.group_id) {
            Some(group) => Ok(AsyncResult::ok(group.clone())),
            None => Ok(AsyncResult::err("No merge was in flight".to_string())),
        },
        Err(e) => {
            error!("[IPC] merge rejected: {}", e);
            coordinator.merge_failed();
            Ok(AsyncResult::err(e.to_string()))
        }
    }
}

#[tauri::command]
async fn approve_all_above(
    state: State<'_, AppState>,
    threshold: f64,
) -> Result<AsyncResult<usize>, String> {
    info!("[IPC] approve_all_above: {}", threshold);
    let now = chrono::Utc::now().timestamp();
    let mut coordinator = state.coordinator.write().await;
    match coordinator.as_mut() {
        Some(coordinator) => Ok(AsyncResult::ok(coordinator.approve_all_above(threshold, now))),
        None => Ok(AsyncResult::err("Review has not started".to_string())),
    }
}

#[tauri::command]
async fn reject_all(state: State<'_, AppState>) -> Result<AsyncResult<usize>, String> {
    info!("[IPC] reject_all called");
    let now = chrono::Utc::now().timestamp();
    let mut coordinator = state.coordinator.write().await;
    match coordinator.as_mut() {
        Some(coordinator) => Ok(AsyncResult::ok(coordinator.reject_all(now))),
        None => Ok(AsyncResult::err("Review has not started".to_string())),
    }
}

/// Close the review phase and emit its product
#[tauri::command]
async fn finish_review(state: State<'_, AppState>) -> Result<AsyncResult<ReviewOutput>, String> {
    info!("[IPC] finish_review called");
    let coordinator = state.coordinator.read().await;
    match coordinator.as_ref() {
        Some(coordinator) => Ok(AsyncResult::ok(coordinator.finish())),
        None => Ok(AsyncResult::err("Review has not started".to_string())),
    }
}

// ============================================================================
// Tauri Commands - Per-Officer Editor (Fast In-Memory)
// ============================================================================

#[tauri::command]
async fn start_editor(
    state: State<'_, AppState>,
    officers: Vec<VerifiedOfficer>,
) -> Result<AsyncResult<usize>, String> {
    info!("[IPC] start_editor: {} officers", officers.len());
    let total = officers.len();
    *state.editor.write().await = Some(EditorSession::new(officers));
    Ok(AsyncResult::ok(total))
}

#[tauri::command]
async fn editor_step(
    state: State<'_, AppState>,
    forward: bool,
) -> Result<AsyncResult<(usize, usize)>, String> {
    let mut editor = state.editor.write().await;
    match editor.as_mut() {
        Some(editor) => {
            if forward {
                editor.next();
            } else {
                editor.previous();
            }
            Ok(AsyncResult::ok(editor.position()))
        }
        None => Ok(AsyncResult::err("Editor is not open".to_string())),
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum EditorField {
    Name(String),
    Badge(String),
    Force(Option<PoliceForce>),
    Rank(Option<OfficerRank>),
    Role(OfficerRole),
    Notes(String),
}

#[tauri::command]
async fn editor_set_field(
    state: State<'_, AppState>,
    field: EditorField,
) -> Result<AsyncResult<FieldPreview>, String> {
    let mut editor = state.editor.write().await;
    match editor.as_mut() {
        Some(editor) => {
            match field {
                EditorField::Name(name) => editor.set_name(&name),
                EditorField::Badge(badge) => editor.set_badge(&badge),
                EditorField::Force(force) => editor.set_force(force),
                EditorField::Rank(rank) => editor.set_rank(rank),
                EditorField::Role(role) => editor.toggle_role(role),
                EditorField::Notes(notes) => editor.set_notes(&notes),
            }
            Ok(AsyncResult::ok(editor.preview()))
        }
        None => Ok(AsyncResult::err("Editor is not open".to_string())),
    }
}

#[tauri::command]
async fn editor_preview(state: State<'_, AppState>) -> Result<AsyncResult<FieldPreview>, String> {
    let editor = state.editor.read().await;
    match editor.as_ref() {
        Some(editor) => Ok(AsyncResult::ok(editor.preview())),
        None => Ok(AsyncResult::err("Editor is not open".to_string())),
    }
}

/// Complete the walk; edits are only committed here
#[tauri::command]
async fn editor_finish(
    state: State<'_, AppState>,
) -> Result<AsyncResult<std::collections::HashMap<u64, OfficerEdits>>, String> {
    info!("[IPC] editor_finish called");
    let mut editor = state.editor.write().await;
    match editor.take() {
        Some(editor) => Ok(AsyncResult::ok(editor.finish())),
        None => Ok(AsyncResult::err("Editor is not open".to_string())),
    }
}

// ============================================================================
// Tauri Commands - Auth & Utility
// ============================================================================

/// Install tokens handed over from the web login flow
#[tauri::command]
async fn login(
    state: State<'_, AppState>,
    access_token: String,
    refresh_token: String,
    expires_at: i64,
    user: Option<UserRecord>,
) -> Result<AsyncResult<bool>, String> {
    info!("[IPC] login called");
    let auth = state.auth.read().await;
    match auth.as_ref() {
        Some(auth) => {
            let tokens = AuthTokens { access_token, refresh_token, expires_at };
            match auth.install(tokens, user) {
                Ok(()) => Ok(AsyncResult::ok(true)),
                Err(e) => Ok(AsyncResult::err(e.to_string())),
            }
        }
        None => Ok(AsyncResult::err("Auth store unavailable".to_string())),
    }
}

#[tauri::command]
async fn logout(state: State<'_, AppState>) -> Result<AsyncResult<bool>, String> {
    info!("[IPC] logout called");
    let auth = state.auth.read().await;
    match auth.as_ref() {
        Some(auth) => match auth.clear() {
            Ok(()) => Ok(AsyncResult::ok(true)),
            Err(e) => Ok(AsyncResult::err(e.to_string())),
        },
        None => Ok(AsyncResult::err("Auth store unavailable".to_string())),
    }
}

#[tauri::command]
async fn get_user(state: State<'_, AppState>) -> Result<AsyncResult<UserRecord>, String> {
    let auth = state.auth.read().await;
    match auth.as_ref().and_then(|a| a.user()) {
        Some(user) => Ok(AsyncResult::ok(user)),
        None => Ok(AsyncResult::err("Not logged in".to_string())),
    }
}

/// Resolve a stored media reference to a fetchable URL
#[tauri::command]
async fn resolve_media(
    state: State<'_, AppState>,
    path: String,
) -> Result<AsyncResult<String>, String> {
    Ok(AsyncResult::ok(resolve_media_url(&state.config.api_base, &path)))
}

#[tauri::command]
async fn get_client_config(state: State<'_, AppState>) -> Result<AsyncResult<ClientConfig>, String> {
    Ok(AsyncResult::ok((*state.config).clone()))
}

/// Forward webview console lines into the tracing log
#[tauri::command]
fn frontend_log(level: String, message: String) {
    match level.as_str() {
        "error" => error!("[UI] {}", message),
        "warn" => warn!("[UI] {}", message),
        "debug" => debug!("[UI] {}", message),
        _ => info!("[UI] {}", message),
    }
}

// ============================================================================
// Application Setup
// ============================================================================

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    // Load environment variables from .env file
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pac_desktop=debug".parse().unwrap())
                .add_directive("pac_core=debug".parse().unwrap()),
        )
        .init();

    info!("Starting PAC Client (Async-First)");

    let config = match ClientConfig::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Fatal: {}", e);
            std::process::exit(1);
        }
    };
    if config.dev_mode {
        info!("Running in dev mode against {}", config.api_base);
    }

    let api = match ApiClient::new(&config) {
        Ok(api) => Arc::new(api),
        Err(e) => {
            eprintln!("Fatal: could not build HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    // Local store and auth identity; the app runs without persistence if
    // the store cannot be opened
    let (db, auth) = match ClientDb::open(None) {
        Ok(db) => {
            info!("Client store initialized at: {}", db.path().display());
            let db = Arc::new(db);
            let auth = match AuthStore::open(Arc::clone(&api), Arc::clone(&db)) {
                Ok(auth) => Some(Arc::new(auth)),
                Err(e) => {
                    warn!("Failed to open auth store: {}", e);
                    None
                }
            };
            (Some(db), auth)
        }
        Err(e) => {
            warn!("Failed to init client store: {} - running without persistence", e);
            (None, None)
        }
    };

    let state = AppState {
        config,
        api,
        db: Arc::new(RwLock::new(db)),
        auth: Arc::new(RwLock::new(auth)),
        session: Arc::new(RwLock::new(None)),
        coordinator: Arc::new(RwLock::new(None)),
        editor: Arc::new(RwLock::new(None)),
        suggestion_debounce: Debouncer::new(DEBOUNCE),
        suggestion_loads: Arc::new(LoadGuard::new()),
    };

    tauri::Builder::default()
        .plugin(tauri_plugin_shell::init())
        .manage(state)
        .setup(|app| {
            // The token refresh loop needs the async runtime, which only
            // exists once the app is up
            let auth = app.state::<AppState>().auth.clone();
            tauri::async_runtime::spawn(async move {
                let auth = auth.read().await.clone();
                if let Some(auth) = auth {
                    pac_core::auth::run_refresh_loop(auth).await;
                }
            });
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            // Submission & live session (async spawned)
            submit_footage,
            watch_task,
            get_session_snapshot,
            get_session_view,
            finish_early,
            retry_session,
            // Candidate decisions (fast in-memory)
            decide_candidate,
            undo_candidate,
            edit_candidate,
            // Review & merge (async spawned)
            begin_review,
            reload_suggestions,
            accept_merge,
            manual_merge,
            approve_all_above,
            reject_all,
            finish_review,
            // Per-officer editor (fast in-memory)
            start_editor,
            editor_step,
            editor_set_field,
            editor_preview,
            editor_finish,
            // Auth & utility
            login,
            logout,
            get_user,
            resolve_media,
            get_client_config,
            frontend_log,
        ])
        .run(tauri::generate_context!())
        .expect("Error running PAC Client");
}
