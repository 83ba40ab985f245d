//! ============================================================================
//! Event Channel - Task-Scoped Streaming Subscription
//! ============================================================================
//! One long-lived websocket per analysis task. The channel owns the
//! transport loop (connect with timeout, join_task, read frames,
//! reconnect with backoff) and surfaces a lazy sequence of signals plus a
//! connection-state value. Replay after reconnect is the server's job;
//! the session machine is idempotent on candidate arrivals.
//! ============================================================================

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{backoff_delay, classify_transport_error, BackoffConfig, ClientError, T_CONNECT};
use crate::events::{JoinTask, TaskEvent};
use crate::types::ConnectionState;

/// Signals delivered to the session runner, in receipt order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelSignal {
    /// Handshake done and join_task sent (also after each reconnect)
    Open,
    /// One decoded server event
    Event(TaskEvent),
    /// A single connect attempt failed; the channel will back off and retry
    ConnectFailed { message: String },
    /// The open stream dropped; the channel will back off and retry
    Lost { reason: String },
    /// All reconnect attempts are spent; the channel has stopped
    Exhausted { message: String },
}

/// Handle to one task-scoped event stream.
pub struct EventChannel {
    signals: mpsc::Receiver<ChannelSignal>,
    state: watch::Receiver<ConnectionState>,
    shutdown: std::sync::Arc<watch::Sender<bool>>,
}

/// Detached close control for a channel owned by another task.
#[derive(Clone)]
pub struct CloseHandle {
    shutdown: std::sync::Arc<watch::Sender<bool>>,
}

impl CloseHandle {
    /// Idempotent.
    pub fn close(&self) {
        let _ = self.shutdown.send_replace(true);
    }
}

impl EventChannel {
    /// Open a channel for `task_id` with default backoff.
    pub fn open(config: &ClientConfig, task_id: &str) -> Self {
        Self::open_with_backoff(config, task_id, BackoffConfig::default())
    }

    /// Open with explicit backoff behavior (tests use jitter-free configs).
    pub fn open_with_backoff(
        config: &ClientConfig,
        task_id: &str,
        backoff: BackoffConfig,
    ) -> Self {
        let url = config.task_stream_url(task_id);
        let (signal_tx, signal_rx) = mpsc::channel(256);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task_id = task_id.to_string();
        tokio::spawn(run_channel(
            url,
            task_id,
            backoff,
            signal_tx,
            state_tx,
            shutdown_rx,
        ));

        Self {
            signals: signal_rx,
            state: state_rx,
            shutdown: std::sync::Arc::new(shutdown_tx),
        }
    }

    /// Close control usable after the channel moves into its runner task.
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            shutdown: self.shutdown.clone(),
        }
    }

    /// Next signal in receipt order; None once the channel has stopped.
    pub async fn next(&mut self) -> Option<ChannelSignal> {
        self.signals.recv().await
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Detach cleanly. Idempotent.
    pub fn close(&self) {
        let _ = self.shutdown.send_replace(true);
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Transport loop: connect, join, pump frames, reconnect with backoff.
async fn run_channel(
    url: String,
    task_id: String,
    backoff: BackoffConfig,
    signals: mpsc::Sender<ChannelSignal>,
    state: watch::Sender<ConnectionState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempts: u32 = 0;

    loop {
        if *shutdown.borrow() {
            let _ = state.send(ConnectionState::Closed("closed by client".into()));
            return;
        }

        let _ = state.send(if attempts == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        });

        let connect = timeout(T_CONNECT, tokio_tungstenite::connect_async(&url));
        let connect_result = tokio::select! {
            result = connect => result,
            _ = shutdown.changed() => {
                let _ = state.send(ConnectionState::Closed("closed by client".into()));
                return;
            }
        };

        let mut ws = match connect_result {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => {
                attempts += 1;
                let message = e.to_string();
                warn!(task = %task_id, attempt = attempts, "Connect failed: {}", message);
                if give_up(&signals, &state, attempts, &backoff, &message).await {
                    return;
                }
                let _ = signals
                    .send(ChannelSignal::ConnectFailed {
                        message: message.clone(),
                    })
                    .await;
                wait_backoff(attempts - 1, &backoff, &message, &mut shutdown).await;
                continue;
            }
            Err(_elapsed) => {
                attempts += 1;
                let message = format!("handshake timed out after {:?}", T_CONNECT);
                warn!(task = %task_id, attempt = attempts, "{}", message);
                if give_up(&signals, &state, attempts, &backoff, &message).await {
                    return;
                }
                let _ = signals
                    .send(ChannelSignal::ConnectFailed {
                        message: message.clone(),
                    })
                    .await;
                wait_backoff(attempts - 1, &backoff, &message, &mut shutdown).await;
                continue;
            }
        };

        // Re-join the task on every (re)connect
        let join = serde_json::to_string(&JoinTask::new(&task_id)).unwrap_or_default();
        if let Err(e) = ws.send(Message::Text(join.into())).await {
            attempts += 1;
            let message = format!("join_task send failed: {}", e);
            if give_up(&signals, &state, attempts, &backoff, &message).await {
                return;
            }
            let _ = signals
                .send(ChannelSignal::ConnectFailed {
                    message: message.clone(),
                })
                .await;
            wait_backoff(attempts - 1, &backoff, &message, &mut shutdown).await;
            continue;
        }

        info!(task = %task_id, "Event stream open");
        attempts = 0;
        let _ = state.send(ConnectionState::Open);
        let _ = signals.send(ChannelSignal::Open).await;

        // Pump frames until the stream drops or the client closes
        let reason = loop {
            tokio::select! {
                frame = ws.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        match TaskEvent::parse(&text) {
                            Ok(event) => {
                                if signals.send(ChannelSignal::Event(event)).await.is_err() {
                                    // Consumer is gone; stop quietly
                                    return;
                                }
                            }
                            Err(e) => {
                                debug!(task = %task_id, "Skipping undecodable frame: {}", e);
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = ws.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) => break "server closed the stream".to_string(),
                    Some(Ok(_)) => {} // binary/pong frames are ignored
                    Some(Err(e)) => break e.to_string(),
                    None => break "stream ended".to_string(),
                },
                _ = shutdown.changed() => {
                    let _ = ws.send(Message::Close(None)).await;
                    let _ = state.send(ConnectionState::Closed("closed by client".into()));
                    return;
                }
            }
        };

        warn!(task = %task_id, "Stream dropped: {}", reason);
        attempts += 1;
        if give_up(&signals, &state, attempts, &backoff, &reason).await {
            return;
        }
        let _ = signals
            .send(ChannelSignal::Lost {
                reason: reason.clone(),
            })
            .await;
        wait_backoff(attempts - 1, &backoff, &reason, &mut shutdown).await;
    }
}

/// On exhaustion: emit Exhausted, mark the state failed, stop the loop.
async fn give_up(
    signals: &mpsc::Sender<ChannelSignal>,
    state: &watch::Sender<ConnectionState>,
    attempts: u32,
    backoff: &BackoffConfig,
    message: &str,
) -> bool {
    if attempts < backoff.max_attempts {
        return false;
    }
    let _ = state.send(ConnectionState::Failed(message.to_string()));
    let _ = signals
        .send(ChannelSignal::Exhausted {
            message: message.to_string(),
        })
        .await;
    true
}

/// Sleep out the reconnect delay, waking early on shutdown.
async fn wait_backoff(
    attempt: u32,
    backoff: &BackoffConfig,
    message: &str,
    shutdown: &mut watch::Receiver<bool>,
) {
    let delay = reconnect_delay(attempt, backoff, message);
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = shutdown.changed() => {}
    }
}

/// A throttling server gets the fixed pause instead of exponential backoff.
fn reconnect_delay(attempt: u32, backoff: &BackoffConfig, message: &str) -> Duration {
    if matches!(
        classify_transport_error(message),
        ClientError::RateLimited(_)
    ) {
        rate_limit_pause()
    } else {
        backoff_delay(attempt, backoff)
    }
}

/// Suggested pause before reconnects when the server is throttling.
pub fn rate_limit_pause() -> Duration {
    Duration::from_secs(30)
}
