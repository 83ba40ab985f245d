//! ============================================================================
//! PAC-CORE: Live Analysis Session Client
//! ============================================================================
//! This crate handles all client-side logic for the accountability platform:
//! - Task-scoped websocket event channel with reconnect/backoff
//! - Session state machine, stage classifier, and candidate buffer
//! - Post-session review, merge coordination, and per-officer editing
//! - HTTP adapter with CSRF handling and typed errors
//! - Local redb store for auth identity and submission history
//! ============================================================================

pub mod auth;
pub mod buffer;
pub mod channel;
pub mod config;
pub mod editor;
pub mod error;
pub mod events;
pub mod net;
pub mod presenter;
pub mod review;
pub mod session;
pub mod stage;
pub mod store;
pub mod submit;
pub mod types;

// Re-export main types for convenience
pub use types::*;
pub use channel::{ChannelSignal, EventChannel};
pub use config::ClientConfig;
pub use error::{ClientError, SurfacedError};
pub use events::TaskEvent;
pub use net::ApiClient;
pub use session::{SessionMachine, SessionSnapshot, SessionStatus};
pub use store::ClientDb;
