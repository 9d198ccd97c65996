use serde::Serialize;

use crate::engine::{DisplayState, Milestone};
use crate::models::{SessionInfo, SessionType};

/// Intents raised toward the UI layer. Consumers receive these from the
/// channel handed out by `SessionTracker::new`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "event")]
pub enum TimerEvent {
    /// Fresh display state, once per second while a session is watched.
    Tick {
        session_id: String,
        display: DisplayState,
    },
    /// A celebratory threshold was crossed for the first time.
    Milestone {
        session_id: String,
        milestone: Milestone,
    },
    /// A session reached terminal `Completed` state (goal or explicit finish).
    Completed { session: SessionInfo },
    /// The tracked slot for a session type changed (start, pause, cancel, ...).
    StateChanged {
        session_type: SessionType,
        session: Option<SessionInfo>,
    },
}
