//! Session data models.
//!
//! A `Session` is one tracked activity instance: an extended fast, an
//! intermittent-fasting (IF) day, or a walk. Kind-specific fields live in the
//! `SessionKind` variants; shared lifecycle fields live on `Session` itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "Active",
            SessionStatus::Paused => "Paused",
            SessionStatus::Completed => "Completed",
            SessionStatus::Cancelled => "Cancelled",
        }
    }

    /// Completed and cancelled sessions are historical; no derived-time math
    /// applies to them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plain discriminant for store queries and scheduling slots.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SessionType {
    Fasting,
    IntermittentFasting,
    Walking,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Fasting => "Fasting",
            SessionType::IntermittentFasting => "IntermittentFasting",
            SessionType::Walking => "Walking",
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific session state.
///
/// An IF day runs two back-to-back windows; exactly one window is open at a
/// time while the session is active. A walk accumulates pause time that is
/// subtracted from wall-clock elapsed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum SessionKind {
    Fasting,
    IntermittentFasting {
        fasting_window_hours: u32,
        eating_window_hours: u32,
        fasting_started_at: Option<DateTime<Utc>>,
        fasting_ended_at: Option<DateTime<Utc>>,
        eating_started_at: Option<DateTime<Utc>>,
        eating_ended_at: Option<DateTime<Utc>>,
    },
    Walking {
        /// Total seconds spent in closed pauses.
        paused_secs: u64,
        /// Set while a pause is open; cleared on resume.
        pause_started_at: Option<DateTime<Utc>>,
        calories_burned: Option<u32>,
    },
}

impl SessionKind {
    pub fn session_type(&self) -> SessionType {
        match self {
            SessionKind::Fasting => SessionType::Fasting,
            SessionKind::IntermittentFasting { .. } => SessionType::IntermittentFasting,
            SessionKind::Walking { .. } => SessionType::Walking,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub kind: SessionKind,
    pub status: SessionStatus,
    /// May be backdated at creation (retroactive start); mutated afterwards
    /// only by an explicit edit.
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    /// Target duration for fasting and walking sessions. IF windows carry
    /// their goals as hours on the kind.
    pub goal_secs: Option<u64>,
    /// Progress snapshot written by the scheduler; elapsed time is always
    /// derived from `started_at`, never read back from this field.
    pub active_secs: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Flat session summary for history views and completion events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub user_id: String,
    pub session_type: SessionType,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub goal_secs: Option<u64>,
    pub active_secs: u64,
    pub calories_burned: Option<u32>,
}

impl From<Session> for SessionInfo {
    fn from(session: Session) -> Self {
        let calories_burned = match &session.kind {
            SessionKind::Walking {
                calories_burned, ..
            } => *calories_burned,
            _ => None,
        };
        Self {
            session_type: session.kind.session_type(),
            id: session.id,
            user_id: session.user_id,
            status: session.status,
            started_at: session.started_at,
            stopped_at: session.stopped_at,
            goal_secs: session.goal_secs,
            active_secs: session.active_secs,
            calories_burned,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IfPreset {
    pub name: &'static str,
    pub fasting_hours: u32,
    pub eating_hours: u32,
    pub description: &'static str,
}

/// Common IF presets, simplified to the core options.
pub const IF_PRESETS: [IfPreset; 2] = [
    IfPreset {
        name: "16:8",
        fasting_hours: 16,
        eating_hours: 8,
        description: "Fast for 16 hours, eat within 8 hours",
    },
    IfPreset {
        name: "OMAD",
        fasting_hours: 23,
        eating_hours: 1,
        description: "One Meal A Day - 23 hour fast",
    },
];
