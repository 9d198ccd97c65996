//! Headless timer core for a wellness tracking app.
//!
//! Tracks extended fasts, intermittent-fasting days, and walks. The pure
//! display math lives in [`engine`]; [`timer::SessionTracker`] drives it on a
//! one-second cadence, schedules exact-time goal completion, and persists
//! sessions through the SQLite-backed [`db::Database`]. UI, auth, and food
//! logging live outside this crate and consume [`timer::TimerEvent`]s.

pub mod clock;
pub mod db;
pub mod engine;
pub mod models;
pub mod timer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use db::Database;
pub use engine::{DisplayState, EngineError, Milestone, MilestoneTracker, Phase};
pub use models::{
    IfPreset, Pause, Session, SessionInfo, SessionKind, SessionStatus, SessionType, IF_PRESETS,
};
pub use timer::{SessionTracker, TimerEvent, TimerHandle};
