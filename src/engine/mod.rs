//! Pure display-state math for sessions.
//!
//! `compute` turns a session plus a wall-clock reading into the state a
//! display needs: elapsed seconds, remaining seconds, percent complete, and
//! the current phase. It performs no I/O and holds no state; calling it twice
//! with identical inputs yields identical output.

mod milestones;

pub use milestones::{Milestone, MilestoneTracker};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::models::{Session, SessionKind, SessionStatus};

#[derive(Debug, Error, PartialEq)]
pub enum EngineError {
    #[error("session {id} is {status}; display math applies only to active or paused sessions")]
    TerminalSession { id: String, status: SessionStatus },
    #[error("intermittent fasting session {id} has no open window")]
    NoOpenWindow { id: String },
}

/// Which stretch of a session the elapsed time refers to.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Fasting,
    Eating,
    Walking,
}

/// Derived display state. Count-up versus count-down is a caller-side
/// preference; both elapsed and remaining are always provided.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DisplayState {
    pub elapsed_secs: u64,
    /// `None` for open-ended sessions without a goal.
    pub remaining_secs: Option<u64>,
    /// Capped at 100. `None` without a goal.
    pub progress_percent: Option<f64>,
    pub phase: Phase,
}

/// Start of the currently-running stretch plus the goal that applies to it.
///
/// For single-window sessions this is the session start; for IF days it is
/// the open window's start. Errors on terminal sessions and on IF sessions
/// where no window is open.
fn phase_anchor(session: &Session) -> Result<(Phase, DateTime<Utc>, Option<u64>), EngineError> {
    if session.status.is_terminal() {
        return Err(EngineError::TerminalSession {
            id: session.id.clone(),
            status: session.status,
        });
    }

    match &session.kind {
        SessionKind::Fasting => Ok((Phase::Fasting, session.started_at, session.goal_secs)),
        SessionKind::Walking { .. } => Ok((Phase::Walking, session.started_at, session.goal_secs)),
        SessionKind::IntermittentFasting {
            fasting_window_hours,
            eating_window_hours,
            fasting_started_at,
            fasting_ended_at,
            eating_started_at,
            eating_ended_at,
        } => match (fasting_started_at, fasting_ended_at, eating_started_at, eating_ended_at) {
            (Some(start), None, _, _) => Ok((
                Phase::Fasting,
                *start,
                Some(u64::from(*fasting_window_hours) * 3600),
            )),
            (_, _, Some(start), None) => Ok((
                Phase::Eating,
                *start,
                Some(u64::from(*eating_window_hours) * 3600),
            )),
            _ => Err(EngineError::NoOpenWindow {
                id: session.id.clone(),
            }),
        },
    }
}

/// Whole seconds between two instants, clamped to zero. Clock skew (a `now`
/// before the anchor) never yields negative elapsed time.
fn secs_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    to.signed_duration_since(from).num_seconds().max(0) as u64
}

pub fn compute(session: &Session, now: DateTime<Utc>) -> Result<DisplayState, EngineError> {
    let (phase, anchor, goal_secs) = phase_anchor(session)?;

    let wall_secs = secs_between(anchor, now);
    let elapsed_secs = match &session.kind {
        SessionKind::Walking {
            paused_secs,
            pause_started_at,
            ..
        } => {
            let open_pause = pause_started_at
                .map(|started| secs_between(started, now))
                .unwrap_or(0);
            wall_secs.saturating_sub(paused_secs.saturating_add(open_pause))
        }
        _ => wall_secs,
    };

    let remaining_secs = goal_secs.map(|goal| goal.saturating_sub(elapsed_secs));
    let progress_percent = goal_secs.map(|goal| {
        if goal == 0 {
            100.0
        } else {
            (elapsed_secs as f64 / goal as f64 * 100.0).min(100.0)
        }
    });

    Ok(DisplayState {
        elapsed_secs,
        remaining_secs,
        progress_percent,
        phase,
    })
}

/// The instant the current phase's goal is reached, if it has one.
pub fn goal_end(session: &Session) -> Result<Option<DateTime<Utc>>, EngineError> {
    let (_, anchor, goal_secs) = phase_anchor(session)?;
    Ok(goal_secs.map(|goal| anchor + Duration::seconds(goal as i64)))
}

/// Goal duration applying to the session's current phase.
pub fn effective_goal(session: &Session) -> Result<Option<u64>, EngineError> {
    phase_anchor(session).map(|(_, _, goal)| goal)
}

/// Current phase without the rest of the display math.
pub fn phase(session: &Session) -> Result<Phase, EngineError> {
    phase_anchor(session).map(|(phase, _, _)| phase)
}
