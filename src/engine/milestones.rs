//! Exactly-once detection of celebratory thresholds.
//!
//! The scheduler calls `observe` on every one-second tick, so the tracker
//! must stay cheap and idempotent: a threshold already reported for a scope
//! is never reported again, including across duplicate or out-of-order ticks
//! and across interleaved ticks from concurrent sessions.

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use super::Phase;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum Milestone {
    /// A whole hour of elapsed time was crossed.
    Hourly { hours: u64 },
    /// The goal duration for the current phase was reached.
    GoalReached,
}

#[derive(Debug, Default)]
struct ScopeState {
    notified_hours: HashSet<u64>,
    goal_notified: bool,
}

/// Tracks which milestones were already reported, per session phase.
///
/// Scope is (session id, phase): an IF day restarts its hour marks when the
/// eating window opens, while a resumed watch of the same phase re-reports
/// nothing. Scopes are independent, so concurrent sessions (a fast plus a
/// walk) never disturb each other's state.
#[derive(Debug, Default)]
pub struct MilestoneTracker {
    scopes: HashMap<(String, Phase), ScopeState>,
}

impl MilestoneTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the goal milestone delivered for this scope; true when it was
    /// not already.
    pub fn note_goal(&mut self, session_id: &str, phase: Phase) -> bool {
        let state = self
            .scopes
            .entry((session_id.to_string(), phase))
            .or_default();
        if state.goal_notified {
            false
        } else {
            state.goal_notified = true;
            true
        }
    }

    /// Reports newly crossed milestones for the given elapsed time.
    ///
    /// At most one hourly milestone (the current hour mark) plus one goal
    /// milestone is returned per call; hour marks skipped while the process
    /// was suspended are not back-filled.
    pub fn observe(
        &mut self,
        session_id: &str,
        phase: Phase,
        elapsed_secs: u64,
        goal_secs: Option<u64>,
    ) -> Vec<Milestone> {
        let state = self
            .scopes
            .entry((session_id.to_string(), phase))
            .or_default();

        let mut events = Vec::new();

        let hour_mark = elapsed_secs / 3600;
        if hour_mark >= 1 && state.notified_hours.insert(hour_mark) {
            events.push(Milestone::Hourly { hours: hour_mark });
        }

        if let Some(goal) = goal_secs {
            if elapsed_secs >= goal && !state.goal_notified {
                state.goal_notified = true;
                events.push(Milestone::GoalReached);
            }
        }

        events
    }
}
