//! Session lifecycle operations.
//!
//! `SessionTracker` is the single control surface over the store and the
//! scheduler: it starts, pauses, finishes, and cancels sessions, and emits
//! `TimerEvent`s for the UI layer. The store remains the source of truth;
//! `resync` reloads it after the app was backgrounded or restarted.

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    clock::{Clock, SystemClock},
    db::Database,
    engine::{self, DisplayState, Phase},
    models::{Pause, Session, SessionInfo, SessionKind, SessionStatus, SessionType},
};

use super::{scheduler::Scheduler, TimerEvent};

/// Placeholder burn rate for walks; a real estimate would factor in weight
/// and pace.
const CALORIES_PER_ACTIVE_MINUTE: f64 = 3.5;

pub(crate) fn estimate_walk_calories(active_secs: u64) -> u32 {
    (active_secs as f64 / 60.0 * CALORIES_PER_ACTIVE_MINUTE).round() as u32
}

#[derive(Clone)]
pub struct SessionTracker {
    db: Database,
    clock: Arc<dyn Clock>,
    scheduler: Scheduler,
    events: mpsc::UnboundedSender<TimerEvent>,
}

impl SessionTracker {
    pub fn new(db: Database) -> (Self, mpsc::UnboundedReceiver<TimerEvent>) {
        Self::with_clock(db, Arc::new(SystemClock))
    }

    pub fn with_clock(
        db: Database,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::UnboundedReceiver<TimerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(db.clone(), clock.clone(), events_tx.clone());
        (
            Self {
                db,
                clock,
                scheduler,
                events: events_tx,
            },
            events_rx,
        )
    }

    // --- extended fasting ---

    /// Starts a fast, optionally backdated. Any lingering active fast is
    /// cancelled first so at most one live row exists per user.
    pub async fn start_fast(
        &self,
        user_id: &str,
        goal_secs: Option<u64>,
        start_at: Option<DateTime<Utc>>,
    ) -> Result<Session> {
        if goal_secs == Some(0) {
            bail!("goal_secs must be greater than zero when set");
        }

        let now = self.clock.now();
        let cancelled = self
            .db
            .cancel_active_sessions(user_id, SessionType::Fasting, now)
            .await?;
        if cancelled > 0 {
            warn!("cancelled {cancelled} lingering fasting session(s) for user {user_id}");
        }

        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            kind: SessionKind::Fasting,
            status: SessionStatus::Active,
            started_at: start_at.unwrap_or(now),
            stopped_at: None,
            goal_secs,
            active_secs: 0,
            created_at: now,
            updated_at: now,
        };

        self.db.insert_session(&session).await?;
        self.scheduler.watch(session.clone()).await;
        self.emit_state_changed(SessionType::Fasting, Some(session.clone().into()));
        info!("started fasting session {} for user {user_id}", session.id);

        Ok(session)
    }

    /// Explicit finish; records the actual elapsed duration, uncapped.
    pub async fn finish_fast(&self, user_id: &str) -> Result<SessionInfo> {
        let session = self
            .require_active(user_id, SessionType::Fasting)
            .await?;

        self.scheduler.stop(SessionType::Fasting).await;

        let now = self.clock.now();
        let display = engine::compute(&session, now)?;
        self.db
            .mark_session_status(
                &session.id,
                SessionStatus::Completed,
                display.elapsed_secs,
                Some(now),
                now,
            )
            .await?;

        let info = self.completed_info(session, display.elapsed_secs, now);
        let _ = self.events.send(TimerEvent::Completed {
            session: info.clone(),
        });
        self.emit_state_changed(SessionType::Fasting, None);
        Ok(info)
    }

    /// Cancelled fasts are discarded from history.
    pub async fn cancel_fast(&self, user_id: &str) -> Result<()> {
        let session = self
            .require_active(user_id, SessionType::Fasting)
            .await?;

        self.scheduler.stop(SessionType::Fasting).await;

        let now = self.clock.now();
        self.db
            .mark_session_status(
                &session.id,
                SessionStatus::Cancelled,
                session.active_secs,
                Some(now),
                now,
            )
            .await?;
        self.emit_state_changed(SessionType::Fasting, None);
        Ok(())
    }

    /// Explicit "edit session time" action; restarts the scheduling run so
    /// goal completion is re-planned against the new start.
    pub async fn edit_start_time(
        &self,
        session_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<Session> {
        let session = self
            .db
            .get_session(session_id)
            .await?
            .ok_or_else(|| anyhow!("session {session_id} not found"))?;
        if session.status.is_terminal() {
            bail!("cannot edit a {} session", session.status);
        }
        // IF scheduling anchors on the window timestamps, not started_at, so
        // a start-time edit would silently change nothing.
        if matches!(session.kind, SessionKind::IntermittentFasting { .. }) {
            bail!("start time edits are not supported for intermittent fasting days");
        }

        let now = self.clock.now();
        self.db
            .update_start_time(session_id, started_at, now)
            .await?;
        let updated = self
            .db
            .get_session(session_id)
            .await?
            .ok_or_else(|| anyhow!("session {session_id} disappeared during edit"))?;

        let session_type = updated.kind.session_type();
        if updated.status == SessionStatus::Active {
            self.scheduler.watch(updated.clone()).await;
        }
        self.emit_state_changed(session_type, Some(updated.clone().into()));
        Ok(updated)
    }

    // --- walking ---

    pub async fn start_walk(&self, user_id: &str, goal_secs: Option<u64>) -> Result<Session> {
        if goal_secs == Some(0) {
            bail!("goal_secs must be greater than zero when set");
        }

        let now = self.clock.now();
        let cancelled = self
            .db
            .cancel_active_sessions(user_id, SessionType::Walking, now)
            .await?;
        if cancelled > 0 {
            warn!("cancelled {cancelled} lingering walking session(s) for user {user_id}");
        }

        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            kind: SessionKind::Walking {
                paused_secs: 0,
                pause_started_at: None,
                calories_burned: None,
            },
            status: SessionStatus::Active,
            started_at: now,
            stopped_at: None,
            goal_secs,
            active_secs: 0,
            created_at: now,
            updated_at: now,
        };

        self.db.insert_session(&session).await?;
        self.scheduler.watch(session.clone()).await;
        self.emit_state_changed(SessionType::Walking, Some(session.clone().into()));
        info!("started walking session {} for user {user_id}", session.id);

        Ok(session)
    }

    pub async fn pause_walk(&self, user_id: &str) -> Result<Session> {
        let session = self
            .require_active(user_id, SessionType::Walking)
            .await?;
        if session.status != SessionStatus::Active {
            bail!("walking session is not active");
        }
        let SessionKind::Walking { paused_secs, .. } = &session.kind else {
            bail!("session {} is not a walking session", session.id);
        };
        let paused_secs = *paused_secs;

        self.scheduler.stop(SessionType::Walking).await;

        let now = self.clock.now();
        self.db
            .insert_pause(&Pause {
                id: Uuid::new_v4().to_string(),
                session_id: session.id.clone(),
                pause_started_at: now,
                pause_ended_at: None,
                duration_secs: None,
            })
            .await?;
        self.db
            .set_walk_pause_state(&session.id, SessionStatus::Paused, paused_secs, Some(now), now)
            .await?;

        let updated = self.reload(&session.id).await?;
        self.emit_state_changed(SessionType::Walking, Some(updated.clone().into()));
        Ok(updated)
    }

    pub async fn resume_walk(&self, user_id: &str) -> Result<Session> {
        let session = self
            .require_active(user_id, SessionType::Walking)
            .await?;
        if session.status != SessionStatus::Paused {
            bail!("walking session is not paused");
        }
        let SessionKind::Walking { paused_secs, .. } = &session.kind else {
            bail!("session {} is not a walking session", session.id);
        };
        let paused_secs = *paused_secs;

        let now = self.clock.now();
        let closed_secs = self.db.finalize_open_pauses(&session.id, now).await?;
        self.db
            .set_walk_pause_state(
                &session.id,
                SessionStatus::Active,
                paused_secs.saturating_add(closed_secs),
                None,
                now,
            )
            .await?;

        let updated = self.reload(&session.id).await?;
        self.scheduler.watch(updated.clone()).await;
        self.emit_state_changed(SessionType::Walking, Some(updated.clone().into()));
        Ok(updated)
    }

    pub async fn finish_walk(&self, user_id: &str) -> Result<SessionInfo> {
        let session = self
            .require_active(user_id, SessionType::Walking)
            .await?;

        self.scheduler.stop(SessionType::Walking).await;

        let now = self.clock.now();
        let closed_secs = self.db.finalize_open_pauses(&session.id, now).await?;

        let SessionKind::Walking { paused_secs, .. } = &session.kind else {
            bail!("session {} is not a walking session", session.id);
        };
        let total_paused = paused_secs.saturating_add(closed_secs);

        // Recompute against the finalized pause total before closing out.
        let mut settled = session.clone();
        settled.status = SessionStatus::Active;
        settled.kind = SessionKind::Walking {
            paused_secs: total_paused,
            pause_started_at: None,
            calories_burned: None,
        };
        let display = engine::compute(&settled, now)?;
        let calories = estimate_walk_calories(display.elapsed_secs);

        self.db
            .complete_walk(&session.id, display.elapsed_secs, total_paused, calories, now)
            .await?;

        settled.kind = SessionKind::Walking {
            paused_secs: total_paused,
            pause_started_at: None,
            calories_burned: Some(calories),
        };
        let info = self.completed_info(settled, display.elapsed_secs, now);
        let _ = self.events.send(TimerEvent::Completed {
            session: info.clone(),
        });
        self.emit_state_changed(SessionType::Walking, None);
        Ok(info)
    }

    pub async fn cancel_walk(&self, user_id: &str) -> Result<()> {
        let session = self
            .require_active(user_id, SessionType::Walking)
            .await?;

        self.scheduler.stop(SessionType::Walking).await;

        let now = self.clock.now();
        self.db.finalize_open_pauses(&session.id, now).await?;
        self.db
            .mark_session_status(
                &session.id,
                SessionStatus::Cancelled,
                session.active_secs,
                Some(now),
                now,
            )
            .await?;
        self.emit_state_changed(SessionType::Walking, None);
        Ok(())
    }

    // --- intermittent fasting ---

    /// Opens a new IF day with its fasting window running. An active
    /// extended fast blocks this, as in a dedicated fasting UI both timers
    /// would fight over the same hours.
    pub async fn start_if_day(
        &self,
        user_id: &str,
        fasting_window_hours: u32,
        eating_window_hours: u32,
        start_at: Option<DateTime<Utc>>,
    ) -> Result<Session> {
        if fasting_window_hours == 0 || eating_window_hours == 0 {
            bail!("IF windows must be at least one hour");
        }
        if self
            .db
            .get_active_session(user_id, SessionType::Fasting)
            .await?
            .is_some()
        {
            bail!("an extended fasting session is active; finish it before starting an IF day");
        }

        let now = self.clock.now();
        let cancelled = self
            .db
            .cancel_active_sessions(user_id, SessionType::IntermittentFasting, now)
            .await?;
        if cancelled > 0 {
            warn!("cancelled {cancelled} lingering IF session(s) for user {user_id}");
        }

        let started_at = start_at.unwrap_or(now);
        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            kind: SessionKind::IntermittentFasting {
                fasting_window_hours,
                eating_window_hours,
                fasting_started_at: Some(started_at),
                fasting_ended_at: None,
                eating_started_at: None,
                eating_ended_at: None,
            },
            status: SessionStatus::Active,
            started_at,
            stopped_at: None,
            goal_secs: None,
            active_secs: 0,
            created_at: now,
            updated_at: now,
        };

        self.db.insert_session(&session).await?;
        self.scheduler.watch(session.clone()).await;
        self.emit_state_changed(
            SessionType::IntermittentFasting,
            Some(session.clone().into()),
        );
        info!(
            "started {fasting_window_hours}:{eating_window_hours} IF day {} for user {user_id}",
            session.id
        );

        Ok(session)
    }

    /// Explicitly closes the fasting window and opens the eating window.
    pub async fn end_fasting_window(&self, user_id: &str) -> Result<Session> {
        let session = self
            .require_active(user_id, SessionType::IntermittentFasting)
            .await?;
        if engine::phase(&session)? != Phase::Fasting {
            bail!("no open fasting window for session {}", session.id);
        }

        let now = self.clock.now();
        self.db.open_eating_window(&session.id, now).await?;
        let updated = self.reload(&session.id).await?;

        self.scheduler.watch(updated.clone()).await;
        self.emit_state_changed(
            SessionType::IntermittentFasting,
            Some(updated.clone().into()),
        );
        Ok(updated)
    }

    /// Explicitly closes the eating window, completing the IF day.
    pub async fn end_eating_window(&self, user_id: &str) -> Result<SessionInfo> {
        let session = self
            .require_active(user_id, SessionType::IntermittentFasting)
            .await?;
        if engine::phase(&session)? != Phase::Eating {
            bail!("no open eating window for session {}", session.id);
        }

        self.scheduler.stop(SessionType::IntermittentFasting).await;

        let now = self.clock.now();
        let display = engine::compute(&session, now)?;
        self.db
            .complete_if_day(&session.id, display.elapsed_secs, now)
            .await?;

        let info = self.completed_info(session, display.elapsed_secs, now);
        let _ = self.events.send(TimerEvent::Completed {
            session: info.clone(),
        });
        self.emit_state_changed(SessionType::IntermittentFasting, None);
        Ok(info)
    }

    // --- queries and lifecycle ---

    pub async fn active_session(
        &self,
        user_id: &str,
        session_type: SessionType,
    ) -> Result<Option<Session>> {
        self.db.get_active_session(user_id, session_type).await
    }

    pub async fn history(
        &self,
        user_id: &str,
        session_type: SessionType,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Session>> {
        self.db
            .list_completed_sessions(user_id, session_type, limit, offset)
            .await
    }

    /// Current display state for the user's live session of this type.
    pub async fn current_display(
        &self,
        user_id: &str,
        session_type: SessionType,
    ) -> Result<Option<DisplayState>> {
        match self.db.get_active_session(user_id, session_type).await? {
            Some(session) => Ok(Some(engine::compute(&session, self.clock.now())?)),
            None => Ok(None),
        }
    }

    /// Reloads every live session from the store and restarts its run.
    ///
    /// Called on mount and whenever visibility is regained: in-memory timers
    /// that lived through a backgrounded period are not trusted.
    pub async fn resync(&self, user_id: &str) -> Result<Vec<Session>> {
        let mut live = Vec::new();
        for session_type in [
            SessionType::Fasting,
            SessionType::IntermittentFasting,
            SessionType::Walking,
        ] {
            match self.db.get_active_session(user_id, session_type).await? {
                Some(session) => {
                    if session.status == SessionStatus::Active {
                        self.scheduler.watch(session.clone()).await;
                    } else {
                        // Paused sessions keep no run; resume restarts one.
                        self.scheduler.stop(session_type).await;
                    }
                    self.emit_state_changed(session_type, Some(session.clone().into()));
                    live.push(session);
                }
                None => {
                    self.scheduler.stop(session_type).await;
                    self.emit_state_changed(session_type, None);
                }
            }
        }
        Ok(live)
    }

    /// Stops every scheduling run without touching stored sessions.
    pub async fn shutdown(&self) {
        for session_type in [
            SessionType::Fasting,
            SessionType::IntermittentFasting,
            SessionType::Walking,
        ] {
            self.scheduler.stop(session_type).await;
        }
    }

    fn emit_state_changed(&self, session_type: SessionType, session: Option<SessionInfo>) {
        let _ = self.events.send(TimerEvent::StateChanged {
            session_type,
            session,
        });
    }

    async fn require_active(
        &self,
        user_id: &str,
        session_type: SessionType,
    ) -> Result<Session> {
        self.db
            .get_active_session(user_id, session_type)
            .await?
            .ok_or_else(|| anyhow!("no active {session_type} session for user {user_id}"))
    }

    async fn reload(&self, session_id: &str) -> Result<Session> {
        self.db
            .get_session(session_id)
            .await?
            .ok_or_else(|| anyhow!("session {session_id} disappeared"))
    }

    fn completed_info(
        &self,
        mut session: Session,
        active_secs: u64,
        now: DateTime<Utc>,
    ) -> SessionInfo {
        session.status = SessionStatus::Completed;
        session.active_secs = active_secs;
        session.stopped_at = Some(now);
        session.into()
    }
}
