//! Tick and deferred-completion scheduling.
//!
//! One scheduling "run" exists per session type at a time. Every spawned
//! task carries the run id it was created under; a task whose run id no
//! longer matches the slot's current id is stale and must do nothing. Runs
//! are superseded by new sessions, phase transitions, pauses, and resyncs.

use std::{
    collections::HashMap, future::Future, pin::Pin, sync::Arc, time::Duration as StdDuration,
};

use anyhow::Result;
use log::{debug, error, warn};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time,
};

use crate::{
    clock::Clock,
    db::Database,
    engine::{self, Milestone, MilestoneTracker, Phase},
    models::{Session, SessionInfo, SessionKind, SessionStatus, SessionType},
};

use super::{controller::estimate_walk_calories, TimerEvent};

pub const TICK_INTERVAL: StdDuration = StdDuration::from_secs(1);

/// Ceiling for one-shot deferred completions. A goal further away than this
/// is detected by tick polling alone rather than one very long sleep.
pub const MAX_DEFERRED_SECS: i64 = 168 * 3600;

/// Progress snapshots are persisted every this many ticks.
const HEARTBEAT_EVERY_TICKS: u32 = 10;

/// Scheduling state for one session type's timer.
///
/// Owned behind the scheduler's mutex; `invalidate` bumps the run id so any
/// in-flight callback from the old run becomes a no-op, then aborts the
/// run's tasks.
#[derive(Debug, Default)]
pub struct TimerHandle {
    run_id: u64,
    ticker: Option<JoinHandle<()>>,
    deferred: Option<JoinHandle<()>>,
}

impl TimerHandle {
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn invalidate(&mut self) {
        self.run_id += 1;
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
        if let Some(handle) = self.deferred.take() {
            handle.abort();
        }
    }

    fn begin_run(&mut self) -> u64 {
        self.invalidate();
        self.run_id
    }
}

#[derive(Debug)]
enum CompletionOutcome {
    SessionCompleted,
    PhaseAdvanced,
    /// Run id no longer current; silent no-op.
    Stale,
    /// Session already terminated by another code path; silent no-op.
    RaceLost,
}

#[derive(Clone)]
pub(crate) struct Scheduler {
    db: Database,
    clock: Arc<dyn Clock>,
    events: mpsc::UnboundedSender<TimerEvent>,
    handles: Arc<Mutex<HashMap<SessionType, TimerHandle>>>,
    milestones: Arc<Mutex<MilestoneTracker>>,
}

impl Scheduler {
    pub fn new(
        db: Database,
        clock: Arc<dyn Clock>,
        events: mpsc::UnboundedSender<TimerEvent>,
    ) -> Self {
        Self {
            db,
            clock,
            events,
            handles: Arc::new(Mutex::new(HashMap::new())),
            milestones: Arc::new(Mutex::new(MilestoneTracker::new())),
        }
    }

    /// Starts a new run for the session, superseding any previous run of the
    /// same type. Spawns the one-second ticker and, when a goal lies within
    /// the deferral ceiling, a one-shot completion task. A goal already in
    /// the past completes on the next scheduling pass, never re-entrantly.
    ///
    /// Boxed: `try_complete` re-watches on IF phase transitions, so the
    /// future type must not contain itself.
    pub fn watch(&self, session: Session) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(self.watch_inner(session))
    }

    async fn watch_inner(&self, session: Session) {
        let session_type = session.kind.session_type();
        let now = self.clock.now();
        let goal_end = engine::goal_end(&session).ok().flatten();

        let mut handles = self.handles.lock().await;
        let handle = handles.entry(session_type).or_default();
        let run_id = handle.begin_run();

        handle.ticker = Some(tokio::spawn(
            self.clone().run_ticker(session.clone(), run_id),
        ));

        if let Some(goal_end) = goal_end {
            let delay = goal_end.signed_duration_since(now);
            if delay.num_seconds() > MAX_DEFERRED_SECS {
                debug!(
                    "goal for session {} is {}s away, beyond the deferral ceiling; \
                     relying on tick polling",
                    session.id,
                    delay.num_seconds()
                );
            } else {
                let sleep_for = delay.to_std().unwrap_or(StdDuration::ZERO);
                handle.deferred = Some(tokio::spawn(self.clone().run_deferred(
                    session.id.clone(),
                    session_type,
                    run_id,
                    sleep_for,
                )));
            }
        }
    }

    /// Synchronously invalidates the current run for this type; no callback
    /// from it may fire afterwards.
    pub async fn stop(&self, session_type: SessionType) {
        if let Some(handle) = self.handles.lock().await.get_mut(&session_type) {
            handle.invalidate();
        }
    }

    async fn run_is_stale(&self, session_type: SessionType, run_id: u64) -> bool {
        self.handles
            .lock()
            .await
            .get(&session_type)
            .map(|handle| handle.run_id != run_id)
            .unwrap_or(true)
    }

    async fn run_ticker(self, session: Session, run_id: u64) {
        let session_type = session.kind.session_type();
        let goal_secs = engine::effective_goal(&session).ok().flatten();
        let mut interval = time::interval(TICK_INTERVAL);
        let mut ticks: u32 = 0;

        loop {
            interval.tick().await;

            if self.run_is_stale(session_type, run_id).await {
                break;
            }

            let now = self.clock.now();
            let display = match engine::compute(&session, now) {
                Ok(display) => display,
                Err(err) => {
                    debug!("ticker for session {} stopping: {err}", session.id);
                    break;
                }
            };

            let _ = self.events.send(TimerEvent::Tick {
                session_id: session.id.clone(),
                display: display.clone(),
            });

            {
                let mut tracker = self.milestones.lock().await;
                for milestone in
                    tracker.observe(&session.id, display.phase, display.elapsed_secs, goal_secs)
                {
                    let _ = self.events.send(TimerEvent::Milestone {
                        session_id: session.id.clone(),
                        milestone,
                    });
                }
            }

            ticks = ticks.wrapping_add(1);
            if ticks % HEARTBEAT_EVERY_TICKS == 0 {
                if let Err(err) = self
                    .db
                    .update_session_progress(&session.id, display.elapsed_secs, now)
                    .await
                {
                    warn!("failed to persist progress for session {}: {err}", session.id);
                }
            }

            if goal_secs.is_some() && display.remaining_secs == Some(0) {
                match self.try_complete(&session.id, session_type, run_id).await {
                    Ok(outcome) => debug!(
                        "tick-driven completion for session {}: {outcome:?}",
                        session.id
                    ),
                    Err(err) => {
                        error!("tick-driven completion failed for session {}: {err}", session.id)
                    }
                }
                break;
            }
        }
    }

    async fn run_deferred(
        self,
        session_id: String,
        session_type: SessionType,
        run_id: u64,
        delay: StdDuration,
    ) {
        if !delay.is_zero() {
            time::sleep(delay).await;
        }

        match self.try_complete(&session_id, session_type, run_id).await {
            Ok(CompletionOutcome::Stale) => {
                debug!("deferred completion for session {session_id} is stale; ignoring")
            }
            Ok(CompletionOutcome::RaceLost) => {
                debug!("session {session_id} already terminated; deferred completion is a no-op")
            }
            Ok(_) => {}
            Err(err) => error!("deferred completion failed for session {session_id}: {err}"),
        }
    }

    /// Honors a completion intent exactly once. Re-validates both the run id
    /// and the stored session before mutating anything: the store is the
    /// source of truth, and another code path may have terminated the
    /// session in the meantime.
    async fn try_complete(
        &self,
        session_id: &str,
        session_type: SessionType,
        run_id: u64,
    ) -> Result<CompletionOutcome> {
        if self.run_is_stale(session_type, run_id).await {
            return Ok(CompletionOutcome::Stale);
        }

        let Some(current) = self.db.get_session(session_id).await? else {
            return Ok(CompletionOutcome::RaceLost);
        };
        if current.status != SessionStatus::Active {
            return Ok(CompletionOutcome::RaceLost);
        }

        let now = self.clock.now();

        match &current.kind {
            // Fasting window done: swing over to the eating window and keep
            // the session alive under a fresh run.
            SessionKind::IntermittentFasting {
                fasting_started_at: Some(_),
                fasting_ended_at: None,
                ..
            } => {
                self.emit_goal_reached(session_id, Phase::Fasting).await;
                self.db.open_eating_window(session_id, now).await?;
                let Some(updated) = self.db.get_session(session_id).await? else {
                    return Ok(CompletionOutcome::RaceLost);
                };
                let _ = self.events.send(TimerEvent::StateChanged {
                    session_type,
                    session: Some(updated.clone().into()),
                });
                self.watch(updated).await;
                Ok(CompletionOutcome::PhaseAdvanced)
            }
            // Eating window done: the IF day is complete.
            SessionKind::IntermittentFasting { .. } => {
                let display = engine::compute(&current, now)?;
                self.db
                    .complete_if_day(session_id, display.elapsed_secs, now)
                    .await?;
                self.finish(current, display.elapsed_secs, now, session_type, display.phase)
                    .await;
                Ok(CompletionOutcome::SessionCompleted)
            }
            SessionKind::Fasting => {
                let display = engine::compute(&current, now)?;
                let goal_secs = engine::effective_goal(&current)?;
                let active_secs = goal_secs
                    .map(|goal| display.elapsed_secs.min(goal))
                    .unwrap_or(display.elapsed_secs);
                self.db
                    .mark_session_status(
                        session_id,
                        SessionStatus::Completed,
                        active_secs,
                        Some(now),
                        now,
                    )
                    .await?;
                self.finish(current, active_secs, now, session_type, display.phase)
                    .await;
                Ok(CompletionOutcome::SessionCompleted)
            }
            // Goal-driven walk completion records the same calorie estimate
            // an explicit finish would.
            SessionKind::Walking { paused_secs, .. } => {
                let paused_secs = *paused_secs;
                let display = engine::compute(&current, now)?;
                let goal_secs = engine::effective_goal(&current)?;
                let active_secs = goal_secs
                    .map(|goal| display.elapsed_secs.min(goal))
                    .unwrap_or(display.elapsed_secs);
                let calories = estimate_walk_calories(active_secs);
                self.db
                    .complete_walk(session_id, active_secs, paused_secs, calories, now)
                    .await?;

                let mut completed = current;
                completed.kind = SessionKind::Walking {
                    paused_secs,
                    pause_started_at: None,
                    calories_burned: Some(calories),
                };
                self.finish(completed, active_secs, now, session_type, display.phase)
                    .await;
                Ok(CompletionOutcome::SessionCompleted)
            }
        }
    }

    /// Emits `GoalReached` unless the ticker already delivered it for this
    /// phase. The deferred task can win the race before the ticker ever
    /// observes `elapsed >= goal`.
    async fn emit_goal_reached(&self, session_id: &str, phase: Phase) {
        let mut tracker = self.milestones.lock().await;
        if tracker.note_goal(session_id, phase) {
            let _ = self.events.send(TimerEvent::Milestone {
                session_id: session_id.to_string(),
                milestone: Milestone::GoalReached,
            });
        }
    }

    async fn finish(
        &self,
        mut session: Session,
        active_secs: u64,
        now: chrono::DateTime<chrono::Utc>,
        session_type: SessionType,
        phase: Phase,
    ) {
        self.emit_goal_reached(&session.id, phase).await;

        session.status = SessionStatus::Completed;
        session.active_secs = active_secs;
        session.stopped_at = Some(now);
        let info: SessionInfo = session.into();

        let _ = self.events.send(TimerEvent::Completed {
            session: info,
        });
        let _ = self.events.send(TimerEvent::StateChanged {
            session_type,
            session: None,
        });

        self.stop(session_type).await;
    }
}
