//! End-to-end flows through the tracker, scheduler, and in-memory store.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, TimeZone, Utc};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

use fastwell::{
    Database, ManualClock, Milestone, Phase, SessionKind, SessionStatus, SessionTracker,
    SessionType, TimerEvent,
};

const USER: &str = "user-1";

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn tracker() -> (SessionTracker, UnboundedReceiver<TimerEvent>) {
    init_logging();
    let db = Database::open_in_memory().expect("in-memory database");
    SessionTracker::new(db)
}

fn tracker_at(
    start: chrono::DateTime<Utc>,
) -> (SessionTracker, UnboundedReceiver<TimerEvent>, ManualClock) {
    init_logging();
    let db = Database::open_in_memory().expect("in-memory database");
    let clock = ManualClock::new(start);
    let (tracker, events) = SessionTracker::with_clock(db, Arc::new(clock.clone()));
    (tracker, events, clock)
}

fn t0() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()
}

/// Drains events for `window`, returning everything received.
async fn drain_for(events: &mut UnboundedReceiver<TimerEvent>, window: StdDuration) -> Vec<TimerEvent> {
    let mut collected = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match timeout(remaining, events.recv()).await {
            Ok(Some(event)) => collected.push(event),
            _ => break,
        }
    }
    collected
}

fn completed_count(events: &[TimerEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, TimerEvent::Completed { .. }))
        .count()
}

fn goal_reached_count(events: &[TimerEvent]) -> usize {
    events
        .iter()
        .filter(|event| {
            matches!(
                event,
                TimerEvent::Milestone {
                    milestone: Milestone::GoalReached,
                    ..
                }
            )
        })
        .count()
}

#[tokio::test]
async fn goal_completion_fires_exactly_once() {
    let (tracker, mut events) = tracker();

    let session = tracker.start_fast(USER, Some(1), None).await.unwrap();

    // Deferred completion and the next tick both observe the crossed goal;
    // only one may win.
    let collected = drain_for(&mut events, StdDuration::from_secs(3)).await;
    assert_eq!(completed_count(&collected), 1);
    // Whichever of the ticker and the deferred task wins, the goal milestone
    // is delivered once.
    assert_eq!(goal_reached_count(&collected), 1);

    let stored = tracker
        .active_session(USER, SessionType::Fasting)
        .await
        .unwrap();
    assert!(stored.is_none(), "completed session must not stay active");

    let history = tracker
        .history(USER, SessionType::Fasting, 10, 0)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, session.id);
    assert_eq!(history[0].status, SessionStatus::Completed);
}

#[tokio::test]
async fn retroactive_start_past_goal_completes_immediately() {
    let (tracker, mut events) = tracker();

    let start = Utc::now() - Duration::hours(5);
    tracker
        .start_fast(USER, Some(4 * 3600), Some(start))
        .await
        .unwrap();

    let collected = drain_for(&mut events, StdDuration::from_secs(1)).await;
    assert_eq!(completed_count(&collected), 1, "completion must not wait for the goal timer");
    assert_eq!(goal_reached_count(&collected), 1);

    let completed = collected
        .iter()
        .find_map(|event| match event {
            TimerEvent::Completed { session } => Some(session.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(completed.status, SessionStatus::Completed);
    // Automatic completion caps the recorded duration at the goal.
    assert_eq!(completed.active_secs, 4 * 3600);
}

#[tokio::test]
async fn superseded_run_never_completes_the_old_session() {
    let (tracker, mut events) = tracker();

    let a = tracker.start_fast(USER, Some(2), None).await.unwrap();
    tracker.cancel_fast(USER).await.unwrap();
    let b = tracker.start_fast(USER, Some(30), None).await.unwrap();

    let collected = drain_for(&mut events, StdDuration::from_secs(3)).await;
    assert_eq!(
        completed_count(&collected),
        0,
        "neither the cancelled fast nor the fresh one may complete"
    );

    let active = tracker
        .active_session(USER, SessionType::Fasting)
        .await
        .unwrap()
        .expect("session B stays active");
    assert_eq!(active.id, b.id);

    let history = tracker
        .history(USER, SessionType::Fasting, 10, 0)
        .await
        .unwrap();
    assert!(
        history.iter().all(|s| s.id != a.id),
        "cancelled sessions are discarded from history"
    );
}

#[tokio::test]
async fn starting_a_new_fast_cancels_the_lingering_one() {
    let (tracker, _events) = tracker();

    let first = tracker.start_fast(USER, Some(3600), None).await.unwrap();
    let second = tracker.start_fast(USER, Some(3600), None).await.unwrap();

    let active = tracker
        .active_session(USER, SessionType::Fasting)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.id, second.id);
    assert_ne!(first.id, second.id);
}

#[tokio::test]
async fn walking_pause_accounting() {
    let (tracker, _events, clock) = tracker_at(t0());

    tracker.start_walk(USER, None).await.unwrap();

    clock.advance(Duration::seconds(300));
    tracker.pause_walk(USER).await.unwrap();

    clock.advance(Duration::seconds(200));
    let resumed = tracker.resume_walk(USER).await.unwrap();
    assert_eq!(resumed.status, SessionStatus::Active);

    clock.advance(Duration::seconds(300));
    let info = tracker.finish_walk(USER).await.unwrap();

    // 800s of wall clock minus 200s paused.
    assert_eq!(info.active_secs, 600);
    assert_eq!(info.calories_burned, Some(35));
    assert_eq!(info.status, SessionStatus::Completed);
}

#[tokio::test]
async fn paused_walk_display_is_frozen() {
    let (tracker, _events, clock) = tracker_at(t0());

    tracker.start_walk(USER, None).await.unwrap();
    clock.advance(Duration::seconds(120));
    tracker.pause_walk(USER).await.unwrap();
    clock.advance(Duration::seconds(999));

    let display = tracker
        .current_display(USER, SessionType::Walking)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(display.elapsed_secs, 120);
    assert_eq!(display.phase, Phase::Walking);
}

#[tokio::test]
async fn if_day_explicit_window_flow() {
    let (tracker, _events, clock) = tracker_at(t0());

    let session = tracker.start_if_day(USER, 16, 8, None).await.unwrap();
    let display = tracker
        .current_display(USER, SessionType::IntermittentFasting)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(display.phase, Phase::Fasting);

    // End both windows a little early so only the explicit actions drive
    // the transitions.
    clock.advance(Duration::hours(15));
    let updated = tracker.end_fasting_window(USER).await.unwrap();
    assert_eq!(updated.id, session.id);
    let display = tracker
        .current_display(USER, SessionType::IntermittentFasting)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(display.phase, Phase::Eating);
    assert_eq!(display.elapsed_secs, 0);

    clock.advance(Duration::hours(7));
    let info = tracker.end_eating_window(USER).await.unwrap();
    assert_eq!(info.status, SessionStatus::Completed);
    assert_eq!(info.active_secs, 7 * 3600);

    let history = tracker
        .history(USER, SessionType::IntermittentFasting, 10, 0)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn if_fasting_window_auto_transitions_to_eating() {
    let (tracker, _events) = tracker();

    // Backdated past the 16h fasting window: the eating window must open on
    // the next scheduling pass without waiting.
    let start = Utc::now() - Duration::hours(16) - Duration::seconds(5);
    tracker
        .start_if_day(USER, 16, 8, Some(start))
        .await
        .unwrap();

    // Poll rather than sleep once; a loaded test host can delay the pass.
    let deadline = tokio::time::Instant::now() + StdDuration::from_secs(5);
    loop {
        let display = tracker
            .current_display(USER, SessionType::IntermittentFasting)
            .await
            .unwrap()
            .unwrap();
        if display.phase == Phase::Eating {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "fasting window never auto-transitioned to eating"
        );
        tokio::time::sleep(StdDuration::from_millis(100)).await;
    }
}

#[tokio::test]
async fn if_day_blocked_by_active_extended_fast() {
    let (tracker, _events) = tracker();

    tracker.start_fast(USER, Some(16 * 3600), None).await.unwrap();
    let err = tracker.start_if_day(USER, 16, 8, None).await.unwrap_err();
    assert!(err.to_string().contains("extended fasting session"));
}

#[tokio::test]
async fn edit_start_time_reschedules_completion() {
    let (tracker, mut events) = tracker();

    let session = tracker.start_fast(USER, Some(3600), None).await.unwrap();
    tracker
        .edit_start_time(&session.id, Utc::now() - Duration::hours(2))
        .await
        .unwrap();

    let collected = drain_for(&mut events, StdDuration::from_secs(1)).await;
    assert_eq!(completed_count(&collected), 1);
}

#[tokio::test]
async fn hourly_milestone_emitted_after_an_hour_elapsed() {
    let (tracker, mut events) = tracker();

    let start = Utc::now() - Duration::hours(1) - Duration::seconds(2);
    tracker
        .start_fast(USER, Some(4 * 3600), Some(start))
        .await
        .unwrap();

    let collected = drain_for(&mut events, StdDuration::from_secs(2)).await;
    let hourly: Vec<_> = collected
        .iter()
        .filter_map(|event| match event {
            TimerEvent::Milestone {
                milestone: Milestone::Hourly { hours },
                ..
            } => Some(*hours),
            _ => None,
        })
        .collect();
    assert_eq!(hourly, vec![1]);
}

#[tokio::test]
async fn concurrent_fast_and_walk_keep_independent_milestones() {
    let (tracker, mut events) = tracker();

    let start = Utc::now() - Duration::hours(1) - Duration::seconds(2);
    let fast = tracker
        .start_fast(USER, Some(4 * 3600), Some(start))
        .await
        .unwrap();
    let walk = tracker.start_walk(USER, None).await.unwrap();

    // Both tickers alternate; the fast's hour mark must still fire once.
    let collected = drain_for(&mut events, StdDuration::from_secs(4)).await;
    let fast_hours: Vec<_> = collected
        .iter()
        .filter_map(|event| match event {
            TimerEvent::Milestone {
                session_id,
                milestone: Milestone::Hourly { hours },
            } if *session_id == fast.id => Some(*hours),
            _ => None,
        })
        .collect();
    assert_eq!(fast_hours, vec![1]);
    assert_eq!(completed_count(&collected), 0);

    let active_fast = tracker
        .active_session(USER, SessionType::Fasting)
        .await
        .unwrap()
        .unwrap();
    let active_walk = tracker
        .active_session(USER, SessionType::Walking)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active_fast.id, fast.id);
    assert_eq!(active_walk.id, walk.id);
}

#[tokio::test]
async fn goal_driven_walk_completion_stores_calories() {
    let (tracker, mut events, clock) = tracker_at(t0());

    tracker.start_walk(USER, Some(300)).await.unwrap();
    clock.advance(Duration::seconds(600));

    let collected = drain_for(&mut events, StdDuration::from_secs(3)).await;
    assert_eq!(completed_count(&collected), 1);
    assert_eq!(goal_reached_count(&collected), 1);

    let completed = collected
        .iter()
        .find_map(|event| match event {
            TimerEvent::Completed { session } => Some(session.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(completed.active_secs, 300);
    // 300s active at 3.5 kcal/min.
    assert_eq!(completed.calories_burned, Some(18));

    let history = tracker
        .history(USER, SessionType::Walking, 10, 0)
        .await
        .unwrap();
    assert!(matches!(
        history[0].kind,
        SessionKind::Walking {
            calories_burned: Some(18),
            ..
        }
    ));
}

#[tokio::test]
async fn state_changes_are_broadcast_on_start_and_cancel() {
    let (tracker, mut events) = tracker();

    tracker.start_fast(USER, None, None).await.unwrap();
    tracker.cancel_fast(USER).await.unwrap();

    let collected = drain_for(&mut events, StdDuration::from_millis(200)).await;
    let fasting_states: Vec<bool> = collected
        .iter()
        .filter_map(|event| match event {
            TimerEvent::StateChanged {
                session_type: SessionType::Fasting,
                session,
            } => Some(session.is_some()),
            _ => None,
        })
        .collect();
    assert_eq!(fasting_states, vec![true, false]);
}

#[tokio::test]
async fn edit_start_time_rejects_if_days() {
    let (tracker, _events) = tracker();

    let session = tracker.start_if_day(USER, 16, 8, None).await.unwrap();
    let err = tracker
        .edit_start_time(&session.id, Utc::now() - Duration::hours(1))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("intermittent fasting"));

    // The open window is untouched.
    let display = tracker
        .current_display(USER, SessionType::IntermittentFasting)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(display.phase, Phase::Fasting);
}

#[tokio::test]
async fn resync_restores_the_stored_session() {
    init_logging();
    let db = Database::open_in_memory().expect("in-memory database");

    // First tracker instance starts a fast, then goes away (app closed).
    {
        let (tracker, _events) = SessionTracker::new(db.clone());
        tracker.start_fast(USER, None, None).await.unwrap();
        tracker.shutdown().await;
    }

    // A fresh instance trusts only the store.
    let (tracker, mut events) = SessionTracker::new(db);
    let live = tracker.resync(USER).await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].status, SessionStatus::Active);

    let collected = drain_for(&mut events, StdDuration::from_millis(1500)).await;
    assert!(
        collected
            .iter()
            .any(|event| matches!(event, TimerEvent::Tick { .. })),
        "resync must restart the one-second ticker"
    );
}

#[tokio::test]
async fn open_ended_fast_never_completes_on_its_own() {
    let (tracker, mut events) = tracker();

    tracker.start_fast(USER, None, None).await.unwrap();
    let collected = drain_for(&mut events, StdDuration::from_secs(2)).await;
    assert_eq!(completed_count(&collected), 0);

    let display = tracker
        .current_display(USER, SessionType::Fasting)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(display.remaining_secs, None);
    assert_eq!(display.progress_percent, None);
}
