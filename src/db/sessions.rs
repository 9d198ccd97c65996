use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    helpers::{
        parse_datetime, parse_optional_datetime, parse_session_type, parse_status, to_i64, to_u64,
    },
    Database,
};
use crate::models::{Session, SessionKind, SessionStatus, SessionType};

const SESSION_COLUMNS: &str = "id, user_id, session_type, status, started_at, stopped_at, \
     goal_secs, active_secs, paused_secs, pause_started_at, calories_burned, \
     fasting_window_hours, eating_window_hours, fasting_started_at, fasting_ended_at, \
     eating_started_at, eating_ended_at, created_at, updated_at";

fn window_hours(row: &Row, column: &str) -> Result<u32> {
    let value: Option<i64> = row.get(column)?;
    let value = value.ok_or_else(|| anyhow!("{column} is NULL for an IF session"))?;
    u32::try_from(value).map_err(|_| anyhow!("{column} out of range: {value}"))
}

fn row_to_session(row: &Row) -> Result<Session> {
    let session_type = parse_session_type(&row.get::<_, String>("session_type")?)?;

    let kind = match session_type {
        SessionType::Fasting => SessionKind::Fasting,
        SessionType::Walking => SessionKind::Walking {
            paused_secs: to_u64(row.get("paused_secs")?, "paused_secs")?,
            pause_started_at: parse_optional_datetime(
                row.get("pause_started_at")?,
                "pause_started_at",
            )?,
            calories_burned: row
                .get::<_, Option<i64>>("calories_burned")?
                .map(|v| u32::try_from(v).map_err(|_| anyhow!("calories_burned out of range")))
                .transpose()?,
        },
        SessionType::IntermittentFasting => SessionKind::IntermittentFasting {
            fasting_window_hours: window_hours(row, "fasting_window_hours")?,
            eating_window_hours: window_hours(row, "eating_window_hours")?,
            fasting_started_at: parse_optional_datetime(
                row.get("fasting_started_at")?,
                "fasting_started_at",
            )?,
            fasting_ended_at: parse_optional_datetime(
                row.get("fasting_ended_at")?,
                "fasting_ended_at",
            )?,
            eating_started_at: parse_optional_datetime(
                row.get("eating_started_at")?,
                "eating_started_at",
            )?,
            eating_ended_at: parse_optional_datetime(
                row.get("eating_ended_at")?,
                "eating_ended_at",
            )?,
        },
    };

    Ok(Session {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        kind,
        status: parse_status(&row.get::<_, String>("status")?)?,
        started_at: parse_datetime(&row.get::<_, String>("started_at")?, "started_at")?,
        stopped_at: parse_optional_datetime(row.get("stopped_at")?, "stopped_at")?,
        goal_secs: row
            .get::<_, Option<i64>>("goal_secs")?
            .map(|v| to_u64(v, "goal_secs"))
            .transpose()?,
        active_secs: to_u64(row.get("active_secs")?, "active_secs")?,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?, "created_at")?,
        updated_at: parse_datetime(&row.get::<_, String>("updated_at")?, "updated_at")?,
    })
}

impl Database {
    pub async fn insert_session(&self, session: &Session) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            let (paused_secs, pause_started_at, calories_burned) = match &record.kind {
                SessionKind::Walking {
                    paused_secs,
                    pause_started_at,
                    calories_burned,
                } => (
                    to_i64(*paused_secs)?,
                    Self::to_rfc3339_opt(*pause_started_at),
                    calories_burned.map(i64::from),
                ),
                _ => (0, None, None),
            };

            let (fasting_hours, eating_hours, f_start, f_end, e_start, e_end) = match &record.kind
            {
                SessionKind::IntermittentFasting {
                    fasting_window_hours,
                    eating_window_hours,
                    fasting_started_at,
                    fasting_ended_at,
                    eating_started_at,
                    eating_ended_at,
                } => (
                    Some(i64::from(*fasting_window_hours)),
                    Some(i64::from(*eating_window_hours)),
                    Self::to_rfc3339_opt(*fasting_started_at),
                    Self::to_rfc3339_opt(*fasting_ended_at),
                    Self::to_rfc3339_opt(*eating_started_at),
                    Self::to_rfc3339_opt(*eating_ended_at),
                ),
                _ => (None, None, None, None, None, None),
            };

            conn.execute(
                "INSERT INTO sessions (id, user_id, session_type, status, started_at, stopped_at,
                     goal_secs, active_secs, paused_secs, pause_started_at, calories_burned,
                     fasting_window_hours, eating_window_hours, fasting_started_at,
                     fasting_ended_at, eating_started_at, eating_ended_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
                params![
                    record.id,
                    record.user_id,
                    record.kind.session_type().as_str(),
                    record.status.as_str(),
                    record.started_at.to_rfc3339(),
                    Self::to_rfc3339_opt(record.stopped_at),
                    record.goal_secs.map(to_i64).transpose()?,
                    to_i64(record.active_secs)?,
                    paused_secs,
                    pause_started_at,
                    calories_burned,
                    fasting_hours,
                    eating_hours,
                    f_start,
                    f_end,
                    e_start,
                    e_end,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .context("failed to insert session")?;
            Ok(())
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"
            ))?;

            let mut rows = stmt.query(params![session_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_session(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// The single active-or-paused session for this user and kind, if any.
    pub async fn get_active_session(
        &self,
        user_id: &str,
        session_type: SessionType,
    ) -> Result<Option<Session>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE user_id = ?1 AND session_type = ?2 AND status IN ('Active', 'Paused')
                 ORDER BY started_at DESC
                 LIMIT 1"
            ))?;

            let mut rows = stmt.query(params![user_id, session_type.as_str()])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_session(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Cancels every lingering active or paused session of this kind, so a
    /// new start never leaves two live rows behind.
    pub async fn cancel_active_sessions(
        &self,
        user_id: &str,
        session_type: SessionType,
        at: DateTime<Utc>,
    ) -> Result<usize> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let affected = conn.execute(
                "UPDATE sessions
                 SET status = 'Cancelled', stopped_at = ?1, updated_at = ?1
                 WHERE user_id = ?2 AND session_type = ?3 AND status IN ('Active', 'Paused')",
                params![at.to_rfc3339(), user_id, session_type.as_str()],
            )?;
            Ok(affected)
        })
        .await
    }

    pub async fn update_session_progress(
        &self,
        session_id: &str,
        active_secs: u64,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE sessions SET active_secs = ?1, updated_at = ?2 WHERE id = ?3",
                params![to_i64(active_secs)?, updated_at.to_rfc3339(), session_id],
            )
            .context("failed to update session progress")?;
            Ok(())
        })
        .await
    }

    pub async fn mark_session_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        active_secs: u64,
        stopped_at: Option<DateTime<Utc>>,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE sessions
                 SET status = ?1, active_secs = ?2, stopped_at = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![
                    status.as_str(),
                    to_i64(active_secs)?,
                    Self::to_rfc3339_opt(stopped_at),
                    updated_at.to_rfc3339(),
                    session_id,
                ],
            )
            .context("failed to update session status")?;
            Ok(())
        })
        .await
    }

    pub async fn update_start_time(
        &self,
        session_id: &str,
        started_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let affected = conn.execute(
                "UPDATE sessions SET started_at = ?1, updated_at = ?2 WHERE id = ?3",
                params![started_at.to_rfc3339(), updated_at.to_rfc3339(), session_id],
            )?;
            if affected == 0 {
                return Err(anyhow!("session not found"));
            }
            Ok(())
        })
        .await
    }

    pub async fn set_walk_pause_state(
        &self,
        session_id: &str,
        status: SessionStatus,
        paused_secs: u64,
        pause_started_at: Option<DateTime<Utc>>,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE sessions
                 SET status = ?1, paused_secs = ?2, pause_started_at = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![
                    status.as_str(),
                    to_i64(paused_secs)?,
                    Self::to_rfc3339_opt(pause_started_at),
                    updated_at.to_rfc3339(),
                    session_id,
                ],
            )
            .context("failed to update walk pause state")?;
            Ok(())
        })
        .await
    }

    pub async fn complete_walk(
        &self,
        session_id: &str,
        active_secs: u64,
        paused_secs: u64,
        calories_burned: u32,
        stopped_at: DateTime<Utc>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE sessions
                 SET status = 'Completed', active_secs = ?1, paused_secs = ?2,
                     pause_started_at = NULL, calories_burned = ?3, stopped_at = ?4,
                     updated_at = ?4
                 WHERE id = ?5",
                params![
                    to_i64(active_secs)?,
                    to_i64(paused_secs)?,
                    i64::from(calories_burned),
                    stopped_at.to_rfc3339(),
                    session_id,
                ],
            )
            .context("failed to complete walk")?;
            Ok(())
        })
        .await
    }

    /// Closes the fasting window and opens the eating window in one update.
    pub async fn open_eating_window(&self, session_id: &str, at: DateTime<Utc>) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let affected = conn.execute(
                "UPDATE sessions
                 SET fasting_ended_at = ?1, eating_started_at = ?1, updated_at = ?1
                 WHERE id = ?2 AND session_type = 'IntermittentFasting'",
                params![at.to_rfc3339(), session_id],
            )?;
            if affected == 0 {
                return Err(anyhow!("IF session not found"));
            }
            Ok(())
        })
        .await
    }

    /// Closes the eating window and completes the IF day.
    pub async fn complete_if_day(
        &self,
        session_id: &str,
        active_secs: u64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let affected = conn.execute(
                "UPDATE sessions
                 SET eating_ended_at = ?1, status = 'Completed', active_secs = ?2,
                     stopped_at = ?1, updated_at = ?1
                 WHERE id = ?3 AND session_type = 'IntermittentFasting'",
                params![at.to_rfc3339(), to_i64(active_secs)?, session_id],
            )?;
            if affected == 0 {
                return Err(anyhow!("IF session not found"));
            }
            Ok(())
        })
        .await
    }

    /// Completed sessions only; cancelled sessions are discarded from history.
    pub async fn list_completed_sessions(
        &self,
        user_id: &str,
        session_type: SessionType,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Session>> {
        let user_id = user_id.to_string();
        let limit = limit as i64;
        let offset = offset as i64;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE user_id = ?1 AND session_type = ?2 AND status = 'Completed'
                 ORDER BY started_at DESC
                 LIMIT ?3 OFFSET ?4"
            ))?;

            let mut rows = stmt.query(params![user_id, session_type.as_str(), limit, offset])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            Ok(sessions)
        })
        .await
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            // Pause rows go with the session via ON DELETE CASCADE.
            conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
            Ok(())
        })
        .await
    }
}
