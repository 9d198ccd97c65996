use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::db::{
    helpers::{parse_datetime, to_i64},
    Database,
};
use crate::models::Pause;

impl Database {
    pub async fn insert_pause(&self, pause: &Pause) -> Result<()> {
        let record = pause.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO pauses (id, session_id, pause_started_at, pause_ended_at, duration_secs)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id,
                    record.session_id,
                    record.pause_started_at.to_rfc3339(),
                    Self::to_rfc3339_opt(record.pause_ended_at),
                    record.duration_secs.map(to_i64).transpose()?,
                ],
            )
            .context("failed to insert pause record")?;
            Ok(())
        })
        .await
    }

    pub async fn get_open_pause(&self, session_id: &str) -> Result<Option<Pause>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, pause_started_at
                 FROM pauses
                 WHERE session_id = ?1 AND pause_ended_at IS NULL
                 ORDER BY pause_started_at DESC
                 LIMIT 1",
            )?;

            let mut rows = stmt.query(params![session_id])?;
            if let Some(row) = rows.next()? {
                let pause = Pause {
                    id: row.get::<_, String>(0)?,
                    session_id: row.get::<_, String>(1)?,
                    pause_started_at: parse_datetime(
                        &row.get::<_, String>(2)?,
                        "pause_started_at",
                    )?,
                    pause_ended_at: None,
                    duration_secs: None,
                };
                Ok(Some(pause))
            } else {
                Ok(None)
            }
        })
        .await
    }

    /// Closes every open pause for the session and returns the total seconds
    /// just finalized.
    pub async fn finalize_open_pauses(
        &self,
        session_id: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<u64> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, pause_started_at FROM pauses
                 WHERE session_id = ?1 AND pause_ended_at IS NULL",
            )?;

            let mut rows = stmt.query(params![session_id.clone()])?;
            let mut total_secs: u64 = 0;
            while let Some(row) = rows.next()? {
                let pause_id: String = row.get(0)?;
                let started_at = parse_datetime(&row.get::<_, String>(1)?, "pause_started_at")?;
                let duration_secs = ended_at
                    .signed_duration_since(started_at)
                    .num_seconds()
                    .max(0) as u64;
                conn.execute(
                    "UPDATE pauses
                     SET pause_ended_at = ?1, duration_secs = ?2
                     WHERE id = ?3",
                    params![ended_at.to_rfc3339(), to_i64(duration_secs)?, pause_id],
                )?;
                total_secs = total_secs.saturating_add(duration_secs);
            }

            Ok(total_secs)
        })
        .await
    }
}
