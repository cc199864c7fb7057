use super::LeadStore;
use crate::{
    error::LeadResult,
    tracker_tasks::{PivotStatus, TaskStatus, TrackerTask, TrackerTaskLead},
    types::LeadId,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};

/// A claimed or listed replay job. `payload` is the serialized job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id:           i64,
    pub queue:        String,
    pub payload:      String,
    pub attempts:     u32,
    pub max_attempts: u32,
    pub last_error:   Option<String>,
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<TrackerTask> {
    let ids: String = row.get(4)?;
    let ids = serde_json::from_str(&ids).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(TrackerTask {
        id: row.get(0)?,
        uuid: row.get(1)?,
        task_type: row.get(2)?,
        action: row.get(3)?,
        ids,
        params: row.get(5)?,
        user_id: row.get(6)?,
        force: row.get(7)?,
        status: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn pivot_from_row(row: &Row<'_>) -> rusqlite::Result<TrackerTaskLead> {
    Ok(TrackerTaskLead {
        id: row.get(0)?,
        task_id: row.get(1)?,
        lead_id: row.get(2)?,
        status: row.get(3)?,
        notice: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<JobRow> {
    Ok(JobRow {
        id: row.get(0)?,
        queue: row.get(1)?,
        payload: row.get(2)?,
        attempts: row.get(3)?,
        max_attempts: row.get(4)?,
        last_error: row.get(5)?,
    })
}

const TASK_COLUMNS: &str =
    "id, uuid, type, action, ids, params, user_id, force, status, created_at, updated_at";
const PIVOT_COLUMNS: &str = "id, task_id, lead_id, status, notice, updated_at";
const JOB_COLUMNS: &str = "id, queue, payload, attempts, max_attempts, last_error";

impl LeadStore {
    // ── Tracker tasks ──────────────────────────────────────────

    pub fn insert_task(&self, task: &TrackerTask) -> LeadResult<i64> {
        self.conn.execute(
            "INSERT INTO tracker_task (uuid, type, action, ids, params, user_id, force, status,
                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                task.uuid,
                task.task_type,
                task.action,
                serde_json::to_string(&task.ids)?,
                task.params,
                task.user_id,
                task.force,
                task.status,
                task.created_at,
                task.updated_at,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn tracker_task(&self, id: i64) -> LeadResult<Option<TrackerTask>> {
        let task = self
            .conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tracker_task WHERE id = ?1"),
                params![id],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    pub fn set_task_status(&self, id: i64, status: TaskStatus) -> LeadResult<()> {
        self.conn.execute(
            "UPDATE tracker_task SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status, Utc::now()],
        )?;
        Ok(())
    }

    // ── Tracking pivots ────────────────────────────────────────

    pub fn insert_pivot(&self, task_id: i64, lead_id: LeadId, now: DateTime<Utc>) -> LeadResult<()> {
        self.conn.execute(
            "INSERT INTO tracker_task_lead (task_id, lead_id, status, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![task_id, lead_id, PivotStatus::Pending, now],
        )?;
        Ok(())
    }

    pub fn pivot_for_lead(&self, lead_id: LeadId) -> LeadResult<Option<TrackerTaskLead>> {
        let pivot = self
            .conn
            .query_row(
                &format!("SELECT {PIVOT_COLUMNS} FROM tracker_task_lead WHERE lead_id = ?1"),
                params![lead_id],
                pivot_from_row,
            )
            .optional()?;
        Ok(pivot)
    }

    pub fn pivots_for_task(&self, task_id: i64) -> LeadResult<Vec<TrackerTaskLead>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PIVOT_COLUMNS} FROM tracker_task_lead WHERE task_id = ?1 ORDER BY lead_id"
        ))?;
        let pivots = stmt
            .query_map(params![task_id], pivot_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pivots)
    }

    pub fn pivot_count_for_task(&self, task_id: i64) -> LeadResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM tracker_task_lead WHERE task_id = ?1",
            params![task_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Which of `ids` are already tracked by some task.
    pub fn lead_ids_with_pivot(&self, ids: &[LeadId]) -> LeadResult<Vec<LeadId>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT lead_id FROM tracker_task_lead WHERE lead_id IN ({placeholders})"
        ))?;
        let tracked = stmt
            .query_map(params_from_iter(ids.iter()), |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tracked)
    }

    pub fn set_pivot_status(&self, lead_id: LeadId, status: PivotStatus) -> LeadResult<()> {
        self.conn.execute(
            "UPDATE tracker_task_lead SET status = ?2, updated_at = ?3 WHERE lead_id = ?1",
            params![lead_id, status, Utc::now()],
        )?;
        Ok(())
    }

    /// Record a replay failure on the lead's pivot. Returns false when the lead is untracked.
    pub fn set_pivot_notice(&self, lead_id: LeadId, notice: &str) -> LeadResult<bool> {
        let updated = self.conn.execute(
            "UPDATE tracker_task_lead SET notice = ?2, updated_at = ?3 WHERE lead_id = ?1",
            params![lead_id, notice, Utc::now()],
        )?;
        Ok(updated > 0)
    }

    pub fn delete_pivot(&self, lead_id: LeadId) -> LeadResult<()> {
        self.conn.execute(
            "DELETE FROM tracker_task_lead WHERE lead_id = ?1",
            params![lead_id],
        )?;
        Ok(())
    }

    // ── Replay jobs ────────────────────────────────────────────

    pub fn insert_job(
        &self,
        queue: &str,
        payload: &str,
        max_attempts: u32,
        available_at: i64,
    ) -> LeadResult<i64> {
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO tracker_job (queue, payload, status, attempts, max_attempts,
                available_at, created_at, updated_at)
             VALUES (?1, ?2, 'queued', 0, ?3, ?4, ?5, ?5)",
            params![queue, payload, max_attempts, available_at, now],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Claim the next due job, forced (`tracker`) queue first.
    ///
    /// The claim marks the row `running`, stamps `claimed_at` and counts
    /// the attempt, so a second worker never picks up the same job. A
    /// running row claimed `lease_secs` or more ago is due again.
    pub fn claim_next_job(&self, now: i64, lease_secs: i64) -> LeadResult<Option<JobRow>> {
        self.atomic(|store| {
            let next: Option<i64> = store
                .conn
                .query_row(
                    "SELECT id FROM tracker_job
                     WHERE (status = 'queued' AND available_at <= ?1)
                        OR (status = 'running' AND claimed_at <= ?2)
                     ORDER BY CASE queue WHEN 'tracker' THEN 0 ELSE 1 END, id
                     LIMIT 1",
                    params![now, now - lease_secs],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(id) = next else {
                return Ok(None);
            };
            store.conn.execute(
                "UPDATE tracker_job SET status = 'running', attempts = attempts + 1,
                    claimed_at = ?2, updated_at = ?3
                 WHERE id = ?1",
                params![id, now, Utc::now()],
            )?;
            let job = store.conn.query_row(
                &format!("SELECT {JOB_COLUMNS} FROM tracker_job WHERE id = ?1"),
                params![id],
                job_from_row,
            )?;
            Ok(Some(job))
        })
    }

    pub fn complete_job(&self, id: i64) -> LeadResult<()> {
        self.finish_job(id, "done", None)
    }

    pub fn fail_job(&self, id: i64, error: &str) -> LeadResult<()> {
        self.finish_job(id, "failed", Some(error))
    }

    /// Put a job back on its queue, due at `available_at`.
    pub fn retry_job(&self, id: i64, available_at: i64, error: &str) -> LeadResult<()> {
        self.conn.execute(
            "UPDATE tracker_job SET status = 'queued', available_at = ?2, last_error = ?3,
                claimed_at = NULL, updated_at = ?4
             WHERE id = ?1",
            params![id, available_at, error, Utc::now()],
        )?;
        Ok(())
    }

    fn finish_job(&self, id: i64, status: &str, error: Option<&str>) -> LeadResult<()> {
        self.conn.execute(
            "UPDATE tracker_job SET status = ?2, last_error = COALESCE(?3, last_error),
                updated_at = ?4
             WHERE id = ?1",
            params![id, status, error, Utc::now()],
        )?;
        Ok(())
    }

    /// Jobs in a given state, oldest first.
    pub fn jobs_with_status(&self, status: &str) -> LeadResult<Vec<JobRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM tracker_job WHERE status = ?1 ORDER BY id"
        ))?;
        let jobs = stmt
            .query_map(params![status], job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }
}
