use super::LeadStore;
use crate::{
    action_log::{LeadActionLog, NewActionLog},
    error::LeadResult,
    types::LeadId,
};
use chrono::Utc;
use rusqlite::params;

impl LeadStore {
    // ── Lead action log ────────────────────────────────────────

    pub fn insert_action_log(&self, entry: &NewActionLog) -> LeadResult<()> {
        self.conn.execute(
            "INSERT INTO lead_action_log (lead_id, user_id, event, comment, data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.lead_id,
                entry.user_id,
                entry.event,
                entry.comment,
                entry.data,
                Utc::now(),
            ],
        )?;
        Ok(())
    }

    pub fn action_logs_for(&self, lead_id: LeadId) -> LeadResult<Vec<LeadActionLog>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, lead_id, user_id, event, comment, data, created_at
             FROM lead_action_log WHERE lead_id = ?1
             ORDER BY id DESC",
        )?;
        let rows = stmt
            .query_map(params![lead_id], |row| {
                Ok(LeadActionLog {
                    id: row.get(0)?,
                    lead_id: row.get(1)?,
                    user_id: row.get(2)?,
                    event: row.get(3)?,
                    comment: row.get(4)?,
                    data: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn action_log_count(&self, lead_id: LeadId) -> LeadResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM lead_action_log WHERE lead_id = ?1",
            params![lead_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
