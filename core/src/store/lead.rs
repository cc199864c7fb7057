use super::LeadStore;
use crate::{
    error::{LeadError, LeadResult},
    lead::Lead,
    types::{LeadId, RecordId},
};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};

const LEAD_COLUMNS: &str = "id, tracker_id, status, prev_status, payload, notice, reject_comment,
    merchant_payment, affiliate_profit, network_profit, currency, click_id, session_id,
    client_id, request_id, customer_id, template_data, network_id, offer_id, campaign_id,
    offer_rate_id, promo_tool_id, promo_tool_code_id, affiliate_id, merchant_id, timestamp,
    terminated_at, created_at, updated_at";

fn lead_from_row(row: &Row<'_>) -> rusqlite::Result<Lead> {
    Ok(Lead {
        id: row.get(0)?,
        tracker_id: row.get(1)?,
        status: row.get(2)?,
        prev_status: row.get(3)?,
        payload: row.get(4)?,
        notice: row.get(5)?,
        reject_comment: row.get(6)?,
        merchant_payment: row.get(7)?,
        affiliate_profit: row.get(8)?,
        network_profit: row.get(9)?,
        currency: row.get(10)?,
        click_id: row.get(11)?,
        session_id: row.get(12)?,
        client_id: row.get(13)?,
        request_id: row.get(14)?,
        customer_id: row.get(15)?,
        template_data: row.get(16)?,
        network_id: row.get(17)?,
        offer_id: row.get(18)?,
        campaign_id: row.get(19)?,
        offer_rate_id: row.get(20)?,
        promo_tool_id: row.get(21)?,
        promo_tool_code_id: row.get(22)?,
        affiliate_id: row.get(23)?,
        merchant_id: row.get(24)?,
        timestamp: row.get(25)?,
        terminated_at: row.get(26)?,
        created_at: row.get(27)?,
        updated_at: row.get(28)?,
    })
}

impl LeadStore {
    // ── Lead ───────────────────────────────────────────────────

    /// Insert a new lead and return its id.
    ///
    /// tracker_id is unique; a duplicate fails with a database error.
    /// Callers look the tracker id up first under the write lock.
    pub fn insert_lead(&self, lead: &Lead) -> LeadResult<LeadId> {
        self.conn.execute(
            "INSERT INTO lead (tracker_id, status, prev_status, payload, notice, reject_comment,
                merchant_payment, affiliate_profit, network_profit, currency, click_id, session_id,
                client_id, request_id, customer_id, template_data, network_id, offer_id,
                campaign_id, offer_rate_id, promo_tool_id, promo_tool_code_id, affiliate_id,
                merchant_id, timestamp, terminated_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28)",
            params![
                lead.tracker_id,
                lead.status,
                lead.prev_status,
                lead.payload,
                lead.notice,
                lead.reject_comment,
                lead.merchant_payment,
                lead.affiliate_profit,
                lead.network_profit,
                lead.currency,
                lead.click_id,
                lead.session_id,
                lead.client_id,
                lead.request_id,
                lead.customer_id,
                lead.template_data,
                lead.network_id,
                lead.offer_id,
                lead.campaign_id,
                lead.offer_rate_id,
                lead.promo_tool_id,
                lead.promo_tool_code_id,
                lead.affiliate_id,
                lead.merchant_id,
                lead.timestamp,
                lead.terminated_at,
                lead.created_at,
                lead.updated_at,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Persist the mutable part of a lead. Correlation fields never change.
    pub fn save_lead(&self, lead: &Lead) -> LeadResult<()> {
        let updated = self.conn.execute(
            "UPDATE lead SET status = ?2, prev_status = ?3, payload = ?4, notice = ?5,
                reject_comment = ?6, merchant_payment = ?7, affiliate_profit = ?8,
                network_profit = ?9, terminated_at = ?10, updated_at = ?11
             WHERE id = ?1",
            params![
                lead.id,
                lead.status,
                lead.prev_status,
                lead.payload,
                lead.notice,
                lead.reject_comment,
                lead.merchant_payment,
                lead.affiliate_profit,
                lead.network_profit,
                lead.terminated_at,
                lead.updated_at,
            ],
        )?;
        if updated != 1 {
            return Err(LeadError::NotPersisted(format!("lead {}", lead.id)));
        }
        Ok(())
    }

    pub fn lead(&self, id: LeadId) -> LeadResult<Option<Lead>> {
        let lead = self
            .conn
            .query_row(
                &format!("SELECT {LEAD_COLUMNS} FROM lead WHERE id = ?1"),
                params![id],
                lead_from_row,
            )
            .optional()?;
        Ok(lead)
    }

    pub fn lead_by_tracker_id(&self, tracker_id: &str) -> LeadResult<Option<Lead>> {
        let lead = self
            .conn
            .query_row(
                &format!("SELECT {LEAD_COLUMNS} FROM lead WHERE tracker_id = ?1"),
                params![tracker_id],
                lead_from_row,
            )
            .optional()?;
        Ok(lead)
    }

    /// Leads with the given ids, in id order. Missing ids are skipped.
    pub fn leads_by_ids(&self, ids: &[LeadId]) -> LeadResult<Vec<Lead>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {LEAD_COLUMNS} FROM lead WHERE id IN ({placeholders}) ORDER BY id ASC"
        ))?;
        let leads = stmt
            .query_map(params_from_iter(ids.iter()), lead_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(leads)
    }

    pub fn lead_count_for_campaign(&self, campaign_id: RecordId) -> LeadResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM lead WHERE campaign_id = ?1",
            params![campaign_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ── External data sidecar ──────────────────────────────────

    /// Attach the external tracking payload once. Returns false when the
    /// lead already has one; the stored payload is left untouched.
    pub fn attach_external_data(&self, lead_id: LeadId, payload: &str) -> LeadResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO lead_external_data (lead_id, payload, created_at)
             VALUES (?1, ?2, ?3)",
            params![lead_id, payload, chrono::Utc::now()],
        )?;
        Ok(inserted == 1)
    }

    pub fn external_data(&self, lead_id: LeadId) -> LeadResult<Option<String>> {
        let payload = self
            .conn
            .query_row(
                "SELECT payload FROM lead_external_data WHERE lead_id = ?1",
                params![lead_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(payload)
    }
}
