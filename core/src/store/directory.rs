use super::{decimal_col, LeadStore};
use crate::{
    config::DirectoryConfig,
    directory::{Campaign, NetworkManager, NetworkParticipant, Offer, OwnedRecord, PromoTool, User},
    error::LeadResult,
    offer_rate::OfferRate,
    types::{RecordId, UserId},
};
use rusqlite::{params, OptionalExtension};
use rust_decimal::Decimal;

impl LeadStore {
    // ── Directory seed ─────────────────────────────────────────

    /// Load collaborator records. Re-seeding replaces rows by id.
    pub fn seed_directory(&self, dir: &DirectoryConfig) -> LeadResult<()> {
        self.atomic(|store| {
            let conn = &store.conn;
            for u in &dir.users {
                conn.execute(
                    "INSERT OR REPLACE INTO users (id, role) VALUES (?1, ?2)",
                    params![u.id, u.role],
                )?;
            }
            for (table, rows) in [
                ("network", &dir.networks),
                ("merchant", &dir.merchants),
                ("affiliate", &dir.affiliates),
            ] {
                let sql = format!("INSERT OR REPLACE INTO {table} (id, owner_id) VALUES (?1, ?2)");
                for r in rows {
                    conn.execute(&sql, params![r.id, r.owner_id])?;
                }
            }
            for m in &dir.network_managers {
                conn.execute(
                    "INSERT OR REPLACE INTO network_manager (id, user_id, network_id) VALUES (?1, ?2, ?3)",
                    params![m.id, m.user_id, m.network_id],
                )?;
            }
            for p in &dir.network_participants {
                conn.execute(
                    "INSERT OR REPLACE INTO network_participant (id, network_id, affiliate_id, manager_id)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![p.id, p.network_id, p.affiliate_id, p.manager_id],
                )?;
            }
            for o in &dir.offers {
                conn.execute(
                    "INSERT OR REPLACE INTO offer (id, network_id, merchant_id, manager_id, currency)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![o.id, o.network_id, o.merchant_id, o.manager_id, o.currency],
                )?;
            }
            for r in &dir.offer_rates {
                conn.execute(
                    "INSERT OR REPLACE INTO offer_rate
                        (id, offer_id, payment_type, merchant_payment_amount, commission_payment_amount)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        r.id,
                        r.offer_id,
                        r.payment_type,
                        r.merchant_payment_amount.to_string(),
                        r.commission_payment_amount.to_string(),
                    ],
                )?;
            }
            for a in &dir.offer_rate_affiliates {
                conn.execute(
                    "INSERT OR REPLACE INTO offer_rate_affiliate
                        (offer_rate_id, affiliate_id, commission_payment_amount)
                     VALUES (?1, ?2, ?3)",
                    params![a.offer_rate_id, a.affiliate_id, a.commission_payment_amount.to_string()],
                )?;
            }
            for c in &dir.campaigns {
                conn.execute(
                    "INSERT OR REPLACE INTO campaign (id, offer_id, affiliate_id) VALUES (?1, ?2, ?3)",
                    params![c.id, c.offer_id, c.affiliate_id],
                )?;
            }
            for p in &dir.promo_tools {
                conn.execute(
                    "INSERT OR REPLACE INTO promo_tool (id, offer_id) VALUES (?1, ?2)",
                    params![p.id, p.offer_id],
                )?;
            }
            Ok(())
        })
    }

    // ── Directory lookups ──────────────────────────────────────

    pub fn user(&self, id: UserId) -> LeadResult<Option<User>> {
        let user = self
            .conn
            .query_row(
                "SELECT id, role FROM users WHERE id = ?1",
                params![id],
                |row| Ok(User { id: row.get(0)?, role: row.get(1)? }),
            )
            .optional()?;
        Ok(user)
    }

    fn owned_record(&self, table: &str, id: RecordId) -> LeadResult<Option<OwnedRecord>> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT id, owner_id FROM {table} WHERE id = ?1"),
                params![id],
                |row| Ok(OwnedRecord { id: row.get(0)?, owner_id: row.get(1)? }),
            )
            .optional()?;
        Ok(record)
    }

    pub fn network(&self, id: RecordId) -> LeadResult<Option<OwnedRecord>> {
        self.owned_record("network", id)
    }

    pub fn merchant(&self, id: RecordId) -> LeadResult<Option<OwnedRecord>> {
        self.owned_record("merchant", id)
    }

    pub fn affiliate(&self, id: RecordId) -> LeadResult<Option<OwnedRecord>> {
        self.owned_record("affiliate", id)
    }

    pub fn offer(&self, id: RecordId) -> LeadResult<Option<Offer>> {
        let offer = self
            .conn
            .query_row(
                "SELECT id, network_id, merchant_id, manager_id, currency FROM offer WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Offer {
                        id: row.get(0)?,
                        network_id: row.get(1)?,
                        merchant_id: row.get(2)?,
                        manager_id: row.get(3)?,
                        currency: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(offer)
    }

    pub fn offer_rate(&self, id: RecordId) -> LeadResult<Option<OfferRate>> {
        let rate = self
            .conn
            .query_row(
                "SELECT id, offer_id, payment_type, merchant_payment_amount, commission_payment_amount
                 FROM offer_rate WHERE id = ?1",
                params![id],
                |row| {
                    Ok(OfferRate {
                        id: row.get(0)?,
                        offer_id: row.get(1)?,
                        payment_type: row.get(2)?,
                        merchant_payment_amount: decimal_col(row, 3)?,
                        commission_payment_amount: decimal_col(row, 4)?,
                    })
                },
            )
            .optional()?;
        Ok(rate)
    }

    /// Per-affiliate commission override for a rate, if one is configured.
    pub fn affiliate_commission(
        &self,
        offer_rate_id: RecordId,
        affiliate_id: RecordId,
    ) -> LeadResult<Option<Decimal>> {
        let commission = self
            .conn
            .query_row(
                "SELECT commission_payment_amount FROM offer_rate_affiliate
                 WHERE offer_rate_id = ?1 AND affiliate_id = ?2",
                params![offer_rate_id, affiliate_id],
                |row| decimal_col(row, 0),
            )
            .optional()?;
        Ok(commission)
    }

    pub fn campaign(&self, id: RecordId) -> LeadResult<Option<Campaign>> {
        let campaign = self
            .conn
            .query_row(
                "SELECT id, offer_id, affiliate_id FROM campaign WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Campaign {
                        id: row.get(0)?,
                        offer_id: row.get(1)?,
                        affiliate_id: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(campaign)
    }

    pub fn promo_tool(&self, id: RecordId) -> LeadResult<Option<PromoTool>> {
        let tool = self
            .conn
            .query_row(
                "SELECT id, offer_id FROM promo_tool WHERE id = ?1",
                params![id],
                |row| Ok(PromoTool { id: row.get(0)?, offer_id: row.get(1)? }),
            )
            .optional()?;
        Ok(tool)
    }

    pub fn network_manager_for_user(&self, user_id: UserId) -> LeadResult<Option<NetworkManager>> {
        let manager = self
            .conn
            .query_row(
                "SELECT id, user_id, network_id FROM network_manager WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(NetworkManager {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        network_id: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(manager)
    }

    pub fn network_participant(
        &self,
        network_id: RecordId,
        affiliate_id: RecordId,
    ) -> LeadResult<Option<NetworkParticipant>> {
        let participant = self
            .conn
            .query_row(
                "SELECT id, network_id, affiliate_id, manager_id FROM network_participant
                 WHERE network_id = ?1 AND affiliate_id = ?2",
                params![network_id, affiliate_id],
                |row| {
                    Ok(NetworkParticipant {
                        id: row.get(0)?,
                        network_id: row.get(1)?,
                        affiliate_id: row.get(2)?,
                        manager_id: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(participant)
    }
}
