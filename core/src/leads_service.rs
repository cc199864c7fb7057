//! Idempotent postback ingestion.
//!
//! RULE: The tracker id is the only identity a postback carries. The unique
//! constraint on it decides which of two racing first postbacks creates the
//! lead; the loser re-reads and continues as an update.
//!
//! EXECUTION ORDER (one atomic unit):
//!   1. locate or insert the lead
//!   2. refresh soft fields while the lead is still in hold
//!   3. attach external tracking data (write-once)
//!   4. status change → approve / reject, or same status → pending update

use crate::{
    error::{LeadError, LeadResult},
    lead::{Lead, LeadStatus},
    lead_actions::LeadActionsService,
    listener::EventDispatcher,
    postback::Postback,
    store::LeadStore,
    tracker_tasks::pending_action,
    types::{Minor, UserId},
};
use chrono::Utc;

pub const AUTO_COST_COMMENT: &str = "Auto changing cost by postback";
pub const AUTO_REJECT_COMMENT: &str = "Auto rejecting lead by postback";

pub struct LeadsService<'a> {
    store:  &'a LeadStore,
    events: &'a EventDispatcher,
}

impl<'a> LeadsService<'a> {
    pub fn new(store: &'a LeadStore, events: &'a EventDispatcher) -> Self {
        Self { store, events }
    }

    /// Create or advance the lead a postback refers to and return it as stored.
    pub fn create(&self, postback: &Postback) -> LeadResult<Lead> {
        let lead_id = self.store.atomic(|store| {
            let (mut lead, fresh) = match store.lead_by_tracker_id(&postback.tracker_id)? {
                Some(existing) => (existing, false),
                None => (self.insert(store, postback)?, true),
            };

            let old_status = lead.status;
            let old_payment = lead.merchant_payment;

            if !fresh && lead.is_hold() {
                lead.payload = postback.payload.clone();
                lead.notice = postback.notice.clone();
                lead.updated_at = Utc::now();
                store.save_lead(&lead)?;
            }

            if let Some(external) = &postback.external {
                let payload = serde_json::to_string(external)?;
                if store.attach_external_data(lead.id, &payload)? {
                    log::debug!("Attached external data to lead {}", lead.id);
                }
            }

            let actions = LeadActionsService::new(store, self.events);
            if postback.status != old_status {
                let old_payment = if fresh { None } else { Some(old_payment) };
                self.change_status(&actions, &mut lead, postback, old_payment)?;
            } else if let Some(update) = pending_action(store, lead.id)?.and_then(|a| a.update_kind()) {
                match postback.new_payment() {
                    Some(new_payment) if new_payment != old_payment => {
                        log::debug!("Postback re-prices lead {} for {}", lead.id, update.as_str());
                        actions.update(&mut lead, Some(new_payment), old_payment)?;
                    }
                    _ => {}
                }
            }
            Ok(lead.id)
        })?;

        self.store
            .lead(lead_id)?
            .ok_or_else(|| LeadError::not_found("lead", lead_id))
    }

    fn insert(&self, store: &LeadStore, postback: &Postback) -> LeadResult<Lead> {
        let lead = new_lead(store, postback)?;
        let id = store.insert_lead(&lead)?;
        log::info!("Lead {id} created from postback {}", postback.tracker_id);
        Ok(Lead { id, ..lead })
    }

    fn change_status(
        &self,
        actions: &LeadActionsService<'_>,
        lead: &mut Lead,
        postback: &Postback,
        old_payment: Option<Minor>,
    ) -> LeadResult<()> {
        let actor = merchant_owner(self.store, lead)?;
        match postback.status {
            LeadStatus::Approved => {
                let new_payment = postback.new_payment();
                match (old_payment, new_payment) {
                    (Some(old), Some(new)) if old != new => {
                        actions.approve(lead, actor, Some(new), Some(AUTO_COST_COMMENT))
                    }
                    _ => actions.approve(lead, actor, None, None),
                }
            }
            LeadStatus::Rejected => actions.reject(lead, actor, AUTO_REJECT_COMMENT),
            LeadStatus::Hold => Ok(()),
        }
    }
}

/// The user acting for the lead's merchant.
pub fn merchant_owner(store: &LeadStore, lead: &Lead) -> LeadResult<UserId> {
    store
        .merchant(lead.merchant_id)?
        .map(|merchant| merchant.owner_id)
        .ok_or_else(|| LeadError::not_found("merchant", lead.merchant_id))
}

/// A hold lead populated from every postback field.
fn new_lead(store: &LeadStore, postback: &Postback) -> LeadResult<Lead> {
    let (merchant_payment, affiliate_profit, network_profit) = match postback.explicit_split() {
        Some(split) => split,
        None => {
            let rate = store
                .offer_rate(postback.offer_rate_id)?
                .ok_or_else(|| LeadError::not_found("offer_rate", postback.offer_rate_id))?;
            let payment = if rate.is_percent() { postback.new_payment() } else { None };
            let commission = store.affiliate_commission(rate.id, postback.affiliate_id)?;
            let rewards = rate.calculate_lead_rewards(payment, commission)?;
            (rewards.merchant_payment, rewards.affiliate_profit, rewards.network_profit)
        }
    };

    let now = Utc::now();
    Ok(Lead {
        id: 0,
        tracker_id: postback.tracker_id.clone(),
        status: LeadStatus::Hold,
        prev_status: None,
        payload: postback.payload.clone(),
        notice: postback.notice.clone(),
        reject_comment: None,
        merchant_payment,
        affiliate_profit,
        network_profit,
        currency: postback.currency.clone(),
        click_id: postback.click_id.clone(),
        session_id: postback.session_id.clone(),
        client_id: postback.client_id.clone(),
        request_id: postback.request_id.clone(),
        customer_id: postback.customer_id.clone(),
        template_data: postback.template_data.clone(),
        network_id: postback.network_id,
        offer_id: postback.offer_id,
        campaign_id: postback.campaign_id,
        offer_rate_id: postback.offer_rate_id,
        promo_tool_id: postback.promo_tool_id,
        promo_tool_code_id: postback.promo_tool_code_id,
        affiliate_id: postback.affiliate_id,
        merchant_id: postback.merchant_id,
        timestamp: postback.timestamp,
        terminated_at: None,
        created_at: now,
        updated_at: now,
    })
}
