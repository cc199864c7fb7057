//! Lead status/payment transitions.
//!
//! Each action checks its guards before touching storage, then saves the
//! lead and dispatches its event inside one atomic unit. A guard failure
//! writes nothing and emits nothing; a storage or listener failure rolls
//! the whole unit back and leaves the caller's lead unchanged.

use crate::{
    error::{LeadError, LeadResult},
    event::LeadEvent,
    lead::{Lead, LeadStatus},
    listener::EventDispatcher,
    offer_rate::LeadRewards,
    store::LeadStore,
    tracker_tasks::pending_action,
    types::{Minor, UserId},
};
use chrono::Utc;

pub struct LeadActionsService<'a> {
    store:  &'a LeadStore,
    events: &'a EventDispatcher,
}

impl<'a> LeadActionsService<'a> {
    pub fn new(store: &'a LeadStore, events: &'a EventDispatcher) -> Self {
        Self { store, events }
    }

    /// Approve a lead, optionally re-pricing it from `new_payment`.
    ///
    /// `comment` is only kept when the cost actually changes.
    pub fn approve(
        &self,
        lead: &mut Lead,
        actor: UserId,
        new_payment: Option<Minor>,
        comment: Option<&str>,
    ) -> LeadResult<()> {
        if lead.is_approved() {
            return Err(LeadError::BadLeadStatus(format!(
                "lead {} is already approved",
                lead.id
            )));
        }

        let mut next = lead.clone();
        let old_status = lead.status;
        let mut old_payment = None;
        let mut comment = comment.map(str::to_string);

        match new_payment {
            Some(payment) => {
                old_payment = Some(lead.merchant_payment);
                let rewards = self.recalculate(lead, payment)?;
                apply_rewards(&mut next, rewards);
            }
            None => comment = None,
        }

        let now = Utc::now();
        next.prev_status = Some(old_status);
        next.status = LeadStatus::Approved;
        next.terminated_at = Some(now);
        next.updated_at = now;

        let event = LeadEvent::LeadApproved {
            lead_id: next.id,
            actor_id: actor,
            old_status,
            old_payment,
            comment,
        };
        self.commit(&next, &event)?;
        log::info!("Lead {} approved by user {actor} (was {old_status})", next.id);
        *lead = next;
        Ok(())
    }

    pub fn reject(&self, lead: &mut Lead, actor: UserId, comment: &str) -> LeadResult<()> {
        if lead.is_rejected() {
            return Err(LeadError::BadLeadStatus(format!(
                "lead {} is already rejected",
                lead.id
            )));
        }

        let mut next = lead.clone();
        let old_status = lead.status;
        let now = Utc::now();
        next.prev_status = Some(old_status);
        next.status = LeadStatus::Rejected;
        next.reject_comment = Some(comment.to_string());
        next.terminated_at = Some(now);
        next.updated_at = now;

        let event = LeadEvent::LeadRejected {
            lead_id: next.id,
            actor_id: actor,
            old_status,
            comment: comment.to_string(),
        };
        self.commit(&next, &event)?;
        log::info!("Lead {} rejected by user {actor} (was {old_status})", next.id);
        *lead = next;
        Ok(())
    }

    /// Re-price a lead for the update action its open tracker task carries.
    ///
    /// The event is raised even when the split does not change: the
    /// replayed tracker action is what triggers the ledger refresh.
    pub fn update(
        &self,
        lead: &mut Lead,
        new_payment: Option<Minor>,
        old_payment: Minor,
    ) -> LeadResult<()> {
        let action = pending_action(self.store, lead.id)?
            .and_then(|action| action.update_kind())
            .ok_or(LeadError::ActionNotFound)?;

        if lead.is_rejected() {
            return Err(LeadError::BadLeadStatus(format!(
                "Cannot update lead with reject status, leadId = {}",
                lead.id
            )));
        }

        let mut next = lead.clone();
        if let Some(payment) = new_payment {
            let rewards = self.recalculate(lead, payment)?;
            apply_rewards(&mut next, rewards);
        }
        next.updated_at = Utc::now();

        let event = LeadEvent::LeadUpdated {
            lead_id: next.id,
            action,
            old_payment,
        };
        self.commit(&next, &event)?;
        log::info!(
            "Lead {} updated via {} ({old_payment} -> {})",
            next.id,
            action.as_str(),
            next.merchant_payment
        );
        *lead = next;
        Ok(())
    }

    /// New split for a percent-type rate. Fixed rates cannot be re-priced.
    fn recalculate(&self, lead: &Lead, payment: Minor) -> LeadResult<LeadRewards> {
        let rate = match self.store.offer_rate(lead.offer_rate_id)? {
            Some(rate) if rate.is_percent() => rate,
            _ => return Err(LeadError::PaymentTypeNotPercent),
        };
        let commission = self
            .store
            .affiliate_commission(rate.id, lead.affiliate_id)?;
        rate.calculate_lead_rewards(Some(payment), commission)
    }

    fn commit(&self, lead: &Lead, event: &LeadEvent) -> LeadResult<()> {
        self.store.atomic(|store| {
            store.save_lead(lead)?;
            self.events.dispatch(store, event)
        })
    }
}

fn apply_rewards(lead: &mut Lead, rewards: LeadRewards) {
    lead.merchant_payment = rewards.merchant_payment;
    lead.affiliate_profit = rewards.affiliate_profit;
    lead.network_profit = rewards.network_profit;
}
