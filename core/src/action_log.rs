//! Append-only audit trail of lead actions.
//!
//! One row per state-changing action:
//!   approve        status_before / status_after
//!   cost_changed   payment_before / payment_after (approve with a new cost)
//!   reject         status_before / status_after, with the reject comment
//!   update.*       payment_before / payment_after, by the merchant owner
//!
//! Payments in the data blob are major units.

use crate::{
    error::{LeadError, LeadResult},
    event::LeadEvent,
    lead::{Lead, UpdateAction},
    listener::LeadListener,
    money::to_major,
    store::LeadStore,
    types::{LeadId, UserId},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum ActionLogEvent {
    Approve,
    Reject,
    Update(UpdateAction),
    CostChanged,
}

impl ActionLogEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionLogEvent::Approve     => "approve",
            ActionLogEvent::Reject      => "reject",
            ActionLogEvent::Update(u)   => u.as_str(),
            ActionLogEvent::CostChanged => "cost_changed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approve"      => Some(ActionLogEvent::Approve),
            "reject"       => Some(ActionLogEvent::Reject),
            "cost_changed" => Some(ActionLogEvent::CostChanged),
            other if other.starts_with("update.") => {
                UpdateAction::parse(other).map(ActionLogEvent::Update)
            }
            _ => None,
        }
    }
}

impl From<ActionLogEvent> for String {
    fn from(event: ActionLogEvent) -> Self {
        event.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeadActionLog {
    pub id:         i64,
    pub lead_id:    LeadId,
    pub user_id:    Option<UserId>,
    pub event:      ActionLogEvent,
    pub comment:    Option<String>,
    pub data:       Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewActionLog {
    pub lead_id: LeadId,
    pub user_id: Option<UserId>,
    pub event:   ActionLogEvent,
    pub comment: Option<String>,
    pub data:    Option<Value>,
}

/// Writes the audit trail from lead events.
pub struct LeadActionsLogger;

impl LeadActionsLogger {
    fn load_lead(store: &LeadStore, lead_id: LeadId) -> LeadResult<Lead> {
        store
            .lead(lead_id)?
            .ok_or_else(|| LeadError::not_found("lead", lead_id))
    }

    fn write(store: &LeadStore, entry: NewActionLog) -> LeadResult<()> {
        log::debug!("Lead {} action log: {}", entry.lead_id, entry.event.as_str());
        store.insert_action_log(&entry)
    }
}

impl LeadListener for LeadActionsLogger {
    fn name(&self) -> &'static str {
        "action_logger"
    }

    fn handle(&self, store: &LeadStore, event: &LeadEvent) -> LeadResult<()> {
        match event {
            LeadEvent::LeadApproved { lead_id, actor_id, old_status, old_payment, comment } => {
                let lead = Self::load_lead(store, *lead_id)?;
                Self::write(store, NewActionLog {
                    lead_id: lead.id,
                    user_id: Some(*actor_id),
                    event: ActionLogEvent::Approve,
                    comment: None,
                    data: Some(json!({
                        "status_before": old_status,
                        "status_after": lead.status,
                    })),
                })?;

                // A lead that had no cost has nothing to change from.
                if let Some(old_payment) = old_payment.filter(|paid| *paid != 0) {
                    Self::write(store, NewActionLog {
                        lead_id: lead.id,
                        user_id: Some(*actor_id),
                        event: ActionLogEvent::CostChanged,
                        comment: comment.clone(),
                        data: Some(json!({
                            "payment_before": to_major(old_payment),
                            "payment_after": to_major(lead.merchant_payment),
                        })),
                    })?;
                }
                Ok(())
            }
            LeadEvent::LeadRejected { lead_id, actor_id, old_status, comment } => {
                let lead = Self::load_lead(store, *lead_id)?;
                Self::write(store, NewActionLog {
                    lead_id: lead.id,
                    user_id: Some(*actor_id),
                    event: ActionLogEvent::Reject,
                    comment: Some(comment.clone()),
                    data: Some(json!({
                        "status_before": old_status,
                        "status_after": lead.status,
                    })),
                })
            }
            LeadEvent::LeadUpdated { lead_id, action, old_payment } => {
                let lead = Self::load_lead(store, *lead_id)?;
                let merchant_owner = store.merchant(lead.merchant_id)?.map(|m| m.owner_id);
                Self::write(store, NewActionLog {
                    lead_id: lead.id,
                    user_id: merchant_owner,
                    event: ActionLogEvent::Update(*action),
                    comment: None,
                    data: Some(json!({
                        "payment_before": to_major(*old_payment),
                        "payment_after": to_major(lead.merchant_payment),
                    })),
                })
            }
            LeadEvent::TrackerTaskCreated { .. } => Ok(()),
        }
    }
}

/// Audit history for a lead, newest first.
pub fn lead_history(store: &LeadStore, lead_id: LeadId) -> LeadResult<Vec<LeadActionLog>> {
    store.action_logs_for(lead_id)
}
