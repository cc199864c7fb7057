//! Domain events raised by lead actions and task creation.
//!
//! RULE: State changes are announced only through these events.
//! Money movements, the audit trail and tracker bookkeeping are
//! projections of the event stream, never written by the actions.

use crate::{
    lead::{LeadStatus, UpdateAction},
    types::{LeadId, Minor, UserId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LeadEvent {
    LeadApproved {
        lead_id: LeadId,
        actor_id: UserId,
        old_status: LeadStatus,
        /// Merchant payment before the approval; None when no cost change happened.
        old_payment: Option<Minor>,
        /// Cost-change comment; None when no cost change happened.
        comment: Option<String>,
    },
    LeadRejected {
        lead_id: LeadId,
        actor_id: UserId,
        old_status: LeadStatus,
        comment: String,
    },
    LeadUpdated {
        lead_id: LeadId,
        action: UpdateAction,
        old_payment: Minor,
    },
    TrackerTaskCreated {
        task_id: i64,
        task_uuid: String,
    },
}

impl LeadEvent {
    pub fn lead_id(&self) -> Option<LeadId> {
        match self {
            LeadEvent::LeadApproved { lead_id, .. }
            | LeadEvent::LeadRejected { lead_id, .. }
            | LeadEvent::LeadUpdated { lead_id, .. } => Some(*lead_id),
            LeadEvent::TrackerTaskCreated { .. } => None,
        }
    }
}

/// A persisted event log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id:         Option<i64>,
    pub source:     String,
    pub event_type: String,
    pub payload:    String,
    pub created_at: DateTime<Utc>,
}

/// Stable name for the event_type column in event_log.
pub fn event_type_name(event: &LeadEvent) -> &'static str {
    match event {
        LeadEvent::LeadApproved { .. }       => "lead_approved",
        LeadEvent::LeadRejected { .. }       => "lead_rejected",
        LeadEvent::LeadUpdated { .. }        => "lead_updated",
        LeadEvent::TrackerTaskCreated { .. } => "tracker_task_created",
    }
}
