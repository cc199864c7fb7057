//! Lead entity and its status machine.
//!
//!   hold ──approve──▶ approved
//!     └───reject───▶ rejected
//!   approved ──reject──▶ rejected
//!   rejected ──approve──▶ approved
//!
//! approve/reject never re-enter the current state. There is no way
//! back to hold. Payment-only changes go through `update`, which is
//! refused once the lead is rejected.

use crate::types::{Currency, LeadId, Minor, RecordId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    Hold,
    Approved,
    Rejected,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::Hold     => "hold",
            LeadStatus::Approved => "approved",
            LeadStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hold"     => Some(LeadStatus::Hold),
            "approved" => Some(LeadStatus::Approved),
            "rejected" => Some(LeadStatus::Rejected),
            _          => None,
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three payment-update flavours a tracker task can replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateAction {
    #[serde(rename = "update.fixed")]
    Fixed,
    #[serde(rename = "update.percent")]
    Percent,
    #[serde(rename = "update.retariffication")]
    Retariffication,
}

impl UpdateAction {
    pub const ALL: [UpdateAction; 3] = [
        UpdateAction::Fixed,
        UpdateAction::Percent,
        UpdateAction::Retariffication,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateAction::Fixed           => "update.fixed",
            UpdateAction::Percent         => "update.percent",
            UpdateAction::Retariffication => "update.retariffication",
        }
    }

    /// Accepts both `update.fixed` and the bare `fixed` form.
    pub fn parse(s: &str) -> Option<Self> {
        let bare = s.strip_prefix("update.").unwrap_or(s);
        match bare {
            "fixed"           => Some(UpdateAction::Fixed),
            "percent"         => Some(UpdateAction::Percent),
            "retariffication" => Some(UpdateAction::Retariffication),
            _                 => None,
        }
    }
}

/// An action a tracker task replays for each of its leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LeadAction {
    Approve,
    Reject,
    Update(UpdateAction),
}

impl LeadAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadAction::Approve    => "approve",
            LeadAction::Reject     => "reject",
            LeadAction::Update(u)  => u.as_str(),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approve" => Some(LeadAction::Approve),
            "reject"  => Some(LeadAction::Reject),
            other if other.starts_with("update.") => UpdateAction::parse(other).map(LeadAction::Update),
            _ => None,
        }
    }

    pub fn update_kind(&self) -> Option<UpdateAction> {
        match self {
            LeadAction::Update(u) => Some(*u),
            _ => None,
        }
    }

    /// Remote method name on the tracking service.
    pub fn tracker_method(&self) -> String {
        format!("leads.{}", self.as_str())
    }
}

impl From<LeadAction> for String {
    fn from(action: LeadAction) -> Self {
        action.as_str().to_string()
    }
}

impl TryFrom<String> for LeadAction {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        LeadAction::parse(&value).ok_or_else(|| format!("unknown lead action '{value}'"))
    }
}

impl fmt::Display for LeadAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lead {
    pub id:                 LeadId,
    pub tracker_id:         String,
    pub status:             LeadStatus,
    pub prev_status:        Option<LeadStatus>,
    pub payload:            Option<String>,
    pub notice:             Option<String>,
    pub reject_comment:     Option<String>,
    pub merchant_payment:   Minor,
    pub affiliate_profit:   Minor,
    pub network_profit:     Minor,
    pub currency:           Currency,
    pub click_id:           Option<String>,
    pub session_id:         Option<String>,
    pub client_id:          Option<String>,
    pub request_id:         Option<String>,
    pub customer_id:        Option<String>,
    pub template_data:      Option<String>,
    pub network_id:         RecordId,
    pub offer_id:           RecordId,
    pub campaign_id:        RecordId,
    pub offer_rate_id:      RecordId,
    pub promo_tool_id:      Option<RecordId>,
    pub promo_tool_code_id: Option<RecordId>,
    pub affiliate_id:       RecordId,
    pub merchant_id:        RecordId,
    pub timestamp:          DateTime<Utc>,
    pub terminated_at:      Option<DateTime<Utc>>,
    pub created_at:         DateTime<Utc>,
    pub updated_at:         DateTime<Utc>,
}

impl Lead {
    pub fn is_hold(&self) -> bool {
        self.status == LeadStatus::Hold
    }

    pub fn is_approved(&self) -> bool {
        self.status == LeadStatus::Approved
    }

    pub fn is_rejected(&self) -> bool {
        self.status == LeadStatus::Rejected
    }
}
