//! Ledger primitives: accounts, operations and transactions.
//!
//! An Operation groups the transactions of one business event. Both are
//! immutable once written; corrections are new operations. An account's
//! balance is incoming minus outgoing transactions in its currency.

use crate::{
    error::LeadResult,
    store::LeadStore,
    types::{Currency, LeadId, Minor, RecordId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type AccountId = i64;
pub type OperationId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerType {
    System,
    Merchant,
    Affiliate,
    Network,
}

impl OwnerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerType::System    => "system",
            OwnerType::Merchant  => "merchant",
            OwnerType::Affiliate => "affiliate",
            OwnerType::Network   => "network",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system"    => Some(OwnerType::System),
            "merchant"  => Some(OwnerType::Merchant),
            "affiliate" => Some(OwnerType::Affiliate),
            "network"   => Some(OwnerType::Network),
            _           => None,
        }
    }
}

/// Who holds an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountOwner {
    System,
    Merchant(RecordId),
    Affiliate(RecordId),
    Network(RecordId),
}

impl AccountOwner {
    pub fn owner_type(&self) -> OwnerType {
        match self {
            AccountOwner::System       => OwnerType::System,
            AccountOwner::Merchant(_)  => OwnerType::Merchant,
            AccountOwner::Affiliate(_) => OwnerType::Affiliate,
            AccountOwner::Network(_)   => OwnerType::Network,
        }
    }

    /// 0 stands for "no owner record" (the system account).
    pub fn owner_id(&self) -> RecordId {
        match self {
            AccountOwner::System => 0,
            AccountOwner::Merchant(id)
            | AccountOwner::Affiliate(id)
            | AccountOwner::Network(id) => *id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    LeadApproved,
    LeadRejected,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::LeadApproved => "lead_approved",
            OperationType::LeadRejected => "lead_rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lead_approved" => Some(OperationType::LeadApproved),
            "lead_rejected" => Some(OperationType::LeadRejected),
            _               => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    New,
    Processed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::New       => "new",
            OperationStatus::Processed => "processed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new"       => Some(OperationStatus::New),
            "processed" => Some(OperationStatus::Processed),
            _           => None,
        }
    }
}

/// What an operation is based on. Leads are the only source today.
pub const BASED_ON_LEAD: &str = "lead";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    pub id:         AccountId,
    pub owner_type: OwnerType,
    pub owner_id:   RecordId,
    pub network_id: RecordId,
    pub currency:   Currency,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Operation {
    pub id:            OperationId,
    pub based_on_type: String,
    pub based_on_id:   i64,
    pub op_type:       OperationType,
    pub status:        OperationStatus,
    pub account_from:  Option<AccountId>,
    pub account_to:    Option<AccountId>,
    pub created_at:    DateTime<Utc>,
}

/// A transaction joined with the owner types of both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerTransaction {
    pub id:           i64,
    pub operation_id: OperationId,
    pub account_from: AccountId,
    pub account_to:   AccountId,
    pub from_owner:   OwnerType,
    pub to_owner:     OwnerType,
    pub sum:          Minor,
    pub currency:     Currency,
}

/// Account key for an owner. Only non-system owners are scoped by network.
fn account_key(owner: AccountOwner, network_id: RecordId) -> (AccountOwner, RecordId) {
    match owner {
        AccountOwner::System => (owner, 0),
        _ => (owner, network_id),
    }
}

/// Look up or lazily create the account for (owner, network, currency).
pub fn resolve_account(
    store: &LeadStore,
    owner: AccountOwner,
    network_id: RecordId,
    currency: &str,
) -> LeadResult<AccountId> {
    let (owner, network_id) = account_key(owner, network_id);
    store.find_or_create_account(owner, network_id, currency)
}

/// Current balance; an account that was never used has balance 0.
pub fn balance(
    store: &LeadStore,
    owner: AccountOwner,
    network_id: RecordId,
    currency: &str,
) -> LeadResult<Minor> {
    let (owner, network_id) = account_key(owner, network_id);
    match store.find_account(owner, network_id, currency)? {
        Some(account) => store.account_balance(account.id),
        None => Ok(0),
    }
}

/// Most recent ledger operation recorded for a lead.
pub fn last_lead_operation(store: &LeadStore, lead_id: LeadId) -> LeadResult<Option<Operation>> {
    store.last_operation(BASED_ON_LEAD, lead_id)
}
