//! Ledger projections of lead events.
//!
//! Every operation for a lead moves money between four accounts, scoped
//! by the offer's currency and network:
//!
//!   forward (lead_approved)        reverse (lead_rejected)
//!     merchant → system              system → merchant
//!     system   → affiliate           affiliate → system
//!     system   → network             network → system
//!
//! The system account is a pass-through: a forward operation whose split
//! conserves the merchant payment leaves its balance unchanged.

use crate::{
    error::{LeadError, LeadResult},
    event::LeadEvent,
    lead::Lead,
    ledger::{
        last_lead_operation, resolve_account, AccountId, AccountOwner, LedgerTransaction,
        Operation, OperationId, OperationType, OwnerType, BASED_ON_LEAD,
    },
    listener::LeadListener,
    offer_rate::LeadRewards,
    store::LeadStore,
    types::{Currency, LeadId},
};

/// The four accounts a lead's money flows through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadAccounts {
    pub system:    AccountId,
    pub merchant:  AccountId,
    pub affiliate: AccountId,
    pub network:   AccountId,
    pub currency:  Currency,
}

impl LeadAccounts {
    /// Resolve (creating lazily) the accounts for a lead.
    pub fn resolve(store: &LeadStore, lead: &Lead) -> LeadResult<Self> {
        let rate = store
            .offer_rate(lead.offer_rate_id)?
            .ok_or_else(|| LeadError::not_found("offer rate", lead.offer_rate_id))?;
        let offer = store
            .offer(rate.offer_id)?
            .ok_or_else(|| LeadError::not_found("offer", rate.offer_id))?;
        let campaign = store
            .campaign(lead.campaign_id)?
            .ok_or_else(|| LeadError::not_found("campaign", lead.campaign_id))?;

        let currency = offer.currency.clone();
        Ok(Self {
            system: resolve_account(store, AccountOwner::System, 0, &currency)?,
            merchant: resolve_account(
                store,
                AccountOwner::Merchant(offer.merchant_id),
                offer.network_id,
                &currency,
            )?,
            affiliate: resolve_account(
                store,
                AccountOwner::Affiliate(campaign.affiliate_id),
                offer.network_id,
                &currency,
            )?,
            network: resolve_account(
                store,
                AccountOwner::Network(offer.network_id),
                offer.network_id,
                &currency,
            )?,
            currency,
        })
    }
}

/// Write one operation with its three transactions and mark it processed.
fn record_operation(
    store: &LeadStore,
    lead_id: LeadId,
    accounts: &LeadAccounts,
    op_type: OperationType,
    amounts: LeadRewards,
    reverse: bool,
) -> LeadResult<OperationId> {
    let op = store.insert_operation(BASED_ON_LEAD, lead_id, op_type)?;
    let currency = accounts.currency.as_str();

    if !reverse {
        store.insert_transaction(op, accounts.merchant, accounts.system, amounts.merchant_payment, currency)?;
        store.insert_transaction(op, accounts.system, accounts.affiliate, amounts.affiliate_profit, currency)?;
        store.insert_transaction(op, accounts.system, accounts.network, amounts.network_profit, currency)?;
    } else {
        store.insert_transaction(op, accounts.system, accounts.merchant, amounts.merchant_payment, currency)?;
        store.insert_transaction(op, accounts.affiliate, accounts.system, amounts.affiliate_profit, currency)?;
        store.insert_transaction(op, accounts.network, accounts.system, amounts.network_profit, currency)?;
    }

    store.mark_operation_processed(op, accounts.merchant, accounts.affiliate)?;
    log::debug!(
        "Lead {lead_id}: {} operation {op} merchant={} affiliate={} network={}",
        op_type.as_str(),
        amounts.merchant_payment,
        amounts.affiliate_profit,
        amounts.network_profit
    );
    Ok(op)
}

/// Recover the split a forward operation moved, from its transactions.
pub fn amounts_of_operation(transactions: &[LedgerTransaction]) -> LeadRewards {
    let mut amounts = LeadRewards {
        merchant_payment: 0,
        affiliate_profit: 0,
        network_profit: 0,
    };
    for t in transactions {
        match (t.from_owner, t.to_owner) {
            (OwnerType::Merchant, OwnerType::System)  => amounts.merchant_payment = t.sum,
            (OwnerType::System, OwnerType::Affiliate) => amounts.affiliate_profit = t.sum,
            (OwnerType::System, OwnerType::Network)   => amounts.network_profit = t.sum,
            _ => {}
        }
    }
    amounts
}

fn current_amounts(lead: &Lead) -> LeadRewards {
    LeadRewards {
        merchant_payment: lead.merchant_payment,
        affiliate_profit: lead.affiliate_profit,
        network_profit: lead.network_profit,
    }
}

fn load_lead(store: &LeadStore, lead_id: LeadId) -> LeadResult<Lead> {
    store
        .lead(lead_id)?
        .ok_or_else(|| LeadError::not_found("lead", lead_id))
}

/// Undo a forward operation with a mirrored lead_rejected operation.
fn reverse_operation(
    store: &LeadStore,
    lead_id: LeadId,
    accounts: &LeadAccounts,
    last: &Operation,
) -> LeadResult<OperationId> {
    let previous = amounts_of_operation(&store.operation_transactions(last.id)?);
    record_operation(store, lead_id, accounts, OperationType::LeadRejected, previous, true)
}

// ── Approve ────────────────────────────────────────────────────

/// LeadApproved → one forward operation with the lead's current split.
pub struct LeadApproveMoneyTransactionsListener;

impl LeadListener for LeadApproveMoneyTransactionsListener {
    fn name(&self) -> &'static str {
        "approve_money"
    }

    fn handle(&self, store: &LeadStore, event: &LeadEvent) -> LeadResult<()> {
        let LeadEvent::LeadApproved { lead_id, .. } = event else {
            return Ok(());
        };
        let lead = load_lead(store, *lead_id)?;
        store.atomic(|store| {
            let accounts = LeadAccounts::resolve(store, &lead)?;
            record_operation(store, lead.id, &accounts, OperationType::LeadApproved, current_amounts(&lead), false)?;
            Ok(())
        })
    }
}

// ── Reject ─────────────────────────────────────────────────────

/// LeadRejected → reverse the last forward operation, if there is one.
///
/// Rejecting from hold moved no money, so there is nothing to undo.
pub struct LeadRejectMoneyTransactionsListener;

impl LeadListener for LeadRejectMoneyTransactionsListener {
    fn name(&self) -> &'static str {
        "reject_money"
    }

    fn handle(&self, store: &LeadStore, event: &LeadEvent) -> LeadResult<()> {
        let LeadEvent::LeadRejected { lead_id, .. } = event else {
            return Ok(());
        };
        let last = match last_lead_operation(store, *lead_id)? {
            Some(op) if op.op_type == OperationType::LeadApproved => op,
            _ => {
                log::debug!("Lead {lead_id}: rejected with no approved money to reverse");
                return Ok(());
            }
        };
        let lead = load_lead(store, *lead_id)?;
        store.atomic(|store| {
            let accounts = LeadAccounts::resolve(store, &lead)?;
            reverse_operation(store, lead.id, &accounts, &last)?;
            Ok(())
        })
    }
}

// ── Update ─────────────────────────────────────────────────────

/// LeadUpdated → reverse the last forward operation, then reapply the
/// lead's current split. Both operations commit together or not at all.
pub struct LeadUpdateMoneyTransactionsListener;

impl LeadListener for LeadUpdateMoneyTransactionsListener {
    fn name(&self) -> &'static str {
        "update_money"
    }

    fn handle(&self, store: &LeadStore, event: &LeadEvent) -> LeadResult<()> {
        let LeadEvent::LeadUpdated { lead_id, .. } = event else {
            return Ok(());
        };
        let last = last_lead_operation(store, *lead_id)?
            .ok_or(LeadError::OperationNotFound { lead_id: *lead_id })?;

        // A reversal on top of a reversal means an approval is missing.
        if last.op_type == OperationType::LeadRejected {
            log::error!("Lead {lead_id}: last operation {} is already a reversal", last.id);
            return Err(LeadError::WrongOperationState { lead_id: *lead_id });
        }

        let lead = load_lead(store, *lead_id)?;
        store.atomic(|store| {
            let accounts = LeadAccounts::resolve(store, &lead)?;
            reverse_operation(store, lead.id, &accounts, &last)?;
            record_operation(store, lead.id, &accounts, OperationType::LeadApproved, current_amounts(&lead), false)?;
            Ok(())
        })
    }
}
