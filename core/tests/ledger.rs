//! Ledger projection tests: approve, reject and the reverse-then-reapply update.

use leadtrack_core::{
    engine::LeadEngine,
    error::LeadError,
    lead::{Lead, UpdateAction},
    ledger::{last_lead_operation, AccountOwner, OperationStatus, OperationType, BASED_ON_LEAD},
    money_transactions::{amounts_of_operation, LeadAccounts},
    tracker_tasks::UpdateLeadRequest,
};
use rust_decimal_macros::dec;
use serde_json::{json, Value};

const MERCHANT_OWNER: i64 = 2;

// ── Test helpers ─────────────────────────────────────────────

fn make_engine() -> LeadEngine {
    LeadEngine::build_test().unwrap()
}

fn hold_postback(id: &str, tariff_id: i64, price: Value) -> Value {
    json!({
        "id": id,
        "status": "hold",
        "timestamp": "Oct 19, 2026",
        "ad_id": 1,
        "tariff_id": tariff_id,
        "price": price,
    })
}

/// A held lead on the 10.5% rate priced at 20.00 (17.90 / 2.10).
fn held_lead(engine: &LeadEngine, id: &str) -> Lead {
    engine.ingest_postback(&hold_postback(id, 3, json!(20))).unwrap()
}

fn balance(engine: &LeadEngine, owner: AccountOwner) -> i64 {
    engine.account_balance(owner, 1, "USD").unwrap()
}

fn request_fixed_update(engine: &LeadEngine, lead_id: i64) {
    let request = UpdateLeadRequest {
        ids: vec![lead_id],
        update_type: UpdateAction::Fixed,
        price: None,
        merchant_amount: Some(dec!(22)),
        force: true,
    };
    engine
        .request_lead_update(&request, MERCHANT_OWNER)
        .unwrap()
        .expect("task should be created");
}

// ── Approve ──────────────────────────────────────────────────

/// Approval moves the merchant payment through the system account.
#[test]
fn approve_projects_forward_operation() {
    let engine = make_engine();
    let lead = held_lead(&engine, "ledger-approve");
    assert_eq!(
        (lead.merchant_payment, lead.affiliate_profit, lead.network_profit),
        (2000, 1790, 210)
    );

    engine.approve_lead(lead.id, MERCHANT_OWNER, None, None).unwrap();

    assert_eq!(balance(&engine, AccountOwner::Merchant(1)), -2000);
    assert_eq!(balance(&engine, AccountOwner::Affiliate(1)), 1790);
    assert_eq!(balance(&engine, AccountOwner::Network(1)), 210);
    assert_eq!(balance(&engine, AccountOwner::System), 0, "system account is a pass-through");

    let op = last_lead_operation(&engine.store, lead.id).unwrap().unwrap();
    assert_eq!(op.op_type, OperationType::LeadApproved);
    assert_eq!(op.status, OperationStatus::Processed);

    let accounts = LeadAccounts::resolve(&engine.store, &lead).unwrap();
    assert_eq!(op.account_from, Some(accounts.merchant));
    assert_eq!(op.account_to, Some(accounts.affiliate));

    let amounts = amounts_of_operation(&engine.store.operation_transactions(op.id).unwrap());
    assert_eq!(amounts.merchant_payment, 2000);
    assert_eq!(amounts.affiliate_profit, 1790);
    assert_eq!(amounts.network_profit, 210);
}

/// Accounts are created once per (owner, network, currency).
#[test]
fn accounts_are_created_lazily_and_reused() {
    let engine = make_engine();
    assert_eq!(engine.store.account_count().unwrap(), 0);

    let first = held_lead(&engine, "ledger-acc-1");
    let second = held_lead(&engine, "ledger-acc-2");
    engine.approve_lead(first.id, MERCHANT_OWNER, None, None).unwrap();
    engine.approve_lead(second.id, MERCHANT_OWNER, None, None).unwrap();

    assert_eq!(engine.store.account_count().unwrap(), 4);
    assert_eq!(
        LeadAccounts::resolve(&engine.store, &first).unwrap(),
        LeadAccounts::resolve(&engine.store, &second).unwrap()
    );
}

// ── Reject ───────────────────────────────────────────────────

/// Rejecting an approved lead reverses exactly what the approval moved.
#[test]
fn reject_after_approve_restores_balances() {
    let engine = make_engine();
    let lead = held_lead(&engine, "ledger-reject");
    engine.approve_lead(lead.id, MERCHANT_OWNER, None, None).unwrap();
    engine.reject_lead(lead.id, MERCHANT_OWNER, "fraud").unwrap();

    for owner in [
        AccountOwner::System,
        AccountOwner::Merchant(1),
        AccountOwner::Affiliate(1),
        AccountOwner::Network(1),
    ] {
        assert_eq!(balance(&engine, owner), 0, "{owner:?} should be back to zero");
    }
    let op = last_lead_operation(&engine.store, lead.id).unwrap().unwrap();
    assert_eq!(op.op_type, OperationType::LeadRejected);
}

/// Rejecting a held lead moves no money.
#[test]
fn reject_from_hold_writes_no_operation() {
    let engine = make_engine();
    let lead = held_lead(&engine, "ledger-reject-hold");
    engine.reject_lead(lead.id, MERCHANT_OWNER, "duplicate").unwrap();

    assert!(engine.store.operations_for(BASED_ON_LEAD, lead.id).unwrap().is_empty());
    assert_eq!(engine.store.account_count().unwrap(), 0);
}

// ── Update ───────────────────────────────────────────────────

/// Reverse-then-reapply leaves only the new amounts on the books.
#[test]
fn update_reverses_previous_operation_and_reapplies() {
    let engine = make_engine();
    let lead = held_lead(&engine, "ledger-update");
    engine.approve_lead(lead.id, MERCHANT_OWNER, None, None).unwrap();
    request_fixed_update(&engine, lead.id);

    // The split is edited directly; the update replays it into the ledger.
    let mut edited = engine.lead(lead.id).unwrap();
    edited.merchant_payment = 2200;
    edited.affiliate_profit = 1280;
    edited.network_profit = 330;
    engine.store.save_lead(&edited).unwrap();

    engine.update_lead(lead.id, MERCHANT_OWNER, None).unwrap();

    assert_eq!(balance(&engine, AccountOwner::System), 590);
    assert_eq!(balance(&engine, AccountOwner::Merchant(1)), -2200);
    assert_eq!(balance(&engine, AccountOwner::Affiliate(1)), 1280);
    assert_eq!(balance(&engine, AccountOwner::Network(1)), 330);

    let accounts = LeadAccounts::resolve(&engine.store, &edited).unwrap();
    let counts = |id| engine.store.account_transaction_counts(id).unwrap();
    assert_eq!(counts(accounts.system), (4, 5), "system (to, from)");
    assert_eq!(counts(accounts.merchant), (1, 2), "merchant (to, from)");
    assert_eq!(counts(accounts.affiliate), (2, 1), "affiliate (to, from)");
    assert_eq!(counts(accounts.network), (2, 1), "network (to, from)");

    let ops = engine.store.operations_for(BASED_ON_LEAD, lead.id).unwrap();
    let types: Vec<OperationType> = ops.iter().map(|op| op.op_type).collect();
    assert_eq!(
        types,
        vec![OperationType::LeadApproved, OperationType::LeadRejected, OperationType::LeadApproved]
    );
}

/// Update on a lead whose last operation is a reversal is a ledger fault.
#[test]
fn update_after_reversal_fails_and_rolls_back() {
    let engine = make_engine();
    let lead = held_lead(&engine, "ledger-wrong-state");
    engine.approve_lead(lead.id, MERCHANT_OWNER, None, None).unwrap();
    request_fixed_update(&engine, lead.id);

    // Rewind the lead to approved by hand after a reject reversed its money.
    let actions = engine.actions();
    let mut current = engine.lead(lead.id).unwrap();
    actions.reject(&mut current, MERCHANT_OWNER, "mistake").unwrap();
    current.status = leadtrack_core::lead::LeadStatus::Approved;
    engine.store.save_lead(&current).unwrap();
    let ops_before = engine.store.operations_for(BASED_ON_LEAD, lead.id).unwrap().len();

    let err = engine.update_lead(lead.id, MERCHANT_OWNER, None).unwrap_err();
    assert!(
        matches!(err, LeadError::WrongOperationState { lead_id } if lead_id == lead.id),
        "expected WrongOperationState, got {err:?}"
    );
    assert_eq!(
        engine.store.operations_for(BASED_ON_LEAD, lead.id).unwrap().len(),
        ops_before,
        "no partial operation may survive"
    );
}

/// Update without any ledger history has nothing to reverse.
#[test]
fn update_without_operation_fails() {
    let engine = make_engine();
    let lead = held_lead(&engine, "ledger-no-op");
    request_fixed_update(&engine, lead.id);

    let err = engine.update_lead(lead.id, MERCHANT_OWNER, None).unwrap_err();
    assert!(matches!(err, LeadError::OperationNotFound { .. }), "got {err:?}");
}
