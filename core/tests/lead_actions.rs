//! Lead status machine: guards, re-pricing and the audit trail.

use leadtrack_core::{
    action_log::ActionLogEvent,
    engine::LeadEngine,
    error::LeadError,
    lead::{Lead, LeadStatus, UpdateAction},
    ledger::BASED_ON_LEAD,
    tracker_tasks::UpdateLeadRequest,
};
use rust_decimal_macros::dec;
use serde_json::json;

const MERCHANT_OWNER: i64 = 2;

// ── Test helpers ─────────────────────────────────────────────

fn make_engine() -> LeadEngine {
    LeadEngine::build_test().unwrap()
}

fn held_lead(engine: &LeadEngine, id: &str, tariff_id: i64) -> Lead {
    let mut body = json!({
        "id": id,
        "status": "hold",
        "timestamp": "2026-10-19",
        "ad_id": 1,
        "tariff_id": tariff_id,
    });
    if tariff_id != 2 {
        body["price"] = json!(20);
    }
    engine.ingest_postback(&body).unwrap()
}

fn event_count(engine: &LeadEngine, event_type: &str) -> usize {
    engine.store.events_of_type(event_type).unwrap().len()
}

fn request_update(engine: &LeadEngine, lead_id: i64, update_type: UpdateAction) {
    let request = UpdateLeadRequest {
        ids: vec![lead_id],
        update_type,
        price: Some(dec!(30)),
        merchant_amount: Some(dec!(30)),
        force: false,
    };
    engine.request_lead_update(&request, MERCHANT_OWNER).unwrap();
}

// ── Approve ──────────────────────────────────────────────────

/// Approve records the previous status and a termination time.
#[test]
fn approve_moves_hold_to_approved() {
    let engine = make_engine();
    let lead = held_lead(&engine, "act-approve", 1);
    let approved = engine.approve_lead(lead.id, MERCHANT_OWNER, None, None).unwrap();

    assert_eq!(approved.status, LeadStatus::Approved);
    assert_eq!(approved.prev_status, Some(LeadStatus::Hold));
    assert!(approved.terminated_at.is_some());
    assert_eq!(approved.merchant_payment, lead.merchant_payment);
    assert_eq!(engine.lead(lead.id).unwrap(), approved, "returned lead matches storage");
    assert_eq!(event_count(&engine, "lead_approved"), 1);

    let history = engine.store.action_logs_for(lead.id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(
        history[0].data,
        Some(json!({"status_before": "hold", "status_after": "approved"}))
    );
}

/// A second approve fails and leaves no trace.
#[test]
fn double_approve_is_rejected_without_side_effects() {
    let engine = make_engine();
    let lead = held_lead(&engine, "act-double", 1);
    engine.approve_lead(lead.id, MERCHANT_OWNER, None, None).unwrap();
    let ops = engine.store.operations_for(BASED_ON_LEAD, lead.id).unwrap().len();

    let err = engine.approve_lead(lead.id, MERCHANT_OWNER, None, None).unwrap_err();
    assert!(matches!(err, LeadError::BadLeadStatus(_)), "got {err:?}");
    assert_eq!(event_count(&engine, "lead_approved"), 1, "no second event");
    assert_eq!(engine.store.action_log_count(lead.id).unwrap(), 1, "no second log row");
    assert_eq!(engine.store.operations_for(BASED_ON_LEAD, lead.id).unwrap().len(), ops);
}

/// Manual approve with a new cost re-splits a percent lead.
#[test]
fn approve_with_new_payment_resplits() {
    let engine = make_engine();
    let lead = held_lead(&engine, "act-cost", 3);
    let approved = engine
        .approve_lead(lead.id, MERCHANT_OWNER, Some(dec!(40)), Some("renegotiated"))
        .unwrap();

    assert_eq!(approved.merchant_payment, 4000);
    assert_eq!(approved.network_profit, 420);
    assert_eq!(approved.affiliate_profit, 3580);

    let history = engine.store.action_logs_for(lead.id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].event, ActionLogEvent::CostChanged);
    assert_eq!(history[0].comment.as_deref(), Some("renegotiated"));
    assert_eq!(history[1].event, ActionLogEvent::Approve);
}

/// Pricing a lead that had no cost logs only the approval.
#[test]
fn approve_pricing_zero_cost_lead_logs_no_cost_change() {
    let engine = make_engine();
    let body = json!({
        "id": "act-zero",
        "status": "hold",
        "timestamp": "2026-10-19",
        "ad_id": 1,
        "tariff_id": 1,
        "price": 0,
    });
    let lead = engine.ingest_postback(&body).unwrap();
    assert_eq!(lead.merchant_payment, 0);

    let approved = engine
        .approve_lead(lead.id, MERCHANT_OWNER, Some(dec!(10)), Some("first price"))
        .unwrap();
    assert_eq!(approved.merchant_payment, 1000);

    let history = engine.store.action_logs_for(lead.id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].event, ActionLogEvent::Approve);
}

/// Fixed rates cannot be re-priced.
#[test]
fn approve_with_payment_on_fixed_rate_fails() {
    let engine = make_engine();
    let lead = held_lead(&engine, "act-fixed", 2);
    let err = engine
        .approve_lead(lead.id, MERCHANT_OWNER, Some(dec!(40)), None)
        .unwrap_err();

    assert!(matches!(err, LeadError::PaymentTypeNotPercent), "got {err:?}");
    assert_eq!(engine.lead(lead.id).unwrap().status, LeadStatus::Hold);
    assert_eq!(event_count(&engine, "lead_approved"), 0);
}

/// Affiliate overrides change the network's cut.
#[test]
fn approve_uses_affiliate_commission_override() {
    let engine = make_engine();
    let body = json!({
        "id": "act-override",
        "status": "hold",
        "timestamp": "2026-10-19",
        "ad_id": 2,
        "tariff_id": 1,
        "price": 10,
    });
    let lead = engine.ingest_postback(&body).unwrap();
    assert_eq!(lead.network_profit, 250, "affiliate 2 pays 25% on rate 1");

    let approved = engine
        .approve_lead(lead.id, MERCHANT_OWNER, Some(dec!(20)), None)
        .unwrap();
    assert_eq!((approved.affiliate_profit, approved.network_profit), (1500, 500));
}

// ── Reject ───────────────────────────────────────────────────

/// Reject stores the comment; a second reject fails.
#[test]
fn reject_then_double_reject() {
    let engine = make_engine();
    let lead = held_lead(&engine, "act-reject", 1);
    let rejected = engine.reject_lead(lead.id, MERCHANT_OWNER, "bot traffic").unwrap();

    assert_eq!(rejected.status, LeadStatus::Rejected);
    assert_eq!(rejected.reject_comment.as_deref(), Some("bot traffic"));

    let err = engine.reject_lead(lead.id, MERCHANT_OWNER, "again").unwrap_err();
    assert!(matches!(err, LeadError::BadLeadStatus(_)), "got {err:?}");
    assert_eq!(event_count(&engine, "lead_rejected"), 1);

    let history = engine.store.action_logs_for(lead.id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].event, ActionLogEvent::Reject);
    assert_eq!(history[0].comment.as_deref(), Some("bot traffic"));
}

/// Rejected leads can still be approved (re-entry is only guarded per state).
#[test]
fn rejected_lead_can_be_approved() {
    let engine = make_engine();
    let lead = held_lead(&engine, "act-reopen", 1);
    engine.reject_lead(lead.id, MERCHANT_OWNER, "mistake").unwrap();
    let approved = engine.approve_lead(lead.id, MERCHANT_OWNER, None, None).unwrap();
    assert_eq!(approved.prev_status, Some(LeadStatus::Rejected));
}

// ── Update ───────────────────────────────────────────────────

/// Update needs a pending update task.
#[test]
fn update_without_task_is_action_not_found() {
    let engine = make_engine();
    let lead = held_lead(&engine, "act-no-task", 1);
    let err = engine.update_lead(lead.id, MERCHANT_OWNER, Some(dec!(30))).unwrap_err();
    assert!(matches!(err, LeadError::ActionNotFound), "got {err:?}");
}

/// An approve task is not an update action.
#[test]
fn update_with_approve_task_is_action_not_found() {
    let engine = make_engine();
    let lead = held_lead(&engine, "act-approve-task", 1);
    engine.request_approve(&[lead.id], None, MERCHANT_OWNER, false).unwrap();
    let err = engine.update_lead(lead.id, MERCHANT_OWNER, Some(dec!(30))).unwrap_err();
    assert!(matches!(err, LeadError::ActionNotFound), "got {err:?}");
}

/// Rejected leads are terminal for payment edits.
#[test]
fn update_on_rejected_lead_fails() {
    let engine = make_engine();
    let lead = held_lead(&engine, "act-upd-rejected", 1);
    request_update(&engine, lead.id, UpdateAction::Percent);
    engine.reject_lead(lead.id, MERCHANT_OWNER, "nope").unwrap();

    let err = engine.update_lead(lead.id, MERCHANT_OWNER, Some(dec!(30))).unwrap_err();
    assert!(matches!(err, LeadError::BadLeadStatus(_)), "got {err:?}");
    assert_eq!(event_count(&engine, "lead_updated"), 0);
}

/// A failing listener rolls the whole action back.
#[test]
fn update_failure_in_ledger_rolls_back_lead() {
    let engine = make_engine();
    let lead = held_lead(&engine, "act-rollback", 1);
    request_update(&engine, lead.id, UpdateAction::Percent);

    // No approval yet, so the ledger has nothing to reverse.
    let err = engine.update_lead(lead.id, MERCHANT_OWNER, Some(dec!(30))).unwrap_err();
    assert!(matches!(err, LeadError::OperationNotFound { .. }), "got {err:?}");
    assert_eq!(engine.lead(lead.id).unwrap().merchant_payment, lead.merchant_payment);
    assert_eq!(event_count(&engine, "lead_updated"), 0);
    assert_eq!(engine.store.action_log_count(lead.id).unwrap(), 0);
}

/// Update logs the payment change against the merchant owner.
#[test]
fn update_logs_payment_change() {
    let engine = make_engine();
    let lead = held_lead(&engine, "act-upd-log", 1);
    engine.approve_lead(lead.id, MERCHANT_OWNER, None, None).unwrap();
    request_update(&engine, lead.id, UpdateAction::Percent);

    let updated = engine.update_lead(lead.id, 1, Some(dec!(30))).unwrap();
    assert_eq!(updated.merchant_payment, 3000);

    let history = engine.store.action_logs_for(lead.id).unwrap();
    assert_eq!(history[0].event, ActionLogEvent::Update(UpdateAction::Percent));
    assert_eq!(history[0].user_id, Some(MERCHANT_OWNER));
    assert_eq!(
        history[0].data,
        Some(json!({"payment_before": "20.00", "payment_after": "30.00"}))
    );
}
