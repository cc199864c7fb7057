//! Tracker tasks and the replay worker.

use leadtrack_core::{
    config::LeadConfig,
    engine::LeadEngine,
    error::{LeadError, TrackerError},
    lead::{Lead, LeadAction, UpdateAction},
    store::LeadStore,
    tracker_api::RecordingTrackerApi,
    tracker_jobs::{TrackerJob, TrackerWorker},
    tracker_tasks::{PivotStatus, TaskStatus, UpdateLeadRequest},
};
use chrono::Utc;
use rust_decimal_macros::dec;
use serde_json::json;

const MERCHANT_OWNER: i64 = 2;

// ── Test helpers ─────────────────────────────────────────────

fn make_engine() -> LeadEngine {
    let _ = env_logger::builder().is_test(true).try_init();
    LeadEngine::build_test().unwrap()
}

fn lead_with_status(engine: &LeadEngine, id: &str, status: &str) -> Lead {
    engine
        .ingest_postback(&json!({
            "id": id,
            "status": status,
            "timestamp": "2026-10-19",
            "ad_id": 1,
            "tariff_id": 1,
            "price": 20,
        }))
        .unwrap()
}

fn percent_update(ids: Vec<i64>, force: bool) -> UpdateLeadRequest {
    UpdateLeadRequest {
        ids,
        update_type: UpdateAction::Percent,
        price: Some(dec!(50)),
        merchant_amount: None,
        force,
    }
}

// ── Task creation ────────────────────────────────────────────

/// Task creation writes the task, pending pivots and a send-task job.
#[test]
fn create_task_tracks_leads_and_queues_send_job() {
    let engine = make_engine();
    let a = lead_with_status(&engine, "task-a", "hold");
    let b = lead_with_status(&engine, "task-b", "hold");

    let task = engine
        .request_approve(&[b.id, a.id, b.id], Some(dec!(15)), MERCHANT_OWNER, true)
        .unwrap()
        .unwrap();

    assert_eq!(task.ids, vec![a.id, b.id], "ids are sorted and deduplicated");
    assert_eq!(task.action, LeadAction::Approve);
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.params, json!({"cost": 15.0}));

    let pivots = engine.store.pivots_for_task(task.id).unwrap();
    assert_eq!(pivots.len(), 2);
    assert!(pivots.iter().all(|p| p.status == PivotStatus::Pending));

    let queued = engine.store.jobs_with_status("queued").unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].queue, "tracker", "forced tasks use the fast queue");
    let job: TrackerJob = serde_json::from_str(&queued[0].payload).unwrap();
    assert_eq!(job, TrackerJob::SendTaskLeads { task_id: task.id });
    assert_eq!(engine.store.events_of_type("tracker_task_created").unwrap().len(), 1);
}

/// Leads already tracked are filtered out; nothing left means no task.
#[test]
fn tracked_leads_are_not_tracked_twice() {
    let engine = make_engine();
    let a = lead_with_status(&engine, "twice-a", "approved");
    let b = lead_with_status(&engine, "twice-b", "approved");

    engine.request_lead_update(&percent_update(vec![a.id], false), MERCHANT_OWNER).unwrap();
    let second = engine
        .request_lead_update(&percent_update(vec![a.id, b.id], false), MERCHANT_OWNER)
        .unwrap()
        .unwrap();
    assert_eq!(second.ids, vec![b.id]);

    let none = engine
        .request_lead_update(&percent_update(vec![a.id, b.id], false), MERCHANT_OWNER)
        .unwrap();
    assert!(none.is_none());
}

/// Update requests need the amount their type re-prices by.
#[test]
fn update_request_validation() {
    let engine = make_engine();
    let lead = lead_with_status(&engine, "req-invalid", "approved");

    let mut request = percent_update(vec![lead.id], false);
    request.price = None;
    let err = engine.request_lead_update(&request, MERCHANT_OWNER).unwrap_err();
    assert!(matches!(&err, LeadError::Validation(e) if e.has("price")), "got {err:?}");

    let request = UpdateLeadRequest {
        ids: vec![lead.id],
        update_type: UpdateAction::Fixed,
        price: None,
        merchant_amount: Some(dec!(0.001)),
        force: false,
    };
    let err = engine.request_lead_update(&request, MERCHANT_OWNER).unwrap_err();
    assert!(matches!(&err, LeadError::Validation(e) if e.has("merchant_amount")), "got {err:?}");

    let request = UpdateLeadRequest {
        ids: vec![lead.id],
        update_type: UpdateAction::Retariffication,
        price: None,
        merchant_amount: None,
        force: false,
    };
    assert!(engine.request_lead_update(&request, MERCHANT_OWNER).unwrap().is_some());
}

// ── Worker ───────────────────────────────────────────────────

/// Approve tasks skip leads already approved and send the rest.
#[test]
fn send_task_skips_leads_already_in_target_status() {
    let engine = make_engine();
    let held = lead_with_status(&engine, "send-held", "hold");
    let approved = lead_with_status(&engine, "send-approved", "approved");
    let task = engine
        .request_approve(&[held.id, approved.id], None, MERCHANT_OWNER, false)
        .unwrap()
        .unwrap();

    let api = RecordingTrackerApi::new();
    let report = engine.run_tracker_jobs(&api).unwrap();
    assert_eq!(report.processed, 2, "send-task job plus one lead job");

    let requests = api.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "leads.approve");
    assert_eq!(requests[0].params, json!({"id": "send-held", "force": true}));

    assert!(engine.store.pivot_for_lead(approved.id).unwrap().is_none(), "skipped pivot removed");
    let pivot = engine.store.pivot_for_lead(held.id).unwrap().unwrap();
    assert_eq!(pivot.status, PivotStatus::Waiting);
    assert_eq!(engine.store.tracker_task(task.id).unwrap().unwrap().status, TaskStatus::Waiting);

    // The tracker answers with a postback; the action lands and closes the task.
    engine
        .ingest_postback(&json!({
            "id": "send-held",
            "status": "approved",
            "timestamp": "2026-10-19",
            "ad_id": 1,
            "tariff_id": 1,
            "price": 20,
        }))
        .unwrap();
    assert!(engine.store.pivot_for_lead(held.id).unwrap().is_none());
    assert_eq!(engine.store.tracker_task(task.id).unwrap().unwrap().status, TaskStatus::Done);
}

/// A task whose every lead is skipped is done straight away.
#[test]
fn send_task_with_nothing_to_do_is_done() {
    let engine = make_engine();
    let rejected = lead_with_status(&engine, "send-rejected", "rejected");
    let task = engine
        .request_reject(&[rejected.id], Some("cleanup"), MERCHANT_OWNER, false)
        .unwrap()
        .unwrap();

    let api = RecordingTrackerApi::new();
    engine.run_tracker_jobs(&api).unwrap();

    assert!(api.requests().is_empty());
    assert_eq!(engine.store.tracker_task(task.id).unwrap().unwrap().status, TaskStatus::Done);
    assert_eq!(engine.store.pivot_count_for_task(task.id).unwrap(), 0);
}

/// Update jobs carry the task's amounts in the method's param shape.
#[test]
fn update_jobs_use_method_specific_params() {
    let engine = make_engine();
    let percent = lead_with_status(&engine, "upd-percent", "approved");
    let fixed = lead_with_status(&engine, "upd-fixed", "approved");
    let retariff = lead_with_status(&engine, "upd-retariff", "approved");

    engine.request_lead_update(&percent_update(vec![percent.id], true), MERCHANT_OWNER).unwrap();
    let fixed_request = UpdateLeadRequest {
        ids: vec![fixed.id],
        update_type: UpdateAction::Fixed,
        price: None,
        merchant_amount: Some(dec!(12.5)),
        force: true,
    };
    engine.request_lead_update(&fixed_request, MERCHANT_OWNER).unwrap();
    let retariff_request = UpdateLeadRequest {
        ids: vec![retariff.id],
        update_type: UpdateAction::Retariffication,
        price: None,
        merchant_amount: None,
        force: true,
    };
    engine.request_lead_update(&retariff_request, MERCHANT_OWNER).unwrap();

    let api = RecordingTrackerApi::new();
    engine.run_tracker_jobs(&api).unwrap();

    let requests = api.requests();
    let find = |method: &str| {
        requests
            .iter()
            .find(|r| r.method == method)
            .unwrap_or_else(|| panic!("no {method} call in {requests:?}"))
            .params
            .clone()
    };
    assert_eq!(find("leads.update.percent"), json!({"id": "upd-percent", "price": 50.0, "force": true}));
    assert_eq!(
        find("leads.update.fixed"),
        json!({"id": "upd-fixed", "merchant_amount": 12.5, "force": true})
    );
    assert_eq!(find("leads.update.retariffication"), json!({"id": "upd-retariff"}));
}

/// Failures retry until max attempts, then land on the pivot notice.
#[test]
fn failing_tracker_call_records_notice_after_retries() {
    let engine = make_engine();
    let lead = lead_with_status(&engine, "fail-lead", "hold");
    engine.request_reject(&[lead.id], None, MERCHANT_OWNER, true).unwrap();

    let api = RecordingTrackerApi::new();
    api.fail_with(Some(TrackerError::Rejected {
        method: "leads.reject".into(),
        message: "lead is locked".into(),
    }));

    let worker = TrackerWorker::new(&engine.store, &api, &engine.config.jobs);
    let first = worker.run_pending_at(Utc::now().timestamp()).unwrap();
    assert_eq!(first.processed, 1, "send-task job succeeds");
    assert_eq!(first.failed, 1, "lead job exhausts retries within the batch");
    assert_eq!(first.retried, 2);
    assert_eq!(api.requests().len(), 3, "one call per attempt");

    let pivot = engine.store.pivot_for_lead(lead.id).unwrap().unwrap();
    assert_eq!(
        pivot.notice.as_deref(),
        Some("Tracker rejected leads.reject: lead is locked")
    );
    let failed = engine.store.jobs_with_status("failed").unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].attempts, 3);
}

/// Retries wait for their back-off before running again.
#[test]
fn retry_waits_for_backoff() {
    let engine = make_engine();
    let mut jobs = engine.config.jobs.clone();
    jobs.retry_delay_secs = 60;
    let lead = lead_with_status(&engine, "backoff-lead", "hold");
    engine.request_reject(&[lead.id], None, MERCHANT_OWNER, true).unwrap();

    let api = RecordingTrackerApi::new();
    api.fail_with(Some(TrackerError::Status { status: 503 }));
    let worker = TrackerWorker::new(&engine.store, &api, &jobs);

    let now = Utc::now().timestamp();
    let report = worker.run_pending_at(now).unwrap();
    assert_eq!((report.processed, report.retried, report.failed), (1, 1, 0));
    assert!(worker.run_pending_at(now + 30).unwrap().is_idle(), "not due yet");

    api.fail_with(None);
    let report = worker.run_pending_at(now + 60).unwrap();
    assert_eq!(report.processed, 1);
    assert!(engine.store.pivot_for_lead(lead.id).unwrap().unwrap().notice.is_none());
}

/// A job left running by a dead worker is claimed again once its lease runs out.
#[test]
fn stale_running_job_is_reclaimed_after_lease() {
    let engine = make_engine();
    let jobs = engine.config.jobs.clone();
    let lead = lead_with_status(&engine, "lease-lead", "hold");
    engine.request_reject(&[lead.id], None, MERCHANT_OWNER, true).unwrap();

    let now = Utc::now().timestamp();
    let abandoned = engine.store.claim_next_job(now, jobs.lease_secs).unwrap().unwrap();
    assert_eq!(abandoned.attempts, 1);

    let api = RecordingTrackerApi::new();
    let worker = TrackerWorker::new(&engine.store, &api, &jobs);
    assert!(worker.run_pending_at(now).unwrap().is_idle(), "lease still held");

    let report = worker.run_pending_at(now + jobs.lease_secs).unwrap();
    assert_eq!(report.processed, 2, "task fan-out and the reject it queued");
    assert!(engine.store.jobs_with_status("running").unwrap().is_empty());
    let done = engine.store.jobs_with_status("done").unwrap();
    assert_eq!(done.iter().find(|job| job.id == abandoned.id).unwrap().attempts, 2);
    assert_eq!(api.requests().len(), 1);
}

/// A storage failure mid-job hands the job back to the queue instead of
/// leaving it running.
#[test]
fn storage_failure_requeues_claimed_job() {
    let _ = env_logger::builder().is_test(true).try_init();
    let path = std::env::temp_dir().join(format!("leadtrack-{}.db", uuid::Uuid::new_v4()));
    let path_str = path.to_str().unwrap().to_string();
    let engine =
        LeadEngine::with_config(LeadStore::open(&path_str).unwrap(), LeadConfig::default_test()).unwrap();
    let mut jobs = engine.config.jobs.clone();
    jobs.batch_size = 1;

    let lead = lead_with_status(&engine, "storage-lead", "hold");
    engine.request_reject(&[lead.id], None, MERCHANT_OWNER, true).unwrap();
    let api = RecordingTrackerApi::new();
    let worker = TrackerWorker::new(&engine.store, &api, &jobs);
    let now = Utc::now().timestamp();
    assert_eq!(worker.run_pending_at(now).unwrap().processed, 1, "task fan-out");

    let side = rusqlite::Connection::open(&path).unwrap();
    side.execute_batch(
        "CREATE TRIGGER block_done BEFORE UPDATE OF status ON tracker_job
         WHEN NEW.status = 'done'
         BEGIN SELECT RAISE(ABORT, 'disk unavailable'); END;",
    )
    .unwrap();

    let err = worker.run_pending_at(now).unwrap_err();
    assert!(err.is_persistence(), "got {err:?}");
    assert!(engine.store.jobs_with_status("running").unwrap().is_empty());
    let queued = engine.store.jobs_with_status("queued").unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].attempts, 1);
    assert!(queued[0].last_error.as_deref().unwrap().contains("disk unavailable"));

    side.execute_batch("DROP TRIGGER block_done;").unwrap();
    assert_eq!(worker.run_pending_at(now).unwrap().processed, 1);
    assert!(engine.store.jobs_with_status("queued").unwrap().is_empty());
    assert_eq!(api.requests().len(), 2, "the interrupted send is replayed");

    drop(worker);
    drop(side);
    drop(engine);
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{path_str}{suffix}"));
    }
}
