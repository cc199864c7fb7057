//! Durable replay of tracker tasks.
//!
//! RULE: No database transaction is held across a tracker API call. The
//! worker claims a job in its own short transaction, calls the tracker,
//! then records the outcome in another.
//!
//! EXECUTION ORDER per task:
//!   1. TrackerTaskCreated → send-task job queued (TaskDispatchListener)
//!   2. send-task job → one lead job per tracked lead, pivots → waiting
//!   3. lead job → tracker API call; the tracker answers with a postback
//!      which lands the action and closes the pivot

use crate::{
    config::JobsConfig,
    error::{LeadError, LeadResult},
    event::LeadEvent,
    lead::{Lead, LeadAction, UpdateAction},
    listener::LeadListener,
    money::decimal_to_json,
    store::{JobRow, LeadStore},
    tracker_api::TrackerApi,
    tracker_tasks::{PivotStatus, TaskStatus},
    types::LeadId,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobQueue {
    /// Forced tasks, drained first.
    Tracker,
    Sequence,
}

impl JobQueue {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobQueue::Tracker => "tracker",
            JobQueue::Sequence => "sequence",
        }
    }

    pub fn for_force(force: bool) -> Self {
        if force {
            JobQueue::Tracker
        } else {
            JobQueue::Sequence
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum TrackerJob {
    SendTaskLeads {
        task_id: i64,
    },
    LeadApprove {
        lead_id: LeadId,
        price: Option<Decimal>,
        force: bool,
    },
    LeadReject {
        lead_id: LeadId,
        force: bool,
    },
    LeadUpdate {
        lead_id: LeadId,
        action: UpdateAction,
        merchant_amount: Option<Decimal>,
        price: Option<Decimal>,
        force: bool,
    },
}

impl TrackerJob {
    pub fn name(&self) -> &'static str {
        match self {
            TrackerJob::SendTaskLeads { .. } => "send_task_leads",
            TrackerJob::LeadApprove { .. } => "lead_approve",
            TrackerJob::LeadReject { .. } => "lead_reject",
            TrackerJob::LeadUpdate { .. } => "lead_update",
        }
    }

    pub fn lead_id(&self) -> Option<LeadId> {
        match self {
            TrackerJob::SendTaskLeads { .. } => None,
            TrackerJob::LeadApprove { lead_id, .. }
            | TrackerJob::LeadReject { lead_id, .. }
            | TrackerJob::LeadUpdate { lead_id, .. } => Some(*lead_id),
        }
    }
}

/// Queue `job`, due at `available_at` (unix seconds).
pub fn enqueue(
    store: &LeadStore,
    job: &TrackerJob,
    queue: JobQueue,
    max_attempts: u32,
    available_at: i64,
) -> LeadResult<i64> {
    let payload = serde_json::to_string(job)?;
    let id = store.insert_job(queue.as_str(), &payload, max_attempts, available_at)?;
    log::debug!("Queued {} job {id} on {}", job.name(), queue.as_str());
    Ok(id)
}

/// Tracker method and params for a per-lead job. `id` is the lead's tracker id.
pub fn tracker_request(lead: &Lead, job: &TrackerJob) -> Option<(String, Value)> {
    let amount = |value: Option<Decimal>| value.map(decimal_to_json).unwrap_or(Value::Null);
    match job {
        TrackerJob::SendTaskLeads { .. } => None,
        TrackerJob::LeadApprove { price, force, .. } => {
            let mut params = Map::new();
            params.insert("id".into(), json!(lead.tracker_id));
            params.insert("force".into(), json!(force));
            if let Some(price) = price {
                params.insert("price".into(), decimal_to_json(*price));
            }
            Some((LeadAction::Approve.tracker_method(), Value::Object(params)))
        }
        TrackerJob::LeadReject { force, .. } => Some((
            LeadAction::Reject.tracker_method(),
            json!({ "id": lead.tracker_id, "force": force }),
        )),
        TrackerJob::LeadUpdate { action, merchant_amount, price, force, .. } => {
            let params = match action {
                UpdateAction::Fixed => json!({
                    "id": lead.tracker_id,
                    "merchant_amount": amount(*merchant_amount),
                    "force": force,
                }),
                UpdateAction::Percent => json!({
                    "id": lead.tracker_id,
                    "price": amount(*price),
                    "force": force,
                }),
                UpdateAction::Retariffication => json!({ "id": lead.tracker_id }),
            };
            Some((LeadAction::Update(*action).tracker_method(), params))
        }
    }
}

/// Queues the send-task job for every new tracker task.
pub struct TaskDispatchListener {
    max_attempts: u32,
}

impl TaskDispatchListener {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }
}

impl LeadListener for TaskDispatchListener {
    fn name(&self) -> &'static str {
        "task_dispatch"
    }

    fn handle(&self, store: &LeadStore, event: &LeadEvent) -> LeadResult<()> {
        let LeadEvent::TrackerTaskCreated { task_id, .. } = event else {
            return Ok(());
        };
        let task = store
            .tracker_task(*task_id)?
            .ok_or_else(|| LeadError::not_found("tracker_task", task_id))?;
        enqueue(
            store,
            &TrackerJob::SendTaskLeads { task_id: task.id },
            JobQueue::for_force(task.force),
            self.max_attempts,
            Utc::now().timestamp(),
        )?;
        Ok(())
    }
}

// ── Worker ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub processed: usize,
    pub retried:   usize,
    pub failed:    usize,
}

impl WorkerReport {
    pub fn is_idle(&self) -> bool {
        self.processed + self.retried + self.failed == 0
    }
}

pub struct TrackerWorker<'a> {
    store: &'a LeadStore,
    api:   &'a dyn TrackerApi,
    jobs:  &'a JobsConfig,
}

impl<'a> TrackerWorker<'a> {
    pub fn new(store: &'a LeadStore, api: &'a dyn TrackerApi, jobs: &'a JobsConfig) -> Self {
        Self { store, api, jobs }
    }

    /// Drain up to one batch of due jobs.
    pub fn run_pending(&self) -> LeadResult<WorkerReport> {
        self.run_pending_at(Utc::now().timestamp())
    }

    /// Drain up to one batch of jobs due at `now` (unix seconds).
    pub fn run_pending_at(&self, now: i64) -> LeadResult<WorkerReport> {
        let mut report = WorkerReport::default();
        for _ in 0..self.jobs.batch_size {
            let Some(row) = self.store.claim_next_job(now, self.jobs.lease_secs)? else {
                break;
            };
            self.process(&row, now, &mut report)?;
        }
        if !report.is_idle() {
            log::info!(
                target: "tracker",
                "Tracker worker: {} done, {} retried, {} failed",
                report.processed,
                report.retried,
                report.failed
            );
        }
        Ok(report)
    }

    fn process(&self, row: &JobRow, now: i64, report: &mut WorkerReport) -> LeadResult<()> {
        let job: TrackerJob = match serde_json::from_str(&row.payload) {
            Ok(job) => job,
            Err(e) => {
                log::error!(target: "tracker", "Job {} has an unreadable payload: {e}", row.id);
                self.store.fail_job(row.id, &e.to_string())?;
                report.failed += 1;
                return Ok(());
            }
        };

        let due = now + self.jobs.retry_delay_secs * i64::from(row.attempts);
        match self.execute(&job, now).and_then(|()| self.store.complete_job(row.id)) {
            Ok(()) => {
                report.processed += 1;
            }
            Err(e) if e.is_persistence() => {
                // Hand the job back before bailing out; the lease covers a failed hand-back.
                if let Err(requeue) = self.store.retry_job(row.id, due, &e.to_string()) {
                    log::error!(target: "tracker", "Job {} could not be requeued: {requeue}", row.id);
                }
                return Err(e);
            }
            Err(e) if row.attempts < row.max_attempts => {
                log::warn!(
                    target: "tracker",
                    "{} job {} attempt {}/{} failed: {e}",
                    job.name(),
                    row.id,
                    row.attempts,
                    row.max_attempts
                );
                self.store.retry_job(row.id, due, &e.to_string())?;
                report.retried += 1;
            }
            Err(e) => {
                self.store.fail_job(row.id, &e.to_string())?;
                self.failed(&job, &e)?;
                report.failed += 1;
            }
        }
        Ok(())
    }

    fn execute(&self, job: &TrackerJob, now: i64) -> LeadResult<()> {
        if let TrackerJob::SendTaskLeads { task_id } = job {
            return self.send_task_leads(*task_id, now);
        }
        let Some(lead_id) = job.lead_id() else {
            return Ok(());
        };
        let lead = self
            .store
            .lead(lead_id)?
            .ok_or_else(|| LeadError::not_found("lead", lead_id))?;
        let Some((method, params)) = tracker_request(&lead, job) else {
            return Ok(());
        };
        self.api.post(&method, &params)?;
        log::info!(target: "tracker", "Sent {method} for lead {}", lead.id);
        Ok(())
    }

    /// Fan a task out into per-lead jobs.
    ///
    /// Approve is skipped for leads already approved and reject for leads
    /// already rejected; skipped pivots are removed. The task waits while
    /// any lead remains, else it is done.
    fn send_task_leads(&self, task_id: i64, now: i64) -> LeadResult<()> {
        self.store.atomic(|store| {
            let task = store
                .tracker_task(task_id)?
                .ok_or_else(|| LeadError::not_found("tracker_task", task_id))?;
            let queue = JobQueue::for_force(task.force);
            let lead_ids: Vec<LeadId> = store
                .pivots_for_task(task.id)?
                .into_iter()
                .map(|pivot| pivot.lead_id)
                .collect();
            let leads = store.leads_by_ids(&lead_ids)?;
            let mut remain = leads.len();

            for lead in &leads {
                let job = match task.action {
                    LeadAction::Approve if lead.is_approved() => None,
                    LeadAction::Approve => Some(TrackerJob::LeadApprove {
                        lead_id: lead.id,
                        price: task.decimal_param("cost"),
                        force: true,
                    }),
                    LeadAction::Reject if lead.is_rejected() => None,
                    LeadAction::Reject => Some(TrackerJob::LeadReject { lead_id: lead.id, force: true }),
                    LeadAction::Update(action) => Some(TrackerJob::LeadUpdate {
                        lead_id: lead.id,
                        action,
                        merchant_amount: task.decimal_param("merchant_amount"),
                        price: task.decimal_param("price"),
                        force: true,
                    }),
                };
                match job {
                    Some(job) => {
                        enqueue(store, &job, queue, self.jobs.max_attempts, now)?;
                        store.set_pivot_status(lead.id, PivotStatus::Waiting)?;
                    }
                    None => {
                        log::debug!("Lead {} already {}; {} skipped", lead.id, lead.status, task.action);
                        store.delete_pivot(lead.id)?;
                        remain -= 1;
                    }
                }
            }

            let status = if remain > 0 { TaskStatus::Waiting } else { TaskStatus::Done };
            store.set_task_status(task.id, status)?;
            Ok(())
        })
    }

    fn failed(&self, job: &TrackerJob, error: &LeadError) -> LeadResult<()> {
        if let Some(lead_id) = job.lead_id() {
            self.store.set_pivot_notice(lead_id, &error.to_string())?;
        }
        log::error!(target: "tracker", "{}: failed job ({error})", job.name());
        Ok(())
    }
}
