//! Tracker tasks: operator requests replayed against the external tracker.
//!
//! RULE: A lead is tracked by at most one open task. Its pivot row is
//! created with the task, turns `waiting` once a replay job is queued and
//! is deleted when the matching action lands back through a postback (or
//! when the replay is skipped). A task is `done` once no pivots remain.

use crate::{
    error::{LeadError, LeadResult, ValidationErrors},
    event::LeadEvent,
    lead::{LeadAction, UpdateAction},
    listener::{EventDispatcher, LeadListener},
    money::decimal_to_json,
    store::LeadStore,
    types::{LeadId, UserId},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

pub const TASK_TYPE_LEAD: &str = "lead";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Waiting,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Waiting => "waiting",
            TaskStatus::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "waiting" => Some(TaskStatus::Waiting),
            "done" => Some(TaskStatus::Done),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PivotStatus {
    Pending,
    Waiting,
}

impl PivotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PivotStatus::Pending => "pending",
            PivotStatus::Waiting => "waiting",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PivotStatus::Pending),
            "waiting" => Some(PivotStatus::Waiting),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerTask {
    pub id:         i64,
    pub uuid:       String,
    pub task_type:  String,
    pub action:     LeadAction,
    pub ids:        Vec<LeadId>,
    pub params:     Value,
    pub user_id:    Option<UserId>,
    pub force:      bool,
    pub status:     TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TrackerTask {
    /// Decimal parameter in major units, if the task carries one.
    pub fn decimal_param(&self, key: &str) -> Option<Decimal> {
        self.params.get(key).and_then(crate::money::decimal_from_json)
    }
}

/// A lead's tracking pivot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerTaskLead {
    pub id:         i64,
    pub task_id:    i64,
    pub lead_id:    LeadId,
    pub status:     PivotStatus,
    pub notice:     Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// The action of the task currently tracking a lead, if any.
pub fn pending_action(store: &LeadStore, lead_id: LeadId) -> LeadResult<Option<LeadAction>> {
    let Some(pivot) = store.pivot_for_lead(lead_id)? else {
        return Ok(None);
    };
    Ok(store.tracker_task(pivot.task_id)?.map(|task| task.action))
}

// ── Requests ─────────────────────────────────────────────────

/// Manual re-pricing request for one or more leads.
#[derive(Debug, Clone)]
pub struct UpdateLeadRequest {
    pub ids:             Vec<LeadId>,
    pub update_type:     UpdateAction,
    pub price:           Option<Decimal>,
    pub merchant_amount: Option<Decimal>,
    pub force:           bool,
}

impl UpdateLeadRequest {
    pub fn validate(&self) -> LeadResult<()> {
        let minimum = Decimal::new(1, 2);
        let mut errors = ValidationErrors::new();
        let mut check = |field: &str, value: Option<Decimal>, required: bool| match value {
            Some(v) if v < minimum => errors.add(field, format!("The {field} must be at least 0.01.")),
            None if required => errors.add(
                field,
                format!("The {field} field is required when update type is {}.", self.update_type.as_str()),
            ),
            _ => {}
        };
        check("price", self.price, self.update_type == UpdateAction::Percent);
        check(
            "merchant_amount",
            self.merchant_amount,
            self.update_type == UpdateAction::Fixed,
        );
        if self.ids.is_empty() {
            errors.add("ids", "The ids field is required.");
        }
        errors.into_result(())
    }

    pub fn params(&self) -> Value {
        let mut params = Map::new();
        if let Some(price) = self.price {
            params.insert("price".into(), decimal_to_json(price));
        }
        if let Some(amount) = self.merchant_amount {
            params.insert("merchant_amount".into(), decimal_to_json(amount));
        }
        Value::Object(params)
    }
}

pub struct TrackerTaskService<'a> {
    store:  &'a LeadStore,
    events: &'a EventDispatcher,
}

impl<'a> TrackerTaskService<'a> {
    pub fn new(store: &'a LeadStore, events: &'a EventDispatcher) -> Self {
        Self { store, events }
    }

    /// Requested ids minus leads already tracked by a task; sorted, no duplicates.
    pub fn filter_ids(&self, ids: &[LeadId]) -> LeadResult<Vec<LeadId>> {
        let tracked = self.store.lead_ids_with_pivot(ids)?;
        let mut filtered: Vec<LeadId> = ids.iter().copied().filter(|id| !tracked.contains(id)).collect();
        filtered.sort_unstable();
        filtered.dedup();
        Ok(filtered)
    }

    /// Create a task over the untracked subset of `ids`.
    ///
    /// Returns None when every lead is already tracked.
    pub fn create_task(
        &self,
        action: LeadAction,
        ids: &[LeadId],
        params: Value,
        user_id: Option<UserId>,
        force: bool,
    ) -> LeadResult<Option<TrackerTask>> {
        let task = self.store.atomic(|store| {
            let ids = self.filter_ids(ids)?;
            if ids.is_empty() {
                return Ok(None);
            }
            let now = Utc::now();
            let mut task = TrackerTask {
                id: 0,
                uuid: Uuid::new_v4().to_string(),
                task_type: TASK_TYPE_LEAD.to_string(),
                action,
                ids,
                params,
                user_id,
                force,
                status: TaskStatus::Pending,
                created_at: now,
                updated_at: now,
            };
            task.id = store.insert_task(&task)?;
            for lead_id in &task.ids {
                store.insert_pivot(task.id, *lead_id, now)?;
            }
            self.events.dispatch(
                store,
                &LeadEvent::TrackerTaskCreated {
                    task_id: task.id,
                    task_uuid: task.uuid.clone(),
                },
            )?;
            Ok(Some(task))
        })?;

        match &task {
            Some(task) => log::info!(
                "Tracker task {} ({}) created for {} lead(s)",
                task.uuid,
                task.action,
                task.ids.len()
            ),
            None => log::debug!("No untracked leads for {action}; task skipped"),
        }
        Ok(task)
    }

    pub fn request_update(
        &self,
        request: &UpdateLeadRequest,
        user_id: UserId,
    ) -> LeadResult<Option<TrackerTask>> {
        request.validate()?;
        self.create_task(
            LeadAction::Update(request.update_type),
            &request.ids,
            request.params(),
            Some(user_id),
            request.force,
        )
    }

    pub fn request_approve(
        &self,
        ids: &[LeadId],
        cost: Option<Decimal>,
        user_id: UserId,
        force: bool,
    ) -> LeadResult<Option<TrackerTask>> {
        if let Some(cost) = cost {
            if cost < Decimal::ZERO {
                let mut errors = ValidationErrors::new();
                errors.add("cost", "The cost must be at least 0.");
                return Err(LeadError::Validation(errors));
            }
        }
        let params = match cost {
            Some(cost) => json!({ "cost": decimal_to_json(cost) }),
            None => json!({}),
        };
        self.create_task(LeadAction::Approve, ids, params, Some(user_id), force)
    }

    pub fn request_reject(
        &self,
        ids: &[LeadId],
        comment: Option<&str>,
        user_id: UserId,
        force: bool,
    ) -> LeadResult<Option<TrackerTask>> {
        let params = match comment {
            Some(comment) => json!({ "comment": comment }),
            None => json!({}),
        };
        self.create_task(LeadAction::Reject, ids, params, Some(user_id), force)
    }
}

// ── Listener ─────────────────────────────────────────────────

/// Closes tracking pivots when the replayed action lands.
pub struct TrackingListener;

impl TrackingListener {
    fn landed(event: &LeadEvent, action: LeadAction) -> bool {
        matches!(
            (event, action),
            (LeadEvent::LeadApproved { .. }, LeadAction::Approve)
                | (LeadEvent::LeadRejected { .. }, LeadAction::Reject)
                | (LeadEvent::LeadUpdated { .. }, LeadAction::Update(_))
        )
    }
}

impl LeadListener for TrackingListener {
    fn name(&self) -> &'static str {
        "tracking"
    }

    fn handle(&self, store: &LeadStore, event: &LeadEvent) -> LeadResult<()> {
        let Some(lead_id) = event.lead_id() else {
            return Ok(());
        };
        let Some(pivot) = store.pivot_for_lead(lead_id)? else {
            return Ok(());
        };
        let Some(task) = store.tracker_task(pivot.task_id)? else {
            return Ok(());
        };
        if !Self::landed(event, task.action) {
            return Ok(());
        }

        store.delete_pivot(lead_id)?;
        if store.pivot_count_for_task(task.id)? == 0 {
            store.set_task_status(task.id, TaskStatus::Done)?;
            log::info!("Tracker task {} done", task.uuid);
        }
        Ok(())
    }
}
