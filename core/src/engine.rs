//! The lead engine: one store, one configuration, one listener chain.
//!
//! EXECUTION ORDER of a postback (fixed, documented, never reordered):
//!   1. Validate the body against the directory
//!   2. Ingest (locate/insert, soft fields, sidecar, status dispatch)
//!   3. Listeners project the resulting events (see listener.rs)
//!
//! RULES:
//!   - Manual actions pass the lead policy before any service is called.
//!   - Tracker replay never runs inside a postback or an action; it is
//!     drained separately by `run_tracker_jobs`.

use crate::{
    action_log::{lead_history, LeadActionLog},
    config::LeadConfig,
    error::{LeadError, LeadResult},
    lead::Lead,
    lead_actions::LeadActionsService,
    leads_service::LeadsService,
    ledger::{balance, AccountOwner},
    listener::EventDispatcher,
    money::to_minor,
    policy::{LeadAbility, LeadPolicy},
    postback::{self, Postback},
    store::LeadStore,
    tracker_api::TrackerApi,
    tracker_jobs::{TrackerWorker, WorkerReport},
    tracker_tasks::{TrackerTask, TrackerTaskService, UpdateLeadRequest},
    types::{LeadId, Minor, RecordId, UserId},
};
use rust_decimal::Decimal;
use serde_json::Value;

pub struct LeadEngine {
    pub store:  LeadStore,
    pub config: LeadConfig,
    events:     EventDispatcher,
}

impl LeadEngine {
    /// Build a fully wired engine from the data/ directory.
    pub fn build(store: LeadStore, data_dir: &str) -> anyhow::Result<Self> {
        let config = LeadConfig::load(data_dir)?;
        Ok(Self::with_config(store, config)?)
    }

    /// Migrate, seed the directory and register the standard listeners.
    pub fn with_config(store: LeadStore, config: LeadConfig) -> LeadResult<Self> {
        store.migrate()?;
        store.seed_directory(&config.directory)?;
        let events = EventDispatcher::standard(&config.jobs);
        log::debug!("Lead engine ready with listeners {:?}", events.listener_names());
        Ok(Self { store, config, events })
    }

    /// In-memory engine over the test directory.
    pub fn build_test() -> LeadResult<Self> {
        Self::with_config(LeadStore::in_memory()?, LeadConfig::default_test())
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    pub fn actions(&self) -> LeadActionsService<'_> {
        LeadActionsService::new(&self.store, &self.events)
    }

    pub fn leads(&self) -> LeadsService<'_> {
        LeadsService::new(&self.store, &self.events)
    }

    pub fn tasks(&self) -> TrackerTaskService<'_> {
        TrackerTaskService::new(&self.store, &self.events)
    }

    pub fn policy(&self) -> LeadPolicy<'_> {
        LeadPolicy::new(&self.store)
    }

    // ── Postbacks ──────────────────────────────────────────────

    pub fn validate_postback(&self, body: &Value) -> LeadResult<Postback> {
        postback::validate(&self.store, body)
    }

    pub fn ingest_postback(&self, body: &Value) -> LeadResult<Lead> {
        let postback = self.validate_postback(body)?;
        self.leads().create(&postback)
    }

    // ── Leads ──────────────────────────────────────────────────

    pub fn lead(&self, id: LeadId) -> LeadResult<Lead> {
        self.store.lead(id)?.ok_or_else(|| LeadError::not_found("lead", id))
    }

    pub fn view_lead(&self, id: LeadId, user_id: UserId) -> LeadResult<Lead> {
        let lead = self.lead(id)?;
        self.policy().authorize(user_id, LeadAbility::View, &lead)?;
        Ok(lead)
    }

    /// Manual approve; `new_payment` is in major units.
    pub fn approve_lead(
        &self,
        id: LeadId,
        user_id: UserId,
        new_payment: Option<Decimal>,
        comment: Option<&str>,
    ) -> LeadResult<Lead> {
        let mut lead = self.lead(id)?;
        self.policy().authorize(user_id, LeadAbility::Approve, &lead)?;
        let new_payment = new_payment.map(to_minor).transpose()?;
        self.actions().approve(&mut lead, user_id, new_payment, comment)?;
        Ok(lead)
    }

    pub fn reject_lead(&self, id: LeadId, user_id: UserId, comment: &str) -> LeadResult<Lead> {
        let mut lead = self.lead(id)?;
        self.policy().authorize(user_id, LeadAbility::Reject, &lead)?;
        self.actions().reject(&mut lead, user_id, comment)?;
        Ok(lead)
    }

    /// Manual re-price for the lead's pending update task.
    ///
    /// The old payment is read before the write, so the ledger reversal
    /// always starts from the amounts actually projected.
    pub fn update_lead(&self, id: LeadId, user_id: UserId, new_payment: Option<Decimal>) -> LeadResult<Lead> {
        let mut lead = self.lead(id)?;
        self.policy().authorize(user_id, LeadAbility::Update, &lead)?;
        let new_payment = new_payment.map(to_minor).transpose()?;
        let old_payment = lead.merchant_payment;
        self.actions().update(&mut lead, new_payment, old_payment)?;
        Ok(lead)
    }

    pub fn lead_history(&self, id: LeadId, user_id: UserId) -> LeadResult<Vec<LeadActionLog>> {
        let lead = self.lead(id)?;
        self.policy().authorize(user_id, LeadAbility::History, &lead)?;
        lead_history(&self.store, lead.id)
    }

    // ── Tracker tasks ──────────────────────────────────────────

    pub fn request_lead_update(
        &self,
        request: &UpdateLeadRequest,
        user_id: UserId,
    ) -> LeadResult<Option<TrackerTask>> {
        request.validate()?;
        self.policy().batch(user_id, LeadAbility::Update, &request.ids)?;
        self.tasks().request_update(request, user_id)
    }

    pub fn request_approve(
        &self,
        ids: &[LeadId],
        cost: Option<Decimal>,
        user_id: UserId,
        force: bool,
    ) -> LeadResult<Option<TrackerTask>> {
        self.policy().batch(user_id, LeadAbility::Approve, ids)?;
        self.tasks().request_approve(ids, cost, user_id, force)
    }

    pub fn request_reject(
        &self,
        ids: &[LeadId],
        comment: Option<&str>,
        user_id: UserId,
        force: bool,
    ) -> LeadResult<Option<TrackerTask>> {
        self.policy().batch(user_id, LeadAbility::Reject, ids)?;
        self.tasks().request_reject(ids, comment, user_id, force)
    }

    /// Drain one batch of tracker replay jobs.
    pub fn run_tracker_jobs(&self, api: &dyn TrackerApi) -> LeadResult<WorkerReport> {
        TrackerWorker::new(&self.store, api, &self.config.jobs).run_pending()
    }

    // ── Ledger ─────────────────────────────────────────────────

    pub fn account_balance(
        &self,
        owner: AccountOwner,
        network_id: RecordId,
        currency: &str,
    ) -> LeadResult<Minor> {
        balance(&self.store, owner, network_id, currency)
    }
}
