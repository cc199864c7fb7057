//! Event listeners and the ordered dispatcher.
//!
//! DISPATCH ORDER (fixed, documented, never reordered):
//!   1. Approve money listener   (ledger projection of LeadApproved)
//!   2. Reject money listener    (ledger reversal on LeadRejected)
//!   3. Update money listener    (reverse-then-reapply on LeadUpdated)
//!   4. Action logger            (audit trail)
//!   5. Tracking listener        (closes tracker-task pivots)
//!   6. Task dispatch listener   (queues the send-task job)
//!
//! RULES:
//!   - Listeners run synchronously, inside the caller's transaction.
//!   - A listener error aborts the whole unit of work.
//!   - Every dispatched event is appended to event_log first.

use crate::{
    action_log::LeadActionsLogger,
    config::JobsConfig,
    error::LeadResult,
    event::{event_type_name, EventLogEntry, LeadEvent},
    money_transactions::{
        LeadApproveMoneyTransactionsListener, LeadRejectMoneyTransactionsListener,
        LeadUpdateMoneyTransactionsListener,
    },
    store::LeadStore,
    tracker_jobs::TaskDispatchListener,
    tracker_tasks::TrackingListener,
};

/// The contract every event listener fulfils.
pub trait LeadListener: Send {
    /// Unique stable name, recorded as the event_log source.
    fn name(&self) -> &'static str;

    /// React to one event. Ignore events this listener does not handle.
    fn handle(&self, store: &LeadStore, event: &LeadEvent) -> LeadResult<()>;
}

pub struct EventDispatcher {
    listeners: Vec<Box<dyn LeadListener>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { listeners: Vec::new() }
    }

    /// Dispatcher with every listener registered in the documented order.
    pub fn standard(jobs: &JobsConfig) -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register(Box::new(LeadApproveMoneyTransactionsListener));
        dispatcher.register(Box::new(LeadRejectMoneyTransactionsListener));
        dispatcher.register(Box::new(LeadUpdateMoneyTransactionsListener));
        dispatcher.register(Box::new(LeadActionsLogger));
        dispatcher.register(Box::new(TrackingListener));
        dispatcher.register(Box::new(TaskDispatchListener::new(jobs.max_attempts)));
        dispatcher
    }

    /// Register a listener. Call in the documented dispatch order.
    pub fn register(&mut self, listener: Box<dyn LeadListener>) {
        self.listeners.push(listener);
    }

    pub fn listener_names(&self) -> Vec<&'static str> {
        self.listeners.iter().map(|l| l.name()).collect()
    }

    /// Log the event, then run every listener. Runs as one atomic unit.
    pub fn dispatch(&self, store: &LeadStore, event: &LeadEvent) -> LeadResult<()> {
        store.atomic(|store| {
            let entry = EventLogEntry {
                id: None,
                source: "dispatcher".to_string(),
                event_type: event_type_name(event).to_string(),
                payload: serde_json::to_string(event)?,
                created_at: chrono::Utc::now(),
            };
            store.append_event(&entry)?;

            for listener in &self.listeners {
                log::debug!("{} <- {}", listener.name(), entry.event_type);
                listener.handle(store, event)?;
            }
            Ok(())
        })
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
