//! The external tracker, as seen by the replay worker.

use crate::error::TrackerError;
use serde_json::{json, Value};
use std::sync::Mutex;

/// One call into the tracker's JSON-RPC style API.
pub trait TrackerApi: Send + Sync {
    /// Invoke `method` (e.g. `leads.approve`) with `params`.
    fn post(&self, method: &str, params: &Value) -> Result<Value, TrackerError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackerRequest {
    pub method: String,
    pub params: Value,
}

/// Records every call instead of sending it. Used by tests and dry runs.
#[derive(Default)]
pub struct RecordingTrackerApi {
    requests: Mutex<Vec<TrackerRequest>>,
    failure:  Mutex<Option<TrackerError>>,
}

impl RecordingTrackerApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following call fail with `error` (None to recover).
    pub fn fail_with(&self, error: Option<TrackerError>) {
        *self.failure.lock().unwrap_or_else(|e| e.into_inner()) = error;
    }

    pub fn requests(&self) -> Vec<TrackerRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl TrackerApi for RecordingTrackerApi {
    fn post(&self, method: &str, params: &Value) -> Result<Value, TrackerError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(TrackerRequest { method: method.to_string(), params: params.clone() });
        if let Some(error) = self.failure.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            return Err(error);
        }
        log::debug!("Recorded tracker call {method}");
        Ok(json!({ "success": true }))
    }
}
