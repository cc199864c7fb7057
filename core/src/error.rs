use crate::types::LeadId;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LeadError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Bad lead status: {0}")]
    BadLeadStatus(String),

    #[error("Lead payment type is not percent")]
    PaymentTypeNotPercent,

    #[error("Invalid rate type: {0}")]
    InvalidRateType(String),

    #[error("Lead update action not found, possible values update.fixed,update.percent,update.retariffication")]
    ActionNotFound,

    #[error("Wrong last operation type; leadId = {lead_id}")]
    WrongOperationState { lead_id: LeadId },

    #[error("No ledger operation found for lead {lead_id}")]
    OperationNotFound { lead_id: LeadId },

    #[error("Row was not persisted: {0}")]
    NotPersisted(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Action forbidden for user {user_id}")]
    Forbidden { user_id: i64 },

    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("Amount out of range: {0}")]
    AmountOutOfRange(String),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LeadError {
    /// Storage write failures: the enclosing transaction is rolled back.
    pub fn is_persistence(&self) -> bool {
        matches!(self, LeadError::Database(_) | LeadError::NotPersisted(_))
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        LeadError::NotFound { entity, id: id.to_string() }
    }
}

/// Failure reported by the external tracking service.
#[derive(Error, Debug, Clone)]
pub enum TrackerError {
    #[error("Tracker transport error: {0}")]
    Transport(String),

    #[error("Tracker rejected {method}: {message}")]
    Rejected { method: String, message: String },

    #[error("Tracker returned HTTP {status}")]
    Status { status: u16 },
}

/// Per-field validation messages, rendered as the `errors` map of a 422.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    pub fn has(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// `Ok(value)` when nothing was recorded, else a validation error.
    pub fn into_result<T>(self, value: T) -> LeadResult<T> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(LeadError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{field}: {message}")?;
                first = false;
            }
        }
        Ok(())
    }
}

pub type LeadResult<T> = Result<T, LeadError>;
