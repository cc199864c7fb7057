//! Shared primitive types used across the lead-tracking core.

/// Money in integer minor units (cents).
pub type Minor = i64;

/// Internal numeric id of a lead.
pub type LeadId = i64;

/// Id of an acting user. System actions carry no user.
pub type UserId = i64;

/// Generic row id for directory records (networks, offers, campaigns, ...).
pub type RecordId = i64;

/// ISO currency code as stored on offers and accounts.
pub type Currency = String;
