//! Minor/major unit conversion at the postback and audit boundary.
//!
//! Pure functions only. Rounding is half away from zero to the cent.

use crate::{
    error::{LeadError, LeadResult},
    types::Minor,
};
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use serde_json::Value;
use std::str::FromStr;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Convert a major-unit amount (e.g. `12.34`) to minor units (`1234`).
pub fn to_minor(major: Decimal) -> LeadResult<Minor> {
    major
        .checked_mul(HUNDRED)
        .and_then(|cents| {
            cents
                .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                .to_i64()
        })
        .ok_or_else(|| LeadError::AmountOutOfRange(major.to_string()))
}

/// Convert minor units back to a major-unit decimal with two places.
pub fn to_major(minor: Minor) -> Decimal {
    Decimal::new(minor, 2)
}

/// `percent`% of `amount`, rounded to a whole minor unit.
pub fn percent_of(amount: Minor, percent: Decimal) -> LeadResult<Minor> {
    Decimal::from(amount)
        .checked_mul(percent)
        .and_then(|scaled| scaled.checked_div(HUNDRED))
        .and_then(|share| {
            share
                .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                .to_i64()
        })
        .ok_or_else(|| LeadError::AmountOutOfRange(format!("{amount} * {percent}%")))
}

/// Read a decimal from a JSON number or numeric string.
pub fn decimal_from_json(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

/// Decimal as a plain JSON number, for callers that expect floats.
pub fn decimal_to_json(value: Decimal) -> Value {
    value
        .to_f64()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
