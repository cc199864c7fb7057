//! Inbound postback validation.
//!
//! Turns a raw JSON body into a typed `Postback`, resolving the campaign,
//! offer, rate and promo references against the directory. Every problem
//! is collected per field; nothing is written here.

use crate::{
    directory::Campaign,
    error::{LeadResult, ValidationErrors},
    lead::LeadStatus,
    money::{decimal_from_json, to_minor},
    offer_rate::OfferRate,
    store::LeadStore,
    types::{Currency, Minor, RecordId},
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};

/// Keys copied verbatim into the write-once external sidecar.
pub const EXTERNAL_KEYS: [&str; 13] = [
    "ip",
    "referrer",
    "utm_campaign",
    "utm_content",
    "utm_source",
    "utm_medium",
    "utm_term",
    "subid1",
    "subid2",
    "subid3",
    "subid4",
    "subid5",
    "subid6",
];

const AMOUNT_FIELDS: [&str; 4] = ["price", "network_amount", "affiliate_amount", "merchant_amount"];

/// A validated postback. Amounts are minor units.
#[derive(Debug, Clone, PartialEq)]
pub struct Postback {
    pub tracker_id:         String,
    pub status:             LeadStatus,
    pub timestamp:          DateTime<Utc>,
    pub campaign_id:        RecordId,
    pub offer_id:           RecordId,
    pub network_id:         RecordId,
    pub offer_rate_id:      RecordId,
    pub affiliate_id:       RecordId,
    pub merchant_id:        RecordId,
    pub promo_tool_id:      Option<RecordId>,
    pub promo_tool_code_id: Option<RecordId>,
    pub payload:            Option<String>,
    pub notice:             Option<String>,
    pub price:              Option<Minor>,
    pub network_amount:     Option<Minor>,
    pub affiliate_amount:   Option<Minor>,
    pub merchant_amount:    Option<Minor>,
    pub currency:           Currency,
    pub click_id:           Option<String>,
    pub session_id:         Option<String>,
    pub client_id:          Option<String>,
    pub request_id:         Option<String>,
    pub customer_id:        Option<String>,
    pub template_data:      Option<String>,
    pub external:           Option<Map<String, Value>>,
}

impl Postback {
    /// Payment a status change or update should apply: price, else merchant amount.
    pub fn new_payment(&self) -> Option<Minor> {
        self.price.or(self.merchant_amount)
    }

    /// The three split amounts, when the tracker sent all of them.
    pub fn explicit_split(&self) -> Option<(Minor, Minor, Minor)> {
        Some((self.merchant_amount?, self.affiliate_amount?, self.network_amount?))
    }
}

fn humanize(field: &str) -> String {
    field.replace('_', " ")
}

fn present<'a>(body: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    body.get(field).filter(|v| !v.is_null())
}

fn required_id(body: &Map<String, Value>, field: &str, errors: &mut ValidationErrors) -> Option<RecordId> {
    match present(body, field) {
        None => {
            errors.add(field, format!("The {} field is required.", humanize(field)));
            None
        }
        Some(v) => integer(v).or_else(|| {
            errors.add(field, format!("The {} must be an integer.", humanize(field)));
            None
        }),
    }
}

fn optional_id(body: &Map<String, Value>, field: &str, errors: &mut ValidationErrors) -> Option<RecordId> {
    let v = present(body, field)?;
    integer(v).or_else(|| {
        errors.add(field, format!("The {} must be an integer.", humanize(field)));
        None
    })
}

fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn optional_string(body: &Map<String, Value>, field: &str, errors: &mut ValidationErrors) -> Option<String> {
    match present(body, field)? {
        Value::String(s) => Some(s.clone()),
        _ => {
            errors.add(field, format!("The {} must be a string.", humanize(field)));
            None
        }
    }
}

/// Strings, and numbers rendered as strings (e.g. request ids).
fn optional_scalar(body: &Map<String, Value>, field: &str, errors: &mut ValidationErrors) -> Option<String> {
    match present(body, field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => {
            errors.add(field, format!("The {} must be a string.", humanize(field)));
            None
        }
    }
}

fn optional_amount(body: &Map<String, Value>, field: &str, errors: &mut ValidationErrors) -> Option<Minor> {
    let v = present(body, field)?;
    let amount = match decimal_from_json(v) {
        Some(d) if d >= Decimal::ZERO => d,
        Some(_) => {
            errors.add(field, format!("The {} must be at least 0.", humanize(field)));
            return None;
        }
        None => {
            errors.add(field, format!("The {} must be a number.", humanize(field)));
            return None;
        }
    };
    match to_minor(amount) {
        Ok(minor) => Some(minor),
        Err(_) => {
            errors.add(field, format!("The {} is out of range.", humanize(field)));
            None
        }
    }
}

/// Unix seconds, RFC 3339, `YYYY-MM-DD[ HH:MM:SS]` or `Mon D, YYYY`.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(secs) = s.parse::<i64>() {
                return Utc.timestamp_opt(secs, 0).single();
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(dt.and_utc());
            }
            ["%Y-%m-%d", "%b %d, %Y"]
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc())
        }
        _ => None,
    }
}

/// Free-form metadata is kept as its JSON text; a string is kept as-is.
fn payload_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn external_data(body: &Map<String, Value>) -> Option<Map<String, Value>> {
    let external: Map<String, Value> = EXTERNAL_KEYS
        .iter()
        .filter_map(|key| present(body, key).map(|v| (key.to_string(), v.clone())))
        .collect();
    if external.is_empty() {
        None
    } else {
        Some(external)
    }
}

/// Validate a postback body against the directory.
///
/// Fails with `LeadError::Validation` carrying every field problem found.
pub fn validate(store: &LeadStore, body: &Value) -> LeadResult<Postback> {
    let mut errors = ValidationErrors::new();
    let empty = Map::new();
    let body = match body {
        Value::Object(map) => map,
        _ => {
            errors.add("body", "The request body must be a JSON object.");
            &empty
        }
    };

    let tracker_id = match present(body, "id") {
        Some(Value::String(s)) if !s.trim().is_empty() && s.len() <= 255 => Some(s.clone()),
        Some(Value::String(s)) if s.len() > 255 => {
            errors.add("id", "The id may not be greater than 255 characters.");
            None
        }
        Some(Value::String(_)) | None => {
            errors.add("id", "The id field is required.");
            None
        }
        Some(_) => {
            errors.add("id", "The id must be a string.");
            None
        }
    };

    let status = match present(body, "status") {
        None => {
            errors.add("status", "The status field is required.");
            None
        }
        Some(v) => v.as_str().and_then(LeadStatus::parse).or_else(|| {
            errors.add("status", "The selected status is invalid.");
            None
        }),
    };

    let timestamp = match present(body, "timestamp") {
        None => {
            errors.add("timestamp", "The timestamp field is required.");
            None
        }
        Some(v) => parse_timestamp(v).or_else(|| {
            errors.add("timestamp", "The timestamp is not a valid date.");
            None
        }),
    };

    // ad_id → campaign → offer
    let campaign: Option<Campaign> = match required_id(body, "ad_id", &mut errors) {
        Some(id) => store.campaign(id)?.or_else(|| {
            errors.add("ad_id", "The selected ad id is invalid.");
            None
        }),
        None => None,
    };
    let offer = match &campaign {
        Some(c) => store.offer(c.offer_id)?,
        None => None,
    };

    let rate: Option<OfferRate> = match required_id(body, "tariff_id", &mut errors) {
        Some(id) => match store.offer_rate(id)? {
            Some(rate) if campaign.as_ref().map_or(true, |c| c.offer_id == rate.offer_id) => Some(rate),
            _ => {
                errors.add("tariff_id", "The selected tariff id is invalid.");
                None
            }
        },
        None => None,
    };

    let promo = |field: &str, errors: &mut ValidationErrors| -> LeadResult<Option<RecordId>> {
        let Some(id) = optional_id(body, field, errors) else {
            return Ok(None);
        };
        match store.promo_tool(id)? {
            Some(tool) if campaign.as_ref().map_or(true, |c| c.offer_id == tool.offer_id) => Ok(Some(id)),
            _ => {
                errors.add(field, format!("The selected {} is invalid.", humanize(field)));
                Ok(None)
            }
        }
    };
    let promo_tool_id = promo("promo_id", &mut errors)?;
    let promo_tool_code_id = promo("promocode_id", &mut errors)?;

    if let Some(offer) = &offer {
        if let Some(network_id) = optional_id(body, "network_id", &mut errors) {
            if network_id != offer.network_id {
                errors.add("network_id", "The network id does not match the campaign.");
            }
        }
        if let Some(offer_id) = optional_id(body, "offer_id", &mut errors) {
            if offer_id != offer.id {
                errors.add("offer_id", "The offer id does not match the campaign.");
            }
        }
    }

    let price = optional_amount(body, "price", &mut errors);
    let network_amount = optional_amount(body, "network_amount", &mut errors);
    let affiliate_amount = optional_amount(body, "affiliate_amount", &mut errors);
    let merchant_amount = optional_amount(body, "merchant_amount", &mut errors);

    let amounts_failed = AMOUNT_FIELDS.iter().any(|f| errors.has(f));
    let split_incomplete =
        merchant_amount.is_none() || affiliate_amount.is_none() || network_amount.is_none();
    if let Some(rate) = &rate {
        if !amounts_failed && split_incomplete && rate.is_percent() && price.or(merchant_amount).is_none() {
            errors.add("price", "The price field is required when the split amounts are incomplete.");
        }
    }

    let currency = match optional_string(body, "currency", &mut errors) {
        Some(c) if c.len() == 3 => Some(c.to_uppercase()),
        Some(_) => {
            errors.add("currency", "The currency must be 3 characters.");
            None
        }
        None => offer.as_ref().map(|o| o.currency.clone()),
    };

    let notice = optional_string(body, "warn_message", &mut errors);
    let click_id = optional_scalar(body, "click_id", &mut errors);
    let session_id = optional_scalar(body, "session_id", &mut errors);
    let client_id = optional_scalar(body, "client_id", &mut errors);
    let request_id = optional_scalar(body, "request_id", &mut errors);
    let customer_id = optional_scalar(body, "customer_id", &mut errors);
    let template_data = optional_string(body, "rate_template", &mut errors);

    let resolved = match (tracker_id, status, timestamp, campaign, offer, rate, currency) {
        (Some(tracker_id), Some(status), Some(timestamp), Some(campaign), Some(offer), Some(rate), Some(currency))
            if errors.is_empty() =>
        {
            Some(Postback {
                tracker_id,
                status,
                timestamp,
                campaign_id: campaign.id,
                offer_id: offer.id,
                network_id: offer.network_id,
                offer_rate_id: rate.id,
                affiliate_id: campaign.affiliate_id,
                merchant_id: offer.merchant_id,
                promo_tool_id,
                promo_tool_code_id,
                payload: payload_text(body.get("meta")),
                notice,
                price,
                network_amount,
                affiliate_amount,
                merchant_amount,
                currency,
                click_id,
                session_id,
                client_id,
                request_id,
                customer_id,
                template_data,
                external: external_data(body),
            })
        }
        _ => None,
    };

    match resolved {
        Some(postback) => errors.into_result(postback),
        None => {
            if errors.is_empty() {
                errors.add("ad_id", "The selected ad id is invalid.");
            }
            Err(crate::error::LeadError::Validation(errors))
        }
    }
}
