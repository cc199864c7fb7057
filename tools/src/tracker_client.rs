//! HTTP client for the external tracker API.

use leadtrack_core::{config::TrackerApiConfig, error::TrackerError, tracker_api::TrackerApi};
use reqwest::blocking::Client;
use serde_json::{json, Value};
use std::time::Duration;

/// Posts `{"method": ..., "params": ...}` to the configured tracker.
///
/// Uses the blocking client; construct it outside any async runtime.
pub struct HttpTrackerApi {
    client:   Client,
    base_url: String,
    token:    Option<String>,
}

impl HttpTrackerApi {
    pub fn new(config: &TrackerApiConfig) -> Result<Self, TrackerError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TrackerError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }
}

impl TrackerApi for HttpTrackerApi {
    fn post(&self, method: &str, params: &Value) -> Result<Value, TrackerError> {
        let mut request = self
            .client
            .post(&self.base_url)
            .json(&json!({ "method": method, "params": params }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .map_err(|e| TrackerError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TrackerError::Status { status: status.as_u16() });
        }

        let body: Value = response
            .json()
            .map_err(|e| TrackerError::Transport(e.to_string()))?;
        if body.get("success").and_then(Value::as_bool) == Some(false) {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("no message")
                .to_string();
            return Err(TrackerError::Rejected { method: method.to_string(), message });
        }
        log::debug!(target: "tracker", "{method} accepted");
        Ok(body)
    }
}
