//! Integration tests for the postback endpoint over a real socket.

use lead_gateway::http::{router, AppState, UNEXPECTED_MESSAGE};
use leadtrack_core::{engine::LeadEngine, lead::LeadStatus};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

const USERNAME: &str = "tracker@leads.test";
const PASSWORD: &str = "TGAedEeD5kJs9JyxEszs";

/// Test server bound to an ephemeral port over the test directory.
struct TestServer {
    base_url: String,
    engine:   Arc<Mutex<LeadEngine>>,
}

impl TestServer {
    async fn new() -> Self {
        let state = AppState::new(LeadEngine::build_test().unwrap());
        let engine = Arc::clone(&state.engine);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{addr}");
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });

        let client = Client::new();
        let health_url = format!("{base_url}/healthz");
        for _ in 0..50 {
            match client.get(&health_url).send().await {
                Ok(_) => break,
                Err(_) => tokio::time::sleep(tokio::time::Duration::from_millis(50)).await,
            }
        }

        TestServer { base_url, engine }
    }

    fn postback_url(&self) -> String {
        format!("{}/api/leads/postback", self.base_url)
    }

    fn lead_count(&self) -> i64 {
        let engine = self.engine.lock().unwrap();
        engine.store.lead_count_for_campaign(1).unwrap()
    }
}

fn body(id: &str, status: &str) -> Value {
    json!({
        "id": id,
        "status": status,
        "timestamp": "Oct 19, 2026",
        "ad_id": 1,
        "tariff_id": 1,
        "price": 12.34,
        "utm_source": "mail",
    })
}

async fn send(server: &TestServer, body: &Value) -> reqwest::Response {
    Client::new()
        .post(server.postback_url())
        .basic_auth(USERNAME, Some(PASSWORD))
        .json(body)
        .send()
        .await
        .unwrap()
}

// ── Authentication ───────────────────────────────────────────

/// No credential: 401 with a basic challenge, nothing stored.
#[tokio::test]
async fn missing_credentials_are_unauthenticated() {
    let server = TestServer::new().await;
    let response = Client::new()
        .post(server.postback_url())
        .json(&body("http-anon", "hold"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get("www-authenticate").and_then(|v| v.to_str().ok()),
        Some("Basic")
    );
    assert_eq!(server.lead_count(), 0);
}

/// Wrong or empty credentials: 403, nothing stored.
#[tokio::test]
async fn wrong_credentials_are_forbidden() {
    let server = TestServer::new().await;
    for (user, password) in [(USERNAME, "wrong"), ("", ""), ("someone@else", PASSWORD)] {
        let response = Client::new()
            .post(server.postback_url())
            .basic_auth(user, Some(password))
            .json(&body("http-forbidden", "hold"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "user={user:?}");
    }
    assert_eq!(server.lead_count(), 0);
}

/// Non-JSON bodies are refused before validation.
#[tokio::test]
async fn non_json_is_unsupported_media_type() {
    let server = TestServer::new().await;
    let response = Client::new()
        .post(server.postback_url())
        .basic_auth(USERNAME, Some(PASSWORD))
        .header("content-type", "application/x-www-form-urlencoded")
        .body("id=http-form&status=hold")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(server.lead_count(), 0);
}

// ── Validation ───────────────────────────────────────────────

/// Invalid bodies get a per-field error map.
#[tokio::test]
async fn invalid_body_is_unprocessable() {
    let server = TestServer::new().await;
    let response = send(&server, &json!({"id": 3000, "ad_id": 3000, "tariff_id": 3000})).await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let payload: Value = response.json().await.unwrap();
    assert_eq!(payload["success"], json!(false));
    for field in ["id", "ad_id", "tariff_id", "timestamp"] {
        assert!(payload["errors"].get(field).is_some(), "missing {field} in {payload}");
    }
    assert_eq!(server.lead_count(), 0);
}

// ── Ingestion ────────────────────────────────────────────────

/// A valid postback is stored and acknowledged.
#[tokio::test]
async fn valid_postback_creates_lead() {
    let server = TestServer::new().await;
    let response = send(&server, &body("http-ok", "approved")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.json::<Value>().await.unwrap(), json!({"success": true}));

    let engine = server.engine.lock().unwrap();
    let lead = engine.store.lead_by_tracker_id("http-ok").unwrap().unwrap();
    assert_eq!(lead.status, LeadStatus::Approved);
    assert_eq!(lead.merchant_payment, 1234);
    assert!(engine.store.external_data(lead.id).unwrap().is_some());
}

/// Concurrent first postbacks for one id still make one lead.
#[tokio::test]
async fn concurrent_duplicates_create_one_lead() {
    let server = TestServer::new().await;
    let client = Client::new();

    let mut handles = Vec::new();
    for _ in 0..20 {
        let client = client.clone();
        let url = server.postback_url();
        handles.push(tokio::spawn(async move {
            client
                .post(url)
                .basic_auth(USERNAME, Some(PASSWORD))
                .json(&body("http-race", "hold"))
                .send()
                .await
                .unwrap()
                .status()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::OK);
    }
    assert_eq!(server.lead_count(), 1);
}

/// Failures after validation answer with the generic message only.
#[tokio::test]
async fn unexpected_failure_hides_details() {
    let server = TestServer::new().await;
    {
        let engine = server.engine.lock().unwrap();
        let lead = engine
            .ingest_postback(&body("http-broken", "hold"))
            .unwrap();
        // A pending update on a lead that was never approved has nothing to reverse.
        let request = leadtrack_core::tracker_tasks::UpdateLeadRequest {
            ids: vec![lead.id],
            update_type: leadtrack_core::lead::UpdateAction::Percent,
            price: Some(rust_decimal::Decimal::from(50)),
            merchant_amount: None,
            force: true,
        };
        engine.request_lead_update(&request, 2).unwrap();
    }

    let mut update = body("http-broken", "hold");
    update["price"] = json!(50);
    let response = send(&server, &update).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        response.json::<Value>().await.unwrap(),
        json!({"success": false, "message": UNEXPECTED_MESSAGE})
    );
}

#[tokio::test]
async fn healthz_reports_ok() {
    let server = TestServer::new().await;
    let response = Client::new()
        .get(format!("{}/healthz", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.json::<Value>().await.unwrap(), json!({"status": "ok"}));
}
