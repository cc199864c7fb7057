//! lead-gateway: postback endpoint plus tracker replay worker.
//!
//! Usage:
//!   lead-gateway --db leads.db --data-dir ./data --bind 127.0.0.1:8080
//!   lead-gateway --dry-run            (record tracker calls instead of sending)
//!
//! LEAD_GATEWAY_BIND overrides the default bind address.

use anyhow::Result;
use lead_gateway::{
    http::{router, AppState},
    tracker_client::HttpTrackerApi,
    worker::run_worker,
};
use leadtrack_core::{
    engine::LeadEngine,
    store::LeadStore,
    tracker_api::{RecordingTrackerApi, TrackerApi},
};
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const DEFAULT_BIND: &str = "127.0.0.1:8080";

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let db = flag_value(&args, "--db").unwrap_or(":memory:");
    let data_dir = flag_value(&args, "--data-dir").unwrap_or("./data");
    let bind = flag_value(&args, "--bind")
        .map(str::to_string)
        .or_else(|| env::var("LEAD_GATEWAY_BIND").ok())
        .unwrap_or_else(|| DEFAULT_BIND.to_string());
    let dry_run = args.iter().any(|a| a == "--dry-run");

    println!("lead-gateway");
    println!("  db:        {db}");
    println!("  data_dir:  {data_dir}");
    println!("  bind:      {bind}");
    println!("  tracker:   {}", if dry_run { "dry run" } else { "http" });
    println!();

    // For :memory: use a shared-memory URI so the worker connection sees
    // the same database as the HTTP side.
    let db_effective: String = if db == ":memory:" {
        format!("file:leads_{}?mode=memory&cache=shared", chrono::Utc::now().timestamp())
    } else {
        db.to_string()
    };
    let store = LeadStore::open(&db_effective)?;
    let engine = LeadEngine::build(store, data_dir)?;
    let worker_store = engine.store.reopen()?;
    let jobs = engine.config.jobs.clone();
    let api_config = engine.config.tracker_api.clone();

    let shutdown = Arc::new(AtomicBool::new(false));
    let worker_shutdown = Arc::clone(&shutdown);
    let worker = std::thread::spawn(move || -> Result<()> {
        // The blocking HTTP client must be built outside the async runtime.
        let api: Box<dyn TrackerApi> = if dry_run {
            Box::new(RecordingTrackerApi::new())
        } else {
            Box::new(HttpTrackerApi::new(&api_config)?)
        };
        run_worker(&worker_store, api.as_ref(), &jobs, worker_shutdown)?;
        Ok(())
    });

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    log::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, router(AppState::new(engine)))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Cannot listen for shutdown signal: {e}");
            }
        })
        .await?;

    shutdown.store(true, Ordering::Relaxed);
    match worker.join() {
        Ok(result) => result?,
        Err(_) => anyhow::bail!("tracker worker panicked"),
    }
    Ok(())
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

