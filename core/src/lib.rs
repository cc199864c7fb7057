pub mod action_log;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod event;
pub mod lead;
pub mod lead_actions;
pub mod leads_service;
pub mod ledger;
pub mod listener;
pub mod money;
pub mod money_transactions;
pub mod offer_rate;
pub mod policy;
pub mod postback;
pub mod store;
pub mod tracker_api;
pub mod tracker_jobs;
pub mod tracker_tasks;
pub mod types;
