//! Liveness monitor for a single CometBFT validator.
//!
//! Each poll cycle walks the blocks produced since the previous cycle, keeps the
//! validator's missed signatures inside a sliding slashing window, evaluates the
//! validator's health and dispatches deduplicated alerts.

pub mod alert_engine;
pub mod alerter;
pub mod bot;
pub mod collector;
pub mod commands;
pub mod config;
pub mod evaluator;
pub mod formatter;
pub mod graph;
pub mod models;
pub mod service;
pub mod state;
pub mod storage;
pub mod window;
