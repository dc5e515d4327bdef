//! # workq
//!
//! Asynchronous work queue over a Redis list store.
//!
//! Producers push typed payloads onto per-type lists; a worker loop pops
//! them, runs the registered handler, retries transient failures with
//! jittered exponential backoff, and records terminal failures in a
//! dead-letter sink (Postgres via SQLx, or in-memory).

pub mod config;
pub mod db;
pub mod dead_letter;
pub mod engine;
pub mod error;
pub mod handler;
pub mod model;
pub mod queue;
pub mod telemetry;
