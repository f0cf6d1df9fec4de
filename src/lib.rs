//! Kafgate - HTTP proxy for Kafka topics
//!
//! Turns stateless HTTP requests into stateful broker interactions:
//! long-lived publisher and consumer sessions, created on first use and
//! shared across requests, with bulk-consume semantics that tolerate
//! partial results.

pub mod api;
pub mod config;
pub mod service;
pub mod utils;
