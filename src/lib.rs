//! Prometheus exporter for RabbitMQ management statistics.
//!
//! Each configured node gets its own polling loop ([`scheduler`]) that fetches
//! the management API ([`source`]), turns the payloads into observations
//! ([`metrics`]) and publishes them into a shared [`storage::MetricStore`],
//! which the HTTP endpoint ([`http`]) renders for Prometheus.

pub mod config;
pub mod http;
pub mod metrics;
pub mod scheduler;
pub mod source;
pub mod storage;
