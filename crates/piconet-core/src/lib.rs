//! # piconet-core
//!
//! Adaptive management engines for fleets of low-energy wireless devices.
//!
//! Connection parameter tuning from live telemetry, signal-strength
//! classification with self-adjusting thresholds, duty-cycled scan
//! scheduling, and priority-batched characteristic I/O over a pluggable
//! transport.
//!
//! ## Crate structure
//!
//! - [`types`] — Device identity, priorities, disconnect reasons
//! - [`error`] — Validation error taxonomy
//! - [`params`] — Connection parameter optimization pipeline
//! - [`signal`] — RSSI classification, adaptive thresholds, anomaly detection
//! - [`scan`] — Scan interval adaptation and weighted schedule generation
//! - [`batch`] — Priority-batched characteristic operations

pub mod batch;
pub mod error;
pub mod params;
pub mod scan;
pub mod signal;
pub mod types;
