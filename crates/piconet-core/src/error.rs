//! # Validation Errors
//!
//! Contract violations raised by the engines: out-of-range values, malformed
//! identifiers, inconsistent orderings, bad configuration. These are
//! synchronous and fail-fast; every variant names the invariant it violated.
//!
//! Operational failures (a read or write that fails during execution) are a
//! different class entirely: they cross the transport seam as
//! [`anyhow::Error`] and are recorded into per-device error telemetry rather
//! than raised here.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("connection interval {got:?} outside allowed range {min:?}..={max:?}")]
    IntervalOutOfRange {
        got: Duration,
        min: Duration,
        max: Duration,
    },

    #[error("supervision timeout {got:?} outside allowed range {min:?}..={max:?}")]
    TimeoutOutOfRange {
        got: Duration,
        min: Duration,
        max: Duration,
    },

    #[error("peer latency {got} exceeds maximum {max}")]
    LatencyTooHigh { got: u16, max: u16 },

    /// The link-loss detection margin: the timeout must cover at least two
    /// full connection events including skipped ones.
    #[error(
        "supervision timeout {timeout:?} below required {required:?} \
         (interval {interval:?} x (latency {latency} + 1) x 2)"
    )]
    TimeoutTooTight {
        timeout: Duration,
        required: Duration,
        interval: Duration,
        latency: u16,
    },

    #[error("battery level {got}% exceeds 100%")]
    BatteryOutOfRange { got: u8 },

    #[error("rssi {rssi} dBm outside allowed range [{min}, {max}]")]
    RssiOutOfRange { rssi: f64, min: f64, max: f64 },

    #[error("threshold {name} = {value} dBm outside allowed range [{min}, {max}]")]
    ThresholdOutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("threshold ordering violated: {upper} ({upper_value}) must exceed {lower} ({lower_value})")]
    ThresholdOrder {
        upper: &'static str,
        lower: &'static str,
        upper_value: f64,
        lower_value: f64,
    },

    #[error("device id must not be empty")]
    EmptyDeviceId,

    #[error("characteristic id must not be empty")]
    EmptyCharacteristicId,

    #[error("config field {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },
}
