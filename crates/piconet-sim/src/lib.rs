//! Fleet simulation toolkit for exercising the management engines.
//!
//! Provides deterministic seeded telemetry generation and an in-memory
//! characteristic transport, for driving the engines through realistic
//! multi-device runs without radio hardware.

pub mod scenario;
pub mod transport;
