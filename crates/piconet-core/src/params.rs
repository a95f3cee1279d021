//! # Connection Parameter Optimizer
//!
//! Per-device link timing tuning. Ingests transfer, battery, drop, and power
//! telemetry and derives a validated `(interval, latency, timeout)` tuple
//! from a fixed adjustment pipeline:
//!
//! ```text
//! 1. base by priority      High → fast, Low → relaxed, Medium → default
//! 2. data-rate adjustment  hot links tighten, idle links relax
//! 3. battery adjustment    low charge conserves, full charge tightens
//! 4. stability adjustment  repeated drops stretch the timeout, zero latency
//! 5. power adjustment      high drain stretches the interval
//! 6. final validation      range checks + timeout/interval/latency relation
//! ```
//!
//! Steps run in this exact order and are not commutative: step 4 resets
//! latency to zero regardless of what steps 2 and 3 did to it.

use crate::error::ValidationError;
use crate::types::{DeviceId, DropReason, Priority};
use quanta::Instant;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::debug;

/// Drop events retained per device (oldest evicted).
const DROP_LOG_CAP: usize = 10;

// ─── Link Parameters ────────────────────────────────────────────────────────

/// Link-layer timing tuple.
///
/// Invariant: `supervision_timeout >= connection_interval * (latency + 1) * 2`,
/// with all three fields inside the configured bounds. Validated on every
/// write; never partially applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkParams {
    /// Spacing between connection events.
    pub connection_interval: Duration,
    /// Connection events the peer may skip when it has no data.
    pub latency: u16,
    /// Silence tolerated before the link is declared lost.
    pub supervision_timeout: Duration,
}

impl Default for LinkParams {
    fn default() -> Self {
        LinkParams {
            connection_interval: Duration::from_millis(100),
            latency: 0,
            supervision_timeout: Duration::from_millis(2000),
        }
    }
}

// ─── Configuration ──────────────────────────────────────────────────────────

/// Bounds and thresholds for the optimizer.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Connection interval floor (link-layer minimum).
    pub min_interval: Duration,
    /// Connection interval ceiling.
    pub max_interval: Duration,
    /// Supervision timeout floor.
    pub min_timeout: Duration,
    /// Supervision timeout ceiling.
    pub max_timeout: Duration,
    /// Maximum peer-skip count a recommendation may carry.
    pub max_latency: u16,
    /// Byte rate above which a link counts as hot (bytes/sec).
    pub high_rate: f64,
    /// Byte rate below which a link counts as idle (bytes/sec).
    pub low_rate: f64,
    /// Window over which the byte rate is measured.
    pub rate_window: Duration,
    /// Retention for the raw transfer log.
    pub transfer_retention: Duration,
    /// Battery percentage below which conservation kicks in.
    pub low_battery: u8,
    /// Window for counting recent link drops.
    pub drop_window: Duration,
    /// Drops within the window that mark a link unstable.
    pub drop_threshold: usize,
    /// Drain rate above which the peer is burning power too fast (%/hour).
    pub drain_threshold: f64,
    /// Interval applied to hot links and the High-tier base.
    pub fast_interval: Duration,
    /// Interval applied to idle links and the Low-tier base.
    pub relaxed_interval: Duration,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            min_interval: Duration::from_micros(7_500),
            max_interval: Duration::from_millis(4_000),
            min_timeout: Duration::from_millis(100),
            max_timeout: Duration::from_millis(32_000),
            max_latency: 4,
            high_rate: 4_096.0,
            low_rate: 64.0,
            rate_window: Duration::from_secs(1),
            transfer_retention: Duration::from_secs(60),
            low_battery: 20,
            drop_window: Duration::from_secs(300),
            drop_threshold: 2,
            drain_threshold: 1.0,
            fast_interval: Duration::from_millis(50),
            relaxed_interval: Duration::from_millis(200),
        }
    }
}

impl OptimizerConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.min_interval >= self.max_interval {
            return Err(ValidationError::InvalidConfig {
                field: "min_interval",
                reason: format!(
                    "{:?} must be below max_interval {:?}",
                    self.min_interval, self.max_interval
                ),
            });
        }
        if self.min_timeout >= self.max_timeout {
            return Err(ValidationError::InvalidConfig {
                field: "min_timeout",
                reason: format!(
                    "{:?} must be below max_timeout {:?}",
                    self.min_timeout, self.max_timeout
                ),
            });
        }
        if self.low_rate < 0.0 || self.high_rate <= self.low_rate {
            return Err(ValidationError::InvalidConfig {
                field: "high_rate",
                reason: format!(
                    "{} must exceed low_rate {}",
                    self.high_rate, self.low_rate
                ),
            });
        }
        if self.rate_window.is_zero() || self.transfer_retention < self.rate_window {
            return Err(ValidationError::InvalidConfig {
                field: "rate_window",
                reason: "must be nonzero and within transfer_retention".to_string(),
            });
        }
        if self.low_battery > 100 {
            return Err(ValidationError::InvalidConfig {
                field: "low_battery",
                reason: format!("{} is not a percentage", self.low_battery),
            });
        }
        if self.drop_threshold == 0 {
            return Err(ValidationError::InvalidConfig {
                field: "drop_threshold",
                reason: "must be at least 1".to_string(),
            });
        }
        if !self.drain_threshold.is_finite() {
            return Err(ValidationError::InvalidConfig {
                field: "drain_threshold",
                reason: "must be finite".to_string(),
            });
        }
        if self.fast_interval < self.min_interval || self.relaxed_interval > self.max_interval {
            return Err(ValidationError::InvalidConfig {
                field: "fast_interval",
                reason: "tier base intervals must sit inside the interval bounds".to_string(),
            });
        }
        Ok(())
    }
}

// ─── Telemetry Snapshot ─────────────────────────────────────────────────────

/// Point-in-time view of one device's telemetry.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceMetrics {
    /// Bytes/sec over the rate window.
    pub byte_rate: f64,
    /// Total bytes still retained in the transfer log.
    pub window_bytes: u64,
    /// Drops within the drop window.
    pub recent_drops: usize,
    /// Last reported battery percentage.
    pub battery_level: Option<u8>,
    /// Last reported drain rate.
    pub drain_rate: Option<f64>,
    /// Assigned tier.
    pub priority: Priority,
}

// ─── Per-Device State ───────────────────────────────────────────────────────

struct DeviceState {
    params_override: Option<LinkParams>,
    priority: Priority,
    /// Time-ordered transfer log, pruned to the retention window on reads.
    transfers: Vec<(Instant, u64)>,
    /// Bounded ring of recent drops.
    drops: VecDeque<(Instant, DropReason)>,
    battery: Option<u8>,
    drain_rate: Option<f64>,
}

impl Default for DeviceState {
    fn default() -> Self {
        DeviceState {
            params_override: None,
            priority: Priority::Medium,
            transfers: Vec::new(),
            drops: VecDeque::with_capacity(DROP_LOG_CAP),
            battery: None,
            drain_rate: None,
        }
    }
}

// ─── Optimizer ──────────────────────────────────────────────────────────────

/// Connection parameter optimizer for a fleet of peripheral links.
///
/// Single-writer by construction: every mutating operation takes `&mut self`,
/// so a multi-threaded orchestrator wraps the optimizer in its own mutex.
pub struct ParamOptimizer {
    config: OptimizerConfig,
    devices: HashMap<DeviceId, DeviceState>,
}

impl ParamOptimizer {
    /// Create an optimizer with default bounds.
    pub fn new() -> Self {
        ParamOptimizer {
            config: OptimizerConfig::default(),
            devices: HashMap::new(),
        }
    }

    /// Create an optimizer with explicit bounds, validated once here.
    pub fn with_config(config: OptimizerConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(ParamOptimizer {
            config,
            devices: HashMap::new(),
        })
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Devices with any recorded state.
    pub fn tracked_devices(&self) -> usize {
        self.devices.len()
    }

    // ─── Parameter store ────────────────────────────────────────────────

    /// Validate and store an explicit parameter override for a device.
    pub fn set_params(
        &mut self,
        device: &DeviceId,
        params: LinkParams,
    ) -> Result<(), ValidationError> {
        self.validate(&params)?;
        self.device_mut(device).params_override = Some(params);
        Ok(())
    }

    /// Stored override for the device, or the hard-coded defaults.
    pub fn params(&self, device: &DeviceId) -> LinkParams {
        self.devices
            .get(device)
            .and_then(|st| st.params_override)
            .unwrap_or_default()
    }

    /// Check a parameter tuple against the configured bounds and the
    /// timeout/interval/latency relation. Rejects the whole tuple on the
    /// first violated bound; nothing is ever partially applied.
    pub fn validate(&self, params: &LinkParams) -> Result<(), ValidationError> {
        let cfg = &self.config;
        if params.connection_interval < cfg.min_interval
            || params.connection_interval > cfg.max_interval
        {
            return Err(ValidationError::IntervalOutOfRange {
                got: params.connection_interval,
                min: cfg.min_interval,
                max: cfg.max_interval,
            });
        }
        if params.supervision_timeout < cfg.min_timeout
            || params.supervision_timeout > cfg.max_timeout
        {
            return Err(ValidationError::TimeoutOutOfRange {
                got: params.supervision_timeout,
                min: cfg.min_timeout,
                max: cfg.max_timeout,
            });
        }
        if params.latency > cfg.max_latency {
            return Err(ValidationError::LatencyTooHigh {
                got: params.latency,
                max: cfg.max_latency,
            });
        }
        let required = params.connection_interval * (u32::from(params.latency) + 1) * 2;
        if params.supervision_timeout < required {
            return Err(ValidationError::TimeoutTooTight {
                timeout: params.supervision_timeout,
                required,
                interval: params.connection_interval,
                latency: params.latency,
            });
        }
        Ok(())
    }

    // ─── Telemetry ingestion ────────────────────────────────────────────

    /// Record bytes moved on the link.
    pub fn record_transfer(&mut self, device: &DeviceId, bytes: u64) {
        let retention = self.config.transfer_retention;
        let st = self.device_mut(device);
        let now = Instant::now();
        st.transfers.push((now, bytes));
        let cutoff = now - retention;
        st.transfers.retain(|(t, _)| *t >= cutoff);
    }

    /// Record the peer's reported battery percentage.
    pub fn update_battery(&mut self, device: &DeviceId, level: u8) -> Result<(), ValidationError> {
        if level > 100 {
            return Err(ValidationError::BatteryOutOfRange { got: level });
        }
        self.device_mut(device).battery = Some(level);
        Ok(())
    }

    /// Assign the device's tier, which selects the step-1 base parameters.
    pub fn set_priority(&mut self, device: &DeviceId, priority: Priority) {
        self.device_mut(device).priority = priority;
    }

    /// Record the peer's reported power drain rate.
    pub fn record_power_sample(&mut self, device: &DeviceId, drain_rate: f64) {
        self.device_mut(device).drain_rate = Some(drain_rate);
    }

    /// Record a link drop. The per-device log keeps the last
    /// [`DROP_LOG_CAP`] events, oldest evicted.
    pub fn record_drop(&mut self, device: &DeviceId, reason: DropReason) {
        let st = self.device_mut(device);
        while st.drops.len() >= DROP_LOG_CAP {
            st.drops.pop_front();
        }
        st.drops.push_back((Instant::now(), reason));
        debug!(device = %device, reason = %reason, "link drop recorded");
    }

    /// Telemetry snapshot for a device. Unknown devices report all-quiet.
    pub fn metrics(&mut self, device: &DeviceId) -> DeviceMetrics {
        let cfg_rate_window = self.config.rate_window;
        let cfg_retention = self.config.transfer_retention;
        let cfg_drop_window = self.config.drop_window;
        match self.devices.get_mut(device) {
            Some(st) => {
                let now = Instant::now();
                let retain_cutoff = now - cfg_retention;
                st.transfers.retain(|(t, _)| *t >= retain_cutoff);
                let rate_cutoff = now - cfg_rate_window;
                let rate_bytes: u64 = st
                    .transfers
                    .iter()
                    .filter(|(t, _)| *t >= rate_cutoff)
                    .map(|(_, b)| b)
                    .sum();
                let drop_cutoff = now - cfg_drop_window;
                DeviceMetrics {
                    byte_rate: rate_bytes as f64 / cfg_rate_window.as_secs_f64(),
                    window_bytes: st.transfers.iter().map(|(_, b)| b).sum(),
                    recent_drops: st.drops.iter().filter(|(t, _)| *t >= drop_cutoff).count(),
                    battery_level: st.battery,
                    drain_rate: st.drain_rate,
                    priority: st.priority,
                }
            }
            None => DeviceMetrics {
                byte_rate: 0.0,
                window_bytes: 0,
                recent_drops: 0,
                battery_level: None,
                drain_rate: None,
                priority: Priority::Medium,
            },
        }
    }

    // ─── Recommendation pipeline ────────────────────────────────────────

    /// Derive recommended parameters for a device from its telemetry.
    ///
    /// The result is a recommendation only; it is not stored. Callers apply
    /// it through the radio stack and may persist it via [`set_params`].
    /// When the pipeline lands on an unsatisfiable tuple the final
    /// validation error is returned and callers should keep the last
    /// parameters they applied.
    ///
    /// [`set_params`]: ParamOptimizer::set_params
    pub fn optimized_params(&mut self, device: &DeviceId) -> Result<LinkParams, ValidationError> {
        let cfg = self.config.clone();
        let now = Instant::now();

        let (priority, byte_rate, recent_drops, battery, drain_rate) =
            match self.devices.get_mut(device) {
                Some(st) => {
                    let retain_cutoff = now - cfg.transfer_retention;
                    st.transfers.retain(|(t, _)| *t >= retain_cutoff);
                    let rate_cutoff = now - cfg.rate_window;
                    let bytes: u64 = st
                        .transfers
                        .iter()
                        .filter(|(t, _)| *t >= rate_cutoff)
                        .map(|(_, b)| b)
                        .sum();
                    let drop_cutoff = now - cfg.drop_window;
                    let drops = st.drops.iter().filter(|(t, _)| *t >= drop_cutoff).count();
                    (
                        st.priority,
                        bytes as f64 / cfg.rate_window.as_secs_f64(),
                        drops,
                        st.battery,
                        st.drain_rate,
                    )
                }
                None => (Priority::Medium, 0.0, 0, None, None),
            };

        // Step 1: base parameters by tier.
        let mut p = match priority {
            Priority::High => LinkParams {
                connection_interval: cfg.fast_interval,
                latency: 0,
                ..LinkParams::default()
            },
            Priority::Low => LinkParams {
                connection_interval: cfg.relaxed_interval,
                latency: 2,
                ..LinkParams::default()
            },
            Priority::Medium => LinkParams::default(),
        };

        // Step 2: data rate. Hot links tighten; idle links (including fully
        // silent ones) relax.
        if byte_rate > cfg.high_rate {
            p.connection_interval = p.connection_interval.min(cfg.fast_interval);
            p.latency = 0;
        } else if byte_rate < cfg.low_rate {
            p.connection_interval = p.connection_interval.max(cfg.relaxed_interval);
            p.latency = (p.latency + 1).min(cfg.max_latency);
        }

        // Step 3: battery. The high branch is reached only at exactly 100%;
        // levels 1-99 fall between the two guards and change nothing.
        if let Some(level) = battery {
            if level < cfg.low_battery {
                p.connection_interval = (p.connection_interval * 2).min(cfg.max_interval);
                p.latency += 2;
                p.supervision_timeout = (p.supervision_timeout * 2).min(cfg.max_timeout);
            } else if level >= 100 {
                p.connection_interval = (p.connection_interval / 2).max(cfg.min_interval);
                p.supervision_timeout = p.supervision_timeout.mul_f64(1.5).min(cfg.max_timeout);
            }
        }

        // Step 4: stability. Overrides earlier latency decisions outright.
        if recent_drops >= cfg.drop_threshold {
            p.supervision_timeout = (p.supervision_timeout * 4).min(cfg.max_timeout);
            p.latency = 0;
        }

        // Step 5: power drain.
        if let Some(drain) = drain_rate {
            if drain > cfg.drain_threshold {
                p.connection_interval =
                    p.connection_interval.mul_f64(1.5).min(cfg.max_interval);
                p.latency = (p.latency + 1).min(cfg.max_latency);
            }
        }

        // Step 6: the whole tuple must satisfy the bounds and the
        // timeout/interval/latency relation or the recommendation is refused.
        self.validate(&p)?;

        debug!(
            device = %device,
            interval_ms = p.connection_interval.as_millis() as u64,
            latency = p.latency,
            timeout_ms = p.supervision_timeout.as_millis() as u64,
            rate_bps = byte_rate,
            drops = recent_drops,
            "derived connection parameters"
        );
        Ok(p)
    }

    fn device_mut(&mut self, device: &DeviceId) -> &mut DeviceState {
        self.devices.entry(device.clone()).or_default()
    }
}

impl Default for ParamOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev(n: &str) -> DeviceId {
        DeviceId::new(n)
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    // ─── Validation ─────────────────────────────────────────────────────

    #[test]
    fn unknown_device_gets_defaults() {
        let opt = ParamOptimizer::new();
        let p = opt.params(&dev("d1"));
        assert_eq!(p, LinkParams::default());
        assert_eq!(p.connection_interval, ms(100));
        assert_eq!(p.latency, 0);
        assert_eq!(p.supervision_timeout, ms(2000));
    }

    #[test]
    fn set_params_stores_override() {
        let mut opt = ParamOptimizer::new();
        let d = dev("d1");
        let custom = LinkParams {
            connection_interval: ms(30),
            latency: 1,
            supervision_timeout: ms(1000),
        };
        opt.set_params(&d, custom).unwrap();
        assert_eq!(opt.params(&d), custom);
    }

    #[test]
    fn set_params_rejects_interval_below_floor() {
        let mut opt = ParamOptimizer::new();
        let bad = LinkParams {
            connection_interval: ms(5),
            ..LinkParams::default()
        };
        let err = opt.set_params(&dev("d1"), bad).unwrap_err();
        assert!(matches!(err, ValidationError::IntervalOutOfRange { .. }));
    }

    #[test]
    fn set_params_rejects_tight_timeout() {
        let mut opt = ParamOptimizer::new();
        // required = 100ms * (3+1) * 2 = 800ms
        let bad = LinkParams {
            connection_interval: ms(100),
            latency: 3,
            supervision_timeout: ms(500),
        };
        let err = opt.set_params(&dev("d1"), bad).unwrap_err();
        match err {
            ValidationError::TimeoutTooTight { required, .. } => {
                assert_eq!(required, ms(800));
            }
            other => panic!("expected TimeoutTooTight, got {other:?}"),
        }
    }

    #[test]
    fn rejected_params_leave_no_trace() {
        let mut opt = ParamOptimizer::new();
        let d = dev("d1");
        let bad = LinkParams {
            connection_interval: ms(5),
            ..LinkParams::default()
        };
        let _ = opt.set_params(&d, bad);
        assert_eq!(opt.params(&d), LinkParams::default());
    }

    #[test]
    fn battery_over_100_rejected() {
        let mut opt = ParamOptimizer::new();
        let err = opt.update_battery(&dev("d1"), 101).unwrap_err();
        assert!(matches!(err, ValidationError::BatteryOutOfRange { got: 101 }));
    }

    // ─── Pipeline steps ─────────────────────────────────────────────────

    #[test]
    fn high_tier_hot_link_gets_fast_interval() {
        let mut opt = ParamOptimizer::new();
        let d = dev("d1");
        opt.set_priority(&d, Priority::High);
        opt.record_transfer(&d, 10_000); // 10 KB/s, above the hot threshold
        let p = opt.optimized_params(&d).unwrap();
        assert_eq!(p.connection_interval, ms(50));
        assert_eq!(p.latency, 0);
    }

    #[test]
    fn idle_link_relaxes_and_adds_latency() {
        let mut opt = ParamOptimizer::new();
        let d = dev("d1");
        // No transfers at all: the silent link falls below the idle
        // threshold and relaxes.
        let p = opt.optimized_params(&d).unwrap();
        assert_eq!(p.connection_interval, ms(200));
        assert_eq!(p.latency, 1);
    }

    #[test]
    fn mid_rate_leaves_base_untouched() {
        let mut opt = ParamOptimizer::new();
        let d = dev("d1");
        opt.record_transfer(&d, 1_000); // between low (64) and high (4096)
        let p = opt.optimized_params(&d).unwrap();
        assert_eq!(p, LinkParams::default());
    }

    #[test]
    fn low_battery_conserves() {
        let mut opt = ParamOptimizer::new();
        let d = dev("d1");
        opt.record_transfer(&d, 1_000); // mid rate, isolates the battery step
        opt.update_battery(&d, 10).unwrap();
        let p = opt.optimized_params(&d).unwrap();
        assert_eq!(p.connection_interval, ms(200));
        assert_eq!(p.latency, 2);
        assert_eq!(p.supervision_timeout, ms(4000));
    }

    #[test]
    fn high_battery_branch_fires_only_at_full_charge() {
        let mut opt = ParamOptimizer::new();
        let d = dev("d1");
        opt.record_transfer(&d, 1_000);
        opt.update_battery(&d, 99).unwrap();
        let p = opt.optimized_params(&d).unwrap();
        assert_eq!(p, LinkParams::default(), "99% must not reach the high-battery branch");

        opt.record_transfer(&d, 1_000);
        opt.update_battery(&d, 100).unwrap();
        let p = opt.optimized_params(&d).unwrap();
        assert_eq!(p.connection_interval, ms(50));
        assert_eq!(p.supervision_timeout, ms(3000));
    }

    #[test]
    fn repeated_drops_force_latency_zero() {
        let mut opt = ParamOptimizer::new();
        let d = dev("d1");
        opt.set_priority(&d, Priority::Low); // base latency 2, idle bumps to 3
        opt.record_drop(&d, DropReason::SupervisionTimeout);
        opt.record_drop(&d, DropReason::SupervisionTimeout);
        let p = opt.optimized_params(&d).unwrap();
        assert_eq!(p.latency, 0, "stability step must override earlier bumps");
        assert_eq!(p.supervision_timeout, ms(8000));
    }

    #[test]
    fn high_drain_stretches_interval() {
        let mut opt = ParamOptimizer::new();
        let d = dev("d1");
        opt.record_transfer(&d, 1_000);
        opt.record_power_sample(&d, 2.5);
        let p = opt.optimized_params(&d).unwrap();
        assert_eq!(p.connection_interval, ms(150));
        assert_eq!(p.latency, 1);
    }

    #[test]
    fn pipeline_can_land_on_an_unsatisfiable_tuple() {
        let mut opt = ParamOptimizer::new();
        let d = dev("d1");
        // Low tier base latency 2, idle bump to 3, low battery adds 2 more:
        // 5 exceeds the default max latency of 4 and validation refuses it.
        opt.set_priority(&d, Priority::Low);
        opt.update_battery(&d, 5).unwrap();
        let err = opt.optimized_params(&d).unwrap_err();
        assert!(matches!(err, ValidationError::LatencyTooHigh { got: 5, .. }));
        // The stored parameters are untouched by the failed recommendation.
        assert_eq!(opt.params(&d), LinkParams::default());
    }

    #[test]
    fn recommendation_always_satisfies_timeout_relation() {
        let mut opt = ParamOptimizer::new();
        let d = dev("d1");
        opt.set_priority(&d, Priority::High);
        opt.record_transfer(&d, 50_000);
        opt.update_battery(&d, 100).unwrap();
        opt.record_power_sample(&d, 3.0);
        let p = opt.optimized_params(&d).unwrap();
        let required = p.connection_interval * (u32::from(p.latency) + 1) * 2;
        assert!(
            p.supervision_timeout >= required,
            "timeout {:?} below required {:?}",
            p.supervision_timeout,
            required
        );
    }

    // ─── Telemetry bookkeeping ──────────────────────────────────────────

    #[test]
    fn drop_ring_keeps_last_ten() {
        let mut opt = ParamOptimizer::new();
        let d = dev("d1");
        for _ in 0..15 {
            opt.record_drop(&d, DropReason::PeerTerminated);
        }
        let m = opt.metrics(&d);
        assert_eq!(m.recent_drops, 10);
    }

    #[test]
    fn metrics_reflect_recorded_telemetry() {
        let mut opt = ParamOptimizer::new();
        let d = dev("d1");
        opt.record_transfer(&d, 500);
        opt.record_transfer(&d, 250);
        opt.update_battery(&d, 77).unwrap();
        opt.record_power_sample(&d, 0.4);
        opt.set_priority(&d, Priority::High);

        let m = opt.metrics(&d);
        assert_eq!(m.window_bytes, 750);
        assert!((m.byte_rate - 750.0).abs() < f64::EPSILON);
        assert_eq!(m.battery_level, Some(77));
        assert_eq!(m.drain_rate, Some(0.4));
        assert_eq!(m.priority, Priority::High);
        assert_eq!(opt.tracked_devices(), 1);
    }

    #[test]
    fn metrics_for_unknown_device_report_quiet() {
        let mut opt = ParamOptimizer::new();
        let m = opt.metrics(&dev("ghost"));
        assert_eq!(m.window_bytes, 0);
        assert_eq!(m.recent_drops, 0);
        assert_eq!(m.battery_level, None);
    }

    #[test]
    fn config_rejects_inverted_bounds() {
        let cfg = OptimizerConfig {
            min_interval: ms(500),
            max_interval: ms(100),
            ..OptimizerConfig::default()
        };
        assert!(ParamOptimizer::with_config(cfg).is_err());
    }
}
