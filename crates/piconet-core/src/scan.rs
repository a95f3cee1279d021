//! # Priority Scan Scheduler
//!
//! Cross-device scan interval allocation and schedule generation.
//!
//! Devices are assigned High/Medium/Low tiers. Observed scan activity over a
//! trailing window pulls each tier's interval toward `1000 / rate` ms under
//! exponential smoothing, and [`ScanScheduler::generate_schedule`] turns the
//! assignment table into a weighted round-robin plan: a tier with weight `w`
//! is sampled `w` times as densely as a weight-1 tier, without ever
//! excluding the lighter tiers.

use crate::error::ValidationError;
use crate::types::{DeviceId, Priority};
use quanta::Instant;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::debug;

/// Scan events retained per device (oldest evicted).
const SCAN_HISTORY_CAP: usize = 100;

// ─── Configuration ──────────────────────────────────────────────────────────

/// Bounds and smoothing for the scheduler.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Trailing window over which observed scan rates are measured.
    pub window: Duration,
    /// Floor for any recommended interval.
    pub min_interval: Duration,
    /// Ceiling for any recommended interval.
    pub max_interval: Duration,
    /// Starting interval for every tier.
    pub initial_interval: Duration,
    /// Smoothing factor pulling stored intervals toward the observed target.
    pub alpha: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            window: Duration::from_secs(60),
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(10),
            initial_interval: Duration::from_secs(1),
            alpha: 0.3,
        }
    }
}

impl ScanConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.window.is_zero() {
            return Err(ValidationError::InvalidConfig {
                field: "window",
                reason: "must be nonzero".to_string(),
            });
        }
        if self.min_interval >= self.max_interval {
            return Err(ValidationError::InvalidConfig {
                field: "min_interval",
                reason: format!(
                    "{:?} must be below max_interval {:?}",
                    self.min_interval, self.max_interval
                ),
            });
        }
        if self.initial_interval < self.min_interval || self.initial_interval > self.max_interval {
            return Err(ValidationError::InvalidConfig {
                field: "initial_interval",
                reason: "must sit inside the interval bounds".to_string(),
            });
        }
        if !(self.alpha.is_finite() && self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(ValidationError::InvalidConfig {
                field: "alpha",
                reason: format!("{} must be in (0, 1]", self.alpha),
            });
        }
        Ok(())
    }
}

// ─── Outputs ────────────────────────────────────────────────────────────────

/// Current smoothed per-tier scan intervals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TierIntervals {
    pub high: Duration,
    pub medium: Duration,
    pub low: Duration,
}

impl TierIntervals {
    pub fn get(&self, tier: Priority) -> Duration {
        match tier {
            Priority::High => self.high,
            Priority::Medium => self.medium,
            Priority::Low => self.low,
        }
    }
}

/// Lifetime per-tier scan counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TierCounts {
    pub high: u64,
    pub medium: u64,
    pub low: u64,
}

impl TierCounts {
    fn bump(&mut self, tier: Priority) {
        match tier {
            Priority::High => self.high += 1,
            Priority::Medium => self.medium += 1,
            Priority::Low => self.low += 1,
        }
    }

    pub fn get(&self, tier: Priority) -> u64 {
        match tier {
            Priority::High => self.high,
            Priority::Medium => self.medium,
            Priority::Low => self.low,
        }
    }
}

/// One planned scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanSlot {
    pub device: DeviceId,
    pub priority: Priority,
    /// Offset from schedule generation time.
    pub offset: Duration,
}

/// Ordered scan plan across the fleet, ascending by offset.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanSchedule {
    pub entries: Vec<ScanSlot>,
}

// ─── Scheduler ──────────────────────────────────────────────────────────────

fn tier_idx(tier: Priority) -> usize {
    match tier {
        Priority::High => 0,
        Priority::Medium => 1,
        Priority::Low => 2,
    }
}

/// Priority scan scheduler holding the cross-device interval state.
///
/// Mutating calls take `&mut self`; a multi-threaded orchestrator serializes
/// them behind a mutex.
pub struct ScanScheduler {
    config: ScanConfig,
    assignments: HashMap<DeviceId, Priority>,
    history: HashMap<DeviceId, VecDeque<(Instant, Priority)>>,
    counts: TierCounts,
    /// Smoothed intervals in milliseconds, indexed by [`tier_idx`].
    intervals_ms: [f64; 3],
}

impl ScanScheduler {
    pub fn new() -> Self {
        let config = ScanConfig::default();
        let initial = config.initial_interval.as_secs_f64() * 1000.0;
        ScanScheduler {
            config,
            assignments: HashMap::new(),
            history: HashMap::new(),
            counts: TierCounts::default(),
            intervals_ms: [initial; 3],
        }
    }

    pub fn with_config(config: ScanConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        let initial = config.initial_interval.as_secs_f64() * 1000.0;
        Ok(ScanScheduler {
            config,
            assignments: HashMap::new(),
            history: HashMap::new(),
            counts: TierCounts::default(),
            intervals_ms: [initial; 3],
        })
    }

    /// Atomically replace the whole priority table. This is a replacement,
    /// not a merge: devices absent from the new table lose their assignment.
    pub fn set_priorities(
        &mut self,
        priorities: HashMap<DeviceId, Priority>,
    ) -> Result<(), ValidationError> {
        if priorities.keys().any(|d| !d.is_valid()) {
            return Err(ValidationError::EmptyDeviceId);
        }
        self.assignments = priorities;
        Ok(())
    }

    /// Assigned tier for a device, if any.
    pub fn priority_of(&self, device: &DeviceId) -> Option<Priority> {
        self.assignments.get(device).copied()
    }

    /// Record one executed scan for a device at the tier it ran under.
    pub fn record_scan(&mut self, device: &DeviceId, priority: Priority) {
        let hist = self.history.entry(device.clone()).or_default();
        while hist.len() >= SCAN_HISTORY_CAP {
            hist.pop_front();
        }
        hist.push_back((Instant::now(), priority));
        self.counts.bump(priority);
    }

    pub fn tier_counts(&self) -> TierCounts {
        self.counts
    }

    /// Current smoothed intervals without recomputation.
    pub fn intervals(&self) -> TierIntervals {
        self.snapshot()
    }

    /// Recompute per-tier intervals from observed activity.
    ///
    /// For each tier, the scan rate over the trailing window across all
    /// devices yields a target of `1000 / rate` ms (clamped to the bounds),
    /// and the stored interval moves toward it by the smoothing factor.
    /// Tiers with zero observed activity keep their previous interval.
    pub fn optimized_intervals(&mut self) -> TierIntervals {
        let cutoff = Instant::now() - self.config.window;
        let mut observed = [0u64; 3];
        for hist in self.history.values() {
            for (t, p) in hist.iter() {
                if *t >= cutoff {
                    observed[tier_idx(*p)] += 1;
                }
            }
        }

        let window_secs = self.config.window.as_secs_f64();
        let min_ms = self.config.min_interval.as_secs_f64() * 1000.0;
        let max_ms = self.config.max_interval.as_secs_f64() * 1000.0;
        let alpha = self.config.alpha;
        for tier in Priority::ALL {
            let i = tier_idx(tier);
            if observed[i] == 0 {
                continue;
            }
            let rate = observed[i] as f64 / window_secs;
            let target = (1000.0 / rate).round().clamp(min_ms, max_ms);
            self.intervals_ms[i] = self.intervals_ms[i] * (1.0 - alpha) + target * alpha;
        }

        let out = self.snapshot();
        debug!(
            high_ms = self.intervals_ms[0],
            medium_ms = self.intervals_ms[1],
            low_ms = self.intervals_ms[2],
            "scan intervals updated"
        );
        out
    }

    /// Build the weighted round-robin scan plan from the assignment table.
    ///
    /// A tier with `n` devices gets `n x weight` slots spaced
    /// `tier_interval / weight` apart; devices inside a tier are visited in
    /// name order, which keeps the plan deterministic for a given table.
    /// Entries are sorted ascending by offset, higher tiers first on ties.
    pub fn generate_schedule(&self) -> ScanSchedule {
        let mut entries = Vec::new();
        for tier in Priority::ALL {
            let mut devices: Vec<&DeviceId> = self
                .assignments
                .iter()
                .filter(|(_, p)| **p == tier)
                .map(|(d, _)| d)
                .collect();
            if devices.is_empty() {
                continue;
            }
            devices.sort();

            let weight = tier.weight();
            let step = Duration::from_secs_f64(
                self.intervals_ms[tier_idx(tier)] / 1000.0 / f64::from(weight),
            );
            let slots = devices.len() as u32 * weight;
            for slot in 0..slots {
                entries.push(ScanSlot {
                    device: devices[slot as usize % devices.len()].clone(),
                    priority: tier,
                    offset: step * slot,
                });
            }
        }
        entries.sort_by_key(|s| s.offset);
        debug!(entries = entries.len(), "scan schedule generated");
        ScanSchedule { entries }
    }

    fn snapshot(&self) -> TierIntervals {
        TierIntervals {
            high: Duration::from_secs_f64(self.intervals_ms[0] / 1000.0),
            medium: Duration::from_secs_f64(self.intervals_ms[1] / 1000.0),
            low: Duration::from_secs_f64(self.intervals_ms[2] / 1000.0),
        }
    }
}

impl Default for ScanScheduler {
    fn default() -> Self {
        Self::new()
    }
}
