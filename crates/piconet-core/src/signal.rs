//! # Signal Quality Monitor
//!
//! RSSI classification, adaptive thresholds, and anomaly detection.
//!
//! Readings feed two deliberately distinct statistics: a fixed-size sliding
//! window (moving average and deviation, reacts in seconds) and lifetime
//! running aggregates (long-run mean, never forgets). Threshold adaptation is
//! a one-directional ratchet: a boundary, once raised, is never lowered by
//! adaptation alone. Degrading environments therefore keep strict standards
//! until [`SignalMonitor::reset_thresholds`] is called.

use crate::error::ValidationError;
use crate::types::Priority;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Readings required before adaptation and anomaly detection activate.
const MIN_READINGS: u64 = 5;
/// Sigma multiplier for the outer threshold band and the deviation rule.
const SIGMA_WIDE: f64 = 1.5;
/// Sigma multiplier for the inner threshold band.
const SIGMA_NARROW: f64 = 0.5;
/// Absolute sudden-drop margin in dBm, independent of the deviation rule.
const SUDDEN_DROP_DB: f64 = 15.0;

// ─── Classification ─────────────────────────────────────────────────────────

/// Quality band for a single RSSI reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SignalClass {
    Excellent,
    Good,
    Fair,
    Poor,
    /// Below the poor boundary. Reachable only once adaptation (or an
    /// explicit [`SignalMonitor::set_thresholds`]) raises `poor` above the
    /// configured range floor.
    Unusable,
}

impl std::fmt::Display for SignalClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SignalClass::Excellent => "excellent",
            SignalClass::Good => "good",
            SignalClass::Fair => "fair",
            SignalClass::Poor => "poor",
            SignalClass::Unusable => "unusable",
        };
        f.write_str(name)
    }
}

/// Named classification boundaries in dBm. Invariant:
/// `excellent > good > fair > poor`, all inside `[min_rssi, max_rssi]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SignalThresholds {
    pub excellent: f64,
    pub good: f64,
    pub fair: f64,
    pub poor: f64,
}

fn check_thresholds(
    t: &SignalThresholds,
    min: f64,
    max: f64,
) -> Result<(), ValidationError> {
    for (name, value) in [
        ("excellent", t.excellent),
        ("good", t.good),
        ("fair", t.fair),
        ("poor", t.poor),
    ] {
        if !(min..=max).contains(&value) {
            return Err(ValidationError::ThresholdOutOfRange {
                name,
                value,
                min,
                max,
            });
        }
    }
    for ((upper, uv), (lower, lv)) in [
        (("excellent", t.excellent), ("good", t.good)),
        (("good", t.good), ("fair", t.fair)),
        (("fair", t.fair), ("poor", t.poor)),
    ] {
        if uv <= lv {
            return Err(ValidationError::ThresholdOrder {
                upper,
                lower,
                upper_value: uv,
                lower_value: lv,
            });
        }
    }
    Ok(())
}

// ─── Configuration ──────────────────────────────────────────────────────────

/// Bounds and defaults for the monitor.
#[derive(Debug, Clone)]
pub struct SignalConfig {
    /// Lowest RSSI accepted as a reading (dBm).
    pub min_rssi: f64,
    /// Highest RSSI accepted as a reading (dBm).
    pub max_rssi: f64,
    /// Sliding window length for the moving statistics.
    pub window_size: usize,
    /// Minimum spacing between adaptively derived boundaries (dB).
    pub min_gap: f64,
    /// Initial thresholds, restored by [`SignalMonitor::reset_thresholds`].
    pub defaults: SignalThresholds,
}

impl Default for SignalConfig {
    fn default() -> Self {
        SignalConfig {
            min_rssi: -100.0,
            max_rssi: 0.0,
            window_size: 5,
            min_gap: 10.0,
            defaults: SignalThresholds {
                excellent: -50.0,
                good: -70.0,
                fair: -85.0,
                poor: -100.0,
            },
        }
    }
}

impl SignalConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if !self.min_rssi.is_finite() || !self.max_rssi.is_finite() || self.min_rssi >= self.max_rssi
        {
            return Err(ValidationError::InvalidConfig {
                field: "min_rssi",
                reason: format!("range [{}, {}] is empty", self.min_rssi, self.max_rssi),
            });
        }
        if self.window_size == 0 {
            return Err(ValidationError::InvalidConfig {
                field: "window_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(self.min_gap.is_finite() && self.min_gap > 0.0) {
            return Err(ValidationError::InvalidConfig {
                field: "min_gap",
                reason: format!("{} must be a positive gap", self.min_gap),
            });
        }
        check_thresholds(&self.defaults, self.min_rssi, self.max_rssi)
    }
}

// ─── Statistics ─────────────────────────────────────────────────────────────

/// Lifetime classification counts.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ClassCounts {
    pub excellent: u64,
    pub good: u64,
    pub fair: u64,
    pub poor: u64,
    pub unusable: u64,
}

impl ClassCounts {
    fn bump(&mut self, class: SignalClass) {
        match class {
            SignalClass::Excellent => self.excellent += 1,
            SignalClass::Good => self.good += 1,
            SignalClass::Fair => self.fair += 1,
            SignalClass::Poor => self.poor += 1,
            SignalClass::Unusable => self.unusable += 1,
        }
    }

    pub fn get(&self, class: SignalClass) -> u64 {
        match class {
            SignalClass::Excellent => self.excellent,
            SignalClass::Good => self.good,
            SignalClass::Fair => self.fair,
            SignalClass::Poor => self.poor,
            SignalClass::Unusable => self.unusable,
        }
    }
}

/// Outcome of recording one reading.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SignalReading {
    pub class: SignalClass,
    /// Mean over the sliding window including this reading.
    pub moving_average: f64,
}

/// Aggregate statistics snapshot.
///
/// `moving_average` and `std_dev` cover only the sliding window;
/// `lifetime_average` covers every reading ever recorded. They answer
/// different questions and are intentionally not interchangeable.
#[derive(Debug, Clone, Serialize)]
pub struct SignalStats {
    pub total_readings: u64,
    pub lifetime_average: f64,
    pub moving_average: f64,
    /// Population standard deviation over the window.
    pub std_dev: f64,
    pub distribution: ClassCounts,
}

// ─── Monitor ────────────────────────────────────────────────────────────────

/// Signal quality monitor holding the cross-device threshold state.
///
/// Mutating calls take `&mut self`; a multi-threaded orchestrator serializes
/// them behind a mutex.
pub struct SignalMonitor {
    config: SignalConfig,
    thresholds: SignalThresholds,
    window: VecDeque<f64>,
    total: u64,
    lifetime_sum: f64,
    counts: ClassCounts,
}

impl SignalMonitor {
    pub fn new() -> Self {
        let config = SignalConfig::default();
        SignalMonitor {
            thresholds: config.defaults,
            window: VecDeque::with_capacity(config.window_size),
            total: 0,
            lifetime_sum: 0.0,
            counts: ClassCounts::default(),
            config,
        }
    }

    pub fn with_config(config: SignalConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(SignalMonitor {
            thresholds: config.defaults,
            window: VecDeque::with_capacity(config.window_size),
            total: 0,
            lifetime_sum: 0.0,
            counts: ClassCounts::default(),
            config,
        })
    }

    pub fn thresholds(&self) -> SignalThresholds {
        self.thresholds
    }

    /// Readings currently held in the sliding window.
    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    // ─── Thresholds ─────────────────────────────────────────────────────

    /// Replace the thresholds wholesale after validating range and ordering.
    pub fn set_thresholds(&mut self, thresholds: SignalThresholds) -> Result<(), ValidationError> {
        check_thresholds(&thresholds, self.config.min_rssi, self.config.max_rssi)?;
        self.thresholds = thresholds;
        Ok(())
    }

    /// Restore the configured default thresholds, undoing any ratcheting.
    pub fn reset_thresholds(&mut self) {
        self.thresholds = self.config.defaults;
        info!(
            excellent = self.thresholds.excellent,
            good = self.thresholds.good,
            fair = self.thresholds.fair,
            poor = self.thresholds.poor,
            "signal thresholds reset to defaults"
        );
    }

    // ─── Classification and recording ───────────────────────────────────

    /// Classify one reading against the current thresholds.
    /// Descending comparison, first match wins; below `poor` is `Unusable`.
    pub fn classify(&self, rssi: f64) -> Result<SignalClass, ValidationError> {
        self.check_range(rssi)?;
        let t = &self.thresholds;
        let class = if rssi >= t.excellent {
            SignalClass::Excellent
        } else if rssi >= t.good {
            SignalClass::Good
        } else if rssi >= t.fair {
            SignalClass::Fair
        } else if rssi >= t.poor {
            SignalClass::Poor
        } else {
            SignalClass::Unusable
        };
        Ok(class)
    }

    /// Record a reading: windows it, folds it into the lifetime aggregates,
    /// and returns its classification plus the fresh moving average.
    pub fn record(&mut self, rssi: f64) -> Result<SignalReading, ValidationError> {
        let class = self.classify(rssi)?;
        self.window.push_back(rssi);
        while self.window.len() > self.config.window_size {
            self.window.pop_front();
        }
        self.total += 1;
        self.lifetime_sum += rssi;
        self.counts.bump(class);
        Ok(SignalReading {
            class,
            moving_average: self.window_mean(),
        })
    }

    pub fn statistics(&self) -> SignalStats {
        SignalStats {
            total_readings: self.total,
            lifetime_average: if self.total == 0 {
                0.0
            } else {
                self.lifetime_sum / self.total as f64
            },
            moving_average: self.window_mean(),
            std_dev: self.window_std_dev(),
            distribution: self.counts,
        }
    }

    // ─── Adaptation ─────────────────────────────────────────────────────

    /// Re-derive thresholds from the window statistics.
    ///
    /// Candidates are `moving_average ± {1.5σ, 0.5σ, 0.5σ, 1.5σ}` for
    /// excellent/good/fair/poor, each combined with the previous value via
    /// `max()`. The minimum gap is then enforced cascading downward from
    /// excellent, and everything is clamped into the accepted range.
    ///
    /// Below [`MIN_READINGS`] this is a no-op returning the current set.
    /// Adaptation is best-effort: if the window statistics come out
    /// non-finite the last stable thresholds are returned unchanged.
    pub fn adapt_thresholds(&mut self) -> SignalThresholds {
        if self.total < MIN_READINGS {
            return self.thresholds;
        }
        let ma = self.window_mean();
        let sd = self.window_std_dev();
        if !ma.is_finite() || !sd.is_finite() {
            warn!(ma, sd, "window statistics non-finite, keeping thresholds");
            return self.thresholds;
        }

        let prev = self.thresholds;
        let cfg = &self.config;
        let mut t = SignalThresholds {
            excellent: (ma + SIGMA_WIDE * sd).max(prev.excellent),
            good: (ma + SIGMA_NARROW * sd).max(prev.good),
            fair: (ma - SIGMA_NARROW * sd).max(prev.fair),
            poor: (ma - SIGMA_WIDE * sd).max(prev.poor),
        };
        t.good = t.good.min(t.excellent - cfg.min_gap);
        t.fair = t.fair.min(t.good - cfg.min_gap);
        t.poor = t.poor.min(t.fair - cfg.min_gap);
        t.excellent = t.excellent.clamp(cfg.min_rssi, cfg.max_rssi);
        t.good = t.good.clamp(cfg.min_rssi, cfg.max_rssi);
        t.fair = t.fair.clamp(cfg.min_rssi, cfg.max_rssi);
        t.poor = t.poor.clamp(cfg.min_rssi, cfg.max_rssi);

        if t != prev {
            debug!(
                excellent = t.excellent,
                good = t.good,
                fair = t.fair,
                poor = t.poor,
                "signal thresholds adapted"
            );
        }
        self.thresholds = t;
        t
    }

    /// Whether a reading is anomalous against the window statistics.
    ///
    /// Two independent rules: deviation beyond `1.5σ` from the moving
    /// average, or an absolute drop of more than 15 dB below it. The drop
    /// rule uses strict `<`: a reading exactly 15 dB below the average does
    /// not fire it. Always `false` below [`MIN_READINGS`].
    pub fn detect_anomaly(&self, rssi: f64) -> bool {
        if self.total < MIN_READINGS {
            return false;
        }
        let ma = self.window_mean();
        let sd = self.window_std_dev();
        let deviation = (rssi - ma).abs() > SIGMA_WIDE * sd;
        let sudden_drop = rssi < ma - SUDDEN_DROP_DB;
        deviation || sudden_drop
    }

    // ─── Internals ──────────────────────────────────────────────────────

    fn check_range(&self, rssi: f64) -> Result<(), ValidationError> {
        if !(self.config.min_rssi..=self.config.max_rssi).contains(&rssi) {
            return Err(ValidationError::RssiOutOfRange {
                rssi,
                min: self.config.min_rssi,
                max: self.config.max_rssi,
            });
        }
        Ok(())
    }

    fn window_mean(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window.iter().sum::<f64>() / self.window.len() as f64
    }

    fn window_std_dev(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let mean = self.window_mean();
        let variance = self
            .window
            .iter()
            .map(|r| (r - mean) * (r - mean))
            .sum::<f64>()
            / self.window.len() as f64;
        variance.sqrt()
    }
}

impl Default for SignalMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Suggested scan tier for a quality band, for orchestrators that map
/// signal health straight onto scheduling pressure.
pub fn suggested_priority(class: SignalClass) -> Priority {
    match class {
        SignalClass::Excellent | SignalClass::Good => Priority::Low,
        SignalClass::Fair => Priority::Medium,
        SignalClass::Poor | SignalClass::Unusable => Priority::High,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The worked five-reading window: mean -70, sigma = sqrt(50).
    const WINDOW: [f64; 5] = [-60.0, -65.0, -70.0, -75.0, -80.0];

    fn filled_monitor() -> SignalMonitor {
        let mut mon = SignalMonitor::new();
        for rssi in WINDOW {
            mon.record(rssi).unwrap();
        }
        mon
    }

    // ─── Classification ─────────────────────────────────────────────────

    #[test]
    fn classification_table_on_defaults() {
        let mon = SignalMonitor::new();
        assert_eq!(mon.classify(-50.0).unwrap(), SignalClass::Excellent);
        assert_eq!(mon.classify(-69.0).unwrap(), SignalClass::Good);
        assert_eq!(mon.classify(-71.0).unwrap(), SignalClass::Fair);
        assert_eq!(mon.classify(-100.0).unwrap(), SignalClass::Poor);
    }

    #[test]
    fn classify_rejects_out_of_range() {
        let mon = SignalMonitor::new();
        let err = mon.classify(-101.0).unwrap_err();
        assert!(matches!(err, ValidationError::RssiOutOfRange { .. }));
        assert!(mon.classify(f64::NAN).is_err());
        assert!(mon.classify(1.0).is_err());
    }

    #[test]
    fn unusable_band_appears_when_poor_is_raised() {
        let mut mon = SignalMonitor::new();
        mon.set_thresholds(SignalThresholds {
            excellent: -40.0,
            good: -55.0,
            fair: -70.0,
            poor: -85.0,
        })
        .unwrap();
        assert_eq!(mon.classify(-90.0).unwrap(), SignalClass::Unusable);
    }

    #[test]
    fn set_thresholds_rejects_bad_ordering() {
        let mut mon = SignalMonitor::new();
        let err = mon
            .set_thresholds(SignalThresholds {
                excellent: -70.0,
                good: -60.0,
                fair: -80.0,
                poor: -90.0,
            })
            .unwrap_err();
        match err {
            ValidationError::ThresholdOrder { upper, lower, .. } => {
                assert_eq!(upper, "excellent");
                assert_eq!(lower, "good");
            }
            other => panic!("expected ThresholdOrder, got {other:?}"),
        }
    }

    #[test]
    fn set_thresholds_rejects_out_of_range_value() {
        let mut mon = SignalMonitor::new();
        let err = mon
            .set_thresholds(SignalThresholds {
                excellent: 10.0,
                good: -70.0,
                fair: -85.0,
                poor: -95.0,
            })
            .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::ThresholdOutOfRange { name: "excellent", .. }
        ));
    }

    // ─── Recording and statistics ───────────────────────────────────────

    #[test]
    fn record_returns_class_and_moving_average() {
        let mut mon = SignalMonitor::new();
        let first = mon.record(-60.0).unwrap();
        assert_eq!(first.class, SignalClass::Good);
        assert!((first.moving_average + 60.0).abs() < 1e-9);

        let second = mon.record(-70.0).unwrap();
        assert!((second.moving_average + 65.0).abs() < 1e-9);
    }

    #[test]
    fn window_evicts_oldest_reading() {
        let mut mon = SignalMonitor::new();
        for rssi in [-90.0, -60.0, -60.0, -60.0, -60.0, -60.0] {
            mon.record(rssi).unwrap();
        }
        assert_eq!(mon.window_len(), 5);
        let stats = mon.statistics();
        // The -90 fell out of the window; only the lifetime stats remember it.
        assert!((stats.moving_average + 60.0).abs() < 1e-9);
        assert_eq!(stats.total_readings, 6);
        assert!(stats.lifetime_average < -60.0);
    }

    #[test]
    fn window_and_lifetime_statistics_stay_distinct() {
        let mut mon = SignalMonitor::new();
        for _ in 0..5 {
            mon.record(-90.0).unwrap();
        }
        for _ in 0..5 {
            mon.record(-60.0).unwrap();
        }
        let stats = mon.statistics();
        assert!((stats.moving_average + 60.0).abs() < 1e-9);
        assert!((stats.lifetime_average + 75.0).abs() < 1e-9);
    }

    #[test]
    fn distribution_counts_by_class() {
        let mut mon = SignalMonitor::new();
        mon.record(-45.0).unwrap(); // excellent
        mon.record(-60.0).unwrap(); // good
        mon.record(-60.0).unwrap(); // good
        mon.record(-80.0).unwrap(); // fair
        mon.record(-95.0).unwrap(); // poor
        let d = mon.statistics().distribution;
        assert_eq!(d.get(SignalClass::Excellent), 1);
        assert_eq!(d.get(SignalClass::Good), 2);
        assert_eq!(d.get(SignalClass::Fair), 1);
        assert_eq!(d.get(SignalClass::Poor), 1);
        assert_eq!(d.get(SignalClass::Unusable), 0);
    }

    #[test]
    fn std_dev_is_population_form() {
        let mon = filled_monitor();
        let stats = mon.statistics();
        assert!((stats.moving_average + 70.0).abs() < 1e-9);
        assert!((stats.std_dev - 50.0f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn rejected_reading_leaves_state_untouched() {
        let mut mon = SignalMonitor::new();
        mon.record(-60.0).unwrap();
        assert!(mon.record(-150.0).is_err());
        assert_eq!(mon.statistics().total_readings, 1);
        assert_eq!(mon.window_len(), 1);
    }

    // ─── Adaptation ─────────────────────────────────────────────────────

    #[test]
    fn adapt_is_noop_below_five_readings() {
        let mut mon = SignalMonitor::new();
        for rssi in &WINDOW[..4] {
            mon.record(*rssi).unwrap();
        }
        let before = mon.thresholds();
        let after = mon.adapt_thresholds();
        assert_eq!(after, before);
    }

    #[test]
    fn adapt_ratchets_and_enforces_gaps() {
        let mut mon = filled_monitor();
        let sd = 50.0f64.sqrt();
        let t = mon.adapt_thresholds();

        // Candidate -59.4 loses to the previous -50 under max().
        assert!((t.excellent + 50.0).abs() < 1e-9);
        // Candidate -66.46 beats the previous -70.
        assert!((t.good - (-70.0 + SIGMA_NARROW * sd)).abs() < 1e-9);
        // Gap cascade pins fair and poor 10 dB apart.
        assert!((t.fair - (t.good - 10.0)).abs() < 1e-9);
        assert!((t.poor - (t.fair - 10.0)).abs() < 1e-9);
    }

    #[test]
    fn adapt_never_lowers_a_boundary() {
        let mut mon = filled_monitor();
        let t1 = mon.adapt_thresholds();

        // A better environment raises the window.
        for _ in 0..5 {
            mon.record(-55.0).unwrap();
        }
        let t2 = mon.adapt_thresholds();
        assert!(t2.excellent >= t1.excellent);
        assert!(t2.good >= t1.good);
        assert!(t2.fair >= t1.fair);
        assert!(t2.poor >= t1.poor);

        // A degrading environment changes nothing.
        for _ in 0..5 {
            mon.record(-95.0).unwrap();
        }
        let t3 = mon.adapt_thresholds();
        assert_eq!(t3, t2, "ratchet must hold through degradation");
    }

    #[test]
    fn reset_restores_configured_defaults() {
        let mut mon = filled_monitor();
        mon.adapt_thresholds();
        assert_ne!(mon.thresholds(), SignalConfig::default().defaults);
        mon.reset_thresholds();
        assert_eq!(mon.thresholds(), SignalConfig::default().defaults);
    }

    // ─── Anomaly detection ──────────────────────────────────────────────

    #[test]
    fn anomaly_is_false_below_five_readings() {
        let mut mon = SignalMonitor::new();
        for rssi in &WINDOW[..4] {
            mon.record(*rssi).unwrap();
        }
        assert!(!mon.detect_anomaly(-95.0));
    }

    #[test]
    fn anomaly_subrules_on_the_worked_window() {
        let mon = filled_monitor();
        let stats = mon.statistics();

        // Deviation rule: |-85 - (-70)| = 15 > 1.5 * 7.07 = 10.6.
        let deviation = (-85.0f64 - stats.moving_average).abs() > 1.5 * stats.std_dev;
        // Sudden-drop rule: -85 < -85 is false under strict comparison.
        let sudden = -85.0 < stats.moving_average - 15.0;
        assert!(deviation, "deviation sub-rule must fire at -85");
        assert!(!sudden, "sudden-drop sub-rule must stay quiet at -85");

        assert!(mon.detect_anomaly(-85.0));
    }

    #[test]
    fn sudden_drop_boundary_is_strict() {
        // Window chosen so 1.5 sigma exceeds 15 dB: the deviation rule stays
        // quiet at exactly average - 15 and the drop rule decides alone.
        let mut mon = SignalMonitor::new();
        for rssi in [-55.0, -60.0, -70.0, -80.0, -85.0] {
            mon.record(rssi).unwrap();
        }
        let stats = mon.statistics();
        assert!((stats.moving_average + 70.0).abs() < 1e-9);
        assert!(1.5 * stats.std_dev > 15.0);

        assert!(!mon.detect_anomaly(-85.0), "exactly -15 dB is not a drop");
        assert!(mon.detect_anomaly(-85.1), "past -15 dB is a drop");
    }

    // ─── Priority mapping ───────────────────────────────────────────────

    #[test]
    fn weak_signal_suggests_high_priority() {
        assert_eq!(suggested_priority(SignalClass::Poor), Priority::High);
        assert_eq!(suggested_priority(SignalClass::Fair), Priority::Medium);
        assert_eq!(suggested_priority(SignalClass::Excellent), Priority::Low);
    }
}
