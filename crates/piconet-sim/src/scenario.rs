use piconet_core::types::{DeviceId, DropReason};
use rand::rngs::StdRng;
use rand::RngExt as _;
use rand::SeedableRng;
use std::time::Duration;

/// Configuration for a deterministic fleet telemetry scenario.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub seed: u64,
    pub duration: Duration,
    pub step: Duration,
    pub devices: Vec<DeviceScenarioConfig>,
}

/// Per-device bounds and step sizes for scenario generation.
#[derive(Debug, Clone)]
pub struct DeviceScenarioConfig {
    pub name: String,
    /// RSSI walk floor (dBm).
    pub min_rssi: f64,
    /// RSSI walk ceiling (dBm).
    pub max_rssi: f64,
    /// Largest RSSI move per step (dB).
    pub rssi_step_db: f64,
    /// Ceiling for bytes transferred in one step.
    pub max_bytes_per_step: u64,
    /// Largest byte-volume move per step.
    pub bytes_step: u64,
    /// Battery percentage at the start of the run.
    pub battery_start: u8,
    /// Reported discharge rate (%/hour).
    pub drain_percent_per_hour: f64,
    /// Chance of a link drop in any given step.
    pub drop_probability: f64,
}

impl Default for DeviceScenarioConfig {
    fn default() -> Self {
        DeviceScenarioConfig {
            name: "device-00".to_string(),
            min_rssi: -95.0,
            max_rssi: -40.0,
            rssi_step_db: 4.0,
            max_bytes_per_step: 6_000,
            bytes_step: 1_500,
            battery_start: 100,
            drain_percent_per_hour: 2.0,
            drop_probability: 0.01,
        }
    }
}

/// One device's telemetry at a single time step.
#[derive(Debug, Clone)]
pub struct DeviceFrame {
    pub device: DeviceId,
    pub rssi: f64,
    pub bytes: u64,
    pub battery: u8,
    pub drain_rate: f64,
    pub drop: Option<DropReason>,
}

/// A single time step of telemetry across the fleet.
#[derive(Debug, Clone)]
pub struct FleetFrame {
    pub t: Duration,
    pub readings: Vec<DeviceFrame>,
}

/// Deterministic random-walk telemetry generator.
///
/// Given a seed, produces reproducible sequences of [`FleetFrame`]s where
/// each device's signal strength and traffic volume evolve via random-walk
/// steps clamped to configured bounds, batteries discharge at the configured
/// rate, and link drops fire with the configured probability.
#[derive(Debug)]
pub struct FleetScenario {
    cfg: ScenarioConfig,
    rng: StdRng,
    states: Vec<DeviceState>,
}

#[derive(Debug, Clone)]
struct DeviceState {
    rssi: f64,
    bytes: f64,
    battery: f64,
}

impl FleetScenario {
    pub fn new(cfg: ScenarioConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let states = cfg
            .devices
            .iter()
            .map(|device| {
                let rssi_range = device.max_rssi - device.min_rssi;
                DeviceState {
                    rssi: device.min_rssi + rng.random::<f64>() * rssi_range,
                    bytes: rng.random::<f64>() * device.max_bytes_per_step as f64 * 0.5,
                    battery: f64::from(device.battery_start),
                }
            })
            .collect();

        Self { cfg, rng, states }
    }

    pub fn frames(&mut self) -> Vec<FleetFrame> {
        let mut frames = Vec::new();
        let total_steps =
            (self.cfg.duration.as_secs_f64() / self.cfg.step.as_secs_f64()).ceil() as u64;
        let step_hours = self.cfg.step.as_secs_f64() / 3600.0;

        for step_idx in 0..=total_steps {
            let t = self.cfg.step.mul_f64(step_idx as f64);
            let mut readings = Vec::with_capacity(self.cfg.devices.len());

            for idx in 0..self.cfg.devices.len() {
                let device_cfg = self.cfg.devices[idx].clone();
                let rssi_delta = rand_signed(&mut self.rng, device_cfg.rssi_step_db);
                let bytes_delta = rand_signed(&mut self.rng, device_cfg.bytes_step as f64);
                let drain_step = device_cfg.drain_percent_per_hour * step_hours;

                let state = &mut self.states[idx];
                state.rssi =
                    (state.rssi + rssi_delta).clamp(device_cfg.min_rssi, device_cfg.max_rssi);
                state.bytes = (state.bytes + bytes_delta)
                    .clamp(0.0, device_cfg.max_bytes_per_step as f64);
                state.battery = (state.battery - drain_step).max(0.0);

                let drop = if self.rng.random::<f64>() < device_cfg.drop_probability {
                    Some(if self.rng.random::<bool>() {
                        DropReason::SupervisionTimeout
                    } else {
                        DropReason::PeerTerminated
                    })
                } else {
                    None
                };

                readings.push(DeviceFrame {
                    device: DeviceId::new(device_cfg.name.clone()),
                    rssi: state.rssi,
                    bytes: state.bytes.max(0.0) as u64,
                    battery: state.battery.round() as u8,
                    drain_rate: device_cfg.drain_percent_per_hour,
                    drop,
                });
            }

            frames.push(FleetFrame { t, readings });
        }

        frames
    }
}

fn rand_signed(rng: &mut StdRng, max_step: f64) -> f64 {
    if max_step <= 0.0 {
        return 0.0;
    }
    let mag = rng.random::<f64>() * max_step;
    if rng.random::<bool>() { mag } else { -mag }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_device_config(seed: u64) -> ScenarioConfig {
        ScenarioConfig {
            seed,
            duration: Duration::from_secs(5),
            step: Duration::from_secs(1),
            devices: vec![
                DeviceScenarioConfig {
                    name: "door-lock".to_string(),
                    min_rssi: -95.0,
                    max_rssi: -60.0,
                    rssi_step_db: 5.0,
                    drop_probability: 0.1,
                    ..DeviceScenarioConfig::default()
                },
                DeviceScenarioConfig {
                    name: "thermostat".to_string(),
                    min_rssi: -80.0,
                    max_rssi: -40.0,
                    rssi_step_db: 3.0,
                    ..DeviceScenarioConfig::default()
                },
            ],
        }
    }

    #[test]
    fn scenario_is_deterministic_for_seed() {
        let mut s1 = FleetScenario::new(two_device_config(42));
        let mut s2 = FleetScenario::new(two_device_config(42));

        let f1 = s1.frames();
        let f2 = s2.frames();

        assert_eq!(f1.len(), f2.len());
        for (a, b) in f1.iter().zip(f2.iter()) {
            assert_eq!(a.t, b.t);
            assert_eq!(a.readings.len(), b.readings.len());
            for (ra, rb) in a.readings.iter().zip(b.readings.iter()) {
                assert_eq!(ra.device, rb.device);
                assert_eq!(ra.rssi, rb.rssi);
                assert_eq!(ra.bytes, rb.bytes);
                assert_eq!(ra.battery, rb.battery);
                assert_eq!(ra.drop, rb.drop);
            }
        }
    }

    #[test]
    fn different_seeds_diverge() {
        let f1 = FleetScenario::new(two_device_config(1)).frames();
        let f2 = FleetScenario::new(two_device_config(2)).frames();
        let same = f1
            .iter()
            .zip(f2.iter())
            .all(|(a, b)| {
                a.readings
                    .iter()
                    .zip(b.readings.iter())
                    .all(|(ra, rb)| ra.rssi == rb.rssi)
            });
        assert!(!same, "seeds 1 and 2 should not produce identical walks");
    }

    #[test]
    fn walks_respect_configured_bounds() {
        let config = two_device_config(7);
        let mut scenario = FleetScenario::new(config.clone());
        let mut last_battery = [f64::from(u8::MAX); 2];
        for frame in scenario.frames() {
            for (idx, reading) in frame.readings.iter().enumerate() {
                let cfg = &config.devices[idx];
                assert!(reading.rssi >= cfg.min_rssi && reading.rssi <= cfg.max_rssi);
                assert!(reading.bytes <= cfg.max_bytes_per_step);
                assert!(f64::from(reading.battery) <= last_battery[idx] + 1.0);
                last_battery[idx] = f64::from(reading.battery);
            }
        }
    }
}
