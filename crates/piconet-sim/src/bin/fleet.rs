//! Runs the four management engines against a seeded telemetry scenario and
//! prints a JSON summary of what the fleet converged to.
//!
//! Frames are replayed back-to-back rather than in real time, so rate windows
//! see a compressed version of the scenario; the point is to exercise every
//! engine path, not to emulate wall-clock pacing.

use anyhow::Result;
use bytes::Bytes;
use piconet_core::batch::{BatcherConfig, OperationBatcher};
use piconet_core::params::ParamOptimizer;
use piconet_core::scan::ScanScheduler;
use piconet_core::signal::{suggested_priority, SignalMonitor};
use piconet_core::types::{DeviceId, Priority};
use piconet_sim::scenario::{DeviceScenarioConfig, FleetScenario, ScenarioConfig};
use piconet_sim::transport::SimTransport;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .init();

    let mut device_count = 4usize;
    let mut seed = 7u64;
    let mut duration_secs = 30u64;
    let mut failure_rate = 0.05f64;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--devices" => {
                device_count = args.next().expect("Missing --devices value").parse()?;
            }
            "--seed" => {
                seed = args.next().expect("Missing --seed value").parse()?;
            }
            "--duration" => {
                duration_secs = args.next().expect("Missing --duration value").parse()?;
            }
            "--failure-rate" => {
                failure_rate = args.next().expect("Missing --failure-rate value").parse()?;
            }
            _ => {}
        }
    }

    let scenario_cfg = ScenarioConfig {
        seed,
        duration: Duration::from_secs(duration_secs),
        step: Duration::from_secs(1),
        devices: (0..device_count)
            .map(|i| DeviceScenarioConfig {
                name: format!("device-{i:02}"),
                ..DeviceScenarioConfig::default()
            })
            .collect(),
    };
    let fleet: Vec<DeviceId> = scenario_cfg
        .devices
        .iter()
        .map(|d| DeviceId::new(d.name.clone()))
        .collect();

    info!(
        devices = device_count,
        seed, duration_secs, failure_rate, "starting fleet scenario"
    );

    let mut scenario = FleetScenario::new(scenario_cfg);
    let frames = scenario.frames();

    let mut monitors: HashMap<DeviceId, SignalMonitor> = HashMap::new();
    let mut optimizer = ParamOptimizer::new();
    let mut scheduler = ScanScheduler::new();
    let transport = Arc::new(SimTransport::with_profile(
        seed,
        Duration::from_millis(2),
        failure_rate,
    ));
    let batcher = OperationBatcher::with_config(
        Arc::clone(&transport),
        BatcherConfig {
            batch_timeout: Duration::from_millis(10),
            ..BatcherConfig::default()
        },
    )?;

    for frame in &frames {
        let mut tiers = HashMap::new();

        for reading in &frame.readings {
            let mon = monitors.entry(reading.device.clone()).or_default();
            let anomalous = mon.detect_anomaly(reading.rssi);
            let class = match mon.record(reading.rssi) {
                Ok(r) => r.class,
                Err(e) => {
                    warn!(device = %reading.device, error = %e, "rejected signal reading");
                    continue;
                }
            };
            if anomalous {
                warn!(device = %reading.device, rssi = reading.rssi, "anomalous signal reading");
            }
            mon.adapt_thresholds();

            optimizer.record_transfer(&reading.device, reading.bytes);
            if let Err(e) = optimizer.update_battery(&reading.device, reading.battery) {
                warn!(device = %reading.device, error = %e, "rejected battery report");
            }
            optimizer.record_power_sample(&reading.device, reading.drain_rate);
            if let Some(reason) = reading.drop {
                optimizer.record_drop(&reading.device, reason);
            }

            let tier = suggested_priority(class);
            optimizer.set_priority(&reading.device, tier);
            tiers.insert(reading.device.clone(), tier);
        }

        scheduler.set_priorities(tiers)?;
        for slot in scheduler.generate_schedule().entries {
            scheduler.record_scan(&slot.device, slot.priority);
        }
        scheduler.optimized_intervals();

        for reading in &frame.readings {
            match optimizer.optimized_params(&reading.device) {
                Ok(params) => {
                    optimizer.set_params(&reading.device, params)?;
                    let payload = Bytes::from(serde_json::to_vec(&params)?);
                    batcher
                        .enqueue_write(&reading.device, "conn_params", payload, Priority::High)
                        .await?;
                }
                Err(e) => {
                    // Keep the last applied parameters when the pipeline
                    // lands on an unsatisfiable tuple.
                    debug!(device = %reading.device, error = %e, "recommendation refused");
                }
            }
        }
    }

    batcher.drain().await;

    let mut devices = Vec::new();
    for device in &fleet {
        let signal = monitors.get(device).map(|m| m.statistics());
        let telemetry = optimizer.metrics(device);
        devices.push(serde_json::json!({
            "device": device.as_str(),
            "signal": signal,
            "telemetry": telemetry,
            "applied_params": optimizer.params(device),
            "batches": batcher.batch_stats(device).await,
            "timing": batcher.performance_metrics(device).await,
            "errors": batcher.error_stats(device).await,
            "operations": batcher.operation_metrics(device).await,
        }));
    }
    let summary = serde_json::json!({
        "seed": seed,
        "frames": frames.len(),
        "tier_counts": scheduler.tier_counts(),
        "intervals": scheduler.intervals(),
        "devices": devices,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
