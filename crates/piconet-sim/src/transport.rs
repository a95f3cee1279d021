use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use piconet_core::batch::{CharacteristicTransport, OpKind, Operation};
use piconet_core::types::DeviceId;
use rand::rngs::StdRng;
use rand::RngExt as _;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;

/// In-memory characteristic store standing in for the radio stack.
///
/// Writes land in a per-device key/value store and reads resolve against it,
/// each after a fixed simulated latency. A seeded failure rate injects
/// transport errors reproducibly.
pub struct SimTransport {
    latency: Duration,
    failure_rate: f64,
    rng: Mutex<StdRng>,
    store: Mutex<HashMap<(DeviceId, String), Bytes>>,
}

impl SimTransport {
    /// Lossless transport with a 2ms simulated round trip.
    pub fn new(seed: u64) -> Self {
        Self::with_profile(seed, Duration::from_millis(2), 0.0)
    }

    pub fn with_profile(seed: u64, latency: Duration, failure_rate: f64) -> Self {
        SimTransport {
            latency,
            failure_rate,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            store: Mutex::new(HashMap::new()),
        }
    }

    /// Seed a characteristic value, as if the device had one to read.
    pub fn preload(&self, device: &DeviceId, characteristic: &str, value: Bytes) {
        self.store
            .lock()
            .unwrap()
            .insert((device.clone(), characteristic.to_string()), value);
    }

    /// Last value written to a characteristic, if any.
    pub fn stored(&self, device: &DeviceId, characteristic: &str) -> Option<Bytes> {
        self.store
            .lock()
            .unwrap()
            .get(&(device.clone(), characteristic.to_string()))
            .cloned()
    }
}

#[async_trait]
impl CharacteristicTransport for SimTransport {
    async fn execute(&self, device: &DeviceId, op: &Operation) -> Result<Option<Bytes>> {
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
        let roll = self.rng.lock().unwrap().random::<f64>();
        if roll < self.failure_rate {
            return Err(anyhow!(
                "simulated link error on {}/{}",
                device,
                op.characteristic
            ));
        }
        match op.kind {
            OpKind::Read => {
                let store = self.store.lock().unwrap();
                Ok(Some(
                    store
                        .get(&(device.clone(), op.characteristic.clone()))
                        .cloned()
                        .unwrap_or_else(|| Bytes::from_static(b"\x00")),
                ))
            }
            OpKind::Write => {
                if let Some(payload) = &op.payload {
                    self.store
                        .lock()
                        .unwrap()
                        .insert((device.clone(), op.characteristic.clone()), payload.clone());
                }
                Ok(None)
            }
        }
    }
}
