//! # Characteristic Operation Batcher
//!
//! Priority-ordered, batched, self-timing read/write queueing per device.
//!
//! ```text
//!  enqueue ──▶ per-device queue (priority, then FIFO)
//!                 │
//!                 ├── queue ≥ max_batch_size ──▶ flush now
//!                 └── otherwise ──▶ arm batch timer (if none pending)
//!
//!  flush: pop ≤ max_batch_size head ops ──▶ execute concurrently
//!         ──▶ record history + stats ──▶ failed High write? re-queue at
//!             head once and flush again out of band
//! ```
//!
//! Queues, histories, and metrics are exclusively owned per device key;
//! devices never contend with each other. Callers that enqueue while a batch
//! timer is already pending suspend until that flush completes, so they
//! always observe a consistent post-flush state; the timer a call arms as a
//! side effect of its own insertion is never awaited by that same call.
//!
//! There is no cancellation for an armed timer or an in-flight operation. A
//! consumer shutting down calls [`OperationBatcher::drain`] instead of
//! assuming pending work vanishes.

use crate::error::ValidationError;
use crate::types::{DeviceId, Priority};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use quanta::Instant;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

// ─── Transport Seam ─────────────────────────────────────────────────────────

/// Radio-stack seam executing a single characteristic operation.
///
/// Implementations own link-level timeouts and transport retries; the
/// batcher treats every call as one independent attempt.
#[async_trait]
pub trait CharacteristicTransport: Send + Sync {
    /// Execute one operation. Reads resolve to `Some(bytes)`, writes to
    /// `None`.
    async fn execute(&self, device: &DeviceId, op: &Operation) -> Result<Option<Bytes>>;
}

/// Callback invoked when a subscribed characteristic notifies.
pub type NotifyHandler = Arc<dyn Fn(&DeviceId, &str, &Bytes) -> Result<()> + Send + Sync>;

// ─── Operations ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OpKind {
    Read,
    Write,
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            OpKind::Read => "read",
            OpKind::Write => "write",
        })
    }
}

/// One queued characteristic operation.
#[derive(Debug, Clone)]
pub struct Operation {
    pub kind: OpKind,
    pub characteristic: String,
    /// Write payload; `None` for reads.
    pub payload: Option<Bytes>,
    pub priority: Priority,
    /// Monotonic per-device sequence, the FIFO tie-break within a priority.
    seq: u64,
    enqueued_at: Instant,
    /// Set when a failed High write has already used its one retry.
    retried: bool,
}

/// Execution status of a completed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OpStatus {
    Success,
    Error,
}

/// Completed operation as retained in per-device history.
#[derive(Debug, Clone)]
pub struct CompletedOp {
    pub characteristic: String,
    pub kind: OpKind,
    pub priority: Priority,
    pub status: OpStatus,
    /// Read result payload.
    pub value: Option<Bytes>,
    pub error: Option<String>,
    /// Transport execution time for this operation.
    pub duration: Duration,
    completed_seq: u64,
}

// ─── Statistics ─────────────────────────────────────────────────────────────

/// Per-device batch aggregates, updated incrementally at flush time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchStats {
    pub total_batches: u64,
    pub total_operations: u64,
    pub reads: u64,
    pub writes: u64,
    /// Incremental running average batch size.
    pub avg_batch_size: f64,
}

/// Per-device timing aggregates.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceMetrics {
    pub completed_operations: u64,
    /// Running average transport execution time in ms.
    pub avg_response_ms: f64,
    /// Running average time an operation sat queued before executing, in ms.
    pub avg_queue_wait_ms: f64,
}

/// Per-device error aggregates.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorStats {
    pub total_errors: u64,
    pub last_error: Option<String>,
}

/// Per-device operation counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OperationMetrics {
    pub reads_enqueued: u64,
    pub writes_enqueued: u64,
    pub reads_completed: u64,
    pub writes_completed: u64,
    pub reads_failed: u64,
    pub writes_failed: u64,
    /// High-priority writes re-queued after a failure.
    pub retries: u64,
}

// ─── Configuration ──────────────────────────────────────────────────────────

/// Batching knobs.
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Queue depth that triggers an immediate flush.
    pub max_batch_size: usize,
    /// Delay before a partially filled queue flushes on its own.
    pub batch_timeout: Duration,
    /// Completed operations retained per device.
    pub max_history: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        BatcherConfig {
            max_batch_size: 5,
            batch_timeout: Duration::from_millis(100),
            max_history: 100,
        }
    }
}

impl BatcherConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.max_batch_size == 0 {
            return Err(ValidationError::InvalidConfig {
                field: "max_batch_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.batch_timeout.is_zero() {
            return Err(ValidationError::InvalidConfig {
                field: "batch_timeout",
                reason: "must be nonzero".to_string(),
            });
        }
        if self.max_history == 0 {
            return Err(ValidationError::InvalidConfig {
                field: "max_history",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

// ─── Internal State ─────────────────────────────────────────────────────────

/// Completion signal any number of callers can await.
type FlushSignal = Shared<BoxFuture<'static, ()>>;

struct PendingFlush {
    /// Identifies which armed timer this pending state belongs to.
    epoch: u64,
    signal: FlushSignal,
    done: oneshot::Sender<()>,
}

#[derive(Default)]
struct QueueState {
    /// Head-first queue. Invariant: sorted by (priority, seq) at all times.
    queue: Vec<Operation>,
    next_seq: u64,
    completed_seq: u64,
    epoch: u64,
    pending: Option<PendingFlush>,
    history: VecDeque<CompletedOp>,
    batch_stats: BatchStats,
    perf: PerformanceMetrics,
    errors: ErrorStats,
    ops: OperationMetrics,
    handlers: HashMap<String, NotifyHandler>,
}

#[derive(Default)]
struct DeviceQueue {
    state: Mutex<QueueState>,
}

struct Inner<T: ?Sized> {
    config: BatcherConfig,
    devices: DashMap<DeviceId, Arc<DeviceQueue>>,
    transport: Arc<T>,
}

fn push_history(history: &mut VecDeque<CompletedOp>, cap: usize, entry: CompletedOp) {
    while history.len() >= cap {
        history.pop_front();
    }
    history.push_back(entry);
}

// ─── Batcher ────────────────────────────────────────────────────────────────

/// Characteristic operation batcher over an async transport.
///
/// Cheap to clone; clones share all state.
pub struct OperationBatcher<T: CharacteristicTransport + ?Sized> {
    inner: Arc<Inner<T>>,
}

impl<T: CharacteristicTransport + ?Sized> Clone for OperationBatcher<T> {
    fn clone(&self) -> Self {
        OperationBatcher {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: CharacteristicTransport + ?Sized + 'static> OperationBatcher<T> {
    /// Create a batcher with default knobs.
    pub fn new(transport: Arc<T>) -> Self {
        OperationBatcher {
            inner: Arc::new(Inner {
                config: BatcherConfig::default(),
                devices: DashMap::new(),
                transport,
            }),
        }
    }

    /// Create a batcher with explicit knobs, validated once here.
    pub fn with_config(
        transport: Arc<T>,
        config: BatcherConfig,
    ) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(OperationBatcher {
            inner: Arc::new(Inner {
                config,
                devices: DashMap::new(),
                transport,
            }),
        })
    }

    // ─── Enqueueing ─────────────────────────────────────────────────────

    /// Queue a characteristic read.
    pub async fn enqueue_read(
        &self,
        device: &DeviceId,
        characteristic: &str,
        priority: Priority,
    ) -> Result<(), ValidationError> {
        self.enqueue(device, characteristic, OpKind::Read, None, priority)
            .await
    }

    /// Queue a characteristic write.
    pub async fn enqueue_write(
        &self,
        device: &DeviceId,
        characteristic: &str,
        payload: Bytes,
        priority: Priority,
    ) -> Result<(), ValidationError> {
        self.enqueue(device, characteristic, OpKind::Write, Some(payload), priority)
            .await
    }

    async fn enqueue(
        &self,
        device: &DeviceId,
        characteristic: &str,
        kind: OpKind,
        payload: Option<Bytes>,
        priority: Priority,
    ) -> Result<(), ValidationError> {
        if !device.is_valid() {
            return Err(ValidationError::EmptyDeviceId);
        }
        if characteristic.is_empty() {
            return Err(ValidationError::EmptyCharacteristicId);
        }

        let dq = self.device_queue(device);
        let (prior, flush_now) = {
            let mut st = dq.state.lock().await;
            // Captured before insertion: only flushes that were already
            // pending when this call arrived are awaited below.
            let prior = st.pending.as_ref().map(|p| p.signal.clone());

            let op = Operation {
                kind,
                characteristic: characteristic.to_string(),
                payload,
                priority,
                seq: st.next_seq,
                enqueued_at: Instant::now(),
                retried: false,
            };
            st.next_seq += 1;
            match kind {
                OpKind::Read => st.ops.reads_enqueued += 1,
                OpKind::Write => st.ops.writes_enqueued += 1,
            }
            let at = st
                .queue
                .partition_point(|q| (q.priority, q.seq) < (op.priority, op.seq));
            st.queue.insert(at, op);

            let flush_now = st.queue.len() >= self.inner.config.max_batch_size;
            if !flush_now && st.pending.is_none() {
                Inner::arm_timer(&self.inner, &mut st, device.clone());
            }
            (prior, flush_now)
        };

        if flush_now {
            Inner::flush_device(Arc::clone(&self.inner), device.clone(), None).await;
        }
        if let Some(signal) = prior {
            signal.await;
        }
        Ok(())
    }

    /// Flush up to one batch for the device immediately, returning the
    /// number of operations executed.
    pub async fn flush_batch(&self, device: &DeviceId) -> usize {
        Inner::flush_device(Arc::clone(&self.inner), device.clone(), None).await
    }

    // ─── Notifications ──────────────────────────────────────────────────

    /// Register a handler for a characteristic's notifications.
    pub async fn subscribe(
        &self,
        device: &DeviceId,
        characteristic: &str,
        handler: NotifyHandler,
    ) -> Result<(), ValidationError> {
        if !device.is_valid() {
            return Err(ValidationError::EmptyDeviceId);
        }
        if characteristic.is_empty() {
            return Err(ValidationError::EmptyCharacteristicId);
        }
        let dq = self.device_queue(device);
        let mut st = dq.state.lock().await;
        st.handlers.insert(characteristic.to_string(), handler);
        Ok(())
    }

    /// Remove a handler. Returns whether one was registered.
    pub async fn unsubscribe(&self, device: &DeviceId, characteristic: &str) -> bool {
        match self.existing_queue(device) {
            Some(dq) => dq
                .state
                .lock()
                .await
                .handlers
                .remove(characteristic)
                .is_some(),
            None => false,
        }
    }

    /// Deliver a notification to the subscribed handler, if any. Returns
    /// whether a handler ran. Handler errors are logged, then propagated.
    pub async fn notify(
        &self,
        device: &DeviceId,
        characteristic: &str,
        value: &Bytes,
    ) -> Result<bool> {
        let handler = match self.existing_queue(device) {
            Some(dq) => dq.state.lock().await.handlers.get(characteristic).cloned(),
            None => None,
        };
        match handler {
            Some(handler) => {
                if let Err(e) = handler(device, characteristic, value) {
                    warn!(
                        device = %device,
                        characteristic,
                        error = %e,
                        "notification handler failed"
                    );
                    return Err(e);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ─── Read-only accessors ────────────────────────────────────────────
    //
    // Every accessor first awaits any flush pending for the device, so no
    // caller ever observes a snapshot taken mid-flush.

    pub async fn batch_stats(&self, device: &DeviceId) -> BatchStats {
        self.settled(device).await;
        match self.existing_queue(device) {
            Some(dq) => dq.state.lock().await.batch_stats.clone(),
            None => BatchStats::default(),
        }
    }

    pub async fn performance_metrics(&self, device: &DeviceId) -> PerformanceMetrics {
        self.settled(device).await;
        match self.existing_queue(device) {
            Some(dq) => dq.state.lock().await.perf.clone(),
            None => PerformanceMetrics::default(),
        }
    }

    pub async fn error_stats(&self, device: &DeviceId) -> ErrorStats {
        self.settled(device).await;
        match self.existing_queue(device) {
            Some(dq) => dq.state.lock().await.errors.clone(),
            None => ErrorStats::default(),
        }
    }

    pub async fn operation_metrics(&self, device: &DeviceId) -> OperationMetrics {
        self.settled(device).await;
        match self.existing_queue(device) {
            Some(dq) => dq.state.lock().await.ops.clone(),
            None => OperationMetrics::default(),
        }
    }

    /// Completed operations, most urgent priority first and newest first
    /// within a priority.
    pub async fn operation_history(&self, device: &DeviceId) -> Vec<CompletedOp> {
        self.settled(device).await;
        match self.existing_queue(device) {
            Some(dq) => {
                let st = dq.state.lock().await;
                let mut hist: Vec<CompletedOp> = st.history.iter().cloned().collect();
                hist.sort_by_key(|op| (op.priority, std::cmp::Reverse(op.completed_seq)));
                hist
            }
            None => Vec::new(),
        }
    }

    /// Operations currently queued for the device.
    pub async fn queue_len(&self, device: &DeviceId) -> usize {
        self.settled(device).await;
        match self.existing_queue(device) {
            Some(dq) => dq.state.lock().await.queue.len(),
            None => 0,
        }
    }

    /// Await every flush pending across all devices. Loops until nothing is
    /// pending, so timers armed while draining are covered too.
    pub async fn drain(&self) {
        loop {
            let queues: Vec<Arc<DeviceQueue>> = self
                .inner
                .devices
                .iter()
                .map(|e| Arc::clone(e.value()))
                .collect();
            let mut signals = Vec::new();
            for dq in queues {
                if let Some(p) = dq.state.lock().await.pending.as_ref() {
                    signals.push(p.signal.clone());
                }
            }
            if signals.is_empty() {
                return;
            }
            futures::future::join_all(signals).await;
        }
    }

    // ─── Internals ──────────────────────────────────────────────────────

    async fn settled(&self, device: &DeviceId) {
        if let Some(dq) = self.existing_queue(device) {
            let signal = dq.state.lock().await.pending.as_ref().map(|p| p.signal.clone());
            if let Some(signal) = signal {
                signal.await;
            }
        }
    }

    fn device_queue(&self, device: &DeviceId) -> Arc<DeviceQueue> {
        self.inner
            .devices
            .entry(device.clone())
            .or_default()
            .value()
            .clone()
    }

    fn existing_queue(&self, device: &DeviceId) -> Option<Arc<DeviceQueue>> {
        self.inner.devices.get(device).map(|e| Arc::clone(e.value()))
    }
}

impl<T: CharacteristicTransport + ?Sized + 'static> Inner<T> {
    /// Arm the batch timer for a device. Caller holds the state lock.
    fn arm_timer(inner: &Arc<Self>, st: &mut QueueState, device: DeviceId) {
        st.epoch += 1;
        let epoch = st.epoch;
        let (tx, rx) = oneshot::channel();
        let signal: FlushSignal = async move {
            let _ = rx.await;
        }
        .boxed()
        .shared();
        st.pending = Some(PendingFlush {
            epoch,
            signal,
            done: tx,
        });

        let inner = Arc::clone(inner);
        let timeout = inner.config.batch_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            Self::flush_device(inner, device, Some(epoch)).await;
        });
    }

    /// Claim and execute one batch for a device.
    ///
    /// `expect_epoch` guards timer-driven flushes: a timer only fires the
    /// flush it armed. If another flush already consumed that pending state
    /// the stale timer does nothing. Boxed so the retry path can re-enter.
    fn flush_device(
        inner: Arc<Self>,
        device: DeviceId,
        expect_epoch: Option<u64>,
    ) -> BoxFuture<'static, usize> {
        async move {
            let Some(dq) = inner.devices.get(&device).map(|e| Arc::clone(e.value())) else {
                return 0;
            };

            // Claim phase: detach the head batch and the pending handle.
            let (batch, pending) = {
                let mut st = dq.state.lock().await;
                if let Some(expected) = expect_epoch {
                    if st.pending.as_ref().map(|p| p.epoch) != Some(expected) {
                        return 0;
                    }
                }
                let pending = st.pending.take();
                let n = st.queue.len().min(inner.config.max_batch_size);
                let batch: Vec<Operation> = st.queue.drain(..n).collect();
                (batch, pending)
            };

            if batch.is_empty() {
                if let Some(p) = pending {
                    let _ = p.done.send(());
                }
                return 0;
            }
            let executed = batch.len();
            debug!(device = %device, size = executed, "executing batch");

            // Execute phase: every selected operation runs concurrently and
            // each outcome is collected independently. One failure never
            // aborts its siblings.
            let results = futures::future::join_all(batch.into_iter().map(|op| {
                let transport = Arc::clone(&inner.transport);
                let device = device.clone();
                async move {
                    let started = Instant::now();
                    let waited = started - op.enqueued_at;
                    let outcome = transport.execute(&device, &op).await;
                    (op, outcome, waited, started.elapsed())
                }
            }))
            .await;

            // Record phase: stats, history, and the single-shot High-write
            // retry.
            let mut retry_flush = false;
            {
                let mut st = dq.state.lock().await;
                st.batch_stats.total_batches += 1;
                st.batch_stats.total_operations += executed as u64;
                let batches = st.batch_stats.total_batches as f64;
                st.batch_stats.avg_batch_size +=
                    (executed as f64 - st.batch_stats.avg_batch_size) / batches;

                for (op, outcome, waited, elapsed) in results {
                    match op.kind {
                        OpKind::Read => st.batch_stats.reads += 1,
                        OpKind::Write => st.batch_stats.writes += 1,
                    }
                    st.perf.completed_operations += 1;
                    let n = st.perf.completed_operations as f64;
                    st.perf.avg_response_ms +=
                        (elapsed.as_secs_f64() * 1000.0 - st.perf.avg_response_ms) / n;
                    st.perf.avg_queue_wait_ms +=
                        (waited.as_secs_f64() * 1000.0 - st.perf.avg_queue_wait_ms) / n;

                    st.completed_seq += 1;
                    let completed_seq = st.completed_seq;
                    match outcome {
                        Ok(value) => {
                            match op.kind {
                                OpKind::Read => st.ops.reads_completed += 1,
                                OpKind::Write => st.ops.writes_completed += 1,
                            }
                            push_history(
                                &mut st.history,
                                inner.config.max_history,
                                CompletedOp {
                                    characteristic: op.characteristic,
                                    kind: op.kind,
                                    priority: op.priority,
                                    status: OpStatus::Success,
                                    value,
                                    error: None,
                                    duration: elapsed,
                                    completed_seq,
                                },
                            );
                        }
                        Err(e) => {
                            let message = e.to_string();
                            match op.kind {
                                OpKind::Read => st.ops.reads_failed += 1,
                                OpKind::Write => st.ops.writes_failed += 1,
                            }
                            st.errors.total_errors += 1;
                            st.errors.last_error = Some(message.clone());
                            push_history(
                                &mut st.history,
                                inner.config.max_history,
                                CompletedOp {
                                    characteristic: op.characteristic.clone(),
                                    kind: op.kind,
                                    priority: op.priority,
                                    status: OpStatus::Error,
                                    value: None,
                                    error: Some(message.clone()),
                                    duration: elapsed,
                                    completed_seq,
                                },
                            );

                            if op.kind == OpKind::Write
                                && op.priority == Priority::High
                                && !op.retried
                            {
                                warn!(
                                    device = %device,
                                    characteristic = %op.characteristic,
                                    error = %message,
                                    "high-priority write failed, re-queueing once"
                                );
                                let mut retry = op;
                                retry.retried = true;
                                // The popped batch preceded everything still
                                // queued, so the head keeps the sort invariant.
                                st.queue.insert(0, retry);
                                st.ops.retries += 1;
                                retry_flush = true;
                            } else {
                                debug!(
                                    device = %device,
                                    characteristic = %op.characteristic,
                                    error = %message,
                                    "operation failed"
                                );
                            }
                        }
                    }
                }

                // Leftovers beyond this batch still need a trigger.
                if !st.queue.is_empty() && st.pending.is_none() && !retry_flush {
                    Self::arm_timer(&inner, &mut st, device.clone());
                }
            }

            if let Some(p) = pending {
                let _ = p.done.send(());
            }
            if retry_flush {
                tokio::spawn(Self::flush_device(Arc::clone(&inner), device, None));
            }
            executed
        }
        .boxed()
    }
}
