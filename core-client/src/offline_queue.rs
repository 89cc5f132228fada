//! # Offline Queue
//!
//! Bounded, time-limited FIFO of writes that could not be sent.
//!
//! ## Overview
//!
//! Mutating requests (POST/PUT/PATCH/DELETE) that fail for lack of
//! connectivity are buffered here and replayed once the device is back
//! online. Reads are never queued.
//!
//! - Capacity is `max_queue_size`; inserting into a full queue evicts the
//!   oldest entry.
//! - Entries older than `max_age` are evicted on every insert and drain.
//! - [`OfflineQueueManager::process_queue`] never runs twice at once. It
//!   takes the whole queue up front, so requests queued during a drain wait
//!   for the next one, and replays batches of `batch_size` concurrently.
//! - The queue lives in memory only.

use crate::error::{ClientError, QueueError};
use crate::request::ApiRequest;
use async_trait::async_trait;
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_runtime::config::{OfflineQueueConfig, ReplayFailurePolicy};
use core_runtime::events::{CoreEvent, EventBus, QueueEvent};
use futures::future::join_all;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identifier handed back to the caller whose write was queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueuedRequestId(Uuid);

impl QueuedRequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for QueuedRequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueuedRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A buffered write.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedRequest {
    pub id: QueuedRequestId,
    pub request: ApiRequest,
    pub enqueued_at: DateTime<Utc>,
    /// Failed replays so far
    pub attempts: u32,
}

/// Sends a queued request during a drain.
#[async_trait]
pub trait ReplayExecutor: Send + Sync {
    async fn replay(&self, request: ApiRequest) -> Result<(), ClientError>;
}

/// Outcome of one [`OfflineQueueManager::process_queue`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub attempted: usize,
    pub succeeded: usize,
    /// Replays that failed and were discarded
    pub failed: usize,
    /// Replays that failed and went back into the queue
    pub requeued: usize,
    /// `true` when another drain was already running and nothing was done
    pub skipped: bool,
}

impl ReplayReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

enum EvictionReason {
    Expired,
    Capacity,
}

impl EvictionReason {
    fn as_str(&self) -> &'static str {
        match self {
            EvictionReason::Expired => "expired",
            EvictionReason::Capacity => "capacity",
        }
    }
}

pub struct OfflineQueueManager {
    config: OfflineQueueConfig,
    clock: Arc<dyn Clock>,
    queue: Mutex<VecDeque<QueuedRequest>>,
    processing: AtomicBool,
    event_bus: Option<EventBus>,
}

impl OfflineQueueManager {
    /// A `max_queue_size` or `batch_size` of zero is raised to one.
    pub fn new(
        mut config: OfflineQueueConfig,
        clock: Arc<dyn Clock>,
        event_bus: Option<EventBus>,
    ) -> Self {
        if config.max_queue_size == 0 || config.batch_size == 0 {
            warn!(
                max_queue_size = config.max_queue_size,
                batch_size = config.batch_size,
                "Offline queue sizes must be at least 1; clamping"
            );
            config.max_queue_size = config.max_queue_size.max(1);
            config.batch_size = config.batch_size.max(1);
        }

        Self {
            config,
            clock,
            queue: Mutex::new(VecDeque::new()),
            processing: AtomicBool::new(false),
            event_bus,
        }
    }

    pub fn config(&self) -> &OfflineQueueConfig {
        &self.config
    }

    /// Buffer a write for later replay.
    ///
    /// Expired entries are evicted first, then the oldest entry if the queue
    /// is still full.
    ///
    /// # Errors
    ///
    /// [`QueueError::NotMutating`] for GET and HEAD.
    pub fn add_to_queue(&self, request: ApiRequest) -> Result<QueuedRequestId, QueueError> {
        if !request.is_mutating() {
            return Err(QueueError::NotMutating {
                method: request.method,
            });
        }

        let now = self.clock.now();
        let entry = QueuedRequest {
            id: QueuedRequestId::new(),
            request,
            enqueued_at: now,
            attempts: 0,
        };
        let id = entry.id;
        let method = entry.request.method;
        let path = entry.request.path.clone();

        let (evicted, queue_len) = {
            let mut queue = lock(&self.queue);
            let mut evicted = self.evict_expired(&mut queue, now);
            while queue.len() >= self.config.max_queue_size {
                match queue.pop_front() {
                    Some(oldest) => evicted.push((oldest.id, EvictionReason::Capacity)),
                    None => break,
                }
            }
            queue.push_back(entry);
            (evicted, queue.len())
        };

        self.report_evictions(evicted);
        info!(request_id = %id, method = %method, path = %path, queue_len, "Request queued for replay");
        self.emit(QueueEvent::Enqueued {
            request_id: id.to_string(),
            method: method.to_string(),
            path,
            queue_len,
        });

        Ok(id)
    }

    /// Replay everything queued so far through `executor`.
    ///
    /// A call made while another drain is running returns immediately with
    /// `skipped` set on the report and leaves the queue untouched. Replay
    /// failures are never propagated; the configured
    /// [`ReplayFailurePolicy`] decides whether a failed entry is dropped or
    /// queued again.
    pub async fn process_queue<E>(&self, executor: &E) -> ReplayReport
    where
        E: ReplayExecutor + ?Sized,
    {
        if self
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Offline queue drain already in progress");
            return ReplayReport::skipped();
        }
        let _processing = ProcessingGuard(&self.processing);

        let now = self.clock.now();
        let (snapshot, evicted) = {
            let mut queue = lock(&self.queue);
            let evicted = self.evict_expired(&mut queue, now);
            (std::mem::take(&mut *queue), evicted)
        };
        self.report_evictions(evicted);

        let mut report = ReplayReport::default();
        if snapshot.is_empty() {
            return report;
        }

        info!(pending = snapshot.len(), "Replaying offline queue");
        self.emit(QueueEvent::ReplayStarted {
            pending: snapshot.len(),
        });

        let entries: Vec<QueuedRequest> = snapshot.into();
        let mut retry = Vec::new();

        for batch in entries.chunks(self.config.batch_size.max(1)) {
            let outcomes = join_all(
                batch
                    .iter()
                    .map(|entry| executor.replay(entry.request.clone())),
            )
            .await;

            for (entry, outcome) in batch.iter().zip(outcomes) {
                report.attempted += 1;
                match outcome {
                    Ok(()) => {
                        debug!(request_id = %entry.id, "Queued request replayed");
                        report.succeeded += 1;
                    }
                    Err(e) => {
                        let attempts = entry.attempts + 1;
                        match self.config.failure_policy {
                            ReplayFailurePolicy::Requeue { max_attempts }
                                if attempts < max_attempts =>
                            {
                                debug!(request_id = %entry.id, attempts, error = %e, "Replay failed, requeueing");
                                retry.push(QueuedRequest {
                                    attempts,
                                    ..entry.clone()
                                });
                                report.requeued += 1;
                            }
                            _ => {
                                warn!(
                                    request_id = %entry.id,
                                    method = %entry.request.method,
                                    path = %entry.request.path,
                                    error = %e,
                                    "Dropping queued request after failed replay"
                                );
                                report.failed += 1;
                            }
                        }
                    }
                }
            }
        }

        if !retry.is_empty() {
            self.requeue(retry);
        }

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            requeued = report.requeued,
            "Offline queue replay finished"
        );
        self.emit(QueueEvent::ReplayCompleted {
            succeeded: report.succeeded,
            failed: report.failed,
            requeued: report.requeued,
        });

        report
    }

    pub fn len(&self) -> usize {
        lock(&self.queue).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.queue).is_empty()
    }

    /// Snapshot of the queued entries, oldest first.
    pub fn pending(&self) -> Vec<QueuedRequest> {
        lock(&self.queue).iter().cloned().collect()
    }

    /// Discard everything queued. Returns the number of entries dropped.
    pub fn clear(&self) -> usize {
        let mut queue = lock(&self.queue);
        let dropped = queue.len();
        queue.clear();
        if dropped > 0 {
            info!(dropped, "Offline queue cleared");
        }
        dropped
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    /// Put failed replays back ahead of anything queued during the drain.
    fn requeue(&self, entries: Vec<QueuedRequest>) {
        let now = self.clock.now();
        let evicted = {
            let mut queue = lock(&self.queue);
            for entry in entries.into_iter().rev() {
                queue.push_front(entry);
            }
            let mut evicted = self.evict_expired(&mut queue, now);
            while queue.len() > self.config.max_queue_size {
                match queue.pop_front() {
                    Some(oldest) => evicted.push((oldest.id, EvictionReason::Capacity)),
                    None => break,
                }
            }
            evicted
        };
        self.report_evictions(evicted);
    }

    fn evict_expired(
        &self,
        queue: &mut VecDeque<QueuedRequest>,
        now: DateTime<Utc>,
    ) -> Vec<(QueuedRequestId, EvictionReason)> {
        let max_age = self.config.max_age;
        let mut evicted = Vec::new();
        queue.retain(|entry| {
            let expired = (now - entry.enqueued_at)
                .to_std()
                .is_ok_and(|age| age > max_age);
            if expired {
                evicted.push((entry.id, EvictionReason::Expired));
            }
            !expired
        });
        evicted
    }

    fn report_evictions(&self, evicted: Vec<(QueuedRequestId, EvictionReason)>) {
        for (id, reason) in evicted {
            warn!(request_id = %id, reason = reason.as_str(), "Queued request evicted");
            self.emit(QueueEvent::Evicted {
                request_id: id.to_string(),
                reason: reason.as_str().to_string(),
            });
        }
    }

    fn emit(&self, event: QueueEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Queue(event));
        }
    }
}

impl fmt::Debug for OfflineQueueManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflineQueueManager")
            .field("config", &self.config)
            .field("len", &self.len())
            .field("processing", &self.is_processing())
            .finish()
    }
}

struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
