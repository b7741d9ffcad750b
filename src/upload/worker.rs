//! Recurring upload task
//!
//! ```text
//! idle ──▶ checking conditions ──▶ sending ──┬──▶ idle         (success / nothing to send)
//!  ▲              │                          ├──▶ idle         (batch rejected)
//!  │              └──▶ idle (skipped)        └──▶ backing off  (retriable failure)
//!  └──────────────────────────────────────────────────┘
//! ```

use super::client::Transport;
use super::conditions::{Blocker, DeliveryConditions};
use super::delay::UploadDelay;
use super::request::RequestBuilder;
use super::status::{classify_status, is_invalid_credentials, DeliveryStatus};
use crate::config::UploadConfig;
use crate::storage::{Batch, EventReader};
use crate::telemetry::{Fault, TelemetrySink};
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    CheckingConditions,
    Sending,
    BackingOff,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Delivery conditions unmet; no batch was read
    Skipped(Vec<Blocker>),
    /// Every attempted batch was accepted; `exhausted` when the directory ran empty
    Completed { uploaded: usize, exhausted: bool },
    /// A retriable failure stopped the cycle; the batch is kept
    BackingOff { uploaded: usize },
    /// The collector refused a batch for good; it was deleted
    Rejected { uploaded: usize, status: u16 },
}

/// Signal sent to the worker task at teardown
#[derive(Debug, Clone, Copy)]
pub enum ShutdownSignal {
    /// Run a last drain, then stop
    FlushAndTearDown,
}

/// State shared between the worker task and its handle
#[derive(Debug)]
struct WorkerStatus {
    state: ArcSwap<SchedulerState>,
    delay_ms: AtomicU64,
}

impl WorkerStatus {
    fn new(delay: Duration) -> Self {
        Self {
            state: ArcSwap::from_pointee(SchedulerState::Idle),
            delay_ms: AtomicU64::new(delay.as_millis() as u64),
        }
    }

    fn state(&self) -> SchedulerState {
        **self.state.load()
    }

    fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms.load(Ordering::Relaxed))
    }
}

/// Uploads one feature's authorized batches
pub struct UploadWorker {
    feature: Arc<str>,
    reader: EventReader,
    request_builder: RequestBuilder,
    transport: Arc<dyn Transport>,
    conditions: DeliveryConditions,
    telemetry: Arc<dyn TelemetrySink>,
    delay: UploadDelay,
    max_batches_per_cycle: usize,
    teardown_timeout: Duration,
    status: Arc<WorkerStatus>,
}

impl UploadWorker {
    pub fn new(
        feature: &str,
        reader: EventReader,
        request_builder: RequestBuilder,
        transport: Arc<dyn Transport>,
        conditions: DeliveryConditions,
        config: &UploadConfig,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        let delay = UploadDelay::from_config(config);
        let status = Arc::new(WorkerStatus::new(delay.current()));

        Self {
            feature: Arc::from(feature),
            reader,
            request_builder,
            transport,
            conditions,
            telemetry,
            delay,
            max_batches_per_cycle: config.max_batches_per_cycle,
            teardown_timeout: config.teardown_timeout(),
            status,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.status.state()
    }

    /// Wait before the next cycle, before jitter
    pub fn current_delay(&self) -> Duration {
        self.delay.current()
    }

    /// Run one upload cycle
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.set_state(SchedulerState::CheckingConditions);

        if let Err(blockers) = self.conditions.check() {
            tracing::debug!(
                feature = %self.feature,
                blockers = %blockers.iter().map(|b| b.to_string()).collect::<Vec<_>>().join(", "),
                "Delivery conditions unmet, skipping upload cycle"
            );
            self.set_state(if self.delay.is_backing_off() {
                SchedulerState::BackingOff
            } else {
                SchedulerState::Idle
            });
            return CycleOutcome::Skipped(blockers);
        }

        let mut uploaded = 0;
        let outcome = loop {
            if uploaded >= self.max_batches_per_cycle {
                break CycleOutcome::Completed {
                    uploaded,
                    exhausted: false,
                };
            }

            let Some(batch) = self.reader.read_next_batch().await else {
                break CycleOutcome::Completed {
                    uploaded,
                    exhausted: true,
                };
            };

            self.set_state(SchedulerState::Sending);

            match self.upload(&batch).await {
                Delivery::Accepted => {
                    self.reader.mark_as_confirmed(&batch).await;
                    uploaded += 1;
                }
                Delivery::Retry => {
                    self.reader.mark_as_failed(&batch, false).await;
                    break CycleOutcome::BackingOff { uploaded };
                }
                Delivery::Rejected(status) => {
                    self.reader.mark_as_failed(&batch, true).await;
                    self.telemetry.report(Fault::UploadRejected {
                        feature: self.feature.to_string(),
                        file: batch.file.clone(),
                        status,
                    });
                    break CycleOutcome::Rejected { uploaded, status };
                }
            }
        };

        match &outcome {
            CycleOutcome::BackingOff { .. } => {
                self.delay.increase();
                tracing::info!(
                    feature = %self.feature,
                    delay_ms = self.delay.current().as_millis() as u64,
                    "Upload failed, backing off"
                );
                self.set_state(SchedulerState::BackingOff);
            }
            _ => {
                if self.delay.is_backing_off() {
                    tracing::info!(feature = %self.feature, "Uploads recovered, resetting delay");
                }
                self.delay.reset();
                self.set_state(SchedulerState::Idle);
            }
        }

        self.status
            .delay_ms
            .store(self.delay.current().as_millis() as u64, Ordering::Relaxed);
        crate::metrics::update_upload_delay(&self.feature, self.delay.current());

        outcome
    }

    async fn upload(&self, batch: &Batch) -> Delivery {
        let request = self.request_builder.build(batch.payload());
        let request_id = request.request_id().unwrap_or_default().to_string();
        let started = Instant::now();

        let result = self.transport.send(request).await;
        let duration = started.elapsed();

        match result {
            Ok(status) => match classify_status(status) {
                DeliveryStatus::Success => {
                    tracing::debug!(
                        feature = %self.feature,
                        file = %batch.file.display(),
                        request_id = %request_id,
                        status = status.as_u16(),
                        size = batch.size(),
                        duration_ms = duration.as_millis() as u64,
                        "Batch uploaded"
                    );
                    crate::metrics::record_upload(&self.feature, "success", duration);
                    Delivery::Accepted
                }
                DeliveryStatus::Retriable => {
                    tracing::warn!(
                        feature = %self.feature,
                        request_id = %request_id,
                        status = status.as_u16(),
                        "Collector unavailable, batch kept for retry"
                    );
                    crate::metrics::record_upload(&self.feature, "retriable", duration);
                    Delivery::Retry
                }
                DeliveryStatus::NonRetriable => {
                    if is_invalid_credentials(status) {
                        tracing::error!(
                            feature = %self.feature,
                            status = status.as_u16(),
                            "Collector rejected the API key, check identity.api_key"
                        );
                    }
                    crate::metrics::record_upload(&self.feature, "rejected", duration);
                    Delivery::Rejected(status.as_u16())
                }
            },
            Err(e) => {
                tracing::warn!(
                    feature = %self.feature,
                    request_id = %request_id,
                    error = %e,
                    "Upload attempt failed, batch kept for retry"
                );
                crate::metrics::record_upload(&self.feature, "error", duration);
                Delivery::Retry
            }
        }
    }

    fn set_state(&self, state: SchedulerState) {
        self.status.state.store(Arc::new(state));
    }

    /// Start the recurring schedule
    pub fn spawn(self) -> UploadHandle {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let feature = self.feature.clone();
        let status = self.status.clone();
        let teardown_timeout = self.teardown_timeout;

        let task = tokio::spawn(self.run(shutdown_rx));

        UploadHandle {
            feature,
            shutdown: shutdown_tx,
            task: Mutex::new(Some(task)),
            status,
            teardown_timeout,
        }
    }

    async fn run(mut self, mut shutdown: broadcast::Receiver<ShutdownSignal>) {
        tracing::debug!(feature = %self.feature, "Upload worker started");

        loop {
            let wait = self.delay.next_wait();
            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    self.run_cycle().await;
                }
                _ = shutdown.recv() => {
                    break;
                }
            }
        }

        self.drain().await;
        tracing::debug!(feature = %self.feature, "Upload worker stopped");
    }

    /// Upload until the directory is empty or the collector stops accepting
    async fn drain(&mut self) {
        loop {
            match self.run_cycle().await {
                CycleOutcome::Completed {
                    exhausted: false, ..
                }
                | CycleOutcome::Rejected { .. } => continue,
                _ => break,
            }
        }
    }
}

enum Delivery {
    Accepted,
    Retry,
    Rejected(u16),
}

/// Owner side of a running upload worker
#[derive(Debug)]
pub struct UploadHandle {
    feature: Arc<str>,
    shutdown: broadcast::Sender<ShutdownSignal>,
    task: Mutex<Option<JoinHandle<()>>>,
    status: Arc<WorkerStatus>,
    teardown_timeout: Duration,
}

impl UploadHandle {
    pub fn state(&self) -> SchedulerState {
        self.status.state()
    }

    pub fn current_delay(&self) -> Duration {
        self.status.delay()
    }

    /// Stop scheduling after one final bounded drain
    ///
    /// Returns once the worker has stopped or the teardown timeout elapsed, whichever
    /// comes first. Calling it again does nothing.
    pub async fn flush_and_tear_down(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(mut task) = task else {
            return;
        };

        let _ = self.shutdown.send(ShutdownSignal::FlushAndTearDown);

        match tokio::time::timeout(self.teardown_timeout, &mut task).await {
            Ok(Ok(())) => {
                tracing::info!(feature = %self.feature, "Upload worker torn down");
            }
            Ok(Err(e)) => {
                tracing::error!(feature = %self.feature, error = %e, "Upload worker task failed");
            }
            Err(_) => {
                tracing::warn!(
                    feature = %self.feature,
                    timeout_ms = self.teardown_timeout.as_millis() as u64,
                    "Final drain did not finish in time, aborting upload worker"
                );
                task.abort();
            }
        }
    }
}
