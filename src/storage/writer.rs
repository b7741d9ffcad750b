//! Serialized batch file writer
//!
//! Every feature has one writer task fed by a channel. Writes, consent changes and
//! flushes are processed strictly in the order they were submitted, so:
//! - bytes of two writes never interleave inside a batch file
//! - a write lands in the directory matching the consent in effect when it was accepted
//! - migrations never run while a file they touch is being appended to

use super::directory::{delete_file, Directory, DirectorySet};
use super::format::DataFormat;
use super::migration::{initial_migration, resolve_migration, Migration};
use super::{now_millis, ActiveFileSlot};
use crate::config::StorageConfig;
use crate::consent::{ConsentObserver, ConsentProvider, TrackingConsent};
use crate::error::{StorageError, StorageResult};
use crate::telemetry::{DropReason, Fault, TelemetrySink};
use futures::FutureExt;
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

#[derive(Debug)]
enum WriterCommand {
    Write(Vec<u8>),
    ConsentChanged {
        previous: TrackingConsent,
        current: TrackingConsent,
    },
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a feature's writer task
///
/// Cheap to clone. `write` never blocks: it only enqueues.
#[derive(Clone)]
pub struct EventWriter {
    feature: Arc<str>,
    sender: mpsc::UnboundedSender<WriterCommand>,
    pending: Arc<AtomicUsize>,
    queue_capacity: usize,
    max_object_size: u64,
    format: DataFormat,
    telemetry: Arc<dyn TelemetrySink>,
}

impl EventWriter {
    /// Spawn the writer task and subscribe it to consent changes
    ///
    /// The task first runs the initial migration, then starts from the consent value
    /// current at subscription time.
    pub fn spawn(
        feature: &str,
        directories: DirectorySet,
        format: DataFormat,
        config: StorageConfig,
        consent: &ConsentProvider,
        active: ActiveFileSlot,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let feature: Arc<str> = Arc::from(feature);

        let writer = Self {
            feature: feature.clone(),
            sender: tx,
            pending: pending.clone(),
            queue_capacity: config.queue_capacity,
            max_object_size: config.max_object_size,
            format: format.clone(),
            telemetry: telemetry.clone(),
        };

        // Subscribing before the task starts means no transition can slip in between.
        let initial_consent = consent.subscribe(Arc::new(writer.clone()));

        let task = WriterTask {
            feature: feature.clone(),
            directories,
            format,
            config,
            consent: initial_consent,
            active: None,
            slot: active,
            last_created_at_ms: 0,
            directory_size: None,
            pending,
            telemetry,
        };

        tokio::spawn(async move {
            let result = std::panic::AssertUnwindSafe(task.run(rx)).catch_unwind().await;
            if let Err(e) = result {
                tracing::error!(feature = %feature, panic = ?e, "Writer task panicked");
            }
        });

        writer
    }

    /// A writer whose task never processes anything
    #[cfg(test)]
    pub(crate) fn stalled(feature: &str, telemetry: Arc<dyn TelemetrySink>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let _rx = rx;
            std::future::pending::<()>().await;
        });

        Self {
            feature: Arc::from(feature),
            sender: tx,
            pending: Arc::new(AtomicUsize::new(0)),
            queue_capacity: usize::MAX,
            max_object_size: u64::MAX,
            format: DataFormat::newline(),
            telemetry,
        }
    }

    pub fn feature(&self) -> &str {
        &self.feature
    }

    /// Queue an already serialized event
    pub fn write(&self, event: impl Into<Vec<u8>>) {
        let data = event.into();

        if data.is_empty() {
            self.drop_event(DropReason::Empty);
            return;
        }

        if data.len() as u64 > self.max_object_size {
            self.drop_event(DropReason::TooLarge {
                size: data.len(),
                limit: self.max_object_size as usize,
            });
            return;
        }

        if let Err(reason) = self.format.check_record(&data) {
            self.drop_event(DropReason::InvalidRecord(reason));
            return;
        }

        if self.pending.fetch_add(1, Ordering::AcqRel) >= self.queue_capacity {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            self.drop_event(DropReason::QueueFull);
            return;
        }

        if self.sender.send(WriterCommand::Write(data)).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            self.drop_event(DropReason::WriterStopped);
        }
    }

    /// Serialize an event as compact JSON and queue it
    pub fn write_json<T: Serialize + ?Sized>(&self, event: &T) {
        match serde_json::to_vec(event) {
            Ok(data) => self.write(data),
            Err(e) => self.drop_event(DropReason::Serialization(e.to_string())),
        }
    }

    /// Close the active batch file once every earlier write is on disk
    ///
    /// Returns `false` if the writer is no longer running.
    pub async fn flush(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(WriterCommand::Flush(tx)).is_err() {
            return false;
        }
        rx.await.is_ok()
    }

    /// Close the active batch file and stop the writer task
    pub async fn shutdown(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(WriterCommand::Shutdown(tx)).is_err() {
            return false;
        }
        rx.await.is_ok()
    }

    fn drop_event(&self, reason: DropReason) {
        let label = match &reason {
            DropReason::QueueFull => "queue_full",
            DropReason::TooLarge { .. } => "too_large",
            DropReason::Serialization(_) => "serialization",
            DropReason::Storage(_) => "storage",
            DropReason::WriterStopped => "writer_stopped",
            DropReason::Empty => "empty",
            DropReason::InvalidRecord(_) => "invalid_record",
        };
        crate::metrics::record_event_dropped(&self.feature, label);
        self.telemetry.report(Fault::WriteDropped {
            feature: self.feature.to_string(),
            reason,
        });
    }
}

impl ConsentObserver for EventWriter {
    fn consent_changed(&self, previous: TrackingConsent, current: TrackingConsent) {
        let command = WriterCommand::ConsentChanged { previous, current };
        if self.sender.send(command).is_err() {
            tracing::debug!(feature = %self.feature, "Writer stopped, ignoring consent change");
        }
    }

    fn is_active(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// The file currently being appended to
struct ActiveBatch {
    path: PathBuf,
    file: File,
    size: u64,
    records: usize,
    opened_at: Instant,
}

struct WriterTask {
    feature: Arc<str>,
    directories: DirectorySet,
    format: DataFormat,
    config: StorageConfig,
    consent: TrackingConsent,
    active: Option<ActiveBatch>,
    slot: ActiveFileSlot,
    last_created_at_ms: u64,
    /// Running size of the directory being written, `None` when unknown
    directory_size: Option<u64>,
    pending: Arc<AtomicUsize>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl WriterTask {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<WriterCommand>) {
        self.run_migration(initial_migration()).await;

        loop {
            let deadline = self.rotation_deadline();

            tokio::select! {
                command = rx.recv() => match command {
                    Some(WriterCommand::Write(data)) => {
                        self.pending.fetch_sub(1, Ordering::AcqRel);
                        self.write(data).await;
                    }
                    Some(WriterCommand::ConsentChanged { previous, current }) => {
                        self.change_consent(previous, current).await;
                    }
                    Some(WriterCommand::Flush(ack)) => {
                        self.close_active("flush").await;
                        let _ = ack.send(());
                    }
                    Some(WriterCommand::Shutdown(ack)) => {
                        self.close_active("shutdown").await;
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        self.close_active("shutdown").await;
                        break;
                    }
                },

                // Close a quiet file so the reader can pick it up
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.close_active("age").await;
                }
            }
        }

        tracing::debug!(feature = %self.feature, "Writer task shutting down");
    }

    fn rotation_deadline(&self) -> Option<Instant> {
        self.active
            .as_ref()
            .map(|active| active.opened_at + self.config.max_file_age_for_write())
    }

    fn target_directory(&self) -> Option<Directory> {
        match self.consent {
            TrackingConsent::Granted => Some(self.directories.authorized.clone()),
            TrackingConsent::Pending => Some(self.directories.unauthorized.clone()),
            TrackingConsent::NotGranted => None,
        }
    }

    async fn write(&mut self, data: Vec<u8>) {
        let Some(directory) = self.target_directory() else {
            tracing::trace!(feature = %self.feature, "Consent not granted, discarding event");
            crate::metrics::record_event_dropped(&self.feature, "consent");
            return;
        };

        if let Some(trigger) = self.rotation_trigger(data.len() as u64) {
            self.close_active(trigger).await;
        }

        if self.active.is_none() {
            if let Err(e) = self.open_batch(&directory).await {
                self.report_drop(DropReason::Storage(e.to_string()));
                return;
            }
        }

        let Some(active) = self.active.as_mut() else {
            return;
        };

        let separator = self.format.separator_bytes();
        let mut buffer = Vec::with_capacity(separator.len() + data.len());
        if active.records > 0 {
            buffer.extend_from_slice(separator);
        }
        buffer.extend_from_slice(&data);

        if let Err(e) = append(&mut active.file, &buffer).await {
            let error = StorageError::io("Failed to append to batch file", &active.path, e);
            self.report_drop(DropReason::Storage(error.to_string()));
            self.close_active("error").await;
            return;
        }

        active.size += buffer.len() as u64;
        active.records += 1;
        crate::metrics::record_event_written(&self.feature, data.len());

        if let Some(size) = self.directory_size.as_mut() {
            *size += buffer.len() as u64;
            if *size > self.config.max_directory_size {
                self.enforce_size_limit(&directory).await;
            }
        }
    }

    fn rotation_trigger(&self, record_len: u64) -> Option<&'static str> {
        let active = self.active.as_ref()?;
        let separator_len = self.format.separator_bytes().len() as u64;

        if active.records >= self.config.max_objects_per_file {
            Some("count")
        } else if active.size + separator_len + record_len > self.config.max_file_size {
            Some("size")
        } else if active.opened_at.elapsed() >= self.config.max_file_age_for_write() {
            Some("age")
        } else {
            None
        }
    }

    async fn open_batch(&mut self, directory: &Directory) -> StorageResult<()> {
        directory.create().await?;
        self.enforce_size_limit(directory).await;

        let mut created_at_ms = now_millis().max(self.last_created_at_ms + 1);
        loop {
            let path = directory.file_path(created_at_ms);

            // Published before the file exists so the reader can never see it unannounced
            self.slot.store(Some(Arc::new(path.clone())));

            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => {
                    tracing::debug!(feature = %self.feature, file = %path.display(), "Opened batch file");
                    self.last_created_at_ms = created_at_ms;
                    self.active = Some(ActiveBatch {
                        path,
                        file,
                        size: 0,
                        records: 0,
                        opened_at: Instant::now(),
                    });
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    created_at_ms += 1;
                }
                Err(e) => {
                    self.slot.store(None);
                    return Err(StorageError::io("Failed to create batch file", path, e));
                }
            }
        }
    }

    async fn close_active(&mut self, trigger: &'static str) {
        let Some(mut active) = self.active.take() else {
            return;
        };

        if let Err(e) = active.file.flush().await {
            tracing::warn!(feature = %self.feature, file = %active.path.display(), error = %e, "Failed to flush batch file");
        }
        drop(active.file);

        // A file that never received a record would only be reported as malformed later
        if active.records == 0 {
            let _ = delete_file(&active.path).await;
        }

        self.slot.store(None);

        tracing::debug!(
            feature = %self.feature,
            file = %active.path.display(),
            records = active.records,
            size = active.size,
            trigger = trigger,
            "Closed batch file"
        );
        crate::metrics::record_rotation(&self.feature, trigger);
    }

    /// Delete the oldest closed files until the directory fits under the ceiling
    async fn enforce_size_limit(&mut self, directory: &Directory) {
        let files = match directory.files().await {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(feature = %self.feature, error = %e, "Failed to measure directory");
                self.directory_size = None;
                return;
            }
        };

        let mut total: u64 = files.iter().map(|f| f.size).sum();
        let active_path = self.active.as_ref().map(|a| a.path.clone());
        let mut evicted = 0u64;

        for file in &files {
            if total <= self.config.max_directory_size {
                break;
            }
            if active_path.as_ref() == Some(&file.path) {
                continue;
            }

            match delete_file(&file.path).await {
                Ok(()) => {
                    total -= file.size;
                    evicted += 1;
                }
                Err(e) if e.is_not_found() => total -= file.size,
                Err(e) => {
                    tracing::warn!(feature = %self.feature, error = %e, "Failed to evict batch file");
                }
            }
        }

        if evicted > 0 {
            tracing::info!(
                feature = %self.feature,
                directory = %directory.path().display(),
                evicted = evicted,
                remaining_bytes = total,
                "Evicted oldest batch files to respect the size ceiling"
            );
            crate::metrics::record_eviction(&self.feature, evicted);
        }

        self.directory_size = Some(total);
    }

    async fn change_consent(&mut self, previous: TrackingConsent, current: TrackingConsent) {
        // No batch file spans a consent transition
        self.close_active("consent").await;
        self.consent = current;
        self.directory_size = None;

        if let Some(migration) = resolve_migration(previous, current) {
            self.run_migration(migration).await;

            // Moved files count against the authorized ceiling right away
            if migration == Migration::MoveUnauthorizedToAuthorized {
                let authorized = self.directories.authorized.clone();
                self.enforce_size_limit(&authorized).await;
            }
        }
    }

    async fn run_migration(&mut self, migration: Migration) {
        match migration.execute(&self.directories).await {
            Ok(files) => {
                tracing::info!(
                    feature = %self.feature,
                    migration = migration.name(),
                    files = files,
                    "Migration completed"
                );
                crate::metrics::record_migration(&self.feature, migration.name(), files as u64);
            }
            Err(e) => {
                self.telemetry.report(Fault::MigrationFailed {
                    feature: self.feature.to_string(),
                    operation: migration.name(),
                    error: e.to_string(),
                });
            }
        }
    }

    fn report_drop(&self, reason: DropReason) {
        crate::metrics::record_event_dropped(&self.feature, "storage");
        self.telemetry.report(Fault::WriteDropped {
            feature: self.feature.to_string(),
            reason,
        });
    }
}

async fn append(file: &mut File, buffer: &[u8]) -> io::Result<()> {
    file.write_all(buffer).await?;
    file.flush().await
}
