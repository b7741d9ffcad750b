use crate::storage::{DirectorySet, EventWriter};
use crate::upload::{SchedulerState, UploadHandle};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;

/// A registered telemetry stream
///
/// Writes go through the feature's serialized writer; uploads run on its own worker.
/// Nothing here ever returns an error to the caller.
pub struct FeatureHandle {
    name: String,
    writer: EventWriter,
    uploader: UploadHandle,
    directories: DirectorySet,
    teardown_timeout: Duration,
}

impl FeatureHandle {
    pub(crate) fn new(
        name: String,
        writer: EventWriter,
        uploader: UploadHandle,
        directories: DirectorySet,
        teardown_timeout: Duration,
    ) -> Self {
        Self {
            name,
            writer,
            uploader,
            directories,
            teardown_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue an already serialized record
    pub fn write(&self, event: impl Into<Vec<u8>>) {
        self.writer.write(event);
    }

    /// Queue a record serialized as compact JSON
    pub fn write_json<T: Serialize + ?Sized>(&self, event: &T) {
        self.writer.write_json(event);
    }

    /// Close the active batch file so it becomes uploadable
    pub async fn flush(&self) -> bool {
        self.writer.flush().await
    }

    pub fn directories(&self) -> &DirectorySet {
        &self.directories
    }

    pub fn upload_state(&self) -> SchedulerState {
        self.uploader.state()
    }

    pub fn upload_delay(&self) -> Duration {
        self.uploader.current_delay()
    }

    /// Flush, drain uploads, then stop the writer
    ///
    /// Each of the three steps is bounded by the teardown timeout.
    pub(crate) async fn tear_down(&self) {
        self.bounded("flush", self.writer.flush()).await;
        self.uploader.flush_and_tear_down().await;
        self.bounded("shutdown", self.writer.shutdown()).await;
        tracing::info!(feature = %self.name, "Feature torn down");
    }

    async fn bounded(&self, step: &'static str, future: impl Future<Output = bool>) {
        if tokio::time::timeout(self.teardown_timeout, future).await.is_err() {
            tracing::warn!(
                feature = %self.name,
                step = step,
                timeout_ms = self.teardown_timeout.as_millis() as u64,
                "Writer did not finish before the teardown timeout"
            );
        }
    }
}

impl std::fmt::Debug for FeatureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureHandle")
            .field("name", &self.name)
            .field("directories", &self.directories)
            .field("upload_state", &self.upload_state())
            .finish()
    }
}
