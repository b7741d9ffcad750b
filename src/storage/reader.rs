use super::directory::{delete_file, Directory};
use super::format::DataFormat;
use super::{now_millis, ActiveFileSlot};
use crate::error::StorageError;
use crate::telemetry::{Fault, TelemetrySink};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Content of one closed batch file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub file: PathBuf,
    pub created_at_ms: u64,
    content: Vec<u8>,
    format: DataFormat,
}

impl Batch {
    /// Request body: the records wrapped in the feature's prefix and suffix
    pub fn payload(&self) -> Vec<u8> {
        self.format.wrap(&self.content)
    }

    pub fn records(&self) -> Vec<&[u8]> {
        self.format.split(&self.content)
    }

    /// Size of the file content in bytes
    pub fn size(&self) -> usize {
        self.content.len()
    }
}

/// Hands out the oldest uploadable batch of a feature's authorized directory
pub struct EventReader {
    feature: Arc<str>,
    directory: Directory,
    format: DataFormat,
    max_file_age: Duration,
    active: ActiveFileSlot,
    telemetry: Arc<dyn TelemetrySink>,
}

impl EventReader {
    pub fn new(
        feature: &str,
        directory: Directory,
        format: DataFormat,
        max_file_age: Duration,
        active: ActiveFileSlot,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            feature: Arc::from(feature),
            directory,
            format,
            max_file_age,
            active,
            telemetry,
        }
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Oldest closed batch, if any
    ///
    /// Obsolete and malformed files met on the way are deleted.
    pub async fn read_next_batch(&self) -> Option<Batch> {
        let files = match self.directory.files().await {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(feature = %self.feature, error = %e, "Failed to list batch files");
                return None;
            }
        };

        // Loaded after listing: a file in the listing that is still being written is
        // necessarily the one published here.
        let active = self.active.load_full();
        let now = now_millis();
        let max_age_ms = self.max_file_age.as_millis() as u64;

        for file in files {
            if active.as_deref() == Some(&file.path) {
                continue;
            }

            if now.saturating_sub(file.created_at_ms) > max_age_ms {
                tracing::debug!(
                    feature = %self.feature,
                    file = %file.path.display(),
                    "Deleting obsolete batch file"
                );
                self.delete(&file.path).await;
                continue;
            }

            let content = match tokio::fs::read(&file.path).await {
                Ok(content) => content,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    tracing::warn!(
                        feature = %self.feature,
                        file = %file.path.display(),
                        error = %e,
                        "Failed to read batch file"
                    );
                    continue;
                }
            };

            if let Err(reason) = self.format.validate(&content) {
                let error = StorageError::MalformedBatch {
                    path: file.path.clone(),
                    reason: reason.clone(),
                };
                tracing::warn!(feature = %self.feature, error = %error, "Deleting malformed batch file");
                self.telemetry.report(Fault::MalformedBatch {
                    feature: self.feature.to_string(),
                    file: file.path.clone(),
                    reason,
                });
                self.delete(&file.path).await;
                continue;
            }

            return Some(Batch {
                file: file.path,
                created_at_ms: file.created_at_ms,
                content,
                format: self.format.clone(),
            });
        }

        None
    }

    /// The batch was delivered; it is deleted and never read again
    pub async fn mark_as_confirmed(&self, batch: &Batch) {
        self.delete(&batch.file).await;
    }

    /// The batch was not delivered
    ///
    /// A permanent failure deletes it. Otherwise it stays and is read again next cycle.
    pub async fn mark_as_failed(&self, batch: &Batch, permanently: bool) {
        if permanently {
            self.delete(&batch.file).await;
        } else {
            tracing::debug!(
                feature = %self.feature,
                file = %batch.file.display(),
                "Keeping batch for retry"
            );
        }
    }

    async fn delete(&self, path: &Path) {
        match delete_file(path).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => self.telemetry.report(Fault::CleanupFailed {
                feature: self.feature.to_string(),
                file: path.to_path_buf(),
                error: e.to_string(),
            }),
        }
    }
}
