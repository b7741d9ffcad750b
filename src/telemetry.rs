//! Internal fault reporting
//!
//! The pipeline never raises errors to the host. Faults are handed to a
//! [`TelemetrySink`], which must return immediately and never fail.

use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;

/// Why a write was discarded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Writer queue reached its capacity
    QueueFull,
    /// Event exceeds the maximum object size
    TooLarge { size: usize, limit: usize },
    /// Event could not be serialized
    Serialization(String),
    /// Batch file could not be created or appended to
    Storage(String),
    /// Writer task is no longer running
    WriterStopped,
    /// Event has no content
    Empty,
    /// Event could not be split back out of a batch file
    InvalidRecord(String),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "writer queue is full"),
            Self::TooLarge { size, limit } => {
                write!(f, "event of {} bytes exceeds limit of {} bytes", size, limit)
            }
            Self::Serialization(msg) => write!(f, "serialization failed: {}", msg),
            Self::Storage(msg) => write!(f, "storage failure: {}", msg),
            Self::WriterStopped => write!(f, "writer is stopped"),
            Self::Empty => write!(f, "event is empty"),
            Self::InvalidRecord(msg) => write!(f, "invalid record: {}", msg),
        }
    }
}

/// An internal failure worth reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    WriteDropped {
        feature: String,
        reason: DropReason,
    },
    MalformedBatch {
        feature: String,
        file: PathBuf,
        reason: String,
    },
    MigrationFailed {
        feature: String,
        operation: &'static str,
        error: String,
    },
    /// Collector rejected a batch permanently; the batch was deleted
    UploadRejected {
        feature: String,
        file: PathBuf,
        status: u16,
    },
    /// Batch file could not be removed after upload
    CleanupFailed {
        feature: String,
        file: PathBuf,
        error: String,
    },
}

impl Fault {
    pub fn feature(&self) -> &str {
        match self {
            Self::WriteDropped { feature, .. }
            | Self::MalformedBatch { feature, .. }
            | Self::MigrationFailed { feature, .. }
            | Self::UploadRejected { feature, .. }
            | Self::CleanupFailed { feature, .. } => feature,
        }
    }

    /// Short stable label, used as a metric tag
    pub fn kind(&self) -> &'static str {
        match self {
            Self::WriteDropped { .. } => "write_dropped",
            Self::MalformedBatch { .. } => "malformed_batch",
            Self::MigrationFailed { .. } => "migration_failed",
            Self::UploadRejected { .. } => "upload_rejected",
            Self::CleanupFailed { .. } => "cleanup_failed",
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WriteDropped { feature, reason } => {
                write!(f, "[{}] write dropped: {}", feature, reason)
            }
            Self::MalformedBatch { feature, file, reason } => {
                write!(f, "[{}] malformed batch {}: {}", feature, file.display(), reason)
            }
            Self::MigrationFailed { feature, operation, error } => {
                write!(f, "[{}] {} failed: {}", feature, operation, error)
            }
            Self::UploadRejected { feature, file, status } => {
                write!(
                    f,
                    "[{}] batch {} rejected with status {}",
                    feature,
                    file.display(),
                    status
                )
            }
            Self::CleanupFailed { feature, file, error } => {
                write!(f, "[{}] could not delete {}: {}", feature, file.display(), error)
            }
        }
    }
}

/// Fire-and-forget fault reporting
pub trait TelemetrySink: Send + Sync {
    fn report(&self, fault: Fault);
}

/// Default sink: structured log line plus a fault counter
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn report(&self, fault: Fault) {
        crate::metrics::record_fault(fault.feature(), fault.kind());

        match &fault {
            Fault::UploadRejected { .. } | Fault::MigrationFailed { .. } => {
                tracing::error!(feature = fault.feature(), kind = fault.kind(), "{}", fault);
            }
            _ => {
                tracing::warn!(feature = fault.feature(), kind = fault.kind(), "{}", fault);
            }
        }
    }
}

/// Sink that keeps every fault in memory
#[derive(Debug, Default)]
pub struct InMemoryTelemetry {
    faults: Mutex<Vec<Fault>>,
}

impl InMemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> Vec<Fault> {
        self.faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn count_kind(&self, kind: &str) -> usize {
        self.faults().iter().filter(|f| f.kind() == kind).count()
    }
}

impl TelemetrySink for InMemoryTelemetry {
    fn report(&self, fault: Fault) {
        self.faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(fault);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_records_faults() {
        let sink = InMemoryTelemetry::new();
        sink.report(Fault::WriteDropped {
            feature: "tracing".to_string(),
            reason: DropReason::QueueFull,
        });
        sink.report(Fault::UploadRejected {
            feature: "tracing".to_string(),
            file: PathBuf::from("1700000000000"),
            status: 400,
        });

        assert_eq!(sink.faults().len(), 2);
        assert_eq!(sink.count_kind("upload_rejected"), 1);
        assert_eq!(sink.faults()[0].feature(), "tracing");
    }

    #[test]
    fn test_fault_display() {
        let fault = Fault::WriteDropped {
            feature: "logging".to_string(),
            reason: DropReason::TooLarge { size: 10, limit: 4 },
        };
        assert_eq!(
            fault.to_string(),
            "[logging] write dropped: event of 10 bytes exceeds limit of 4 bytes"
        );
    }
}
