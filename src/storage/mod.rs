//! On-disk event buffer
//!
//! Each feature owns a [`DirectorySet`]: an unauthorized directory holding data written
//! while consent is pending, and an authorized directory whose batches are eligible
//! for upload.
//!
//! ```text
//! write ──▶ EventWriter ──▶ <root>/<feature>/intermediate-v1   (pending)
//!                      └──▶ <root>/<feature>/v1                (granted)
//!                                  │
//!                 Migration ───────┘  (consent change)
//!                                  ▼
//!                            EventReader ──▶ upload worker
//! ```
//!
//! Batch files are named after their creation time in milliseconds and are never
//! modified after the writer closes them. The writer publishes the path of the file it
//! is appending to so the reader never touches it.

pub mod directory;
pub mod format;
pub mod migration;
pub mod reader;
pub mod writer;

pub use directory::{BatchFile, Directory, DirectorySet};
pub use format::DataFormat;
pub use migration::{initial_migration, resolve_migration, Migration};
pub use reader::{Batch, EventReader};
pub use writer::EventWriter;

use arc_swap::ArcSwapOption;
use std::path::PathBuf;
use std::sync::Arc;

/// Path of the batch file the writer currently appends to, if any
pub type ActiveFileSlot = Arc<ArcSwapOption<PathBuf>>;

/// Milliseconds since the UNIX epoch
pub(crate) fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
