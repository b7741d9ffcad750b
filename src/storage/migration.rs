//! Consent-driven migration of buffered data
//!
//! | previous    | new         | action                                   |
//! |-------------|-------------|------------------------------------------|
//! | pending     | not_granted | discard the unauthorized directory       |
//! | pending     | granted     | move unauthorized files into authorized  |
//! | granted     | *           | none                                     |
//! | not_granted | *           | none                                     |
//!
//! At startup [`initial_migration`] discards whatever a previous run left in the
//! unauthorized directory.

use super::directory::DirectorySet;
use crate::consent::TrackingConsent;
use crate::error::StorageResult;

/// Bulk operation over a feature's directories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Migration {
    /// Delete every file in the unauthorized directory
    DiscardUnauthorized,
    /// Move every unauthorized file into the authorized directory, oldest first
    MoveUnauthorizedToAuthorized,
}

impl Migration {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DiscardUnauthorized => "discard_unauthorized",
            Self::MoveUnauthorizedToAuthorized => "move_unauthorized_to_authorized",
        }
    }

    /// Run the migration; returns the number of files affected
    ///
    /// Idempotent: a second run finds the source empty and does nothing.
    pub async fn execute(&self, directories: &DirectorySet) -> StorageResult<usize> {
        match self {
            Self::DiscardUnauthorized => directories.unauthorized.delete_all().await,
            Self::MoveUnauthorizedToAuthorized => {
                directories
                    .unauthorized
                    .move_all_to(&directories.authorized)
                    .await
            }
        }
    }
}

/// Migration required by a consent transition, if any
pub fn resolve_migration(previous: TrackingConsent, current: TrackingConsent) -> Option<Migration> {
    use TrackingConsent::*;

    match (previous, current) {
        (Pending, NotGranted) => Some(Migration::DiscardUnauthorized),
        (Pending, Granted) => Some(Migration::MoveUnauthorizedToAuthorized),
        (Pending, Pending) => None,
        (Granted, _) => None,
        (NotGranted, _) => None,
    }
}

/// Migration run once per feature before its first write
pub fn initial_migration() -> Migration {
    Migration::DiscardUnauthorized
}
