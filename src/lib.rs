pub mod config;
pub mod consent;
pub mod error;
pub mod feature;
pub mod metrics;
pub mod pipeline;
pub mod storage;
pub mod telemetry;
pub mod upload;

pub use config::{load_config, validate_config, PipelineConfig};
pub use consent::{ConsentObserver, ConsentProvider, TrackingConsent};
pub use error::{PipelineError, StorageError, UploadError};
pub use feature::FeatureHandle;
pub use pipeline::{Pipeline, PipelineBuilder};
pub use storage::DataFormat;
pub use telemetry::{DropReason, Fault, InMemoryTelemetry, TelemetrySink, TracingTelemetry};
pub use upload::{CycleOutcome, DeliveryConditions, SchedulerState};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing/logging
///
/// Note: This function can only be called once. Hosts that install their own
/// subscriber should not call it.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}

/// Same as [`init_tracing`] with one JSON object per line
pub fn init_tracing_json() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().with_current_span(false))
        .init();
}
