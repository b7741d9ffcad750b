use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Register metric descriptions with whatever recorder the host installed
///
/// Safe to call more than once. Without a recorder every call below is a no-op.
pub fn describe_metrics() {
    describe_counter!(
        "telemetry_events_written_total",
        "Events appended to a batch file"
    );
    describe_counter!(
        "telemetry_bytes_written_total",
        "Record bytes appended to batch files"
    );
    describe_counter!(
        "telemetry_events_dropped_total",
        "Events discarded before reaching disk"
    );
    describe_counter!(
        "telemetry_batches_rotated_total",
        "Batch files closed for writing"
    );
    describe_counter!(
        "telemetry_batches_evicted_total",
        "Batch files deleted to respect the directory size ceiling"
    );
    describe_counter!(
        "telemetry_migrations_total",
        "Consent-driven migrations executed"
    );
    describe_counter!(
        "telemetry_migrated_files_total",
        "Batch files moved or discarded by migrations"
    );
    describe_counter!(
        "telemetry_uploads_total",
        "Upload attempts by outcome"
    );
    describe_histogram!(
        "telemetry_upload_duration_seconds",
        "Upload request duration in seconds"
    );
    describe_gauge!(
        "telemetry_upload_delay_seconds",
        "Current wait between upload cycles"
    );
    describe_counter!(
        "telemetry_faults_total",
        "Internal faults reported to the telemetry sink"
    );
}

/// Record an event appended to disk
pub fn record_event_written(feature: &str, bytes: usize) {
    counter!(
        "telemetry_events_written_total",
        "feature" => feature.to_string(),
    )
    .increment(1);
    counter!(
        "telemetry_bytes_written_total",
        "feature" => feature.to_string(),
    )
    .increment(bytes as u64);
}

/// Record an event discarded before reaching disk
pub fn record_event_dropped(feature: &str, reason: &str) {
    counter!(
        "telemetry_events_dropped_total",
        "feature" => feature.to_string(),
        "reason" => reason.to_string(),
    )
    .increment(1);
}

/// Record a batch file rotation
pub fn record_rotation(feature: &str, trigger: &str) {
    counter!(
        "telemetry_batches_rotated_total",
        "feature" => feature.to_string(),
        "trigger" => trigger.to_string(),
    )
    .increment(1);
}

/// Record batch files evicted by the size ceiling
pub fn record_eviction(feature: &str, count: u64) {
    counter!(
        "telemetry_batches_evicted_total",
        "feature" => feature.to_string(),
    )
    .increment(count);
}

/// Record a migration run
pub fn record_migration(feature: &str, action: &str, files: u64) {
    counter!(
        "telemetry_migrations_total",
        "feature" => feature.to_string(),
        "action" => action.to_string(),
    )
    .increment(1);
    counter!(
        "telemetry_migrated_files_total",
        "feature" => feature.to_string(),
        "action" => action.to_string(),
    )
    .increment(files);
}

/// Record an upload attempt
pub fn record_upload(feature: &str, outcome: &str, duration: Duration) {
    counter!(
        "telemetry_uploads_total",
        "feature" => feature.to_string(),
        "outcome" => outcome.to_string(),
    )
    .increment(1);
    histogram!(
        "telemetry_upload_duration_seconds",
        "feature" => feature.to_string(),
    )
    .record(duration.as_secs_f64());
}

/// Update the wait before the next upload cycle
pub fn update_upload_delay(feature: &str, delay: Duration) {
    gauge!(
        "telemetry_upload_delay_seconds",
        "feature" => feature.to_string(),
    )
    .set(delay.as_secs_f64());
}

/// Record a fault reported to the telemetry sink
pub fn record_fault(feature: &str, kind: &str) {
    counter!(
        "telemetry_faults_total",
        "feature" => feature.to_string(),
        "kind" => kind.to_string(),
    )
    .increment(1);
}
