// End-to-end scenarios: consent, buffering and upload against a mock collector

#[path = "integration/mocks/mod.rs"]
mod mocks;
#[path = "integration/helpers/mod.rs"]
mod helpers;

use helpers::{batch_contents, create_test_config, wait_until};
use mocks::{setup_collector_mock, setup_flaky_collector_mock};
use std::sync::Arc;
use std::time::Duration;
use telemetry_pipeline::upload::{DeliveryConditions, ManualConditions, NetworkReachability};
use telemetry_pipeline::{Fault, InMemoryTelemetry, Pipeline, PipelineError, TrackingConsent};

#[tokio::test]
async fn test_pending_then_granted_then_uploaded() {
    let root = tempfile::tempdir().unwrap();
    let server = setup_collector_mock(200, 1).await;
    let telemetry = Arc::new(InMemoryTelemetry::new());

    let pipeline = Pipeline::builder(create_test_config(root.path(), &server.uri()))
        .telemetry(telemetry.clone())
        .build()
        .unwrap();
    let feature = pipeline.register_feature("tracing").await.unwrap();
    let dirs = feature.directories().clone();

    feature.write("event-1");
    feature.write("event-2");
    feature.write("event-3");
    assert!(feature.flush().await);

    assert_eq!(
        batch_contents(dirs.unauthorized.path()),
        vec!["event-1\nevent-2\nevent-3"]
    );
    assert!(batch_contents(dirs.authorized.path()).is_empty());

    pipeline.set_consent(TrackingConsent::Granted);
    feature.flush().await;

    assert!(batch_contents(dirs.unauthorized.path()).is_empty());
    assert_eq!(
        batch_contents(dirs.authorized.path()),
        vec!["event-1\nevent-2\nevent-3"]
    );

    pipeline.flush_and_tear_down().await;

    assert!(batch_contents(dirs.authorized.path()).is_empty());
    assert!(telemetry.faults().is_empty());

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].body, b"event-1\nevent-2\nevent-3".to_vec());
    assert_eq!(
        requests[0].headers.get("content-type").unwrap(),
        "text/plain;charset=UTF-8"
    );
    assert_eq!(
        requests[0].headers.get("x-origin-version").unwrap(),
        "0.1.0"
    );
    assert!(requests[0].headers.get("x-request-id").is_some());
}

#[tokio::test]
async fn test_service_unavailable_backs_off_then_delivers() {
    let root = tempfile::tempdir().unwrap();
    let server = setup_flaky_collector_mock(503, 1, 0).await;

    let mut config = create_test_config(root.path(), &server.uri());
    config.initial_consent = TrackingConsent::Granted;
    config.upload.base_delay_ms = 100;
    config.upload.min_delay_ms = 50;
    config.upload.max_delay_ms = 5_000;
    config.upload.backoff_multiplier = 10.0;
    config.upload.jitter_ratio = 0.0;

    let pipeline = Pipeline::builder(config).build().unwrap();
    let feature = pipeline.register_feature("tracing").await.unwrap();
    let authorized = feature.directories().authorized.clone();

    feature.write(r#"{"span":"checkout"}"#);
    feature.flush().await;

    // First cycle meets the 503: the batch stays and the wait grows past the base delay
    let backed_off = wait_until(Duration::from_secs(5), || {
        feature.upload_delay() > Duration::from_millis(100)
    })
    .await;
    assert!(backed_off, "delay never grew");
    assert_eq!(batch_contents(authorized.path()).len(), 1);

    // A later cycle gets the 200 and the delay returns to base
    let delivered = wait_until(Duration::from_secs(5), || {
        batch_contents(authorized.path()).is_empty()
            && feature.upload_delay() == Duration::from_millis(100)
    })
    .await;
    assert!(delivered, "batch never delivered");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);

    pipeline.flush_and_tear_down().await;
}

#[tokio::test]
async fn test_bad_request_deletes_batch_without_retry() {
    let root = tempfile::tempdir().unwrap();
    let server = setup_collector_mock(400, 1).await;
    let telemetry = Arc::new(InMemoryTelemetry::new());

    let mut config = create_test_config(root.path(), &server.uri());
    config.initial_consent = TrackingConsent::Granted;

    let pipeline = Pipeline::builder(config)
        .telemetry(telemetry.clone())
        .build()
        .unwrap();
    let feature = pipeline.register_feature("tracing").await.unwrap();
    let authorized = feature.directories().authorized.clone();

    feature.write("unparseable");
    feature.flush().await;
    pipeline.flush_and_tear_down().await;

    assert!(batch_contents(authorized.path()).is_empty());
    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    let faults = telemetry.faults();
    assert_eq!(faults.len(), 1);
    assert!(matches!(
        faults[0],
        Fault::UploadRejected { status: 400, .. }
    ));
}

#[tokio::test]
async fn test_writes_follow_consent_in_effect_when_accepted() {
    let root = tempfile::tempdir().unwrap();
    let server = setup_collector_mock(200, 0).await;

    let pipeline = Pipeline::builder(create_test_config(root.path(), &server.uri()))
        .build()
        .unwrap();
    let feature = pipeline.register_feature("tracing").await.unwrap();
    let dirs = feature.directories().clone();

    feature.write("while-pending");
    pipeline.set_consent(TrackingConsent::Granted);
    feature.write("while-granted");
    pipeline.set_consent(TrackingConsent::NotGranted);
    feature.write("while-not-granted");
    feature.flush().await;

    assert!(batch_contents(dirs.unauthorized.path()).is_empty());
    // Consent changes always close the active file
    assert_eq!(
        batch_contents(dirs.authorized.path()),
        vec!["while-pending", "while-granted"]
    );
}

#[tokio::test]
async fn test_pending_then_not_granted_discards() {
    let root = tempfile::tempdir().unwrap();
    let server = setup_collector_mock(200, 0).await;

    let pipeline = Pipeline::builder(create_test_config(root.path(), &server.uri()))
        .build()
        .unwrap();
    let feature = pipeline.register_feature("tracing").await.unwrap();
    let dirs = feature.directories().clone();

    feature.write("private");
    feature.flush().await;
    assert_eq!(batch_contents(dirs.unauthorized.path()).len(), 1);

    pipeline.set_consent(TrackingConsent::NotGranted);
    feature.write("also private");
    feature.flush().await;

    assert!(batch_contents(dirs.unauthorized.path()).is_empty());
    assert!(batch_contents(dirs.authorized.path()).is_empty());

    pipeline.flush_and_tear_down().await;
}

#[tokio::test]
async fn test_offline_teardown_keeps_batches() {
    let root = tempfile::tempdir().unwrap();
    let server = setup_collector_mock(200, 0).await;

    let mut config = create_test_config(root.path(), &server.uri());
    config.initial_consent = TrackingConsent::Granted;

    let conditions = Arc::new(ManualConditions::new());
    conditions.set_network(NetworkReachability::No);

    let pipeline = Pipeline::builder(config)
        .conditions(DeliveryConditions::manual(conditions))
        .build()
        .unwrap();
    let feature = pipeline.register_feature("tracing").await.unwrap();
    let authorized = feature.directories().authorized.clone();

    feature.write("kept for later");
    pipeline.flush_and_tear_down().await;

    assert_eq!(batch_contents(authorized.path()), vec!["kept for later"]);
}

#[tokio::test]
async fn test_batches_survive_restart() {
    let root = tempfile::tempdir().unwrap();
    let server = setup_collector_mock(200, 1).await;

    let mut config = create_test_config(root.path(), &server.uri());
    config.initial_consent = TrackingConsent::Granted;

    let offline = Arc::new(ManualConditions::new());
    offline.set_network(NetworkReachability::No);
    let pipeline = Pipeline::builder(config.clone())
        .conditions(DeliveryConditions::manual(offline))
        .build()
        .unwrap();
    let feature = pipeline.register_feature("tracing").await.unwrap();
    feature.write("from the previous run");
    pipeline.flush_and_tear_down().await;

    let pipeline = Pipeline::builder(config).build().unwrap();
    let feature = pipeline.register_feature("tracing").await.unwrap();
    let authorized = feature.directories().authorized.clone();
    pipeline.flush_and_tear_down().await;

    assert!(batch_contents(authorized.path()).is_empty());
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests[0].body, b"from the previous run".to_vec());
}

#[tokio::test]
async fn test_registration_errors() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::builder(create_test_config(root.path(), "http://127.0.0.1:9"))
        .build()
        .unwrap();

    pipeline.register_feature("tracing").await.unwrap();
    assert!(matches!(
        pipeline.register_feature("tracing").await,
        Err(PipelineError::DuplicateFeature(_))
    ));
    assert!(matches!(
        pipeline.register_feature("rum").await,
        Err(PipelineError::UnknownFeature(_))
    ));
    assert!(pipeline.feature("tracing").is_some());

    pipeline.flush_and_tear_down().await;
    assert!(pipeline.feature("tracing").is_none());
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let mut config = create_test_config(root.path(), "http://127.0.0.1:9");
    config.identity.api_key.clear();

    assert!(matches!(
        Pipeline::builder(config).build(),
        Err(PipelineError::InvalidConfig(_))
    ));
}
