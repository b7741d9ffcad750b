use crate::config::{validate_config, PipelineConfig};
use crate::consent::{ConsentProvider, TrackingConsent};
use crate::error::PipelineError;
use crate::feature::FeatureHandle;
use crate::storage::{ActiveFileSlot, DirectorySet, EventReader, EventWriter};
use crate::telemetry::{TelemetrySink, TracingTelemetry};
use crate::upload::{DeliveryConditions, HttpTransport, RequestBuilder, Transport, UploadWorker};
use arc_swap::ArcSwapOption;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Owned context of every telemetry feature
///
/// Holds the configuration, the consent value shared by all features, and the
/// collaborators handed to each feature at registration.
pub struct Pipeline {
    config: PipelineConfig,
    consent: ConsentProvider,
    telemetry: Arc<dyn TelemetrySink>,
    conditions: DeliveryConditions,
    transport: Arc<dyn Transport>,
    features: RwLock<HashMap<String, Arc<FeatureHandle>>>,
    registration: tokio::sync::Mutex<()>,
}

pub struct PipelineBuilder {
    config: PipelineConfig,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    conditions: Option<DeliveryConditions>,
    transport: Option<Arc<dyn Transport>>,
}

impl PipelineBuilder {
    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn conditions(mut self, conditions: DeliveryConditions) -> Self {
        self.conditions = Some(conditions);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<Pipeline, PipelineError> {
        validate_config(&self.config).map_err(|e| PipelineError::InvalidConfig(format!("{:#}", e)))?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(self.config.upload.request_timeout())?),
        };

        let telemetry: Arc<dyn TelemetrySink> = match self.telemetry {
            Some(telemetry) => telemetry,
            None => Arc::new(TracingTelemetry),
        };

        crate::metrics::describe_metrics();

        tracing::info!(
            root = %self.config.root_directory.display(),
            features = self.config.features.len(),
            consent = %self.config.initial_consent,
            "Telemetry pipeline created"
        );

        Ok(Pipeline {
            consent: ConsentProvider::new(self.config.initial_consent),
            telemetry,
            conditions: self.conditions.unwrap_or_default(),
            transport,
            features: RwLock::new(HashMap::new()),
            registration: tokio::sync::Mutex::new(()),
            config: self.config,
        })
    }
}

impl Pipeline {
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder {
            config,
            telemetry: None,
            conditions: None,
            transport: None,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Set up a configured feature and start its writer and upload worker
    ///
    /// The feature's unauthorized directory is cleared before its first write.
    pub async fn register_feature(&self, name: &str) -> Result<Arc<FeatureHandle>, PipelineError> {
        let _guard = self.registration.lock().await;

        if self.feature(name).is_some() {
            return Err(PipelineError::DuplicateFeature(name.to_string()));
        }

        let feature_config = self
            .config
            .feature(name)
            .ok_or_else(|| PipelineError::UnknownFeature(name.to_string()))?;

        let request_builder = RequestBuilder::new(feature_config, &self.config.identity)
            .map_err(|e| PipelineError::InvalidEndpoint {
                feature: name.to_string(),
                message: e.to_string(),
            })?;

        let directories = DirectorySet::for_feature(
            &self.config.root_directory,
            name,
            feature_config.format_version,
        );
        directories.create().await?;

        let active: ActiveFileSlot = Arc::new(ArcSwapOption::empty());

        let writer = EventWriter::spawn(
            name,
            directories.clone(),
            feature_config.format.clone(),
            self.config.storage.clone(),
            &self.consent,
            active.clone(),
            self.telemetry.clone(),
        );

        let reader = EventReader::new(
            name,
            directories.authorized.clone(),
            feature_config.format.clone(),
            self.config.storage.max_file_age_for_read(),
            active,
            self.telemetry.clone(),
        );

        let uploader = UploadWorker::new(
            name,
            reader,
            request_builder,
            self.transport.clone(),
            self.conditions.clone(),
            &self.config.upload,
            self.telemetry.clone(),
        )
        .spawn();

        let handle = Arc::new(FeatureHandle::new(
            name.to_string(),
            writer,
            uploader,
            directories,
            self.config.upload.teardown_timeout(),
        ));

        self.features
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.to_string(), handle.clone());

        tracing::info!(
            feature = %name,
            endpoint = %feature_config.endpoint,
            "Feature registered"
        );

        Ok(handle)
    }

    /// Register every configured feature
    pub async fn register_all(&self) -> Result<Vec<Arc<FeatureHandle>>, PipelineError> {
        let mut handles = Vec::with_capacity(self.config.features.len());
        for feature in &self.config.features {
            handles.push(self.register_feature(&feature.name).await?);
        }
        Ok(handles)
    }

    pub fn feature(&self, name: &str) -> Option<Arc<FeatureHandle>> {
        self.features
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    /// Change the consent value for every feature
    ///
    /// Writes accepted before this call land according to the previous value, later
    /// writes according to the new one.
    pub fn set_consent(&self, consent: TrackingConsent) {
        self.consent.set(consent);
    }

    pub fn consent(&self) -> TrackingConsent {
        self.consent.current()
    }

    /// Drain and stop every feature
    ///
    /// Each step of a feature's teardown is bounded by the teardown timeout. Features are
    /// unregistered and may be registered again afterwards.
    pub async fn flush_and_tear_down(&self) {
        let features: Vec<Arc<FeatureHandle>> = self
            .features
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain()
            .map(|(_, handle)| handle)
            .collect();

        futures::future::join_all(features.iter().map(|f| f.tear_down())).await;

        tracing::info!(features = features.len(), "Telemetry pipeline torn down");
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("root_directory", &self.config.root_directory)
            .field("consent", &self.consent())
            .finish()
    }
}
