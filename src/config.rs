use crate::consent::TrackingConsent;
use crate::storage::DataFormat;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Root under which every feature keeps its directories
    #[serde(default = "default_root_directory")]
    pub root_directory: PathBuf,

    /// Consent in effect until the host sets one
    #[serde(default = "default_initial_consent")]
    pub initial_consent: TrackingConsent,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub upload: UploadConfig,

    pub identity: IdentityConfig,

    pub features: Vec<FeatureConfig>,
}

impl PipelineConfig {
    pub fn feature(&self, name: &str) -> Option<&FeatureConfig> {
        self.features.iter().find(|f| f.name == name)
    }
}

/// Batch file and buffer limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Rotate once the next record would push the file past this size (default: 4 MiB)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Larger records are dropped (default: 512 KiB)
    #[serde(default = "default_max_object_size")]
    pub max_object_size: u64,

    /// Rotate once a file holds this many records (default: 500)
    #[serde(default = "default_max_objects_per_file")]
    pub max_objects_per_file: usize,

    /// Rotate once the active file is older than this (default: 4750ms)
    #[serde(default = "default_max_file_age_for_write_ms")]
    pub max_file_age_for_write_ms: u64,

    /// Batch files older than this are deleted instead of uploaded (default: 18h)
    #[serde(default = "default_max_file_age_for_read_ms")]
    pub max_file_age_for_read_ms: u64,

    /// Ceiling on the total size of one directory (default: 512 MiB)
    #[serde(default = "default_max_directory_size")]
    pub max_directory_size: u64,

    /// Pending writes allowed in a feature's queue (default: 10000)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl StorageConfig {
    pub fn max_file_age_for_write(&self) -> Duration {
        Duration::from_millis(self.max_file_age_for_write_ms)
    }

    pub fn max_file_age_for_read(&self) -> Duration {
        Duration::from_millis(self.max_file_age_for_read_ms)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            max_object_size: default_max_object_size(),
            max_objects_per_file: default_max_objects_per_file(),
            max_file_age_for_write_ms: default_max_file_age_for_write_ms(),
            max_file_age_for_read_ms: default_max_file_age_for_read_ms(),
            max_directory_size: default_max_directory_size(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Upload scheduling and retry policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadConfig {
    /// Wait between cycles while uploads succeed (default: 5s)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Lower bound after jitter (default: 1s)
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Upper bound of the backoff (default: 60s)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Delay multiplier applied after each retriable failure (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// ±ratio of random variation applied to each wait (default: 0.2)
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,

    /// Per-request timeout (default: 30s)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Batches sent back to back in one cycle while the collector accepts them (default: 10)
    #[serde(default = "default_max_batches_per_cycle")]
    pub max_batches_per_cycle: usize,

    /// Time allowed for the final drain at teardown (default: 5s)
    #[serde(default = "default_teardown_timeout_ms")]
    pub teardown_timeout_ms: u64,
}

impl UploadConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_ratio: default_jitter_ratio(),
            request_timeout_ms: default_request_timeout_ms(),
            max_batches_per_cycle: default_max_batches_per_cycle(),
            teardown_timeout_ms: default_teardown_timeout_ms(),
        }
    }
}

/// Identity sent with every upload
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdentityConfig {
    pub app_name: String,
    pub app_version: String,
    pub api_key: String,

    /// Origin tag, also sent as the `source` query parameter (default: "rust")
    #[serde(default = "default_source")]
    pub source: String,

    #[serde(default = "default_sdk_version")]
    pub sdk_version: String,

    #[serde(default)]
    pub device: DeviceConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    pub model: String,
    pub os_name: String,
    pub os_version: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            model: std::env::consts::ARCH.to_string(),
            os_name: std::env::consts::OS.to_string(),
            os_version: "unknown".to_string(),
        }
    }
}

/// One independently buffered and uploaded stream
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeatureConfig {
    /// Directory namespace; must be unique
    pub name: String,

    /// Collector URL batches are POSTed to
    pub endpoint: String,

    #[serde(default)]
    pub format: DataFormat,

    #[serde(default = "default_content_type")]
    pub content_type: String,

    /// Embedded in directory names; bump on incompatible format changes
    #[serde(default = "default_format_version")]
    pub format_version: u32,
}

fn default_root_directory() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("telemetry-pipeline")
}

fn default_initial_consent() -> TrackingConsent {
    TrackingConsent::Pending
}

fn default_max_file_size() -> u64 {
    4 * 1024 * 1024
}

fn default_max_object_size() -> u64 {
    512 * 1024
}

fn default_max_objects_per_file() -> usize {
    500
}

fn default_max_file_age_for_write_ms() -> u64 {
    4_750
}

fn default_max_file_age_for_read_ms() -> u64 {
    18 * 60 * 60 * 1000
}

fn default_max_directory_size() -> u64 {
    512 * 1024 * 1024
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_base_delay_ms() -> u64 {
    5_000
}

fn default_min_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter_ratio() -> f64 {
    0.2
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_max_batches_per_cycle() -> usize {
    10
}

fn default_teardown_timeout_ms() -> u64 {
    5_000
}

fn default_source() -> String {
    "rust".to_string()
}

fn default_sdk_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_content_type() -> String {
    "application/json".to_string()
}

fn default_format_version() -> u32 {
    1
}

/// Load configuration from an optional file plus `TELEMETRY_PIPELINE__*` environment variables
pub fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path));
    }

    let config = builder
        .add_source(config::Environment::with_prefix("TELEMETRY_PIPELINE").separator("__"))
        .build()?;

    let cfg: PipelineConfig = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

pub fn validate_config(cfg: &PipelineConfig) -> anyhow::Result<()> {
    if cfg.features.is_empty() {
        anyhow::bail!("At least one feature must be configured");
    }

    if cfg.identity.api_key.is_empty() {
        anyhow::bail!("API key cannot be empty");
    }

    let mut names = HashSet::new();
    for feature in &cfg.features {
        validate_feature_name(&feature.name)?;

        if !names.insert(feature.name.as_str()) {
            anyhow::bail!("Feature '{}' is configured more than once", feature.name);
        }

        let endpoint = url::Url::parse(&feature.endpoint).map_err(|e| {
            anyhow::anyhow!("Feature '{}' has invalid endpoint: {}", feature.name, e)
        })?;
        if endpoint.scheme() != "http" && endpoint.scheme() != "https" {
            anyhow::bail!(
                "Feature '{}' endpoint must use http or https, got '{}'",
                feature.name,
                endpoint.scheme()
            );
        }

        if feature.format.separator.is_empty() {
            anyhow::bail!("Feature '{}' data format needs a separator", feature.name);
        }
    }

    let storage = &cfg.storage;
    if storage.max_object_size == 0 || storage.max_objects_per_file == 0 {
        anyhow::bail!("Storage limits must be greater than zero");
    }
    if storage.max_object_size > storage.max_file_size {
        anyhow::bail!(
            "max_object_size ({}) cannot exceed max_file_size ({})",
            storage.max_object_size,
            storage.max_file_size
        );
    }
    if storage.max_file_size > storage.max_directory_size {
        anyhow::bail!(
            "max_file_size ({}) cannot exceed max_directory_size ({})",
            storage.max_file_size,
            storage.max_directory_size
        );
    }

    let upload = &cfg.upload;
    if upload.min_delay_ms == 0 {
        anyhow::bail!("min_delay_ms must be greater than zero");
    }
    if upload.request_timeout_ms == 0 || upload.teardown_timeout_ms == 0 {
        anyhow::bail!("request_timeout_ms and teardown_timeout_ms must be greater than zero");
    }
    if upload.min_delay_ms > upload.base_delay_ms || upload.base_delay_ms > upload.max_delay_ms {
        anyhow::bail!("Upload delays must satisfy min_delay <= base_delay <= max_delay");
    }
    if upload.backoff_multiplier.is_nan() || upload.backoff_multiplier < 1.0 {
        anyhow::bail!("backoff_multiplier must be at least 1.0");
    }
    if !(0.0..1.0).contains(&upload.jitter_ratio) {
        anyhow::bail!("jitter_ratio must be within [0, 1)");
    }
    if upload.max_batches_per_cycle == 0 {
        anyhow::bail!("max_batches_per_cycle must be greater than zero");
    }

    Ok(())
}

fn validate_feature_name(name: &str) -> anyhow::Result<()> {
    if name.is_empty() {
        anyhow::bail!("Feature name cannot be empty");
    }
    let path_safe = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if !path_safe || name.starts_with('.') {
        anyhow::bail!("Feature name '{}' is not a valid directory name", name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_validate_config_requires_features() {
        let mut cfg = create_test_config();
        cfg.features.clear();

        let result = validate_config(&cfg);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("At least one feature must be configured"));
    }

    #[test]
    fn test_validate_config_rejects_duplicate_features() {
        let mut cfg = create_test_config();
        let duplicate = cfg.features[0].clone();
        cfg.features.push(duplicate);

        let result = validate_config(&cfg);
        assert!(result.unwrap_err().to_string().contains("more than once"));
    }

    #[test]
    fn test_validate_config_rejects_unsafe_names() {
        let mut cfg = create_test_config();
        cfg.features[0].name = "../logs".to_string();
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn test_validate_config_checks_size_ordering() {
        let mut cfg = create_test_config();
        cfg.storage.max_file_size = cfg.storage.max_directory_size + 1;
        assert!(validate_config(&cfg).is_err());

        let mut cfg = create_test_config();
        cfg.storage.max_object_size = cfg.storage.max_file_size + 1;
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn test_validate_config_checks_delays() {
        let mut cfg = create_test_config();
        cfg.upload.base_delay_ms = cfg.upload.max_delay_ms + 1;
        assert!(validate_config(&cfg).is_err());

        let mut cfg = create_test_config();
        cfg.upload.jitter_ratio = 1.5;
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn test_validate_config_rejects_zero_delays_and_timeouts() {
        let mut cfg = create_test_config();
        cfg.upload.min_delay_ms = 0;
        cfg.upload.base_delay_ms = 0;
        let result = validate_config(&cfg);
        assert!(result.unwrap_err().to_string().contains("min_delay_ms"));

        let mut cfg = create_test_config();
        cfg.upload.request_timeout_ms = 0;
        assert!(validate_config(&cfg).is_err());

        let mut cfg = create_test_config();
        cfg.upload.teardown_timeout_ms = 0;
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn test_validate_config_rejects_bad_endpoint() {
        let mut cfg = create_test_config();
        cfg.features[0].endpoint = "ftp://collector.example.com".to_string();
        assert!(validate_config(&cfg).is_err());

        cfg.features[0].endpoint = "not a url".to_string();
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn test_load_config_from_file_applies_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
root_directory = "/var/cache/app-telemetry"
initial_consent = "granted"

[identity]
app_name = "shop"
app_version = "2.1.0"
api_key = "key-123"

[upload]
base_delay_ms = 2000

[[features]]
name = "tracing"
endpoint = "https://collector.example.com/api/v2/spans"
content_type = "text/plain;charset=UTF-8"
"#
        )
        .unwrap();

        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.initial_consent, TrackingConsent::Granted);
        assert_eq!(cfg.upload.base_delay(), Duration::from_secs(2));
        assert_eq!(cfg.upload.max_delay_ms, 60_000);
        assert_eq!(cfg.storage.max_objects_per_file, 500);
        assert_eq!(cfg.identity.source, "rust");

        let tracing = cfg.feature("tracing").unwrap();
        assert_eq!(tracing.format, DataFormat::newline());
        assert_eq!(tracing.format_version, 1);
    }

    fn create_test_config() -> PipelineConfig {
        PipelineConfig {
            root_directory: PathBuf::from("/tmp/telemetry-pipeline-test"),
            initial_consent: TrackingConsent::Pending,
            storage: StorageConfig::default(),
            upload: UploadConfig::default(),
            identity: IdentityConfig {
                app_name: "shop".to_string(),
                app_version: "2.1.0".to_string(),
                api_key: "key-123".to_string(),
                source: "rust".to_string(),
                sdk_version: "0.1.0".to_string(),
                device: DeviceConfig::default(),
            },
            features: vec![FeatureConfig {
                name: "logging".to_string(),
                endpoint: "https://collector.example.com/api/v2/logs".to_string(),
                format: DataFormat::json_array(),
                content_type: default_content_type(),
                format_version: 1,
            }],
        }
    }
}
