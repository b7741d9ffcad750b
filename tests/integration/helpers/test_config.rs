use std::path::Path;
use std::time::{Duration, Instant};
use telemetry_pipeline::config::{
    DeviceConfig, FeatureConfig, IdentityConfig, PipelineConfig, StorageConfig, UploadConfig,
};
use telemetry_pipeline::{DataFormat, TrackingConsent};

/// 创建测试用的 PipelineConfig
///
/// 单个 `tracing` feature,上传间隔足够长,只有 teardown 时的 drain 会真正上传。
///
/// # 参数
/// - `root`: 缓冲目录根路径
/// - `collector_url`: collector mock 服务器 URL
pub fn create_test_config(root: &Path, collector_url: &str) -> PipelineConfig {
    PipelineConfig {
        root_directory: root.to_path_buf(),
        initial_consent: TrackingConsent::Pending,
        storage: StorageConfig {
            max_file_age_for_write_ms: 60_000,
            ..StorageConfig::default()
        },
        upload: UploadConfig {
            base_delay_ms: 60_000,
            min_delay_ms: 1_000,
            max_delay_ms: 120_000,
            request_timeout_ms: 2_000,
            teardown_timeout_ms: 5_000,
            ..UploadConfig::default()
        },
        identity: IdentityConfig {
            app_name: "shop".to_string(),
            app_version: "3.1.0".to_string(),
            api_key: "test-api-key".to_string(),
            source: "rust".to_string(),
            sdk_version: "0.1.0".to_string(),
            device: DeviceConfig::default(),
        },
        features: vec![FeatureConfig {
            name: "tracing".to_string(),
            endpoint: format!("{}/api/v2/intake", collector_url),
            format: DataFormat::newline(),
            content_type: "text/plain;charset=UTF-8".to_string(),
            format_version: 1,
        }],
    }
}

/// 按文件名(创建时间)排序读取目录下所有 batch 文件内容
pub fn batch_contents(dir: &Path) -> Vec<String> {
    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default();
    paths.sort();
    paths
        .iter()
        .filter_map(|p| std::fs::read_to_string(p).ok())
        .collect()
}

/// 轮询直到条件成立或超时,返回条件最终是否成立
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
