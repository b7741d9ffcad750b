use std::time::Duration;
use wiremock::{
    matchers::{header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

pub const INTAKE_PATH: &str = "/api/v2/intake";

/// 设置 collector mock 服务器
///
/// # 参数
/// - `status`: 每个请求返回的状态码
/// - `expected_requests`: 期望收到的请求数,服务器 drop 时校验
pub async fn setup_collector_mock(status: u16, expected_requests: u64) -> MockServer {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(INTAKE_PATH))
        .and(query_param("source", "rust"))
        .and(header("x-api-key", "test-api-key"))
        .respond_with(ResponseTemplate::new(status))
        .expect(expected_requests)
        .mount(&mock_server)
        .await;

    mock_server
}

/// 设置先失败后恢复的 collector mock
///
/// # 参数
/// - `failure_status`: 前 `failures` 个请求返回的状态码
/// - `failures`: 失败次数,之后一律返回 200
/// - `latency_ms`: 响应延迟(毫秒)
pub async fn setup_flaky_collector_mock(
    failure_status: u16,
    failures: u64,
    latency_ms: u64,
) -> MockServer {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(INTAKE_PATH))
        .respond_with(
            ResponseTemplate::new(failure_status).set_delay(Duration::from_millis(latency_ms)),
        )
        .up_to_n_times(failures)
        .with_priority(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path(INTAKE_PATH))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(latency_ms)))
        .with_priority(2)
        .mount(&mock_server)
        .await;

    mock_server
}
