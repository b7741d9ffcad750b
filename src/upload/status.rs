use reqwest::StatusCode;

/// How a delivery attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Collector accepted the batch; delete it
    Success,
    /// Collector or network unavailable; keep the batch and back off
    Retriable,
    /// Collector will never accept this batch; delete it and report
    NonRetriable,
}

/// Classify a collector response
///
/// ## Retriable:
/// - 408 Request Timeout
/// - 429 Too Many Requests
/// - every 5xx
///
/// ## Non-retriable:
/// - every other status, including 1xx and 3xx which the collector never sends
pub fn classify_status(status: StatusCode) -> DeliveryStatus {
    if status.is_success() {
        DeliveryStatus::Success
    } else if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        DeliveryStatus::Retriable
    } else {
        DeliveryStatus::NonRetriable
    }
}

/// The collector rejected the API key
pub fn is_invalid_credentials(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}
