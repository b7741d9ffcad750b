use crate::config::{FeatureConfig, IdentityConfig};
use crate::error::UploadError;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use url::Url;
use uuid::Uuid;

pub const API_KEY_HEADER: HeaderName = HeaderName::from_static("x-api-key");
pub const ORIGIN_HEADER: HeaderName = HeaderName::from_static("x-origin");
pub const ORIGIN_VERSION_HEADER: HeaderName = HeaderName::from_static("x-origin-version");
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// A fully built upload request
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl UploadRequest {
    pub fn request_id(&self) -> Option<&str> {
        self.headers
            .get(&REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
    }
}

/// Builds upload requests for one feature
///
/// Everything except the request id is computed once at construction, so two builds of
/// the same body differ only in `X-Request-Id`.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    url: Url,
    headers: HeaderMap,
}

impl RequestBuilder {
    pub fn new(feature: &FeatureConfig, identity: &IdentityConfig) -> Result<Self, UploadError> {
        let mut url = Url::parse(&feature.endpoint).map_err(|e| {
            UploadError::InvalidRequest(format!("invalid endpoint '{}': {}", feature.endpoint, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(UploadError::InvalidRequest(format!(
                "endpoint '{}' is not an HTTP(S) URL",
                feature.endpoint
            )));
        }
        url.query_pairs_mut().append_pair("source", &identity.source);

        let user_agent = format!(
            "{}/{} ({}; {} {})",
            identity.app_name,
            identity.app_version,
            identity.device.model,
            identity.device.os_name,
            identity.device.os_version
        );

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, header_value("Content-Type", &feature.content_type)?);
        headers.insert(USER_AGENT, header_value("User-Agent", &user_agent)?);
        headers.insert(API_KEY_HEADER, header_value("X-Api-Key", &identity.api_key)?);
        headers.insert(ORIGIN_HEADER, header_value("X-Origin", &identity.source)?);
        headers.insert(
            ORIGIN_VERSION_HEADER,
            header_value("X-Origin-Version", &identity.sdk_version)?,
        );

        Ok(Self { url, headers })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn build(&self, body: Vec<u8>) -> UploadRequest {
        self.build_with_request_id(body, Uuid::new_v4())
    }

    pub fn build_with_request_id(&self, body: Vec<u8>, request_id: Uuid) -> UploadRequest {
        let mut headers = self.headers.clone();
        // A hyphenated UUID is always a valid header value
        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            headers.insert(REQUEST_ID_HEADER, value);
        }

        UploadRequest {
            url: self.url.clone(),
            headers,
            body,
        }
    }
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, UploadError> {
    HeaderValue::from_str(value)
        .map_err(|e| UploadError::InvalidRequest(format!("invalid {} header: {}", name, e)))
}
