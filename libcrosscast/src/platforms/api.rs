//! Shared HTTP plumbing for API-family adapters
//!
//! Wraps a `reqwest::Client` and turns transport failures and non-2xx
//! responses into classified [`PlatformError`]s, so each adapter only deals
//! with its own request and response shapes.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;

use super::AdapterResult;
use crate::error::PlatformError;
use crate::types::Platform;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct ApiClient {
    platform: Platform,
    base_url: String,
    http: Client,
    token: Option<SecretString>,
}

impl ApiClient {
    pub fn new(platform: Platform, base_url: &str) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            platform,
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            token: None,
        }
    }

    pub fn set_token(&mut self, token: SecretString) {
        self.token = Some(token);
    }

    /// Forget the token; `true` if one was held
    pub fn clear_token(&mut self) -> bool {
        self.token.take().is_some()
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn get(&self, path: &str) -> AdapterResult<RequestBuilder> {
        Ok(self.http.get(self.url(path)).bearer_auth(self.token()?))
    }

    pub fn post(&self, path: &str) -> AdapterResult<RequestBuilder> {
        Ok(self.http.post(self.url(path)).bearer_auth(self.token()?))
    }

    fn token(&self) -> AdapterResult<&str> {
        self.token
            .as_ref()
            .map(|t| t.expose_secret())
            .ok_or_else(|| {
                PlatformError::Authentication(format!("{} adapter is not authenticated", self.platform))
            })
    }

    /// Send `request` and decode a successful JSON body
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        context: &str,
    ) -> AdapterResult<T> {
        let response = request
            .send()
            .await
            .map_err(|e| map_transport_error(self.platform, &e, context))?;
        let response = check_status(self.platform, response, context).await?;
        response.json::<T>().await.map_err(|e| {
            PlatformError::Unexpected(format!(
                "{} returned an unreadable response during {}: {}",
                self.platform, context, e
            ))
        })
    }
}

/// Classify a failure that happened before any response arrived
pub fn map_transport_error(platform: Platform, error: &reqwest::Error, context: &str) -> PlatformError {
    if error.is_timeout() {
        PlatformError::Timeout(format!("{} did not answer during {}: {}", platform, context, error))
    } else if error.is_connect() || error.is_request() {
        PlatformError::Network(format!("{} unreachable during {}: {}", platform, context, error))
    } else {
        PlatformError::Network(format!("{} request failed during {}: {}", platform, context, error))
    }
}

/// Classify an HTTP status from a platform API
pub fn map_status(platform: Platform, status: StatusCode, body: &str, context: &str) -> PlatformError {
    let detail = format!("{} {} during {}: {}", platform, status, context, body.trim());
    match status.as_u16() {
        401 | 403 => PlatformError::Authentication(detail),
        400 | 422 if looks_like_policy_rejection(body) => PlatformError::ContentRejected(detail),
        400 | 404 | 413 | 415 | 422 => PlatformError::InvalidPayload(detail),
        408 => PlatformError::Timeout(detail),
        429 => PlatformError::RateLimit(detail),
        500..=599 => PlatformError::Server(detail),
        _ => PlatformError::Unexpected(detail),
    }
}

fn looks_like_policy_rejection(body: &str) -> bool {
    let lower = body.to_lowercase();
    ["policy", "community standards", "spam", "prohibited", "not allowed"]
        .iter()
        .any(|needle| lower.contains(needle))
}

async fn check_status(platform: Platform, response: Response, context: &str) -> AdapterResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(map_status(platform, status, &body, context))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let p = Platform::Facebook;
        assert!(matches!(
            map_status(p, StatusCode::UNAUTHORIZED, "", "posting"),
            PlatformError::Authentication(_)
        ));
        assert!(matches!(
            map_status(p, StatusCode::TOO_MANY_REQUESTS, "", "posting"),
            PlatformError::RateLimit(_)
        ));
        assert!(matches!(
            map_status(p, StatusCode::BAD_GATEWAY, "", "posting"),
            PlatformError::Server(_)
        ));
        assert!(matches!(
            map_status(p, StatusCode::BAD_REQUEST, "missing field image_url", "posting"),
            PlatformError::InvalidPayload(_)
        ));
        assert!(matches!(
            map_status(
                p,
                StatusCode::BAD_REQUEST,
                "violates our Community Standards",
                "posting"
            ),
            PlatformError::ContentRejected(_)
        ));
    }

    #[test]
    fn test_server_errors_are_retryable_client_errors_are_not() {
        let p = Platform::Pinterest;
        assert!(map_status(p, StatusCode::SERVICE_UNAVAILABLE, "", "x").is_retryable());
        assert!(map_status(p, StatusCode::TOO_MANY_REQUESTS, "", "x").is_retryable());
        assert!(!map_status(p, StatusCode::FORBIDDEN, "", "x").is_retryable());
        assert!(!map_status(p, StatusCode::UNPROCESSABLE_ENTITY, "", "x").is_retryable());
    }

    #[test]
    fn test_url_joins_cleanly() {
        let client = ApiClient::new(Platform::Facebook, "https://graph.facebook.com/v19.0/");
        assert_eq!(
            client.url("/me/feed"),
            "https://graph.facebook.com/v19.0/me/feed"
        );
    }

    #[test]
    fn test_requests_need_a_token() {
        let mut client = ApiClient::new(Platform::Facebook, "https://graph.facebook.com/v19.0");
        assert!(matches!(
            client.get("me"),
            Err(PlatformError::Authentication(_))
        ));
        client.set_token(SecretString::from("t".to_string()));
        assert!(client.get("me").is_ok());
        assert!(client.clear_token());
        assert!(!client.has_token());
    }
}
