//! HTTP utilities for connectors.
//!
//! [`HttpClient`] wraps `reqwest` with authentication, client-side rate
//! limiting, and a [`RetryPolicy`]. Every response status is mapped to a
//! [`ConnectorError`] so connectors can decide retries on status codes alone.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use sb_core::retry::RetryPolicy;
use sb_core::{ConnectorError, ConnectorResult, SecureString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

type RateLimiterType = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Longest response body excerpt carried in an error message.
const MAX_ERROR_BODY: usize = 500;

/// Transport settings embedded in each vendor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Ignored in release builds.
    pub verify_tls: bool,
    pub headers: HashMap<String, String>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_secs: 30,
            verify_tls: true,
            headers: HashMap::new(),
        }
    }
}

impl HttpSettings {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}

/// How requests authenticate.
#[derive(Clone)]
pub enum AuthConfig {
    None,
    /// Credential sent verbatim in a custom header.
    ApiKey {
        header_name: String,
        key: SecureString,
    },
    /// `Authorization: <scheme> <token>`.
    Token { scheme: String, token: SecureString },
    Basic {
        username: String,
        password: SecureString,
    },
}

impl AuthConfig {
    pub fn bearer(token: SecureString) -> Self {
        AuthConfig::Token {
            scheme: "Bearer".to_string(),
            token,
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthConfig::None => f.write_str("None"),
            AuthConfig::ApiKey { header_name, .. } => f
                .debug_struct("ApiKey")
                .field("header_name", header_name)
                .field("key", &"[REDACTED]")
                .finish(),
            AuthConfig::Token { scheme, .. } => f
                .debug_struct("Token")
                .field("scheme", scheme)
                .field("token", &"[REDACTED]")
                .finish(),
            AuthConfig::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
        }
    }
}

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per period.
    pub max_requests: u32,
    pub period: Duration,
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            period: Duration::from_secs(60),
            burst_size: 10,
        }
    }
}

impl RateLimitConfig {
    /// `max_requests` per minute with no burst beyond one request.
    pub fn per_minute(max_requests: u32) -> Self {
        Self {
            max_requests,
            period: Duration::from_secs(60),
            burst_size: 1,
        }
    }

    fn quota(&self) -> ConnectorResult<Quota> {
        let max_requests = self.max_requests.max(1);
        Quota::with_period(self.period / max_requests)
            .map(|q| q.allow_burst(NonZeroU32::new(self.burst_size).unwrap_or(NonZeroU32::MIN)))
            .ok_or_else(|| ConnectorError::ConfigError("rate limit period must be non-zero".into()))
    }
}

/// A client-side rate limiter that several [`HttpClient`]s can draw from.
///
/// Clients built per instance share one quota when they are handed the same
/// limiter.
#[derive(Clone)]
pub struct SharedRateLimiter(Arc<RateLimiterType>);

impl SharedRateLimiter {
    pub fn new(config: &RateLimitConfig) -> ConnectorResult<Self> {
        Ok(Self(Arc::new(GovernorRateLimiter::direct(config.quota()?))))
    }

    /// Takes one request from the quota if it is available right now.
    pub fn try_acquire(&self) -> bool {
        self.0.check().is_ok()
    }
}

impl fmt::Debug for SharedRateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedRateLimiter").finish_non_exhaustive()
    }
}

/// HTTP client with authentication, rate limiting, and retries.
pub struct HttpClient {
    client: Client,
    base_url: String,
    auth: AuthConfig,
    retry: RetryPolicy,
    rate_limiter: Option<Arc<RateLimiterType>>,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url)
            .field("auth", &self.auth)
            .field("retry", &self.retry)
            .field("rate_limited", &self.rate_limiter.is_some())
            .finish()
    }
}

impl HttpClient {
    /// Creates a client retrying HTTP 429 with the default policy.
    pub fn new(settings: &HttpSettings, auth: AuthConfig) -> ConnectorResult<Self> {
        if settings.base_url.trim().is_empty() {
            return Err(ConnectorError::ConfigError("base_url is not set".to_string()));
        }

        let verify_tls = if !settings.verify_tls {
            #[cfg(debug_assertions)]
            {
                warn!(
                    base_url = %settings.base_url,
                    "TLS certificate verification DISABLED in development mode"
                );
                false
            }
            #[cfg(not(debug_assertions))]
            {
                warn!(
                    base_url = %settings.base_url,
                    "Attempted to disable TLS verification in production - request IGNORED"
                );
                true
            }
        } else {
            true
        };

        let mut headers = HeaderMap::new();
        for (key, value) in &settings.headers {
            if let (Ok(name), Ok(val)) = (
                HeaderName::try_from(key.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.insert(name, val);
            }
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .danger_accept_invalid_certs(!verify_tls)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .default_headers(headers)
            .build()
            .map_err(|e| ConnectorError::ConfigError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            auth,
            retry: RetryPolicy::rate_limited(),
            rate_limiter: None,
        })
    }

    /// Limits this client alone.
    pub fn with_rate_limit(self, rate_limit: RateLimitConfig) -> ConnectorResult<Self> {
        Ok(self.with_shared_rate_limit(&SharedRateLimiter::new(&rate_limit)?))
    }

    /// Draws from a quota shared with other clients.
    pub fn with_shared_rate_limit(mut self, limiter: &SharedRateLimiter) -> Self {
        self.rate_limiter = Some(Arc::clone(&limiter.0));
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Builds a URL from a path.
    pub fn build_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ConnectorResult<T> {
        self.request_json::<(), (), T>(Method::GET, path, None, None)
            .await
    }

    pub async fn get_json_with_query<Q, T>(&self, path: &str, query: &Q) -> ConnectorResult<T>
    where
        Q: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request_json::<Q, (), T>(Method::GET, path, Some(query), None)
            .await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> ConnectorResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request_json::<(), B, T>(Method::POST, path, None, Some(body))
            .await
    }

    /// Sends a request under the retry policy and parses a JSON response.
    pub async fn request_json<Q, B, T>(
        &self,
        method: Method,
        path: &str,
        query: Option<&Q>,
        body: Option<&B>,
    ) -> ConnectorResult<T>
    where
        Q: Serialize + ?Sized,
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.build_url(path);
        let operation = format!("{} {}", method, path);

        let response = self
            .retry
            .run(&operation, || {
                let mut request = self.client.request(method.clone(), &url);
                if let Some(query) = query {
                    request = request.query(query);
                }
                if let Some(body) = body {
                    request = request.json(body);
                }
                self.execute_once(request)
            })
            .await?;

        parse_json_response(response).await
    }

    /// Executes a request once with authentication, rate limiting, and status mapping.
    async fn execute_once(&self, request: RequestBuilder) -> ConnectorResult<Response> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        let response = self
            .add_auth(request)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();
        let error = error_for_status(status, retry_after.as_deref(), &body);
        debug!(status = status.as_u16(), error = %error, "Request failed");
        Err(error)
    }

    fn add_auth(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            AuthConfig::None => request,
            AuthConfig::ApiKey { header_name, key } => {
                request.header(header_name.as_str(), key.expose_secret())
            }
            AuthConfig::Token { scheme, token } => request.header(
                "Authorization",
                format!("{} {}", scheme, token.expose_secret()),
            ),
            AuthConfig::Basic { username, password } => {
                request.basic_auth(username, Some(password.expose_secret()))
            }
        }
    }
}

async fn parse_json_response<T: DeserializeOwned>(response: Response) -> ConnectorResult<T> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| ConnectorError::InvalidResponse(e.to_string()))?;

    serde_json::from_str(&text).map_err(|e| {
        ConnectorError::InvalidResponse(format!(
            "Failed to parse response (status {}): {} - Body: {}",
            status,
            e,
            excerpt(&text)
        ))
    })
}

fn map_transport_error(e: reqwest::Error) -> ConnectorError {
    if e.is_timeout() {
        ConnectorError::Timeout(e.to_string())
    } else if e.is_connect() {
        ConnectorError::ConnectionFailed(e.to_string())
    } else {
        ConnectorError::RequestFailed(e.to_string())
    }
}

fn excerpt(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY).collect()
}

/// Parses a `Retry-After` value given as delta-seconds or an HTTP date.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<u64> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(secs);
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    Some((at.with_timezone(&Utc) - now).num_seconds().max(0) as u64)
}

/// Maps a non-success status to an error.
///
/// A 429 without a usable `Retry-After` carries zero seconds, which leaves
/// the delay to the retry policy's backoff.
pub fn error_for_status(
    status: StatusCode,
    retry_after: Option<&str>,
    body: &str,
) -> ConnectorError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            let secs = retry_after
                .and_then(|v| parse_retry_after(v, Utc::now()))
                .unwrap_or(0);
            ConnectorError::RateLimited(secs)
        }
        StatusCode::UNAUTHORIZED => ConnectorError::AuthenticationFailed("Unauthorized".into()),
        StatusCode::FORBIDDEN => ConnectorError::AuthorizationDenied("Forbidden".into()),
        StatusCode::NOT_FOUND => ConnectorError::NotFound("Resource not found".into()),
        StatusCode::BAD_REQUEST => {
            ConnectorError::InvalidRequest(format!("Bad request: {}", excerpt(body)))
        }
        _ => ConnectorError::Http {
            status: status.as_u16(),
            message: excerpt(body),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn settings() -> HttpSettings {
        HttpSettings::with_base_url("https://api.example.com/")
    }

    #[test]
    fn test_build_url() {
        let client = HttpClient::new(&settings(), AuthConfig::None).unwrap();

        assert_eq!(
            client.build_url("/api/v1/resource"),
            "https://api.example.com/api/v1/resource"
        );
        assert_eq!(
            client.build_url("api/v1/resource"),
            "https://api.example.com/api/v1/resource"
        );
    }

    #[test]
    fn test_missing_base_url() {
        let err = HttpClient::new(&HttpSettings::default(), AuthConfig::None).unwrap_err();
        assert!(matches!(err, ConnectorError::ConfigError(_)));
    }

    #[test]
    fn test_default_retry_policy_is_rate_limited() {
        let client = HttpClient::new(&settings(), AuthConfig::None).unwrap();
        assert_eq!(client.retry_policy().max_attempts(), 3);
        assert!(client
            .retry_policy()
            .is_retryable(&ConnectorError::RateLimited(1)));
    }

    #[test]
    fn test_rate_limit_config() {
        let config = RateLimitConfig::default();
        assert_eq!(config.max_requests, 100);
        assert_eq!(config.period, Duration::from_secs(60));
        assert_eq!(config.burst_size, 10);

        let client = HttpClient::new(&settings(), AuthConfig::None)
            .unwrap()
            .with_rate_limit(RateLimitConfig::per_minute(4))
            .unwrap();
        assert!(client.rate_limiter.is_some());
    }

    #[test]
    fn test_shared_rate_limiter_spans_clients() {
        let limiter = SharedRateLimiter::new(&RateLimitConfig::per_minute(1)).unwrap();
        let client = |limiter: &SharedRateLimiter| {
            HttpClient::new(&settings(), AuthConfig::None)
                .unwrap()
                .with_shared_rate_limit(limiter)
        };
        let (first, second) = (client(&limiter), client(&limiter));

        assert!(first.rate_limiter.as_ref().unwrap().check().is_ok());
        assert!(second.rate_limiter.as_ref().unwrap().check().is_err());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn test_zero_period_rejected() {
        let config = RateLimitConfig {
            max_requests: 1,
            period: Duration::ZERO,
            burst_size: 1,
        };
        assert!(config.quota().is_err());
    }

    #[test]
    fn test_auth_debug_is_redacted() {
        let auth = AuthConfig::bearer(SecureString::from("xoxb-secret"));
        let debug = format!("{:?}", auth);
        assert!(debug.contains("Bearer"));
        assert!(!debug.contains("xoxb-secret"));
    }

    #[test]
    fn test_parse_retry_after() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_retry_after("30", now), Some(30));
        assert_eq!(
            parse_retry_after("Mon, 01 Jan 2024 00:00:10 GMT", now),
            Some(10)
        );
        assert_eq!(
            parse_retry_after("Sun, 31 Dec 2023 23:59:00 GMT", now),
            Some(0)
        );
        assert_eq!(parse_retry_after("soon", now), None);
    }

    #[test]
    fn test_error_for_status() {
        assert_eq!(
            error_for_status(StatusCode::TOO_MANY_REQUESTS, Some("7"), ""),
            ConnectorError::RateLimited(7)
        );
        assert_eq!(
            error_for_status(StatusCode::TOO_MANY_REQUESTS, None, ""),
            ConnectorError::RateLimited(0)
        );
        assert!(matches!(
            error_for_status(StatusCode::UNAUTHORIZED, None, ""),
            ConnectorError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            error_for_status(StatusCode::BAD_REQUEST, None, "bad jql"),
            ConnectorError::InvalidRequest(msg) if msg.contains("bad jql")
        ));

        let err = error_for_status(StatusCode::SERVICE_UNAVAILABLE, None, "maintenance");
        assert_eq!(err.status_code(), Some(503));
    }
}
