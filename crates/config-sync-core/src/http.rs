//! HTTP client for the configuration server.
//!
//! Builds the three request shapes the sync engine needs (full/skip-cache
//! release fetch, cached file fetch, notification long-poll), signs them when
//! a secret is configured, and classifies responses. It also hosts the
//! exponential backoff helper that governs retries of failed polls.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::signature::{Signer, AUTHORIZATION_HEADER, TIMESTAMP_HEADER};

/// Path prefix for release fetches (`/configs/{appId}/{cluster}/{namespace}`).
const CONFIGS_ENDPOINT: &str = "configs";
/// Path prefix for cache-served file fetches (`/configfiles/json/{appId}/{cluster}/{namespace}`).
const CONFIG_FILES_ENDPOINT: [&str; 2] = ["configfiles", "json"];
/// Long-poll endpoint for change notifications.
const NOTIFICATIONS_ENDPOINT: [&str; 2] = ["notifications", "v2"];

/// Default long-poll timeout; the server holds the request open until a change or this elapses.
pub const DEFAULT_LONG_POLL_TIMEOUT: Duration = Duration::from_millis(50_000);
/// Default timeout applied to release and cached-file fetches.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Identity sent with every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub app_id: String,
    pub cluster: String,
    /// Client address reported to the server for gray-release targeting.
    pub ip: String,
}

/// Timeouts governing how the HTTP client issues requests.
#[derive(Debug, Clone, Copy)]
pub struct HttpClientOptions {
    pub fetch_timeout: Duration,
    pub long_poll_timeout: Duration,
}

impl Default for HttpClientOptions {
    fn default() -> Self {
        Self {
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            long_poll_timeout: DEFAULT_LONG_POLL_TIMEOUT,
        }
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    /// The request did not complete within its client-side timeout.
    #[error("request timed out")]
    Timeout,
    /// The server answered with a status other than 2xx or 304.
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    /// A 2xx answer that does not carry JSON.
    #[error("expected a json response, got status {status}: {body}")]
    UnexpectedContentType { status: u16, body: String },
    /// Transport-level issue (DNS, TLS, connection reset, ...).
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid server url: {0}")]
    InvalidUrl(String),
    #[error("invalid header value for {0}")]
    InvalidHeader(&'static str),
}

impl HttpError {
    /// True when the request hit its client-side timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, HttpError::Timeout)
    }
}

impl From<reqwest::Error> for HttpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HttpError::Timeout
        } else {
            HttpError::Transport(err)
        }
    }
}

/// Payload returned by `/configs/{appId}/{cluster}/{namespace}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseSnapshot {
    pub app_id: String,
    #[serde(default)]
    pub cluster: String,
    pub namespace_name: String,
    #[serde(default)]
    pub configurations: BTreeMap<String, String>,
    #[serde(default)]
    pub release_key: String,
}

/// One `(namespace, notification id)` pair exchanged with the long-poll endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub namespace_name: String,
    pub notification_id: i64,
}

impl NotificationRecord {
    /// Builds the record for `namespace_name` at `notification_id`.
    pub fn new(namespace_name: impl Into<String>, notification_id: i64) -> Self {
        Self {
            namespace_name: namespace_name.into(),
            notification_id,
        }
    }
}

/// HTTP client bound to one configuration server, app and cluster.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: Url,
    identity: ClientIdentity,
    signer: Option<Signer>,
    options: HttpClientOptions,
}

impl HttpClient {
    /// Validates `base_url` (http or https, trailing slash ignored) and builds the client.
    pub fn new(
        base_url: &str,
        identity: ClientIdentity,
        signer: Option<Signer>,
        options: HttpClientOptions,
    ) -> Result<Self, HttpError> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|err| HttpError::InvalidUrl(format!("{base_url}: {err}")))?;
        if base_url.cannot_be_a_base() || !matches!(base_url.scheme(), "http" | "https") {
            return Err(HttpError::InvalidUrl(base_url.to_string()));
        }
        let client = Client::builder()
            .user_agent(concat!("config-sync-core/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(HttpError::Transport)?;
        Ok(Self {
            client,
            base_url,
            identity,
            signer,
            options,
        })
    }

    /// Server URL every endpoint path is appended to.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// App, cluster and ip sent with every request.
    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// Fetches the latest release of `namespace` straight from the config service.
    ///
    /// Used for the initial sync and after a notification; this endpoint is not
    /// served from the server-side cache. Returns `None` on 304 (release unchanged)
    /// and on a 2xx with an empty body.
    pub async fn fetch_release(
        &self,
        namespace: &str,
        release_key: &str,
    ) -> Result<Option<ReleaseSnapshot>, HttpError> {
        let url = self.release_url(namespace, release_key)?;
        let body = self.get(url, self.options.fetch_timeout).await?;
        body.map(|bytes| serde_json::from_slice(&bytes).map_err(HttpError::from))
            .transpose()
    }

    /// Fetches the cache-served flat key/value view of `namespace`.
    ///
    /// Returns `None` on 304 (unchanged) and on a 2xx with an empty body.
    pub async fn fetch_cached(
        &self,
        namespace: &str,
        release_key: &str,
    ) -> Result<Option<BTreeMap<String, String>>, HttpError> {
        let url = self.cached_url(namespace, release_key)?;
        let body = self.get(url, self.options.fetch_timeout).await?;
        body.map(|bytes| serde_json::from_slice(&bytes).map_err(HttpError::from))
            .transpose()
    }

    /// Long-polls for changes to any of `watched`.
    ///
    /// Blocks up to the long-poll timeout; an empty vector means nothing changed
    /// (304, or a 2xx with an empty body).
    pub async fn long_poll(
        &self,
        watched: &[NotificationRecord],
    ) -> Result<Vec<NotificationRecord>, HttpError> {
        let url = self.notifications_url(watched)?;
        let body = self.get(url, self.options.long_poll_timeout).await?;
        match body {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    pub(crate) fn release_url(&self, namespace: &str, release_key: &str) -> Result<Url, HttpError> {
        let mut url = self.endpoint(&[
            CONFIGS_ENDPOINT,
            &self.identity.app_id,
            &self.identity.cluster,
            namespace,
        ])?;
        url.query_pairs_mut()
            .append_pair("releaseKey", release_key)
            .append_pair("ip", &self.identity.ip);
        Ok(url)
    }

    pub(crate) fn cached_url(&self, namespace: &str, release_key: &str) -> Result<Url, HttpError> {
        let [files, json] = CONFIG_FILES_ENDPOINT;
        let mut url = self.endpoint(&[
            files,
            json,
            &self.identity.app_id,
            &self.identity.cluster,
            namespace,
        ])?;
        url.query_pairs_mut()
            .append_pair("releaseKey", release_key)
            .append_pair("ip", &self.identity.ip);
        Ok(url)
    }

    pub(crate) fn notifications_url(
        &self,
        watched: &[NotificationRecord],
    ) -> Result<Url, HttpError> {
        let notifications = serde_json::to_string(watched)?;
        let mut url = self.endpoint(&NOTIFICATIONS_ENDPOINT)?;
        url.query_pairs_mut()
            .append_pair("appId", &self.identity.app_id)
            .append_pair("cluster", &self.identity.cluster)
            .append_pair("notifications", &notifications);
        Ok(url)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, HttpError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| HttpError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Builds the signing headers for `url` (empty when no secret is configured).
    pub(crate) fn signed_headers(&self, url: &Url) -> Result<HeaderMap, HttpError> {
        let mut headers = HeaderMap::new();
        let Some(signer) = &self.signer else {
            return Ok(headers);
        };
        let signed = signer.sign_now(&path_and_query(url));
        headers.insert(
            HeaderName::from_static("authorization"),
            HeaderValue::from_str(&signed.authorization)
                .map_err(|_| HttpError::InvalidHeader(AUTHORIZATION_HEADER))?,
        );
        headers.insert(
            HeaderName::from_static("timestamp"),
            HeaderValue::from_str(&signed.timestamp)
                .map_err(|_| HttpError::InvalidHeader(TIMESTAMP_HEADER))?,
        );
        Ok(headers)
    }

    /// Issues a GET and returns the body of an accepted response.
    ///
    /// `None` for 304 and for a 2xx whose body is empty or whitespace.
    async fn get(&self, url: Url, timeout: Duration) -> Result<Option<Vec<u8>>, HttpError> {
        let headers = self.signed_headers(&url)?;
        debug!(
            url = %url,
            headers = ?redact_headers(&headers),
            timeout_ms = timeout.as_millis() as u64,
            "config-sync HTTP request"
        );

        let response = self
            .client
            .get(url.clone())
            .headers(headers)
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            debug!(url = %url, status = %status, "config-sync HTTP response unchanged");
            return Ok(None);
        }

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_ascii_lowercase().starts_with("application/json"))
            .unwrap_or(false);
        let bytes = response.bytes().await?;
        debug!(
            url = %url,
            status = %status,
            body_len = bytes.len(),
            "config-sync HTTP response"
        );

        if status.is_success() && bytes.iter().all(u8::is_ascii_whitespace) {
            debug!(url = %url, status = %status, "config-sync HTTP response empty, treated as unchanged");
            return Ok(None);
        }
        classify_response(status, is_json, &bytes)?;
        Ok(Some(bytes.to_vec()))
    }
}

/// Maps a non-304 response onto the accepted/rejected taxonomy.
fn classify_response(status: StatusCode, is_json: bool, body: &[u8]) -> Result<(), HttpError> {
    if !status.is_success() {
        let body = body_or_reason(status, body);
        return Err(HttpError::Status {
            status: status.as_u16(),
            body,
        });
    }
    if !is_json {
        return Err(HttpError::UnexpectedContentType {
            status: status.as_u16(),
            body: body_or_reason(status, body),
        });
    }
    Ok(())
}

fn body_or_reason(status: StatusCode, body: &[u8]) -> String {
    if body.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unknown status")
            .to_string()
    } else {
        String::from_utf8_lossy(body).into_owned()
    }
}

/// Returns the exact encoded path and query string that goes on the wire.
pub(crate) fn path_and_query(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

/// Returns a redacted view of request headers suitable for debug logging.
fn redact_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let lower = name.as_str().to_ascii_lowercase();
            let display = if lower == "authorization" {
                "<redacted>".to_string()
            } else {
                value
                    .to_str()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|_| "<non-utf8>".to_string())
            };
            (lower, display)
        })
        .collect()
}

/// Parameters of the poll-failure backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay slept after the first counted failure.
    pub initial_delay: Duration,
    /// Doubling stops once the next delay would reach this ceiling, so the
    /// default 1 000 000 ms ceiling holds the delay at 512 000 ms.
    pub max_delay: Duration,
    /// Consecutive counted failures after which polling stops.
    pub max_retries: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(1_000_000),
            max_retries: 10,
        }
    }
}

/// What the loop should do after a counted failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Tracks consecutive failures and the current retry delay.
#[derive(Debug)]
pub struct BackoffState {
    config: BackoffConfig,
    delay: Duration,
    failures: u32,
}

impl BackoffState {
    /// Starts with zero failures and the initial delay.
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            delay: config.initial_delay,
            failures: 0,
        }
    }

    /// Counts a failure and returns how long to wait before polling again.
    pub fn register_failure(&mut self) -> RetryDecision {
        self.failures = self.failures.saturating_add(1);
        if self.failures >= self.config.max_retries {
            return RetryDecision::GiveUp;
        }
        let wait = self.delay;
        let next = self.delay.saturating_mul(2);
        // never exceeds max_delay; a doubling that would reach it is dropped
        if next < self.config.max_delay {
            self.delay = next;
        }
        RetryDecision::RetryAfter(wait)
    }

    /// Resets the failure count and delay after a successful poll iteration.
    pub fn register_success(&mut self) {
        self.failures = 0;
        self.delay = self.config.initial_delay;
    }

    /// Consecutive failures since the last success.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Delay the next failure will return.
    pub fn current_delay(&self) -> Duration {
        self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httptest::matchers::{all_of, contains, key, not, request, url_decoded};
    use httptest::responders::{json_encoded, status_code};
    use httptest::{Expectation, Server};
    use serde_json::json;

    fn identity() -> ClientIdentity {
        ClientIdentity {
            app_id: "app1".into(),
            cluster: "default".into(),
            ip: String::new(),
        }
    }

    fn client_for(server: &Server, secret: Option<&str>) -> HttpClient {
        let base_url = server.url_str("").trim_end_matches('/').to_string();
        HttpClient::new(
            &base_url,
            identity(),
            secret.map(Signer::new),
            HttpClientOptions {
                fetch_timeout: Duration::from_secs(2),
                long_poll_timeout: Duration::from_millis(200),
            },
        )
        .expect("client builds")
    }

    #[test]
    fn classify_response_maps_expected_errors() {
        assert!(classify_response(StatusCode::OK, true, b"{}").is_ok());
        assert!(matches!(
            classify_response(StatusCode::NOT_FOUND, true, b"{\"message\":\"x\"}"),
            Err(HttpError::Status { status: 404, .. })
        ));
        assert!(matches!(
            classify_response(StatusCode::INTERNAL_SERVER_ERROR, false, b""),
            Err(HttpError::Status { status: 500, ref body }) if body == "Internal Server Error"
        ));
        assert!(matches!(
            classify_response(StatusCode::OK, false, b"<html>"),
            Err(HttpError::UnexpectedContentType { status: 200, ref body }) if body == "<html>"
        ));
    }

    #[test]
    fn backoff_doubles_and_holds_below_ceiling() {
        let mut state = BackoffState::new(BackoffConfig {
            max_retries: 100,
            ..Default::default()
        });
        let mut delays = Vec::new();
        for _ in 0..12 {
            match state.register_failure() {
                RetryDecision::RetryAfter(delay) => delays.push(delay.as_millis() as u64),
                RetryDecision::GiveUp => panic!("retry budget should not be exhausted"),
            }
        }
        assert_eq!(
            delays,
            vec![
                1_000, 2_000, 4_000, 8_000, 16_000, 32_000, 64_000, 128_000, 256_000, 512_000,
                512_000, 512_000
            ]
        );

        state.register_success();
        assert_eq!(state.failures(), 0);
        assert_eq!(
            state.register_failure(),
            RetryDecision::RetryAfter(Duration::from_millis(1_000))
        );
    }

    #[test]
    fn backoff_gives_up_on_tenth_failure() {
        let mut state = BackoffState::new(BackoffConfig::default());
        for attempt in 1..10 {
            assert!(
                matches!(state.register_failure(), RetryDecision::RetryAfter(_)),
                "failure {attempt} should still be retried"
            );
        }
        assert_eq!(state.register_failure(), RetryDecision::GiveUp);
        assert_eq!(state.failures(), 10);
    }

    #[test]
    fn urls_follow_server_layout() {
        let client = HttpClient::new(
            "http://config.example.com/",
            identity(),
            None,
            HttpClientOptions::default(),
        )
        .expect("client builds");

        let release = client.release_url("application", "").unwrap();
        assert_eq!(
            path_and_query(&release),
            "/configs/app1/default/application?releaseKey=&ip="
        );

        let cached = client.cached_url("flags.json", "rk-1").unwrap();
        assert_eq!(
            path_and_query(&cached),
            "/configfiles/json/app1/default/flags.json?releaseKey=rk-1&ip="
        );

        let poll = client
            .notifications_url(&[NotificationRecord::new("application", 0)])
            .unwrap();
        assert_eq!(
            path_and_query(&poll),
            "/notifications/v2?appId=app1&cluster=default&notifications=%5B%7B%22namespaceName%22%3A%22application%22%2C%22notificationId%22%3A0%7D%5D"
        );
    }

    #[test]
    fn base_url_prefix_is_preserved() {
        let client = HttpClient::new(
            "https://gateway.example.com/config-service",
            identity(),
            None,
            HttpClientOptions::default(),
        )
        .expect("client builds");
        let url = client.release_url("application", "").unwrap();
        assert_eq!(url.path(), "/config-service/configs/app1/default/application");
    }

    #[test]
    fn rejects_unusable_base_urls() {
        for base in ["not a url", "ftp://config.example.com", "mailto:ops@example.com"] {
            let err = HttpClient::new(base, identity(), None, HttpClientOptions::default())
                .expect_err("url should be rejected");
            assert!(matches!(err, HttpError::InvalidUrl(_)), "{base}: {err}");
        }
    }

    #[tokio::test]
    async fn fetch_release_decodes_payload_and_signs_request() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/configs/app1/default/application"),
                request::query(url_decoded(contains(("releaseKey", "")))),
                request::headers(contains(key("authorization"))),
                request::headers(contains(key("timestamp"))),
            ])
            .respond_with(json_encoded(json!({
                "appId": "app1",
                "cluster": "default",
                "namespaceName": "application",
                "configurations": {"FOO": "bar"},
                "releaseKey": "rk-1"
            }))),
        );

        let client = client_for(&server, Some("secret"));
        let release = client
            .fetch_release("application", "")
            .await
            .expect("fetch succeeds")
            .expect("payload present");
        assert_eq!(release.release_key, "rk-1");
        assert_eq!(release.configurations.get("FOO").map(String::as_str), Some("bar"));
    }

    #[tokio::test]
    async fn unsigned_requests_carry_no_auth_headers() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/configfiles/json/app1/default/application"),
                request::headers(not(contains(key("authorization")))),
                request::headers(not(contains(key("timestamp")))),
            ])
            .respond_with(json_encoded(json!({"FOO": "cached"}))),
        );

        let client = client_for(&server, None);
        let cached = client
            .fetch_cached("application", "")
            .await
            .expect("fetch succeeds")
            .expect("payload present");
        assert_eq!(cached.get("FOO").map(String::as_str), Some("cached"));
    }

    #[tokio::test]
    async fn not_modified_is_reported_as_unchanged() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/configs/app1/default/application"))
                .respond_with(status_code(304)),
        );
        server.expect(
            Expectation::matching(request::method_path("GET", "/notifications/v2"))
                .respond_with(status_code(304)),
        );

        let client = client_for(&server, None);
        assert!(client
            .fetch_release("application", "rk-1")
            .await
            .expect("304 accepted")
            .is_none());
        assert!(client
            .long_poll(&[NotificationRecord::new("application", 3)])
            .await
            .expect("304 accepted")
            .is_empty());
    }

    #[tokio::test]
    async fn long_poll_returns_changed_namespaces() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/notifications/v2"),
                request::query(url_decoded(contains(("appId", "app1")))),
                request::query(url_decoded(contains((
                    "notifications",
                    r#"[{"namespaceName":"application","notificationId":0}]"#
                )))),
            ])
            .respond_with(json_encoded(json!([
                {"namespaceName": "application", "notificationId": 5, "messages": {"details": {}}}
            ]))),
        );

        let client = client_for(&server, None);
        let changes = client
            .long_poll(&[NotificationRecord::new("application", 0)])
            .await
            .expect("poll succeeds");
        assert_eq!(changes, vec![NotificationRecord::new("application", 5)]);
    }

    #[tokio::test]
    async fn non_json_and_error_statuses_are_rejected() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/configs/app1/default/application"))
                .respond_with(status_code(200).body("plain text")),
        );
        server.expect(
            Expectation::matching(request::method_path("GET", "/configs/app1/default/missing"))
                .respond_with(status_code(404).body("namespace not found")),
        );

        let client = client_for(&server, None);
        let err = client.fetch_release("application", "").await.unwrap_err();
        assert!(matches!(err, HttpError::UnexpectedContentType { ref body, .. } if body == "plain text"));

        let err = client.fetch_release("missing", "").await.unwrap_err();
        assert!(matches!(err, HttpError::Status { status: 404, ref body } if body == "namespace not found"));
    }

    #[tokio::test]
    async fn empty_success_body_is_reported_as_unchanged() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/notifications/v2"))
                .respond_with(status_code(200).append_header("Content-Type", "application/json")),
        );
        server.expect(
            Expectation::matching(request::method_path("GET", "/configs/app1/default/application"))
                .respond_with(
                    status_code(200)
                        .append_header("Content-Type", "application/json")
                        .body(" \n"),
                ),
        );
        server.expect(
            Expectation::matching(request::method_path(
                "GET",
                "/configfiles/json/app1/default/application",
            ))
            .respond_with(status_code(204)),
        );

        let client = client_for(&server, None);
        assert!(client
            .long_poll(&[NotificationRecord::new("application", 3)])
            .await
            .expect("empty body accepted")
            .is_empty());
        assert!(client
            .fetch_release("application", "rk-1")
            .await
            .expect("blank body accepted")
            .is_none());
        assert!(client
            .fetch_cached("application", "rk-1")
            .await
            .expect("no content accepted")
            .is_none());
    }

    #[tokio::test]
    async fn slow_long_poll_surfaces_as_timeout() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/notifications/v2")).respond_with(
                httptest::responders::delay_and_then(Duration::from_secs(2), status_code(304)),
            ),
        );

        let client = client_for(&server, None);
        let err = client
            .long_poll(&[NotificationRecord::new("application", 0)])
            .await
            .unwrap_err();
        assert!(err.is_timeout(), "expected timeout, got {err}");
    }
}
