// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! JSON-over-HTTP fetcher.
//!
//! Field matching is case-insensitive: object keys of the received document
//! are folded to ASCII lower case before decoding, so target types declare
//! lower-case field names.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with status {status}")]
    Status { url: String, status: StatusCode },

    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

type Reporter = Arc<dyn Fn(&FetchError) + Send + Sync>;

/// Fetches JSON documents and decodes them into typed values.
#[derive(Clone)]
pub struct JsonFetcher {
    client: Client,
    reporter: Option<Reporter>,
}

impl fmt::Debug for JsonFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonFetcher")
            .field("reporter", &self.reporter.is_some())
            .finish()
    }
}

impl JsonFetcher {
    /// Fetcher with its own client and the given request timeout.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            reporter: None,
        }
    }

    /// Callback invoked for every failure of [`fetch_raw`](Self::fetch_raw)
    /// and [`fetch_json`](Self::fetch_json).
    pub fn with_reporter<F>(mut self, reporter: F) -> Self
    where
        F: Fn(&FetchError) + Send + Sync + 'static,
    {
        self.reporter = Some(Arc::new(reporter));
        self
    }

    /// Pass a failure to the log and the reporter, if any.
    pub fn report(&self, err: &FetchError) {
        warn!("Data fetch failed: {}", err);
        if let Some(reporter) = &self.reporter {
            reporter(err);
        }
    }

    pub async fn try_fetch_raw(&self, url: &str) -> Result<String, FetchError> {
        debug!("Fetching {}", url);
        let request_error = |source| FetchError::Request {
            url: url.to_string(),
            source,
        };
        let response = self.client.get(url).send().await.map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }
        response.text().await.map_err(request_error)
    }

    pub async fn try_fetch_json<T>(&self, url: &str) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
    {
        let body = self.try_fetch_raw(url).await?;
        let decode_error = |source| FetchError::Decode {
            url: url.to_string(),
            source,
        };
        let document: Value = serde_json::from_str(&body).map_err(decode_error)?;
        serde_json::from_value(fold_keys(document)).map_err(decode_error)
    }

    /// Body of `url`, or `None` after reporting the failure.
    pub async fn fetch_raw(&self, url: &str) -> Option<String> {
        self.try_fetch_raw(url)
            .await
            .map_err(|e| self.report(&e))
            .ok()
    }

    /// Decoded document at `url`, or `None` after reporting the failure.
    pub async fn fetch_json<T>(&self, url: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        self.try_fetch_json(url)
            .await
            .map_err(|e| self.report(&e))
            .ok()
    }
}

/// Lower-case every object key, recursively.
///
/// Keys differing only by case collapse into one; the last one wins.
pub fn fold_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key.to_ascii_lowercase(), fold_keys(value)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(fold_keys).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Reading {
        sensor: String,
        value: f64,
        limits: Limits,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Limits {
        low: f64,
        high: f64,
    }

    async fn serve(status: u16, body: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/reading"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&server)
            .await;
        server
    }

    fn fetcher() -> JsonFetcher {
        JsonFetcher::new(Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_fold_keys_nested() {
        let folded = fold_keys(json!({
            "Sensor": "T1",
            "Nested": {"InnerKey": [ {"DeepKey": 1} ]},
            "plain": true
        }));
        assert_eq!(
            folded,
            json!({
                "sensor": "T1",
                "nested": {"innerkey": [ {"deepkey": 1} ]},
                "plain": true
            })
        );
    }

    #[test]
    fn test_fold_keys_leaves_values_alone() {
        assert_eq!(fold_keys(json!("MiXeD")), json!("MiXeD"));
        assert_eq!(fold_keys(json!({"A": "MiXeD"})), json!({"a": "MiXeD"}));
    }

    #[tokio::test]
    async fn test_fetch_json_matches_fields_case_insensitively() {
        let server = serve(
            200,
            r#"{"SENSOR": "T1", "Value": 21.5, "Limits": {"Low": 10, "HIGH": 30}}"#,
        )
        .await;

        let reading: Reading = fetcher()
            .try_fetch_json(&format!("{}/reading", server.uri()))
            .await
            .unwrap();
        assert_eq!(
            reading,
            Reading {
                sensor: "T1".to_string(),
                value: 21.5,
                limits: Limits {
                    low: 10.0,
                    high: 30.0
                },
            }
        );
    }

    #[tokio::test]
    async fn test_fetch_raw_returns_body() {
        let server = serve(200, "hello").await;
        let body = fetcher()
            .fetch_raw(&format!("{}/reading", server.uri()))
            .await;
        assert_eq!(body.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_failure() {
        let server = serve(503, "busy").await;
        let err = fetcher()
            .try_fetch_raw(&format!("{}/reading", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FetchError::Status {
                status: StatusCode::SERVICE_UNAVAILABLE,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_decode_failure_is_reported() {
        let server = serve(200, "not json").await;
        let reported = Arc::new(AtomicUsize::new(0));
        let counter = reported.clone();
        let fetcher = fetcher().with_reporter(move |err| {
            assert!(matches!(err, FetchError::Decode { .. }));
            counter.fetch_add(1, Ordering::Relaxed);
        });

        let reading: Option<Reading> = fetcher
            .fetch_json(&format!("{}/reading", server.uri()))
            .await;
        assert!(reading.is_none());
        assert_eq!(reported.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_missing_field_is_decode_error() {
        let server = serve(200, r#"{"sensor": "T1"}"#).await;
        let err = fetcher()
            .try_fetch_json::<Reading>(&format!("{}/reading", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_request_error() {
        let reported = Arc::new(AtomicUsize::new(0));
        let counter = reported.clone();
        let fetcher = fetcher().with_reporter(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        let body = fetcher.fetch_raw("http://127.0.0.1:9/unreachable").await;
        assert!(body.is_none());
        assert_eq!(reported.load(Ordering::Relaxed), 1);
    }
}
