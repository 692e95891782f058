use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("lookup request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("lookup service answered with status {0}")]
    Status(StatusCode),
    #[error("failed to decode lookup response: {0}")]
    Decode(#[source] reqwest::Error),
    #[error("lookup service returned an empty value")]
    EmptyValue,
    #[error("lookup token is not a valid header value")]
    InvalidToken,
}

/// Resolves the enrichment value for a lookup key with a single round trip.
/// Implementations never retry: a failure sends the message to the error topic.
#[async_trait]
pub trait LookupClient: Send + Sync {
    async fn resolve(&self, first_name: &str) -> Result<String, LookupError>;
}

#[derive(Serialize)]
struct LookupRequest<'a> {
    first_name: &'a str,
}

#[derive(Deserialize)]
struct LookupResponse {
    #[serde(default)]
    inn: String,
}

/// Calls the lookup service over HTTP with a JSON body.
pub struct HttpLookupClient {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl HttpLookupClient {
    pub fn new(
        url: reqwest::Url,
        token: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, LookupError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        if let Some(token) = token.filter(|token| !token.is_empty()) {
            let mut value = header::HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| LookupError::InvalidToken)?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("enrichment-worker")
            .timeout(timeout)
            .build()
            .map_err(LookupError::Request)?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl LookupClient for HttpLookupClient {
    async fn resolve(&self, first_name: &str) -> Result<String, LookupError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&LookupRequest { first_name })
            .send()
            .await
            .map_err(LookupError::Request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(LookupError::Status(status));
        }

        let body: LookupResponse = response.json().await.map_err(LookupError::Decode)?;
        debug!(url = %self.url, "lookup resolved");

        let value = body.inn.trim();
        if value.is_empty() {
            return Err(LookupError::EmptyValue);
        }
        Ok(value.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use httpmock::{Method, MockServer};
    use serde_json::json;

    use super::*;

    fn client(server: &MockServer, token: Option<&str>) -> HttpLookupClient {
        let url = server.url("/v1/inn").parse().unwrap();
        HttpLookupClient::new(url, token, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn resolves_value() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(Method::POST)
                .path("/v1/inn")
                .header("authorization", "Bearer secret")
                .json_body(json!({"first_name": "Alice"}));
            then.status(200).json_body(json!({"inn": "INN123"}));
        });

        let value = client(&server, Some("secret"))
            .resolve("Alice")
            .await
            .unwrap();

        assert_eq!(value, "INN123");
        mock.assert_hits(1);
    }

    #[tokio::test]
    async fn error_status_is_not_retried() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(Method::POST).path("/v1/inn");
            then.status(503).body("unavailable");
        });

        let err = client(&server, None).resolve("Alice").await.unwrap_err();

        assert!(matches!(
            err,
            LookupError::Status(StatusCode::SERVICE_UNAVAILABLE)
        ));
        mock.assert_hits(1);
    }

    #[tokio::test]
    async fn bad_bodies_are_rejected() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(Method::POST).json_body(json!({"first_name": "Bob"}));
            then.status(200).body("<html>not json</html>");
        });
        server.mock(|when, then| {
            when.method(Method::POST)
                .json_body(json!({"first_name": "Carol"}));
            then.status(200).json_body(json!({"inn": ""}));
        });

        let lookup = client(&server, None);
        assert!(matches!(
            lookup.resolve("Bob").await,
            Err(LookupError::Decode(_))
        ));
        assert!(matches!(
            lookup.resolve("Carol").await,
            Err(LookupError::EmptyValue)
        ));
    }

    #[tokio::test]
    async fn slow_service_times_out() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(Method::POST).path("/v1/inn");
            then.status(200)
                .delay(Duration::from_millis(500))
                .json_body(json!({"inn": "INN123"}));
        });

        let url = server.url("/v1/inn").parse().unwrap();
        let lookup = HttpLookupClient::new(url, None, Duration::from_millis(50)).unwrap();

        assert!(matches!(
            lookup.resolve("Alice").await,
            Err(LookupError::Request(_))
        ));
    }
}
