//! # HTTP Marketplace Client
//!
//! `reqwest` implementation of [`MarketplaceClient`].
//!
//! ## Retry Policy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  send ──► 2xx ─────────────────────────────► Ok(body)                  │
//! │    │                                                                    │
//! │    ├────► 429 ──► wait rate-limit window ──► retry                     │
//! │    ├────► 5xx / transport / timeout ──► exponential backoff ──► retry  │
//! │    └────► other 4xx ─────────────────────────► Err(Rejected)           │
//! │                                                                         │
//! │  At most `max_attempts` sends; the last error is returned.             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::MarketplaceClient;
use crate::config::{Credentials, MarketplaceSettings};
use crate::error::{SyncError, SyncResult};

/// Seller API client over HTTPS with Basic auth.
#[derive(Debug, Clone)]
pub struct HttpMarketplaceClient {
    client: Client,
    base_url: Url,
    seller_id: String,
    max_attempts: u32,
    rate_limit_wait: Duration,
}

impl HttpMarketplaceClient {
    pub fn new(settings: &MarketplaceSettings, credentials: &Credentials) -> SyncResult<Self> {
        let mut base = settings.effective_base_url().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;

        let mut auth = HeaderValue::from_str(&basic_auth(credentials))
            .map_err(|e| SyncError::InvalidConfig(format!("credentials: {}", e)))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(format!("{} - {}", credentials.seller_id, settings.user_agent))
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("http client: {}", e)))?;

        Ok(HttpMarketplaceClient {
            client,
            base_url,
            seller_id: credentials.seller_id.clone(),
            max_attempts: settings.max_attempts.max(1),
            rate_limit_wait: Duration::from_secs(settings.rate_limit_wait_secs),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn send_once(&self, method: Method, url: Url, body: Option<&Value>) -> SyncResult<Value> {
        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return Ok(serde_json::from_str(&text)?);
        }

        Err(classify_failure(status, &text))
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

#[async_trait]
impl MarketplaceClient for HttpMarketplaceClient {
    fn seller_id(&self) -> &str {
        &self.seller_id
    }

    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> SyncResult<Value> {
        let url = self.base_url.join(path.trim_start_matches('/'))?;
        let mut backoff = self.create_backoff();
        let mut attempt = 1;

        loop {
            debug!(%method, %url, attempt, "Marketplace request");

            let err = match self.send_once(method.clone(), url.clone(), body.as_ref()).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() || attempt >= self.max_attempts {
                return Err(err);
            }

            let wait = match err {
                SyncError::RateLimited => self.rate_limit_wait,
                _ => backoff.next_backoff().unwrap_or(self.rate_limit_wait),
            };
            warn!(
                %url,
                attempt,
                error = %err,
                wait_ms = wait.as_millis() as u64,
                "Marketplace request failed, retrying"
            );
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }
}

/// `Basic base64(key:secret)`.
fn basic_auth(credentials: &Credentials) -> String {
    let raw = format!("{}:{}", credentials.api_key, credentials.api_secret);
    format!("Basic {}", STANDARD.encode(raw))
}

/// Maps a non-2xx response onto the error taxonomy.
fn classify_failure(status: StatusCode, body: &str) -> SyncError {
    let message = error_message(body).unwrap_or_else(|| format!("HTTP error {}", status.as_u16()));

    if status == StatusCode::TOO_MANY_REQUESTS {
        SyncError::RateLimited
    } else if status.is_server_error() {
        SyncError::Server {
            status: status.as_u16(),
            message,
        }
    } else {
        SyncError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

/// `message`, or the first entry of `errors[].message`.
fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| {
            value
                .get("errors")
                .and_then(Value::as_array)
                .and_then(|errors| errors.first())
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
        })
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials {
            api_key: "key".into(),
            api_secret: "secret".into(),
            seller_id: "12345".into(),
        }
    }

    #[test]
    fn test_basic_auth_header() {
        // base64("key:secret")
        assert_eq!(basic_auth(&credentials()), "Basic a2V5OnNlY3JldA==");
    }

    #[test]
    fn test_failure_classification() {
        assert!(matches!(
            classify_failure(StatusCode::TOO_MANY_REQUESTS, ""),
            SyncError::RateLimited
        ));

        match classify_failure(StatusCode::BAD_GATEWAY, "<html>") {
            SyncError::Server { status, message } => {
                assert_eq!(status, 502);
                assert_eq!(message, "HTTP error 502");
            }
            other => panic!("unexpected: {:?}", other),
        }

        match classify_failure(StatusCode::BAD_REQUEST, r#"{"errors":[{"message":"Invalid barcode"}]}"#) {
            SyncError::Rejected { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Invalid barcode");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_paths_join_onto_base() {
        let mut settings = MarketplaceSettings::default();
        settings.sandbox = true;
        let client = HttpMarketplaceClient::new(&settings, &credentials()).unwrap();

        let url = client.base_url().join("suppliers/12345/products").unwrap();
        assert_eq!(
            url.as_str(),
            "https://stageapi.trendyol.com/stagesapigw/suppliers/12345/products"
        );
        assert_eq!(client.seller_id(), "12345");
    }
}
