//! REST client for the subscription provider's cancellation API.
//!
//! Wraps `GET /subscriptions/{ref}` and `POST /subscriptions/{ref}/cancel`
//! using [`reqwest`], classifying every failure as transient or permanent.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use super::api::{ProviderClient, ProviderError, RemoteState};

/// HTTP client for one provider API base URL.
pub struct HttpProviderClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct StateResponse {
    status: RemoteState,
}

#[derive(Debug, Deserialize)]
struct CancelResponse {
    #[serde(default)]
    confirmation_id: Option<String>,
}

impl HttpProviderClient {
    /// Create a client with a per-call timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Reuse an existing [`reqwest::Client`] for connection pooling.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, external_ref: &str, suffix: &str) -> String {
        format!("{}/subscriptions/{external_ref}{suffix}", self.base_url)
    }

    async fn parse<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Permanent(format!("unexpected provider response: {e}")))
    }
}

/// Map a non-2xx provider status onto the retry taxonomy.
///
/// 5xx, 408 and 429 are retried; any other client error is final.
pub fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    };
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        ProviderError::Transient(message)
    } else {
        ProviderError::Permanent(message)
    }
}

fn classify_transport(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        ProviderError::Transient(err.to_string())
    } else {
        ProviderError::Permanent(err.to_string())
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn fetch_state(&self, external_ref: &str) -> Result<RemoteState, ProviderError> {
        let response = self
            .client
            .get(self.url(external_ref, ""))
            .send()
            .await
            .map_err(classify_transport)?;
        let body: StateResponse = Self::parse(response).await?;
        Ok(body.status)
    }

    async fn request_cancel(&self, external_ref: &str) -> Result<Option<String>, ProviderError> {
        let response = self
            .client
            .post(self.url(external_ref, "/cancel"))
            .send()
            .await
            .map_err(classify_transport)?;
        let body: CancelResponse = Self::parse(response).await?;
        Ok(body.confirmation_id)
    }
}
