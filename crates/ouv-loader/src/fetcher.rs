//! Network boundary
//!
//! The loader only knows the [`Fetcher`] trait; [`HttpFetcher`] is the
//! production implementation on top of reqwest.

use crate::error::FetchError;
use crate::request::{LoadRequest, Method};
use async_trait::async_trait;
use serde_json::Value;

/// Executes one attempt of a request
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform the request and decode the JSON body
    async fn fetch(&self, request: &LoadRequest) -> Result<Value, FetchError>;
}

/// reqwest-backed fetcher resolving paths against an API base URL
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFetcher {
    /// Create a fetcher for `base_url` (e.g. `http://localhost:3000`)
    ///
    /// # Errors
    /// `FetchError::InvalidRequest` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("ouvidoria-dash/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::InvalidRequest(e.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a fetcher around an existing client
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    /// Absolute URL for a request path
    #[must_use]
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &LoadRequest) -> Result<Value, FetchError> {
        let url = self.url_for(&request.path);
        let builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self
                .client
                .post(&url)
                .json(request.body.as_ref().unwrap_or(&Value::Null)),
        };

        let response = builder.send().await.map_err(|e| {
            if e.is_builder() {
                FetchError::InvalidRequest(e.to_string())
            } else {
                FetchError::Connection(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::http(status.as_u16(), url));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}
