//! HTTP implementation of [`ResourceClient`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;
use tracing::debug;
use url::Url;

use super::{ResourceClient, ResourceRequest};
use crate::error::{Error, Result};

/// Fetches resources from the dashboard REST API.
#[derive(Debug, Clone)]
pub struct HttpResourceClient {
    client: Client,
    base_url: Url,
}

impl HttpResourceClient {
    /// Create a client for `base_url` with a per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("Invalid base URL '{}': {}", base_url, e)))?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Full URL for `request`, without query parameters.
    pub fn endpoint(&self, request: &ResourceRequest) -> String {
        format!(
            "{}{}",
            self.base_url.as_str().trim_end_matches('/'),
            request.resource.path()
        )
    }
}

#[async_trait]
impl ResourceClient for HttpResourceClient {
    async fn fetch(&self, request: &ResourceRequest) -> Result<JsonValue> {
        let url = self.endpoint(request);
        debug!("GET {} ({})", url, request.resource);

        let mut builder = self.client.get(&url);
        if let Some(range) = &request.range {
            builder = builder.query(&range.query());
        }

        let response = builder.send().await?.error_for_status()?;
        Ok(response.json::<JsonValue>().await?)
    }
}
