use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::info;

use crate::error::ProviderError;

/// Machine creation waits for the provider to schedule the VM.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Shared HTTP client for the compute provider. Owns the connection pool,
/// both API base URLs, and the bearer token. Clone is a cheap Arc refcount bump.
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<Inner>,
}

struct Inner {
    client: Client,
    api_url: String,
    graphql_url: String,
    token: String,
}

impl HttpClient {
    pub fn new(api_url: &str, graphql_url: &str, token: String) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::transport("http client", e))?;

        let api_url = api_url.trim_end_matches('/').to_string();
        info!(api_url = %api_url, graphql_url = %graphql_url, "provider http client initialized");

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                api_url,
                graphql_url: graphql_url.to_string(),
                token,
            }),
        })
    }

    /// Authenticated request against the REST API.
    ///
    /// `path` is appended to the base URL (e.g. `/v1/apps`).
    pub fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{path}", self.inner.api_url);
        self.inner
            .client
            .request(method, url)
            .bearer_auth(&self.inner.token)
    }

    /// Authenticated POST against the GraphQL endpoint.
    pub fn graphql(&self) -> reqwest::RequestBuilder {
        self.inner
            .client
            .post(&self.inner.graphql_url)
            .bearer_auth(&self.inner.token)
    }
}
