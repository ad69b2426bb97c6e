//! HTTP object-store sink (S3-compatible gateways, presigned prefixes).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, instrument};
use url::Url;

use super::{Sink, SinkError, validate_logical_path};
use crate::user_agent;

/// Uploads each blob with `PUT {endpoint}/{logicalPath}`.
#[derive(Debug, Clone)]
pub struct ObjectStoreSink {
    client: Client,
    endpoint: Url,
    bearer_token: Option<String>,
}

impl ObjectStoreSink {
    /// Creates a sink rooted at `endpoint`.
    ///
    /// A trailing slash is added to the endpoint path if missing so logical
    /// paths are appended rather than replacing the last segment.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Network`] if the HTTP client cannot be built.
    pub fn new(
        endpoint: &Url,
        bearer_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SinkError> {
        let mut endpoint = endpoint.clone();
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent::default_harvester_user_agent())
            .build()
            .map_err(|source| SinkError::Network {
                url: endpoint.to_string(),
                source,
            })?;

        Ok(Self {
            client,
            endpoint,
            bearer_token: bearer_token.filter(|token| !token.is_empty()),
        })
    }

    fn object_url(&self, path: &str) -> Result<Url, SinkError> {
        self.endpoint
            .join(path)
            .map_err(|_| SinkError::invalid_path(path))
    }
}

#[async_trait]
impl Sink for ObjectStoreSink {
    #[instrument(skip(self, bytes), fields(endpoint = %self.endpoint, len = bytes.len()))]
    async fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<(), SinkError> {
        validate_logical_path(path)?;
        let url = self.object_url(path)?;

        let mut request = self
            .client
            .put(url.clone())
            .header(CONTENT_TYPE, content_type)
            .body(bytes.to_vec());
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|source| SinkError::Network {
            url: url.to_string(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Rejected {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        debug!(url = %url, status = status.as_u16(), "uploaded blob");
        Ok(())
    }
}
