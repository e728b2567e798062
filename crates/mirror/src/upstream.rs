//! # Upstream Fetcher
//!
//! Issues the request chain against the registry: the canonical download
//! endpoint first, then the location it redirects to. Redirects are followed
//! here rather than by the HTTP client so that a 403 from the registry can be
//! told apart from a failure at the redirect target.

use std::fmt;

use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::{Client, StatusCode, Url};
use tracing::{debug, info, instrument, warn};

use crate::client::create_client;
use crate::key::CacheKey;
use crate::stream::{ByteStream, response_stream};
use crate::{MirrorConfig, MirrorError};

/// A live upstream body that has not been read yet
pub struct UpstreamBody {
    pub stream: ByteStream,
    /// Expected size, when the upstream announced one
    pub content_length: Option<u64>,
}

impl UpstreamBody {
    pub fn new(stream: ByteStream, content_length: Option<u64>) -> Self {
        Self {
            stream,
            content_length,
        }
    }

    fn from_response(response: reqwest::Response) -> Self {
        let content_length = response.content_length();
        Self::new(response_stream(response), content_length)
    }
}

impl fmt::Debug for UpstreamBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamBody")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// What the registry had to say about a key
#[derive(Debug)]
pub enum FetchOutcome {
    /// The registry refused the download (HTTP 403)
    Forbidden,
    /// The tarball is available as a live stream
    Found(UpstreamBody),
    /// The download location answered with something other than 200
    Unavailable(StatusCode),
}

/// Source of tarballs on a cache miss
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Resolve `key` to a tarball stream. Transport failures are errors;
    /// registry answers are outcomes.
    async fn fetch(&self, key: &CacheKey) -> Result<FetchOutcome, MirrorError>;
}

/// [`Upstream`] backed by a crates.io-compatible registry
pub struct RegistryUpstream {
    client: Client,
    base: Url,
}

impl RegistryUpstream {
    pub fn new(config: &MirrorConfig) -> Result<Self, MirrorError> {
        let client = create_client(config)?;
        Self::with_client(client, &config.registry_url)
    }

    pub fn with_client(client: Client, registry_url: &str) -> Result<Self, MirrorError> {
        let base = registry_url
            .parse::<Url>()
            .map_err(|e| MirrorError::UrlError(format!("{registry_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(MirrorError::UrlError(format!(
                "{registry_url}: not a base URL"
            )));
        }
        Ok(Self { client, base })
    }

    /// `<registry>/api/v1/crates/{name}/{version}/download`
    pub fn download_url(&self, key: &CacheKey) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend([
                "api",
                "v1",
                "crates",
                key.name(),
                key.version(),
                "download",
            ]);
        }
        url
    }
}

#[async_trait]
impl Upstream for RegistryUpstream {
    #[instrument(skip(self, key), fields(key = %key), level = "debug")]
    async fn fetch(&self, key: &CacheKey) -> Result<FetchOutcome, MirrorError> {
        let url = self.download_url(key);
        debug!(url = %url, "Requesting download from registry");

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();

        if status == StatusCode::FORBIDDEN {
            info!(url = %url, "Registry refused download");
            return Ok(FetchOutcome::Forbidden);
        }

        let location = match response.headers().get(LOCATION) {
            Some(value) => Some(value.to_str().map(str::to_owned).map_err(|_| {
                MirrorError::InvalidRedirect(format!("non-ASCII Location from {url}"))
            })?),
            None => None,
        };

        let target = match location {
            Some(location) => url
                .join(&location)
                .map_err(|e| MirrorError::InvalidRedirect(format!("{location}: {e}")))?,
            None if status == StatusCode::OK => {
                // Registry served the file itself without a CDN hop
                debug!(url = %url, "Registry answered without redirect");
                return Ok(FetchOutcome::Found(UpstreamBody::from_response(response)));
            }
            None => {
                warn!(url = %url, status = %status, "Registry answered without a download location");
                return Ok(FetchOutcome::Unavailable(status));
            }
        };
        drop(response);

        debug!(target = %target, "Following registry redirect");
        let response = self.client.get(target.clone()).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            warn!(target = %target, status = %status, "Download location did not serve the tarball");
            return Ok(FetchOutcome::Unavailable(status));
        }

        info!(
            target = %target,
            size = ?response.content_length(),
            "Streaming tarball from upstream"
        );
        Ok(FetchOutcome::Found(UpstreamBody::from_response(response)))
    }
}
