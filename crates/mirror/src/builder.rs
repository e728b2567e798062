//! # Builder for MirrorConfig
//!
//! Fluent construction of the configuration handed to the orchestrator.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use crates_mirror_engine::MirrorConfig;
//! use crates_mirror_engine::proxy::ProxyConfig;
//!
//! let config = MirrorConfig::builder()
//!     .with_cache_root("/srv/crates")
//!     .with_registry_url("https://crates.io")
//!     .with_connect_timeout(Duration::from_secs(5))
//!     .with_header("X-Mirror", "eu-1")
//!     .build();
//!
//! let behind_proxy = MirrorConfig::builder()
//!     .with_proxy(ProxyConfig::new("http://proxy.example.com:8080"))
//!     .build();
//! assert!(!behind_proxy.use_system_proxy);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::{MirrorConfig, proxy::ProxyConfig};

/// Builder for creating MirrorConfig instances with a fluent API
#[derive(Debug, Clone)]
pub struct MirrorConfigBuilder {
    config: MirrorConfig,
}

impl MirrorConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: MirrorConfig::default(),
        }
    }

    /// Set the directory holding cache entries
    pub fn with_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.cache_root = root.into();
        self
    }

    /// Set the base URL of the upstream registry
    pub fn with_registry_url(mut self, url: impl Into<String>) -> Self {
        self.config.registry_url = url.into();
        self
    }

    /// Set the overall timeout for each upstream request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the read timeout between body chunks
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Add a custom HTTP header; invalid names or values are ignored
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.as_ref().parse::<reqwest::header::HeaderName>(),
            HeaderValue::from_str(value.as_ref()),
        ) {
            self.config.headers.insert(name, value);
        }
        self
    }

    /// Set all HTTP headers, replacing any existing headers
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.config.headers = headers;
        self
    }

    /// Set the proxy configuration
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.config.proxy = Some(proxy);
        self.config.use_system_proxy = false; // Explicit proxy overrides system proxy
        self
    }

    /// Set whether to use system proxy settings if available
    pub fn with_system_proxy(mut self, use_system_proxy: bool) -> Self {
        if self.config.proxy.is_none() {
            self.config.use_system_proxy = use_system_proxy;
        }
        self
    }

    /// Set how many chunks may queue up for a slow client; at least one
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity.max(1);
        self
    }

    /// Set how long a client may leave its buffer full before it is dropped
    pub fn with_client_stall_timeout(mut self, timeout: Duration) -> Self {
        self.config.client_stall_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size.max(4 * 1024);
        self
    }

    /// Build the MirrorConfig instance
    pub fn build(self) -> MirrorConfig {
        self.config
    }
}

impl Default for MirrorConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
