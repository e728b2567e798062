use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::proxy::ProxyConfig;

pub const DEFAULT_CACHE_ROOT: &str = "/tmp/crates";
pub const DEFAULT_REGISTRY_URL: &str = "https://crates.io";
const DEFAULT_USER_AGENT: &str = concat!("crates-mirror/", env!("CARGO_PKG_VERSION"));

/// Process-wide mirror configuration, built once at startup
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Directory holding cache entries
    pub cache_root: PathBuf,

    /// Base URL of the upstream registry
    pub registry_url: String,

    /// Overall timeout for each upstream request, including the body (zero disables)
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Read timeout (maximum time between receiving data chunks)
    pub read_timeout: Duration,

    /// User agent string sent upstream
    pub user_agent: String,

    /// Extra HTTP headers for upstream requests
    pub headers: HeaderMap,

    /// Proxy configuration (optional)
    pub proxy: Option<ProxyConfig>,

    /// Whether to use system proxy settings if available
    pub use_system_proxy: bool,

    /// Chunks buffered between the cache writer and a slow client
    pub channel_capacity: usize,

    /// How long the cache writer waits on a client with a full buffer before
    /// dropping it and filling the cache alone
    pub client_stall_timeout: Duration,

    /// Read buffer size used when serving cached entries
    pub read_buffer_size: usize,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from(DEFAULT_CACHE_ROOT),
            registry_url: DEFAULT_REGISTRY_URL.to_owned(),
            timeout: Duration::ZERO,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: MirrorConfig::get_default_headers(),
            proxy: None,
            use_system_proxy: true,
            channel_capacity: 16,
            client_stall_timeout: Duration::from_secs(30),
            read_buffer_size: 64 * 1024,
        }
    }
}

impl MirrorConfig {
    pub fn builder() -> crate::builder::MirrorConfigBuilder {
        crate::builder::MirrorConfigBuilder::new()
    }

    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        // Tarballs are relayed byte for byte, never transparently decoded
        default_headers.insert(
            reqwest::header::ACCEPT_ENCODING,
            HeaderValue::from_static("identity"),
        );

        default_headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));
        default_headers
    }
}
