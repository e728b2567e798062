use clap::Parser;
use std::path::PathBuf;

/// Define CLI arguments
#[derive(Parser, Debug)]
#[command(
    version,
    about = "Caching mirror for crate tarball downloads",
    long_about = "Serves GET /api/v1/crates/{name}/{version}/download.\n\
                  \n\
                  Tarballs already in the cache directory are served from disk. Anything else is\n\
                  fetched from the upstream registry, following its redirect to the download\n\
                  location, and written to the cache while it is streamed to the client."
)]
pub struct CliArgs {
    /// Directory holding cached tarballs
    #[arg(
        long = "cache-dir",
        env = "CRATES_DIR",
        default_value = "/tmp/crates",
        help = "Cache root; entries live at <cache-dir>/<name>/<name>@<version>"
    )]
    pub cache_dir: PathBuf,

    /// Listen port
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Listen address
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Upstream registry base URL
    #[arg(
        long = "registry",
        env = "CRATES_API",
        default_value = "https://crates.io",
        help = "Base URL of the upstream registry"
    )]
    pub registry: String,

    /// Number of runtime worker threads
    #[arg(
        short,
        long,
        env = "WORKERS",
        help = "Worker threads serving requests (default: number of CPUs)"
    )]
    pub workers: Option<usize>,

    /// Overall timeout in seconds
    #[arg(
        long,
        default_value = "0",
        help = "Overall timeout in seconds for each upstream request, body included (0 disables)"
    )]
    pub timeout: u64,

    /// Connection timeout in seconds
    #[arg(
        long,
        default_value = "10",
        help = "Connection timeout in seconds (time to establish initial connection)"
    )]
    pub connect_timeout: u64,

    /// Read timeout in seconds
    #[arg(
        long,
        default_value = "30",
        help = "Read timeout in seconds (maximum time between receiving data chunks)"
    )]
    pub read_timeout: u64,

    /// Extra upstream request headers
    #[arg(
        short = 'H',
        long = "header",
        help = "Add a header to upstream requests (format: 'Name: Value'). Repeatable"
    )]
    pub headers: Vec<String>,

    /// Proxy URL (e.g., "http://proxy.example.com:8080")
    #[arg(long, help = "Proxy server URL for upstream requests")]
    pub proxy: Option<String>,

    /// Proxy type
    #[arg(
        long,
        default_value = "all",
        help = "Which upstream requests use the proxy: http, https, socks5 or all"
    )]
    pub proxy_type: String,

    /// Proxy username
    #[arg(long, requires = "proxy", help = "Username for proxy authentication")]
    pub proxy_user: Option<String>,

    /// Proxy password
    #[arg(long, requires = "proxy", help = "Password for proxy authentication")]
    pub proxy_pass: Option<String>,

    /// Ignore HTTP_PROXY / HTTPS_PROXY
    #[arg(long, help = "Do not use system proxy settings for upstream requests")]
    pub no_system_proxy: bool,

    /// Chunks buffered for slow clients
    #[arg(long, default_value = "16", help = "Chunks buffered between the cache writer and a slow client")]
    pub channel_size: usize,

    /// Seconds a non-reading client may hold up a cache fill
    #[arg(
        long,
        default_value = "30",
        help = "Seconds a client may leave its buffer full before it is dropped and the cache fill continues without it"
    )]
    pub client_stall_timeout: u64,

    /// Also write logs to this file
    #[arg(long, help = "Append logs to this file in addition to stdout")]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable detailed debug logging")]
    pub verbose: bool,
}
