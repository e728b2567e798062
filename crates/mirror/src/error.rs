use reqwest::StatusCode;

// Error type for mirror operations
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid crate key: {0}")]
    InvalidKey(String),

    #[error("Invalid URL: {0}")]
    UrlError(String),

    #[error("Registry returned an unusable redirect: {0}")]
    InvalidRedirect(String),

    #[error("Invalid proxy configuration: {0}")]
    ProxyError(String),

    #[error("TLS configuration error: {0}")]
    Tls(String),

    /// Failure observed by another request fetching the same key.
    #[error("Upstream fetch failed: {message}")]
    Upstream { message: String, timed_out: bool },
}

impl MirrorError {
    /// Whether the failure was caused by an upstream timeout
    pub fn is_timeout(&self) -> bool {
        match self {
            MirrorError::Http(e) => e.is_timeout(),
            MirrorError::Upstream { timed_out, .. } => *timed_out,
            _ => false,
        }
    }

    /// HTTP status a server should answer with for this failure
    pub fn status_code(&self) -> StatusCode {
        match self {
            MirrorError::InvalidKey(_) => StatusCode::BAD_REQUEST,
            _ if self.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            MirrorError::Http(_) | MirrorError::InvalidRedirect(_) | MirrorError::Upstream { .. } => {
                StatusCode::BAD_GATEWAY
            }
            MirrorError::Io(_)
            | MirrorError::UrlError(_)
            | MirrorError::ProxyError(_)
            | MirrorError::Tls(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
