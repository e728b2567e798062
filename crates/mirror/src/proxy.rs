//! Outbound proxy settings for registry and CDN requests.

use std::fmt;
use std::str::FromStr;

use reqwest::Proxy;

use crate::MirrorError;

/// Which upstream requests are routed through the proxy
#[derive(Debug, Clone, PartialEq, Eq, Copy, Default)]
pub enum ProxyType {
    /// Plain `http://` requests only
    Http,
    /// `https://` requests only
    Https,
    /// Everything over SOCKS5, with hostnames resolved by the proxy
    Socks5,
    #[default]
    All,
}

impl FromStr for ProxyType {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(ProxyType::Http),
            "https" => Ok(ProxyType::Https),
            "socks5" | "socks" => Ok(ProxyType::Socks5),
            "all" => Ok(ProxyType::All),
            other => Err(MirrorError::ProxyError(format!(
                "unknown proxy type '{other}' (expected http, https, socks5 or all)"
            ))),
        }
    }
}

#[derive(Clone)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

// Keeps the password out of logged configs
impl fmt::Debug for ProxyAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyAuth")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// An explicitly configured proxy; takes precedence over the system proxy
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// e.g. `http://proxy.internal:3128` or `socks5h://127.0.0.1:1080`
    pub url: String,
    pub proxy_type: ProxyType,
    pub auth: Option<ProxyAuth>,
}

impl ProxyConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            proxy_type: ProxyType::default(),
            auth: None,
        }
    }

    pub fn with_type(mut self, proxy_type: ProxyType) -> Self {
        self.proxy_type = proxy_type;
        self
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some(ProxyAuth {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Proxy URL as handed to reqwest. Bare SOCKS addresses get the
    /// `socks5h://` scheme so crate hostnames resolve on the proxy side.
    fn target_url(&self) -> String {
        let url = self.url.trim();
        match self.proxy_type {
            ProxyType::Socks5 if !url.contains("://") => format!("socks5h://{url}"),
            _ => url.to_string(),
        }
    }

    /// Build the reqwest proxy for the upstream client
    pub fn to_reqwest(&self) -> Result<Proxy, MirrorError> {
        let url = self.target_url();
        let proxy = match self.proxy_type {
            ProxyType::Http => Proxy::http(&url),
            ProxyType::Https => Proxy::https(&url),
            ProxyType::Socks5 | ProxyType::All => Proxy::all(&url),
        }
        .map_err(|e| MirrorError::ProxyError(format!("{url}: {e}")))?;

        Ok(match &self.auth {
            Some(auth) => proxy.basic_auth(&auth.username, &auth.password),
            None => proxy,
        })
    }
}
