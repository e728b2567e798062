use reqwest::Client;
use rustls::{ClientConfig, crypto::ring};
use rustls_platform_verifier::BuilderVerifierExt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::{MirrorConfig, MirrorError};

/// Create the reqwest Client used for registry and CDN requests.
///
/// Redirects are never followed automatically: the registry's redirect is
/// interpreted by the upstream fetcher itself.
pub fn create_client(config: &MirrorConfig) -> Result<Client, MirrorError> {
    let provider = Arc::new(ring::default_provider());

    let tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| MirrorError::Tls(e.to_string()))?
        .with_platform_verifier()
        .map_err(|e| MirrorError::Tls(e.to_string()))?
        .with_no_client_auth();

    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(8)
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .use_preconfigured_tls(tls_config)
        .redirect(reqwest::redirect::Policy::none());

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if !config.read_timeout.is_zero() {
        client_builder = client_builder.read_timeout(config.read_timeout);
    }

    if let Some(proxy_config) = &config.proxy {
        let proxy = proxy_config.to_reqwest()?;
        client_builder = client_builder.proxy(proxy);
        info!(proxy_url = %proxy_config.url, "Using explicitly configured proxy for upstream");
    } else if config.use_system_proxy {
        // reqwest picks up HTTP_PROXY / HTTPS_PROXY unless no_proxy() is called
        debug!("Using system proxy settings for upstream");
    } else {
        client_builder = client_builder.no_proxy();
        debug!("Proxy disabled for upstream");
    }

    client_builder.build().map_err(MirrorError::from)
}
