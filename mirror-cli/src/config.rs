use std::time::Duration;

use crates_mirror_engine::{MirrorConfig, ProxyConfig, ProxyType};
use tracing::{info, warn};

use crate::cli::CliArgs;
use crate::error::AppError;

/// Translate command-line arguments into the engine configuration
pub fn mirror_config(args: &CliArgs) -> Result<MirrorConfig, AppError> {
    if args.registry.trim().is_empty() {
        return Err(AppError::InvalidInput(
            "registry URL must not be empty".to_string(),
        ));
    }

    let mut builder = MirrorConfig::builder()
        .with_cache_root(&args.cache_dir)
        .with_registry_url(args.registry.trim_end_matches('/'))
        .with_timeout(Duration::from_secs(args.timeout))
        .with_connect_timeout(Duration::from_secs(args.connect_timeout))
        .with_read_timeout(Duration::from_secs(args.read_timeout))
        .with_channel_capacity(args.channel_size)
        .with_client_stall_timeout(Duration::from_secs(args.client_stall_timeout));

    for raw in &args.headers {
        let Some((name, value)) = split_header(raw) else {
            warn!("Invalid header format: '{}'. Expected 'Name: Value'", raw);
            continue;
        };
        info!("Adding upstream header: {}", name);
        builder = builder.with_header(name, value);
    }

    if let Some(proxy_url) = args.proxy.as_ref() {
        let proxy_type: ProxyType = args.proxy_type.parse()?;
        let mut proxy = ProxyConfig::new(proxy_url.clone()).with_type(proxy_type);
        match (&args.proxy_user, &args.proxy_pass) {
            (Some(username), Some(password)) => proxy = proxy.with_auth(username, password),
            (None, None) => {}
            _ => {
                return Err(AppError::InvalidInput(
                    "--proxy-user and --proxy-pass must be given together".to_string(),
                ));
            }
        }
        info!(
            proxy_url = %proxy_url,
            proxy_type = ?proxy_type,
            has_auth = proxy.auth.is_some(),
            "Using explicit proxy for upstream requests"
        );
        builder = builder.with_proxy(proxy);
    } else if args.no_system_proxy {
        info!("System proxy settings disabled");
        builder = builder.with_system_proxy(false);
    }

    Ok(builder.build())
}

/// Split `Name: Value` at the first colon
fn split_header(raw: &str) -> Option<(&str, &str)> {
    let (name, value) = raw.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name, value.trim()))
}
