use log::{debug, warn};
use std::net::IpAddr;
use warp::http::Uri;

use crate::configuration::PublicAccessConfig;
use crate::error_handling::types::AccessError;
use crate::public_access::types::{ExposureMode, PublicEndpoint};

/// Last-resort host for direct URLs.
pub const FALLBACK_HOST: &str = "localhost";

/// Turns an allocated host port into the URL handed to the learner.
#[derive(Debug, Clone)]
pub struct PublicAccessResolver {
    config: PublicAccessConfig,
    mode: ExposureMode,
}

impl PublicAccessResolver {
    pub fn new(config: PublicAccessConfig) -> Self {
        let mode = match ExposureMode::parse(&config.mode) {
            Some(mode) => mode,
            None => {
                warn!(
                    "Unknown public access mode '{}', falling back to direct",
                    config.mode
                );
                ExposureMode::Direct
            }
        };
        Self { config, mode }
    }

    pub fn mode(&self) -> ExposureMode {
        self.mode
    }

    /// Builds the public endpoint of `instance_id` listening on `host_port`.
    ///
    /// `request_host` is the `Host` header of the request that triggered the
    /// call, if any; it is only consulted in direct mode.
    pub fn resolve(
        &self,
        instance_id: &str,
        host_port: u16,
        request_host: Option<&str>,
    ) -> Result<PublicEndpoint, AccessError> {
        let allowed = self.config.allowed_range();
        if !allowed.contains(host_port) {
            return Err(AccessError::PortOutOfRange {
                port: host_port,
                start: allowed.start,
                end: allowed.end,
            });
        }

        let endpoint = match self.mode {
            ExposureMode::Direct => {
                let host = self.direct_host(request_host);
                PublicEndpoint {
                    access_url: format!(
                        "{}://{}:{}",
                        self.config.scheme,
                        bracket_ipv6(&host),
                        host_port
                    ),
                    host_port,
                    public_host: host,
                    mode: ExposureMode::Direct,
                }
            }
            ExposureMode::Proxy => self.proxy_endpoint(instance_id, host_port)?,
        };
        debug!("Instance {} reachable at {}", instance_id, endpoint.access_url);
        Ok(endpoint)
    }

    /// Configured host, then the request's host, then the platform's own
    /// host, then [`FALLBACK_HOST`].
    fn direct_host(&self, request_host: Option<&str>) -> String {
        if let Some(host) = self
            .config
            .host
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
        {
            return host.to_string();
        }

        if let Some(host) = request_host
            .map(strip_port)
            .filter(|h| !is_placeholder_host(h))
        {
            return host;
        }

        if let Some(host) = self
            .config
            .app_base_url
            .as_deref()
            .and_then(uri_host)
            .filter(|h| !h.is_empty())
        {
            return host;
        }

        FALLBACK_HOST.to_string()
    }

    fn proxy_endpoint(&self, instance_id: &str, host_port: u16) -> Result<PublicEndpoint, AccessError> {
        let base = self.config.base_url.trim().trim_end_matches('/');
        if base.is_empty() {
            return Err(AccessError::MissingBaseUrl);
        }
        let public_host = uri_host(base).ok_or_else(|| AccessError::InvalidBaseUrl(base.to_string()))?;

        let prefix = self.config.proxy_prefix.trim_matches('/');
        let access_url = if prefix.is_empty() {
            format!("{}/{}/", base, instance_id)
        } else {
            format!("{}/{}/{}/", base, prefix, instance_id)
        };
        Ok(PublicEndpoint {
            access_url,
            host_port,
            public_host,
            mode: ExposureMode::Proxy,
        })
    }
}

/// Host of an absolute URL; `None` when there is no scheme or host.
fn uri_host(raw: &str) -> Option<String> {
    let uri: Uri = raw.trim().parse().ok()?;
    uri.scheme()?;
    uri.host()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_ascii_lowercase())
}

/// Drops the port from a `Host` header value, keeping bare IPv6 literals whole.
fn strip_port(raw: &str) -> String {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix('[') {
        return rest
            .split(']')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
    }
    if raw.matches(':').count() == 1 {
        return raw
            .split(':')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
    }
    raw.to_ascii_lowercase()
}

/// Hosts a remote learner cannot reach.
fn is_placeholder_host(host: &str) -> bool {
    if host.is_empty() || host == "localhost" || host == "host.docker.internal" {
        return true;
    }
    match host.parse::<IpAddr>() {
        Ok(ip) => ip.is_loopback() || ip.is_unspecified(),
        Err(_) => false,
    }
}

fn bracket_ipv6(host: &str) -> String {
    if host.contains(':') {
        format!("[{}]", host)
    } else {
        host.to_string()
    }
}
