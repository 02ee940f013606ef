//! Remote image download with SSRF protection
//!
//! Every hop (the original URL and each redirect target) is validated the
//! same way: http/https only, host resolved up front, every resolved address
//! must be public, and the request is pinned to the validated address so a
//! second DNS answer cannot redirect the connection. Redirects are followed
//! manually for that reason.

use imgedit_common::EngineConfig;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::Url;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};

const USER_AGENT: &str = concat!("imgedit-engine/", env!("CARGO_PKG_VERSION"));

/// Cloud metadata endpoint (AWS/GCP/Azure)
const METADATA_IP: Ipv4Addr = Ipv4Addr::new(169, 254, 169, 254);

/// Downloaded image bytes
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    /// URL after redirects
    pub final_url: String,
    pub content_type: String,
}

/// Downloads images from http(s) URLs
#[derive(Debug, Clone)]
pub struct UrlFetcher {
    connect_timeout: Duration,
    read_timeout: Duration,
    max_redirects: usize,
    allow_loopback: bool,
}

impl UrlFetcher {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
            max_redirects: config.max_redirects,
            allow_loopback: false,
        }
    }

    #[cfg(test)]
    fn allow_loopback(mut self) -> Self {
        self.allow_loopback = true;
        self
    }

    /// Download `url`, aborting once more than `max_bytes` have been received
    pub async fn fetch(&self, url: &str, max_bytes: u64) -> EngineResult<FetchedImage> {
        let mut current = self.validate_hop(url)?;

        for hop in 0..=self.max_redirects {
            let addr = self.resolve_target(&current).await?;
            let client = self.client_for(&current, addr)?;

            debug!(url = %current, addr = %addr, hop, "Requesting image");

            let mut response = tokio::time::timeout(self.read_timeout, client.get(current.clone()).send())
                .await
                .map_err(|_| {
                    EngineError::Validation(format!("Timed out waiting for {}", host_of(&current)))
                })?
                .map_err(|e| {
                    EngineError::Validation(format!(
                        "Failed to fetch {}: {}",
                        host_of(&current),
                        without_url(e)
                    ))
                })?;

            let status = response.status();
            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        EngineError::Validation(format!("HTTP {} without a Location header", status))
                    })?;
                let next = current.join(location).map_err(|e| {
                    EngineError::Validation(format!("Invalid redirect target '{}': {}", location, e))
                })?;
                current = self.validate_hop(next.as_str())?;
                continue;
            }

            if !status.is_success() {
                return Err(EngineError::Validation(format!(
                    "{} returned HTTP {}",
                    host_of(&current),
                    status
                )));
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_ascii_lowercase())
                .unwrap_or_default();
            if !content_type.starts_with("image/") {
                return Err(EngineError::Validation(format!(
                    "URL did not return an image (Content-Type '{}')",
                    content_type
                )));
            }

            if let Some(declared) = response.content_length() {
                if declared > max_bytes {
                    return Err(EngineError::Validation(format!(
                        "Image size {} bytes exceeds limit of {} bytes",
                        declared, max_bytes
                    )));
                }
            }

            let mut bytes = Vec::new();
            loop {
                let chunk = tokio::time::timeout(self.read_timeout, response.chunk())
                    .await
                    .map_err(|_| {
                        EngineError::Validation(format!(
                            "Download stalled for more than {} ms",
                            self.read_timeout.as_millis()
                        ))
                    })?
                    .map_err(|e| {
                        EngineError::Validation(format!("Download failed: {}", without_url(e)))
                    })?;

                let Some(chunk) = chunk else { break };
                if bytes.len() as u64 + chunk.len() as u64 > max_bytes {
                    warn!(url = %current, max_bytes, "Aborting download: size limit exceeded");
                    return Err(EngineError::Validation(format!(
                        "Image exceeds limit of {} bytes",
                        max_bytes
                    )));
                }
                bytes.extend_from_slice(&chunk);
            }

            info!(url = %current, bytes = bytes.len(), "Downloaded image");

            return Ok(FetchedImage {
                bytes,
                final_url: current.to_string(),
                content_type,
            });
        }

        Err(EngineError::Validation(format!(
            "Too many redirects (max {})",
            self.max_redirects
        )))
    }

    fn validate_hop(&self, url: &str) -> EngineResult<Url> {
        if self.allow_loopback {
            return parse_http_url(url);
        }
        validate_url(url)
    }

    /// Resolve the host once and check every address it maps to
    async fn resolve_target(&self, url: &Url) -> EngineResult<SocketAddr> {
        let host = bare_host(url)?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| EngineError::Validation("URL has no port".to_string()))?;

        let addrs: Vec<SocketAddr> = match host.parse::<IpAddr>() {
            Ok(ip) => vec![SocketAddr::new(ip, port)],
            Err(_) => tokio::net::lookup_host((host.as_str(), port))
                .await
                .map_err(|e| {
                    EngineError::Validation(format!("DNS resolution failed for '{}': {}", host, e))
                })?
                .collect(),
        };

        let first = *addrs.first().ok_or_else(|| {
            EngineError::Validation(format!("DNS resolution returned no addresses for '{}'", host))
        })?;

        for addr in &addrs {
            let blocked = is_blocked_ip(&addr.ip());
            if blocked && !(self.allow_loopback && addr.ip().is_loopback()) {
                warn!(host = %host, resolved_ip = %addr.ip(), "Blocked request to non-public address");
                return Err(EngineError::Validation(format!(
                    "Host '{}' resolves to non-public address {}",
                    host,
                    addr.ip()
                )));
            }
        }

        Ok(first)
    }

    fn client_for(&self, url: &Url, addr: SocketAddr) -> EngineResult<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(self.connect_timeout)
            .redirect(reqwest::redirect::Policy::none());

        let host = bare_host(url)?;
        if host.parse::<IpAddr>().is_err() {
            builder = builder.resolve(&host, addr);
        }

        builder
            .build()
            .map_err(|e| EngineError::Internal(format!("Failed to build HTTP client: {}", e)))
    }
}

/// Check scheme and literal host of a URL before any network access
pub fn validate_url(url: &str) -> EngineResult<Url> {
    let parsed = parse_http_url(url)?;

    let host = bare_host(&parsed)?;
    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_blocked_ip(&ip) {
            warn!(ip = %ip, "Blocked request to non-public IP literal");
            return Err(EngineError::Validation(format!(
                "Requests to non-public address {} are not allowed",
                ip
            )));
        }
    }

    Ok(parsed)
}

fn parse_http_url(url: &str) -> EngineResult<Url> {
    let parsed =
        Url::parse(url).map_err(|e| EngineError::Validation(format!("Invalid URL: {}", e)))?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(EngineError::Validation(format!(
            "URL scheme '{}' is not allowed; only http and https are supported",
            scheme
        ))),
    }
}

/// True for loopback, private, link-local, unspecified, unique-local and
/// metadata addresses, including IPv4 addresses embedded in IPv6
pub fn is_blocked_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_v4(v4),
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_blocked_v4(&v4);
            }
            is_blocked_v6(v6)
        }
    }
}

fn is_blocked_v4(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    *ip == METADATA_IP
        || ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_multicast()
        || ip.is_documentation()
        || octets[0] == 0
        // 100.64.0.0/10 carrier-grade NAT
        || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
}

fn is_blocked_v6(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
}

/// Host without IPv6 brackets
fn bare_host(url: &Url) -> EngineResult<String> {
    let host = url
        .host_str()
        .ok_or_else(|| EngineError::Validation("URL has no host".to_string()))?;
    Ok(host.trim_start_matches('[').trim_end_matches(']').to_string())
}

fn host_of(url: &Url) -> String {
    url.host_str().unwrap_or("host").to_string()
}

/// reqwest errors repeat the full URL (query strings included); drop it from messages
fn without_url(err: reqwest::Error) -> String {
    err.without_url().to_string()
}
