//! SSRF-safe URL validation and fetching
//!
//! Every URL resolved from third-party portal responses (and every redirect
//! target) is DNS-resolved and checked against loopback/private/link-local
//! ranges before any bytes are fetched. Redirects are followed manually with
//! a hop cap and a visited set so a redirect loop cannot spin forever.

use std::collections::HashSet;
use std::net::IpAddr;

use reqwest::header::{HeaderMap, LOCATION};
use reqwest::{Client, Response};
use tracing::{debug, warn};
use url::Url;

use crate::error::StreamError;

/// Maximum redirect hops followed before giving up
const MAX_REDIRECTS: usize = 5;

/// Blocked internal hostnames (case-insensitive)
const BLOCKED_HOSTNAMES: &[&str] = &["localhost", "metadata.google.internal"];

/// Blocked hostname suffixes (case-insensitive)
const BLOCKED_HOSTNAME_SUFFIXES: &[&str] = &[".internal", ".local"];

/// Check if an IP address is in a private/reserved range that should be blocked.
fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()           // 127.0.0.0/8
            || v4.is_private()         // 10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16
            || v4.is_link_local()      // 169.254.0.0/16
            || v4.is_unspecified()     // 0.0.0.0
            || v4.is_broadcast()       // 255.255.255.255
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()           // ::1
            || v6.is_unspecified()     // ::
            // fc00::/7 (unique local addresses)
            || (v6.segments()[0] & 0xfe00) == 0xfc00
            // fe80::/10 (link local)
            || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

/// Syntax-level checks: scheme, hostname block-list, literal IPs.
/// Offline; the DNS-resolving check runs before every actual fetch.
pub fn validate_url_shape(url: &Url) -> Result<(), StreamError> {
    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(StreamError::SsrfBlocked(format!(
                "unsupported URL scheme: {scheme}"
            )));
        }
    }

    let host = url
        .host_str()
        .ok_or_else(|| StreamError::SsrfBlocked("URL has no host".to_string()))?;
    let host_lower = host.to_lowercase();

    for blocked in BLOCKED_HOSTNAMES {
        if host_lower == *blocked {
            return Err(StreamError::SsrfBlocked(format!(
                "blocked internal hostname: {host}"
            )));
        }
    }
    for suffix in BLOCKED_HOSTNAME_SUFFIXES {
        if host_lower.ends_with(suffix) {
            return Err(StreamError::SsrfBlocked(format!(
                "blocked internal hostname: {host}"
            )));
        }
    }

    if let Some(ip) = literal_ip(&host_lower) {
        if is_blocked_ip(ip) {
            return Err(StreamError::SsrfBlocked(format!(
                "blocked private/reserved IP: {host}"
            )));
        }
    }

    Ok(())
}

/// Parse a host string as a literal IP, handling bracket-wrapped IPv6.
fn literal_ip(host: &str) -> Option<IpAddr> {
    if let Some(inner) = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        return inner.parse().ok();
    }
    host.parse().ok()
}

/// Validate a URL before fetching it: shape checks plus DNS resolution of
/// every address the hostname maps to.
pub async fn validate_url(url: &Url) -> Result<(), StreamError> {
    validate_url_shape(url)?;

    let host = url
        .host_str()
        .ok_or_else(|| StreamError::SsrfBlocked("URL has no host".to_string()))?;

    // Literal IPs were already checked; only hostnames need resolution.
    if literal_ip(host).is_some() {
        return Ok(());
    }

    let port = url.port_or_known_default().unwrap_or(80);
    let addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| StreamError::Upstream(format!("DNS lookup failed for {host}: {e}")))?;

    for addr in addrs {
        if is_blocked_ip(addr.ip()) {
            warn!(host = %host, ip = %addr.ip(), "URL resolves to blocked address");
            return Err(StreamError::SsrfBlocked(format!(
                "{host} resolves to blocked address {}",
                addr.ip()
            )));
        }
    }

    Ok(())
}

/// Fetch a URL with SSRF validation applied to it and to every redirect
/// target. The client must be built with redirects disabled; hops are
/// followed here so each target can be validated first.
pub async fn fetch_validated(
    client: &Client,
    url: Url,
    headers: &HeaderMap,
) -> Result<Response, StreamError> {
    let mut current = url;
    let mut visited: HashSet<String> = HashSet::new();

    for hop in 0..=MAX_REDIRECTS {
        validate_url(&current).await?;

        if !visited.insert(current.to_string()) {
            return Err(StreamError::Upstream(format!(
                "redirect loop detected at {current}"
            )));
        }

        let response = client
            .get(current.clone())
            .headers(headers.clone())
            .send()
            .await
            .map_err(|e| StreamError::Upstream(format!("fetch {current} failed: {e}")))?;

        if !response.status().is_redirection() {
            return Ok(response);
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                StreamError::Upstream(format!(
                    "redirect from {current} carried no Location header"
                ))
            })?;

        let next = current
            .join(location)
            .map_err(|e| StreamError::Upstream(format!("invalid redirect target: {e}")))?;

        debug!(from = %current, to = %next, hop = hop, status = %response.status(), "Following redirect");
        current = next;
    }

    Err(StreamError::Upstream(format!(
        "more than {MAX_REDIRECTS} redirects from original URL"
    )))
}
