//! Application configuration management

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host (for generating URLs)
    pub host: Option<String>,

    /// Server port
    pub port: u16,

    /// Default number of indexers searched in parallel
    pub search_concurrency: usize,

    /// Per-indexer search deadline
    pub search_timeout: Duration,

    /// Release cache time-to-live
    pub release_cache_ttl: Duration,

    /// Release cache capacity (entries)
    pub release_cache_capacity: usize,

    /// Newznab/Torznab indexer endpoints, parsed from FETCHARR_INDEXERS
    pub indexers: Vec<NewznabEndpoint>,

    /// NNTP providers, parsed from FETCHARR_NNTP_SERVERS
    pub nntp_providers: Vec<NntpProviderConfig>,

    /// Treat yEnc CRC mismatches as decode failures instead of warnings
    pub yenc_strict_crc: bool,

    /// Abort a direct live-TV stream when no bytes arrive for this long
    pub stream_data_timeout: Duration,

    /// Segment prefetch window for sequential usenet streaming
    pub usenet_prefetch_segments: usize,
}

/// A configured Newznab/Torznab indexer endpoint
#[derive(Debug, Clone)]
pub struct NewznabEndpoint {
    pub name: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub priority: i32,
}

/// A configured NNTP provider
#[derive(Debug, Clone)]
pub struct NntpProviderConfig {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub max_connections: usize,
    pub priority: i32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let port = env::var("PORT")
            .unwrap_or_else(|_| "8686".to_string())
            .parse::<u16>()
            .context("PORT must be a valid port number")?;

        let search_concurrency = env::var("SEARCH_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);

        let search_timeout_ms: u64 = env::var("SEARCH_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30_000);

        let release_cache_ttl_secs: u64 = env::var("RELEASE_CACHE_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300);

        let release_cache_capacity = env::var("RELEASE_CACHE_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(500);

        let indexers = env::var("FETCHARR_INDEXERS")
            .ok()
            .map(|v| parse_indexer_list(&v))
            .transpose()?
            .unwrap_or_default();

        let nntp_providers = env::var("FETCHARR_NNTP_SERVERS")
            .ok()
            .map(|v| parse_nntp_list(&v))
            .transpose()?
            .unwrap_or_default();

        let yenc_strict_crc = env::var("YENC_STRICT_CRC")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let stream_data_timeout_ms: u64 = env::var("STREAM_DATA_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10_000);

        let usenet_prefetch_segments = env::var("USENET_PREFETCH_SEGMENTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(4);

        Ok(Self {
            host: env::var("HOST").ok(),
            port,
            search_concurrency,
            search_timeout: Duration::from_millis(search_timeout_ms),
            release_cache_ttl: Duration::from_secs(release_cache_ttl_secs),
            release_cache_capacity,
            indexers,
            nntp_providers,
            yenc_strict_crc,
            stream_data_timeout: Duration::from_millis(stream_data_timeout_ms),
            usenet_prefetch_segments,
        })
    }
}

/// Parse `name=url[|apikey[|priority]]` entries separated by `;`
fn parse_indexer_list(raw: &str) -> Result<Vec<NewznabEndpoint>> {
    let mut endpoints = Vec::new();

    for entry in raw.split(';').filter(|e| !e.trim().is_empty()) {
        let (name, rest) = entry
            .split_once('=')
            .with_context(|| format!("indexer entry missing '=': {entry}"))?;

        let mut parts = rest.split('|');
        let base_url = parts
            .next()
            .filter(|u| !u.is_empty())
            .with_context(|| format!("indexer entry missing URL: {entry}"))?;
        let api_key = parts.next().filter(|k| !k.is_empty()).map(str::to_string);
        let priority = parts.next().and_then(|p| p.parse().ok()).unwrap_or(25);

        endpoints.push(NewznabEndpoint {
            name: name.trim().to_string(),
            base_url: base_url.trim().to_string(),
            api_key,
            priority,
        });
    }

    Ok(endpoints)
}

/// Parse `host:port[:tls][:user:pass[:max_conn[:priority]]]` entries separated by `;`
fn parse_nntp_list(raw: &str) -> Result<Vec<NntpProviderConfig>> {
    let mut providers = Vec::new();

    for entry in raw.split(';').filter(|e| !e.trim().is_empty()) {
        let parts: Vec<&str> = entry.trim().split(':').collect();
        if parts.len() < 2 {
            anyhow::bail!("NNTP entry must be at least host:port: {entry}");
        }

        let host = parts[0].to_string();
        let port: u16 = parts[1]
            .parse()
            .with_context(|| format!("invalid NNTP port in: {entry}"))?;
        let use_tls = parts
            .get(2)
            .map(|v| *v == "tls" || *v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(port == 563);
        let username = parts.get(3).filter(|v| !v.is_empty()).map(|v| v.to_string());
        let password = parts.get(4).filter(|v| !v.is_empty()).map(|v| v.to_string());
        let max_connections = parts.get(5).and_then(|v| v.parse().ok()).unwrap_or(4);
        let priority = parts.get(6).and_then(|v| v.parse().ok()).unwrap_or(25);

        providers.push(NntpProviderConfig {
            host,
            port,
            use_tls,
            username,
            password,
            max_connections,
            priority,
        });
    }

    Ok(providers)
}
