//! Newznab/Torznab indexer driver
//!
//! Newznab is the standard API for Usenet indexers (and Torznab its torrent
//! twin). This driver translates [SearchCriteria] into `t=search|tvsearch|
//! movie|music|book` query strings honoring the capability table, and
//! parses the RSS response (including `newznab:attr`/`torznab:attr`
//! extensions) into [ReleaseResult]s.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::Client;
use tracing::{debug, info, warn};

use super::capabilities::{IndexerCapabilities, SearchParam};
use super::driver::{DriverError, IndexerDriver};
use super::types::{DownloadProtocol, ReleaseResult, SearchCriteria, SearchType};
use crate::config::NewznabEndpoint;

/// Body markers that identify a Cloudflare challenge page
const CLOUDFLARE_MARKERS: &[&str] = &[
    "cf-browser-verification",
    "cf_chl_opt",
    "Checking your browser before accessing",
    "Attention Required! | Cloudflare",
];

/// Newznab indexer driver
pub struct NewznabDriver {
    id: String,
    name: String,
    base_url: String,
    api_key: Option<String>,
    client: Client,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    capabilities: IndexerCapabilities,
}

impl NewznabDriver {
    pub fn new(endpoint: &NewznabEndpoint) -> Result<Self, DriverError> {
        let client = Client::builder()
            .gzip(true)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DriverError::Http(e.to_string()))?;

        // Be conservative with indexers: 1 req/s, small burst
        let quota = Quota::per_second(NonZeroU32::new(1).unwrap_or(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(3).unwrap_or(NonZeroU32::MIN));

        info!(
            indexer_name = %endpoint.name,
            base_url = %endpoint.base_url,
            "Created Newznab driver"
        );

        Ok(Self {
            id: endpoint.name.to_lowercase().replace(' ', "-"),
            name: endpoint.name.clone(),
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            api_key: endpoint.api_key.clone(),
            client,
            limiter: Arc::new(RateLimiter::direct(quota)),
            capabilities: Self::default_capabilities(),
        })
    }

    /// Default capability set for a Newznab endpoint that has not answered
    /// `t=caps`
    fn default_capabilities() -> IndexerCapabilities {
        IndexerCapabilities {
            search_available: true,
            tv_search_available: true,
            movie_search_available: true,
            tv_search_params: vec![
                SearchParam::Q,
                SearchParam::Season,
                SearchParam::Ep,
                SearchParam::ImdbId,
                SearchParam::TvdbId,
            ],
            movie_search_params: vec![SearchParam::Q, SearchParam::ImdbId],
            supports_pagination: true,
            ..Default::default()
        }
    }

    /// Build the API URL with query parameters
    fn build_api_url(&self, params: &[(&str, String)]) -> String {
        let mut url = format!("{}/api", self.base_url);
        let mut sep = '?';

        if let Some(ref key) = self.api_key {
            url.push_str(&format!("{sep}apikey={key}"));
            sep = '&';
        }
        for (key, value) in params {
            url.push_str(&format!("{sep}{key}={}", urlencoding::encode(value)));
            sep = '&';
        }

        url
    }

    /// Translate criteria into Newznab query parameters
    fn build_params(&self, criteria: &SearchCriteria) -> Vec<(&'static str, String)> {
        let caps = &self.capabilities;
        let mut params: Vec<(&str, String)> = Vec::new();
        params.push(("t", criteria.search_type.to_string()));

        // Query text; indexers without season/ep params get the episode
        // token folded into q
        let mut q = criteria.query.clone().unwrap_or_default();
        if let Some(format) = criteria.preferred_episode_format {
            if !caps.has_param(criteria.search_type, SearchParam::Season) {
                if let Some(token) = criteria.episode_token(format) {
                    if !q.is_empty() {
                        q.push(' ');
                    }
                    q.push_str(&token);
                }
            }
        }
        if !q.is_empty() {
            params.push(("q", q));
        }

        if !criteria.categories.is_empty() {
            let cats: String = criteria
                .categories
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(",");
            params.push(("cat", cats));
        }

        if caps.has_param(criteria.search_type, SearchParam::Season) {
            if let Some(season) = criteria.season {
                params.push(("season", season.to_string()));
            }
        }
        if caps.has_param(criteria.search_type, SearchParam::Ep) {
            if let Some(ep) = criteria.episode {
                params.push(("ep", ep.to_string()));
            }
        }
        if caps.has_param(criteria.search_type, SearchParam::ImdbId) {
            if let Some(short) = criteria.imdb_id_short() {
                params.push(("imdbid", short));
            }
        }
        if caps.has_param(criteria.search_type, SearchParam::TvdbId) {
            if let Some(tvdb) = criteria.tvdb_id {
                params.push(("tvdbid", tvdb.to_string()));
            }
        }
        if caps.has_param(criteria.search_type, SearchParam::TmdbId) {
            if let Some(tmdb) = criteria.tmdb_id {
                params.push(("tmdbid", tmdb.to_string()));
            }
        }
        if caps.has_param(criteria.search_type, SearchParam::Year) {
            if let Some(year) = criteria.year {
                params.push(("year", year.to_string()));
            }
        }

        if let Some(limit) = criteria.limit {
            params.push(("limit", limit.to_string()));
        }

        params
    }

    fn classify_response(status: reqwest::StatusCode, body: &str) -> Result<(), DriverError> {
        if (status == reqwest::StatusCode::FORBIDDEN
            || status == reqwest::StatusCode::SERVICE_UNAVAILABLE)
            && CLOUDFLARE_MARKERS.iter().any(|m| body.contains(m))
        {
            return Err(DriverError::Cloudflare);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(DriverError::RateLimited { wait_ms: 10_000 });
        }
        if !status.is_success() {
            return Err(DriverError::Http(format!("HTTP {status}")));
        }
        if body.contains("<error") {
            let message = extract_error_description(body)
                .unwrap_or_else(|| "unknown API error".to_string());
            return Err(DriverError::Http(format!("API error: {message}")));
        }
        Ok(())
    }

    /// Parse a Newznab RSS response into releases
    fn parse_response(&self, xml: &str) -> Result<Vec<ReleaseResult>, DriverError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut releases = Vec::new();
        let mut current_item: Option<ItemBuilder> = None;
        let mut current_tag = String::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(ref e)) => {
                    let tag_name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    current_tag = tag_name.clone();
                    if tag_name == "item" {
                        current_item = Some(ItemBuilder::default());
                    } else if let Some(ref mut item) = current_item {
                        apply_element_attrs(item, &tag_name, e.attributes().flatten());
                    }
                }
                Ok(Event::Empty(ref e)) => {
                    let tag_name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    if let Some(ref mut item) = current_item {
                        apply_element_attrs(item, &tag_name, e.attributes().flatten());
                    }
                }
                Ok(Event::Text(ref e)) => {
                    if let Some(ref mut item) = current_item {
                        let text = e.unescape().unwrap_or_default().to_string();
                        if !text.is_empty() {
                            item.set_text(&current_tag, text);
                        }
                    }
                }
                Ok(Event::End(ref e)) => {
                    if e.name().as_ref() == b"item" {
                        if let Some(item) = current_item.take() {
                            if let Some(release) = item.build(&self.id, &self.name) {
                                releases.push(release);
                            }
                        }
                    }
                    current_tag.clear();
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(DriverError::Parse(format!("XML parse error: {e}")));
                }
                _ => {}
            }
        }

        Ok(releases)
    }
}

fn apply_element_attrs<'a>(
    item: &mut ItemBuilder,
    tag_name: &str,
    attrs: impl Iterator<Item = quick_xml::events::attributes::Attribute<'a>>,
) {
    match tag_name {
        "newznab:attr" | "torznab:attr" => {
            let mut name = String::new();
            let mut value = String::new();
            for attr in attrs {
                let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
                let val = attr
                    .unescape_value()
                    .map(|v| v.into_owned())
                    .unwrap_or_default();
                match key.as_str() {
                    "name" => name = val,
                    "value" => value = val,
                    _ => {}
                }
            }
            item.set_attr(&name, &value);
        }
        "enclosure" => {
            for attr in attrs {
                let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
                let val = attr
                    .unescape_value()
                    .map(|v| v.into_owned())
                    .unwrap_or_default();
                match key.as_str() {
                    "url" => item.download_url = Some(val),
                    "length" => {
                        if let Ok(size) = val.parse::<i64>() {
                            if item.size == 0 {
                                item.size = size;
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
}

/// Accumulates one `<item>` during parsing
#[derive(Default)]
struct ItemBuilder {
    title: Option<String>,
    guid: Option<String>,
    download_url: Option<String>,
    details_url: Option<String>,
    pub_date: Option<DateTime<Utc>>,
    size: i64,
    categories: Vec<i32>,
    seeders: Option<i32>,
    peers: Option<i32>,
    grabs: Option<i32>,
    info_hash: Option<String>,
    magnet_url: Option<String>,
}

impl ItemBuilder {
    fn set_text(&mut self, tag: &str, text: String) {
        match tag {
            "title" => self.title = Some(text),
            "guid" => {
                if self.guid.is_none() {
                    self.guid = Some(text);
                }
            }
            "link" => {
                if self.download_url.is_none() {
                    self.download_url = Some(text);
                }
            }
            "comments" => self.details_url = Some(text),
            "pubDate" => self.pub_date = parse_rfc822_date(&text),
            "category" => {
                if let Ok(id) = text.parse::<i32>() {
                    self.categories.push(id);
                }
            }
            _ => {}
        }
    }

    fn set_attr(&mut self, name: &str, value: &str) {
        match name {
            "size" => {
                if let Ok(size) = value.parse::<i64>() {
                    self.size = size;
                }
            }
            "seeders" => self.seeders = value.parse().ok(),
            "peers" => self.peers = value.parse().ok(),
            "grabs" => self.grabs = value.parse().ok(),
            "infohash" => self.info_hash = Some(value.to_string()),
            "magneturl" => self.magnet_url = Some(value.to_string()),
            "category" => {
                if let Ok(id) = value.parse::<i32>() {
                    if !self.categories.contains(&id) {
                        self.categories.push(id);
                    }
                }
            }
            _ => {}
        }
    }

    fn build(self, indexer_id: &str, indexer_name: &str) -> Option<ReleaseResult> {
        let title = self.title?;
        let guid = self.guid.unwrap_or_else(|| title.clone());

        let protocol = if self.info_hash.is_some() || self.magnet_url.is_some() || self.seeders.is_some() {
            DownloadProtocol::Torrent
        } else {
            DownloadProtocol::Usenet
        };

        Some(ReleaseResult {
            guid,
            indexer_id: indexer_id.to_string(),
            indexer_name: indexer_name.to_string(),
            title,
            size: self.size,
            publish_date: self.pub_date,
            seeders: self.seeders,
            leechers: match (self.peers, self.seeders) {
                (Some(p), Some(s)) => Some(p - s),
                _ => None,
            },
            grabs: self.grabs,
            categories: self.categories,
            download_url: self.download_url,
            details_url: self.details_url,
            info_hash: self.info_hash,
            magnet_url: self.magnet_url,
            protocol,
            source_indexers: vec![indexer_name.to_string()],
        })
    }
}

fn extract_error_description(body: &str) -> Option<String> {
    let start = body.find("description=\"")?;
    let rest = &body[start + 13..];
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

/// Parse RFC 822 date format (common in RSS feeds)
fn parse_rfc822_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    warn!(date_string = s, "Failed to parse date");
    None
}

#[async_trait]
impl IndexerDriver for NewznabDriver {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn capabilities(&self) -> &IndexerCapabilities {
        &self.capabilities
    }

    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<ReleaseResult>, DriverError> {
        self.limiter.until_ready().await;

        let params = self.build_params(criteria);
        let url = self.build_api_url(&params);

        debug!(indexer_name = %self.name, url = %url, "Searching Newznab indexer");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DriverError::Timeout
                } else {
                    DriverError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DriverError::Http(e.to_string()))?;

        Self::classify_response(status, &body)?;

        let releases = self.parse_response(&body)?;

        info!(
            indexer_name = %self.name,
            results = releases.len(),
            "Newznab search complete"
        );

        Ok(releases)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, DriverError> {
        self.limiter.until_ready().await;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DriverError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DriverError::Http(format!(
                "download failed: HTTP {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| DriverError::Http(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:newznab="http://www.newznab.com/DTD/2010/feeds/attributes/">
  <channel>
    <item>
      <title>My.Show.S01E05.1080p.WEB.h264-GROUP</title>
      <guid>https://indexer.example/details/abc123</guid>
      <link>https://indexer.example/getnzb/abc123</link>
      <comments>https://indexer.example/details/abc123</comments>
      <pubDate>Sat, 05 Jul 2025 10:00:00 +0000</pubDate>
      <category>5040</category>
      <enclosure url="https://indexer.example/getnzb/abc123.nzb" length="1073741824" type="application/x-nzb"/>
      <newznab:attr name="size" value="1073741824"/>
      <newznab:attr name="grabs" value="12"/>
    </item>
  </channel>
</rss>"#;

    fn driver() -> NewznabDriver {
        NewznabDriver::new(&NewznabEndpoint {
            name: "Test Indexer".to_string(),
            base_url: "https://indexer.example".to_string(),
            api_key: Some("key".to_string()),
            priority: 25,
        })
        .unwrap()
    }

    #[test]
    fn parses_rss_items() {
        let d = driver();
        let releases = d.parse_response(SAMPLE_RSS).unwrap();
        assert_eq!(releases.len(), 1);
        let r = &releases[0];
        assert_eq!(r.title, "My.Show.S01E05.1080p.WEB.h264-GROUP");
        assert_eq!(r.size, 1073741824);
        assert_eq!(r.grabs, Some(12));
        assert_eq!(r.categories, vec![5040]);
        assert_eq!(r.protocol, DownloadProtocol::Usenet);
        assert_eq!(r.indexer_id, "test-indexer");
    }

    #[test]
    fn builds_id_only_params() {
        let d = driver();
        let criteria = SearchCriteria {
            search_type: SearchType::Tv,
            imdb_id: Some("tt1234567".to_string()),
            tvdb_id: Some(123456),
            season: Some(1),
            episode: Some(5),
            ..Default::default()
        };
        let params = d.build_params(&criteria);
        let url = d.build_api_url(&params);
        assert!(url.contains("t=tvsearch"));
        assert!(url.contains("imdbid=1234567"));
        assert!(url.contains("tvdbid=123456"));
        assert!(url.contains("season=1"));
        assert!(!url.contains("q="));
    }

    #[test]
    fn folds_episode_token_when_season_param_missing() {
        let mut d = driver();
        d.capabilities.tv_search_params = vec![SearchParam::Q];
        let criteria = SearchCriteria {
            search_type: SearchType::Tv,
            query: Some("My Show".to_string()),
            season: Some(1),
            episode: Some(5),
            preferred_episode_format: Some(crate::indexer::SearchTextFormat::Standard),
            ..Default::default()
        };
        let params = d.build_params(&criteria);
        let q = params.iter().find(|(k, _)| *k == "q").unwrap().1.clone();
        assert_eq!(q, "My Show S01E05");
    }

    #[test]
    fn classifies_cloudflare_challenge() {
        let err = NewznabDriver::classify_response(
            reqwest::StatusCode::FORBIDDEN,
            "<html>Checking your browser before accessing indexer.example</html>",
        )
        .unwrap_err();
        assert!(matches!(err, DriverError::Cloudflare));
    }

    #[test]
    fn classifies_api_error() {
        let err = NewznabDriver::classify_response(
            reqwest::StatusCode::OK,
            r#"<error code="100" description="Incorrect user credentials"/>"#,
        )
        .unwrap_err();
        assert!(matches!(err, DriverError::Http(msg) if msg.contains("Incorrect user credentials")));
    }
}
