//! PirateBay index client
//!
//! Talks to the apibay JSON API. Search results carry an info hash from
//! which a magnet link is built; the API answers an empty search with a
//! single placeholder row whose id is `"0"`.

use super::{fetch_json, lenient_u64, ProviderError, SearchProvider};
use crate::models::{AcquisitionCandidate, Locator};
use async_trait::async_trait;
use serde::Deserialize;

const PROVIDER: &str = "PirateBay";

/// Trackers appended to every generated magnet link
const TRACKERS: &[&str] = &[
    "udp://tracker.opentrackr.org:1337/announce",
    "udp://open.stealth.si:80/announce",
    "udp://tracker.torrent.eu.org:451/announce",
    "udp://exodus.desync.com:6969/announce",
    "udp://tracker.openbittorrent.com:6969/announce",
];

/// One row from `q.php` or a precompiled top list
#[derive(Debug, Deserialize)]
struct ApiTorrent {
    #[serde(default, deserialize_with = "lenient_u64")]
    id: Option<u64>,
    name: String,
    info_hash: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    seeders: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    leechers: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    size: Option<u64>,
}

impl ApiTorrent {
    fn is_placeholder(&self) -> bool {
        self.id == Some(0) || self.info_hash.trim_start_matches('0').is_empty()
    }

    fn into_candidate(self) -> AcquisitionCandidate {
        let locator = magnet_link(&self.info_hash, &self.name);
        let mut candidate = AcquisitionCandidate::new(
            self.name,
            clamp(self.seeders),
            Some(Locator::Magnet(locator)),
        );
        candidate.leechers = Some(clamp(self.leechers));
        candidate.size = self.size;
        candidate
    }
}

fn clamp(value: Option<u64>) -> u32 {
    value.unwrap_or(0).min(u32::MAX as u64) as u32
}

/// Magnet URI for `info_hash` named `name`, carrying the default trackers
pub fn magnet_link(info_hash: &str, name: &str) -> String {
    let mut uri = format!(
        "magnet:?xt=urn:btih:{}&dn={}",
        info_hash.to_lowercase(),
        urlencoding::encode(name)
    );
    for tracker in TRACKERS {
        uri.push_str("&tr=");
        uri.push_str(&urlencoding::encode(tracker));
    }
    uri
}

/// PirateBay API client
pub struct PirateBayClient {
    base_url: String,
    client: reqwest::Client,
}

impl PirateBayClient {
    pub fn new() -> Self {
        Self::with_base_url("https://apibay.org")
    }

    /// Create a client with a custom base URL (for testing)
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<AcquisitionCandidate>, ProviderError> {
        let rows: Vec<ApiTorrent> = fetch_json(&self.client, PROVIDER, url).await?;
        let mut candidates: Vec<AcquisitionCandidate> = rows
            .into_iter()
            .filter(|row| !row.is_placeholder())
            .map(ApiTorrent::into_candidate)
            .collect();
        candidates.sort_by(|a, b| b.seeders.cmp(&a.seeders));
        Ok(candidates)
    }
}

impl Default for PirateBayClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for PirateBayClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn search(&self, term: &str) -> Result<Vec<AcquisitionCandidate>, ProviderError> {
        let url = format!(
            "{}/q.php?q={}&cat=0",
            self.base_url,
            urlencoding::encode(term)
        );
        self.fetch(&url).await
    }

    /// Top 100 in the video category
    async fn top(&self) -> Result<Vec<AcquisitionCandidate>, ProviderError> {
        let url = format!("{}/precompiled/data_top100_200.json", self.base_url);
        self.fetch(&url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magnet_link() {
        let link = magnet_link("ABCDEF", "Big Buck Bunny");
        assert!(link.starts_with("magnet:?xt=urn:btih:abcdef&dn=Big%20Buck%20Bunny&tr="));
        assert_eq!(link.matches("&tr=").count(), TRACKERS.len());
    }

    #[test]
    fn test_placeholder_row() {
        let row: ApiTorrent = serde_json::from_str(
            r#"{"id":"0","name":"No results returned","info_hash":"0000000000000000000000000000000000000000","seeders":"0","leechers":"0","size":"0"}"#,
        )
        .unwrap();
        assert!(row.is_placeholder());
    }

    #[test]
    fn test_numeric_fields_from_top_list() {
        let row: ApiTorrent = serde_json::from_str(
            r#"{"id":42,"name":"Sintel","info_hash":"AB12","seeders":10,"leechers":2,"size":1024}"#,
        )
        .unwrap();
        let c = row.into_candidate();
        assert_eq!(c.seeders, 10);
        assert_eq!(c.leechers, Some(2));
        assert_eq!(c.size, Some(1024));
        assert!(c.locator.unwrap().is_magnet());
    }
}
