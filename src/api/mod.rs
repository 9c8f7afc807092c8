//! Clients for external index and subtitle services
//!
//! - PirateBay: JSON index API, search and top video listing
//! - YTS: movie API, one candidate per quality variant
//! - OpenSubtitles: title search returning compressed subtitle links

pub mod opensubtitles;
pub mod piratebay;
pub mod yts;

pub use opensubtitles::{OpenSubtitlesClient, SubtitleError};
pub use piratebay::PirateBayClient;
pub use yts::YtsClient;

use crate::models::AcquisitionCandidate;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use std::str::FromStr;
use thiserror::Error;

/// Rows offered to the user at most
pub const MAX_CANDIDATES: usize = 25;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Request to {provider} failed: {source}")]
    Http {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{provider} returned HTTP {status}")]
    Status { provider: &'static str, status: u16 },
    #[error("Failed to parse {provider} response: {source}")]
    Decode {
        provider: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Unknown source '{0}'. Use pirate-bay or yts")]
    UnknownSource(String),
}

/// Index provider selected with `--source`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Source {
    #[default]
    PirateBay,
    Yts,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::PirateBay => "pirate-bay",
            Source::Yts => "yts",
        }
    }

    /// Boxed client for this source against its public endpoint
    pub fn provider(&self) -> Box<dyn SearchProvider> {
        match self {
            Source::PirateBay => Box::new(PirateBayClient::new()),
            Source::Yts => Box::new(YtsClient::new()),
        }
    }
}

impl FromStr for Source {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pirate-bay" | "piratebay" | "tpb" => Ok(Source::PirateBay),
            "yts" | "yify" => Ok(Source::Yts),
            other => Err(ProviderError::UnknownSource(other.to_string())),
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A searchable torrent index
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Candidates matching `term`, best first
    async fn search(&self, term: &str) -> Result<Vec<AcquisitionCandidate>, ProviderError>;

    /// Top or trending listing used by browse mode
    async fn top(&self) -> Result<Vec<AcquisitionCandidate>, ProviderError>;
}

/// Keep candidates with a usable locator, at most `cap` of them
pub fn listing(candidates: Vec<AcquisitionCandidate>, cap: usize) -> Vec<AcquisitionCandidate> {
    candidates
        .into_iter()
        .filter(AcquisitionCandidate::is_usable)
        .take(cap)
        .collect()
}

/// GET `url` and decode the JSON body, the way every provider here does it
pub(crate) async fn fetch_json<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    provider: &'static str,
    url: &str,
) -> Result<T, ProviderError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|source| ProviderError::Http { provider, source })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ProviderError::Status {
            provider,
            status: status.as_u16(),
        });
    }

    let text = response
        .text()
        .await
        .map_err(|source| ProviderError::Http { provider, source })?;
    serde_json::from_str(&text).map_err(|source| ProviderError::Decode { provider, source })
}

/// Accepts `"12"`, `12` or null. Index APIs are inconsistent about it.
pub(crate) fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Locator;

    #[test]
    fn test_source_aliases() {
        assert_eq!("pirate-bay".parse::<Source>().unwrap(), Source::PirateBay);
        assert_eq!("yts".parse::<Source>().unwrap(), Source::Yts);
        assert_eq!("YIFY".parse::<Source>().unwrap(), Source::Yts);
        assert!(matches!(
            "kickass".parse::<Source>(),
            Err(ProviderError::UnknownSource(_))
        ));
    }

    #[test]
    fn test_listing_filters_and_caps() {
        let mut all = vec![AcquisitionCandidate::new("no locator", 100, None)];
        for i in 0..30 {
            all.push(AcquisitionCandidate::new(
                format!("t{i}"),
                i,
                Some(Locator::parse("magnet:?xt=urn:btih:abc")),
            ));
        }
        let rows = listing(all, MAX_CANDIDATES);
        assert_eq!(rows.len(), 25);
        assert_eq!(rows[0].name, "t0");
    }

    #[test]
    fn test_lenient_numbers() {
        #[derive(Deserialize)]
        struct Row {
            #[serde(default, deserialize_with = "lenient_u64")]
            n: Option<u64>,
        }
        let parse = |s: &str| serde_json::from_str::<Row>(s).unwrap().n;
        assert_eq!(parse(r#"{"n":"12"}"#), Some(12));
        assert_eq!(parse(r#"{"n":12}"#), Some(12));
        assert_eq!(parse(r#"{"n":null}"#), None);
        assert_eq!(parse(r#"{}"#), None);
    }
}
