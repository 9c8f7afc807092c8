//! OpenSubtitles title search
//!
//! Uses the REST search endpoint, which needs no login: only a user agent
//! header. Each hit carries a gzip download link.

use crate::models::SubtitleAsset;
use serde::Deserialize;
use thiserror::Error;

/// Any failure on the subtitle path. Always recovered into "no subtitle".
#[derive(Debug, Error)]
pub enum SubtitleError {
    #[error("Subtitle request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Subtitle service returned HTTP {0}")]
    Status(u16),
    #[error("Failed to parse subtitle search results: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Failed to write subtitle: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to decompress subtitle: {0}")]
    Decompress(std::io::Error),
}

const USER_AGENT: &str = "TemporaryUserAgent";

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "IDSubtitleFile")]
    id: String,
    #[serde(rename = "SubDownloadLink")]
    download_link: String,
    #[serde(rename = "SubLanguageID", default)]
    language: String,
    #[serde(rename = "SubFileName", default)]
    file_name: Option<String>,
}

impl From<SearchHit> for SubtitleAsset {
    fn from(hit: SearchHit) -> Self {
        SubtitleAsset {
            id: hit.id,
            download_url: hit.download_link,
            language: hit.language,
            file_name: hit.file_name,
        }
    }
}

/// OpenSubtitles REST client
pub struct OpenSubtitlesClient {
    base_url: String,
    client: reqwest::Client,
}

impl OpenSubtitlesClient {
    pub fn new() -> Self {
        Self::with_base_url("https://rest.opensubtitles.org")
    }

    /// Create a client with a custom base URL (for testing)
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Subtitles in `language` (3-letter code) whose release matches `title`.
    /// No hits is an empty list, not an error.
    pub async fn search(
        &self,
        title: &str,
        language: &str,
    ) -> Result<Vec<SubtitleAsset>, SubtitleError> {
        let url = format!(
            "{}/search/query-{}/sublanguageid-{}",
            self.base_url,
            urlencoding::encode(&title.to_lowercase()),
            urlencoding::encode(language)
        );
        let response = self
            .client
            .get(&url)
            .header("X-User-Agent", USER_AGENT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SubtitleError::Status(response.status().as_u16()));
        }

        let text = response.text().await?;
        let hits: Vec<SearchHit> = serde_json::from_str(&text)?;
        Ok(hits
            .into_iter()
            .filter(|hit| !hit.download_link.is_empty())
            .map(SubtitleAsset::from)
            .collect())
    }
}

impl Default for OpenSubtitlesClient {
    fn default() -> Self {
        Self::new()
    }
}
