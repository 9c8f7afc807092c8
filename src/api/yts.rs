//! YTS movie client
//!
//! Each movie lists several torrents, one per quality. Every variant becomes
//! its own candidate whose locator is the remote `.torrent` URL.

use super::{fetch_json, ProviderError, SearchProvider};
use crate::models::{AcquisitionCandidate, Locator};
use async_trait::async_trait;
use serde::Deserialize;

const PROVIDER: &str = "YTS";

/// Movies requested per search
const SEARCH_LIMIT: u32 = 10;
/// Movies requested for browse mode, and their minimum rating
const TOP_LIMIT: u32 = 12;
const TOP_MIN_RATING: u32 = 5;

#[derive(Debug, Deserialize)]
struct ListResponse {
    data: ListData,
}

#[derive(Debug, Deserialize)]
struct ListData {
    /// Absent when nothing matched
    #[serde(default)]
    movies: Vec<Movie>,
}

#[derive(Debug, Deserialize)]
struct Movie {
    title: String,
    #[serde(default)]
    title_long: Option<String>,
    #[serde(default)]
    year: Option<u16>,
    #[serde(default)]
    rating: Option<f32>,
    #[serde(default)]
    torrents: Vec<MovieTorrent>,
}

#[derive(Debug, Deserialize)]
struct MovieTorrent {
    url: String,
    quality: String,
    #[serde(default)]
    seeds: u32,
    #[serde(default)]
    size_bytes: Option<u64>,
}

impl Movie {
    fn into_candidates(self) -> impl Iterator<Item = AcquisitionCandidate> {
        let title = self.title_long.unwrap_or(self.title);
        let (year, rating) = (self.year, self.rating);
        self.torrents.into_iter().map(move |t| {
            let mut c = AcquisitionCandidate::new(
                format!("{} {}", title, t.quality),
                t.seeds,
                Some(Locator::Remote(t.url)),
            );
            c.size = t.size_bytes;
            c.quality = Some(t.quality);
            c.year = year;
            c.rating = rating;
            c
        })
    }
}

/// YTS API client
pub struct YtsClient {
    base_url: String,
    client: reqwest::Client,
}

impl YtsClient {
    pub fn new() -> Self {
        Self::with_base_url("https://yts.mx")
    }

    /// Create a client with a custom base URL (for testing)
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn list(&self, query: &str) -> Result<Vec<AcquisitionCandidate>, ProviderError> {
        let url = format!("{}/api/v2/list_movies.json?{}", self.base_url, query);
        let response: ListResponse = fetch_json(&self.client, PROVIDER, &url).await?;
        Ok(response
            .data
            .movies
            .into_iter()
            .flat_map(Movie::into_candidates)
            .collect())
    }
}

impl Default for YtsClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for YtsClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn search(&self, term: &str) -> Result<Vec<AcquisitionCandidate>, ProviderError> {
        self.list(&format!(
            "query_term={}&sort_by=seeds&order_by=desc&limit={}",
            urlencoding::encode(term),
            SEARCH_LIMIT
        ))
        .await
    }

    async fn top(&self) -> Result<Vec<AcquisitionCandidate>, ProviderError> {
        self.list(&format!(
            "sort_by=seeds&order_by=desc&minimum_rating={}&limit={}",
            TOP_MIN_RATING, TOP_LIMIT
        ))
        .await
    }
}
