//! Descriptor resolution
//!
//! Turns a candidate's locator into a [`TorrentDescriptor`]:
//! - `magnet:?` URIs are parsed in place (metadata arrives later from peers)
//! - `http(s)` URLs are fetched and decoded as metainfo
//! - anything else is read from the local filesystem as metainfo

pub mod bencode;

use crate::models::{FileInfo, Locator, TorrentDescriptor, TorrentInfo};
use bencode::{DecodeError, Value};
use std::path::PathBuf;
use thiserror::Error;

/// Each SHA-1 piece hash in `pieces` is 20 bytes
const PIECE_HASH_LEN: usize = 20;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Magnet link has no btih info hash: {0}")]
    MissingInfoHash(String),
    #[error("Failed to fetch torrent: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("Torrent download returned HTTP {0}")]
    Status(u16),
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid torrent file: {0}")]
    Decode(#[from] DecodeError),
    #[error("Invalid torrent file: {0}")]
    Metainfo(String),
}

/// Resolves locators, fetching remote metainfo over HTTP
#[derive(Clone)]
pub struct Resolver {
    client: reqwest::Client,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Resolve a locator. Has no timeout of its own.
    pub async fn resolve(&self, locator: &Locator) -> Result<TorrentDescriptor, ResolveError> {
        match locator {
            Locator::Magnet(uri) => parse_magnet(uri),
            Locator::Remote(target) if is_http(target) => {
                tracing::debug!(url = %target, "fetching remote torrent");
                let resp = self.client.get(target).send().await?;
                if !resp.status().is_success() {
                    return Err(ResolveError::Status(resp.status().as_u16()));
                }
                let body = resp.bytes().await?;
                parse_metainfo(&body)
            }
            Locator::Remote(target) => {
                let path = PathBuf::from(target);
                let data = tokio::fs::read(&path)
                    .await
                    .map_err(|source| ResolveError::Read { path, source })?;
                parse_metainfo(&data)
            }
        }
    }
}

fn is_http(target: &str) -> bool {
    target.starts_with("http://") || target.starts_with("https://")
}

/// Parse a magnet URI into a descriptor without metadata
pub fn parse_magnet(uri: &str) -> Result<TorrentDescriptor, ResolveError> {
    let query = uri
        .strip_prefix("magnet:?")
        .ok_or_else(|| ResolveError::MissingInfoHash(uri.to_string()))?;

    let mut info_hash = None;
    let mut name = None;
    let mut trackers = Vec::new();

    for pair in query.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let value = urlencoding::decode(&value.replace('+', " "))
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| value.to_string());
        match key {
            "xt" => {
                if let Some(hash) = value.strip_prefix("urn:btih:") {
                    info_hash = Some(hash.to_lowercase());
                }
            }
            "dn" => name = Some(value),
            "tr" => trackers.push(value),
            _ => {}
        }
    }

    let info_hash = info_hash.ok_or_else(|| ResolveError::MissingInfoHash(uri.to_string()))?;
    Ok(TorrentDescriptor {
        name: name.unwrap_or_else(|| info_hash.clone()),
        info_hash: Some(info_hash),
        trackers,
        info: None,
        metainfo: None,
    })
}

/// Decode `.torrent` metainfo
pub fn parse_metainfo(data: &[u8]) -> Result<TorrentDescriptor, ResolveError> {
    let root = bencode::decode(data)?;
    let info = root
        .get("info")
        .ok_or_else(|| ResolveError::Metainfo("missing info dictionary".into()))?;

    let name = info
        .get("name")
        .and_then(Value::as_text)
        .ok_or_else(|| ResolveError::Metainfo("missing name".into()))?;
    let piece_length = info
        .get("piece length")
        .and_then(Value::as_int)
        .filter(|n| *n > 0)
        .ok_or_else(|| ResolveError::Metainfo("missing piece length".into()))?
        as u64;
    let pieces = info
        .get("pieces")
        .and_then(Value::as_bytes)
        .ok_or_else(|| ResolveError::Metainfo("missing pieces".into()))?;
    if pieces.len() % PIECE_HASH_LEN != 0 {
        return Err(ResolveError::Metainfo("pieces length is not a multiple of 20".into()));
    }

    let files = match (info.get("length"), info.get("files")) {
        (Some(length), None) => {
            let length = non_negative(length, "length")?;
            vec![FileInfo::new(name.clone(), length)]
        }
        (None, Some(list)) => {
            let entries = list
                .as_list()
                .ok_or_else(|| ResolveError::Metainfo("files is not a list".into()))?;
            entries
                .iter()
                .map(|entry| {
                    let length = entry
                        .get("length")
                        .ok_or_else(|| ResolveError::Metainfo("file without length".into()))
                        .and_then(|l| non_negative(l, "length"))?;
                    let segments: Vec<String> = entry
                        .get("path")
                        .and_then(Value::as_list)
                        .ok_or_else(|| ResolveError::Metainfo("file without path".into()))?
                        .iter()
                        .filter_map(Value::as_text)
                        .collect();
                    if segments.is_empty() {
                        return Err(ResolveError::Metainfo("empty file path".into()));
                    }
                    Ok(FileInfo::new(format!("{}/{}", name, segments.join("/")), length))
                })
                .collect::<Result<Vec<_>, _>>()?
        }
        _ => {
            return Err(ResolveError::Metainfo(
                "exactly one of length or files is required".into(),
            ))
        }
    };

    let mut trackers = Vec::new();
    if let Some(announce) = root.get("announce").and_then(Value::as_text) {
        trackers.push(announce);
    }
    if let Some(tiers) = root.get("announce-list").and_then(Value::as_list) {
        for url in tiers
            .iter()
            .filter_map(Value::as_list)
            .flatten()
            .filter_map(Value::as_text)
        {
            if !trackers.contains(&url) {
                trackers.push(url);
            }
        }
    }

    Ok(TorrentDescriptor {
        info_hash: None,
        name,
        trackers,
        info: Some(TorrentInfo {
            piece_length,
            piece_count: (pieces.len() / PIECE_HASH_LEN) as u32,
            files,
        }),
        metainfo: Some(data.to_vec()),
    })
}

fn non_negative(value: &Value, field: &str) -> Result<u64, ResolveError> {
    value
        .as_int()
        .filter(|n| *n >= 0)
        .map(|n| n as u64)
        .ok_or_else(|| ResolveError::Metainfo(format!("invalid {field}")))
}
