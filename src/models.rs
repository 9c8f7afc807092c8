//! Data structures shared across macflix
//!
//! Organized by the stage that produces them:
//! - **Search**: candidates returned by index providers
//! - **Subtitles**: assets returned by the subtitle provider
//! - **Torrent**: resolved descriptors and per-file metadata
//! - **Swarm**: counters and immutable telemetry snapshots
//! - **Playback**: pause bookkeeping owned by the session controller

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

// =============================================================================
// Search Models
// =============================================================================

/// Where a candidate's torrent metadata can be obtained from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Locator {
    /// A `magnet:?` URI
    Magnet(String),
    /// A `.torrent` file reachable over http(s) or on the local filesystem
    Remote(String),
}

impl Locator {
    /// Classify a raw locator string
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.starts_with("magnet:") {
            Locator::Magnet(raw.to_string())
        } else {
            Locator::Remote(raw.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Locator::Magnet(s) | Locator::Remote(s) => s,
        }
    }

    pub fn is_magnet(&self) -> bool {
        matches!(self, Locator::Magnet(_))
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row returned by a search provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionCandidate {
    pub name: String,
    pub seeders: u32,
    /// Not every provider reports leechers
    pub leechers: Option<u32>,
    pub size: Option<u64>,
    pub quality: Option<String>,
    pub year: Option<u16>,
    pub rating: Option<f32>,
    pub locator: Option<Locator>,
}

impl AcquisitionCandidate {
    /// Create a candidate with only the mandatory fields set
    pub fn new(name: impl Into<String>, seeders: u32, locator: Option<Locator>) -> Self {
        Self {
            name: name.into(),
            seeders,
            leechers: None,
            size: None,
            quality: None,
            year: None,
            rating: None,
            locator,
        }
    }

    /// Only candidates with a locator can be resolved into a session
    pub fn is_usable(&self) -> bool {
        self.locator
            .as_ref()
            .map(|l| !l.as_str().is_empty())
            .unwrap_or(false)
    }

    /// Title used for subtitle lookups
    pub fn title(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for AcquisitionCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let leechers = self
            .leechers
            .map(|l| l.to_string())
            .unwrap_or_else(|| "-".to_string());
        write!(f, "{} {}/{}", self.name, self.seeders, leechers)?;
        if let Some(size) = self.size {
            write!(f, " {}", format_bytes(size))?;
        }
        Ok(())
    }
}

// =============================================================================
// Subtitle Models
// =============================================================================

/// A subtitle the provider can deliver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleAsset {
    /// Provider-assigned file identifier
    pub id: String,
    /// Download locator (compressed payload)
    pub download_url: String,
    pub language: String,
    pub file_name: Option<String>,
}

// =============================================================================
// Torrent Models
// =============================================================================

/// Metadata for one file inside a torrent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Last path segment
    pub name: String,
    /// Path within the torrent, `/` separated
    pub path: String,
    pub length: u64,
}

impl FileInfo {
    pub fn new(path: impl Into<String>, length: u64) -> Self {
        let path = path.into();
        let name = path.rsplit('/').next().unwrap_or(&path).to_string();
        Self { name, path, length }
    }
}

/// Info dictionary contents, only known once metadata is available
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentInfo {
    pub piece_length: u64,
    pub piece_count: u32,
    pub files: Vec<FileInfo>,
}

/// Resolved torrent metadata handed to the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentDescriptor {
    /// Lowercase hex (or base32 as given by the magnet)
    pub info_hash: Option<String>,
    pub name: String,
    pub trackers: Vec<String>,
    pub info: Option<TorrentInfo>,
    /// Raw `.torrent` bytes when resolved from metainfo
    #[serde(skip)]
    pub metainfo: Option<Vec<u8>>,
}

impl TorrentDescriptor {
    /// Magnet URI carrying the hash, name and trackers
    pub fn magnet_uri(&self) -> Option<String> {
        let hash = self.info_hash.as_deref()?;
        let mut uri = format!("magnet:?xt=urn:btih:{}&dn={}", hash, urlencoding::encode(&self.name));
        for tracker in &self.trackers {
            uri.push_str("&tr=");
            uri.push_str(&urlencoding::encode(tracker));
        }
        Some(uri)
    }

    pub fn total_length(&self) -> Option<u64> {
        self.info
            .as_ref()
            .map(|info| info.files.iter().map(|f| f.length).sum())
    }

    pub fn has_metadata(&self) -> bool {
        self.info.is_some()
    }
}

/// Lifecycle of a torrent session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Starting,
    Ready,
    Streaming,
    Closing,
    Closed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Starting => write!(f, "starting"),
            EngineState::Ready => write!(f, "ready"),
            EngineState::Streaming => write!(f, "streaming"),
            EngineState::Closing => write!(f, "closing"),
            EngineState::Closed => write!(f, "closed"),
        }
    }
}

// =============================================================================
// Swarm Models
// =============================================================================

/// Raw counters read from the engine on every telemetry tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SwarmCounters {
    pub downloaded: u64,
    pub uploaded: u64,
    /// Bytes per second
    pub download_rate: f64,
    /// Bytes per second
    pub upload_rate: f64,
    pub peers_total: usize,
    /// Peers that are not choking us
    pub peers_active: usize,
    pub queue_depth: usize,
}

/// One connected peer as shown on the dashboard
#[derive(Debug, Clone, PartialEq)]
pub struct PeerSnapshot {
    pub address: String,
    pub downloaded: u64,
    pub download_rate: f64,
    pub choking: bool,
}

/// Point-in-time telemetry. Never mutated after it is published.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SwarmSnapshot {
    pub peers_total: usize,
    pub peers_active: usize,
    pub bytes_downloaded: u64,
    pub bytes_uploaded: u64,
    pub download_rate: f64,
    pub upload_rate: f64,
    pub queue_depth: usize,
    pub pieces_verified: u64,
    pub pieces_invalid: u64,
    pub hotswaps: u64,
    pub pieces_total: Option<u32>,
    pub percent_complete: u8,
    pub metadata_ready: bool,
    pub peers: Vec<PeerSnapshot>,
}

// =============================================================================
// Playback Models
// =============================================================================

/// Pause bookkeeping. Written only by the session controller.
#[derive(Debug, Clone, Default)]
pub struct PlaybackState {
    paused: bool,
    paused_at: Option<Instant>,
    accumulated_pause: Duration,
}

impl PlaybackState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn paused_at(&self) -> Option<Instant> {
        self.paused_at
    }

    /// Total of completed pause intervals
    pub fn accumulated_pause(&self) -> Duration {
        self.accumulated_pause
    }

    /// Enter the paused state. Returns false if already paused.
    pub fn pause(&mut self, now: Instant) -> bool {
        if self.paused {
            return false;
        }
        self.paused = true;
        self.paused_at = Some(now);
        true
    }

    /// Leave the paused state, folding the interval into the total.
    /// Returns false if not paused.
    pub fn resume(&mut self, now: Instant) -> bool {
        if !self.paused {
            return false;
        }
        if let Some(at) = self.paused_at.take() {
            self.accumulated_pause += now.saturating_duration_since(at);
        }
        self.paused = false;
        true
    }

    /// Completed pauses plus the one in progress, if any
    pub fn paused_for(&self, now: Instant) -> Duration {
        let current = match (self.paused, self.paused_at) {
            (true, Some(at)) => now.saturating_duration_since(at),
            _ => Duration::ZERO,
        };
        self.accumulated_pause + current
    }

    /// Wall-clock time since `started`, net of every pause
    pub fn elapsed(&self, started: Instant, now: Instant) -> Duration {
        now.saturating_duration_since(started)
            .saturating_sub(self.paused_for(now))
    }
}

// =============================================================================
// Formatting
// =============================================================================

/// Human readable byte count (`1.5 MB`)
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}
