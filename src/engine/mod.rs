//! Engine boundary
//!
//! The swarm engine is consumed as a black box: a file list, piece
//! selection controls, byte streams that wait for data, counters and a
//! one-shot event channel.

pub mod blocklist;
pub mod memory;
pub mod rqbit;

use crate::models::{FileInfo, PeerSnapshot, SwarmCounters, TorrentDescriptor};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

pub use blocklist::{Blocklist, IpRange};
pub use memory::{MemoryBackend, MemoryEngine};
pub use rqbit::{RqbitBackend, RqbitEngine};

/// Capacity of the engine event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Chunked file bytes. Dropping the stream cancels the read.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

// =============================================================================
// Events
// =============================================================================

/// Notifications emitted by a running engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Metadata is available and files can be listed
    Ready,
    /// A downloaded piece passed verification
    Verify(u32),
    /// A downloaded piece failed verification
    InvalidPiece(u32),
    /// One peer connection was substituted for another
    Hotswap,
    /// The engine wants pieces again
    Interested,
    /// Every selected piece is present
    Uninterested,
    /// A new peer wire was opened
    Wire(String),
    /// The engine gave up before becoming ready
    Failed(String),
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to start engine: {0}")]
    Start(String),
    #[error("No file at index {0}")]
    UnknownFile(usize),
    #[error("Range {start}-{end} is outside a file of {length} bytes")]
    RangeOutOfBounds { start: u64, end: u64, length: u64 },
    #[error("Invalid peer address: {0}")]
    InvalidPeer(String),
    #[error("Peer {0} is blocklisted")]
    Blocked(String),
    #[error("Not supported by this engine: {0}")]
    Unsupported(&'static str),
    #[error("Torrent engine error: {0}")]
    Backend(String),
    #[error("Engine is shut down")]
    Closed,
    #[error("Engine I/O error: {0}")]
    Io(#[from] io::Error),
}

// =============================================================================
// Options
// =============================================================================

/// Inclusive byte span within one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// The whole of a file of `length` bytes. None for empty files.
    pub fn full(length: u64) -> Option<Self> {
        length.checked_sub(1).map(|end| Self { start: 0, end })
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    pub(crate) fn check(&self, length: u64) -> Result<(), EngineError> {
        if self.start > self.end || self.end >= length {
            return Err(EngineError::RangeOutOfBounds {
                start: self.start,
                end: self.end,
                length,
            });
        }
        Ok(())
    }
}

/// Parameters every backend receives at start
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub connections: usize,
    pub peer_port: Option<u16>,
    /// Buffer directory for downloaded data
    pub path: PathBuf,
    pub blocklist: Blocklist,
    /// File the blocklist was read from, for engines that load it themselves
    pub blocklist_path: Option<PathBuf>,
    /// Peers to connect to once started
    pub peers: Vec<String>,
    /// Find peers through the DHT
    pub dht: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            connections: default_connections(),
            peer_port: None,
            path: std::env::temp_dir().join("macflix"),
            blocklist: Blocklist::default(),
            blocklist_path: None,
            peers: Vec::new(),
            dht: true,
        }
    }
}

/// 100 connections on multi-core machines, 30 otherwise
pub fn default_connections() -> usize {
    match std::thread::available_parallelism() {
        Ok(n) if n.get() > 1 => 100,
        _ => 30,
    }
}

// =============================================================================
// Traits
// =============================================================================

/// A running swarm download
#[async_trait]
pub trait Engine: Send + Sync {
    /// Files in torrent order. Empty until metadata is known.
    fn files(&self) -> Vec<FileInfo>;

    fn piece_count(&self) -> Option<u32>;

    /// Buffer directory
    fn path(&self) -> &Path;

    fn select(&self, index: usize) -> Result<(), EngineError>;

    fn deselect(&self, index: usize) -> Result<(), EngineError>;

    fn is_selected(&self, index: usize) -> bool;

    /// Stream `range` of file `index`, waiting for bytes that are not
    /// downloaded yet
    fn stream(&self, index: usize, range: ByteRange) -> Result<ByteStream, EngineError>;

    fn counters(&self) -> SwarmCounters;

    fn peers(&self) -> Vec<PeerSnapshot>;

    fn connect(&self, peer: &str) -> Result<(), EngineError>;

    /// Stop requesting pieces from the swarm
    fn pause_swarm(&self);

    fn resume_swarm(&self);

    async fn shutdown(&self) -> Result<(), EngineError>;
}

/// Factory that starts an engine for a resolved descriptor
#[async_trait]
pub trait EngineBackend: Send + Sync {
    async fn start(
        &self,
        descriptor: &TorrentDescriptor,
        options: &EngineOptions,
    ) -> Result<(Arc<dyn Engine>, mpsc::Receiver<EngineEvent>), EngineError>;
}

/// Validate an `ip:port` peer string
pub fn parse_peer(peer: &str) -> Result<std::net::SocketAddr, EngineError> {
    peer.parse()
        .map_err(|_| EngineError::InvalidPeer(peer.to_string()))
}
