//! In-process engine
//!
//! File bytes live in memory and become readable as the caller advances
//! each file's availability watermark. Counters, peers and events are
//! driven by the caller too, which makes this backend suitable for
//! embedding and for tests.

use super::{
    parse_peer, ByteRange, ByteStream, Engine, EngineBackend, EngineError, EngineEvent,
    EngineOptions, EVENT_CHANNEL_CAPACITY,
};
use crate::models::{FileInfo, PeerSnapshot, SwarmCounters, TorrentDescriptor};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};

/// Largest chunk yielded by a file stream
const CHUNK_SIZE: u64 = 64 * 1024;

/// A file to serve from memory
#[derive(Debug, Clone)]
pub struct MemoryFile {
    pub path: String,
    pub data: Bytes,
}

impl MemoryFile {
    pub fn new(path: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            path: path.into(),
            data: data.into(),
        }
    }

    /// A file of `length` zero bytes
    pub fn zeroed(path: impl Into<String>, length: usize) -> Self {
        Self::new(path, vec![0u8; length])
    }
}

/// Counts one live file stream until dropped
struct OpenStream(Arc<AtomicUsize>);

impl OpenStream {
    fn new(count: &Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count.clone())
    }
}

impl Drop for OpenStream {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct MemoryEngine {
    infos: Vec<FileInfo>,
    data: Vec<Bytes>,
    /// Bytes readable from the start of each file. Cleared on shutdown.
    available: Mutex<Vec<watch::Sender<u64>>>,
    piece_count: Option<u32>,
    path: PathBuf,
    selected: Mutex<BTreeSet<usize>>,
    counters: Mutex<SwarmCounters>,
    peers: Mutex<Vec<PeerSnapshot>>,
    connected: Mutex<Vec<String>>,
    swarm_paused: AtomicBool,
    closed: AtomicBool,
    open_streams: Arc<AtomicUsize>,
    events_tx: mpsc::Sender<EngineEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<EngineEvent>>>,
}

impl MemoryEngine {
    /// Create an engine whose files are fully available
    pub fn new(files: Vec<MemoryFile>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let infos = files
            .iter()
            .map(|f| FileInfo::new(f.path.clone(), f.data.len() as u64))
            .collect();
        let available = files
            .iter()
            .map(|f| watch::channel(f.data.len() as u64).0)
            .collect();
        Self {
            infos,
            data: files.into_iter().map(|f| f.data).collect(),
            available: Mutex::new(available),
            piece_count: None,
            path: std::env::temp_dir().join("macflix-memory"),
            selected: Mutex::new(BTreeSet::new()),
            counters: Mutex::new(SwarmCounters::default()),
            peers: Mutex::new(Vec::new()),
            connected: Mutex::new(Vec::new()),
            swarm_paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            open_streams: Arc::new(AtomicUsize::new(0)),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    pub fn with_piece_count(mut self, pieces: u32) -> Self {
        self.piece_count = Some(pieces);
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Start every file with nothing readable
    pub fn starved(self) -> Self {
        for tx in lock(&self.available).iter() {
            tx.send_replace(0);
        }
        self
    }

    /// Make the first `bytes` of file `index` readable
    pub fn set_available(&self, index: usize, bytes: u64) {
        if let Some(tx) = lock(&self.available).get(index) {
            tx.send_replace(bytes);
        }
    }

    pub fn set_counters(&self, counters: SwarmCounters) {
        *lock(&self.counters) = counters;
    }

    pub fn set_peers(&self, peers: Vec<PeerSnapshot>) {
        *lock(&self.peers) = peers;
    }

    /// Push an event to the subscriber. Returns false if it was dropped.
    pub fn emit(&self, event: EngineEvent) -> bool {
        self.events_tx.try_send(event).is_ok()
    }

    /// Take the event receiver. Only the first call gets it.
    pub fn take_events(&self) -> Option<mpsc::Receiver<EngineEvent>> {
        lock(&self.events_rx).take()
    }

    pub fn selected(&self) -> Vec<usize> {
        lock(&self.selected).iter().copied().collect()
    }

    pub fn connected_peers(&self) -> Vec<String> {
        lock(&self.connected).clone()
    }

    pub fn is_swarm_paused(&self) -> bool {
        self.swarm_paused.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// File streams handed out and not yet dropped
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    fn check_index(&self, index: usize) -> Result<(), EngineError> {
        if index < self.infos.len() {
            Ok(())
        } else {
            Err(EngineError::UnknownFile(index))
        }
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    fn files(&self) -> Vec<FileInfo> {
        self.infos.clone()
    }

    fn piece_count(&self) -> Option<u32> {
        self.piece_count
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn select(&self, index: usize) -> Result<(), EngineError> {
        self.check_index(index)?;
        lock(&self.selected).insert(index);
        Ok(())
    }

    fn deselect(&self, index: usize) -> Result<(), EngineError> {
        self.check_index(index)?;
        lock(&self.selected).remove(&index);
        Ok(())
    }

    fn is_selected(&self, index: usize) -> bool {
        lock(&self.selected).contains(&index)
    }

    fn stream(&self, index: usize, range: ByteRange) -> Result<ByteStream, EngineError> {
        self.check_index(index)?;
        range.check(self.infos[index].length)?;
        let watermark = lock(&self.available)
            .get(index)
            .map(|tx| tx.subscribe())
            .ok_or(EngineError::Closed)?;
        let data = self.data[index].clone();
        let end = range.end + 1;
        let guard = OpenStream::new(&self.open_streams);

        let stream = futures_util::stream::unfold(
            (watermark, range.start, guard),
            move |(mut watermark, pos, guard)| {
                let data = data.clone();
                async move {
                    if pos >= end {
                        return None;
                    }
                    let have = loop {
                        let have = *watermark.borrow_and_update();
                        if have > pos {
                            break have;
                        }
                        if watermark.changed().await.is_err() {
                            let err = io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "engine closed while waiting for data",
                            );
                            return Some((Err(err), (watermark, end, guard)));
                        }
                    };
                    let stop = end.min(have).min(pos + CHUNK_SIZE);
                    let chunk = data.slice(pos as usize..stop as usize);
                    Some((Ok(chunk), (watermark, stop, guard)))
                }
            },
        );
        Ok(Box::pin(stream))
    }

    fn counters(&self) -> SwarmCounters {
        lock(&self.counters).clone()
    }

    fn peers(&self) -> Vec<PeerSnapshot> {
        lock(&self.peers).clone()
    }

    fn connect(&self, peer: &str) -> Result<(), EngineError> {
        parse_peer(peer)?;
        lock(&self.connected).push(peer.to_string());
        Ok(())
    }

    fn pause_swarm(&self) {
        self.swarm_paused.store(true, Ordering::SeqCst);
    }

    fn resume_swarm(&self) {
        self.swarm_paused.store(false, Ordering::SeqCst);
    }

    async fn shutdown(&self) -> Result<(), EngineError> {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the senders wakes every waiting stream
        lock(&self.available).clear();
        Ok(())
    }
}

/// Backend handing out a prebuilt [`MemoryEngine`]
pub struct MemoryBackend {
    engine: Arc<MemoryEngine>,
    defer_ready: bool,
    started: Mutex<Option<(TorrentDescriptor, EngineOptions)>>,
}

impl MemoryBackend {
    pub fn new(engine: Arc<MemoryEngine>) -> Self {
        Self {
            engine,
            defer_ready: false,
            started: Mutex::new(None),
        }
    }

    /// Leave `Ready` for the caller to emit, as a magnet would
    pub fn with_deferred_ready(mut self) -> Self {
        self.defer_ready = true;
        self
    }

    pub fn engine(&self) -> Arc<MemoryEngine> {
        self.engine.clone()
    }

    /// Descriptor and options of the last start
    pub fn started_with(&self) -> Option<(TorrentDescriptor, EngineOptions)> {
        lock(&self.started).clone()
    }
}

#[async_trait]
impl EngineBackend for MemoryBackend {
    async fn start(
        &self,
        descriptor: &TorrentDescriptor,
        options: &EngineOptions,
    ) -> Result<(Arc<dyn Engine>, mpsc::Receiver<EngineEvent>), EngineError> {
        let events = self
            .engine
            .take_events()
            .ok_or_else(|| EngineError::Start("engine already started".to_string()))?;
        *lock(&self.started) = Some((descriptor.clone(), options.clone()));
        if !self.defer_ready {
            self.engine.emit(EngineEvent::Ready);
        }
        Ok((self.engine.clone() as Arc<dyn Engine>, events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    async fn collect(mut stream: ByteStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_stream_range() {
        let engine = MemoryEngine::new(vec![MemoryFile::new("a.bin", (0u8..=255).collect::<Vec<_>>())]);
        let bytes = collect(engine.stream(0, ByteRange::new(10, 19)).unwrap()).await;
        assert_eq!(bytes, (10u8..=19).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_stream_waits_for_bytes() {
        let engine = Arc::new(MemoryEngine::new(vec![MemoryFile::zeroed("a.bin", 100)]).starved());
        let stream = engine.stream(0, ByteRange::new(0, 99)).unwrap();
        let reader = tokio::spawn(collect(stream));

        tokio::task::yield_now().await;
        assert!(!reader.is_finished());

        engine.set_available(0, 40);
        engine.set_available(0, 100);
        let bytes = reader.await.unwrap();
        assert_eq!(bytes.len(), 100);
    }

    #[tokio::test]
    async fn test_dropped_stream_is_released() {
        let engine = MemoryEngine::new(vec![MemoryFile::zeroed("a.bin", 10)]).starved();
        let stream = engine.stream(0, ByteRange::new(0, 9)).unwrap();
        let finished = collect(engine.stream(0, ByteRange::new(0, 0)).unwrap());
        assert_eq!(engine.open_streams(), 2);
        drop(stream);
        assert_eq!(engine.open_streams(), 1);
        engine.set_available(0, 10);
        assert_eq!(finished.await.len(), 1);
        assert_eq!(engine.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_ends_waiting_stream() {
        let engine = MemoryEngine::new(vec![MemoryFile::zeroed("a.bin", 10)]).starved();
        let mut stream = engine.stream(0, ByteRange::new(0, 9)).unwrap();
        engine.shutdown().await.unwrap();
        assert!(stream.next().await.unwrap().is_err());
        assert!(matches!(
            engine.stream(0, ByteRange::new(0, 9)),
            Err(EngineError::Closed)
        ));
    }

    #[test]
    fn test_selection() {
        let engine = MemoryEngine::new(vec![MemoryFile::zeroed("a", 1), MemoryFile::zeroed("b", 1)]);
        engine.select(1).unwrap();
        assert!(engine.is_selected(1));
        assert!(!engine.is_selected(0));
        engine.deselect(1).unwrap();
        assert!(engine.selected().is_empty());
        assert!(matches!(engine.select(5), Err(EngineError::UnknownFile(5))));
    }

    #[tokio::test]
    async fn test_backend_start_once() {
        let engine = Arc::new(MemoryEngine::new(vec![MemoryFile::zeroed("a", 1)]));
        let backend = MemoryBackend::new(engine);
        let descriptor = TorrentDescriptor {
            info_hash: None,
            name: "a".to_string(),
            trackers: vec![],
            info: None,
            metainfo: None,
        };
        let options = EngineOptions::default();
        let (_engine, mut events) = backend.start(&descriptor, &options).await.unwrap();
        assert_eq!(events.recv().await, Some(EngineEvent::Ready));
        assert!(backend.start(&descriptor, &options).await.is_err());
        assert_eq!(backend.started_with().unwrap().0.name, "a");
    }
}
