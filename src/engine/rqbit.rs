//! librqbit engine
//!
//! Runs the torrent inside an embedded librqbit session rooted at the buffer
//! directory. Magnets are turned into metainfo with a list-only add, then
//! the torrent is added paused and the file selection decides what is
//! fetched: an empty selection or a paused swarm pauses the torrent.
//! Streams read through librqbit file streams, which wait for missing
//! pieces. A monitor task samples torrent stats once per second and turns
//! them into `Verify` and interest events.

use super::{
    parse_peer, Blocklist, ByteRange, ByteStream, Engine, EngineBackend, EngineError, EngineEvent,
    EngineOptions, EVENT_CHANNEL_CAPACITY,
};
use crate::models::{FileInfo, PeerSnapshot, SwarmCounters, TorrentDescriptor};
use crate::torrent::parse_metainfo;
use async_trait::async_trait;
use bytes::Bytes;
use librqbit::api::Api;
use librqbit::{AddTorrent, AddTorrentOptions, AddTorrentResponse, Session, SessionOptions};
use serde::Deserialize;
use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::io::{self, SeekFrom};
use std::net::SocketAddr;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const CHUNK_SIZE: usize = 64 * 1024;

const MONITOR_INTERVAL: Duration = Duration::from_secs(1);

/// Listen ports tried when no peer port is configured
const DEFAULT_PEER_PORTS: Range<u16> = 6881..6890;

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn backend_error(e: impl std::fmt::Display) -> EngineError {
    EngineError::Backend(e.to_string())
}

// =============================================================================
// Stats views
// =============================================================================

/// The parts of librqbit's torrent stats the engine reads
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct StatsView {
    progress_bytes: u64,
    uploaded_bytes: u64,
    finished: bool,
    file_progress: Vec<u64>,
    live: Option<LiveView>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct LiveView {
    download_speed: SpeedView,
    upload_speed: SpeedView,
    snapshot: SnapshotView,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct SpeedView {
    mbps: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct SnapshotView {
    peer_stats: AggregatePeersView,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct AggregatePeersView {
    queued: usize,
    connecting: usize,
    live: usize,
}

impl StatsView {
    fn counters(&self) -> SwarmCounters {
        let (download_rate, upload_rate, peers) = match &self.live {
            Some(live) => (
                live.download_speed.mbps * BYTES_PER_MIB,
                live.upload_speed.mbps * BYTES_PER_MIB,
                live.snapshot.peer_stats.clone(),
            ),
            None => (0.0, 0.0, AggregatePeersView::default()),
        };
        SwarmCounters {
            downloaded: self.progress_bytes,
            uploaded: self.uploaded_bytes,
            download_rate,
            upload_rate,
            peers_total: peers.live + peers.connecting,
            peers_active: peers.live,
            queue_depth: peers.queued,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct PeersView {
    peers: HashMap<String, PeerView>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct PeerView {
    counters: PeerCountersView,
    state: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct PeerCountersView {
    fetched_bytes: u64,
}

/// Reinterpret a librqbit response through one of the views above
fn view<T: serde::Serialize, V: for<'de> Deserialize<'de>>(value: &T) -> Option<V> {
    let json = serde_json::to_value(value).ok()?;
    serde_json::from_value(json).ok()
}

/// Per-peer download rates from successive byte counts
#[derive(Debug, Default)]
struct PeerRates {
    last: HashMap<String, (u64, Instant)>,
}

impl PeerRates {
    /// Live peers, busiest first. A peer that delivered nothing since the
    /// last sample is reported as choking.
    fn sample(&mut self, peers: PeersView, now: Instant, limit: usize) -> Vec<PeerSnapshot> {
        let mut out: Vec<PeerSnapshot> = Vec::new();
        let mut seen = HashMap::new();
        for (address, peer) in peers.peers {
            if peer.state != "live" {
                continue;
            }
            let fetched = peer.counters.fetched_bytes;
            let rate = match self.last.get(&address) {
                Some((before, at)) => {
                    let secs = now.duration_since(*at).as_secs_f64();
                    if secs > 0.0 {
                        fetched.saturating_sub(*before) as f64 / secs
                    } else {
                        0.0
                    }
                }
                None => 0.0,
            };
            seen.insert(address.clone(), (fetched, now));
            out.push(PeerSnapshot {
                address,
                downloaded: fetched,
                download_rate: rate,
                choking: rate == 0.0,
            });
        }
        self.last = seen;
        out.sort_by(|a, b| {
            b.download_rate
                .total_cmp(&a.download_rate)
                .then_with(|| a.address.cmp(&b.address))
        });
        out.truncate(limit);
        out
    }
}

// =============================================================================
// Monitor
// =============================================================================

/// Metadata of the added torrent
#[derive(Debug, Clone)]
struct Torrent {
    id: usize,
    files: Vec<FileInfo>,
    piece_length: u64,
    piece_count: u32,
}

#[derive(Debug)]
struct Monitor {
    verified: u32,
    interested: bool,
}

impl Default for Monitor {
    fn default() -> Self {
        Self {
            verified: 0,
            interested: true,
        }
    }
}

impl Monitor {
    /// Events implied by one stats sample
    fn sample(
        &mut self,
        stats: &StatsView,
        torrent: &Torrent,
        selected: &BTreeSet<usize>,
    ) -> Vec<EngineEvent> {
        let mut events = Vec::new();

        let complete = if stats.finished {
            torrent.piece_count
        } else if torrent.piece_length > 0 {
            ((stats.progress_bytes / torrent.piece_length) as u32).min(torrent.piece_count)
        } else {
            0
        };
        while self.verified < complete {
            events.push(EngineEvent::Verify(self.verified));
            self.verified += 1;
        }

        if !selected.is_empty() {
            let wanted = selected.iter().any(|&i| {
                let have = stats.file_progress.get(i).copied().unwrap_or(0);
                torrent.files.get(i).map(|f| have < f.length).unwrap_or(false)
            });
            if wanted != self.interested {
                self.interested = wanted;
                events.push(if wanted {
                    EngineEvent::Interested
                } else {
                    EngineEvent::Uninterested
                });
            }
        }
        events
    }
}

// =============================================================================
// Engine
// =============================================================================

/// What the torrent should fetch and whether it should run at all
#[derive(Debug, Clone, PartialEq, Eq)]
struct Wanted {
    files: HashSet<usize>,
    run: bool,
}

pub struct RqbitEngine {
    session: Arc<Session>,
    api: Api,
    root: PathBuf,
    torrent: OnceLock<Torrent>,
    blocklist: Blocklist,
    initial_peers: Vec<SocketAddr>,
    connections: usize,
    selected: Mutex<BTreeSet<usize>>,
    swarm_paused: AtomicBool,
    wanted_tx: mpsc::UnboundedSender<Wanted>,
    wanted_rx: Mutex<Option<mpsc::UnboundedReceiver<Wanted>>>,
    monitor: Mutex<Monitor>,
    rates: Mutex<PeerRates>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl RqbitEngine {
    fn new(session: Arc<Session>, options: &EngineOptions, initial_peers: Vec<SocketAddr>) -> Self {
        let (wanted_tx, wanted_rx) = mpsc::unbounded_channel();
        Self {
            api: Api::new(session.clone(), None),
            session,
            root: options.path.clone(),
            torrent: OnceLock::new(),
            blocklist: options.blocklist.clone(),
            initial_peers,
            connections: options.connections,
            selected: Mutex::new(BTreeSet::new()),
            swarm_paused: AtomicBool::new(false),
            wanted_tx,
            wanted_rx: Mutex::new(Some(wanted_rx)),
            monitor: Mutex::new(Monitor::default()),
            rates: Mutex::new(PeerRates::default()),
            tasks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn torrent(&self) -> Result<&Torrent, EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        self.torrent
            .get()
            .ok_or(EngineError::Unsupported("torrent metadata is not known yet"))
    }

    fn check_index(&self, index: usize) -> Result<&Torrent, EngineError> {
        let torrent = self.torrent()?;
        if index < torrent.files.len() {
            Ok(torrent)
        } else {
            Err(EngineError::UnknownFile(index))
        }
    }

    /// Queue the current selection and pause state for the control task
    fn push_wanted(&self) {
        let files: HashSet<usize> = lock(&self.selected).iter().copied().collect();
        let run = !files.is_empty() && !self.swarm_paused.load(Ordering::SeqCst);
        if self.wanted_tx.send(Wanted { files, run }).is_err() {
            tracing::debug!("torrent control task is gone");
        }
    }

    fn stats(&self) -> Option<StatsView> {
        let torrent = self.torrent().ok()?;
        match self.api.api_stats_v1(torrent.id.into()) {
            Ok(stats) => view(&stats),
            Err(e) => {
                tracing::debug!(error = %e, "torrent stats unavailable");
                None
            }
        }
    }

    /// One monitor tick
    fn sample(&self, events: &mpsc::Sender<EngineEvent>) {
        let (Ok(torrent), Some(stats)) = (self.torrent(), self.stats()) else {
            return;
        };
        let selected = lock(&self.selected).clone();
        for event in lock(&self.monitor).sample(&stats, torrent, &selected) {
            if events.try_send(event).is_err() {
                tracing::debug!("engine event dropped");
            }
        }
    }

    fn spawn_task(&self, task: JoinHandle<()>) {
        lock(&self.tasks).push(task);
    }
}

#[async_trait]
impl Engine for RqbitEngine {
    fn files(&self) -> Vec<FileInfo> {
        self.torrent
            .get()
            .map(|t| t.files.clone())
            .unwrap_or_default()
    }

    fn piece_count(&self) -> Option<u32> {
        self.torrent.get().map(|t| t.piece_count)
    }

    fn path(&self) -> &Path {
        &self.root
    }

    fn select(&self, index: usize) -> Result<(), EngineError> {
        self.check_index(index)?;
        if lock(&self.selected).insert(index) {
            self.push_wanted();
        }
        Ok(())
    }

    fn deselect(&self, index: usize) -> Result<(), EngineError> {
        self.check_index(index)?;
        if lock(&self.selected).remove(&index) {
            self.push_wanted();
        }
        Ok(())
    }

    fn is_selected(&self, index: usize) -> bool {
        lock(&self.selected).contains(&index)
    }

    fn stream(&self, index: usize, range: ByteRange) -> Result<ByteStream, EngineError> {
        let torrent = self.check_index(index)?;
        range.check(torrent.files[index].length)?;
        let reader = self
            .api
            .api_stream(torrent.id.into(), index)
            .map_err(backend_error)?;
        Ok(read_range(Box::pin(reader), range))
    }

    fn counters(&self) -> SwarmCounters {
        self.stats().map(|s| s.counters()).unwrap_or_default()
    }

    fn peers(&self) -> Vec<PeerSnapshot> {
        let Ok(torrent) = self.torrent() else {
            return Vec::new();
        };
        let peers = match self.api.api_peer_stats(torrent.id.into(), Default::default()) {
            Ok(snapshot) => view(&snapshot).unwrap_or_default(),
            Err(e) => {
                tracing::debug!(error = %e, "peer stats unavailable");
                return Vec::new();
            }
        };
        lock(&self.rates).sample(peers, Instant::now(), self.connections)
    }

    fn connect(&self, peer: &str) -> Result<(), EngineError> {
        check_peer(peer, &self.blocklist, &self.initial_peers)
    }

    fn pause_swarm(&self) {
        if !self.swarm_paused.swap(true, Ordering::SeqCst) {
            self.push_wanted();
        }
    }

    fn resume_swarm(&self) {
        if self.swarm_paused.swap(false, Ordering::SeqCst) {
            self.push_wanted();
        }
    }

    async fn shutdown(&self) -> Result<(), EngineError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        if let Some(torrent) = self.torrent.get() {
            if let Err(e) = self.api.api_torrent_action_forget(torrent.id.into()).await {
                tracing::debug!(error = %e, "failed to forget torrent");
            }
        }
        self.session.stop().await;
        tracing::debug!(path = %self.root.display(), "torrent session stopped");
        Ok(())
    }
}

/// Peers are handed to librqbit when the torrent is added; later ones
/// cannot be injected
fn check_peer(peer: &str, blocklist: &Blocklist, initial: &[SocketAddr]) -> Result<(), EngineError> {
    let addr = parse_peer(peer)?;
    if blocklist.is_blocked(addr.ip()) {
        return Err(EngineError::Blocked(peer.to_string()));
    }
    if initial.contains(&addr) {
        return Ok(());
    }
    Err(EngineError::Unsupported("adding peers to a running torrent"))
}

/// Valid, unblocked peers from the command line, at most `limit`
fn initial_peers(peers: &[String], blocklist: &Blocklist, limit: usize) -> Vec<SocketAddr> {
    peers
        .iter()
        .filter_map(|peer| match parse_peer(peer) {
            Ok(addr) if blocklist.is_blocked(addr.ip()) => {
                tracing::warn!(peer = %peer, "peer is blocklisted, skipping");
                None
            }
            Ok(addr) => Some(addr),
            Err(e) => {
                tracing::warn!(error = %e, "skipping peer");
                None
            }
        })
        .take(limit)
        .collect()
}

// =============================================================================
// Streaming
// =============================================================================

struct ReadState<R> {
    reader: R,
    pos: u64,
    end: u64,
    positioned: bool,
}

impl<R: AsyncRead + AsyncSeek + Unpin> ReadState<R> {
    async fn next_chunk(&mut self) -> io::Result<Bytes> {
        if !self.positioned {
            self.reader.seek(SeekFrom::Start(self.pos)).await?;
            self.positioned = true;
        }
        let want = ((self.end - self.pos) as usize).min(CHUNK_SIZE);
        let mut buf = vec![0u8; want];
        let n = self.reader.read(&mut buf).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "torrent stream ended before the range",
            ));
        }
        buf.truncate(n);
        self.pos += n as u64;
        Ok(Bytes::from(buf))
    }
}

/// Chunks of `range` read from a seekable reader
fn read_range<R>(reader: R, range: ByteRange) -> ByteStream
where
    R: AsyncRead + AsyncSeek + Unpin + Send + 'static,
{
    let state = ReadState {
        reader,
        pos: range.start,
        end: range.end + 1,
        positioned: false,
    };
    Box::pin(futures_util::stream::unfold(state, |mut state| async move {
        if state.pos >= state.end {
            return None;
        }
        match state.next_chunk().await {
            Ok(chunk) => Some((Ok(chunk), state)),
            Err(e) => {
                state.pos = state.end;
                Some((Err(e), state))
            }
        }
    }))
}

// =============================================================================
// Backend
// =============================================================================

/// Where the torrent's metainfo comes from
enum Source {
    Metainfo(Vec<u8>),
    Magnet(String),
}

impl Source {
    fn of(descriptor: &TorrentDescriptor) -> Result<Self, EngineError> {
        if let Some(bytes) = &descriptor.metainfo {
            return Ok(Source::Metainfo(bytes.clone()));
        }
        descriptor.magnet_uri().map(Source::Magnet).ok_or_else(|| {
            EngineError::Start(format!("{} has neither metainfo nor an info hash", descriptor.name))
        })
    }
}

fn session_options(options: &EngineOptions) -> SessionOptions {
    let listen_port_range = match options.peer_port {
        Some(port) => port..port.saturating_add(1),
        None => DEFAULT_PEER_PORTS,
    };
    let blocklist_url = options.blocklist_path.as_ref().map(|path| {
        let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.clone());
        format!("file://{}", path.display())
    });
    SessionOptions {
        disable_dht: !options.dht,
        disable_dht_persistence: true,
        listen_port_range: Some(listen_port_range),
        blocklist_url,
        ..Default::default()
    }
}

/// Multi-file torrents live under a directory named after the torrent
fn output_folder(root: &Path, name: &str, files: &[FileInfo]) -> PathBuf {
    match files {
        [single] if single.path == name => root.to_path_buf(),
        _ => root.join(name),
    }
}

/// Metainfo bytes plus any peers met while fetching them
async fn fetch_metainfo(
    session: &Arc<Session>,
    source: Source,
    peers: Vec<SocketAddr>,
) -> Result<(Vec<u8>, Vec<SocketAddr>), EngineError> {
    let uri = match source {
        Source::Metainfo(bytes) => return Ok((bytes, peers)),
        Source::Magnet(uri) => uri,
    };
    tracing::info!(peers = peers.len(), "fetching metadata from the swarm");
    let options = AddTorrentOptions {
        list_only: true,
        initial_peers: (!peers.is_empty()).then(|| peers.clone()),
        ..Default::default()
    };
    let response = session
        .add_torrent(AddTorrent::Url(Cow::Owned(uri)), Some(options))
        .await
        .map_err(|e| EngineError::Start(format!("{e:#}")))?;
    match response {
        AddTorrentResponse::ListOnly(listed) => {
            let mut peers = peers;
            for addr in listed.seen_peers {
                if !peers.contains(&addr) {
                    peers.push(addr);
                }
            }
            Ok((listed.torrent_bytes.to_vec(), peers))
        }
        _ => Err(EngineError::Start("metadata lookup added the torrent".into())),
    }
}

/// Resolve metadata, add the torrent paused and wait for its initial check
async fn add_torrent(
    session: Arc<Session>,
    root: PathBuf,
    source: Source,
    peers: Vec<SocketAddr>,
    connections: usize,
) -> Result<Torrent, EngineError> {
    let (bytes, mut peers) = fetch_metainfo(&session, source, peers).await?;
    peers.truncate(connections);
    let descriptor = parse_metainfo(&bytes).map_err(|e| EngineError::Start(e.to_string()))?;
    let info = descriptor
        .info
        .ok_or_else(|| EngineError::Start("metainfo has no info dictionary".into()))?;
    let folder = output_folder(&root, &descriptor.name, &info.files);

    let options = AddTorrentOptions {
        paused: true,
        overwrite: true,
        output_folder: Some(folder.to_string_lossy().into_owned()),
        initial_peers: (!peers.is_empty()).then_some(peers),
        ..Default::default()
    };
    let response = session
        .add_torrent(AddTorrent::from_bytes(bytes), Some(options))
        .await
        .map_err(|e| EngineError::Start(format!("{e:#}")))?;
    let (id, handle) = match response {
        AddTorrentResponse::Added(id, handle) | AddTorrentResponse::AlreadyManaged(id, handle) => {
            (id, handle)
        }
        AddTorrentResponse::ListOnly(_) => {
            return Err(EngineError::Start("torrent was only listed".into()))
        }
    };
    handle
        .wait_until_initialized()
        .await
        .map_err(|e| EngineError::Start(format!("{e:#}")))?;

    tracing::info!(
        id,
        name = %descriptor.name,
        folder = %folder.display(),
        files = info.files.len(),
        pieces = info.piece_count,
        "torrent added"
    );
    Ok(Torrent {
        id,
        files: info.files,
        piece_length: info.piece_length,
        piece_count: info.piece_count,
    })
}

/// Apply selection changes in order, pausing and starting the torrent
async fn control(api: Api, id: usize, mut wanted: mpsc::UnboundedReceiver<Wanted>) {
    let mut running = false;
    while let Some(want) = wanted.recv().await {
        if !want.files.is_empty() {
            if let Err(e) = api
                .api_torrent_action_update_only_files(id.into(), &want.files)
                .await
            {
                tracing::warn!(error = %e, files = ?want.files, "failed to update file selection");
            }
        }
        if want.run == running {
            continue;
        }
        let result = if want.run {
            api.api_torrent_action_start(id.into()).await.map(|_| ())
        } else {
            api.api_torrent_action_pause(id.into()).await.map(|_| ())
        };
        match result {
            Ok(()) => {
                running = want.run;
                tracing::debug!(running, "torrent state changed");
            }
            Err(e) => tracing::warn!(error = %e, run = want.run, "failed to change torrent state"),
        }
    }
}

async fn monitor(engine: Weak<RqbitEngine>, events: mpsc::Sender<EngineEvent>) {
    let mut ticker = tokio::time::interval(MONITOR_INTERVAL);
    loop {
        ticker.tick().await;
        let Some(engine) = engine.upgrade() else { break };
        if engine.closed.load(Ordering::SeqCst) {
            break;
        }
        engine.sample(&events);
    }
}

/// Starts [`RqbitEngine`]s in a fresh librqbit session per torrent
#[derive(Debug, Clone, Default)]
pub struct RqbitBackend;

impl RqbitBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EngineBackend for RqbitBackend {
    async fn start(
        &self,
        descriptor: &TorrentDescriptor,
        options: &EngineOptions,
    ) -> Result<(Arc<dyn Engine>, mpsc::Receiver<EngineEvent>), EngineError> {
        let source = Source::of(descriptor)?;
        tokio::fs::create_dir_all(&options.path).await?;
        let session = Session::new_with_opts(options.path.clone(), session_options(options))
            .await
            .map_err(|e| EngineError::Start(format!("{e:#}")))?;

        let peers = initial_peers(&options.peers, &options.blocklist, options.connections);
        tracing::info!(
            name = %descriptor.name,
            path = %options.path.display(),
            magnet = matches!(source, Source::Magnet(_)),
            peers = peers.len(),
            dht = options.dht,
            blocked_ranges = options.blocklist.len(),
            "starting torrent engine"
        );

        let engine = Arc::new(RqbitEngine::new(session.clone(), options, peers.clone()));
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let weak = Arc::downgrade(&engine);
        let root = options.path.clone();
        let connections = options.connections;
        let task = tokio::spawn(async move {
            let added = add_torrent(session, root, source, peers, connections).await;
            let Some(engine) = weak.upgrade() else { return };
            let torrent = match added {
                Ok(torrent) => torrent,
                Err(e) => {
                    tracing::warn!(error = %e, "torrent failed to start");
                    let _ = tx.send(EngineEvent::Failed(e.to_string())).await;
                    return;
                }
            };
            let id = torrent.id;
            if engine.torrent.set(torrent).is_err() {
                return;
            }
            if let Some(wanted) = lock(&engine.wanted_rx).take() {
                engine.spawn_task(tokio::spawn(control(engine.api.clone(), id, wanted)));
            }
            engine.spawn_task(tokio::spawn(monitor(Arc::downgrade(&engine), tx.clone())));
            let _ = tx.send(EngineEvent::Ready).await;
        });
        engine.spawn_task(task);

        Ok((engine as Arc<dyn Engine>, rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use serde_json::json;

    fn torrent() -> Torrent {
        Torrent {
            id: 0,
            files: vec![FileInfo::new("show/a.mkv", 100), FileInfo::new("show/b.mkv", 50)],
            piece_length: 25,
            piece_count: 6,
        }
    }

    fn stats(value: serde_json::Value) -> StatsView {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_counters_from_live_stats() {
        let stats = stats(json!({
            "state": "live",
            "progress_bytes": 4096,
            "uploaded_bytes": 512,
            "total_bytes": 8192,
            "finished": false,
            "file_progress": [4096],
            "live": {
                "download_speed": { "mbps": 2.0, "human_readable": "2.00 MiB/s" },
                "upload_speed": { "mbps": 0.5, "human_readable": "0.50 MiB/s" },
                "snapshot": {
                    "peer_stats": { "queued": 4, "connecting": 2, "live": 3, "seen": 20, "dead": 1 }
                }
            }
        }));
        let counters = stats.counters();
        assert_eq!(counters.downloaded, 4096);
        assert_eq!(counters.uploaded, 512);
        assert_eq!(counters.download_rate, 2.0 * 1024.0 * 1024.0);
        assert_eq!(counters.upload_rate, 0.5 * 1024.0 * 1024.0);
        assert_eq!(counters.peers_total, 5);
        assert_eq!(counters.peers_active, 3);
        assert_eq!(counters.queue_depth, 4);
    }

    #[test]
    fn test_paused_stats_have_no_rates() {
        let counters = stats(json!({ "state": "paused", "progress_bytes": 10, "live": null })).counters();
        assert_eq!(counters.downloaded, 10);
        assert_eq!(counters.download_rate, 0.0);
        assert_eq!(counters.peers_total, 0);
    }

    #[test]
    fn test_monitor_reports_pieces_and_interest() {
        let torrent = torrent();
        let selected: BTreeSet<usize> = [1].into_iter().collect();
        let mut monitor = Monitor::default();

        let events = monitor.sample(
            &stats(json!({ "progress_bytes": 60, "file_progress": [60, 0] })),
            &torrent,
            &selected,
        );
        assert_eq!(events, vec![EngineEvent::Verify(0), EngineEvent::Verify(1)]);

        let events = monitor.sample(
            &stats(json!({ "progress_bytes": 110, "file_progress": [60, 50] })),
            &torrent,
            &selected,
        );
        assert_eq!(
            events,
            vec![
                EngineEvent::Verify(2),
                EngineEvent::Verify(3),
                EngineEvent::Uninterested
            ]
        );

        let events = monitor.sample(
            &stats(json!({ "progress_bytes": 150, "finished": true, "file_progress": [100, 50] })),
            &torrent,
            &[0, 1].into_iter().collect(),
        );
        assert_eq!(events, vec![EngineEvent::Verify(4), EngineEvent::Verify(5)]);
    }

    #[test]
    fn test_monitor_wants_again_after_new_selection() {
        let torrent = torrent();
        let mut monitor = Monitor::default();
        let done = stats(json!({ "progress_bytes": 50, "file_progress": [0, 50] }));
        monitor.sample(&done, &torrent, &[1].into_iter().collect());
        let events = monitor.sample(&done, &torrent, &[0, 1].into_iter().collect());
        assert_eq!(events, vec![EngineEvent::Interested]);
    }

    #[test]
    fn test_peer_rates() {
        let mut rates = PeerRates::default();
        let start = Instant::now();
        let snapshot = |a: u64, b: u64| -> PeersView {
            serde_json::from_value(json!({
                "peers": {
                    "10.0.0.1:6881": { "counters": { "fetched_bytes": a }, "state": "live" },
                    "10.0.0.2:6881": { "counters": { "fetched_bytes": b }, "state": "live" },
                    "10.0.0.3:6881": { "counters": { "fetched_bytes": 99 }, "state": "dead" }
                }
            }))
            .unwrap()
        };

        let first = rates.sample(snapshot(100, 100), start, 10);
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|p| p.choking));

        let second = rates.sample(snapshot(100, 2_100), start + Duration::from_secs(2), 10);
        assert_eq!(second[0].address, "10.0.0.2:6881");
        assert_eq!(second[0].download_rate, 1000.0);
        assert!(!second[0].choking);
        assert_eq!(second[1].downloaded, 100);
        assert!(second[1].choking);

        let capped = rates.sample(snapshot(100, 2_100), start + Duration::from_secs(3), 1);
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn test_peers_checked_against_blocklist() {
        let blocklist = Blocklist::parse("bad:10.0.0.0-10.0.0.255\n");
        let peers = vec![
            "10.0.0.7:6881".to_string(),
            "192.168.1.2:6881".to_string(),
            "nope".to_string(),
            "192.168.1.3:6881".to_string(),
        ];
        let initial = initial_peers(&peers, &blocklist, 1);
        assert_eq!(initial, vec!["192.168.1.2:6881".parse::<SocketAddr>().unwrap()]);

        assert!(check_peer("192.168.1.2:6881", &blocklist, &initial).is_ok());
        assert!(matches!(
            check_peer("10.0.0.7:6881", &blocklist, &initial),
            Err(EngineError::Blocked(_))
        ));
        assert!(matches!(
            check_peer("192.168.1.9:6881", &blocklist, &initial),
            Err(EngineError::Unsupported(_))
        ));
        assert!(matches!(
            check_peer("bogus", &blocklist, &initial),
            Err(EngineError::InvalidPeer(_))
        ));
    }

    #[tokio::test]
    async fn test_read_range_seeks_and_chunks() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let reader = std::io::Cursor::new(data.clone());
        let mut stream = read_range(reader, ByteRange::new(70_000, 169_999));
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            assert!(chunk.len() <= CHUNK_SIZE);
            out.extend_from_slice(&chunk);
        }
        assert_eq!(out, &data[70_000..170_000]);
    }

    #[tokio::test]
    async fn test_short_reader_is_an_error() {
        let reader = std::io::Cursor::new(vec![1u8; 10]);
        let mut stream = read_range(reader, ByteRange::new(0, 19));
        assert_eq!(stream.next().await.unwrap().unwrap().len(), 10);
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn test_output_folder() {
        let root = Path::new("/tmp/buffer");
        assert_eq!(
            output_folder(root, "a.mkv", &[FileInfo::new("a.mkv", 1)]),
            PathBuf::from("/tmp/buffer")
        );
        assert_eq!(
            output_folder(root, "show", &[FileInfo::new("show/a.mkv", 1)]),
            PathBuf::from("/tmp/buffer/show")
        );
    }

    #[test]
    fn test_session_options() {
        let options = EngineOptions {
            peer_port: Some(7000),
            dht: false,
            ..Default::default()
        };
        let session = session_options(&options);
        assert!(session.disable_dht);
        assert_eq!(session.listen_port_range, Some(7000..7001));
        assert_eq!(session.blocklist_url, None);
    }

    #[test]
    fn test_source_needs_metainfo_or_hash() {
        let descriptor = TorrentDescriptor {
            info_hash: None,
            name: "x".into(),
            trackers: vec![],
            info: None,
            metainfo: None,
        };
        assert!(matches!(Source::of(&descriptor), Err(EngineError::Start(_))));

        let magnet = TorrentDescriptor {
            info_hash: Some("abc".into()),
            ..descriptor
        };
        assert!(matches!(Source::of(&magnet), Ok(Source::Magnet(uri)) if uri.contains("btih:abc")));
    }
}
