//! Torrent session
//!
//! One active acquisition run: the resolved descriptor, the running engine,
//! per-file handles and the session lifecycle state.

use crate::engine::{
    ByteRange, ByteStream, Engine, EngineBackend, EngineError, EngineEvent, EngineOptions,
    EVENT_CHANNEL_CAPACITY,
};
use crate::models::{EngineState, FileInfo, TorrentDescriptor};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Which files the session keeps selected while streaming
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Only the streamed file
    Single(usize),
    /// Every file in the torrent
    All,
}

/// A file inside the running torrent
#[derive(Clone)]
pub struct FileHandle {
    pub index: usize,
    pub info: FileInfo,
    engine: Arc<dyn Engine>,
}

impl FileHandle {
    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn path(&self) -> &str {
        &self.info.path
    }

    pub fn length(&self) -> u64 {
        self.info.length
    }

    pub fn select(&self) -> Result<(), EngineError> {
        self.engine.select(self.index)
    }

    pub fn deselect(&self) -> Result<(), EngineError> {
        self.engine.deselect(self.index)
    }

    pub fn is_selected(&self) -> bool {
        self.engine.is_selected(self.index)
    }

    /// Bytes of `range`, waiting on the engine for missing data
    pub fn stream(&self, range: ByteRange) -> Result<ByteStream, EngineError> {
        self.engine.stream(self.index, range)
    }
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("index", &self.index)
            .field("info", &self.info)
            .finish()
    }
}

pub struct TorrentSession {
    pub id: Uuid,
    pub descriptor: TorrentDescriptor,
    files: Vec<FileHandle>,
    engine: Arc<dyn Engine>,
    state: Mutex<EngineState>,
}

impl TorrentSession {
    /// Start the engine and wait for metadata.
    ///
    /// `on_wire` is called with the running peer count for every wire
    /// opened before the engine is ready. The returned receiver carries
    /// every event after `Ready`.
    pub async fn start(
        backend: &dyn EngineBackend,
        descriptor: TorrentDescriptor,
        options: &EngineOptions,
        mut on_wire: impl FnMut(usize),
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>), EngineError> {
        let (engine, mut events) = backend.start(&descriptor, options).await?;

        for peer in &options.peers {
            if let Err(e) = engine.connect(peer) {
                tracing::warn!(peer = %peer, error = %e, "could not add peer");
            }
        }

        let mut wires = 0usize;
        let failure = loop {
            match events.recv().await {
                Some(EngineEvent::Ready) => break None,
                Some(EngineEvent::Wire(addr)) => {
                    wires += 1;
                    tracing::trace!(peer = %addr, wires, "wire before metadata");
                    on_wire(wires);
                }
                Some(EngineEvent::Failed(reason)) => break Some(reason),
                Some(other) => tracing::debug!(event = ?other, "event before ready"),
                None => break Some("engine exited before ready".to_string()),
            }
        };
        if let Some(reason) = failure {
            if let Err(e) = engine.shutdown().await {
                tracing::warn!(error = %e, "engine shutdown failed");
            }
            return Err(EngineError::Start(reason));
        }

        let session = Self::attach(descriptor, engine);
        tracing::info!(
            session = %session.id,
            name = %session.descriptor.name,
            files = session.files.len(),
            "torrent ready"
        );
        Ok((session, events))
    }

    /// Wrap an engine that already has metadata
    pub fn attach(descriptor: TorrentDescriptor, engine: Arc<dyn Engine>) -> Self {
        let files = engine
            .files()
            .into_iter()
            .enumerate()
            .map(|(index, info)| FileHandle {
                index,
                info,
                engine: engine.clone(),
            })
            .collect();
        Self {
            id: Uuid::new_v4(),
            descriptor,
            files,
            engine,
            state: Mutex::new(EngineState::Ready),
        }
    }

    pub fn files(&self) -> &[FileHandle] {
        &self.files
    }

    pub fn file(&self, index: usize) -> Option<&FileHandle> {
        self.files.get(index)
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    /// Buffer directory of the engine
    pub fn path(&self) -> &Path {
        self.engine.path()
    }

    pub fn piece_count(&self) -> Option<u32> {
        self.engine.piece_count()
    }

    /// Index of the largest file
    pub fn default_index(&self) -> Option<usize> {
        self.files
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| a.length().cmp(&b.length()).then(ib.cmp(ia)))
            .map(|(i, _)| i)
    }

    /// Look a file up by numeric index or exact name
    pub fn find(&self, key: &str) -> Option<&FileHandle> {
        if let Ok(index) = key.parse::<usize>() {
            return self.files.get(index);
        }
        self.files.iter().find(|f| f.name() == key)
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_state(&self, state: EngineState) {
        let mut current = self.state.lock().unwrap_or_else(|p| p.into_inner());
        tracing::debug!(from = %*current, to = %state, "session state");
        *current = state;
    }

    /// Indices covered by `selection`
    pub fn indices(&self, selection: Selection) -> Vec<usize> {
        match selection {
            Selection::Single(index) => vec![index],
            Selection::All => (0..self.files.len()).collect(),
        }
    }

    pub fn select(&self, selection: Selection) -> Result<(), EngineError> {
        for index in self.indices(selection) {
            self.engine.select(index)?;
        }
        Ok(())
    }

    pub fn deselect(&self, selection: Selection) -> Result<(), EngineError> {
        for index in self.indices(selection) {
            self.engine.deselect(index)?;
        }
        Ok(())
    }

    /// Select the target files and enter the streaming state
    pub fn begin_streaming(&self, selection: Selection) -> Result<(), EngineError> {
        self.select(selection)?;
        self.set_state(EngineState::Streaming);
        Ok(())
    }

    /// Shut the engine down and optionally delete its buffer directory.
    /// Cleanup failures are logged only.
    pub async fn close(&self, remove_buffer: bool) -> Option<PathBuf> {
        if matches!(self.state(), EngineState::Closing | EngineState::Closed) {
            return None;
        }
        self.set_state(EngineState::Closing);
        if let Err(e) = self.engine.shutdown().await {
            tracing::warn!(error = %e, "engine shutdown failed");
        }
        let mut removed = None;
        if remove_buffer {
            let path = self.path().to_path_buf();
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {
                    tracing::info!(path = %path.display(), "removed buffer directory");
                    removed = Some(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove buffer directory")
                }
            }
        }
        self.set_state(EngineState::Closed);
        removed
    }
}

/// Split engine events between the telemetry aggregator and the
/// controller. Interest changes go to the controller, everything else
/// to telemetry.
pub fn route_events(
    mut events: mpsc::Receiver<EngineEvent>,
) -> (mpsc::Receiver<EngineEvent>, mpsc::Receiver<EngineEvent>) {
    let (telemetry_tx, telemetry_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (control_tx, control_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let target = match event {
                EngineEvent::Interested | EngineEvent::Uninterested => &control_tx,
                _ => &telemetry_tx,
            };
            // A gone subscriber only loses its own events
            let _ = target.send(event).await;
        }
    });
    (telemetry_rx, control_rx)
}
