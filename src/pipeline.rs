//! Acquisition pipeline
//!
//! `Searching -> Listing -> [SubtitleLookup -> SubtitleDownload ->
//! SubtitleUnpack] -> Resolving -> Streaming`
//!
//! Each stage returns a `Result`. Search, listing and resolution errors end
//! the run; subtitle failures degrade to "no subtitle" and the run goes on.

use crate::api::{listing, OpenSubtitlesClient, ProviderError, SearchProvider, MAX_CANDIDATES};
use crate::cli::ExitCode;
use crate::engine::{EngineBackend, EngineError, EngineEvent, EngineOptions};
use crate::models::{AcquisitionCandidate, FileInfo, SubtitleAsset, TorrentDescriptor};
use crate::server::{FileServer, ServerConfig, ServerError};
use crate::session::{route_events, Selection, TorrentSession};
use crate::stream::SubtitleStager;
use crate::telemetry::{Telemetry, SAMPLE_INTERVAL};
use crate::torrent::{ResolveError, Resolver};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

// =============================================================================
// Stages and errors
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Searching,
    Listing,
    SubtitleLookup,
    SubtitleDownload,
    SubtitleUnpack,
    Resolving,
    Streaming,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineStage::Searching => "searching",
            PipelineStage::Listing => "listing",
            PipelineStage::SubtitleLookup => "subtitle lookup",
            PipelineStage::SubtitleDownload => "subtitle download",
            PipelineStage::SubtitleUnpack => "subtitle unpack",
            PipelineStage::Resolving => "resolving",
            PipelineStage::Streaming => "streaming",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("A search term is required (or use 'browse')")]
    MissingTerm,
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("Could not find results. Please try again")]
    NoResults,
    #[error("Selection cancelled")]
    Cancelled,
    #[error("Selected torrent has no locator")]
    NoLocator,
    #[error("Subtitle file not found: {}", .0.display())]
    SubtitleFile(PathBuf),
    /// The file list was printed and nothing streamed
    #[error("Files listed")]
    Listed,
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("Failed to start torrent: {0}")]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Server(#[from] ServerError),
}

impl PipelineError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            PipelineError::Cancelled => ExitCode::Interrupted,
            PipelineError::Listed => ExitCode::Success,
            _ => ExitCode::Error,
        }
    }
}

// =============================================================================
// Selection
// =============================================================================

/// A keypress while the candidate table is shown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionKey {
    Letter(char),
    Interrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionOutcome {
    Chosen(usize),
    Ignored,
    Interrupt,
}

/// Maps letter keys onto `count` rows, accepting exactly one choice
#[derive(Debug, Clone)]
pub struct SelectionState {
    count: usize,
    done: bool,
}

impl SelectionState {
    pub fn new(count: usize) -> Self {
        Self { count, done: false }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// A lone candidate needs no keypress
    pub fn automatic(&self) -> Option<usize> {
        (self.count == 1).then_some(0)
    }

    pub fn on_key(&mut self, key: SelectionKey) -> SelectionOutcome {
        match key {
            SelectionKey::Interrupt => SelectionOutcome::Interrupt,
            SelectionKey::Letter(_) if self.done => SelectionOutcome::Ignored,
            SelectionKey::Letter(c) => match crate::ui::picker::index_for(c, self.count) {
                Some(index) => {
                    self.done = true;
                    SelectionOutcome::Chosen(index)
                }
                None => SelectionOutcome::Ignored,
            },
        }
    }
}

// =============================================================================
// Observer
// =============================================================================

/// Progress callbacks for whoever presents the pipeline. Every method
/// defaults to doing nothing.
pub trait PipelineObserver {
    fn stage(&mut self, _stage: PipelineStage) {}

    /// Called with the capped, letter-keyed rows before waiting for a key
    fn candidates(&mut self, _candidates: &[AcquisitionCandidate]) {}

    fn subtitles_found(&mut self, _count: usize) {}

    /// Peer count while waiting for torrent metadata
    fn wire(&mut self, _peers: usize) {}

    /// The torrent's files, when a listing was asked for
    fn files(&mut self, _files: &[FileInfo], _listing: FileListing) {}
}

impl PipelineObserver for () {}

// =============================================================================
// Pipeline
// =============================================================================

/// What the subtitle and resolve stages produced
#[derive(Debug, Clone)]
pub struct Acquired {
    pub candidate: AcquisitionCandidate,
    pub descriptor: TorrentDescriptor,
    /// Staged subtitle files; the first is wired into the player
    pub subtitles: Vec<PathBuf>,
}

/// What to do with the file list once metadata is known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileListing {
    /// Print the files and stop
    Print,
    /// Show the files and stream the one picked by letter
    Choose,
}

/// Options for the streaming stage
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    pub engine: EngineOptions,
    pub server: ServerConfig,
    /// Stream every file and hand out the playlist
    pub all: bool,
    /// Host put into the public href. Defaults to the first local address.
    pub public_host: Option<String>,
    /// Delete the buffer directory if streaming never starts
    pub remove: bool,
    pub list: Option<FileListing>,
}

/// A running session: engine, telemetry and file server
pub struct StreamingSession {
    pub session: Arc<TorrentSession>,
    pub server: FileServer,
    pub telemetry: Telemetry,
    /// Interest changes for the controller
    pub control_events: mpsc::Receiver<EngineEvent>,
    pub selection: Selection,
    pub href: String,
    pub acquired: Acquired,
}

impl StreamingSession {
    /// Address for a player running on this machine
    pub fn local_href(&self) -> String {
        let suffix = if self.selection == Selection::All { ".m3u" } else { "" };
        format!("http://localhost:{}/{}", self.server.port(), suffix)
    }

    /// Name and byte length of what is being streamed
    pub fn title(&self) -> (String, u64) {
        match self.selection {
            Selection::All => (
                self.session.descriptor.name.clone(),
                self.session.files().iter().map(|f| f.length()).sum(),
            ),
            Selection::Single(index) => self
                .session
                .file(index)
                .map(|f| (f.name().to_string(), f.length()))
                .unwrap_or_else(|| (self.session.descriptor.name.clone(), 0)),
        }
    }
}

pub struct Pipeline {
    provider: Box<dyn SearchProvider>,
    subtitles: Option<(OpenSubtitlesClient, String)>,
    subtitle_file: Option<PathBuf>,
    stager: SubtitleStager,
    resolver: Resolver,
    cap: usize,
}

impl Pipeline {
    pub fn new(provider: Box<dyn SearchProvider>, stager: SubtitleStager) -> Self {
        Self {
            provider,
            subtitles: None,
            subtitle_file: None,
            stager,
            resolver: Resolver::new(),
            cap: MAX_CANDIDATES,
        }
    }

    /// Enable the subtitle stages for `language`
    pub fn with_subtitles(mut self, client: OpenSubtitlesClient, language: impl Into<String>) -> Self {
        self.subtitles = Some((client, language.into()));
        self
    }

    /// Use this subtitle file and skip the lookup
    pub fn with_subtitle_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.subtitle_file = Some(path.into());
        self
    }

    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn stager(&self) -> &SubtitleStager {
        &self.stager
    }

    /// Searching and Listing. `None` lists the provider's top torrents.
    pub async fn search(
        &self,
        term: Option<&str>,
        observer: &mut dyn PipelineObserver,
    ) -> Result<Vec<AcquisitionCandidate>, PipelineError> {
        observer.stage(PipelineStage::Searching);
        tracing::info!(provider = self.provider.name(), term = term.unwrap_or("<top>"), "searching");
        let results = match term {
            Some(term) => self.provider.search(term).await?,
            None => self.provider.top().await?,
        };

        observer.stage(PipelineStage::Listing);
        let rows = listing(results, self.cap);
        tracing::info!(count = rows.len(), "candidates listed");
        if rows.is_empty() {
            return Err(PipelineError::NoResults);
        }
        Ok(rows)
    }

    /// Wait for a valid letter. A lone candidate is taken without asking.
    pub async fn choose(
        &self,
        candidates: &[AcquisitionCandidate],
        keys: &mut mpsc::Receiver<SelectionKey>,
        observer: &mut dyn PipelineObserver,
    ) -> Result<usize, PipelineError> {
        let mut state = SelectionState::new(candidates.len());
        observer.candidates(candidates);
        if let Some(index) = state.automatic() {
            return Ok(index);
        }
        while let Some(key) = keys.recv().await {
            match state.on_key(key) {
                SelectionOutcome::Chosen(index) => {
                    tracing::info!(index, name = %candidates[index].name, "candidate chosen");
                    return Ok(index);
                }
                SelectionOutcome::Interrupt => return Err(PipelineError::Cancelled),
                SelectionOutcome::Ignored => {}
            }
        }
        Err(PipelineError::Cancelled)
    }

    /// The optional subtitle stages. Never fails: every problem is logged
    /// and leaves fewer (or no) subtitles.
    pub async fn fetch_subtitles(
        &self,
        candidate: &AcquisitionCandidate,
        observer: &mut dyn PipelineObserver,
    ) -> Vec<PathBuf> {
        if let Some(path) = &self.subtitle_file {
            tracing::info!(path = %path.display(), "using subtitle file");
            return vec![path.clone()];
        }
        let Some((client, language)) = &self.subtitles else {
            return Vec::new();
        };

        observer.stage(PipelineStage::SubtitleLookup);
        let assets: Vec<SubtitleAsset> = match client.search(candidate.title(), language).await {
            Ok(assets) => assets,
            Err(e) => {
                tracing::warn!(error = %e, "subtitle lookup failed, continuing without");
                Vec::new()
            }
        };
        observer.subtitles_found(assets.len());
        if assets.is_empty() {
            tracing::info!(title = candidate.title(), language = %language, "no subtitles found");
            return Vec::new();
        }

        observer.stage(PipelineStage::SubtitleDownload);
        observer.stage(PipelineStage::SubtitleUnpack);
        let staged = self.stager.stage_all(&assets).await;
        tracing::info!(found = assets.len(), staged = staged.len(), "subtitles staged");
        staged
    }

    /// Subtitles, then descriptor resolution
    pub async fn acquire(
        &self,
        candidate: AcquisitionCandidate,
        observer: &mut dyn PipelineObserver,
    ) -> Result<Acquired, PipelineError> {
        let subtitles = self.fetch_subtitles(&candidate, observer).await;

        observer.stage(PipelineStage::Resolving);
        let locator = candidate.locator.as_ref().ok_or(PipelineError::NoLocator)?;
        let descriptor = self.resolver.resolve(locator).await?;
        tracing::info!(
            name = %descriptor.name,
            info_hash = descriptor.info_hash.as_deref().unwrap_or("-"),
            metadata = descriptor.has_metadata(),
            "descriptor resolved"
        );
        Ok(Acquired {
            candidate,
            descriptor,
            subtitles,
        })
    }

    /// Start the engine, telemetry and file server for `acquired`.
    ///
    /// Anything that fails once the engine is up closes it again, removing
    /// the buffer directory when `options.remove` is set.
    pub async fn start_streaming(
        &self,
        acquired: Acquired,
        backend: &dyn EngineBackend,
        mut options: StreamOptions,
        keys: &mut mpsc::Receiver<SelectionKey>,
        observer: &mut dyn PipelineObserver,
    ) -> Result<StreamingSession, PipelineError> {
        let started = TorrentSession::start(
            backend,
            acquired.descriptor.clone(),
            &options.engine,
            |peers| observer.wire(peers),
        )
        .await;
        let (session, events) = match started {
            Ok(started) => started,
            Err(e) => {
                if options.remove {
                    remove_buffer(&options.engine.path).await;
                }
                return Err(e.into());
            }
        };
        let session = Arc::new(session);

        if let Some(listing) = options.list {
            match self.list_files(&session, listing, keys, observer).await {
                Ok(index) => options.server.index = Some(index),
                Err(e) => {
                    session.close(options.remove).await;
                    return Err(e);
                }
            }
        }

        let remove = options.remove;
        match serve(session.clone(), events, options).await {
            Ok((server, telemetry, control_events, selection, href)) => {
                observer.stage(PipelineStage::Streaming);
                tracing::info!(%href, ?selection, "streaming");
                Ok(StreamingSession {
                    session,
                    server,
                    telemetry,
                    control_events,
                    selection,
                    href,
                    acquired,
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, "streaming failed to start, closing engine");
                session.close(remove).await;
                Err(e)
            }
        }
    }

    /// Hand the file list to the observer. `Choose` waits for a letter and
    /// returns the picked index; `Print` ends the run with `Listed`.
    async fn list_files(
        &self,
        session: &TorrentSession,
        listing: FileListing,
        keys: &mut mpsc::Receiver<SelectionKey>,
        observer: &mut dyn PipelineObserver,
    ) -> Result<usize, PipelineError> {
        let files: Vec<FileInfo> = session.files().iter().map(|f| f.info.clone()).collect();
        observer.files(&files, listing);
        if listing == FileListing::Print {
            return Err(PipelineError::Listed);
        }

        let mut state = SelectionState::new(files.len());
        if let Some(index) = state.automatic() {
            return Ok(index);
        }
        while let Some(key) = keys.recv().await {
            match state.on_key(key) {
                SelectionOutcome::Chosen(index) => {
                    tracing::info!(index, name = %files[index].name, "file chosen");
                    return Ok(index);
                }
                SelectionOutcome::Interrupt => return Err(PipelineError::Cancelled),
                SelectionOutcome::Ignored => {}
            }
        }
        Err(PipelineError::Cancelled)
    }

    /// Every stage in order
    pub async fn run(
        &self,
        term: Option<&str>,
        keys: &mut mpsc::Receiver<SelectionKey>,
        backend: &dyn EngineBackend,
        options: StreamOptions,
        observer: &mut dyn PipelineObserver,
    ) -> Result<StreamingSession, PipelineError> {
        let mut candidates = self.search(term, observer).await?;
        let index = self.choose(&candidates, keys, observer).await?;
        let candidate = candidates.swap_remove(index);
        let acquired = self.acquire(candidate, observer).await?;
        self.start_streaming(acquired, backend, options, keys, observer).await
    }
}

/// Telemetry, file server and selection for a ready session
async fn serve(
    session: Arc<TorrentSession>,
    events: mpsc::Receiver<EngineEvent>,
    options: StreamOptions,
) -> Result<(FileServer, Telemetry, mpsc::Receiver<EngineEvent>, Selection, String), PipelineError> {
    let (telemetry_events, control_events) = route_events(events);
    let telemetry = Telemetry::spawn(session.engine().clone(), telemetry_events, SAMPLE_INTERVAL);
    let server = FileServer::bind(session.clone(), telemetry.subscribe(), options.server).await?;

    let selection = if options.all {
        Selection::All
    } else {
        Selection::Single(server.default_index())
    };
    session.begin_streaming(selection)?;

    let host = options.public_host.unwrap_or_else(public_host);
    let mut href = format!("http://{}:{}/", host, server.port());
    if options.all {
        href.push_str(".m3u");
    }
    Ok((server, telemetry, control_events, selection, href))
}

/// Best-effort removal of a buffer directory no session owns
pub async fn remove_buffer(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => tracing::info!(path = %path.display(), "removed buffer directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove buffer directory"),
    }
}

/// First non-loopback local address, or `localhost`
pub fn public_host() -> String {
    local_ip_address::local_ip()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|_| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_accepts_one_letter_once() {
        let mut state = SelectionState::new(3);
        assert_eq!(state.automatic(), None);
        assert_eq!(state.on_key(SelectionKey::Letter('z')), SelectionOutcome::Ignored);
        assert_eq!(state.on_key(SelectionKey::Letter('b')), SelectionOutcome::Chosen(1));
        assert!(state.is_done());
        assert_eq!(state.on_key(SelectionKey::Letter('a')), SelectionOutcome::Ignored);
        assert_eq!(state.on_key(SelectionKey::Interrupt), SelectionOutcome::Interrupt);
    }

    #[test]
    fn test_single_candidate_is_automatic() {
        assert_eq!(SelectionState::new(1).automatic(), Some(0));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(PipelineError::NoResults.exit_code(), ExitCode::Error);
        assert_eq!(PipelineError::MissingTerm.exit_code(), ExitCode::Error);
        assert_eq!(PipelineError::Cancelled.exit_code(), ExitCode::Interrupted);
        assert_eq!(PipelineError::Listed.exit_code(), ExitCode::Success);
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(PipelineStage::SubtitleLookup.to_string(), "subtitle lookup");
    }
}
