//! Run wiring
//!
//! Resolves settings, drives the acquisition pipeline with terminal
//! feedback, starts delivery (player, AirPlay, hooks) and hands the live
//! session to the playback controller. Returns the process exit code.

use crate::api::OpenSubtitlesClient;
use crate::cli::{is_interactive, Cli, ExitCode, Output};
use crate::config::{Config, Settings};
use crate::controller::{
    ControlKey, ControllerInputs, ControllerOptions, ExitReason, PlaybackController,
};
use crate::engine::{Blocklist, EngineOptions, RqbitBackend};
use crate::logging;
use crate::models::{format_bytes, AcquisitionCandidate, FileInfo};
use crate::pipeline::{
    remove_buffer, FileListing, Pipeline, PipelineObserver, PipelineStage, SelectionKey,
    StreamOptions,
};
use crate::server::ServerConfig;
use crate::stream::player::spawn_hook;
use crate::stream::{airplay, LocalPlayer, PlayerOptions, SubtitleStager};
use crate::ui::dashboard::Dashboard;
use crate::ui::{picker, DashboardView};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// How long the key reader blocks before rechecking its stop flag
const KEY_POLL: Duration = Duration::from_millis(100);

// =============================================================================
// Entry
// =============================================================================

pub async fn run(cli: Cli) -> ExitCode {
    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let output = Output::new(cli.quiet);

    let settings = match Settings::resolve(&cli, config) {
        Ok(settings) => settings,
        Err(e) => {
            let code = e.exit_code();
            return output.error(e, code);
        }
    };
    let output = Output::new(settings.quiet);
    if let Err(e) = logging::init(&settings.logging) {
        output.info(format!("logging disabled: {e}"));
    }

    stream(settings, &output).await
}

async fn stream(settings: Settings, output: &Output) -> ExitCode {
    output.info("Welcome to macflix");
    let interactive = is_interactive();

    let stager = SubtitleStager::new(&settings.subtitle_dir);
    let mut pipeline = Pipeline::new(settings.source.provider(), stager.clone());
    if let Some(language) = &settings.language {
        pipeline = pipeline.with_subtitles(OpenSubtitlesClient::new(), language.clone());
    }
    if let Some(file) = &settings.subtitle_file {
        pipeline = pipeline.with_subtitle_file(file);
    }

    let options = StreamOptions {
        engine: engine_options(&settings),
        server: ServerConfig {
            host: settings.bind,
            port: settings.port,
            index: settings.index,
            idle_timeout: settings.idle_timeout,
            filter: None,
        },
        all: settings.all,
        public_host: settings.hostname.clone(),
        remove: settings.remove,
        list: settings.list.then_some(if interactive {
            FileListing::Choose
        } else {
            FileListing::Print
        }),
    };

    // A single press picks a row on a terminal; piped input picks by line
    let (selection_tx, mut keys) = mpsc::channel(16);
    let mut observer = TerminalObserver {
        output,
        term: settings.term.clone(),
        interactive,
        quiet: settings.quiet,
        selection_tx: interactive.then_some(selection_tx),
        reader: None,
        dashboard: None,
    };
    if !interactive {
        keys = line_keys();
    }

    let backend = RqbitBackend::new();
    let run = pipeline.run(
        settings.term.as_deref(),
        &mut keys,
        &backend,
        options,
        &mut observer,
    );
    // A signal before the controller takes over still cleans up
    let result = tokio::select! {
        result = run => Some(result),
        _ = shutdown_signal() => None,
    };
    observer.stop_reader();

    let live = match result {
        Some(Ok(live)) => live,
        Some(Err(e)) => {
            drop(observer.dashboard.take());
            if settings.remove {
                stager.cleanup(None).await;
            }
            let code = e.exit_code();
            if code == ExitCode::Success {
                return code;
            }
            return output.error(e, code);
        }
        None => {
            drop(observer.dashboard.take());
            if settings.remove {
                stager.cleanup(None).await;
                remove_buffer(&settings.path).await;
            }
            output.info("macflix is exiting...");
            return ExitCode::Interrupted;
        }
    };

    let href = live.href.clone();
    if let Some(cmd) = &settings.on_listening {
        if let Err(e) = spawn_hook(cmd, Some(&href)) {
            tracing::warn!(error = %e, "on-listening hook failed");
        }
    }

    let mut target = None;
    let mut player = None;
    if settings.airplay {
        target = Some("AirPlay".to_string());
        let href = href.clone();
        tokio::spawn(async move {
            match airplay::discover().await {
                Ok(device) => {
                    if let Err(e) = device.play(&href).await {
                        tracing::warn!(error = %e, "AirPlay playback failed");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "AirPlay discovery failed"),
            }
        });
    } else if let Some(kind) = settings.player {
        let staged = settings.subtitle_file.is_none() && !live.acquired.subtitles.is_empty();
        let player_options = PlayerOptions {
            on_top: settings.on_top,
            subtitle: live.acquired.subtitles.first().cloned(),
            subtitle_dir: staged.then(|| stager.dir().to_path_buf()),
            extra_args: settings.player_args.clone(),
        };
        match LocalPlayer::new(kind).launch(&live.local_href(), &player_options) {
            Ok(child) => {
                target = Some(kind.to_string());
                player = Some(child);
            }
            Err(e) => {
                drop(observer.dashboard.take());
                let mut controller = build_controller(&live, &settings, false, false, stager);
                controller.begin_terminate(ExitReason::PlayerExited(None));
                controller.cleanup().await;
                return output.error(e, ExitCode::Error);
            }
        }
    }

    if settings.quiet {
        output.print(format!("server is listening on {href}"));
    }

    let show_dashboard = interactive && !settings.quiet;
    let mut dashboard = if show_dashboard {
        match observer.dashboard.take().map(Ok).unwrap_or_else(Dashboard::new) {
            Ok(dashboard) => Some(dashboard),
            Err(e) => {
                tracing::warn!(error = %e, "dashboard unavailable");
                None
            }
        }
    } else {
        None
    };

    let (key_reader, control_keys) = if show_dashboard {
        let (tx, rx) = mpsc::channel(16);
        (Some(KeyReader::spawn(tx, control_key)), Some(rx))
    } else {
        (None, None)
    };

    let has_player = player.is_some();
    let controller = build_controller(&live, &settings, show_dashboard, has_player, stager);
    let (title, length) = live.title();
    let path = live.session.path().display().to_string();

    let crate::pipeline::StreamingSession {
        control_events,
        telemetry,
        server,
        ..
    } = live;

    let inputs = ControllerInputs {
        shutdown: shutdown_signal(),
        keys: control_keys,
        events: control_events,
        player,
        snapshots: telemetry.subscribe(),
    };
    let reason = controller
        .run(inputs, |snapshot, playback| {
            if let Some(dashboard) = dashboard.as_mut() {
                let view = DashboardView {
                    target: target.as_deref(),
                    href: &href,
                    title: &title,
                    length,
                    path: &path,
                    snapshot,
                    elapsed: playback.elapsed,
                    paused: playback.paused,
                    can_pause: playback.can_pause,
                };
                if let Err(e) = dashboard.draw(&view) {
                    tracing::debug!(error = %e, "dashboard draw failed");
                }
            }
        })
        .await;

    server.shutdown();
    drop(dashboard);
    drop(key_reader);
    tracing::info!(?reason, "macflix exiting");
    output.info("macflix is exiting...");
    ExitCode::Success
}

fn engine_options(settings: &Settings) -> EngineOptions {
    let blocklist = match &settings.blocklist {
        Some(path) => Blocklist::load(path).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "blocklist unreadable, ignoring");
            Blocklist::default()
        }),
        None => Blocklist::default(),
    };
    EngineOptions {
        connections: settings.connections,
        peer_port: settings.peer_port,
        path: settings.path.clone(),
        blocklist,
        blocklist_path: settings.blocklist.clone(),
        peers: settings.peers.clone(),
        ..Default::default()
    }
}

fn build_controller(
    live: &crate::pipeline::StreamingSession,
    settings: &Settings,
    interactive: bool,
    player_owns_playback: bool,
    stager: SubtitleStager,
) -> PlaybackController {
    PlaybackController::new(
        live.session.clone(),
        live.selection,
        ControllerOptions {
            interactive,
            player_owns_playback,
            remove: settings.remove,
            on_downloaded: settings.on_downloaded.clone(),
            no_quit: settings.no_quit,
        },
    )
    .with_subtitles(stager)
}

// =============================================================================
// Terminal feedback
// =============================================================================

struct TerminalObserver<'a> {
    output: &'a Output,
    term: Option<String>,
    interactive: bool,
    quiet: bool,
    selection_tx: Option<mpsc::Sender<SelectionKey>>,
    /// Raw-mode reader, alive only while a table waits for a letter
    reader: Option<KeyReader>,
    /// Opened on the first metadata wire and reused for the dashboard
    dashboard: Option<Dashboard>,
}

impl TerminalObserver<'_> {
    fn read_selection(&mut self) {
        self.stop_reader();
        if let Some(tx) = &self.selection_tx {
            self.reader = Some(KeyReader::spawn(tx.clone(), selection_key));
        }
    }

    fn stop_reader(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            reader.stop();
        }
    }
}

impl PipelineObserver for TerminalObserver<'_> {
    fn stage(&mut self, stage: PipelineStage) {
        if !matches!(stage, PipelineStage::Searching | PipelineStage::Listing) {
            self.stop_reader();
        }
        match stage {
            PipelineStage::Searching => match &self.term {
                Some(term) => self.output.info(format!("searching for {term}...")),
                None => self.output.info("fetching top torrents..."),
            },
            PipelineStage::SubtitleLookup => self.output.info("Searching subtitles..."),
            PipelineStage::SubtitleDownload => self.output.info("downloading subtitles..."),
            PipelineStage::Resolving => self.output.info("starting download..."),
            _ => {}
        }
    }

    fn candidates(&mut self, candidates: &[AcquisitionCandidate]) {
        if candidates.len() == 1 {
            return;
        }
        if self.interactive {
            if let Err(e) = picker::show(candidates, "Select source:") {
                tracing::debug!(error = %e, "candidate table failed");
            }
            self.read_selection();
        } else {
            for (i, c) in candidates.iter().enumerate() {
                let key = picker::key_for(i).unwrap_or(' ');
                self.output.print(format!("{key}  {c}"));
            }
        }
    }

    fn files(&mut self, files: &[FileInfo], listing: FileListing) {
        drop(self.dashboard.take());
        if listing == FileListing::Choose && files.len() > 1 && self.interactive {
            if let Err(e) = picker::show_files(files, "Select file:") {
                tracing::debug!(error = %e, "file table failed");
            }
            self.read_selection();
            return;
        }
        for (i, f) in files.iter().enumerate() {
            let key = picker::key_for(i).unwrap_or(' ');
            self.output.print(format!("{key}  {}  ({})", f.path, format_bytes(f.length)));
        }
    }

    fn subtitles_found(&mut self, count: usize) {
        if count == 0 {
            self.output.info("No subtitles found");
        } else {
            self.output.info(format!("Found {count} subtitles"));
        }
    }

    fn wire(&mut self, peers: usize) {
        if self.quiet || !self.interactive {
            return;
        }
        if self.dashboard.is_none() {
            match Dashboard::new() {
                Ok(dashboard) => self.dashboard = Some(dashboard),
                Err(e) => {
                    tracing::debug!(error = %e, "metadata banner unavailable");
                    return;
                }
            }
        }
        if let Some(dashboard) = self.dashboard.as_mut() {
            let _ = dashboard.draw_banner(peers);
        }
    }
}

// =============================================================================
// Keys and signals
// =============================================================================

fn is_ctrl(key: &KeyEvent, c: char) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char(c)
}

/// Letters pick a row, Ctrl+C cancels
pub fn selection_key(key: &KeyEvent) -> Option<SelectionKey> {
    if is_ctrl(key, 'c') {
        return Some(SelectionKey::Interrupt);
    }
    match key.code {
        KeyCode::Char(c) if key.modifiers.is_empty() || key.modifiers == KeyModifiers::SHIFT => {
            Some(SelectionKey::Letter(c))
        }
        _ => None,
    }
}

/// Space pauses, Ctrl+L opens the buffer, Ctrl+C quits
pub fn control_key(key: &KeyEvent) -> Option<ControlKey> {
    if is_ctrl(key, 'c') {
        Some(ControlKey::Interrupt)
    } else if is_ctrl(key, 'l') {
        Some(ControlKey::OpenBuffer)
    } else if key.code == KeyCode::Char(' ') {
        Some(ControlKey::TogglePause)
    } else {
        None
    }
}

/// Reads terminal keys on a thread in raw mode until stopped or dropped
struct KeyReader {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl KeyReader {
    fn spawn<T: Send + 'static>(tx: mpsc::Sender<T>, map: fn(&KeyEvent) -> Option<T>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::spawn(move || {
            if enable_raw_mode().is_err() {
                return;
            }
            while !flag.load(Ordering::Relaxed) {
                match event::poll(KEY_POLL) {
                    Ok(true) => match event::read() {
                        Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                            if let Some(value) = map(&key) {
                                if tx.blocking_send(value).is_err() {
                                    break;
                                }
                            }
                        }
                        Ok(_) => {}
                        Err(_) => break,
                    },
                    Ok(false) => {}
                    Err(_) => break,
                }
            }
            let _ = disable_raw_mode();
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Blocks for at most one poll interval
    fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for KeyReader {
    fn drop(&mut self) {
        self.stop();
    }
}

/// First character of each stdin line as a selection key
fn line_keys() -> mpsc::Receiver<SelectionKey> {
    let (tx, rx) = mpsc::channel(4);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(c) = line.trim().chars().next() {
                if tx.send(SelectionKey::Letter(c)).await.is_err() {
                    break;
                }
            }
        }
    });
    rx
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn test_selection_keys() {
        assert_eq!(
            selection_key(&key(KeyCode::Char('b'), KeyModifiers::NONE)),
            Some(SelectionKey::Letter('b'))
        );
        assert_eq!(
            selection_key(&key(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(SelectionKey::Interrupt)
        );
        assert_eq!(selection_key(&key(KeyCode::Enter, KeyModifiers::NONE)), None);
    }

    #[test]
    fn test_control_keys() {
        assert_eq!(
            control_key(&key(KeyCode::Char(' '), KeyModifiers::NONE)),
            Some(ControlKey::TogglePause)
        );
        assert_eq!(
            control_key(&key(KeyCode::Char('l'), KeyModifiers::CONTROL)),
            Some(ControlKey::OpenBuffer)
        );
        assert_eq!(
            control_key(&key(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(ControlKey::Interrupt)
        );
        assert_eq!(control_key(&key(KeyCode::Char('x'), KeyModifiers::NONE)), None);
    }
}
