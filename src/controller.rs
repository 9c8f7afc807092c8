//! Playback session controller
//!
//! Owns the session-local playback state. Pausing deselects the streamed
//! file(s) on the engine and resuming selects them again. The run loop
//! multiplexes signals, the player process, keypresses, engine interest
//! events and the one second dashboard tick, and performs cleanup exactly
//! once when it leaves.

use crate::engine::{EngineError, EngineEvent};
use crate::models::{PlaybackState, SwarmSnapshot};
use crate::session::{Selection, TorrentSession};
use crate::stream::player::{open_location, spawn_hook};
use crate::stream::SubtitleStager;
use std::future::Future;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Child;
use tokio::sync::{mpsc, watch};

/// Dashboard refresh period
pub const RENDER_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    Paused,
    Terminating,
}

/// Keys the controller reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKey {
    TogglePause,
    Interrupt,
    OpenBuffer,
}

/// Why the session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Interrupt or terminate signal
    Signal,
    /// Ctrl+C read from the terminal in raw mode
    Interrupt,
    /// The player process exited, with its code when it had one
    PlayerExited(Option<i32>),
}

/// Playback values a dashboard frame needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackView {
    pub elapsed: Duration,
    pub paused: bool,
    pub can_pause: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ControllerOptions {
    /// Running in an interactive terminal
    pub interactive: bool,
    /// An external player drives playback and owns pausing
    pub player_owns_playback: bool,
    /// Remove staged subtitles and the buffer directory on exit
    pub remove: bool,
    /// Run once the engine first reports it needs nothing more
    pub on_downloaded: Option<String>,
    /// Keep streaming after the player exits
    pub no_quit: bool,
}

/// Everything the run loop listens to
pub struct ControllerInputs<S> {
    pub shutdown: S,
    pub keys: Option<mpsc::Receiver<ControlKey>>,
    pub events: mpsc::Receiver<EngineEvent>,
    pub player: Option<Child>,
    pub snapshots: watch::Receiver<Arc<SwarmSnapshot>>,
}

pub struct PlaybackController {
    session: Arc<TorrentSession>,
    selection: Selection,
    playback: PlaybackState,
    phase: Phase,
    started: Instant,
    can_toggle: bool,
    remove: bool,
    on_downloaded: Option<String>,
    downloaded_fired: bool,
    no_quit: bool,
    subtitles: Option<SubtitleStager>,
    cleaned_up: bool,
}

impl PlaybackController {
    /// Controller for a session whose server has started listening
    pub fn new(session: Arc<TorrentSession>, selection: Selection, options: ControllerOptions) -> Self {
        Self {
            session,
            selection,
            playback: PlaybackState::new(),
            phase: Phase::Running,
            started: Instant::now(),
            can_toggle: options.interactive && !options.player_owns_playback,
            remove: options.remove,
            on_downloaded: options.on_downloaded.filter(|c| !c.trim().is_empty()),
            downloaded_fired: false,
            no_quit: options.no_quit,
            subtitles: None,
            cleaned_up: false,
        }
    }

    /// Staged subtitles to remove on exit
    pub fn with_subtitles(mut self, stager: SubtitleStager) -> Self {
        self.subtitles = Some(stager);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn playback(&self) -> &PlaybackState {
        &self.playback
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    pub fn can_toggle(&self) -> bool {
        self.can_toggle
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    /// Runtime net of every pause, including one in progress
    pub fn elapsed(&self, now: Instant) -> Duration {
        self.playback.elapsed(self.started, now)
    }

    pub fn view(&self, now: Instant) -> PlaybackView {
        PlaybackView {
            elapsed: self.elapsed(now),
            paused: self.playback.is_paused(),
            can_pause: self.can_toggle,
        }
    }

    /// Flip between running and paused. Returns whether anything changed.
    pub fn toggle(&mut self, now: Instant) -> Result<bool, EngineError> {
        if !self.can_toggle {
            return Ok(false);
        }
        match self.phase {
            Phase::Running => {
                self.session.deselect(self.selection)?;
                self.playback.pause(now);
                self.phase = Phase::Paused;
                tracing::info!(selection = ?self.selection, "playback paused");
            }
            Phase::Paused => {
                self.session.select(self.selection)?;
                self.playback.resume(now);
                self.phase = Phase::Running;
                tracing::info!(
                    paused_total = ?self.playback.accumulated_pause(),
                    "playback resumed"
                );
            }
            Phase::Terminating => return Ok(false),
        }
        Ok(true)
    }

    /// React to an engine interest change
    pub fn on_engine_event(&mut self, event: &EngineEvent) {
        let engine = self.session.engine();
        match event {
            EngineEvent::Uninterested => {
                tracing::debug!("engine uninterested, pausing swarm");
                engine.pause_swarm();
                if !self.downloaded_fired {
                    self.downloaded_fired = true;
                    if let Some(cmd) = &self.on_downloaded {
                        if let Err(e) = spawn_hook(cmd, None) {
                            tracing::warn!(error = %e, "on-downloaded hook failed");
                        }
                    }
                }
            }
            EngineEvent::Interested => {
                tracing::debug!("engine interested, resuming swarm");
                engine.resume_swarm();
            }
            _ => {}
        }
    }

    /// Enter Terminating. Only the first call has an effect.
    pub fn begin_terminate(&mut self, reason: ExitReason) -> bool {
        if self.phase == Phase::Terminating {
            return false;
        }
        tracing::info!(?reason, "session terminating");
        self.phase = Phase::Terminating;
        true
    }

    /// Best-effort removal of staged subtitles and the buffer directory,
    /// then engine shutdown. Safe to call more than once.
    pub async fn cleanup(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;
        if self.remove {
            if let Some(stager) = &self.subtitles {
                let removed = stager.cleanup(Some(self.session.path())).await;
                tracing::debug!(removed, "subtitles removed");
            }
        }
        self.session.close(self.remove).await;
    }

    /// Drive the session until a signal, an interrupt key or the player
    /// exiting. `render` is called on every tick and every pause edge.
    pub async fn run<S, R>(mut self, inputs: ControllerInputs<S>, mut render: R) -> ExitReason
    where
        S: Future<Output = ()>,
        R: FnMut(&SwarmSnapshot, PlaybackView),
    {
        let ControllerInputs {
            shutdown,
            mut keys,
            mut events,
            mut player,
            snapshots,
        } = inputs;
        tokio::pin!(shutdown);

        let mut draw = |this: &Self| {
            let snapshot = snapshots.borrow().clone();
            render(&snapshot, this.view(Instant::now()));
        };

        let mut ticker = tokio::time::interval(RENDER_INTERVAL);
        let mut events_open = true;

        let reason = loop {
            tokio::select! {
                _ = &mut shutdown => break ExitReason::Signal,
                status = wait_player(&mut player) => {
                    let code = match status {
                        Ok(status) => status.code(),
                        Err(e) => {
                            tracing::warn!(error = %e, "lost track of player process");
                            None
                        }
                    };
                    tracing::info!(?code, "player exited");
                    if self.no_quit {
                        player = None;
                        continue;
                    }
                    break ExitReason::PlayerExited(code);
                }
                key = next_key(&mut keys) => match key {
                    Some(ControlKey::TogglePause) => {
                        match self.toggle(Instant::now()) {
                            Ok(true) => draw(&self),
                            Ok(false) => {}
                            Err(e) => tracing::warn!(error = %e, "pause toggle failed"),
                        }
                    }
                    Some(ControlKey::OpenBuffer) => {
                        if let Err(e) = open_location(self.session.path()) {
                            tracing::warn!(error = %e, "could not open buffer location");
                        }
                    }
                    Some(ControlKey::Interrupt) => break ExitReason::Interrupt,
                    None => keys = None,
                },
                event = events.recv(), if events_open => match event {
                    Some(event) => self.on_engine_event(&event),
                    None => events_open = false,
                },
                _ = ticker.tick() => draw(&self),
            }
        };

        self.begin_terminate(reason);
        if let Some(child) = player.as_mut() {
            stop_player(child);
        }
        self.cleanup().await;
        reason
    }
}

/// Ask the player to exit. Returns whether the kill was delivered.
fn stop_player(child: &mut Child) -> bool {
    match child.start_kill() {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(error = %e, "failed to stop player");
            false
        }
    }
}

async fn wait_player(player: &mut Option<Child>) -> std::io::Result<ExitStatus> {
    match player {
        Some(child) => child.wait().await,
        None => std::future::pending().await,
    }
}

async fn next_key(keys: &mut Option<mpsc::Receiver<ControlKey>>) -> Option<ControlKey> {
    match keys {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::{MemoryEngine, MemoryFile};
    use crate::models::TorrentDescriptor;

    fn session() -> (Arc<MemoryEngine>, Arc<TorrentSession>) {
        let engine = Arc::new(MemoryEngine::new(vec![
            MemoryFile::zeroed("pack/a.mkv", 10),
            MemoryFile::zeroed("pack/b.mkv", 20),
        ]));
        let descriptor = TorrentDescriptor {
            info_hash: None,
            name: "pack".into(),
            trackers: vec![],
            info: None,
            metainfo: None,
        };
        let session = Arc::new(TorrentSession::attach(descriptor, engine.clone()));
        (engine, session)
    }

    fn interactive() -> ControllerOptions {
        ControllerOptions {
            interactive: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_toggle_is_noop_when_player_owns_playback() {
        let (engine, session) = session();
        session.begin_streaming(Selection::Single(1)).unwrap();
        let mut ctl = PlaybackController::new(
            session,
            Selection::Single(1),
            ControllerOptions {
                interactive: true,
                player_owns_playback: true,
                ..Default::default()
            },
        );
        assert!(!ctl.toggle(Instant::now()).unwrap());
        assert_eq!(ctl.phase(), Phase::Running);
        assert_eq!(engine.selected(), vec![1]);
    }

    #[test]
    fn test_toggle_all_files() {
        let (engine, session) = session();
        session.begin_streaming(Selection::All).unwrap();
        let mut ctl = PlaybackController::new(session, Selection::All, interactive());
        let now = Instant::now();
        assert!(ctl.toggle(now).unwrap());
        assert!(engine.selected().is_empty());
        assert!(ctl.toggle(now + Duration::from_secs(1)).unwrap());
        assert_eq!(engine.selected(), vec![0, 1]);
    }

    #[test]
    fn test_terminate_once() {
        let (_, session) = session();
        let mut ctl = PlaybackController::new(session, Selection::Single(0), interactive());
        assert!(ctl.begin_terminate(ExitReason::Signal));
        assert!(!ctl.begin_terminate(ExitReason::Signal));
        assert!(!ctl.toggle(Instant::now()).unwrap());
    }

    #[test]
    fn test_interest_drives_swarm() {
        let (engine, session) = session();
        let mut ctl = PlaybackController::new(session, Selection::Single(0), interactive());
        ctl.on_engine_event(&EngineEvent::Uninterested);
        assert!(engine.is_swarm_paused());
        ctl.on_engine_event(&EngineEvent::Interested);
        assert!(!engine.is_swarm_paused());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_and_cleans_up() {
        let (engine, session) = session();
        session.begin_streaming(Selection::Single(0)).unwrap();
        let ctl = PlaybackController::new(session.clone(), Selection::Single(0), interactive());
        let (_events_tx, events) = mpsc::channel(4);
        let (_snap_tx, snapshots) = watch::channel(Arc::new(SwarmSnapshot::default()));
        let inputs = ControllerInputs {
            shutdown: async {},
            keys: None,
            events,
            player: None,
            snapshots,
        };
        let reason = ctl.run(inputs, |_, _| {}).await;
        assert_eq!(reason, ExitReason::Signal);
        assert!(engine.is_closed());
        assert_eq!(session.state(), crate::models::EngineState::Closed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_player_after_exit_reports_failure() {
        let mut child = tokio::process::Command::new("true").spawn().unwrap();
        child.wait().await.unwrap();
        assert!(!stop_player(&mut child));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_no_quit_outlives_the_player() {
        let (engine, session) = session();
        session.begin_streaming(Selection::Single(0)).unwrap();
        let ctl = PlaybackController::new(
            session,
            Selection::Single(0),
            ControllerOptions {
                no_quit: true,
                ..interactive()
            },
        );
        let (_events_tx, events) = mpsc::channel(4);
        let (_snap_tx, snapshots) = watch::channel(Arc::new(SwarmSnapshot::default()));
        let player = tokio::process::Command::new("true").spawn().unwrap();
        let inputs = ControllerInputs {
            shutdown: tokio::time::sleep(Duration::from_millis(300)),
            keys: None,
            events,
            player: Some(player),
            snapshots,
        };
        let reason = ctl.run(inputs, |_, _| {}).await;
        assert_eq!(reason, ExitReason::Signal);
        assert!(engine.is_closed());
    }
}
