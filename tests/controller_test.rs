//! Playback Controller Tests
//!
//! Pause/resume bookkeeping, key handling and teardown against an
//! in-memory engine.

use macflix::controller::{
    ControlKey, ControllerInputs, ControllerOptions, ExitReason, Phase, PlaybackController,
};
use macflix::engine::memory::MemoryFile;
use macflix::engine::{EngineEvent, MemoryEngine};
use macflix::models::{EngineState, SwarmSnapshot, TorrentDescriptor};
use macflix::session::{Selection, TorrentSession};
use macflix::stream::SubtitleStager;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};

fn session_in(buffer: &Path) -> (Arc<MemoryEngine>, Arc<TorrentSession>) {
    let engine = Arc::new(
        MemoryEngine::new(vec![
            MemoryFile::zeroed("Show/ep1.mkv", 300),
            MemoryFile::zeroed("Show/ep2.mkv", 200),
            MemoryFile::zeroed("Show/ep3.mkv", 100),
        ])
        .with_path(buffer),
    );
    let descriptor = TorrentDescriptor {
        info_hash: None,
        name: "Show".into(),
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

fn snapshots() -> watch::Receiver<Arc<SwarmSnapshot>> {
    // The sender is dropped; the receiver keeps serving the last value
    watch::channel(Arc::new(SwarmSnapshot::default())).1
}

// =============================================================================
// Pause bookkeeping
// =============================================================================

#[test]
fn test_pause_time_is_excluded_from_elapsed() {
    let buffer = tempfile::tempdir().unwrap();
    let (_, session) = session_in(buffer.path());
    let mut ctl = PlaybackController::new(session, Selection::Single(0), interactive());
    let start = ctl.started();

    assert!(ctl.toggle(start + Duration::from_secs(1)).unwrap());
    assert!(ctl.toggle(start + Duration::from_secs(3)).unwrap());
    assert!(ctl.toggle(start + Duration::from_secs(5)).unwrap());

    // Frozen while paused
    assert_eq!(ctl.elapsed(start + Duration::from_secs(7)), Duration::from_secs(3));
    assert_eq!(ctl.elapsed(start + Duration::from_secs(9)), Duration::from_secs(3));

    assert!(ctl.toggle(start + Duration::from_secs(10)).unwrap());
    assert_eq!(ctl.playback().accumulated_pause(), Duration::from_secs(7));
    assert_eq!(ctl.elapsed(start + Duration::from_secs(12)), Duration::from_secs(5));
}

#[test]
fn test_resume_restores_only_the_streamed_file() {
    let buffer = tempfile::tempdir().unwrap();
    let (engine, session) = session_in(buffer.path());
    session.begin_streaming(Selection::Single(1)).unwrap();
    let mut ctl = PlaybackController::new(session, Selection::Single(1), interactive());
    let now = Instant::now();

    ctl.toggle(now).unwrap();
    assert_eq!(ctl.phase(), Phase::Paused);
    assert!(engine.selected().is_empty());
    assert!(ctl.view(now).paused);

    ctl.toggle(now + Duration::from_millis(10)).unwrap();
    assert_eq!(ctl.phase(), Phase::Running);
    assert_eq!(engine.selected(), vec![1]);
}

#[test]
fn test_non_interactive_cannot_pause() {
    let buffer = tempfile::tempdir().unwrap();
    let (engine, session) = session_in(buffer.path());
    session.begin_streaming(Selection::Single(0)).unwrap();
    let mut ctl =
        PlaybackController::new(session, Selection::Single(0), ControllerOptions::default());

    assert!(!ctl.can_toggle());
    assert!(!ctl.toggle(Instant::now()).unwrap());
    assert_eq!(engine.selected(), vec![0]);
    assert!(!ctl.view(Instant::now()).can_pause);
}

// =============================================================================
// Run loop
// =============================================================================

#[tokio::test]
async fn test_keys_pause_then_interrupt() {
    let buffer = tempfile::tempdir().unwrap();
    let (engine, session) = session_in(buffer.path());
    session.begin_streaming(Selection::Single(0)).unwrap();
    let ctl = PlaybackController::new(session.clone(), Selection::Single(0), interactive());

    let (keys_tx, keys) = mpsc::channel(4);
    keys_tx.send(ControlKey::TogglePause).await.unwrap();
    keys_tx.send(ControlKey::Interrupt).await.unwrap();
    let (_events_tx, events) = mpsc::channel(4);

    let mut views = Vec::new();
    let reason = ctl
        .run(
            ControllerInputs {
                shutdown: std::future::pending::<()>(),
                keys: Some(keys),
                events,
                player: None,
                snapshots: snapshots(),
            },
            |_, view| views.push(view),
        )
        .await;

    assert_eq!(reason, ExitReason::Interrupt);
    assert!(views.iter().any(|v| v.paused));
    assert!(engine.is_closed());
    assert_eq!(session.state(), EngineState::Closed);
}

#[tokio::test]
async fn test_engine_interest_reaches_swarm_during_run() {
    let buffer = tempfile::tempdir().unwrap();
    let (engine, session) = session_in(buffer.path());
    let ctl = PlaybackController::new(session, Selection::Single(0), interactive());

    let (events_tx, events) = mpsc::channel(4);
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let watcher = engine.clone();
    tokio::spawn(async move {
        events_tx.send(EngineEvent::Uninterested).await.unwrap();
        for _ in 0..200 {
            if watcher.is_swarm_paused() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let _ = stop_tx.send(());
    });

    let reason = ctl
        .run(
            ControllerInputs {
                shutdown: async {
                    let _ = stop_rx.await;
                },
                keys: None,
                events,
                player: None,
                snapshots: snapshots(),
            },
            |_, _| {},
        )
        .await;

    assert_eq!(reason, ExitReason::Signal);
    assert!(engine.is_swarm_paused());
}

#[cfg(unix)]
#[tokio::test]
async fn test_player_exit_ends_session() {
    let buffer = tempfile::tempdir().unwrap();
    let (_, session) = session_in(buffer.path());
    let ctl = PlaybackController::new(
        session.clone(),
        Selection::Single(0),
        ControllerOptions {
            interactive: true,
            player_owns_playback: true,
            ..Default::default()
        },
    );
    let player = tokio::process::Command::new("sh")
        .args(["-c", "exit 3"])
        .spawn()
        .unwrap();
    let (_events_tx, events) = mpsc::channel(1);

    let reason = ctl
        .run(
            ControllerInputs {
                shutdown: std::future::pending::<()>(),
                keys: None,
                events,
                player: Some(player),
                snapshots: snapshots(),
            },
            |_, view| assert!(!view.can_pause),
        )
        .await;

    assert_eq!(reason, ExitReason::PlayerExited(Some(3)));
    assert_eq!(session.state(), EngineState::Closed);
}

// =============================================================================
// Cleanup
// =============================================================================

#[tokio::test]
async fn test_cleanup_removes_buffer_and_subtitles() {
    let root = tempfile::tempdir().unwrap();
    let buffer = root.path().join("buffer");
    let staging = root.path().join("subs");
    std::fs::create_dir_all(&buffer).unwrap();
    std::fs::create_dir_all(&staging).unwrap();
    std::fs::write(buffer.join("ep1.mkv"), b"data").unwrap();
    std::fs::write(staging.join("subtitle_1.srt"), b"1").unwrap();
    std::fs::write(staging.join("notes.txt"), b"keep").unwrap();

    let (_, session) = session_in(&buffer);
    let mut ctl = PlaybackController::new(
        session,
        Selection::Single(0),
        ControllerOptions {
            remove: true,
            ..Default::default()
        },
    )
    .with_subtitles(SubtitleStager::new(&staging));

    ctl.begin_terminate(ExitReason::Signal);
    ctl.cleanup().await;
    ctl.cleanup().await;

    assert!(!buffer.exists());
    assert!(!staging.join("subtitle_1.srt").exists());
    assert!(staging.join("notes.txt").exists());
}

#[tokio::test]
async fn test_cleanup_keeps_files_without_remove() {
    let root = tempfile::tempdir().unwrap();
    let buffer = root.path().join("buffer");
    std::fs::create_dir_all(&buffer).unwrap();

    let (engine, session) = session_in(&buffer);
    let mut ctl = PlaybackController::new(session, Selection::Single(0), interactive());
    ctl.cleanup().await;

    assert!(buffer.exists());
    assert!(engine.is_closed());
}
