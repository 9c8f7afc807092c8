//! macflix - search, pick and stream torrents while they download
//!
//! A terminal tool that finds a torrent, optionally fetches a subtitle,
//! starts a streaming engine and serves the selected file over HTTP with
//! Range support, so a media player can start before the download ends.
//!
//! # Modules
//!
//! - `models` - Candidates, descriptors, swarm snapshots, playback state
//! - `api` - Search providers (PirateBay, YTS) and OpenSubtitles
//! - `torrent` - Locator resolution into torrent descriptors
//! - `engine` - Streaming engine trait with librqbit and in-memory backends
//! - `session` - One running torrent and its file handles
//! - `telemetry` - Periodic swarm snapshots
//! - `server` - HTTP file server, playlist and JSON status
//! - `stream` - Players, AirPlay and subtitle staging
//! - `pipeline` - Search to streaming, stage by stage
//! - `controller` - Pause, resume and shutdown of a live session
//! - `ui` - Selection table and dashboard

pub mod api;
pub mod cli;
pub mod commands;
pub mod config;
pub mod controller;
pub mod engine;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod server;
pub mod session;
pub mod stream;
pub mod telemetry;
pub mod torrent;
pub mod ui;

pub use api::{OpenSubtitlesClient, PirateBayClient, SearchProvider, Source, YtsClient};
pub use cli::{Cli, ExitCode};
pub use controller::PlaybackController;
pub use models::{AcquisitionCandidate, Locator, SwarmSnapshot, TorrentDescriptor};
pub use pipeline::{Pipeline, PipelineError, PipelineStage};
pub use server::{FileServer, ServerConfig};
pub use session::{Selection, TorrentSession};
