//! CLI - Command Line Interface for macflix
//!
//! # Examples
//!
//! ```bash
//! # Search, pick a row, stream it to VLC
//! macflix "big buck bunny" --vlc
//!
//! # Browse the top listing of YTS and send the pick to an AirPlay receiver
//! macflix browse --source yts --airplay
//!
//! # Everything after -- goes to the player
//! macflix sintel --vlc -- --fullscreen
//! ```

use crate::stream::PlayerType;
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

/// Search term that lists top torrents instead of searching
pub const BROWSE: &str = "browse";

// =============================================================================
// Exit Codes
// =============================================================================

/// Process exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    /// Missing term, invalid source, no results, unresolvable torrent
    Error = 1,
    /// Cancelled from the keyboard before streaming started
    Interrupted = 130,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> std::process::ExitCode {
        std::process::ExitCode::from(code as u8)
    }
}

// =============================================================================
// Main CLI Structure
// =============================================================================

/// macflix - search, pick and stream torrents while they download
#[derive(Parser, Debug, Default)]
#[command(
    name = "macflix",
    version,
    about = "Search, pick and stream torrents to your player while they download",
    after_help = "EXAMPLES:\n\
                  macflix \"big buck bunny\" --vlc     Search and play in VLC\n\
                  macflix browse -s yts              Browse the YTS top listing\n\
                  macflix sintel -a --mpv            Stream every file as a playlist\n\n\
                  Options passed after -- will be passed to your player.\n\
                  Autoplay can take several seconds to start since it needs to wait for the first piece."
)]
pub struct Cli {
    /// Movie or series to search for, or "browse"
    pub term: Option<String>,

    /// Max connected peers
    #[arg(long, short = 'c')]
    pub connections: Option<usize>,

    /// HTTP port
    #[arg(long, short = 'p')]
    pub port: Option<u16>,

    /// Index of the streamed file
    #[arg(long, short = 'i')]
    pub index: Option<usize>,

    /// List the files in the torrent and pick one
    #[arg(long, short = 'l')]
    pub list: bool,

    /// Subtitle language (eng, por, ...)
    #[arg(long, short = 'L')]
    pub language: Option<String>,

    /// Load this subtitle file instead of looking one up
    #[arg(long = "subtitles", short = 't', value_name = "FILE")]
    pub subtitles: Option<PathBuf>,

    /// Skip the subtitle lookup
    #[arg(long)]
    pub no_subtitles: bool,

    /// Torrent source: pirate-bay, yts (yify)
    #[arg(long, short = 's')]
    pub source: Option<String>,

    /// Buffer directory
    #[arg(long, short = 'f')]
    pub path: Option<PathBuf>,

    /// Blocklist file of `description:start-end` ranges
    #[arg(long, short = 'b')]
    pub blocklist: Option<PathBuf>,

    /// Select every file in the torrent and serve a playlist
    #[arg(long, short = 'a')]
    pub all: bool,

    /// Host name or IP to bind the server to
    #[arg(long, short = 'H')]
    pub hostname: Option<String>,

    /// Add a peer by ip:port (repeatable)
    #[arg(long = "peer", short = 'e')]
    pub peers: Vec<String>,

    /// Peer listening port
    #[arg(long, short = 'x')]
    pub peer_port: Option<u16>,

    /// No dashboard, just print the address
    #[arg(long, short = 'q')]
    pub quiet: bool,

    /// Do not keep the video window on top
    #[arg(long = "not-on-top", short = 'd')]
    pub not_on_top: bool,

    /// Keep streaming after the player exits
    #[arg(long, short = 'n')]
    pub no_quit: bool,

    /// Keep the buffer and subtitle files on exit
    #[arg(long)]
    pub keep: bool,

    /// Autoplay in this player
    #[arg(long, value_enum)]
    pub player: Option<PlayerType>,

    /// Autoplay in VLC
    #[arg(long, conflicts_with_all = ["player", "mpv"])]
    pub vlc: bool,

    /// Autoplay in mpv
    #[arg(long, conflicts_with = "player")]
    pub mpv: bool,

    /// Autoplay via AirPlay
    #[arg(long, short = 'v')]
    pub airplay: bool,

    /// Command to run when the download completes
    #[arg(long, value_name = "CMD")]
    pub on_downloaded: Option<String>,

    /// Command to run when the server is live (the address is appended)
    #[arg(long, value_name = "CMD")]
    pub on_listening: Option<String>,

    /// Path to config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Arguments passed through to the player
    #[arg(last = true)]
    pub player_args: Vec<String>,
}

impl Cli {
    /// `None` means browse mode
    pub fn search_term(&self) -> Option<Option<&str>> {
        let term = self.term.as_deref()?.trim();
        if term.is_empty() {
            return None;
        }
        Some((!term.eq_ignore_ascii_case(BROWSE)).then_some(term))
    }

    /// Player picked on the command line, if any
    pub fn player_choice(&self) -> Option<PlayerType> {
        if self.vlc {
            Some(PlayerType::Vlc)
        } else if self.mpv {
            Some(PlayerType::Mpv)
        } else {
            self.player
        }
    }
}

/// Whether both ends of the terminal are interactive
pub fn is_interactive() -> bool {
    std::io::stdin().is_terminal() && std::io::stdout().is_terminal()
}

// =============================================================================
// Output Helpers
// =============================================================================

/// Output handler for consistent formatting
pub struct Output {
    pub quiet: bool,
}

impl Output {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    /// Print a line the user asked for, even in quiet mode
    pub fn print(&self, msg: impl std::fmt::Display) {
        println!("{}", msg);
    }

    /// Print error and return exit code
    pub fn error(&self, msg: impl std::fmt::Display, code: ExitCode) -> ExitCode {
        eprintln!("Error: {}", msg);
        code
    }

    /// Print info message (suppressed in quiet mode)
    pub fn info(&self, msg: impl std::fmt::Display) {
        if !self.quiet {
            eprintln!("{}", msg);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
