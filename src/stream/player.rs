//! Local player and hook commands
//!
//! Launches VLC or mpv against the stream URL and spawns the user's
//! `--on-listening` / `--on-downloaded` hooks detached from the terminal.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::{Child, Command};

/// Supported local players
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum PlayerType {
    #[default]
    Vlc,
    Mpv,
}

impl PlayerType {
    /// Executables to try, in order
    pub fn commands(&self) -> Vec<PathBuf> {
        match self {
            PlayerType::Vlc => {
                let mut cmds = vec![PathBuf::from("vlc")];
                if cfg!(target_os = "macos") {
                    cmds.push(PathBuf::from("/Applications/VLC.app/Contents/MacOS/VLC"));
                    if let Some(home) = dirs::home_dir() {
                        cmds.push(home.join("Applications/VLC.app/Contents/MacOS/VLC"));
                    }
                }
                cmds
            }
            PlayerType::Mpv => vec![PathBuf::from("mpv")],
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            PlayerType::Vlc => "VLC",
            PlayerType::Mpv => "mpv",
        }
    }
}

impl std::fmt::Display for PlayerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("Player '{0}' not found. Install it first.")]
    NotFound(String),
    #[error("Failed to start player: {0}")]
    StartFailed(#[from] std::io::Error),
    #[error("Hook command is empty")]
    EmptyHook,
}

/// Everything the player command line depends on besides the URL
#[derive(Debug, Clone, Default)]
pub struct PlayerOptions {
    pub on_top: bool,
    /// Wired in explicitly
    pub subtitle: Option<PathBuf>,
    /// Directory the player scans for companion subtitles
    pub subtitle_dir: Option<PathBuf>,
    /// Passed through verbatim before the URL
    pub extra_args: Vec<String>,
}

/// Arguments for `player` playing `href`
pub fn player_args(player: PlayerType, href: &str, options: &PlayerOptions) -> Vec<String> {
    let mut args = Vec::new();
    match player {
        PlayerType::Vlc => {
            args.push("-q".to_string());
            if options.on_top {
                args.push("--video-on-top".to_string());
            }
            args.push("--play-and-exit".to_string());
            if let Some(dir) = &options.subtitle_dir {
                args.push("--sub-autodetect-fuzzy=1".to_string());
                args.push(format!("--sub-autodetect-path={}", dir.display()));
            }
            if let Some(sub) = &options.subtitle {
                args.push(format!("--sub-file={}", sub.display()));
            }
        }
        PlayerType::Mpv => {
            args.push("--really-quiet".to_string());
            args.push("--force-window=immediate".to_string());
            if options.on_top {
                args.push("--ontop".to_string());
            }
            if options.subtitle_dir.is_some() {
                args.push("--sub-auto=fuzzy".to_string());
            }
            if let Some(sub) = &options.subtitle {
                args.push(format!("--sub-file={}", sub.display()));
            }
        }
    }
    args.extend(options.extra_args.iter().cloned());
    args.push(href.to_string());
    args
}

pub struct LocalPlayer {
    player_type: PlayerType,
}

impl LocalPlayer {
    pub fn new(player_type: PlayerType) -> Self {
        Self { player_type }
    }

    pub fn player_type(&self) -> PlayerType {
        self.player_type
    }

    /// Spawn the player, trying each known location in turn
    pub fn launch(&self, href: &str, options: &PlayerOptions) -> Result<Child, PlayerError> {
        let args = player_args(self.player_type, href, options);
        for program in self.player_type.commands() {
            let spawned = Command::new(&program)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn();
            match spawned {
                Ok(child) => {
                    tracing::info!(player = %program.display(), href, "player started");
                    return Ok(child);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(player = %program.display(), "player not at this location");
                }
                Err(e) => return Err(PlayerError::StartFailed(e)),
            }
        }
        Err(PlayerError::NotFound(self.player_type.to_string()))
    }
}

/// Run a user hook through the shell with `arg` appended, detached from
/// the controlling terminal
pub fn spawn_hook(command: &str, arg: Option<&str>) -> Result<Child, PlayerError> {
    let command = command.trim();
    if command.is_empty() {
        return Err(PlayerError::EmptyHook);
    }
    let line = match arg {
        Some(arg) => format!("{command} {arg}"),
        None => command.to_string(),
    };
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(&line)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }
    tracing::info!(hook = %line, "running hook");
    Ok(cmd.spawn()?)
}

/// Open `path` with the platform's file opener
pub fn open_location(path: &Path) -> Result<Child, PlayerError> {
    let opener = if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    };
    Command::new(opener)
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PlayerError::NotFound(opener.to_string())
            } else {
                PlayerError::StartFailed(e)
            }
        })
}
