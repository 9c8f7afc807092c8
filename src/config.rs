//! Configuration management for macflix
//!
//! Defaults live in `~/.config/macflix/config.toml`. Every key mirrors a
//! command line flag and the flag wins when both are given. A missing or
//! malformed file means defaults.

use crate::api::Source;
use crate::cli::Cli;
use crate::engine::default_connections;
use crate::pipeline::PipelineError;
use crate::server::DEFAULT_IDLE_TIMEOUT;
use crate::stream::PlayerType;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8888;
pub const DEFAULT_LANGUAGE: &str = "eng";

/// Logging section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `macflix=debug`. `RUST_LOG` wins.
    pub level: Option<String>,
    /// Log file; stderr when unset
    pub file: Option<PathBuf>,
}

/// Contents of the config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connections: Option<usize>,
    pub port: Option<u16>,
    pub language: Option<String>,
    pub source: Option<String>,
    pub path: Option<PathBuf>,
    pub blocklist: Option<PathBuf>,
    pub hostname: Option<String>,
    pub peer_port: Option<u16>,
    pub quiet: Option<bool>,
    pub on_top: Option<bool>,
    pub remove: Option<bool>,
    pub player: Option<PlayerType>,
    pub idle_timeout_secs: Option<u64>,
    pub logging: LoggingConfig,
}

impl Config {
    /// Get config file path (~/.config/macflix/config.toml)
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("macflix").join("config.toml"))
    }

    /// Load config from the default location, or defaults
    pub fn load() -> Self {
        Self::path().map(|p| Self::load_from(&p)).unwrap_or_default()
    }

    /// Load config from `path`, or defaults
    pub fn load_from(path: &Path) -> Self {
        let Ok(text) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match toml::from_str(&text) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring malformed config");
                Self::default()
            }
        }
    }
}

/// Effective settings for one run
#[derive(Debug, Clone)]
pub struct Settings {
    /// `None` lists top torrents
    pub term: Option<String>,
    pub source: Source,
    /// `None` skips the subtitle stages
    pub language: Option<String>,
    /// Subtitle file given on the command line; replaces the lookup
    pub subtitle_file: Option<PathBuf>,
    /// Show the file list before streaming
    pub list: bool,
    pub connections: usize,
    pub port: u16,
    pub index: Option<usize>,
    pub path: PathBuf,
    /// Where subtitles are staged
    pub subtitle_dir: PathBuf,
    pub blocklist: Option<PathBuf>,
    pub all: bool,
    /// Address the server binds to
    pub bind: IpAddr,
    /// Host put into the public address
    pub hostname: Option<String>,
    pub peers: Vec<String>,
    pub peer_port: Option<u16>,
    pub quiet: bool,
    pub on_top: bool,
    pub no_quit: bool,
    pub remove: bool,
    pub player: Option<PlayerType>,
    pub airplay: bool,
    pub on_downloaded: Option<String>,
    pub on_listening: Option<String>,
    pub player_args: Vec<String>,
    pub idle_timeout: Duration,
    pub logging: LoggingConfig,
}

impl Settings {
    /// Merge flags over the config file
    pub fn resolve(cli: &Cli, config: Config) -> Result<Self, PipelineError> {
        let term = cli.search_term().ok_or(PipelineError::MissingTerm)?;
        let source: Source = match cli.source.as_deref().or(config.source.as_deref()) {
            Some(name) => name.parse()?,
            None => Source::default(),
        };

        let subtitle_file = match &cli.subtitles {
            Some(path) if !path.is_file() => return Err(PipelineError::SubtitleFile(path.clone())),
            Some(path) => Some(path.clone()),
            None => None,
        };

        let lookup = !cli.no_subtitles && subtitle_file.is_none();
        let language = lookup.then(|| {
            cli.language
                .clone()
                .or(config.language)
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string())
        });

        let hostname = cli.hostname.clone().or(config.hostname);
        let bind = hostname
            .as_deref()
            .and_then(|h| h.parse::<IpAddr>().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

        let mut logging = config.logging;
        if cli.log_file.is_some() {
            logging.file = cli.log_file.clone();
        }

        Ok(Self {
            term: term.map(str::to_string),
            source,
            language,
            subtitle_file,
            list: cli.list,
            connections: cli
                .connections
                .or(config.connections)
                .unwrap_or_else(default_connections),
            port: cli.port.or(config.port).unwrap_or(DEFAULT_PORT),
            index: cli.index,
            path: cli
                .path
                .clone()
                .or(config.path)
                .unwrap_or_else(|| std::env::temp_dir().join("macflix")),
            subtitle_dir: dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("macflix")
                .join("subtitles"),
            blocklist: cli.blocklist.clone().or(config.blocklist),
            all: cli.all,
            bind,
            hostname,
            peers: cli.peers.clone(),
            peer_port: cli.peer_port.or(config.peer_port),
            quiet: cli.quiet || config.quiet.unwrap_or(false),
            on_top: !cli.not_on_top && config.on_top.unwrap_or(true),
            no_quit: cli.no_quit,
            remove: !cli.keep && config.remove.unwrap_or(true),
            player: cli.player_choice().or(config.player),
            airplay: cli.airplay,
            on_downloaded: cli.on_downloaded.clone(),
            on_listening: cli.on_listening.clone(),
            player_args: cli.player_args.clone(),
            idle_timeout: config
                .idle_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_IDLE_TIMEOUT),
            logging,
        })
    }
}
