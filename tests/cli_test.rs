//! CLI Tests
//!
//! Argument parsing, settings resolution and the exit codes of runs that
//! stop before any network access.

use clap::Parser;
use macflix::api::Source;
use macflix::cli::{Cli, ExitCode};
use macflix::config::{Config, Settings};
use macflix::stream::PlayerType;
use std::path::PathBuf;

fn isolated(args: &[&str]) -> (tempfile::TempDir, Cli) {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    let mut argv = vec!["macflix".to_string()];
    argv.extend(args.iter().map(|a| a.to_string()));
    argv.push("--config".to_string());
    argv.push(config.display().to_string());
    (dir, Cli::parse_from(argv))
}

// =============================================================================
// Exit codes
// =============================================================================

#[tokio::test]
async fn test_missing_term_exits_with_error() {
    let (_dir, cli) = isolated(&[]);
    assert_eq!(macflix::commands::run(cli).await, ExitCode::Error);
}

#[tokio::test]
async fn test_blank_term_exits_with_error() {
    let (_dir, cli) = isolated(&["   "]);
    assert_eq!(macflix::commands::run(cli).await, ExitCode::Error);
}

#[tokio::test]
async fn test_unknown_source_exits_with_error() {
    let (_dir, cli) = isolated(&["sintel", "--source", "kickass"]);
    assert_eq!(macflix::commands::run(cli).await, ExitCode::Error);
}

#[test]
fn test_process_exit_codes() {
    assert_eq!(i32::from(ExitCode::Success), 0);
    assert_eq!(i32::from(ExitCode::Error), 1);
    assert_eq!(i32::from(ExitCode::Interrupted), 130);
}

// =============================================================================
// Settings
// =============================================================================

#[test]
fn test_config_file_fills_missing_flags() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
        connections = 40
        port = 9090
        path = "/var/tmp/macflix"
        peer_port = 6881
        on_top = true
        idle_timeout_secs = 60

        [logging]
        level = "macflix=debug"
        file = "/tmp/macflix.log"
        "#,
    )
    .unwrap();

    let cli = Cli::parse_from(["macflix", "sintel", "-c", "10"]);
    let settings = Settings::resolve(&cli, Config::load_from(&path)).unwrap();

    assert_eq!(settings.connections, 10);
    assert_eq!(settings.port, 9090);
    assert_eq!(settings.path, PathBuf::from("/var/tmp/macflix"));
    assert_eq!(settings.peer_port, Some(6881));
    assert!(settings.on_top);
    assert_eq!(settings.idle_timeout.as_secs(), 60);
    assert_eq!(settings.logging.level.as_deref(), Some("macflix=debug"));
    assert_eq!(settings.logging.file, Some(PathBuf::from("/tmp/macflix.log")));
}

#[test]
fn test_log_file_flag_wins() {
    let cli = Cli::parse_from(["macflix", "sintel", "--log-file", "/tmp/run.log"]);
    let settings = Settings::resolve(&cli, Config::default()).unwrap();
    assert_eq!(settings.logging.file, Some(PathBuf::from("/tmp/run.log")));
}

#[test]
fn test_browse_mode_has_no_term() {
    let cli = Cli::parse_from(["macflix", "BROWSE", "-s", "yts"]);
    let settings = Settings::resolve(&cli, Config::default()).unwrap();
    assert_eq!(settings.term, None);
    assert_eq!(settings.source, Source::Yts);
}

#[test]
fn test_keep_disables_removal() {
    let cli = Cli::parse_from(["macflix", "sintel", "--keep"]);
    let settings = Settings::resolve(&cli, Config::default()).unwrap();
    assert!(!settings.remove);
}

#[test]
fn test_hostname_that_is_not_an_address_binds_all_interfaces() {
    let cli = Cli::parse_from(["macflix", "sintel", "-H", "media.local"]);
    let settings = Settings::resolve(&cli, Config::default()).unwrap();
    assert_eq!(settings.hostname.as_deref(), Some("media.local"));
    assert!(settings.bind.is_unspecified());
}

#[test]
fn test_player_from_config_when_no_flag() {
    let config: Config = toml::from_str(r#"player = "vlc""#).unwrap();
    let cli = Cli::parse_from(["macflix", "sintel"]);
    assert_eq!(
        Settings::resolve(&cli, config.clone()).unwrap().player,
        Some(PlayerType::Vlc)
    );

    let cli = Cli::parse_from(["macflix", "sintel", "--mpv"]);
    assert_eq!(
        Settings::resolve(&cli, config).unwrap().player,
        Some(PlayerType::Mpv)
    );
}

#[test]
fn test_conflicting_players_rejected() {
    assert!(Cli::try_parse_from(["macflix", "sintel", "--vlc", "--mpv"]).is_err());
    assert!(Cli::try_parse_from(["macflix", "sintel", "--vlc", "--player", "mpv"]).is_err());
}
