//! Delivery side of a session
//!
//! - Subtitles: download and unpack subtitle files for the player
//! - Player: local VLC/mpv launch and user hook commands
//! - AirPlay: hand the stream URL to a receiver on the network

pub mod airplay;
pub mod player;
pub mod subtitles;

pub use airplay::AirPlayDevice;
pub use player::{LocalPlayer, PlayerError, PlayerOptions, PlayerType};
pub use subtitles::SubtitleStager;
