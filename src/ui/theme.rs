//! Terminal palette for the dashboard and candidate picker
//!
//! Uses the terminal's named colors so the output follows the user's
//! color scheme.

use ratatui::style::{Color, Modifier, Style};

pub struct Theme;

impl Theme {
    // ═══════════════════════════════════════════════════════════════════════
    // PALETTE
    // ═══════════════════════════════════════════════════════════════════════

    /// Labels and healthy values
    pub const PRIMARY: Color = Color::Green;

    /// Peer addresses and candidate letters
    pub const SECONDARY: Color = Color::Magenta;

    /// Counters that need attention
    pub const ACCENT: Color = Color::Yellow;

    pub const TEXT: Color = Color::Reset;

    pub const DIM: Color = Color::DarkGray;

    pub const ERROR: Color = Color::Red;

    // ═══════════════════════════════════════════════════════════════════════
    // STYLE HELPERS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn text() -> Style {
        Style::default().fg(Self::TEXT)
    }

    /// Emphasized value (file name, href)
    pub fn value() -> Style {
        Style::default().add_modifier(Modifier::BOLD)
    }

    pub fn label() -> Style {
        Style::default().fg(Self::PRIMARY)
    }

    pub fn title() -> Style {
        Style::default()
            .fg(Self::PRIMARY)
            .add_modifier(Modifier::BOLD)
    }

    pub fn accent() -> Style {
        Style::default().fg(Self::ACCENT)
    }

    pub fn secondary() -> Style {
        Style::default().fg(Self::SECONDARY)
    }

    pub fn dimmed() -> Style {
        Style::default().fg(Self::DIM)
    }

    pub fn error() -> Style {
        Style::default()
            .fg(Self::ERROR)
            .add_modifier(Modifier::BOLD)
    }

    /// The PAUSED banner
    pub fn paused() -> Style {
        Style::default()
            .fg(Self::ACCENT)
            .add_modifier(Modifier::BOLD | Modifier::REVERSED)
    }

    /// Hotkey hints
    pub fn keybind() -> Style {
        Style::default()
            .fg(Self::SECONDARY)
            .add_modifier(Modifier::BOLD)
    }

    /// Seeders column, colored by swarm health
    pub fn seeds(count: u32) -> Style {
        match count {
            0 => Self::error(),
            1..=9 => Self::accent(),
            _ => Self::label(),
        }
    }

    /// Peer rows: unchoked peers stand out, choking peers are dimmed
    pub fn peer(choking: bool) -> Style {
        if choking {
            Self::dimmed()
        } else {
            Self::text()
        }
    }
}
