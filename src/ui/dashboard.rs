//! Live session dashboard
//!
//! Redrawn once per second and on every pause edge. Rendering only reads
//! an already published snapshot and the playback state.

use crate::models::{format_bytes, SwarmSnapshot};
use crate::ui::theme::Theme;
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    text::{Line, Span},
    widgets::Paragraph,
    Frame, Terminal,
};
use std::io::{stdout, Stdout};
use std::time::Duration;

pub type Tui = Terminal<CrosstermBackend<Stdout>>;

/// Everything one dashboard frame shows
#[derive(Debug, Clone, Copy)]
pub struct DashboardView<'a> {
    /// Player or receiver being fed, if any
    pub target: Option<&'a str>,
    pub href: &'a str,
    pub title: &'a str,
    pub length: u64,
    pub path: &'a str,
    pub snapshot: &'a SwarmSnapshot,
    pub elapsed: Duration,
    pub paused: bool,
    pub can_pause: bool,
}

fn pair(label: &str, value: String) -> [Span<'static>; 2] {
    [
        Span::styled(format!("{label} "), Theme::label()),
        Span::styled(value, Theme::value()),
    ]
}

fn rate(bytes_per_sec: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec.max(0.0) as u64))
}

/// Dashboard lines for a terminal `height` rows tall. The peer table is
/// trimmed to fit with an "... and N more" footer.
pub fn lines(view: &DashboardView<'_>, height: u16) -> Vec<Line<'static>> {
    let s = view.snapshot;
    let mut out = Vec::new();

    out.push(match view.target {
        Some(target) => Line::from(vec![
            Span::styled("streaming to ", Theme::label()),
            Span::styled(target.to_string(), Theme::value()),
            Span::styled(" from ", Theme::label()),
            Span::styled(view.href.to_string(), Theme::value()),
        ]),
        None => Line::from(vec![
            Span::styled("open a player and enter ", Theme::label()),
            Span::styled(view.href.to_string(), Theme::value()),
            Span::styled(" as the network address", Theme::label()),
        ]),
    });
    out.push(Line::default());

    let mut streaming = pair(
        "streaming",
        format!("{} ({})", view.title, format_bytes(view.length)),
    )
    .to_vec();
    streaming.push(Span::styled(" - ", Theme::label()));
    streaming.push(Span::styled(rate(s.download_rate), Theme::value()));
    streaming.push(Span::styled(" from ", Theme::label()));
    streaming.push(Span::styled(
        format!("{}/{}", s.peers_active, s.peers_total),
        Theme::value(),
    ));
    streaming.push(Span::styled(" peers", Theme::label()));
    out.push(Line::from(streaming));

    out.push(Line::from(vec![
        Span::styled("path ", Theme::label()),
        Span::styled(view.path.to_string(), Theme::secondary()),
    ]));

    let mut progress = pair(
        "downloaded",
        format!("{} ({}%)", format_bytes(s.bytes_downloaded), s.percent_complete),
    )
    .to_vec();
    progress.extend(pair(" and uploaded", format_bytes(s.bytes_uploaded)));
    progress.extend(pair(" in", format!("{}s", view.elapsed.as_secs())));
    progress.extend(pair(" with", s.hotswaps.to_string()));
    progress.push(Span::styled(" hotswaps", Theme::label()));
    out.push(Line::from(progress));

    let mut pieces = pair("verified", s.pieces_verified.to_string()).to_vec();
    pieces.push(Span::styled(" pieces and received ", Theme::label()));
    pieces.push(Span::styled(
        s.pieces_invalid.to_string(),
        if s.pieces_invalid > 0 {
            Theme::accent()
        } else {
            Theme::value()
        },
    ));
    pieces.push(Span::styled(" invalid pieces", Theme::label()));
    out.push(Line::from(pieces));

    out.push(Line::from(
        pair("peer queue size is", s.queue_depth.to_string()).to_vec(),
    ));

    if view.paused {
        out.push(Line::from(vec![
            Span::styled(" PAUSED ", Theme::paused()),
            Span::styled(" press space to resume", Theme::dimmed()),
        ]));
    } else if view.can_pause {
        out.push(Line::from(vec![
            Span::styled("space", Theme::keybind()),
            Span::styled(" pause  ", Theme::dimmed()),
            Span::styled("ctrl+l", Theme::keybind()),
            Span::styled(" open folder  ", Theme::dimmed()),
            Span::styled("ctrl+c", Theme::keybind()),
            Span::styled(" quit", Theme::dimmed()),
        ]));
    } else {
        out.push(Line::default());
    }
    out.push(Line::default());

    let room = (height as usize).saturating_sub(out.len());
    let shown = if s.peers.len() > room {
        room.saturating_sub(1)
    } else {
        s.peers.len()
    };
    for peer in s.peers.iter().take(shown) {
        let style = Theme::peer(peer.choking);
        out.push(Line::from(vec![
            Span::styled(format!("{:<25} ", peer.address), Theme::secondary()),
            Span::styled(format!("{:<10} ", format_bytes(peer.downloaded)), style),
            Span::styled(format!("{:<12} ", rate(peer.download_rate)), style),
            Span::styled(if peer.choking { "choked" } else { "" }, Theme::dimmed()),
        ]));
    }
    if shown < s.peers.len() {
        out.push(Line::from(Span::styled(
            format!("... and {} more", s.peers.len() - shown),
            Theme::dimmed(),
        )));
    }
    out
}

/// Shown while a magnet is still waiting for metadata
pub fn metadata_banner(peers: usize) -> Line<'static> {
    Line::from(vec![
        Span::styled("fetching torrent metadata from ", Theme::label()),
        Span::styled(peers.to_string(), Theme::value()),
        Span::styled(" peers", Theme::label()),
    ])
}

pub fn render(frame: &mut Frame, view: &DashboardView<'_>) {
    let area = frame.area();
    frame.render_widget(Paragraph::new(lines(view, area.height)), area);
}

/// Owns the terminal while the dashboard is shown. Restores it on drop.
pub struct Dashboard {
    terminal: Tui,
}

impl Dashboard {
    pub fn new() -> std::io::Result<Self> {
        enable_raw_mode()?;
        let mut out = stdout();
        execute!(out, EnterAlternateScreen)?;
        let terminal = Terminal::new(CrosstermBackend::new(out))?;
        Ok(Self { terminal })
    }

    pub fn draw(&mut self, view: &DashboardView<'_>) -> std::io::Result<()> {
        self.terminal.draw(|frame| render(frame, view))?;
        Ok(())
    }

    pub fn draw_banner(&mut self, peers: usize) -> std::io::Result<()> {
        self.terminal.draw(|frame| {
            let area = frame.area();
            frame.render_widget(Paragraph::new(metadata_banner(peers)), area);
        })?;
        Ok(())
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}
