//! Letter-keyed candidate and file tables
//!
//! Printed inline below the prompt, one row per candidate (or torrent
//! file) keyed `a`, `b`, `c`, ... The keypress itself is handled by the
//! acquisition pipeline.

use crate::models::{format_bytes, AcquisitionCandidate, FileInfo};
use crate::ui::theme::Theme;
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::Constraint,
    text::Line,
    widgets::{Cell, Row, Table},
    Terminal, TerminalOptions, Viewport,
};
use std::io::stdout;

/// Key letter for row `index`
pub fn key_for(index: usize) -> Option<char> {
    u8::try_from(index)
        .ok()
        .filter(|i| *i < 26)
        .map(|i| (b'a' + i) as char)
}

/// Row index for a key letter, if it is within `count` rows
pub fn index_for(key: char, count: usize) -> Option<usize> {
    if !key.is_ascii_lowercase() {
        return None;
    }
    let index = (key as u8 - b'a') as usize;
    (index < count).then_some(index)
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

pub fn table(candidates: &[AcquisitionCandidate]) -> Table<'static> {
    let header = Row::new(["Sel", "Name", "Seeds", "Leechs", "Rating", "Size"]).style(Theme::title());
    let rows = candidates.iter().enumerate().map(|(i, c)| {
        Row::new(vec![
            Cell::from(optional(key_for(i))).style(Theme::keybind()),
            Cell::from(c.name.clone()),
            Cell::from(c.seeders.to_string()).style(Theme::seeds(c.seeders)),
            Cell::from(optional(c.leechers)),
            Cell::from(optional(c.rating)),
            Cell::from(c.size.map(format_bytes).unwrap_or_default()).style(Theme::dimmed()),
        ])
    });
    Table::new(
        rows,
        [
            Constraint::Length(3),
            Constraint::Min(20),
            Constraint::Length(6),
            Constraint::Length(6),
            Constraint::Length(6),
            Constraint::Length(10),
        ],
    )
    .header(header)
    .column_spacing(2)
}

/// Files of a torrent, keyed like the candidate table
pub fn file_table(files: &[FileInfo]) -> Table<'static> {
    let header = Row::new(["Sel", "File", "Size"]).style(Theme::title());
    let rows = files.iter().enumerate().map(|(i, f)| {
        Row::new(vec![
            Cell::from(optional(key_for(i))).style(Theme::keybind()),
            Cell::from(f.path.clone()),
            Cell::from(format_bytes(f.length)).style(Theme::dimmed()),
        ])
    });
    Table::new(
        rows,
        [Constraint::Length(3), Constraint::Min(20), Constraint::Length(10)],
    )
    .header(header)
    .column_spacing(2)
}

fn draw_table<B: Backend>(
    terminal: &mut Terminal<B>,
    table: Table<'static>,
    prompt: &str,
) -> std::io::Result<()> {
    terminal.draw(|frame| {
        let area = frame.area();
        let prompt_row = area.height.saturating_sub(1);
        let table_area = ratatui::layout::Rect {
            height: prompt_row,
            ..area
        };
        frame.render_widget(table, table_area);
        let prompt_area = ratatui::layout::Rect {
            y: area.y + prompt_row,
            height: 1,
            ..area
        };
        frame.render_widget(Line::styled(prompt.to_string(), Theme::label()), prompt_area);
    })?;
    Ok(())
}

/// Draw the table into `terminal`, which should be sized to fit it
pub fn draw<B: Backend>(
    terminal: &mut Terminal<B>,
    candidates: &[AcquisitionCandidate],
    prompt: &str,
) -> std::io::Result<()> {
    draw_table(terminal, table(candidates), prompt)
}

pub fn draw_files<B: Backend>(
    terminal: &mut Terminal<B>,
    files: &[FileInfo],
    prompt: &str,
) -> std::io::Result<()> {
    draw_table(terminal, file_table(files), prompt)
}

fn show_inline(table: Table<'static>, rows: usize, prompt: &str) -> std::io::Result<()> {
    let height = rows as u16 + 2;
    let mut terminal = Terminal::with_options(
        CrosstermBackend::new(stdout()),
        TerminalOptions {
            viewport: Viewport::Inline(height),
        },
    )?;
    draw_table(&mut terminal, table, prompt)?;
    println!();
    Ok(())
}

/// Print the table inline on stdout
pub fn show(candidates: &[AcquisitionCandidate], prompt: &str) -> std::io::Result<()> {
    show_inline(table(candidates), candidates.len(), prompt)
}

/// Print the file table inline on stdout
pub fn show_files(files: &[FileInfo], prompt: &str) -> std::io::Result<()> {
    show_inline(file_table(files), files.len(), prompt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Locator;
    use ratatui::backend::TestBackend;

    #[test]
    fn test_key_mapping() {
        assert_eq!(key_for(0), Some('a'));
        assert_eq!(key_for(25), Some('z'));
        assert_eq!(key_for(26), None);
        assert_eq!(index_for('c', 3), Some(2));
        assert_eq!(index_for('d', 3), None);
        assert_eq!(index_for('A', 3), None);
        assert_eq!(index_for('1', 3), None);
    }

    #[test]
    fn test_draw_rows() {
        let mut first = AcquisitionCandidate::new("Big Buck Bunny", 42, Some(Locator::parse("magnet:?xt=1")));
        first.leechers = Some(3);
        first.size = Some(1024);
        let second = AcquisitionCandidate::new("Sintel", 0, Some(Locator::parse("magnet:?xt=2")));

        let mut terminal = Terminal::new(TestBackend::new(70, 4)).unwrap();
        draw(&mut terminal, &[first, second], "select a torrent").unwrap();

        let buffer = terminal.backend().buffer();
        let row = |y: u16| -> String {
            (0..70).map(|x| buffer[(x, y)].symbol().to_string()).collect()
        };
        assert!(row(0).starts_with("Sel"));
        assert!(row(1).starts_with("a    Big Buck Bunny"));
        assert!(row(1).contains("1.0 KB"));
        assert!(row(2).starts_with("b    Sintel"));
        assert!(row(3).starts_with("select a torrent"));
    }

    #[test]
    fn test_draw_files() {
        let files = vec![
            FileInfo::new("Show/ep1.mkv", 2048),
            FileInfo::new("Show/ep2.mkv", 1024),
        ];
        let mut terminal = Terminal::new(TestBackend::new(50, 4)).unwrap();
        draw_files(&mut terminal, &files, "select a file").unwrap();

        let buffer = terminal.backend().buffer();
        let row = |y: u16| -> String {
            (0..50).map(|x| buffer[(x, y)].symbol().to_string()).collect()
        };
        assert!(row(0).starts_with("Sel  File"));
        assert!(row(1).starts_with("a    Show/ep1.mkv"));
        assert!(row(1).contains("2.0 KB"));
        assert!(row(2).starts_with("b    Show/ep2.mkv"));
        assert!(row(3).starts_with("select a file"));
    }
}
