//! Reusable UI components for the TUI.

use ratatui::{
    layout::{Alignment, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Gauge, Paragraph, Wrap},
    Frame,
};

use crate::app::{App, AppMode};
use crate::delete::DeleteTarget;
use crate::scan::ScanSnapshot;
use crate::tree::NodeKind;

/// Render the help bar with context-sensitive key bindings.
pub fn render_help_bar(f: &mut Frame, area: Rect, app: &App) {
    let help_text = build_help_text(app);

    let help = Paragraph::new(Line::from(help_text))
        .style(Style::default().bg(Color::DarkGray).fg(Color::White));

    f.render_widget(help, area);
}

/// Build help text based on current app state.
fn build_help_text(app: &App) -> Vec<Span<'static>> {
    // Style helpers
    let key_style = Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD);
    let sep_style = Style::default().fg(Color::DarkGray);
    let text_style = Style::default().fg(Color::White);

    let bindings: &[(&'static str, &'static str)] = match app.mode {
        AppMode::ConfirmDelete => &[("Y", ":Confirm "), ("N/Esc", ":Cancel")],
        AppMode::Browse if app.browser.is_scanning() => &[
            ("↑↓", ":Navigate "),
            ("Enter", ":Drill "),
            ("Bksp", ":Up "),
            ("s", ":Sort "),
            ("d", ":Delete "),
            ("c", ":Stop scan "),
            ("q", ":Quit"),
        ],
        AppMode::Browse => &[
            ("↑↓", ":Navigate "),
            ("Enter", ":Drill "),
            ("Bksp", ":Up "),
            ("s", ":Sort "),
            ("d", ":Delete "),
            ("r", ":Rescan "),
            ("q", ":Quit"),
        ],
    };

    let mut spans = Vec::new();
    for (i, (key, text)) in bindings.iter().enumerate() {
        if i > 0 {
            spans.push(Span::styled("│ ", sep_style));
        }
        spans.push(Span::styled(*key, key_style));
        spans.push(Span::styled(*text, text_style));
    }
    spans
}

/// Render the status bar with the scan message and the last action result.
pub fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let (size, count) = app.browser.totals();
    let mut text = format!(
        "{} │ Total {} in {} objects",
        app.message,
        humansize::format_size(size, humansize::BINARY),
        count
    );
    if let Some(status) = &app.status {
        text.push_str(&format!(" │ {}", truncate_path(status, 60)));
    }
    if app.delete_task.is_some() {
        text.push_str(" │ 🗑 Deleting...");
    }

    let status = Paragraph::new(text)
        .style(Style::default().bg(Color::Blue).fg(Color::White));

    f.render_widget(status, area);
}

/// Render the scan gauge. The total is unknown up front, so the bar ticks.
pub fn render_progress_bar(f: &mut Frame, area: Rect, snapshot: &ScanSnapshot) {
    let tick = (snapshot.elapsed.as_millis() / 200) % 100;
    let label = format!(
        "Scanning: {} objects, {} │ {} listings outstanding",
        snapshot.objects,
        humansize::format_size(snapshot.bytes, humansize::BINARY),
        snapshot.outstanding
    );

    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(" Progress "))
        .gauge_style(Style::default().fg(Color::Yellow).bg(Color::Black))
        .percent(tick as u16)
        .label(label);

    f.render_widget(gauge, area);
}

/// Render a centered popup dialog.
pub fn render_popup(f: &mut Frame, title: &str, lines: Vec<Line>, style: Style) {
    let area = f.area();

    // Calculate popup dimensions
    let max_line_width = lines.iter()
        .map(|l| l.width())
        .max()
        .unwrap_or(20) as u16;

    let popup_width = (max_line_width + 4).max(40).min(area.width.saturating_sub(4));
    let popup_height = (lines.len() as u16 + 4).min(area.height.saturating_sub(2));
    let popup_x = (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = (area.height.saturating_sub(popup_height)) / 2;
    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height);

    // Clear area and render
    f.render_widget(Clear, popup_area);

    let popup = Paragraph::new(lines)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(style)
                .title(title)
                .title_style(style.add_modifier(Modifier::BOLD)),
        )
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true });

    f.render_widget(popup, popup_area);
}

/// Render delete confirmation popup.
pub fn render_delete_confirm(f: &mut Frame, target: &DeleteTarget) {
    let type_str = match target.kind {
        NodeKind::File => "object".to_string(),
        NodeKind::ScanErrorLeaf => "unlisted prefix".to_string(),
        _ => format!(
            "directory, {} objects, {}",
            target.count,
            humansize::format_size(target.size, humansize::BINARY)
        ),
    };

    let lines = vec![
        Line::from(""),
        Line::from(vec![
            Span::styled("Delete ", Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)),
            Span::raw(type_str),
            Span::raw(":"),
        ]),
        Line::from(""),
        Line::from(vec![
            Span::styled(
                format!("/{}", target.path),
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(""),
        Line::from(vec![
            Span::styled("[Y]", Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)),
            Span::raw(" Yes  "),
            Span::styled("[N/Esc]", Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)),
            Span::raw(" No"),
        ]),
    ];

    render_popup(f, " ⚠ Confirm Delete ", lines, Style::default().fg(Color::Red));
}

/// Truncate a message for display.
fn truncate_path(path: &str, max_len: usize) -> String {
    let len = path.chars().count();
    if len <= max_len {
        path.to_string()
    } else {
        let tail: String = path.chars().skip(len - max_len + 3).collect();
        format!("...{}", tail)
    }
}
