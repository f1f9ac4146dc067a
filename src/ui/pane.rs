use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState},
    Frame,
};

use crate::tree::{NodeKind, NodeSummary, SortMode};

const BAR_WIDTH: usize = 10;

pub struct Pane {
    pub path: String,
    pub entries: Vec<NodeSummary>,
    /// Aggregate size of the directory shown.
    pub total: u64,
    pub state: ListState,
}

impl Default for Pane {
    fn default() -> Self {
        Self::new()
    }
}

impl Pane {
    pub fn new() -> Self {
        let mut state = ListState::default();
        state.select(Some(0));

        Self {
            path: String::new(),
            entries: Vec::new(),
            total: 0,
            state,
        }
    }

    pub fn select_next(&mut self) {
        if self.entries.is_empty() {
            return;
        }

        let i = match self.state.selected() {
            Some(i) => {
                if i >= self.entries.len() - 1 {
                    0
                } else {
                    i + 1
                }
            }
            None => 0,
        };
        self.state.select(Some(i));
    }

    pub fn select_previous(&mut self) {
        if self.entries.is_empty() {
            return;
        }

        let i = match self.state.selected() {
            Some(i) => {
                if i == 0 {
                    self.entries.len() - 1
                } else {
                    i - 1
                }
            }
            None => 0,
        };
        self.state.select(Some(i));
    }

    pub fn select_first(&mut self) {
        self.state.select(Some(0));
    }

    pub fn select_last(&mut self) {
        self.state.select(Some(self.entries.len().saturating_sub(1)));
    }

    /// Select the entry called `name`, or clamp the current selection.
    pub fn select_name(&mut self, name: Option<&str>) {
        let position = name.and_then(|name| self.entries.iter().position(|e| e.name == name));
        let index = match position {
            Some(index) => index,
            None => self
                .state
                .selected()
                .unwrap_or(0)
                .min(self.entries.len().saturating_sub(1)),
        };
        self.state.select(Some(index));
    }

    pub fn selected_entry(&self) -> Option<&NodeSummary> {
        self.state.selected().and_then(|i| self.entries.get(i))
    }

    fn usage_bar(&self, size: u64) -> String {
        let filled = if self.total > 0 {
            ((size as f64 / self.total as f64) * BAR_WIDTH as f64).round() as usize
        } else {
            0
        };
        let filled = filled.min(BAR_WIDTH);
        format!("[{}{}]", "#".repeat(filled), " ".repeat(BAR_WIDTH - filled))
    }

    pub fn render(&mut self, f: &mut Frame, area: Rect, location: &str, sort: SortMode) {
        // Calculate available width for content (minus borders and padding)
        let inner_width = area.width.saturating_sub(2) as usize;
        let icon_width = 3;
        let size_width = 11;
        let bar_width = BAR_WIDTH + 3;
        let name_width = inner_width.saturating_sub(icon_width + size_width + bar_width + 1);

        let items: Vec<ListItem> = self
            .entries
            .iter()
            .map(|entry| {
                let icon = match entry.kind {
                    NodeKind::ScanErrorLeaf => "⚠",
                    _ if entry.is_dir() => "📁",
                    _ => "📄",
                };
                let mut name = if entry.is_dir() {
                    format!("{}/", entry.name)
                } else {
                    entry.name.clone()
                };
                if name.chars().count() > name_width && name_width > 3 {
                    name = format!("{}...", name.chars().take(name_width - 3).collect::<String>());
                }

                let name_style = if entry.delete_failed.is_some() {
                    Style::default().fg(Color::Red)
                } else if entry.scan_error.is_some() {
                    Style::default().fg(Color::Yellow)
                } else {
                    Style::default()
                };

                let spans = vec![
                    Span::styled(format!("{:>11}", entry.format_size()), Style::default().fg(Color::Cyan)),
                    Span::styled(format!(" {} ", self.usage_bar(entry.size)), Style::default().fg(Color::DarkGray)),
                    Span::raw(format!("{} ", icon)),
                    Span::styled(format!("{:<width$}", name, width = name_width), name_style),
                ];

                ListItem::new(Line::from(spans))
            })
            .collect();

        let title = format!(
            " {}/{} ({}, by {}) ",
            location,
            self.path,
            humansize::format_size(self.total, humansize::BINARY),
            sort.label()
        );

        let list = List::new(items)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(title)
                    .border_style(Style::default().fg(Color::Cyan)),
            )
            .highlight_style(
                Style::default()
                    .bg(Color::DarkGray)
                    .add_modifier(Modifier::BOLD),
            );

        f.render_stateful_widget(list, area, &mut self.state);
    }
}
