use std::collections::VecDeque;

use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, List, ListItem, ListState, Paragraph};
use ratatui::Frame;

use chroma::EntityId;

use crate::server::ServerStats;

const MAX_LOG_LINES: usize = 500;

#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub client_id: u32,
    pub name: String,
    pub addr: String,
    pub entity: Option<EntityId>,
    pub idle_secs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn style(self) -> Style {
        match self {
            LogLevel::Info => Style::default().fg(Color::White),
            LogLevel::Warn => Style::default().fg(Color::Yellow),
            LogLevel::Error => Style::default().fg(Color::Red),
        }
    }
}

pub struct TuiState {
    log: VecDeque<(LogLevel, String)>,
    selected: Option<usize>,
    pending_kick: Option<u32>,
}

impl TuiState {
    pub fn new() -> Self {
        Self {
            log: VecDeque::new(),
            selected: None,
            pending_kick: None,
        }
    }

    fn push_log(&mut self, level: LogLevel, message: String) {
        if self.log.len() == MAX_LOG_LINES {
            self.log.pop_front();
        }
        self.log.push_back((level, message));
    }

    pub fn log_info(&mut self, message: impl Into<String>) {
        self.push_log(LogLevel::Info, message.into());
    }

    pub fn log_warn(&mut self, message: impl Into<String>) {
        self.push_log(LogLevel::Warn, message.into());
    }

    pub fn log_error(&mut self, message: impl Into<String>) {
        self.push_log(LogLevel::Error, message.into());
    }

    pub fn select_prev(&mut self, count: usize) {
        self.selected = match (self.selected, count) {
            (_, 0) => None,
            (None, n) | (Some(0), n) => Some(n - 1),
            (Some(i), n) => Some(i.min(n) - 1),
        };
    }

    pub fn select_next(&mut self, count: usize) {
        self.selected = match (self.selected, count) {
            (_, 0) => None,
            (None, _) => Some(0),
            (Some(i), n) => Some((i + 1) % n),
        };
    }

    pub fn request_kick(&mut self, clients: &[ClientInfo]) {
        if let Some(client) = self.selected.and_then(|i| clients.get(i)) {
            self.pending_kick = Some(client.client_id);
        }
    }

    pub fn take_pending_kick(&mut self) -> Option<u32> {
        self.pending_kick.take()
    }
}

pub fn render(frame: &mut Frame, state: &TuiState, stats: &ServerStats, clients: &[ClientInfo]) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(4),
            Constraint::Length(8),
            Constraint::Min(5),
            Constraint::Length(1),
        ])
        .split(frame.area());

    render_header(frame, chunks[0], stats);
    render_status(frame, chunks[1], stats);
    render_network(frame, chunks[2], stats);
    render_clients(frame, chunks[3], state, clients);
    render_log(frame, chunks[4], state);
    render_help(frame, chunks[5]);
}

fn render_header(frame: &mut Frame, area: Rect, stats: &ServerStats) {
    let uptime = format_duration(stats.uptime_secs);
    let title = format!(" Chroma Server - Uptime: {} ", uptime);

    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let text = format!(
        "Map: {} ({})  |  Tick: {}  |  Entities: {}",
        stats.map_name, stats.map_entity, stats.tick, stats.entity_count
    );

    let paragraph = Paragraph::new(text)
        .block(block)
        .style(Style::default().fg(Color::White));

    frame.render_widget(paragraph, area);
}

fn render_status(frame: &mut Frame, area: Rect, stats: &ServerStats) {
    let block = Block::default()
        .title(" Status ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let client_ratio = if stats.max_clients == 0 {
        1.0
    } else {
        stats.client_count as f64 / stats.max_clients as f64
    };
    let gauge = Gauge::default()
        .block(block)
        .gauge_style(Style::default().fg(Color::Green))
        .ratio(client_ratio.min(1.0))
        .label(format!("{}/{} clients", stats.client_count, stats.max_clients));

    frame.render_widget(gauge, area);
}

fn render_network(frame: &mut Frame, area: Rect, stats: &ServerStats) {
    let block = Block::default()
        .title(" Network ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let net = &stats.network_stats;
    let lines = vec![
        Line::from(vec![
            Span::styled("Packets: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{} sent / {} recv", net.packets_sent, net.packets_received),
                Style::default().fg(Color::White),
            ),
            Span::styled("  Errors: ", Style::default().fg(Color::Gray)),
            Span::styled(
                net.send_errors.to_string(),
                Style::default().fg(if net.send_errors > 0 {
                    Color::Red
                } else {
                    Color::White
                }),
            ),
        ]),
        Line::from(vec![
            Span::styled("Bytes: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!(
                    "{} sent / {} recv",
                    format_bytes(net.bytes_sent),
                    format_bytes(net.bytes_received)
                ),
                Style::default().fg(Color::White),
            ),
        ]),
    ];

    let paragraph = Paragraph::new(lines).block(block);
    frame.render_widget(paragraph, area);
}

fn render_clients(frame: &mut Frame, area: Rect, state: &TuiState, clients: &[ClientInfo]) {
    let block = Block::default()
        .title(" Clients ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta));

    let items: Vec<ListItem> = clients
        .iter()
        .map(|c| {
            let entity = c
                .entity
                .map(|e| e.to_string())
                .unwrap_or_else(|| "-".to_string());
            ListItem::new(format!(
                "{:>3}  {:<32} {:<22} {:>6}  idle {:.1}s",
                c.client_id, c.name, c.addr, entity, c.idle_secs
            ))
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));

    let mut list_state = ListState::default();
    list_state.select(state.selected.filter(|&i| i < clients.len()));
    frame.render_stateful_widget(list, area, &mut list_state);
}

fn render_log(frame: &mut Frame, area: Rect, state: &TuiState) {
    let block = Block::default()
        .title(" Log ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));

    let visible = area.height.saturating_sub(2) as usize;
    let lines: Vec<Line> = state
        .log
        .iter()
        .skip(state.log.len().saturating_sub(visible))
        .map(|(level, message)| Line::styled(message.as_str(), level.style()))
        .collect();

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_help(frame: &mut Frame, area: Rect) {
    let text = Paragraph::new("q/Esc quit  |  Up/Down select client  |  k kick").style(
        Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::ITALIC),
    );

    frame.render_widget(text, area);
}

fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;
    format!("{:02}:{:02}:{:02}", hours, mins, secs)
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1}GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_wraps() {
        let mut state = TuiState::new();
        state.select_next(3);
        assert_eq!(state.selected, Some(0));
        state.select_prev(3);
        assert_eq!(state.selected, Some(2));
        state.select_next(3);
        assert_eq!(state.selected, Some(0));
        state.select_next(0);
        assert_eq!(state.selected, None);
    }

    #[test]
    fn log_is_bounded() {
        let mut state = TuiState::new();
        for i in 0..MAX_LOG_LINES + 10 {
            state.log_info(format!("line {}", i));
        }
        assert_eq!(state.log.len(), MAX_LOG_LINES);
        assert_eq!(state.log.front().unwrap().1, "line 10");
    }

    #[test]
    fn kick_targets_selected_client() {
        let clients = vec![ClientInfo {
            client_id: 4,
            name: "greg".to_string(),
            addr: "127.0.0.1:5000".to_string(),
            entity: None,
            idle_secs: 0.0,
        }];
        let mut state = TuiState::new();
        state.request_kick(&clients);
        assert_eq!(state.take_pending_kick(), None);

        state.select_next(clients.len());
        state.request_kick(&clients);
        assert_eq!(state.take_pending_kick(), Some(4));
        assert_eq!(state.take_pending_kick(), None);
    }
}
