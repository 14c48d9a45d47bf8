use std::collections::VecDeque;

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, Paragraph};

use duel::net::MAX_PLAYERS;
use duel::{GameStatus, LobbyEvent, LobbyState, Role};

use crate::app::{AppView, MatchSummary};

const LOG_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct TuiState {
    logs: VecDeque<LogEntry>,
    code_input: String,
}

impl TuiState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_info(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Info, message.into());
    }

    pub fn log_warn(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Warn, message.into());
    }

    pub fn log_error(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Error, message.into());
    }

    fn push(&mut self, level: LogLevel, message: String) {
        if self.logs.len() == LOG_CAPACITY {
            self.logs.pop_front();
        }
        self.logs.push_back(LogEntry { level, message });
    }

    pub fn logs(&self) -> impl DoubleEndedIterator<Item = &LogEntry> {
        self.logs.iter()
    }

    pub fn log_event(&mut self, event: &LobbyEvent) {
        match event {
            LobbyEvent::Hosted { code } => self.log_info(format!("Hosting session {}", code)),
            LobbyEvent::Connected { player_id } => {
                self.log_info(format!("Connected as player {:?}", player_id))
            }
            LobbyEvent::ParticipantJoined { player_id } => {
                self.log_info(format!("Player {} joined", player_id))
            }
            LobbyEvent::ParticipantLeft { player_id } => {
                self.log_warn(format!("Player {} left", player_id))
            }
            LobbyEvent::SessionReady => self.log_info("Both players connected"),
            LobbyEvent::CountdownStarted { duration } => {
                self.log_info(format!("Countdown {:.1}s", duration.as_secs_f64()))
            }
            LobbyEvent::CountdownCancelled => self.log_warn("Countdown cancelled"),
            LobbyEvent::GameStarted { role } => {
                self.log_info(format!("Game started ({})", role_name(Some(*role))))
            }
            LobbyEvent::ReturnedToLobby => self.log_info("Returned to lobby"),
            LobbyEvent::ReturnedToMainMenu => self.log_info("Returned to main menu"),
            LobbyEvent::ConnectionLost { message } => self.log_error(message.clone()),
        }
    }

    pub fn code_input(&self) -> &str {
        &self.code_input
    }

    pub fn push_code_char(&mut self, c: char) {
        if c.is_ascii_alphanumeric() && self.code_input.len() < 6 {
            self.code_input.push(c.to_ascii_uppercase());
        }
    }

    pub fn pop_code_char(&mut self) {
        self.code_input.pop();
    }

    pub fn take_code_input(&mut self) -> String {
        std::mem::take(&mut self.code_input)
    }
}

pub fn render(frame: &mut Frame, state: &TuiState, view: &AppView) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(6),
            Constraint::Min(5),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, chunks[0], view);
    render_status(frame, chunks[1], view);

    let middle = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(chunks[2]);
    render_session(frame, middle[0], state, view);
    render_network(frame, middle[1], view);

    render_logs(frame, chunks[3], state);
    render_help(frame, chunks[4], view);
}

fn render_header(frame: &mut Frame, area: Rect, view: &AppView) {
    let title = format!(" Duel - Uptime: {} ", format_duration(view.uptime_secs));

    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let code = view
        .code
        .as_ref()
        .map_or_else(|| "------".to_string(), |c| c.to_string());
    let text = format!(
        "State: {}  |  Role: {}  |  Code: {}  |  Player: {}",
        view.state.as_str(),
        role_name(view.role),
        code,
        view.player_id
            .map_or_else(|| "-".to_string(), |id| id.to_string())
    );

    let paragraph = Paragraph::new(text)
        .block(block)
        .style(Style::default().fg(Color::White));

    frame.render_widget(paragraph, area);
}

fn render_status(frame: &mut Frame, area: Rect, view: &AppView) {
    let block = Block::default()
        .title(" Status ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let (ratio, label) = match view.countdown {
        Some(remaining) if view.state == LobbyState::Countdown => {
            let total = view.countdown_total.as_secs_f64().max(f64::EPSILON);
            (
                1.0 - remaining.as_secs_f64() / total,
                format!("Starting in {:.1}s", remaining.as_secs_f64()),
            )
        }
        _ => (
            view.participants as f64 / MAX_PLAYERS as f64,
            format!("{}/{} players", view.participants, MAX_PLAYERS),
        ),
    };

    let gauge = Gauge::default()
        .block(block)
        .gauge_style(Style::default().fg(Color::Green))
        .ratio(ratio.clamp(0.0, 1.0))
        .label(label);

    frame.render_widget(gauge, area);
}

fn render_session(frame: &mut Frame, area: Rect, state: &TuiState, view: &AppView) {
    let block = Block::default()
        .title(" Session ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta));

    let mut lines = Vec::new();
    if view.state == LobbyState::JoinInput {
        lines.push(Line::from(vec![
            Span::styled("Code: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{}_", state.code_input()),
                Style::default()
                    .fg(Color::White)
                    .add_modifier(Modifier::BOLD),
            ),
        ]));
    }

    if let Some(error) = &view.error {
        lines.push(Line::from(Span::styled(
            error.clone(),
            Style::default().fg(Color::Red),
        )));
    }

    if let Some(game) = &view.game {
        lines.extend(match_lines(game));
    }

    let paragraph = Paragraph::new(lines).block(block);
    frame.render_widget(paragraph, area);
}

fn match_lines(game: &MatchSummary) -> Vec<Line<'static>> {
    let mut lines = vec![Line::from(vec![
        Span::styled("Match: ", Style::default().fg(Color::Gray)),
        Span::styled(
            format!(
                "{} {}  shots {}",
                game.status.as_str(),
                format_duration(game.timer_remaining.as_secs()),
                game.projectiles
            ),
            Style::default().fg(Color::White),
        ),
    ])];

    for player in &game.players {
        let color = if player.is_alive {
            Color::White
        } else {
            Color::DarkGray
        };
        lines.push(Line::from(Span::styled(
            format!(
                "P{}  hp {:>3}  score {:>2}  ({:.0}, {:.0})",
                player.id, player.health, player.score, player.position.x, player.position.y
            ),
            Style::default().fg(color),
        )));
    }

    if game.status == GameStatus::GameOver {
        let winner = game
            .winner
            .map_or_else(|| "draw".to_string(), |id| format!("player {} wins", id));
        lines.push(Line::from(Span::styled(
            winner,
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )));
    }
    lines
}

fn render_network(frame: &mut Frame, area: Rect, view: &AppView) {
    let block = Block::default()
        .title(" Network ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let net = &view.network;
    let lines = vec![
        Line::from(vec![
            Span::styled("Packets: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{} sent / {} recv", net.packets_sent, net.packets_received),
                Style::default().fg(Color::White),
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
        Line::from(vec![
            Span::styled("RTT: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{:.1}ms", net.rtt_ms),
                Style::default().fg(Color::White),
            ),
        ]),
        Line::from(vec![
            Span::styled("Dropped: ", Style::default().fg(Color::Gray)),
            Span::styled(
                net.packets_dropped.to_string(),
                Style::default().fg(if net.packets_dropped > 0 {
                    Color::Red
                } else {
                    Color::White
                }),
            ),
        ]),
    ];

    let paragraph = Paragraph::new(lines).block(block);
    frame.render_widget(paragraph, area);
}

fn render_logs(frame: &mut Frame, area: Rect, state: &TuiState) {
    let block = Block::default()
        .title(" Log ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));

    let visible = area.height.saturating_sub(2) as usize;
    let mut lines: Vec<Line> = state
        .logs()
        .rev()
        .take(visible)
        .map(|entry| {
            let color = match entry.level {
                LogLevel::Info => Color::White,
                LogLevel::Warn => Color::Yellow,
                LogLevel::Error => Color::Red,
            };
            Line::from(Span::styled(entry.message.clone(), Style::default().fg(color)))
        })
        .collect();
    lines.reverse();

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_help(frame: &mut Frame, area: Rect, view: &AppView) {
    let block = Block::default()
        .title(" Controls ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let text = match view.state {
        LobbyState::Main => "h: host  j: join  q: quit",
        LobbyState::JoinInput => "Type code, Enter: connect  ESC: back",
        LobbyState::Connecting => "Connecting...  ESC: cancel",
        LobbyState::HostWaiting => "SPACE: start when both players are in  ESC: close session",
        LobbyState::ClientWaiting => "Waiting for host  ESC: leave",
        LobbyState::Countdown => "ESC: cancel countdown",
        LobbyState::Playing => {
            "WASD: move  arrows: aim  SPACE: shoot  p: pause  r: restart  l: lobby  m: menu"
        }
    };

    let paragraph = Paragraph::new(text).block(block).style(
        Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::ITALIC),
    );

    frame.render_widget(paragraph, area);
}

fn role_name(role: Option<Role>) -> &'static str {
    match role {
        Some(Role::Host) => "host",
        Some(Role::Joiner) => "joiner",
        None => "-",
    }
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
    } else {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
