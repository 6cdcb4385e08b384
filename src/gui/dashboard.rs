use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span},
    widgets::{
        block::{Position, Title},
        Block, Borders, Cell, List, ListItem, Paragraph, Row, Table, TableState,
    },
    Frame, Terminal,
};
use std::{
    io,
    path::PathBuf,
    time::{Duration, Instant},
};

use crate::activity_log::LogKind;
use crate::board::{StatusLabel, Urgency};
use crate::gui::error::GuiError;
use crate::link::SignalSource;
use crate::monitor::Monitor;
use crate::signal::{StatusCode, StudentNumber};

const TICK_RATE: Duration = Duration::from_millis(250);
const ORANGE: Color = Color::Rgb(255, 165, 0);

/// What the event loop should do after a key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep going.
    Continue,
    /// Ask the signal source to reconnect.
    Reconnect,
    /// Leave the dashboard.
    Quit,
}

/// View state of the dashboard. Everything else lives in [`Monitor`].
#[derive(Debug, Clone)]
pub struct Dashboard {
    selected: usize,
    show_log: bool,
    export_path: PathBuf,
}

impl Dashboard {
    /// `export_path` is where `e` writes the activity log.
    pub fn new(export_path: PathBuf) -> Self {
        Self {
            selected: 0,
            show_log: true,
            export_path,
        }
    }

    /// The student under the cursor.
    pub fn selected_student(&self, monitor: &Monitor) -> Option<StudentNumber> {
        monitor
            .board()
            .sorted()
            .get(self.selected)
            .map(|(student, _)| *student)
    }

    /// Applies one key press. Keys that change data go through `monitor`,
    /// so everything they do lands in the activity log.
    pub fn handle_key(&mut self, code: KeyCode, monitor: &mut Monitor, now: Instant) -> Flow {
        let rows = monitor.board().len();
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return Flow::Quit,
            KeyCode::Down | KeyCode::Char('j') => {
                if self.selected + 1 < rows {
                    self.selected += 1;
                }
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected = self.selected.saturating_sub(1);
            }
            KeyCode::Enter | KeyCode::Char('o') => {
                if let Some(student) = self.selected_student(monitor) {
                    let active = monitor
                        .board()
                        .get(student)
                        .map_or(false, |s| s.code.is_active());
                    if active {
                        monitor.resolve(student, now);
                    }
                }
            }
            KeyCode::Char(c @ '1'..='4') => {
                let kind = LogKind::ALL[c as usize - '1' as usize];
                monitor.log_mut().toggle(kind);
            }
            KeyCode::Char('c') => monitor.log_mut().clear(),
            KeyCode::Char('e') => {
                // failures end up in the activity log
                let _ = monitor.log_mut().export(&self.export_path);
            }
            KeyCode::Char('l') => self.show_log = !self.show_log,
            KeyCode::Char('r') => {
                let _ = monitor.reload_roster();
            }
            KeyCode::Char('x') => monitor.clear_statuses(),
            KeyCode::Char('p') => return Flow::Reconnect,
            _ => {}
        }
        self.clamp(monitor.board().len());
        Flow::Continue
    }

    fn clamp(&mut self, rows: usize) {
        self.selected = self.selected.min(rows.saturating_sub(1));
    }
}

/// Runs the dashboard until the user quits, feeding it from `source`.
pub fn run_dashboard<S>(
    monitor: &mut Monitor,
    source: &mut S,
    dashboard: Dashboard,
) -> Result<(), GuiError>
where
    S: SignalSource + ?Sized,
{
    // setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, monitor, source, dashboard);

    // restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    Ok(res?)
}

fn run_app<B: Backend, S: SignalSource + ?Sized>(
    terminal: &mut Terminal<B>,
    monitor: &mut Monitor,
    source: &mut S,
    mut dashboard: Dashboard,
) -> io::Result<()> {
    let mut last_tick = Instant::now();
    loop {
        monitor.drain(source);
        dashboard.clamp(monitor.board().len());
        terminal.draw(|f| ui(f, monitor, &dashboard, Instant::now()))?;

        let timeout = TICK_RATE
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match dashboard.handle_key(key.code, monitor, Instant::now()) {
                        Flow::Quit => return Ok(()),
                        Flow::Reconnect => source.reconnect(),
                        Flow::Continue => {}
                    }
                }
            }
        }
        if last_tick.elapsed() >= TICK_RATE {
            last_tick = Instant::now();
        }
    }
}

fn status_style(label: StatusLabel) -> Style {
    let color = match label {
        StatusLabel::Code(StatusCode::Available) => Color::Green,
        StatusLabel::Code(StatusCode::Question) => ORANGE,
        StatusLabel::Code(StatusCode::HelpNeeded) => Color::Red,
        StatusLabel::Resolved => Color::Blue,
    };
    Style::default().fg(color).add_modifier(Modifier::BOLD)
}

fn urgency_style(urgency: Urgency) -> Style {
    let style = Style::default().add_modifier(Modifier::BOLD);
    match urgency {
        Urgency::Normal => style,
        Urgency::Warning => style.fg(ORANGE),
        Urgency::Critical => style.fg(Color::Red),
    }
}

fn kind_style(kind: LogKind) -> Style {
    let color = match kind {
        LogKind::Status => Color::LightBlue,
        LogKind::Error => Color::Red,
        LogKind::Health => ORANGE,
        LogKind::Info => Color::White,
    };
    Style::default().fg(color)
}

fn ui(f: &mut Frame, monitor: &Monitor, dashboard: &Dashboard, now: Instant) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(5)])
        .split(f.size());

    header(f, chunks[0], monitor);

    if dashboard.show_log {
        let body = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(chunks[1]);
        student_table(f, body[0], monitor, dashboard, now);
        activity_log(f, body[1], monitor);
    } else {
        student_table(f, chunks[1], monitor, dashboard, now);
    }
}

fn header(f: &mut Frame, area: Rect, monitor: &Monitor) {
    let connection = match monitor.connection() {
        Some(state) if state.is_up() => Span::styled(state.to_string(), Style::default().fg(Color::Green)),
        Some(state) => Span::styled(state.to_string(), Style::default().fg(Color::Red)),
        None => Span::styled("Not connected", Style::default().fg(Color::Gray)),
    };

    let mut spans = vec![
        " Status: ".into(),
        connection,
        format!(
            "  |  {} students, {} active  |  Log:",
            monitor.roster().len(),
            monitor.board().active().len()
        )
        .into(),
    ];
    for (i, kind) in LogKind::ALL.iter().enumerate() {
        let mark = if monitor.log().is_shown(*kind) { "x" } else { " " };
        spans.push(Span::styled(
            format!(" {}:{}[{}]", i + 1, kind, mark),
            kind_style(*kind),
        ));
    }

    let block = Block::default()
        .title(Title::from(" Qube Monitor ".magenta().bold()).alignment(Alignment::Center))
        .borders(Borders::ALL);
    f.render_widget(Paragraph::new(Line::from(spans)).block(block), area);
}

fn student_table(f: &mut Frame, area: Rect, monitor: &Monitor, dashboard: &Dashboard, now: Instant) {
    let board = monitor.board();
    let rows: Vec<Row> = board
        .sorted()
        .into_iter()
        .map(|(student, status)| {
            let waiting = match board.duration(student, now) {
                Some((text, urgency)) => Cell::from(text).style(urgency_style(urgency)),
                None => Cell::from(""),
            };
            Row::new(vec![
                Cell::from(student.to_string()),
                Cell::from(monitor.roster().name(student)),
                Cell::from(status.label.text()).style(status_style(status.label)),
                Cell::from(status.received_at.format("%H:%M:%S").to_string()),
                waiting,
            ])
        })
        .collect();

    let instructions = Title::from(Line::from(vec![
        " Resolve ".into(),
        "<Enter>".magenta().bold(),
        " Log ".into(),
        "<1-4>/<L>".magenta().bold(),
        " Export ".into(),
        "<E>".magenta().bold(),
        " Roster ".into(),
        "<R>".magenta().bold(),
        " Reconnect ".into(),
        "<P>".magenta().bold(),
        " Quit ".into(),
        "<Q> ".magenta().bold(),
    ]));
    let block = Block::default()
        .title(Title::from(" Students ".bold()))
        .title(
            instructions
                .alignment(Alignment::Center)
                .position(Position::Bottom),
        )
        .borders(Borders::ALL);

    let widths = [
        Constraint::Length(8),
        Constraint::Min(12),
        Constraint::Length(12),
        Constraint::Length(9),
        Constraint::Length(8),
    ];
    let table = Table::new(rows, widths)
        .header(
            Row::new(vec!["Number", "Name", "Status", "Time", "Waiting"])
                .style(Style::default().add_modifier(Modifier::BOLD)),
        )
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .highlight_symbol(">>")
        .block(block);

    let mut state = TableState::default();
    if !board.is_empty() {
        state.select(Some(dashboard.selected));
    }
    f.render_stateful_widget(table, area, &mut state);
}

fn activity_log(f: &mut Frame, area: Rect, monitor: &Monitor) {
    // newest on top
    let items: Vec<ListItem> = monitor
        .log()
        .visible()
        .into_iter()
        .rev()
        .map(|entry| ListItem::new(entry.to_string()).style(kind_style(entry.kind)))
        .collect();

    let block = Block::default()
        .title(Title::from(" Activity ".bold()))
        .borders(Borders::ALL);
    f.render_widget(List::new(items).block(block), area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::roster::Roster;
    use ratatui::backend::TestBackend;
    use std::fs;
    use tempfile::tempdir;

    fn monitor() -> Monitor {
        let (roster, _) = Roster::parse("111111:Ali\n222222:Bea\n333333:Cas");
        Monitor::new(&MonitorConfig::default(), roster)
    }

    fn screen(monitor: &Monitor, dashboard: &Dashboard) -> String {
        let mut terminal = Terminal::new(TestBackend::new(120, 20)).unwrap();
        terminal
            .draw(|f| ui(f, monitor, dashboard, Instant::now()))
            .unwrap();
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|c| c.symbol())
            .collect()
    }

    #[test]
    fn enter_resolves_the_selected_request() {
        let mut monitor = monitor();
        let mut dashboard = Dashboard::new(PathBuf::from("unused.txt"));
        let t0 = Instant::now();
        monitor.handle_line("L,111111,V", t0);
        monitor.handle_line("L,222222,R", t0);

        // Bea needs help and is listed first
        assert_eq!(
            dashboard.selected_student(&monitor).map(|s| s.get()),
            Some(222222)
        );
        dashboard.handle_key(KeyCode::Down, &mut monitor, t0);
        dashboard.handle_key(KeyCode::Enter, &mut monitor, t0);

        let ali = StudentNumber::new(111111).unwrap();
        assert_eq!(monitor.board().get(ali).unwrap().label, StatusLabel::Resolved);
        assert_eq!(monitor.board().active().len(), 1);
    }

    #[test]
    fn cursor_stays_on_the_board() {
        let mut monitor = monitor();
        let mut dashboard = Dashboard::new(PathBuf::from("unused.txt"));
        let t0 = Instant::now();
        monitor.handle_line("L,111111,V", t0);

        dashboard.handle_key(KeyCode::Down, &mut monitor, t0);
        dashboard.handle_key(KeyCode::Down, &mut monitor, t0);
        assert_eq!(dashboard.selected, 0);
        dashboard.handle_key(KeyCode::Up, &mut monitor, t0);
        assert_eq!(dashboard.selected, 0);
    }

    #[test]
    fn keys_drive_the_log() {
        let mut monitor = monitor();
        let dir = tempdir().unwrap();
        let export = dir.path().join("log.txt");
        let mut dashboard = Dashboard::new(export.clone());
        let t0 = Instant::now();

        dashboard.handle_key(KeyCode::Char('1'), &mut monitor, t0);
        assert!(monitor.log().is_shown(LogKind::Status));
        dashboard.handle_key(KeyCode::Char('2'), &mut monitor, t0);
        assert!(!monitor.log().is_shown(LogKind::Error));

        monitor.handle_line("L,333333,R", t0);
        dashboard.handle_key(KeyCode::Char('e'), &mut monitor, t0);
        assert!(fs::read_to_string(&export)
            .unwrap()
            .contains("STATUS: Cas (333333): Hulp nodig"));

        assert_eq!(
            dashboard.handle_key(KeyCode::Char('p'), &mut monitor, t0),
            Flow::Reconnect
        );
        assert_eq!(
            dashboard.handle_key(KeyCode::Char('q'), &mut monitor, t0),
            Flow::Quit
        );
    }

    #[test]
    fn renders_students_and_log() {
        let mut monitor = monitor();
        let t0 = Instant::now();
        monitor.handle_line("L,222222,R", t0);
        monitor.handle_line("nonsense", t0);

        let text = screen(&monitor, &Dashboard::new(PathBuf::from("unused.txt")));
        assert!(text.contains("Bea"));
        assert!(text.contains("Hulp nodig"));
        assert!(text.contains("Not connected"));
        assert!(text.contains("ERROR"));
    }

    #[test]
    fn log_pane_can_be_hidden() {
        let mut monitor = monitor();
        let mut dashboard = Dashboard::new(PathBuf::from("unused.txt"));
        monitor.handle_line("nonsense", Instant::now());
        dashboard.handle_key(KeyCode::Char('l'), &mut monitor, Instant::now());

        let text = screen(&monitor, &dashboard);
        assert!(!text.contains("Activity"));
    }
}
