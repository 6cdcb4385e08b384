//! The monitor ties the pieces together. It owns the roster, the status
//! board and the activity log, and it is the only place where they change:
//! link events come in through [`Monitor::handle_event`], teacher actions
//! through the other methods, and every outcome is written to the activity
//! log.

use crate::activity_log::{ActivityLog, LogKind};
use crate::board::{Board, Update};
use crate::config::MonitorConfig;
use crate::error::QubeError;
use crate::link::{ConnectionState, LinkEvent, SignalSource};
use crate::roster::Roster;
use crate::signal::{QubeSignal, StudentNumber};

use log::debug;
use std::{
    path::{Path, PathBuf},
    time::Instant,
};

/// Application state of the Qube Monitor.
pub struct Monitor {
    roster: Roster,
    roster_path: Option<PathBuf>,
    board: Board,
    log: ActivityLog,
    connection: Option<ConnectionState>,
}

impl Monitor {
    /// A monitor for `roster` with an empty board and log.
    pub fn new(config: &MonitorConfig, roster: Roster) -> Self {
        Self {
            roster,
            roster_path: None,
            board: Board::new(config),
            log: ActivityLog::new(config.max_log_entries, config.log_display_entries),
            connection: None,
        }
    }

    /// Loads the roster from `path` and remembers it for
    /// [`Monitor::reload_roster`].
    pub fn with_roster_file<P: AsRef<Path>>(
        config: &MonitorConfig,
        path: P,
    ) -> Result<Self, QubeError> {
        let roster = Roster::load(&path)?;
        let mut monitor = Self::new(config, roster);
        monitor.roster_path = Some(path.as_ref().to_path_buf());
        Ok(monitor)
    }

    /// The students the monitor listens to.
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// The file the roster came from, if it came from one.
    pub fn roster_path(&self) -> Option<&Path> {
        self.roster_path.as_deref()
    }

    /// The current status of every student.
    pub fn board(&self) -> &Board {
        &self.board
    }

    /// The activity log.
    pub fn log(&self) -> &ActivityLog {
        &self.log
    }

    /// The activity log, for changing filters or attaching outputs.
    pub fn log_mut(&mut self) -> &mut ActivityLog {
        &mut self.log
    }

    /// The last reported connection state, if any.
    pub fn connection(&self) -> Option<&ConnectionState> {
        self.connection.as_ref()
    }

    /// Applies every event `source` has pending and returns how many there
    /// were.
    pub fn drain<S: SignalSource + ?Sized>(&mut self, source: &mut S) -> usize {
        let mut handled = 0;
        while let Some(event) = source.next() {
            self.handle_event(event, Instant::now());
            handled += 1;
        }
        handled
    }

    /// Applies one event from a signal source.
    pub fn handle_event(&mut self, event: LinkEvent, now: Instant) {
        match event {
            LinkEvent::Line(line) => {
                self.handle_line(&line, now);
            }
            LinkEvent::Status(state) => {
                let kind = match state {
                    ConnectionState::ReconnectFailed(_) | ConnectionState::Lost(_) => {
                        LogKind::Error
                    }
                    _ => LogKind::Info,
                };
                self.log.push(kind, state.to_string());
                self.connection = Some(state);
            }
            LinkEvent::Health(message) => self.log.push(LogKind::Health, message),
        }
    }

    /// Decodes one receiver line and applies it to the board. Returns what
    /// the board made of it, or `None` when the line was rejected.
    pub fn handle_line(&mut self, line: &str, now: Instant) -> Option<Update> {
        debug!("Received: {}", line);
        let signal: QubeSignal = match line.parse() {
            Ok(signal) => signal,
            Err(e) => {
                self.log
                    .push(LogKind::Error, format!("Rejected line {:?}: {}", line, e));
                return None;
            }
        };

        let update = self.board.apply(&signal, &self.roster, now);
        match &update {
            Update::Changed(status) => {
                let message = format!(
                    "{} ({}): {}",
                    self.roster.name(signal.student),
                    signal.student,
                    status.label.text()
                );
                self.log.push(LogKind::Status, message);
            }
            Update::NotAllowed => self.log.push(
                LogKind::Error,
                format!("Student {} not in roster, ignored", signal.student),
            ),
            Update::Duplicate => debug!("Duplicate message for student {}", signal.student),
            Update::Repeat => debug!("Status repeat for student {}", signal.student),
        }
        Some(update)
    }

    /// Marks a student's request as handled by the teacher.
    pub fn resolve(&mut self, student: StudentNumber, now: Instant) -> bool {
        if !self.board.resolve(student, now) {
            return false;
        }
        let message = format!(
            "{} ({}): Problem resolved by teacher",
            self.roster.name(student),
            student
        );
        self.log.push(LogKind::Status, message);
        true
    }

    /// Swaps in a new roster; students that are no longer on it disappear
    /// from the board.
    pub fn replace_roster(&mut self, roster: Roster) {
        self.roster = roster;
        self.board.retain(&self.roster);
        let (allowed, with_status) = self.board.counts(&self.roster);
        let message = format!(
            "Student list updated: {} allowed, {} active",
            allowed, with_status
        );
        self.log.push(LogKind::Info, message);
    }

    /// Reads the roster file again. Does nothing when the roster did not
    /// come from a file.
    pub fn reload_roster(&mut self) -> Result<(), QubeError> {
        let Some(path) = self.roster_path.clone() else {
            self.log.push(LogKind::Info, "No roster file to reload");
            return Ok(());
        };
        match Roster::load(&path) {
            Ok(roster) => {
                self.replace_roster(roster);
                Ok(())
            }
            Err(e) => {
                self.log.push(
                    LogKind::Error,
                    format!("Error updating student list from {}: {}", path.display(), e),
                );
                Err(e)
            }
        }
    }

    /// Empties the board.
    pub fn clear_statuses(&mut self) {
        self.board.clear();
        self.log.push(LogKind::Info, "Cleared all student statuses");
    }
}
