//! The activity log is what the teacher scrolls through next to the status
//! board: status changes, rejected lines, link health and general messages.
//!
//! Entries live in a bounded in-memory list. Each entry is also mirrored to
//! the [log] facade and, when a log file is attached, appended to that file
//! as a plain text line.

use crate::error::QubeError;

use chrono::{DateTime, Local};
use log::{error, info, warn};
use std::{
    collections::{BTreeMap, VecDeque},
    fmt,
    fs::{File, OpenOptions},
    io::{BufWriter, LineWriter, Write},
    path::Path,
};

/// The kind of an activity log entry. Kinds can be hidden individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogKind {
    /// A student changed status.
    Status,
    /// Something went wrong, e.g. a rejected line.
    Error,
    /// Connection health warnings.
    Health,
    /// Everything else.
    Info,
}

impl LogKind {
    /// Every kind, in display order.
    pub const ALL: [LogKind; 4] = [LogKind::Status, LogKind::Error, LogKind::Health, LogKind::Info];

    /// The upper case name used in log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            LogKind::Status => "STATUS",
            LogKind::Error => "ERROR",
            LogKind::Health => "HEALTH",
            LogKind::Info => "INFO",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the activity log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// When the entry was recorded.
    pub time: DateTime<Local>,
    /// What kind of entry this is.
    pub kind: LogKind,
    /// The text of the entry.
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.time.format("%H:%M:%S"),
            self.kind,
            self.message
        )
    }
}

/// A bounded, filterable list of [`LogEntry`]s.
pub struct ActivityLog {
    entries: VecDeque<LogEntry>,
    max_entries: usize,
    display_entries: usize,
    shown: [bool; 4],
    sinks: Vec<Box<dyn Write + Send>>,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(1000, 200)
    }
}

impl ActivityLog {
    /// Keeps at most `max_entries` in memory and shows at most
    /// `display_entries` of them. Only errors are shown at first.
    pub fn new(max_entries: usize, display_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_entries: max_entries.max(1),
            display_entries,
            shown: [false, true, false, false],
            sinks: Vec::new(),
        }
    }

    /// Appends every future entry to `path`, creating it if needed.
    pub fn attach_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), QubeError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        self.attach_writer(LineWriter::new(file));
        Ok(())
    }

    /// Writes every future entry to `out` as a text line. A writer that
    /// fails once is dropped.
    pub fn attach_writer<W: Write + Send + 'static>(&mut self, out: W) {
        self.sinks.push(Box::new(out));
    }

    /// Records a message of the given kind.
    pub fn push<S: Into<String>>(&mut self, kind: LogKind, message: S) {
        let entry = LogEntry {
            time: Local::now(),
            kind,
            message: message.into(),
        };

        match kind {
            LogKind::Error => error!("{}", entry.message),
            LogKind::Health => warn!("{}", entry.message),
            LogKind::Status | LogKind::Info => info!("{}", entry.message),
        }

        self.sinks.retain_mut(|out| match writeln!(out, "{}", entry) {
            Ok(()) => true,
            Err(e) => {
                warn!("Dropping activity log output after write failure: {}", e);
                false
            }
        });

        self.entries.push_back(entry);
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
    }

    /// Whether entries of `kind` pass the filter.
    pub fn is_shown(&self, kind: LogKind) -> bool {
        self.shown[kind.index()]
    }

    /// Shows or hides entries of `kind`.
    pub fn set_filter(&mut self, kind: LogKind, shown: bool) {
        self.shown[kind.index()] = shown;
    }

    /// Flips whether `kind` is shown and returns the new setting.
    pub fn toggle(&mut self, kind: LogKind) -> bool {
        let shown = !self.is_shown(kind);
        self.set_filter(kind, shown);
        shown
    }

    /// The newest entries that pass the filter, oldest first.
    pub fn visible(&self) -> Vec<&LogEntry> {
        let mut visible: Vec<_> = self
            .entries
            .iter()
            .rev()
            .filter(|e| self.is_shown(e.kind))
            .take(self.display_entries)
            .collect();
        visible.reverse();
        visible
    }

    /// Every entry in memory, oldest first, ignoring the filter.
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Forgets every entry. Attached outputs are left alone.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.push(LogKind::Info, "Activity log cleared");
    }

    /// Writes every entry to `path` with an export header.
    pub fn export<P: AsRef<Path>>(&mut self, path: P) -> Result<(), QubeError> {
        let path = path.as_ref();
        match self.write_export(path) {
            Ok(()) => {
                self.push(LogKind::Info, format!("Log exported to {}", path.display()));
                Ok(())
            }
            Err(e) => {
                self.push(LogKind::Error, format!("Log export failed: {}", e));
                Err(e)
            }
        }
    }

    fn write_export(&self, path: &Path) -> Result<(), QubeError> {
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(
            out,
            "Qube Monitor Log Export - {}",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        )?;
        writeln!(out, "{}", "=".repeat(60))?;
        writeln!(out)?;
        for entry in &self.entries {
            writeln!(out, "{}", entry)?;
        }
        out.flush()?;
        Ok(())
    }

    /// All entries as text, one per line.
    pub fn text(&self) -> String {
        self.entries
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Number of entries per kind.
    pub fn stats(&self) -> BTreeMap<LogKind, usize> {
        let mut stats: BTreeMap<_, _> = LogKind::ALL.iter().map(|&k| (k, 0)).collect();
        for entry in &self.entries {
            *stats.entry(entry.kind).or_insert(0) += 1;
        }
        stats
    }

    /// Number of entries in memory.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there is nothing here.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
