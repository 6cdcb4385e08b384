//! Crash reports. When the monitor panics, a report is left behind in a
//! `crash_reports` directory: a `.txt` file a person can read and a `.ron`
//! file with the same content for tools. Both share a timestamped name,
//! `crash_report_<YYYYmmdd_HHMMSS_mmm>`.

use crate::error::QubeError;

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::{
    any::Any,
    backtrace::Backtrace,
    env, fs,
    path::{Path, PathBuf},
    thread,
};

/// Directory crash reports are written to, relative to the working
/// directory.
pub const CRASH_DIR: &str = "crash_reports";

/// The machine the monitor ran on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    /// Operating system, e.g. `linux`.
    pub os: String,
    /// OS family, e.g. `unix`.
    pub family: String,
    /// CPU architecture, e.g. `x86_64`.
    pub arch: String,
}

impl SystemInfo {
    /// Describes the machine this is running on.
    pub fn current() -> Self {
        Self {
            os: env::consts::OS.to_owned(),
            family: env::consts::FAMILY.to_owned(),
            arch: env::consts::ARCH.to_owned(),
        }
    }
}

/// Everything known about one crash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashReport {
    /// Local time of the crash, RFC 3339.
    pub timestamp: String,
    /// Program name and version.
    pub app: String,
    /// The panic message.
    pub message: String,
    /// Source location of the panic, if known.
    pub location: Option<String>,
    /// Name of the panicking thread, if it has one.
    pub thread: Option<String>,
    /// Command line the monitor was started with.
    pub args: Vec<String>,
    /// Working directory at the time of the crash.
    pub working_directory: Option<String>,
    /// Where the monitor ran.
    pub system: SystemInfo,
    /// Captured backtrace, possibly empty.
    pub backtrace: String,
}

impl CrashReport {
    /// Collects a report for a panic with `message` raised at `location`,
    /// on the current thread.
    pub fn new<S: Into<String>>(message: S, location: Option<String>) -> Self {
        Self {
            timestamp: Local::now().to_rfc3339(),
            app: format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            message: message.into(),
            location,
            thread: thread::current().name().map(str::to_owned),
            args: env::args().collect(),
            working_directory: env::current_dir()
                .ok()
                .map(|dir| dir.display().to_string()),
            system: SystemInfo::current(),
            backtrace: Backtrace::force_capture().to_string(),
        }
    }

    /// The human readable form of the report.
    pub fn text(&self) -> String {
        let mut text = format!(
            "{} crash report\n{}\n\nTime: {}\nPanic: {}\nLocation: {}\nThread: {}\n",
            self.app,
            "=".repeat(60),
            self.timestamp,
            self.message,
            self.location.as_deref().unwrap_or("unknown"),
            self.thread.as_deref().unwrap_or("unnamed"),
        );
        text.push_str(&format!(
            "System: {} ({}, {})\nArguments: {}\nWorking directory: {}\n\nBacktrace:\n{}\n",
            self.system.os,
            self.system.family,
            self.system.arch,
            self.args.join(" "),
            self.working_directory.as_deref().unwrap_or("unknown"),
            self.backtrace,
        ));
        text
    }

    /// Writes the `.txt` and `.ron` reports into `dir`, creating it when
    /// needed. Returns the path of the text report.
    pub fn write<P: AsRef<Path>>(&self, dir: P) -> Result<PathBuf, QubeError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let stem = format!("crash_report_{}", Local::now().format("%Y%m%d_%H%M%S_%3f"));
        let ron_path = dir.join(format!("{}.ron", stem));
        let txt_path = dir.join(format!("{}.txt", stem));

        let ron = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(&ron_path, ron)?;
        fs::write(&txt_path, self.text())?;
        Ok(txt_path)
    }
}

/// The message carried by a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_owned()
    }
}
