//! Commandline argument parser using clap for the Qube Monitor

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Watches the Qubes of a classroom and shows who needs help
#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct QubeArgs {
    #[command(subcommand)]
    /// What to do; opens the dashboard when left out
    pub command: Option<CommandTask>,

    /// Serial port of the receiver, e.g. /dev/ttyACM0. Asked for when left out
    #[arg(short = 'p', long = "port", global = true)]
    pub port: Option<String>,

    /// Baud rate of the serial port
    #[arg(short = 'b', long = "baud", global = true)]
    pub baud: Option<u32>,

    /// Roster file with one `number:name` per line
    #[arg(short = 'r', long = "roster", global = true)]
    pub roster: Option<PathBuf>,

    /// Append every activity log entry to this file
    #[arg(short = 'l', long = "log-file", global = true)]
    pub log_file: Option<PathBuf>,

    /// Configuration file in RON format
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Where the dashboard exports the activity log to
    #[arg(
        short = 'e',
        long = "export",
        global = true,
        default_value = "qube_log_export.txt"
    )]
    pub export: PathBuf,
}

/// The things `qubemonitor` can do
#[derive(Debug, Subcommand, Clone, PartialEq)]
pub enum CommandTask {
    /// Show the status dashboard for a connected receiver
    #[command(about)]
    Monitor,

    /// Print the activity log of a connected receiver, without the dashboard
    #[command(about)]
    Listen,

    /// List the serial ports on this machine
    #[command(about)]
    Ports,

    /// Show the dashboard fed by a simulated classroom
    #[command(about)]
    Simulate(SimulateCommand),
}

/// Settings of the simulated classroom
#[derive(Debug, Args, Clone, PartialEq)]
#[command(about)]
pub struct SimulateCommand {
    /// Time multiplier, 2.0 runs the classroom twice as fast
    #[arg(short = 's', long = "speed", default_value_t = 1.0, value_parser = speed)]
    pub speed: f64,

    /// Chance per tick that a Qube is turned to another face
    #[arg(short = 'f', long = "flip", default_value_t = 0.01, value_parser = probability)]
    pub flip_chance: f64,

    /// Chance per tick that the receiver prints a garbled line
    #[arg(short = 'g', long = "noise", default_value_t = 0.0, value_parser = probability)]
    pub noise: f64,

    /// Number of students to make up when no roster is given
    #[arg(short = 'n', long = "students", default_value_t = 20)]
    pub students: u32,
}

fn probability(s: &str) -> Result<f64, String> {
    let p: f64 = s.parse().map_err(|e| format!("{}", e))?;
    if (0.0..=1.0).contains(&p) {
        Ok(p)
    } else {
        Err(format!("{} is not a chance between 0 and 1", s))
    }
}

fn speed(s: &str) -> Result<f64, String> {
    let speed: f64 = s.parse().map_err(|e| format!("{}", e))?;
    if speed.is_finite() && speed > 0.0 {
        Ok(speed)
    } else {
        Err(format!("{} is not a positive speed", s))
    }
}
