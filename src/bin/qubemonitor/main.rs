//! The `qubemonitor` command. Opens the status dashboard by default.

use clap::Parser;
use crossterm::{
    event::DisableMouseCapture,
    execute,
    terminal::{disable_raw_mode, LeaveAlternateScreen},
};
use env_logger::{Builder, Env, Target};
use log::{error, info};
use qube::{
    activity_log::LogKind,
    args::{CommandTask, QubeArgs, SimulateCommand},
    config::MonitorConfig,
    crash_report::{panic_message, CrashReport, CRASH_DIR},
    error::QubeError,
    gui::{device_selector, run_dashboard, Dashboard},
    link::{available_ports, SerialLink, SignalSource},
    monitor::Monitor,
    roster::Roster,
    simulator::{Classroom, ClassroomSim},
};
use std::{
    fs::File,
    io, panic,
    thread::{self, sleep},
    time::Duration,
};

/// Where diagnostics go while the dashboard owns the terminal.
const DIAGNOSTICS_FILE: &str = "qubemonitor.log";

const LISTEN_POLL: Duration = Duration::from_millis(50);

// Example:
// cargo run -- --port /dev/ttyACM0 --roster klas.txt
// cargo run -- simulate --speed 10 --students 12

fn main() {
    let args = QubeArgs::parse();
    let command = args.command.clone().unwrap_or(CommandTask::Monitor);
    init_logging(&command);
    install_panic_hook();

    if let Err(e) = run(&args, command) {
        error!("{}", e);
        eprintln!("qubemonitor: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(command: &CommandTask) {
    let dashboard = matches!(command, CommandTask::Monitor | CommandTask::Simulate(_));
    let default_filter = if dashboard { "info" } else { "warn" };
    let mut builder = Builder::from_env(Env::default().default_filter_or(default_filter));
    if dashboard {
        match File::create(DIAGNOSTICS_FILE) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            // nowhere to write without garbling the dashboard
            Err(_) => {
                builder.filter_level(log::LevelFilter::Off);
            }
        }
    }
    builder.init();
}

/// Gives the terminal back and leaves a crash report behind on panic.
fn install_panic_hook() {
    panic::set_hook(Box::new(|info| {
        // only the main thread ever owns the terminal
        if thread::current().name() == Some("main") {
            let _ = disable_raw_mode();
            let _ = execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture);
        }

        let message = panic_message(info.payload());
        let location = info.location().map(|l| l.to_string());
        error!(
            "panic: {} at {}",
            message,
            location.as_deref().unwrap_or("unknown location")
        );

        match CrashReport::new(message, location).write(CRASH_DIR) {
            Ok(path) => eprintln!("qubemonitor crashed, report written to {}", path.display()),
            Err(e) => eprintln!("qubemonitor crashed, writing the crash report failed: {}", e),
        }
    }));
}

fn run(args: &QubeArgs, command: CommandTask) -> Result<(), QubeError> {
    let mut config = match &args.config {
        Some(path) => MonitorConfig::load(path)?,
        None => MonitorConfig::default(),
    };
    if let Some(baud) = args.baud {
        config.baud_rate = baud;
    }

    match command {
        CommandTask::Ports => list_ports(),
        CommandTask::Listen => {
            let port = args.port.clone().ok_or(QubeError::NoPort)?;
            let mut monitor = build_monitor(args, &config, Roster::example)?;
            monitor.log_mut().attach_writer(io::stdout());
            let link = SerialLink::connect(&port, &config)?;
            listen(&mut monitor, link);
            Ok(())
        }
        CommandTask::Monitor => {
            let port = match &args.port {
                Some(port) => port.clone(),
                None => device_selector(available_ports()?)?
                    .ok_or(QubeError::NoPort)?
                    .to_string_lossy()
                    .into_owned(),
            };
            let mut monitor = build_monitor(args, &config, Roster::example)?;
            let mut link = SerialLink::connect(&port, &config)?;
            let res = run_dashboard(&mut monitor, &mut link, Dashboard::new(args.export.clone()));
            link.stop();
            Ok(res?)
        }
        CommandTask::Simulate(sim) => simulate(args, &config, &sim),
    }
}

fn list_ports() -> Result<(), QubeError> {
    let ports = available_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    } else {
        println!("Available devices:");
        for port in ports {
            println!("\t{}", port.to_string_lossy());
        }
    }
    Ok(())
}

/// Builds the monitor from the roster file given on the command line, or
/// from `fallback` when there is none, and attaches the log file.
fn build_monitor<F>(args: &QubeArgs, config: &MonitorConfig, fallback: F) -> Result<Monitor, QubeError>
where
    F: FnOnce() -> Roster,
{
    let mut monitor = match &args.roster {
        Some(path) => Monitor::with_roster_file(config, path)?,
        None => Monitor::new(config, fallback()),
    };
    if let Some(path) = &args.log_file {
        monitor.log_mut().attach_file(path)?;
    }
    let message = format!(
        "Qube Monitor started with {} students",
        monitor.roster().len()
    );
    monitor.log_mut().push(LogKind::Info, message);
    Ok(monitor)
}

/// Prints activity until the process is interrupted.
fn listen(monitor: &mut Monitor, mut link: SerialLink) {
    info!("Listening on {}", link.port_name());
    loop {
        monitor.drain(&mut link);
        sleep(LISTEN_POLL);
    }
}

fn simulate(args: &QubeArgs, config: &MonitorConfig, sim: &SimulateCommand) -> Result<(), QubeError> {
    let students = sim.students;
    let mut monitor = build_monitor(args, config, || Roster::numbered(students))?;
    let classroom = Classroom::new(monitor.roster().students(), sim.flip_chance, sim.noise);
    let mut source = ClassroomSim::start(classroom, sim.speed);

    let res = run_dashboard(&mut monitor, &mut source, Dashboard::new(args.export.clone()));
    source.stop();
    Ok(res?)
}
