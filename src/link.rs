//! The serial link to the receiver.
//!
//! [`SerialLink`] owns one background thread that reads the port, cuts the
//! byte stream into lines and hands them over a channel as [`LinkEvent`]s.
//! The same thread watches the connection: it reopens the port when reads
//! fail, when the receiver has been silent for too long, when the port
//! disappears from the system, and on a fixed schedule.

use crate::config::MonitorConfig;
use crate::error::QubeError;

use log::{debug, info, warn};
use serial2::SerialPort;
use std::{
    fmt, io,
    path::{Path, PathBuf},
    sync::mpsc::{self, Receiver, Sender, TryRecvError},
    thread::{self, sleep, JoinHandle},
    time::{Duration, Instant},
};

/// How long the reader sleeps when it has no open port.
const IDLE_SLEEP: Duration = Duration::from_millis(100);

/// Written to the port to check that it still accepts data.
const HEALTH_CHECK_PROBE: &[u8] = b"HEALTH_CHECK\n";

/// Changes in the state of the serial connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// The port was opened on request.
    Connected(String),
    /// The port was reopened by the health check.
    Reconnected(String),
    /// Reopening the port failed; the next health check tries again.
    ReconnectFailed(String),
    /// Reading failed and the port was closed.
    Lost(String),
    /// The link was stopped on request.
    Disconnected,
}

impl ConnectionState {
    /// Whether the port is usable in this state.
    pub fn is_up(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connected(_) | ConnectionState::Reconnected(_)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ConnectionState as CS;
        match self {
            CS::Connected(port) => write!(f, "Connected to {}", port),
            CS::Reconnected(port) => write!(f, "Reconnected to {}", port),
            CS::ReconnectFailed(e) => write!(f, "Reconnection failed: {}", e),
            CS::Lost(e) => write!(f, "Serial connection lost: {}", e),
            CS::Disconnected => write!(f, "Disconnected from serial port"),
        }
    }
}

/// Everything a signal source reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// One line as printed by the receiver, already trimmed.
    Line(String),
    /// The connection changed state.
    Status(ConnectionState),
    /// A warning about the connection's health.
    Health(String),
}

/// Anything that produces [`LinkEvent`]s in the background: the real serial
/// link or the classroom simulator. Iterating yields the events that are
/// pending right now and never blocks.
pub trait SignalSource: Iterator<Item = LinkEvent> {
    /// Stops the background work. Events produced before stopping can still
    /// be drained afterwards.
    fn stop(&mut self);

    /// Asks the source to reopen its connection. Sources without a
    /// connection ignore it.
    fn reconnect(&mut self) {}
}

/// Lists the serial ports present on this machine.
pub fn available_ports() -> Result<Vec<PathBuf>, QubeError> {
    Ok(SerialPort::available_ports()?)
}

/// Cuts a byte stream into newline terminated lines.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buf: Vec<u8>,
}

impl LineAssembler {
    /// An empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds bytes in and returns every line they complete. Invalid UTF-8 is
    /// replaced rather than rejected, since garbage is common right after a
    /// port is opened. Blank lines are dropped.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &c in bytes {
            if c == b'\n' {
                let line = String::from_utf8_lossy(&self.buf).trim().to_owned();
                if !line.is_empty() {
                    lines.push(line);
                }
                self.buf.clear();
            } else {
                self.buf.push(c);
            }
        }
        lines
    }

    /// Drops a partial line, e.g. after the port was reopened.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// Why the link decided to reopen the port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectReason {
    /// The periodic reconnect is due.
    Scheduled,
    /// There is no open port.
    PortClosed,
    /// The connection test failed.
    TestFailed,
    /// Nothing was received for this long.
    Silence(Duration),
}

impl fmt::Display for ReconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconnectReason::Scheduled => write!(f, "scheduled reconnection"),
            ReconnectReason::PortClosed => write!(f, "connection lost"),
            ReconnectReason::TestFailed => write!(f, "connection test failed"),
            ReconnectReason::Silence(d) => write!(f, "no data for {} seconds", d.as_secs()),
        }
    }
}

/// What a health check asks the reader to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthAction {
    /// All is well.
    Nothing,
    /// The receiver has been quiet for this long; worth a warning.
    Warn(Duration),
    /// Reopen the port.
    Reconnect(ReconnectReason),
}

/// Bookkeeping for the connection health rules.
#[derive(Debug, Clone)]
pub struct Health {
    last_line: Instant,
    last_reconnect: Instant,
    last_test: Instant,
    reconnect_interval: Option<Duration>,
    connection_test: Duration,
    heartbeat_warning: Duration,
    heartbeat_reconnect: Duration,
}

impl Health {
    /// Starts every timer at `now`.
    pub fn new(config: &MonitorConfig, now: Instant) -> Self {
        Self {
            last_line: now,
            last_reconnect: now,
            last_test: now,
            reconnect_interval: config.reconnect_interval(),
            connection_test: config.connection_test(),
            heartbeat_warning: config.heartbeat_warning(),
            heartbeat_reconnect: config.heartbeat_reconnect(),
        }
    }

    /// A line came in.
    pub fn saw_line(&mut self, now: Instant) {
        self.last_line = now;
    }

    /// The port was (re)opened; every timer starts over.
    pub fn connected(&mut self, now: Instant) {
        self.last_line = now;
        self.last_reconnect = now;
        self.last_test = now;
    }

    /// Evaluates the rules in order. `test` runs the connection test and is
    /// only called when one is due.
    pub fn check<F>(&mut self, now: Instant, port_open: bool, test: F) -> HealthAction
    where
        F: FnOnce() -> bool,
    {
        if let Some(interval) = self.reconnect_interval {
            if now.saturating_duration_since(self.last_reconnect) > interval {
                return HealthAction::Reconnect(ReconnectReason::Scheduled);
            }
        }

        if !port_open {
            return HealthAction::Reconnect(ReconnectReason::PortClosed);
        }

        if now.saturating_duration_since(self.last_test) > self.connection_test {
            if !test() {
                return HealthAction::Reconnect(ReconnectReason::TestFailed);
            }
            self.last_test = now;
        }

        let silence = now.saturating_duration_since(self.last_line);
        if silence > self.heartbeat_reconnect {
            HealthAction::Reconnect(ReconnectReason::Silence(silence))
        } else if silence > self.heartbeat_warning {
            HealthAction::Warn(silence)
        } else {
            HealthAction::Nothing
        }
    }
}

enum Control {
    Reconnect,
    Stop,
}

/// A serial connection to the receiver, read on a background thread.
pub struct SerialLink {
    port_name: String,
    handle: Option<JoinHandle<()>>,
    control: Sender<Control>,
    events: Receiver<LinkEvent>,
}

impl SerialLink {
    /// Opens `port_name` and starts reading it. Fails when the port cannot
    /// be opened at all; later failures are reported as events.
    pub fn connect(port_name: &str, config: &MonitorConfig) -> Result<Self, QubeError> {
        let port = open_port(port_name, config)?;
        info!("Connected to {}", port_name);
        Ok(Self::start(port_name, port, config))
    }

    /// Starts the reader on a port that is already open. `port_name` is
    /// what the reader reopens when the connection goes bad.
    fn start(port_name: &str, port: SerialPort, config: &MonitorConfig) -> Self {
        let (control_tx, control_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        // the receiver is still in scope, so this cannot fail
        let _ = event_tx.send(LinkEvent::Status(ConnectionState::Connected(
            port_name.to_owned(),
        )));

        let reader = Reader {
            port_name: port_name.to_owned(),
            config: config.clone(),
            port: Some(port),
            health: Health::new(config, Instant::now()),
            lines: LineAssembler::new(),
            events: event_tx,
        };
        let handle = thread::spawn(move || reader.run(control_rx));

        Self {
            port_name: port_name.to_owned(),
            handle: Some(handle),
            control: control_tx,
            events: event_rx,
        }
    }

    /// The port this link reads.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Asks the reader to reopen the port right away.
    pub fn reconnect(&self) {
        if self.control.send(Control::Reconnect).is_err() {
            warn!("Reader for {} is no longer running", self.port_name);
        }
    }

    /// Stops the reader and closes the port. No reconnection is attempted
    /// afterwards.
    pub fn disconnect(&mut self) {
        let _ = self.control.send(Control::Stop);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Reader for {} panicked", self.port_name);
            }
        }
    }
}

impl Iterator for SerialLink {
    type Item = LinkEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.events.try_recv().ok()
    }
}

impl SignalSource for SerialLink {
    fn stop(&mut self) {
        self.disconnect();
    }

    fn reconnect(&mut self) {
        SerialLink::reconnect(self);
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn open_port(port_name: &str, config: &MonitorConfig) -> Result<SerialPort, QubeError> {
    let mut port = SerialPort::open(port_name, config.baud_rate)?;
    port.set_read_timeout(config.read_timeout())?;
    Ok(port)
}

/// Checks that the port is still known to the system and accepts a write.
fn test_port(port: &SerialPort, port_name: &str) -> bool {
    let present = SerialPort::available_ports()
        .map(|ports| ports.iter().any(|p| p == Path::new(port_name)))
        .unwrap_or(false);
    if !present {
        warn!("Port {} no longer available", port_name);
        return false;
    }

    port.write_all(HEALTH_CHECK_PROBE)
        .and_then(|_| port.flush())
        .is_ok()
}

/// The state owned by the reader thread.
struct Reader {
    port_name: String,
    config: MonitorConfig,
    port: Option<SerialPort>,
    health: Health,
    lines: LineAssembler,
    events: Sender<LinkEvent>,
}

impl Reader {
    fn run(mut self, control: Receiver<Control>) {
        let mut buffer = [0; 256];
        let mut next_check = Instant::now() + self.config.health_check();

        loop {
            match control.try_recv() {
                Ok(Control::Stop) | Err(TryRecvError::Disconnected) => break,
                Ok(Control::Reconnect) => self.reopen(),
                Err(TryRecvError::Empty) => {}
            }

            let open = match self.port.as_mut() {
                Some(port) => match port.read(&mut buffer) {
                    // a hung up tty reports readiness but has nothing to read
                    Ok(0) => {
                        warn!("{} returned no data", self.port_name);
                        self.send(LinkEvent::Status(ConnectionState::Lost(
                            "device returned no data".to_owned(),
                        )));
                        false
                    }
                    Ok(read_len) => {
                        let now = Instant::now();
                        for line in self.lines.push(&buffer[..read_len]) {
                            debug!("Received {:?}", line);
                            self.health.saw_line(now);
                            if self.events.send(LinkEvent::Line(line)).is_err() {
                                return;
                            }
                        }
                        true
                    }
                    Err(e) if is_timeout(&e) => true,
                    Err(e) => {
                        warn!("Error reading {}: {}", self.port_name, e);
                        self.send(LinkEvent::Status(ConnectionState::Lost(e.to_string())));
                        false
                    }
                },
                None => {
                    sleep(IDLE_SLEEP);
                    false
                }
            };
            if !open {
                self.port = None;
                self.lines.clear();
            }

            let now = Instant::now();
            if now >= next_check {
                next_check = now + self.config.health_check();
                self.check_health(now);
            }
        }

        self.port = None;
        info!("Reader for {} stopped", self.port_name);
        self.send(LinkEvent::Status(ConnectionState::Disconnected));
    }

    fn check_health(&mut self, now: Instant) {
        let port_name = self.port_name.clone();
        let port = self.port.as_ref();
        let action = self.health.check(now, port.is_some(), || {
            port.map(|p| test_port(p, &port_name)).unwrap_or(false)
        });

        match action {
            HealthAction::Nothing => {}
            HealthAction::Warn(silence) => self.send(LinkEvent::Health(format!(
                "Heartbeat warning: {} seconds since last message",
                silence.as_secs()
            ))),
            HealthAction::Reconnect(reason) => {
                info!("Reopening {}: {}", self.port_name, reason);
                if let ReconnectReason::Silence(_) | ReconnectReason::TestFailed = reason {
                    self.send(LinkEvent::Health(format!("Reconnecting: {}", reason)));
                }
                self.reopen();
            }
        }
    }

    fn reopen(&mut self) {
        self.port = None;
        self.lines.clear();
        match open_port(&self.port_name, &self.config) {
            Ok(port) => {
                self.port = Some(port);
                self.health.connected(Instant::now());
                self.send(LinkEvent::Status(ConnectionState::Reconnected(
                    self.port_name.clone(),
                )));
            }
            Err(e) => {
                warn!("Reconnecting to {} failed: {}", self.port_name, e);
                self.send(LinkEvent::Status(ConnectionState::ReconnectFailed(
                    e.to_string(),
                )));
            }
        }
    }

    fn send(&self, event: LinkEvent) {
        if self.events.send(event).is_err() {
            debug!("Dropping link event, nobody is listening");
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn assembles_lines_across_reads() {
        let mut lines = LineAssembler::new();
        assert!(lines.push(b"L,1234").is_empty());
        assert_eq!(lines.push(b"56,G\r\nL,65"), vec!["L,123456,G"]);
        assert_eq!(lines.push(b"4321,R\n\n  \n"), vec!["L,654321,R"]);
    }

    #[test]
    fn replaces_invalid_utf8() {
        let mut lines = LineAssembler::new();
        let res = lines.push(b"\xff\xfeL,123456,V\n");
        assert_eq!(res.len(), 1);
        assert!(res[0].ends_with("L,123456,V"));
    }

    #[test]
    fn clear_drops_partial_line() {
        let mut lines = LineAssembler::new();
        lines.push(b"garbage");
        lines.clear();
        assert_eq!(lines.push(b"L,123456,G\n"), vec!["L,123456,G"]);
    }

    #[test]
    fn quiet_link_warns_then_reconnects() {
        let t0 = Instant::now();
        let mut health = Health::new(&MonitorConfig::default(), t0);

        assert_eq!(health.check(t0 + secs(10), true, || true), HealthAction::Nothing);
        assert_eq!(
            health.check(t0 + secs(41), true, || true),
            HealthAction::Warn(secs(41))
        );

        health.saw_line(t0 + secs(50));
        assert_eq!(health.check(t0 + secs(60), true, || true), HealthAction::Nothing);
        assert_eq!(
            health.check(t0 + secs(141), true, || true),
            HealthAction::Reconnect(ReconnectReason::Silence(secs(91)))
        );
    }

    #[test]
    fn closed_port_reconnects() {
        let t0 = Instant::now();
        let mut health = Health::new(&MonitorConfig::default(), t0);
        assert_eq!(
            health.check(t0 + secs(1), false, || true),
            HealthAction::Reconnect(ReconnectReason::PortClosed)
        );
    }

    #[test]
    fn scheduled_reconnect_comes_first_and_can_be_disabled() {
        let t0 = Instant::now();
        let mut health = Health::new(&MonitorConfig::default(), t0);
        health.saw_line(t0 + secs(175));
        assert_eq!(
            health.check(t0 + secs(181), false, || true),
            HealthAction::Reconnect(ReconnectReason::Scheduled)
        );

        let config = MonitorConfig {
            reconnect_interval_secs: 0,
            ..MonitorConfig::default()
        };
        let mut health = Health::new(&config, t0);
        health.saw_line(t0 + secs(175));
        assert_eq!(health.check(t0 + secs(181), true, || true), HealthAction::Nothing);
    }

    #[test]
    fn connection_test_runs_once_a_minute() {
        let t0 = Instant::now();
        let mut health = Health::new(&MonitorConfig::default(), t0);
        let mut calls = 0;

        health.saw_line(t0 + secs(30));
        health.check(t0 + secs(30), true, || {
            calls += 1;
            true
        });
        assert_eq!(calls, 0);

        health.saw_line(t0 + secs(61));
        health.check(t0 + secs(61), true, || {
            calls += 1;
            true
        });
        assert_eq!(calls, 1);

        health.check(t0 + secs(70), true, || {
            calls += 1;
            true
        });
        assert_eq!(calls, 1);

        health.saw_line(t0 + secs(125));
        assert_eq!(
            health.check(t0 + secs(125), true, || false),
            HealthAction::Reconnect(ReconnectReason::TestFailed)
        );
    }

    #[test]
    fn reconnecting_resets_the_timers() {
        let t0 = Instant::now();
        let mut health = Health::new(&MonitorConfig::default(), t0);
        health.connected(t0 + secs(100));
        assert_eq!(health.check(t0 + secs(130), true, || true), HealthAction::Nothing);
    }

    #[cfg(unix)]
    mod reader {
        use super::*;

        /// Nothing lives here, so every reopen fails.
        const GONE: &str = "/nonexistent/qube-receiver";

        fn pty_link() -> (SerialPort, SerialLink) {
            let (receiver, mut host) = SerialPort::pair().unwrap();
            host.set_read_timeout(Duration::from_millis(20)).unwrap();
            let config = MonitorConfig {
                reconnect_interval_secs: 0,
                health_check_secs: 0,
                ..MonitorConfig::default()
            };
            (receiver, SerialLink::start(GONE, host, &config))
        }

        /// Collects events until `done` matches one, failing after five
        /// seconds.
        fn events_until<F>(link: &mut SerialLink, done: F) -> Vec<LinkEvent>
        where
            F: Fn(&LinkEvent) -> bool,
        {
            let deadline = Instant::now() + secs(5);
            let mut seen = Vec::new();
            while Instant::now() < deadline {
                while let Some(event) = link.next() {
                    let finished = done(&event);
                    seen.push(event);
                    if finished {
                        return seen;
                    }
                }
                sleep(Duration::from_millis(10));
            }
            panic!("gave up waiting, saw {:?}", seen);
        }

        #[test]
        fn delivers_lines_then_disconnects_on_stop() {
            let (receiver, mut link) = pty_link();
            receiver.write_all(b"L,123456,G\nL,65").unwrap();
            receiver.write_all(b"4321,R\n").unwrap();

            let seen = events_until(&mut link, |e| {
                *e == LinkEvent::Line("L,654321,R".to_owned())
            });
            assert_eq!(
                seen[0],
                LinkEvent::Status(ConnectionState::Connected(GONE.to_owned()))
            );
            assert!(seen.contains(&LinkEvent::Line("L,123456,G".to_owned())));

            link.stop();
            let rest: Vec<_> = link.by_ref().collect();
            assert_eq!(
                rest.last(),
                Some(&LinkEvent::Status(ConnectionState::Disconnected))
            );
        }

        #[test]
        fn hang_up_is_lost_and_reopen_keeps_retrying() {
            let (receiver, mut link) = pty_link();
            drop(receiver);

            events_until(&mut link, |e| {
                matches!(e, LinkEvent::Status(ConnectionState::Lost(_)))
            });
            events_until(&mut link, |e| {
                matches!(e, LinkEvent::Status(ConnectionState::ReconnectFailed(_)))
            });
            // the next health check tries again
            events_until(&mut link, |e| {
                matches!(e, LinkEvent::Status(ConnectionState::ReconnectFailed(_)))
            });
        }

        #[test]
        fn manual_reconnect_reopens_by_name() {
            let (_receiver, mut link) = pty_link();
            link.reconnect();
            let seen = events_until(&mut link, |e| {
                matches!(e, LinkEvent::Status(ConnectionState::ReconnectFailed(_)))
            });
            assert!(!seen
                .iter()
                .any(|e| matches!(e, LinkEvent::Status(ConnectionState::Lost(_)))));
        }
    }
}
