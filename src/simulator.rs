//! A simulated classroom full of Qubes, for trying the monitor without any
//! hardware.
//!
//! Every simulated Qube behaves like the real firmware: it rests on one of
//! three faces, sends its status twice whenever the face changes, and sends
//! it again (also twice) every thirty seconds. The lines come out exactly as
//! the receiver prints them, so they go through the same decoder as real
//! traffic.

use crate::link::{ConnectionState, LinkEvent, SignalSource};
use crate::signal::{QubeSignal, StatusCode, StudentNumber};

use log::warn;
use rand::prelude::*;
use std::collections::VecDeque;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Length of one simulation step at speed 1.
const TICK: Duration = Duration::from_millis(500);

/// Steps between two periodic re-sends, 30 seconds at speed 1.
const RESEND_TICKS: u64 = 60;

/// The face a Qube rests on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Face {
    /// Resting on its screen: all good.
    ScreenDown,
    /// Standing logo up: a question.
    LogoUp,
    /// Screen facing up: help needed.
    ScreenUp,
}

impl Face {
    const ALL: [Face; 3] = [Face::ScreenDown, Face::LogoUp, Face::ScreenUp];

    /// The status a Qube sends while resting on this face.
    pub fn code(self) -> StatusCode {
        match self {
            Face::ScreenDown => StatusCode::Available,
            Face::LogoUp => StatusCode::Question,
            Face::ScreenUp => StatusCode::HelpNeeded,
        }
    }
}

#[derive(Debug, Clone)]
struct SimQube {
    student: StudentNumber,
    face: Face,
    last_sent: u64,
}

/// The classroom model, advanced one step at a time.
#[derive(Debug, Clone)]
pub struct Classroom {
    qubes: Vec<SimQube>,
    tick: u64,
    flip_chance: f64,
    noise: f64,
}

impl Classroom {
    /// All Qubes start screen down. `flip_chance` is the chance per step
    /// that a Qube is turned, `noise` the chance per step of a garbled line.
    pub fn new<I>(students: I, flip_chance: f64, noise: f64) -> Self
    where
        I: IntoIterator<Item = StudentNumber>,
    {
        Self {
            qubes: students
                .into_iter()
                .map(|student| SimQube {
                    student,
                    face: Face::ScreenDown,
                    last_sent: 0,
                })
                .collect(),
            tick: 0,
            flip_chance: chance(flip_chance),
            noise: chance(noise),
        }
    }

    /// Turns the Qube of `student` and returns the lines it sends.
    pub fn turn(&mut self, student: StudentNumber, face: Face) -> Vec<String> {
        let tick = self.tick;
        match self.qubes.iter_mut().find(|q| q.student == student) {
            Some(qube) if qube.face != face => {
                qube.face = face;
                qube.last_sent = tick;
                transmit(qube.student, face)
            }
            _ => Vec::new(),
        }
    }

    /// Advances one step and returns the lines received during it.
    pub fn step<R: Rng>(&mut self, rng: &mut R) -> Vec<String> {
        self.tick += 1;
        let tick = self.tick;
        let mut lines = Vec::new();

        for qube in self.qubes.iter_mut() {
            if rng.gen_bool(self.flip_chance) {
                let face = *Face::ALL
                    .iter()
                    .filter(|&&f| f != qube.face)
                    .choose(rng)
                    .unwrap_or(&qube.face);
                qube.face = face;
                qube.last_sent = tick;
                lines.extend(transmit(qube.student, face));
            } else if tick - qube.last_sent >= RESEND_TICKS {
                qube.last_sent = tick;
                lines.extend(transmit(qube.student, qube.face));
            }
        }

        if rng.gen_bool(self.noise) {
            lines.push(garbage(rng));
        }

        lines
    }
}

/// Clamps to a valid probability; anything that is not a number never
/// happens.
fn chance(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 1.0)
    }
}

/// The lines a Qube produces for one status transmission; the firmware
/// sends every packet twice.
fn transmit(student: StudentNumber, face: Face) -> Vec<String> {
    let line = QubeSignal::new(student, face.code()).to_string();
    vec![line.clone(), line]
}

fn garbage<R: Rng>(rng: &mut R) -> String {
    match rng.gen_range(0..4) {
        0 => format!("L,{}", rng.gen_range(100000..999999)),
        1 => format!("T,{},G", rng.gen_range(100000..999999)),
        2 => format!("L,{},G", rng.gen_range(1..99999)),
        _ => format!("L,{},X", rng.gen_range(100000..999999)),
    }
}

enum Signal {
    Stop,
}

/// Runs a [`Classroom`] on its own thread and buffers the lines it
/// produces, like a receiver would.
pub struct ClassroomSim {
    handle: Option<thread::JoinHandle<()>>,
    tx: mpsc::Sender<Signal>,
    msgs: Arc<Mutex<VecDeque<LinkEvent>>>,
}

impl ClassroomSim {
    /// Starts simulating. `speed` scales time: at 2.0 everything happens
    /// twice as fast.
    pub fn start(mut classroom: Classroom, speed: f64) -> Self {
        let (tx, rx) = mpsc::channel::<Signal>();
        let msgs = Arc::new(Mutex::new(VecDeque::from([LinkEvent::Status(
            ConnectionState::Connected("simulated classroom".to_owned()),
        )])));
        let th_msgs = Arc::clone(&msgs);
        let tick = TICK.div_f64(speed.max(0.01));

        let handle = thread::spawn(move || {
            let mut rng = thread_rng();
            loop {
                match rx.try_recv() {
                    Ok(Signal::Stop) | Err(mpsc::TryRecvError::Disconnected) => break,
                    Err(mpsc::TryRecvError::Empty) => {}
                }
                let lines = classroom.step(&mut rng);
                if let Ok(mut msgs) = th_msgs.lock() {
                    msgs.extend(lines.into_iter().map(LinkEvent::Line));
                }
                thread::sleep(tick);
            }
            if let Ok(mut msgs) = th_msgs.lock() {
                msgs.push_back(LinkEvent::Status(ConnectionState::Disconnected));
            }
        });

        ClassroomSim {
            handle: Some(handle),
            tx,
            msgs,
        }
    }
}

impl Iterator for ClassroomSim {
    type Item = LinkEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.msgs.lock().ok()?.pop_front()
    }
}

impl SignalSource for ClassroomSim {
    fn stop(&mut self) {
        let _ = self.tx.send(Signal::Stop);
        if let Some(thread) = self.handle.take() {
            if thread.join().is_err() {
                warn!("Classroom simulation panicked");
            }
        }
    }
}

impl Drop for ClassroomSim {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;

    fn student(n: u32) -> StudentNumber {
        StudentNumber::new(n).unwrap()
    }

    #[test]
    fn faces_map_to_codes() {
        assert_eq!(Face::ScreenDown.code(), StatusCode::Available);
        assert_eq!(Face::LogoUp.code(), StatusCode::Question);
        assert_eq!(Face::ScreenUp.code(), StatusCode::HelpNeeded);
    }

    #[test]
    fn turning_sends_twice_and_only_on_change() {
        let mut classroom = Classroom::new([student(123456)], 0.0, 0.0);
        assert_eq!(
            classroom.turn(student(123456), Face::ScreenUp),
            vec!["L,123456,R", "L,123456,R"]
        );
        assert!(classroom.turn(student(123456), Face::ScreenUp).is_empty());
        assert!(classroom.turn(student(654321), Face::LogoUp).is_empty());
    }

    #[test]
    fn resends_every_thirty_seconds() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut classroom = Classroom::new([student(123456)], 0.0, 0.0);

        let mut sent_at = Vec::new();
        for _ in 0..(RESEND_TICKS * 2) {
            if !classroom.step(&mut rng).is_empty() {
                sent_at.push(classroom.tick);
            }
        }
        assert_eq!(sent_at, vec![RESEND_TICKS, RESEND_TICKS * 2]);
    }

    #[test]
    fn flips_always_change_the_face() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut classroom = Classroom::new([student(111111), student(222222)], 1.0, 0.0);

        for _ in 0..10 {
            let before: Vec<Face> = classroom.qubes.iter().map(|q| q.face).collect();
            let lines = classroom.step(&mut rng);
            assert_eq!(lines.len(), 4);
            for (qube, old) in classroom.qubes.iter().zip(before) {
                assert_ne!(qube.face, old);
            }
        }
    }

    #[test]
    fn every_line_is_receiver_shaped() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut classroom = Classroom::new([student(111111)], 0.5, 0.0);
        for _ in 0..50 {
            for line in classroom.step(&mut rng) {
                assert!(line.parse::<QubeSignal>().is_ok(), "{}", line);
            }
        }
    }

    #[test]
    fn chances_that_are_not_numbers_never_happen() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut classroom = Classroom::new([student(111111)], f64::NAN, f64::NAN);
        assert_eq!(classroom.flip_chance, 0.0);
        assert_eq!(classroom.noise, 0.0);
        assert!(classroom.step(&mut rng).is_empty());

        let classroom = Classroom::new([student(111111)], f64::INFINITY, -3.0);
        assert_eq!(classroom.flip_chance, 1.0);
        assert_eq!(classroom.noise, 0.0);
    }

    #[test]
    fn garbage_never_decodes() {
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..100 {
            let line = garbage(&mut rng);
            assert!(line.parse::<QubeSignal>().is_err(), "{}", line);
        }
    }

    #[test]
    fn simulated_source_delivers_lines() {
        let classroom = Classroom::new([student(123456)], 1.0, 0.0);
        let mut sim = ClassroomSim::start(classroom, 50.0);
        thread::sleep(Duration::from_millis(100));
        sim.stop();

        let lines: Vec<_> = sim
            .filter_map(|e| match e {
                LinkEvent::Line(line) => Some(line),
                _ => None,
            })
            .collect();
        assert!(!lines.is_empty());
        assert!(lines.iter().all(|l| l.starts_with("L,123456,")));
    }
}
