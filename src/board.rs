//! The status board keeps the most recent signal of every student on the
//! roster, decides which incoming signals are real changes, and orders the
//! students for the teacher.
//!
//! Qubes transmit every packet twice and repeat their current status every
//! thirty seconds, so most lines that arrive are not news. A signal with the
//! same code as the stored one is a [`Update::Duplicate`] when it arrives
//! inside the duplicate window, and a [`Update::Repeat`] otherwise. Neither
//! resets the time a student has been waiting.

use crate::config::MonitorConfig;
use crate::roster::Roster;
use crate::signal::{QubeSignal, StatusCode, StudentNumber};

use chrono::{DateTime, Local};
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

/// What the board shows in the status column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLabel {
    /// The status the Qube reported.
    Code(StatusCode),
    /// The teacher marked the request as handled.
    Resolved,
}

impl StatusLabel {
    /// The text in the status column.
    pub fn text(self) -> &'static str {
        match self {
            StatusLabel::Code(code) => code.label(),
            StatusLabel::Resolved => "Opgelost",
        }
    }
}

/// The current state of one student.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentStatus {
    /// The last code the Qube sent, or `G` once resolved.
    pub code: StatusCode,
    /// What the status column shows.
    pub label: StatusLabel,
    /// Wall clock time of the last real change.
    pub received_at: DateTime<Local>,
    /// When the last signal, repeat or not, came in.
    pub last_update: Instant,
    /// When the current status began.
    pub since: Instant,
}

/// The result of offering a signal to the board.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// The student is not on the roster; nothing was stored.
    NotAllowed,
    /// Same status again inside the duplicate window; nothing changed.
    Duplicate,
    /// Same status again after the duplicate window; only the last update
    /// time moved.
    Repeat,
    /// A new status for this student.
    Changed(StudentStatus),
}

/// How long an open request has been waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Urgency {
    /// Waiting, but not for long.
    Normal,
    /// Waiting longer than the warning threshold.
    Warning,
    /// Waiting longer than the critical threshold.
    Critical,
}

/// Most recent status per student.
#[derive(Debug, Clone)]
pub struct Board {
    statuses: HashMap<StudentNumber, StudentStatus>,
    duplicate_threshold: Duration,
    warning_threshold: Duration,
    critical_threshold: Duration,
}

impl Default for Board {
    fn default() -> Self {
        Self::new(&MonitorConfig::default())
    }
}

impl Board {
    /// An empty board with the thresholds from `config`.
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            statuses: HashMap::new(),
            duplicate_threshold: config.duplicate_threshold(),
            warning_threshold: Duration::from_secs(config.warning_threshold_secs),
            critical_threshold: Duration::from_secs(config.critical_threshold_secs),
        }
    }

    /// Offers a decoded signal to the board.
    pub fn apply(&mut self, signal: &QubeSignal, roster: &Roster, now: Instant) -> Update {
        if !roster.contains(signal.student) {
            return Update::NotAllowed;
        }

        if let Some(prev) = self.statuses.get_mut(&signal.student) {
            if prev.code == signal.code {
                if now.saturating_duration_since(prev.last_update) < self.duplicate_threshold {
                    return Update::Duplicate;
                }
                prev.last_update = now;
                return Update::Repeat;
            }
        }

        let status = StudentStatus {
            code: signal.code,
            label: StatusLabel::Code(signal.code),
            received_at: Local::now(),
            last_update: now,
            since: now,
        };
        self.statuses.insert(signal.student, status.clone());
        Update::Changed(status)
    }

    /// Marks a student's request as handled. Returns false when the student
    /// has no status on the board.
    pub fn resolve(&mut self, student: StudentNumber, now: Instant) -> bool {
        match self.statuses.get_mut(&student) {
            Some(status) => {
                status.code = StatusCode::Available;
                status.label = StatusLabel::Resolved;
                status.last_update = now;
                status.since = now;
                true
            }
            None => false,
        }
    }

    /// The current status of `student`, if any.
    pub fn get(&self, student: StudentNumber) -> Option<&StudentStatus> {
        self.statuses.get(&student)
    }

    /// Students in the order the teacher should look at them: help needed
    /// first, then questions, each longest waiting first, then everybody
    /// else by student number.
    pub fn sorted(&self) -> Vec<(StudentNumber, &StudentStatus)> {
        let mut rows: Vec<_> = self.statuses.iter().map(|(&n, s)| (n, s)).collect();
        rows.sort_by(|(a_num, a), (b_num, b)| {
            let rank = |code: StatusCode| match code {
                StatusCode::HelpNeeded => 0,
                StatusCode::Question => 1,
                StatusCode::Available => 2,
            };
            rank(a.code).cmp(&rank(b.code)).then_with(|| {
                if a.code.is_active() {
                    a.since.cmp(&b.since).then(a_num.cmp(b_num))
                } else {
                    a_num.cmp(b_num)
                }
            })
        });
        rows
    }

    /// Students with an open question or help request.
    pub fn active(&self) -> Vec<StudentNumber> {
        let mut active: Vec<_> = self
            .statuses
            .iter()
            .filter(|(_, s)| s.code.is_active())
            .map(|(&n, _)| n)
            .collect();
        active.sort();
        active
    }

    /// How long a student's open request has been waiting, formatted for
    /// display. `None` unless the student has an open request.
    pub fn duration(&self, student: StudentNumber, now: Instant) -> Option<(String, Urgency)> {
        let status = self.statuses.get(&student)?;
        if !status.code.is_active() {
            return None;
        }

        let waited = now.saturating_duration_since(status.since);
        // whole seconds, the same precision the column shows
        let urgency = if waited.as_secs() > self.critical_threshold.as_secs() {
            Urgency::Critical
        } else if waited.as_secs() > self.warning_threshold.as_secs() {
            Urgency::Warning
        } else {
            Urgency::Normal
        };

        Some((format_duration(waited), urgency))
    }

    /// Forgets students that are no longer on the roster.
    pub fn retain(&mut self, roster: &Roster) {
        self.statuses.retain(|&student, _| roster.contains(student));
    }

    /// Forgets every status.
    pub fn clear(&mut self) {
        self.statuses.clear();
    }

    /// Students on the roster, and how many of them have a status.
    pub fn counts(&self, roster: &Roster) -> (usize, usize) {
        let with_status = roster
            .students()
            .filter(|student| self.statuses.contains_key(student))
            .count();
        (roster.len(), with_status)
    }

    /// Number of students with a status.
    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    /// Whether there is nothing here.
    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }
}

/// `42s`, `3m 5s`, or `1h 12m`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(n: u32) -> StudentNumber {
        StudentNumber::new(n).unwrap()
    }

    fn signal(n: u32, code: StatusCode) -> QubeSignal {
        QubeSignal::new(student(n), code)
    }

    fn roster() -> Roster {
        Roster::parse("111111:Ali\n222222:Bea\n333333:Cas\n444444:Dirk").0
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn ignores_students_outside_the_roster() {
        let mut board = Board::default();
        let t0 = Instant::now();
        assert_eq!(
            board.apply(&signal(999999, StatusCode::HelpNeeded), &roster(), t0),
            Update::NotAllowed
        );
        assert!(board.is_empty());
    }

    #[test]
    fn filters_duplicates_and_repeats() {
        let mut board = Board::default();
        let roster = roster();
        let t0 = Instant::now();
        let s = signal(111111, StatusCode::Question);

        assert!(matches!(board.apply(&s, &roster, t0), Update::Changed(_)));
        assert_eq!(board.apply(&s, &roster, t0 + secs(1)), Update::Duplicate);
        assert_eq!(board.apply(&s, &roster, t0 + secs(6)), Update::Repeat);

        let status = board.get(student(111111)).unwrap();
        assert_eq!(status.since, t0);
        assert_eq!(status.last_update, t0 + secs(6));

        // the window restarts from the repeat
        assert_eq!(board.apply(&s, &roster, t0 + secs(8)), Update::Duplicate);
    }

    #[test]
    fn repeat_at_exactly_the_threshold() {
        let mut board = Board::default();
        let roster = roster();
        let t0 = Instant::now();
        let s = signal(222222, StatusCode::HelpNeeded);

        board.apply(&s, &roster, t0);
        assert_eq!(board.apply(&s, &roster, t0 + secs(5)), Update::Repeat);
    }

    #[test]
    fn a_new_code_resets_the_waiting_time() {
        let mut board = Board::default();
        let roster = roster();
        let t0 = Instant::now();

        board.apply(&signal(111111, StatusCode::Question), &roster, t0);
        let update = board.apply(&signal(111111, StatusCode::HelpNeeded), &roster, t0 + secs(1));

        match update {
            Update::Changed(status) => {
                assert_eq!(status.code, StatusCode::HelpNeeded);
                assert_eq!(status.since, t0 + secs(1));
            }
            other => panic!("expected a change, got {:?}", other),
        }
    }

    #[test]
    fn orders_help_then_questions_longest_waiting_first() {
        let mut board = Board::default();
        let roster = roster();
        let t0 = Instant::now();

        board.apply(&signal(444444, StatusCode::Available), &roster, t0);
        board.apply(&signal(333333, StatusCode::Question), &roster, t0 + secs(1));
        board.apply(&signal(222222, StatusCode::HelpNeeded), &roster, t0 + secs(2));
        board.apply(&signal(111111, StatusCode::HelpNeeded), &roster, t0 + secs(3));

        let order: Vec<u32> = board.sorted().iter().map(|(n, _)| n.get()).collect();
        assert_eq!(order, vec![222222, 111111, 333333, 444444]);
    }

    #[test]
    fn resolving_moves_the_student_down() {
        let mut board = Board::default();
        let roster = roster();
        let t0 = Instant::now();

        board.apply(&signal(222222, StatusCode::HelpNeeded), &roster, t0);
        board.apply(&signal(111111, StatusCode::Available), &roster, t0);
        assert!(board.resolve(student(222222), t0 + secs(30)));
        assert!(!board.resolve(student(333333), t0 + secs(30)));

        let status = board.get(student(222222)).unwrap();
        assert_eq!(status.label.text(), "Opgelost");
        assert_eq!(status.code, StatusCode::Available);
        assert!(board.active().is_empty());

        let order: Vec<u32> = board.sorted().iter().map(|(n, _)| n.get()).collect();
        assert_eq!(order, vec![111111, 222222]);

        // the cube still reports R, which shows up again as a change
        assert!(matches!(
            board.apply(&signal(222222, StatusCode::HelpNeeded), &roster, t0 + secs(31)),
            Update::Changed(_)
        ));
    }

    #[test]
    fn durations_only_for_open_requests() {
        let mut board = Board::default();
        let roster = roster();
        let t0 = Instant::now();

        board.apply(&signal(111111, StatusCode::Available), &roster, t0);
        board.apply(&signal(222222, StatusCode::Question), &roster, t0);

        assert_eq!(board.duration(student(111111), t0 + secs(10)), None);
        assert_eq!(board.duration(student(333333), t0 + secs(10)), None);
        assert_eq!(
            board.duration(student(222222), t0 + secs(42)),
            Some(("42s".to_owned(), Urgency::Normal))
        );
        assert_eq!(
            board.duration(student(222222), t0 + secs(121)),
            Some(("2m 1s".to_owned(), Urgency::Warning))
        );
        assert_eq!(
            board.duration(student(222222), t0 + secs(301)),
            Some(("5m 1s".to_owned(), Urgency::Critical))
        );
        assert_eq!(
            board.duration(student(222222), t0 + Duration::from_millis(300_500)),
            Some(("5m 0s".to_owned(), Urgency::Warning))
        );
        assert_eq!(
            board.duration(student(222222), t0 + Duration::from_millis(120_900)),
            Some(("2m 0s".to_owned(), Urgency::Normal))
        );
    }

    #[test]
    fn formats_hours() {
        assert_eq!(format_duration(secs(0)), "0s");
        assert_eq!(format_duration(secs(3599)), "59m 59s");
        assert_eq!(format_duration(secs(3600 + 12 * 60 + 9)), "1h 12m");
    }

    #[test]
    fn retain_drops_removed_students() {
        let mut board = Board::default();
        let t0 = Instant::now();
        board.apply(&signal(111111, StatusCode::Question), &roster(), t0);
        board.apply(&signal(222222, StatusCode::Question), &roster(), t0);

        let smaller = Roster::parse("222222:Bea\n333333:Cas").0;
        assert_eq!(board.counts(&smaller), (2, 1));
        board.retain(&smaller);
        assert_eq!(board.active(), vec![student(222222)]);
        assert_eq!(board.counts(&roster()), (4, 1));
    }
}
