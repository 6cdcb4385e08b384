//! The class roster: which student numbers the monitor listens to, and what
//! name to show for each of them.
//!
//! The roster is kept as plain text, one student per line, either
//! `123456:First Last` or just `123456`.

use crate::error::QubeError;
use crate::signal::StudentNumber;

use log::warn;
use std::{collections::BTreeMap, fs, path::Path};

const EXAMPLE: &str = "123456:Voornaam Achternaam\n";

/// Maps student numbers to display names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    names: BTreeMap<StudentNumber, String>,
}

/// A roster line that could not be understood, with its 1-based line number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedLine {
    /// 1-based line number.
    pub line_no: usize,
    /// The line as it was read, trimmed.
    pub text: String,
}

impl Roster {
    /// An empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses roster text. Lines that do not hold a six-digit number are
    /// skipped and returned alongside the roster so the caller can report
    /// them.
    pub fn parse(text: &str) -> (Self, Vec<RejectedLine>) {
        let mut roster = Roster::new();
        let mut rejected = Vec::new();

        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let (num_str, name) = match line.split_once(':') {
                Some((num, name)) => (num.trim(), Some(name.trim())),
                None => (line, None),
            };

            match num_str.parse::<u32>().ok().and_then(StudentNumber::new) {
                Some(student) => {
                    let name = match name {
                        Some(name) if !name.is_empty() => name.to_owned(),
                        _ => default_name(student),
                    };
                    roster.insert(student, name);
                }
                None => {
                    warn!("Skipping roster line {}: {:?}", i + 1, line);
                    rejected.push(RejectedLine {
                        line_no: i + 1,
                        text: line.to_owned(),
                    });
                }
            }
        }

        (roster, rejected)
    }

    /// The roster used when none is given: a single example student.
    pub fn example() -> Self {
        Self::parse(EXAMPLE).0
    }

    /// `count` made up students numbered upwards from `100001`.
    pub fn numbered(count: u32) -> Self {
        let mut roster = Roster::new();
        for student in (StudentNumber::MIN + 1..=StudentNumber::MAX)
            .take(count as usize)
            .filter_map(StudentNumber::new)
        {
            roster.insert(student, default_name(student));
        }
        roster
    }

    /// Reads a roster file, skipping lines that do not parse.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, QubeError> {
        let text = fs::read_to_string(path)?;
        Ok(Self::parse(&text).0)
    }

    /// Writes the roster in the same text format it is read in.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), QubeError> {
        fs::write(path, self.to_text())?;
        Ok(())
    }

    /// The roster in its text format, lowest number first.
    pub fn to_text(&self) -> String {
        self.names
            .iter()
            .map(|(student, name)| format!("{}:{}\n", student, name))
            .collect()
    }

    /// Adds or renames a student.
    pub fn insert(&mut self, student: StudentNumber, name: String) {
        self.names.insert(student, name);
    }

    /// Takes a student off the roster, returning their name.
    pub fn remove(&mut self, student: StudentNumber) -> Option<String> {
        self.names.remove(&student)
    }

    /// Whether `student` is on the roster.
    pub fn contains(&self, student: StudentNumber) -> bool {
        self.names.contains_key(&student)
    }

    /// The display name of a student, or `Student <number>` for strangers.
    pub fn name(&self, student: StudentNumber) -> String {
        self.names
            .get(&student)
            .cloned()
            .unwrap_or_else(|| default_name(student))
    }

    /// All student numbers, lowest first.
    pub fn students(&self) -> impl Iterator<Item = StudentNumber> + '_ {
        self.names.keys().copied()
    }

    /// Number of students on the roster.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether there is nothing here.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

fn default_name(student: StudentNumber) -> String {
    format!("Student {}", student)
}
