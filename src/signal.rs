//! Decoding of the text lines that the receiver prints for every radio
//! packet it picks up from a Qube.
//!
//! A line looks like `L,123456,V`: a role field that starts with `L`
//! (leerling), the six-digit student number, and a one-letter status code.
//! Anything after the third field is ignored, which lets newer receivers
//! append extra data without breaking older monitors.

use nom::{
    bytes::complete::take_till,
    character::complete::{char, u64},
    combinator::all_consuming,
    multi::separated_list1,
    Finish, IResult,
};

use std::{fmt, str::FromStr};

/// A student number as programmed into a Qube, always six digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StudentNumber(u32);

impl StudentNumber {
    /// Smallest number a Qube can be programmed with.
    pub const MIN: u32 = 100_000;
    /// Largest number a Qube can be programmed with.
    pub const MAX: u32 = 999_999;

    /// Returns `None` when `n` is not a six-digit number.
    pub fn new(n: u32) -> Option<Self> {
        (Self::MIN..=Self::MAX).contains(&n).then_some(Self(n))
    }

    /// The raw number.
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for StudentNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The help level a student requests by turning their Qube.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// `G`, the Qube lies screen down: everything is fine.
    Available,
    /// `V`, the Qube stands logo up: the student has a question.
    Question,
    /// `R`, the Qube lies screen up: the student is stuck.
    HelpNeeded,
}

impl StatusCode {
    /// The letter used on the wire.
    pub fn as_char(self) -> char {
        match self {
            StatusCode::Available => 'G',
            StatusCode::Question => 'V',
            StatusCode::HelpNeeded => 'R',
        }
    }

    /// The text shown to the teacher.
    pub fn label(self) -> &'static str {
        match self {
            StatusCode::Available => "Beschikbaar",
            StatusCode::Question => "Vraag",
            StatusCode::HelpNeeded => "Hulp nodig",
        }
    }

    /// Whether this status asks for the teacher's attention.
    pub fn is_active(self) -> bool {
        matches!(self, StatusCode::Question | StatusCode::HelpNeeded)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl FromStr for StatusCode {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "G" => Ok(StatusCode::Available),
            "V" => Ok(StatusCode::Question),
            "R" => Ok(StatusCode::HelpNeeded),
            other => Err(SignalError::UnknownStatus(other.to_owned())),
        }
    }
}

/// One decoded receiver line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QubeSignal {
    /// The role field as sent, e.g. `L` or `LRL`.
    pub role: String,
    /// Who sent it.
    pub student: StudentNumber,
    /// What they asked for.
    pub code: StatusCode,
}

impl QubeSignal {
    /// Builds a signal with the plain `L` role, the way a Qube sends it.
    pub fn new(student: StudentNumber, code: StatusCode) -> Self {
        Self {
            role: "L".to_owned(),
            student,
            code,
        }
    }
}

impl fmt::Display for QubeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.role, self.student, self.code)
    }
}

/// Reasons a receiver line is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalError {
    /// Fewer than three comma separated fields.
    TooFewFields(String),
    /// The role field does not start with `L`.
    InvalidRole(String),
    /// The student number field is not a number.
    InvalidNumber(String),
    /// The student number is not six digits.
    OutOfRange(u64),
    /// The status code is not one of `G`, `V` or `R`.
    UnknownStatus(String),
}

impl fmt::Display for SignalError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use SignalError as SE;
        match self {
            SE::TooFewFields(line) => write!(f, "invalid message format: {line}"),
            SE::InvalidRole(role) => write!(f, "invalid role: {role}"),
            SE::InvalidNumber(n) => write!(f, "invalid student number format: {n}"),
            SE::OutOfRange(n) => write!(f, "invalid student number range: {n}"),
            SE::UnknownStatus(code) => write!(f, "unknown status code: {code}"),
        }
    }
}

impl std::error::Error for SignalError {}

fn parse_fields(s: &str) -> IResult<&str, Vec<&str>> {
    separated_list1(char(','), take_till(|c| c == ','))(s)
}

fn parse_number(s: &str) -> IResult<&str, u64> {
    all_consuming(u64)(s)
}

impl FromStr for QubeSignal {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s.trim();
        let fields = match parse_fields(line).finish() {
            Ok((_remaining, fields)) if fields.len() >= 3 => fields,
            _ => return Err(SignalError::TooFewFields(line.to_owned())),
        };

        let role = fields[0].trim();
        if !role.starts_with('L') {
            return Err(SignalError::InvalidRole(role.to_owned()));
        }

        let number_field = fields[1].trim();
        let number = parse_number(number_field)
            .finish()
            .map(|(_, n)| n)
            .map_err(|_| SignalError::InvalidNumber(number_field.to_owned()))?;
        let student = u32::try_from(number)
            .ok()
            .and_then(StudentNumber::new)
            .ok_or(SignalError::OutOfRange(number))?;

        let code = fields[2].trim().parse()?;

        Ok(QubeSignal {
            role: role.to_owned(),
            student,
            code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(n: u32) -> StudentNumber {
        StudentNumber::new(n).unwrap()
    }

    #[test]
    fn decodes_plain_line() {
        let res: QubeSignal = "L,123456,G".parse().unwrap();
        assert_eq!(res, QubeSignal::new(student(123456), StatusCode::Available));
    }

    #[test]
    fn decodes_line_with_whitespace_and_carriage_return() {
        let res: QubeSignal = " L , 654321 , R \r".parse().unwrap();
        assert_eq!(res.student, student(654321));
        assert_eq!(res.code, StatusCode::HelpNeeded);
    }

    #[test]
    fn keeps_long_role_and_ignores_extra_fields() {
        let res: QubeSignal = "LRL,200000,V,-42,extra".parse().unwrap();
        assert_eq!(res.role, "LRL");
        assert_eq!(res.code, StatusCode::Question);
    }

    #[test]
    fn rejects_short_lines() {
        assert_eq!(
            "L,123456".parse::<QubeSignal>(),
            Err(SignalError::TooFewFields("L,123456".to_owned()))
        );
        assert!(matches!(
            "".parse::<QubeSignal>(),
            Err(SignalError::TooFewFields(_))
        ));
    }

    #[test]
    fn rejects_other_roles() {
        assert_eq!(
            "T,123456,G".parse::<QubeSignal>(),
            Err(SignalError::InvalidRole("T".to_owned()))
        );
    }

    #[test]
    fn rejects_bad_numbers() {
        assert_eq!(
            "L,12a456,G".parse::<QubeSignal>(),
            Err(SignalError::InvalidNumber("12a456".to_owned()))
        );
        assert_eq!(
            "L,99999,G".parse::<QubeSignal>(),
            Err(SignalError::OutOfRange(99999))
        );
        assert_eq!(
            "L,1000000,G".parse::<QubeSignal>(),
            Err(SignalError::OutOfRange(1000000))
        );
        assert_eq!(
            "L,99999999999,G".parse::<QubeSignal>(),
            Err(SignalError::OutOfRange(99999999999))
        );
    }

    #[test]
    fn rejects_unknown_status() {
        assert_eq!(
            "L,123456,X".parse::<QubeSignal>(),
            Err(SignalError::UnknownStatus("X".to_owned()))
        );
    }

    #[test]
    fn displays_in_wire_form() {
        let signal = QubeSignal::new(student(123456), StatusCode::HelpNeeded);
        assert_eq!(signal.to_string(), "L,123456,R");
    }
}
