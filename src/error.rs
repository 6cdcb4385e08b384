//! The crate-wide error type.

use crate::{gui::GuiError, signal::SignalError};

use std::{borrow::Cow, fmt};

/// Everything that can go wrong outside the terminal UI loop itself.
#[derive(Debug)]
pub enum QubeError {
    /// Returned when io fails, including serial port io.
    IoError(std::io::Error),

    /// Returned when serializing the configuration fails.
    RonError(ron::Error),

    /// Returned when a configuration file cannot be deserialized.
    RonSpannedError(ron::de::SpannedError),

    /// Returned when a receiver line cannot be decoded.
    SignalError(SignalError),

    /// Returned when no serial port was given or picked.
    NoPort,

    /// Returned when the terminal UI fails.
    GuiError(GuiError),
}

impl fmt::Display for QubeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use QubeError as QE;
        let msg = match self {
            QE::IoError(error) => Cow::from(format!("io error: {}", error)),
            QE::RonError(error) => Cow::from(format!("ron error: {}", error)),
            QE::RonSpannedError(error) => Cow::from(format!("config error: {}", error)),
            QE::SignalError(error) => Cow::from(format!("signal error: {}", error)),
            QE::NoPort => Cow::from("no serial port selected"),
            QE::GuiError(error) => Cow::from(format!("gui error: {}", error)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for QubeError {}

impl From<std::io::Error> for QubeError {
    fn from(value: std::io::Error) -> Self {
        Self::IoError(value)
    }
}

impl From<ron::Error> for QubeError {
    fn from(value: ron::Error) -> Self {
        Self::RonError(value)
    }
}

impl From<ron::de::SpannedError> for QubeError {
    fn from(value: ron::de::SpannedError) -> Self {
        Self::RonSpannedError(value)
    }
}

impl From<SignalError> for QubeError {
    fn from(value: SignalError) -> Self {
        Self::SignalError(value)
    }
}

impl From<GuiError> for QubeError {
    fn from(value: GuiError) -> Self {
        Self::GuiError(value)
    }
}
