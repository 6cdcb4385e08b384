use std::{error::Error, fmt::Display};

/// Errors from the terminal user interface.
#[derive(Debug)]
pub enum GuiError {
    /// Returned when the terminal cannot be driven.
    IOError(std::io::Error),
    /// Returned when there is no serial port to pick from.
    NoPorts,
}

impl Display for GuiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuiError::IOError(e) => write!(f, "terminal error: {}", e),
            GuiError::NoPorts => write!(f, "no serial ports found"),
        }
    }
}

impl Error for GuiError {}

impl From<std::io::Error> for GuiError {
    fn from(value: std::io::Error) -> Self {
        Self::IOError(value)
    }
}
