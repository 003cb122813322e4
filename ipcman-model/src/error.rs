use std::fmt::{self, Display};

/// Errors produced by model constructors and validation routines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    InvalidRange(String),
    InvalidTimeZone(String),
    InvalidAddress(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InvalidRange(msg) => write!(f, "invalid range: {msg}"),
            ModelError::InvalidTimeZone(tz) => {
                write!(f, "invalid time zone: {tz}")
            }
            ModelError::InvalidAddress(msg) => {
                write!(f, "invalid device address: {msg}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
