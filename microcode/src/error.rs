use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
#[error("Error on line {line_number}: {message}")]
pub struct ParseError {
    line_number: usize,
    message: String,
}

impl ParseError {
    pub(crate) fn new(line_number: usize, message: &str) -> Self {
        ParseError {
            line_number,
            message: message.to_string(),
        }
    }

    pub fn line_number(&self) -> usize {
        self.line_number
    }
}

#[derive(Debug, Error)]
pub enum MicrocodeError {
    #[error("Unknown control signal '{0}'")]
    UnknownSignal(String),

    #[error("Unknown flag '{0}'")]
    UnknownFlag(String),

    #[error("Control line '{0}' defined more than once")]
    DuplicateSignal(String),

    #[error("Control line '{name}' overlaps '{other}' at bit {bit}")]
    OverlappingLine {
        name: String,
        other: String,
        bit: u32,
    },

    #[error("Value '{value}' exceeds width {width} of multibit term '{name}'")]
    FieldValue { name: String, value: u64, width: u32 },

    #[error("Control word is {width} bits wide but the lanes hold only {capacity} bits")]
    ControlWordOverflow { width: u32, capacity: u64 },

    #[error("{field} {value} out of range, limit is {limit}")]
    AddressRange {
        field: &'static str,
        value: u64,
        limit: u64,
    },

    #[error("Opcode {0:#04x} defined more than once")]
    DuplicateDefinition(u32),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl MicrocodeError {
    pub(crate) fn range(field: &'static str, value: impl Into<u64>, limit: impl Into<u64>) -> Self {
        MicrocodeError::AddressRange {
            field,
            value: value.into(),
            limit: limit.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        MicrocodeError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, MicrocodeError>;
