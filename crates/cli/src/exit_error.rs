//! Custom error type that carries a process exit code, so `main` decides
//! how to terminate instead of commands calling `std::process::exit`
//! directly from deep inside a call stack.

use std::fmt;

#[derive(Debug)]
pub struct ExitError {
    pub code: i32,
    pub message: String,
}

impl ExitError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        ExitError { code, message: message.into() }
    }
}

impl fmt::Display for ExitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ExitError {}

impl From<dsme_wire::WireError> for ExitError {
    fn from(source: dsme_wire::WireError) -> Self {
        ExitError::new(1, format!("protocol error: {source}"))
    }
}

impl From<std::io::Error> for ExitError {
    fn from(source: std::io::Error) -> Self {
        ExitError::new(1, format!("connection error: {source}"))
    }
}
