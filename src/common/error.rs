//! Error types for minifs

use crate::common::protocol::ErrorCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Request Errors ===
    #[error("Malformed command: {0}")]
    MalformedCommand(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    // === Index Errors ===
    #[error("File already exists: {0}")]
    FileAlreadyExists(String),

    #[error("File does not exist: {0}")]
    FileDoesNotExist(String),

    // === Placement Errors ===
    #[error("Not enough nodes: need {needed}, have {available}")]
    NotEnoughNodes { needed: usize, available: usize },

    #[error("No alternative replica to load {0} from")]
    LoadFailed(String),

    // === Network Errors ===
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    // === Generic ===
    #[error("Operation timeout: {0}")]
    Timeout(String),
}

impl Error {
    /// Wire token reported to a client for this error, if it is client-facing.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Error::MalformedCommand(_) => Some(ErrorCode::MalformedCommand),
            Error::UnknownCommand(_) => Some(ErrorCode::UnknownCommand),
            Error::FileAlreadyExists(_) => Some(ErrorCode::FileAlreadyExists),
            Error::FileDoesNotExist(_) => Some(ErrorCode::FileDoesNotExist),
            Error::NotEnoughNodes { .. } => Some(ErrorCode::NotEnoughNodes),
            Error::LoadFailed(_) => Some(ErrorCode::LoadFailed),
            _ => None,
        }
    }

    /// Build the error a client sees when the controller replies with `code`.
    pub fn from_code(code: ErrorCode, context: &str) -> Self {
        match code {
            ErrorCode::MalformedCommand => Error::MalformedCommand(context.to_string()),
            ErrorCode::UnknownCommand => Error::UnknownCommand(context.to_string()),
            ErrorCode::FileAlreadyExists => Error::FileAlreadyExists(context.to_string()),
            ErrorCode::FileDoesNotExist => Error::FileDoesNotExist(context.to_string()),
            ErrorCode::NotEnoughNodes => Error::NotEnoughNodes {
                needed: 0,
                available: 0,
            },
            ErrorCode::LoadFailed => Error::LoadFailed(context.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_have_codes() {
        let err = Error::NotEnoughNodes {
            needed: 3,
            available: 1,
        };
        assert_eq!(err.error_code(), Some(ErrorCode::NotEnoughNodes));
        assert_eq!(err.to_string(), "Not enough nodes: need 3, have 1");

        assert_eq!(
            Error::FileDoesNotExist("a.txt".into()).error_code(),
            Some(ErrorCode::FileDoesNotExist)
        );
        assert_eq!(
            Error::LoadFailed("a.txt".into()).error_code(),
            Some(ErrorCode::LoadFailed)
        );
    }

    #[test]
    fn test_transport_errors_are_not_client_facing() {
        let io = Error::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(io.error_code().is_none());
        assert!(Error::Timeout("probe".into()).error_code().is_none());
    }
}
