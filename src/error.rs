// src/error.rs
use std::io;
use thiserror::Error;

use crate::process::ProcessError;
use crate::serializer::SerializationError;

/// Result type used across the library
pub type Result<T> = std::result::Result<T, AgentError>;

/// Custom Error type for the macready-exec library
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Why a batch could not be written to the configured command
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("exec: unable to serialize metric #{index}: {source}")]
    Serialization {
        index: usize,
        #[source]
        source: SerializationError,
    },

    #[error("exec: {source} for command {command:?}")]
    Command {
        command: String,
        #[source]
        source: ProcessError,
    },
}

impl ExecError {
    /// The process-level failure, for errors raised after serialization
    pub fn process_error(&self) -> Option<&ProcessError> {
        match self {
            ExecError::Command { source, .. } => Some(source),
            ExecError::Serialization { .. } => None,
        }
    }

    /// The command line the failure relates to
    pub fn command(&self) -> Option<&str> {
        match self {
            ExecError::Command { command, .. } => Some(command),
            ExecError::Serialization { .. } => None,
        }
    }
}
