use std::io;
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

/// Result type for process operations
pub type ProcessResult<T> = std::result::Result<T, ProcessError>;

/// Longest stderr excerpt rendered into an error message
const SUMMARY_MAX_CHARS: usize = 200;

/// Errors that can occur while tokenizing or running a command
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("unable to parse command: {0}")]
    Parse(#[from] shell_words::ParseError),

    #[error("command is empty")]
    EmptyCommand,

    #[error("failed to spawn process: {0}")]
    Spawn(#[source] io::Error),

    #[error("process timed out after {timeout:?}{}", summary_suffix(.stderr))]
    Timeout {
        timeout: Duration,
        stderr: Vec<u8>,
    },

    #[error("process exited with {status}{}", summary_suffix(.stderr))]
    Exit {
        status: ExitStatus,
        stderr: Vec<u8>,
    },

    #[error("failed to wait for process: {0}")]
    Wait(#[source] io::Error),
}

impl ProcessError {
    /// Captured stderr bytes, if the process got far enough to produce any
    pub fn stderr(&self) -> &[u8] {
        match self {
            ProcessError::Timeout { stderr, .. } | ProcessError::Exit { stderr, .. } => stderr,
            _ => &[],
        }
    }

    /// Exit code of a process that ran to completion with a failure status
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ProcessError::Exit { status, .. } => status.code(),
            _ => None,
        }
    }

    /// Whether the process was killed at its deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProcessError::Timeout { .. })
    }
}

/// First line of the captured stderr, truncated, or nothing when stderr is blank.
pub(crate) fn stderr_summary(stderr: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(stderr);
    let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;

    if line.chars().count() > SUMMARY_MAX_CHARS {
        let cut: String = line.chars().take(SUMMARY_MAX_CHARS).collect();
        Some(format!("{}...", cut))
    } else {
        Some(line.to_string())
    }
}

fn summary_suffix(stderr: &[u8]) -> String {
    match stderr_summary(stderr) {
        Some(summary) => format!(": {}", summary),
        None => String::new(),
    }
}
