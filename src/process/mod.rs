//! Running external commands for metric output
//!
//! This module turns a configured command line into an argument vector, spawns
//! it with a payload on standard input, and makes sure it never outlives its
//! deadline.

mod error;
mod runner;
mod tokenize;

pub use error::{ProcessError, ProcessResult};
pub use runner::{CommandRunner, ProcessRunner};
pub use tokenize::{join, tokenize};

use std::time::Duration;

/// Timeout used when none (or zero) is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// The command an output runs and how long each invocation may take
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    command_line: String,
    timeout: Duration,
}

impl CommandSpec {
    /// Create a command spec; a zero timeout falls back to [`DEFAULT_TIMEOUT`]
    pub fn new(command_line: impl Into<String>, timeout: Duration) -> Self {
        let timeout = if timeout.is_zero() { DEFAULT_TIMEOUT } else { timeout };

        Self {
            command_line: command_line.into(),
            timeout,
        }
    }

    /// The command line as configured, before tokenizing
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// Maximum wall-clock time per invocation
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Split the command line into an argument vector
    pub fn argv(&self) -> ProcessResult<Vec<String>> {
        tokenize(&self.command_line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timeout_uses_default() {
        let spec = CommandSpec::new("cat", Duration::ZERO);
        assert_eq!(spec.timeout(), DEFAULT_TIMEOUT);
    }

    #[test]
    fn explicit_timeout_is_kept() {
        let spec = CommandSpec::new("cat", Duration::from_millis(100));
        assert_eq!(spec.timeout(), Duration::from_millis(100));
        assert_eq!(spec.command_line(), "cat");
    }

    #[test]
    fn argv_tokenizes_command_line() {
        let spec = CommandSpec::new("/usr/bin/mycollector --foo=bar", DEFAULT_TIMEOUT);
        assert_eq!(spec.argv().unwrap(), vec!["/usr/bin/mycollector", "--foo=bar"]);
    }
}
