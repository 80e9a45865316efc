//! Shell-style splitting of a configured command line into an argument vector

use super::error::{ProcessError, ProcessResult};

/// Split a command line into words following POSIX shell quoting rules.
///
/// Single quotes, double quotes and backslash escapes are honoured, so a quoted
/// space does not separate words. An unterminated quote is a parse error and a
/// line that yields no words at all is rejected as an empty command.
pub fn tokenize(command_line: &str) -> ProcessResult<Vec<String>> {
    let argv = shell_words::split(command_line)?;

    if argv.is_empty() {
        return Err(ProcessError::EmptyCommand);
    }

    Ok(argv)
}

/// Quote an argument vector back into a single command line.
///
/// `tokenize(&join(argv))` yields `argv` again.
pub fn join<I, S>(argv: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    shell_words::join(argv)
}
