//! Error kinds surfaced by managed processes.

use std::{error::Error as StdError, fmt, io, time::Duration};

use crate::process::ProcessState;

/// Result type defaulting to this crate's [`Error`].
pub type Result<T> = ::std::result::Result<T, Error>;

/// Everything that can go wrong while supervising a process.
///
/// Each failure mode is its own variant: match on the kind, never on the message.
pub enum Error {
    /// The operation is not allowed in the process's current state.
    ///
    /// This is a programming error on the caller's side, such as destroying a
    /// process that was never started or asking for the exit code too early.
    IllegalState {
        /// The operation that was refused.
        operation: &'static str,
        /// The state the process was in.
        state: ProcessState,
    },
    /// The OS refused to spawn the program.
    StartFailure {
        /// The program as configured.
        program: String,
        /// The underlying OS error.
        source: io::Error,
    },
    /// A wait ran out of time before its release condition was met.
    Timeout {
        /// The wait that timed out.
        operation: &'static str,
        /// How long it waited.
        timeout: Duration,
    },
    /// The process terminated without ever printing the pattern.
    PatternNeverMatched {
        /// The pattern that was waited for.
        pattern: String,
    },
    /// The process exited with a non-success code.
    NonZeroExit(i32),
    /// The OS would not terminate the process.
    DestroyFailure(io::Error),
    /// Invalid configuration.
    Config(String),
    /// Any other I/O failure, e.g. failing to spawn a helper thread.
    Io(io::Error),
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::StartFailure { source, .. } => Some(source),
            Self::DestroyFailure(err) | Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} error: ",
            match self {
                Self::IllegalState { .. } => "State",
                Self::StartFailure { .. } => "Start",
                Self::Timeout { .. } => "Timeout",
                Self::PatternNeverMatched { .. } => "Pattern",
                Self::NonZeroExit(_) => "Exit",
                Self::DestroyFailure(_) => "Destroy",
                Self::Config(_) => "Config",
                Self::Io(_) => "I/O",
            }
        )?;

        match self {
            Self::IllegalState { operation, state } => {
                write!(f, "cannot {} a process that is {}", operation, state)
            }
            Self::StartFailure { program, source } => {
                write!(f, "couldn't start '{}':\n{}", program, source)
            }
            Self::Timeout { operation, timeout } => {
                write!(f, "{} gave up after {:?}", operation, timeout)
            }
            Self::PatternNeverMatched { pattern } => write!(
                f,
                "process terminated without printing '{}'",
                pattern
            ),
            Self::NonZeroExit(code) => write!(f, "process exited with code {}", code),
            Self::DestroyFailure(err) => write!(f, "couldn't terminate process:\n{}", err),
            Self::Config(msg) => write!(f, "{}", msg),
            Self::Io(err) => write!(f, "{}", err),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_kind() {
        let err = Error::IllegalState {
            operation: "destroy",
            state: ProcessState::NotStarted,
        };
        assert_eq!(
            err.to_string(),
            "State error: cannot destroy a process that is not started"
        );

        let err = Error::NonZeroExit(3);
        assert_eq!(err.to_string(), "Exit error: process exited with code 3");
    }

    #[test]
    fn start_failure_exposes_os_error() {
        let err = Error::StartFailure {
            program: "nope".into(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        };
        let source = err.source().expect("start failure has a source");
        assert_eq!(source.to_string(), "no such file");
    }
}
