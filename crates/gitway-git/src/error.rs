//! Git plumbing error types.

use thiserror::Error;

/// Errors that can occur while framing protocol lines or driving git.
#[derive(Debug, Error)]
pub enum GitError {
    /// Payload does not fit in a single pkt-line.
    #[error("pkt-line payload of {0} bytes exceeds the 65531 byte limit")]
    PktLineTooLong(usize),

    /// Invalid pkt-line format.
    #[error("invalid pkt-line: {0}")]
    InvalidPktLine(String),

    /// The git executable could not be started.
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        /// Program that was being spawned.
        program: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A pipe to the child process was not available.
    #[error("{0} pipe not available")]
    MissingPipe(&'static str),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
