//! Git protocol plumbing for gitway.
//!
//! This crate holds the parts of the smart HTTP transport that do not care
//! about HTTP itself: pkt-line framing for the service announcement, the
//! names and content types of the two stateless RPC services, and the
//! bridge used to run the git toolchain as a subprocess.
//!
//! The pack protocol body is never parsed here. It is relayed verbatim
//! between the HTTP client and `git upload-pack` / `git receive-pack`.

mod error;
mod pktline;
mod process;
mod service;

pub use error::GitError;
pub use pktline::{
    encode_line, flush_marker, service_announcement, PktLine, PktLineReader, FLUSH_MARKER,
    MAX_PKT_LEN,
};
pub use process::{
    CapturedOutput, GitCli, GitProcess, Invocation, ProcessBridge, ProcessExit, ProcessHandle,
    ProcessInput, ProcessOutput,
};
pub use service::Service;

/// Result type for git plumbing operations.
pub type Result<T> = std::result::Result<T, GitError>;
