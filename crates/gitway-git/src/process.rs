//! Bridge to the git toolchain running as a subprocess.
//!
//! The HTTP layer never talks to `tokio::process` directly. It asks a
//! [`ProcessBridge`] to spawn an [`Invocation`] and gets back a
//! [`GitProcess`]: three boxed pipes plus a handle to wait on or kill the
//! child. Dropping the handle releases the process, so every early return in
//! a request handler (client gone, timeout, error) also tears down the child.

use crate::{GitError, Result, Service};
use async_trait::async_trait;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::process::{Child, Command};

/// Boxed write half of a child pipe.
pub type ProcessInput = Box<dyn AsyncWrite + Send + Unpin>;

/// Boxed read half of a child pipe.
pub type ProcessOutput = Box<dyn AsyncRead + Send + Unpin>;

/// Arguments and working directory for one git invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    args: Vec<OsString>,
    working_dir: PathBuf,
}

impl Invocation {
    /// Creates an invocation from raw arguments.
    pub fn new<I, S>(args: I, working_dir: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            working_dir: working_dir.into(),
        }
    }

    /// `<rpc> --stateless-rpc <dir>`: one negotiation round over stdin/stdout.
    pub fn stateless_rpc(service: Service, dir: &Path) -> Self {
        Self::new(
            [
                OsString::from(service.rpc_name()),
                OsString::from("--stateless-rpc"),
                dir.as_os_str().to_owned(),
            ],
            dir,
        )
    }

    /// `<rpc> --stateless-rpc --advertise-refs <dir>`.
    pub fn advertise_refs(service: Service, dir: &Path) -> Self {
        Self::new(
            [
                OsString::from(service.rpc_name()),
                OsString::from("--stateless-rpc"),
                OsString::from("--advertise-refs"),
                dir.as_os_str().to_owned(),
            ],
            dir,
        )
    }

    /// `update-server-info`, run inside the repository.
    pub fn update_server_info(dir: &Path) -> Self {
        Self::new(["update-server-info"], dir)
    }

    /// Arguments passed after the program name.
    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Directory the child runs in.
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Arguments rendered for logs and assertions.
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, or `None` when the process was killed by a signal.
    pub code: Option<i32>,
}

impl ProcessExit {
    /// A zero exit.
    pub const SUCCESS: ProcessExit = ProcessExit { code: Some(0) };

    /// Returns true if the process exited with status 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit status {code}"),
            None => f.write_str("terminated by signal"),
        }
    }
}

/// Control over a running child.
#[async_trait]
pub trait ProcessHandle: Send {
    /// Waits for the child to exit.
    async fn wait(&mut self) -> Result<ProcessExit>;

    /// Forcibly terminates the child.
    async fn kill(&mut self) -> Result<()>;
}

/// A spawned git process with its pipes.
pub struct GitProcess {
    /// Child stdin; `None` once taken or closed.
    pub stdin: Option<ProcessInput>,
    /// Child stdout.
    pub stdout: ProcessOutput,
    /// Child stderr.
    pub stderr: ProcessOutput,
    /// Wait/kill handle.
    pub handle: Box<dyn ProcessHandle>,
}

/// Everything a short-lived invocation printed.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    /// How the process ended.
    pub exit: ProcessExit,
    /// Captured standard output.
    pub stdout: Vec<u8>,
    /// Captured standard error.
    pub stderr: Vec<u8>,
}

impl CapturedOutput {
    /// Standard error as lossy UTF-8, trimmed.
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

impl GitProcess {
    /// Closes stdin and runs the child to completion, capturing its output.
    pub async fn output(self) -> Result<CapturedOutput> {
        let GitProcess {
            stdin,
            mut stdout,
            mut stderr,
            mut handle,
        } = self;
        drop(stdin);

        let mut out = Vec::new();
        let mut err = Vec::new();
        let (out_res, err_res) = tokio::join!(
            stdout.read_to_end(&mut out),
            stderr.read_to_end(&mut err)
        );
        out_res?;
        err_res?;

        let exit = handle.wait().await?;
        Ok(CapturedOutput {
            exit,
            stdout: out,
            stderr: err,
        })
    }
}

/// Spawns git invocations.
#[async_trait]
pub trait ProcessBridge: Send + Sync {
    /// Starts `invocation` with all three standard streams piped.
    async fn spawn(&self, invocation: &Invocation) -> Result<GitProcess>;
}

/// Runs the git command-line tool.
#[derive(Debug, Clone)]
pub struct GitCli {
    binary: PathBuf,
}

impl GitCli {
    /// Creates a bridge that runs `binary` (e.g. `git` or `/usr/bin/git`).
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// The executable this bridge runs.
    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

#[async_trait]
impl ProcessBridge for GitCli {
    async fn spawn(&self, invocation: &Invocation) -> Result<GitProcess> {
        let mut child = Command::new(&self.binary)
            .args(invocation.args())
            .current_dir(invocation.working_dir())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| GitError::Spawn {
                program: self.binary.display().to_string(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(GitError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(GitError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(GitError::MissingPipe("stderr"))?;

        tracing::debug!(
            pid = ?child.id(),
            args = ?invocation.args_lossy(),
            dir = %invocation.working_dir().display(),
            "Spawned git"
        );

        Ok(GitProcess {
            stdin: Some(Box::new(stdin)),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            handle: Box::new(ChildHandle { child }),
        })
    }
}

struct ChildHandle {
    child: Child,
}

#[async_trait]
impl ProcessHandle for ChildHandle {
    async fn wait(&mut self) -> Result<ProcessExit> {
        let status = self.child.wait().await?;
        Ok(ProcessExit {
            code: status.code(),
        })
    }

    async fn kill(&mut self) -> Result<()> {
        self.child.kill().await?;
        Ok(())
    }
}
