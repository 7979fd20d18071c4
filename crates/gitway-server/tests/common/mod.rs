//! Shared fixtures: a scripted stand-in for the git CLI and a repository
//! laid out on disk.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{body::Body, http::Request, response::Response, Router};
use gitway_git::{GitProcess, Invocation, ProcessBridge, ProcessExit, ProcessHandle, Result};
use gitway_server::api::{create_router, AppState};
use gitway_server::routing::RootDirResolver;
use gitway_server::rpc::RpcTimeouts;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;

/// What a scripted command prints and how it exits.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit: i32,
    /// Keep stdout open after writing it, until killed or released.
    pub hang: bool,
}

/// Records every invocation and answers from a script keyed by the first
/// argument. Like git, it reads all of stdin before writing stdout.
#[derive(Default)]
pub struct FakeGit {
    scripts: HashMap<String, Script>,
    calls: Mutex<Vec<Invocation>>,
    stdin: Arc<Mutex<Vec<Vec<u8>>>>,
    kills: Arc<AtomicUsize>,
}

impl FakeGit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, command: &str, stdout: &[u8], exit: i32) -> Self {
        self.scripts.insert(
            command.to_string(),
            Script {
                stdout: stdout.to_vec(),
                stderr: if exit == 0 {
                    Vec::new()
                } else {
                    b"fatal: scripted failure\n".to_vec()
                },
                exit,
                hang: false,
            },
        );
        self
    }

    /// `command` writes `stdout` and then never exits on its own.
    pub fn hang(mut self, command: &str, stdout: &[u8]) -> Self {
        self.scripts.insert(
            command.to_string(),
            Script {
                stdout: stdout.to_vec(),
                hang: true,
                ..Script::default()
            },
        );
        self
    }

    /// Explicit `kill()` calls.
    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    /// Arguments of every spawned invocation, in order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(Invocation::args_lossy)
            .collect()
    }

    /// Working directories of every spawned invocation, in order.
    pub fn working_dirs(&self) -> Vec<PathBuf> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|inv| inv.working_dir().to_path_buf())
            .collect()
    }

    /// Bytes each invocation received on stdin.
    pub fn stdin_received(&self) -> Vec<Vec<u8>> {
        self.stdin.lock().unwrap().clone()
    }
}

struct FakeHandle {
    exit: i32,
    stop: Option<oneshot::Sender<()>>,
    kills: Arc<AtomicUsize>,
}

#[async_trait]
impl ProcessHandle for FakeHandle {
    async fn wait(&mut self) -> Result<ProcessExit> {
        Ok(ProcessExit {
            code: Some(self.exit),
        })
    }

    async fn kill(&mut self) -> Result<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessBridge for FakeGit {
    async fn spawn(&self, invocation: &Invocation) -> Result<GitProcess> {
        self.calls.lock().unwrap().push(invocation.clone());

        let command = invocation.args_lossy().into_iter().next().unwrap_or_default();
        let script = self.scripts.get(&command).cloned().unwrap_or_default();

        let (stdin_ours, mut stdin_theirs) = tokio::io::duplex(64 * 1024);
        let (stdout_ours, mut stdout_theirs) = tokio::io::duplex(64 * 1024);

        let (stop, stopped) = oneshot::channel();
        let received = Arc::clone(&self.stdin);
        let stdout = script.stdout.clone();
        let hang = script.hang;
        tokio::spawn(async move {
            let mut input = Vec::new();
            let _ = stdin_theirs.read_to_end(&mut input).await;
            received.lock().unwrap().push(input);
            let _ = stdout_theirs.write_all(&stdout).await;
            if hang {
                // Resolves on kill, or when the handle is dropped.
                let _ = stopped.await;
            }
            let _ = stdout_theirs.shutdown().await;
        });

        Ok(GitProcess {
            stdin: Some(Box::new(stdin_ours)),
            stdout: Box::new(stdout_ours),
            stderr: Box::new(Cursor::new(script.stderr)),
            handle: Box::new(FakeHandle {
                exit: script.exit,
                stop: Some(stop),
                kills: Arc::clone(&self.kills),
            }),
        })
    }
}

/// A bare-repository layout under a temporary root.
pub struct Fixture {
    pub root: tempfile::TempDir,
    pub git: Arc<FakeGit>,
}

impl Fixture {
    pub fn new(git: FakeGit) -> Self {
        let root = tempfile::tempdir().unwrap();
        let repo = root.path().join("project.git");
        std::fs::create_dir_all(repo.join("objects/info")).unwrap();
        std::fs::create_dir_all(repo.join("objects/pack")).unwrap();
        std::fs::create_dir_all(repo.join("info")).unwrap();
        std::fs::write(repo.join("HEAD"), b"ref: refs/heads/main\n").unwrap();
        Self {
            root,
            git: Arc::new(git),
        }
    }

    pub fn repo(&self) -> PathBuf {
        self.root.path().join("project.git")
    }

    pub fn write(&self, relative: &str, contents: &[u8]) {
        let path = self.repo().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    pub fn app(&self) -> Router {
        self.app_with_timeouts(RpcTimeouts::default())
    }

    pub fn app_with_timeouts(&self, timeouts: RpcTimeouts) -> Router {
        let state = AppState::new(
            Arc::new(RootDirResolver::new(self.root.path())),
            self.git.clone(),
        )
        .with_timeouts(timeouts);
        create_router(state)
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn post(uri: &str, content_type: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", content_type)
        .body(body.into())
        .unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub fn path_arg(path: &Path) -> String {
    path.display().to_string()
}
