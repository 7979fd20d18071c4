//! Smart-protocol endpoints backed by git subprocesses.
//!
//! `info/refs?service=...` captures `git <rpc> --advertise-refs` in full and
//! prefixes it with the service announcement. `POST git-<rpc>` streams the
//! request body into `git <rpc> --stateless-rpc` and its stdout straight
//! back to the client, so neither side is ever buffered in memory.

use axum::{
    body::{Body, BodyDataStream},
    extract::Request,
    http::{header, HeaderMap, HeaderValue},
    response::Response,
};
use bytes::Bytes;
use flate2::write::GzDecoder;
use futures_util::{Stream, StreamExt};
use gitway_git::{
    service_announcement, Invocation, ProcessBridge, ProcessExit, ProcessHandle, ProcessInput,
    ProcessOutput, Service,
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::io::ReaderStream;

use crate::api::{ApiError, AppState};
use crate::cache_headers::{apply_no_cache, ResourceClass};
use crate::observability::RequestId;
use crate::static_files;

/// Stderr kept for logging; anything beyond this is drained and dropped.
const STDERR_CAPTURE_LIMIT: usize = 64 * 1024;

/// A complete gzip header is at least this long.
const GZIP_HEADER_LEN: usize = 10;

/// Deadlines for git subprocesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcTimeouts {
    /// Ref advertisement and `update-server-info`.
    pub advertise: Duration,
    /// A full upload-pack / receive-pack exchange.
    pub rpc: Duration,
}

impl Default for RpcTimeouts {
    fn default() -> Self {
        Self {
            advertise: Duration::from_secs(60),
            rpc: Duration::from_secs(3600),
        }
    }
}

/// Refreshes `info/refs` and `objects/info/packs` for dumb clients.
///
/// Best effort: failures are logged and never fail the request.
pub async fn update_server_info(bridge: &dyn ProcessBridge, repo_dir: &Path, timeout: Duration) {
    let invocation = Invocation::update_server_info(repo_dir);
    let run = async {
        let process = bridge.spawn(&invocation).await?;
        process.output().await
    };

    match tokio::time::timeout(timeout, run).await {
        Ok(Ok(output)) if output.exit.success() => {
            tracing::debug!(dir = %repo_dir.display(), "Updated server info");
        }
        Ok(Ok(output)) => {
            tracing::warn!(
                dir = %repo_dir.display(),
                exit = %output.exit,
                stderr = %output.stderr_lossy(),
                "update-server-info failed"
            );
        }
        Ok(Err(e)) => {
            tracing::warn!(dir = %repo_dir.display(), error = %e, "update-server-info failed");
        }
        Err(_) => {
            tracing::warn!(dir = %repo_dir.display(), "update-server-info timed out");
        }
    }
}

/// `GET <repo>/info/refs`, smart when `service` names a known RPC and dumb
/// otherwise.
pub async fn info_refs(
    state: &AppState,
    repo_dir: &Path,
    resource_path: &str,
    service: Option<Service>,
) -> Result<Response, ApiError> {
    match service {
        Some(service) => advertise_refs(state, repo_dir, service).await,
        None => {
            update_server_info(state.bridge.as_ref(), repo_dir, state.timeouts.advertise).await;
            static_files::serve(
                repo_dir,
                resource_path,
                "text/plain; charset=utf-8",
                ResourceClass::Volatile,
            )
            .await
        }
    }
}

/// Smart ref advertisement: announcement pkt-line, flush, then git's output.
pub async fn advertise_refs(
    state: &AppState,
    repo_dir: &Path,
    service: Service,
) -> Result<Response, ApiError> {
    ensure_repository(repo_dir).await?;

    let invocation = Invocation::advertise_refs(service, repo_dir);
    let run = async {
        let process = state.bridge.spawn(&invocation).await?;
        process.output().await
    };
    let output = tokio::time::timeout(state.timeouts.advertise, run)
        .await
        .map_err(|_| ApiError::Timeout(format!("{service} --advertise-refs")))??;

    if !output.exit.success() {
        return Err(ApiError::SubprocessExit {
            service,
            exit: output.exit,
            stderr: output.stderr_lossy(),
        });
    }

    let mut body = service_announcement(service);
    body.extend_from_slice(&output.stdout);

    let mut response = Response::new(Body::from(body));
    let headers = response.headers_mut();
    apply_no_cache(headers);
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(service.advertisement_content_type()),
    );

    tracing::debug!(
        service = %service,
        dir = %repo_dir.display(),
        refs_bytes = output.stdout.len(),
        "Advertised refs"
    );

    Ok(response)
}

/// `POST <repo>/git-<rpc>`: relays the request body into git and git's
/// output back to the client.
pub async fn service_rpc(
    state: &AppState,
    repo_dir: &Path,
    service: Service,
    request: Request,
) -> Result<Response, ApiError> {
    let expected = service.request_content_type();
    let declared = header_str(request.headers(), header::CONTENT_TYPE);
    if declared != Some(expected) {
        return Err(ApiError::ContentType {
            expected,
            actual: declared.map(str::to_string),
        });
    }

    ensure_repository(repo_dir).await?;

    // The body stream outlives the request span, so the id is logged by hand.
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();

    let decoder = match header_str(request.headers(), header::CONTENT_ENCODING) {
        Some("gzip") => BodyDecoder::gzip(),
        _ => BodyDecoder::Identity,
    };
    let mut body = request.into_body().into_data_stream();
    let (decoder, primed) = prime_decoder(decoder, &mut body).await?;

    let process = state
        .bridge
        .spawn(&Invocation::stateless_rpc(service, repo_dir))
        .await?;

    let stdin = process.stdin.map(|stdin| {
        tokio::spawn(feed_stdin(stdin, body, decoder, primed, service))
    });
    let stderr = tokio::spawn(capture_stderr(process.stderr));

    let relay = Relay {
        stdout: ReaderStream::new(process.stdout),
        handle: Some(process.handle),
        stdin,
        stderr: Some(stderr),
        deadline: Instant::now() + state.timeouts.rpc,
        service,
        repo_dir: repo_dir.to_path_buf(),
        request_id,
    };

    tracing::debug!(service = %service, dir = %repo_dir.display(), "Streaming RPC");

    let mut response = Response::new(Body::from_stream(relay.into_stream()));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(service.result_content_type()),
    );
    Ok(response)
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn ensure_repository(repo_dir: &Path) -> Result<(), ApiError> {
    match tokio::fs::metadata(repo_dir).await {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        _ => Err(ApiError::RepoNotFound(repo_dir.display().to_string())),
    }
}

/// Request body decoding, driven one chunk at a time.
enum BodyDecoder {
    Identity,
    Gzip(Box<GzDecoder<Vec<u8>>>),
}

impl BodyDecoder {
    fn gzip() -> Self {
        BodyDecoder::Gzip(Box::new(GzDecoder::new(Vec::new())))
    }

    fn decode(&mut self, chunk: Bytes) -> io::Result<Bytes> {
        match self {
            BodyDecoder::Identity => Ok(chunk),
            BodyDecoder::Gzip(decoder) => {
                decoder.write_all(&chunk)?;
                Ok(Bytes::from(std::mem::take(decoder.get_mut())))
            }
        }
    }

    fn finish(&mut self) -> io::Result<Bytes> {
        match self {
            BodyDecoder::Identity => Ok(Bytes::new()),
            BodyDecoder::Gzip(decoder) => {
                decoder.try_finish()?;
                Ok(Bytes::from(std::mem::take(decoder.get_mut())))
            }
        }
    }
}

/// Decoded body bytes read ahead of spawning git.
struct Primed {
    chunks: Vec<Bytes>,
    finished: bool,
}

/// Feeds enough of a gzip body through the decoder to validate its header,
/// so a malformed body is rejected before any subprocess is started.
async fn prime_decoder(
    mut decoder: BodyDecoder,
    body: &mut BodyDataStream,
) -> Result<(BodyDecoder, Primed), ApiError> {
    let mut primed = Primed {
        chunks: Vec::new(),
        finished: false,
    };
    if matches!(decoder, BodyDecoder::Identity) {
        return Ok((decoder, primed));
    }

    let mut consumed = 0;
    while consumed < GZIP_HEADER_LEN {
        match body.next().await {
            Some(Ok(chunk)) => {
                consumed += chunk.len();
                let decoded = decoder.decode(chunk).map_err(ApiError::Decompression)?;
                if !decoded.is_empty() {
                    primed.chunks.push(decoded);
                }
            }
            Some(Err(e)) => return Err(ApiError::RequestBody(e)),
            None => {
                let tail = decoder.finish().map_err(ApiError::Decompression)?;
                if !tail.is_empty() {
                    primed.chunks.push(tail);
                }
                primed.finished = true;
                break;
            }
        }
    }

    Ok((decoder, primed))
}

/// Copies the (decoded) request body into git's stdin, then closes it.
async fn feed_stdin(
    mut stdin: ProcessInput,
    mut body: BodyDataStream,
    mut decoder: BodyDecoder,
    primed: Primed,
    service: Service,
) {
    let result: io::Result<()> = async {
        for chunk in primed.chunks {
            stdin.write_all(&chunk).await?;
        }
        if !primed.finished {
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(io::Error::other)?;
                let decoded = decoder.decode(chunk)?;
                stdin.write_all(&decoded).await?;
            }
            let tail = decoder.finish()?;
            stdin.write_all(&tail).await?;
        }
        stdin.shutdown().await
    }
    .await;

    match result {
        Ok(()) => {}
        // git may exit before reading everything; its exit status tells the story.
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
            tracing::debug!(service = %service, "git closed stdin early");
        }
        Err(e) => {
            tracing::warn!(service = %service, error = %e, "Failed to relay request body");
        }
    }
}

/// Reads stderr to the end, keeping the first [`STDERR_CAPTURE_LIMIT`] bytes.
async fn capture_stderr(mut stderr: ProcessOutput) -> Vec<u8> {
    let mut captured = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match stderr.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = STDERR_CAPTURE_LIMIT.saturating_sub(captured.len());
                captured.extend_from_slice(&buf[..n.min(room)]);
            }
        }
    }
    captured
}

/// State of one streaming RPC response.
///
/// Dropping it before git's output ends (client gone) kills the child and
/// stops the stdin relay.
struct Relay {
    stdout: ReaderStream<ProcessOutput>,
    handle: Option<Box<dyn ProcessHandle>>,
    stdin: Option<JoinHandle<()>>,
    stderr: Option<JoinHandle<Vec<u8>>>,
    deadline: Instant,
    service: Service,
    repo_dir: PathBuf,
    request_id: String,
}

impl Relay {
    fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        futures_util::stream::unfold(Some(self), |relay| async move {
            let mut relay = relay?;
            match tokio::time::timeout_at(relay.deadline, relay.stdout.next()).await {
                Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(relay))),
                Ok(Some(Err(e))) => {
                    tracing::error!(
                        request_id = %relay.request_id,
                        service = %relay.service,
                        dir = %relay.repo_dir.display(),
                        error = %e,
                        "Failed to read git output"
                    );
                    relay.kill().await;
                    Some((Err(e), None))
                }
                Ok(None) => {
                    relay.complete().await;
                    None
                }
                Err(_) => {
                    tracing::error!(
                        request_id = %relay.request_id,
                        service = %relay.service,
                        dir = %relay.repo_dir.display(),
                        "RPC timed out, killing git"
                    );
                    relay.kill().await;
                    let err = io::Error::new(io::ErrorKind::TimedOut, "git RPC timed out");
                    Some((Err(err), None))
                }
            }
        })
    }

    async fn kill(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            if let Err(e) = handle.kill().await {
                tracing::debug!(error = %e, "Failed to kill git");
            }
        }
    }

    /// Stdout hit EOF: reap the child and log a failed exit.
    async fn complete(mut self) {
        if let Some(stdin) = self.stdin.take() {
            stdin.abort();
        }
        let Some(mut handle) = self.handle.take() else {
            return;
        };
        let stderr = self.stderr.take();

        let reap = async {
            let stderr = match stderr {
                Some(task) => task.await.unwrap_or_default(),
                None => Vec::new(),
            };
            (handle.wait().await, stderr)
        };

        match tokio::time::timeout_at(self.deadline, reap).await {
            Ok((Ok(exit), _)) if exit.success() => {
                tracing::debug!(
                    request_id = %self.request_id,
                    service = %self.service,
                    "RPC completed"
                );
            }
            Ok((Ok(exit), stderr)) => self.log_failure(Some(exit), None, &stderr),
            Ok((Err(e), stderr)) => self.log_failure(None, Some(e.to_string()), &stderr),
            Err(_) => {
                tracing::error!(
                    request_id = %self.request_id,
                    service = %self.service,
                    "Timed out waiting for git to exit"
                );
                if let Err(e) = handle.kill().await {
                    tracing::debug!(error = %e, "Failed to kill git");
                }
            }
        }
    }

    fn log_failure(&self, exit: Option<ProcessExit>, error: Option<String>, stderr: &[u8]) {
        tracing::error!(
            request_id = %self.request_id,
            service = %self.service,
            dir = %self.repo_dir.display(),
            exit = ?exit.and_then(|e| e.code),
            error = ?error,
            stderr = %String::from_utf8_lossy(stderr).trim(),
            "Failed to serve RPC"
        );
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        if let Some(stdin) = self.stdin.take() {
            stdin.abort();
        }
        if let Some(stderr) = self.stderr.take() {
            stderr.abort();
        }
        if let Some(mut handle) = self.handle.take() {
            tracing::debug!(
                request_id = %self.request_id,
                service = %self.service,
                "Response dropped mid-stream, killing git"
            );
            // Without a runtime the handle's own drop has to do.
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    if let Err(e) = handle.kill().await {
                        tracing::debug!(error = %e, "Failed to kill git");
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_identity_decoder_passes_through() {
        let mut decoder = BodyDecoder::Identity;
        assert_eq!(decoder.decode(Bytes::from_static(b"0000")).unwrap(), "0000");
        assert!(decoder.finish().unwrap().is_empty());
    }

    #[test]
    fn test_gzip_decoder_across_chunks() {
        let compressed = gzip(b"0032want 0123456789abcdef0123456789abcdef01234567\n00000009done\n");
        let mut decoder = BodyDecoder::gzip();
        let mut out = Vec::new();
        for chunk in compressed.chunks(7) {
            out.extend_from_slice(&decoder.decode(Bytes::copy_from_slice(chunk)).unwrap());
        }
        out.extend_from_slice(&decoder.finish().unwrap());
        assert_eq!(
            out,
            b"0032want 0123456789abcdef0123456789abcdef01234567\n00000009done\n"
        );
    }

    #[test]
    fn test_gzip_decoder_rejects_garbage() {
        let mut decoder = BodyDecoder::gzip();
        assert!(decoder
            .decode(Bytes::from_static(b"this is not gzip at all"))
            .is_err());
    }

    #[test]
    fn test_default_timeouts() {
        let timeouts = RpcTimeouts::default();
        assert_eq!(timeouts.advertise, Duration::from_secs(60));
        assert_eq!(timeouts.rpc, Duration::from_secs(3600));
    }
}
