//! HTTP front end for git repositories.
//!
//! Every request goes through a single fallback handler that consults the
//! [`PathRouter`], checks the method, resolves the repository directory and
//! then hands off to the smart RPC bridge or the static file server.

use axum::{
    body::Body,
    extract::{Query, Request, State},
    http::{Method, StatusCode, Version},
    response::{IntoResponse, Response},
    Router,
};
use bytes::Bytes;
use gitway_git::{GitError, ProcessBridge, ProcessExit, Service};
use percent_encoding::percent_decode_str;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::observability::request_id_layer;
use crate::routing::{Handler, PathRouter, RepoResolver};
use crate::rpc::{self, RpcTimeouts};
use crate::static_files;

/// Application state shared across requests.
#[derive(Clone)]
pub struct AppState {
    /// Routing table.
    pub router: Arc<PathRouter>,
    /// Maps repository prefixes to directories.
    pub resolver: Arc<dyn RepoResolver>,
    /// Spawns git.
    pub bridge: Arc<dyn ProcessBridge>,
    /// Subprocess deadlines.
    pub timeouts: RpcTimeouts,
}

impl AppState {
    /// Creates state with the default git routing table.
    pub fn new(resolver: Arc<dyn RepoResolver>, bridge: Arc<dyn ProcessBridge>) -> Self {
        Self {
            router: Arc::new(PathRouter::git_default()),
            resolver,
            bridge,
            timeouts: RpcTimeouts::default(),
        }
    }

    /// Replaces the subprocess deadlines.
    pub fn with_timeouts(mut self, timeouts: RpcTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("no route for {0}")]
    RouteNotFound(String),
    #[error("method {method} not allowed for {path}")]
    MethodNotAllowed { method: Method, path: String },
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("resource not found: {0}")]
    ResourceMissing(String),
    #[error("repository not found: {0}")]
    RepoNotFound(String),
    #[error("expected content type {expected}, got {actual:?}")]
    ContentType {
        expected: &'static str,
        actual: Option<String>,
    },
    #[error("failed to read request body: {0}")]
    RequestBody(axum::Error),
    #[error("failed to decompress request body: {0}")]
    Decompression(std::io::Error),
    #[error("{service} failed with {exit}: {stderr}")]
    SubprocessExit {
        service: Service,
        exit: ProcessExit,
        stderr: String,
    },
    #[error("{0} timed out")]
    Timeout(String),
    #[error("git error: {0}")]
    Git(#[from] GitError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::RouteNotFound(_) | ApiError::ResourceMissing(_) | ApiError::RepoNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ApiError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::BadRequest(_) | ApiError::RequestBody(_) => StatusCode::BAD_REQUEST,
            ApiError::ContentType { .. } => StatusCode::UNAUTHORIZED,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Decompression(_)
            | ApiError::SubprocessExit { .. }
            | ApiError::Git(_)
            | ApiError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Plain-text body; internal detail never reaches the client.
    fn body(&self) -> &'static str {
        match self {
            ApiError::ResourceMissing(_) | ApiError::ContentType { .. } => "",
            ApiError::RouteNotFound(_) | ApiError::RepoNotFound(_) => "Not found",
            ApiError::MethodNotAllowed { .. } => "Method not allowed",
            ApiError::BadRequest(_) | ApiError::RequestBody(_) => "Bad request",
            ApiError::Timeout(_) => "Gateway timeout",
            _ => "Internal server error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let body = self.body();
        if body.is_empty() {
            // A sized empty body would make axum emit `content-length: 0`.
            let mut response = Response::new(unsized_empty_body());
            *response.status_mut() = status;
            response
        } else {
            (status, body).into_response()
        }
    }
}

/// An empty body without an exact size hint.
fn unsized_empty_body() -> Body {
    Body::from_stream(futures_util::stream::empty::<Result<Bytes, std::io::Error>>())
}

/// Creates the router serving every repository under `state`.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .fallback(dispatch)
        .layer(request_id_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Routes one request to its handler.
async fn dispatch(State(state): State<AppState>, request: Request) -> Result<Response, ApiError> {
    let path = decode_path(request.uri().path())?;
    let matched = state
        .router
        .route(&path)
        .ok_or_else(|| ApiError::RouteNotFound(path.clone()))?;

    if request.method() != matched.rule.method() {
        return Err(method_mismatch(request.method(), request.version(), &path));
    }

    let handler = matched.rule.handler();
    let resource_path = matched.resource_path.to_string();
    let repo_dir: PathBuf = state
        .resolver
        .resolve(matched.prefix)
        .ok_or_else(|| ApiError::RepoNotFound(matched.prefix.to_string()))?;

    tracing::debug!(
        route = matched.index,
        pattern = matched.rule.pattern(),
        dir = %repo_dir.display(),
        resource = %resource_path,
        "Matched route"
    );

    match handler {
        Handler::ServiceRpc(service) => {
            rpc::service_rpc(&state, &repo_dir, service, request).await
        }
        Handler::InfoRefs => {
            let service = requested_service(&request);
            rpc::info_refs(&state, &repo_dir, &resource_path, service).await
        }
        Handler::StaticFile {
            content_type,
            cache,
            refresh_server_info,
        } => {
            if refresh_server_info {
                rpc::update_server_info(state.bridge.as_ref(), &repo_dir, state.timeouts.advertise)
                    .await;
            }
            static_files::serve(&repo_dir, &resource_path, content_type, cache).await
        }
    }
}

/// Percent-decodes the request path. Normalization runs on the result, so an
/// encoded `..` is rejected like a literal one.
fn decode_path(raw: &str) -> Result<String, ApiError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|path| path.into_owned())
        .map_err(|_| ApiError::BadRequest(format!("path {raw} is not valid UTF-8")))
}

/// HTTP/1.1 and later get a 405; older clients get a plain 400.
fn method_mismatch(method: &Method, version: Version, path: &str) -> ApiError {
    if version >= Version::HTTP_11 {
        ApiError::MethodNotAllowed {
            method: method.clone(),
            path: path.to_string(),
        }
    } else {
        ApiError::BadRequest(format!("{method} {path} over {version:?}"))
    }
}

/// The `service` query parameter, if it names a known RPC.
fn requested_service(request: &Request) -> Option<Service> {
    let Query(params) = Query::<HashMap<String, String>>::try_from_uri(request.uri()).ok()?;
    params
        .get("service")
        .and_then(|value| Service::from_query_value(value))
}
