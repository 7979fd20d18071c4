//! # Gitway Server
//!
//! Serves bare git repositories over HTTP, speaking both the smart protocol
//! (`git-upload-pack` / `git-receive-pack` in stateless-RPC mode) and the
//! dumb protocol (plain files out of the repository directory).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     HTTP (axum)                          │
//! │   request id span · TraceLayer · fallback dispatcher     │
//! ├──────────────────────────────────────────────────────────┤
//! │  PathRouter  ──►  RepoResolver  ──►  Handler             │
//! │                                       │                  │
//! │         ┌─────────────────────────────┼──────────────┐   │
//! │         ▼                             ▼              ▼   │
//! │   rpc::service_rpc            rpc::info_refs   static_files
//! │   (stream git stdio)          (advertise refs)  (cache headers)
//! ├──────────────────────────────────────────────────────────┤
//! │            gitway_git::ProcessBridge (git CLI)           │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cargo run --bin gitway-server -- --directory /srv/git --port 8080
//! git clone http://localhost:8080/project.git
//! ```
//!
//! ## Modules
//!
//! - [`api`] - Application state, error mapping and the request dispatcher
//! - [`routing`] - Path routing table and repository resolution
//! - [`rpc`] - Smart protocol endpoints backed by git subprocesses
//! - [`static_files`] - Dumb protocol file serving
//! - [`cache_headers`] - Cache policy for served resources
//! - [`config`] - Layered server configuration
//! - [`observability`] - Structured logging and request ids
//!
//! ## Example: Building the router
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gitway_git::GitCli;
//! use gitway_server::api::{create_router, AppState};
//! use gitway_server::routing::RootDirResolver;
//!
//! let state = AppState::new(
//!     Arc::new(RootDirResolver::new("/srv/git")),
//!     Arc::new(GitCli::default()),
//! );
//! let app = create_router(state);
//! ```

pub mod api;
pub mod cache_headers;
pub mod config;
pub mod observability;
pub mod routing;
pub mod rpc;
pub mod static_files;
