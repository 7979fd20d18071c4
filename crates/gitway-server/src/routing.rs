//! Request path routing.
//!
//! Maps a URL path onto a repository prefix, a resource path inside that
//! repository and the handler that serves it. Rules are evaluated in
//! declaration order and the first match wins.
//!
//! Patterns are written in lowercase and matched against the ASCII-lowercased
//! path. The prefix and resource path are then sliced out of the original
//! path at the same offsets, so `HEAD` on disk is still found as `HEAD`.

use axum::http::Method;
use gitway_git::Service;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

use crate::cache_headers::ResourceClass;

/// What to do with a matched request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    /// `POST <repo>/git-<rpc>`: stateless RPC through git.
    ServiceRpc(Service),
    /// `GET <repo>/info/refs`: smart advertisement or dumb fallback.
    InfoRefs,
    /// A file served straight from the repository directory.
    StaticFile {
        /// Declared `Content-Type`.
        content_type: &'static str,
        /// Cache policy.
        cache: ResourceClass,
        /// Run `git update-server-info` before serving.
        refresh_server_info: bool,
    },
}

/// One entry of the routing table.
#[derive(Debug, Clone)]
pub struct RouteRule {
    pattern: Regex,
    method: Method,
    handler: Handler,
}

impl RouteRule {
    /// Creates a rule. `pattern` must contain exactly one capture group, the
    /// repository prefix, and is matched against the lowercased path.
    pub fn new(pattern: &str, method: Method, handler: Handler) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            method,
            handler,
        })
    }

    /// The path pattern.
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// The HTTP method the rule answers to.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The handler for matching requests.
    pub fn handler(&self) -> Handler {
        self.handler
    }
}

/// A successful route lookup.
#[derive(Debug, Clone, Copy)]
pub struct RouteMatch<'r, 'p> {
    /// Index of the matched rule in the table.
    pub index: usize,
    /// The matched rule.
    pub rule: &'r RouteRule,
    /// Repository prefix, e.g. `/team/project.git`.
    pub prefix: &'p str,
    /// Path of the resource relative to the repository, e.g. `info/refs`.
    pub resource_path: &'p str,
}

const TEXT_PLAIN: &str = "text/plain";
const TEXT_PLAIN_UTF8: &str = "text/plain; charset=utf-8";
const LOOSE_OBJECT: &str = "application/x-git-loose-object";
const PACKED_OBJECTS: &str = "application/x-git-packed-objects";
const PACKED_OBJECTS_TOC: &str = "application/x-git-packed-objects-toc";

const fn text_file(refresh_server_info: bool) -> Handler {
    Handler::StaticFile {
        content_type: TEXT_PLAIN,
        cache: ResourceClass::Volatile,
        refresh_server_info,
    }
}

const fn immutable(content_type: &'static str, refresh_server_info: bool) -> Handler {
    Handler::StaticFile {
        content_type,
        cache: ResourceClass::Immutable,
        refresh_server_info,
    }
}

/// The smart + dumb HTTP routing table, in evaluation order.
static GIT_ROUTES: Lazy<Vec<RouteRule>> = Lazy::new(|| {
    let table: [(&str, Method, Handler); 11] = [
        (r"^(.*?)/git-upload-pack$", Method::POST, Handler::ServiceRpc(Service::UploadPack)),
        (r"^(.*?)/git-receive-pack$", Method::POST, Handler::ServiceRpc(Service::ReceivePack)),
        (r"^(.*?)/info/refs$", Method::GET, Handler::InfoRefs),
        (r"^(.*?)/head$", Method::GET, text_file(false)),
        (r"^(.*?)/objects/info/alternates$", Method::GET, text_file(false)),
        (r"^(.*?)/objects/info/http-alternates$", Method::GET, text_file(false)),
        (r"^(.*?)/objects/info/packs$", Method::GET, immutable(TEXT_PLAIN_UTF8, true)),
        (r"^(.*?)/objects/info/[^/]*$", Method::GET, text_file(false)),
        (r"^(.*?)/objects/[0-9a-f]{2}/[0-9a-f]{38}$", Method::GET, immutable(LOOSE_OBJECT, false)),
        (r"^(.*?)/objects/pack/pack-[0-9a-f]{40}\.pack$", Method::GET, immutable(PACKED_OBJECTS, false)),
        (r"^(.*?)/objects/pack/pack-[0-9a-f]{40}\.idx$", Method::GET, immutable(PACKED_OBJECTS_TOC, false)),
    ];

    table
        .into_iter()
        .map(|(pattern, method, handler)| {
            RouteRule::new(pattern, method, handler).expect("Invalid route pattern")
        })
        .collect()
});

/// Ordered, immutable routing table.
#[derive(Debug, Clone)]
pub struct PathRouter {
    rules: Vec<RouteRule>,
}

impl PathRouter {
    /// Creates a router over `rules`, evaluated in order.
    pub fn new(rules: Vec<RouteRule>) -> Self {
        Self { rules }
    }

    /// The standard git smart/dumb HTTP table.
    pub fn git_default() -> Self {
        Self::new(GIT_ROUTES.clone())
    }

    /// All rules in evaluation order.
    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    /// Finds the first rule matching `path`.
    ///
    /// Returns `None` when nothing matches or the path is not normalized.
    pub fn route<'p>(&self, path: &'p str) -> Option<RouteMatch<'_, 'p>> {
        if !is_normalized(path) {
            return None;
        }

        let lowered = path.to_ascii_lowercase();
        self.rules.iter().enumerate().find_map(|(index, rule)| {
            let prefix_end = rule.pattern.captures(&lowered)?.get(1)?.end();
            // Every pattern puts a '/' right after the capture group.
            let resource_path = path.get(prefix_end + 1..)?;
            Some(RouteMatch {
                index,
                rule,
                prefix: &path[..prefix_end],
                resource_path,
            })
        })
    }
}

impl Default for PathRouter {
    fn default() -> Self {
        Self::git_default()
    }
}

/// Rejects paths that could step outside the repository root.
fn is_normalized(path: &str) -> bool {
    !path.contains(['\\', '\0'])
        && path
            .split('/')
            .all(|segment| segment != "." && segment != "..")
}

/// Maps a captured repository prefix to a directory on disk.
pub trait RepoResolver: Send + Sync {
    /// Returns the repository directory for `prefix`, or `None` if the prefix
    /// does not name a servable repository.
    fn resolve(&self, prefix: &str) -> Option<PathBuf>;
}

impl<F> RepoResolver for F
where
    F: Fn(&str) -> Option<PathBuf> + Send + Sync,
{
    fn resolve(&self, prefix: &str) -> Option<PathBuf> {
        self(prefix)
    }
}

/// Resolves prefixes relative to a single repository root.
#[derive(Debug, Clone)]
pub struct RootDirResolver {
    root: PathBuf,
}

impl RootDirResolver {
    /// Creates a resolver rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The repository root.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl RepoResolver for RootDirResolver {
    fn resolve(&self, prefix: &str) -> Option<PathBuf> {
        let relative = prefix.trim_start_matches('/');
        if relative.is_empty() {
            return Some(self.root.clone());
        }
        if !is_normalized(relative) {
            return None;
        }
        Some(self.root.join(relative))
    }
}
