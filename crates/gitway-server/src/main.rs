//! Gitway - git over HTTP.
//!
//! Entry point for the `gitway-server` binary.

use anyhow::Context;
use clap::Parser;
use gitway_git::GitCli;
use gitway_server::{
    api::{create_router, AppState},
    config::ServerConfig,
    observability::{init_logging, LogFormat},
    routing::RootDirResolver,
};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

/// Serve git repositories over the smart and dumb HTTP protocols
#[derive(Parser, Debug)]
#[command(name = "gitway-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "GITWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Full listen address (overrides --bind and --port)
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// IP address to bind
    #[arg(short, long)]
    bind: Option<IpAddr>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory repositories are served from
    #[arg(short, long)]
    directory: Option<PathBuf>,

    /// Git executable
    #[arg(long)]
    git_binary: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long)]
    log_format: Option<String>,
}

impl Args {
    /// Applies command-line overrides on top of file and environment values.
    fn apply(self, config: &mut ServerConfig) {
        if let Some(ip) = self.bind {
            config.listen_addr.set_ip(ip);
        }
        if let Some(port) = self.port {
            config.listen_addr.set_port(port);
        }
        if let Some(listen) = self.listen {
            config.listen_addr = listen;
        }
        if let Some(directory) = self.directory {
            config.repo_root = directory;
        }
        if let Some(git_binary) = self.git_binary {
            config.git_binary = git_binary;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(format) = self.log_format {
            config.log_format = LogFormat::parse(&format);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = ServerConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    init_logging(&config.log_level, config.log_format);

    let repo_root = std::fs::canonicalize(&config.repo_root).with_context(|| {
        format!(
            "repository root {} is not accessible",
            config.repo_root.display()
        )
    })?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting gitway");
    tracing::info!(
        listen_addr = %config.listen_addr,
        repo_root = %repo_root.display(),
        git_binary = %config.git_binary.display(),
        advertise_timeout_secs = config.advertise_timeout_secs,
        rpc_timeout_secs = config.rpc_timeout_secs,
        "Server configuration"
    );

    let state = AppState::new(
        Arc::new(RootDirResolver::new(repo_root)),
        Arc::new(GitCli::new(config.git_binary.clone())),
    )
    .with_timeouts(config.timeouts());
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;

    tracing::info!(addr = %config.listen_addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn applied(args: &[&str]) -> ServerConfig {
        let mut config = ServerConfig::default();
        Args::parse_from(args).apply(&mut config);
        config
    }

    #[test]
    fn test_bind_and_port() {
        let config = applied(&["gitway-server", "--bind", "127.0.0.1", "--port", "9000"]);
        assert_eq!(config.listen_addr, "127.0.0.1:9000".parse().unwrap());

        let config = applied(&["gitway-server", "-b", "::1"]);
        assert_eq!(config.listen_addr, "[::1]:8080".parse().unwrap());
    }

    #[test]
    fn test_listen_overrides_bind() {
        let config = applied(&[
            "gitway-server",
            "--bind",
            "127.0.0.1",
            "--listen",
            "10.0.0.1:8000",
        ]);
        assert_eq!(config.listen_addr, "10.0.0.1:8000".parse().unwrap());
    }

    #[test]
    fn test_bind_requires_an_address() {
        assert!(Args::try_parse_from(["gitway-server", "--bind"]).is_err());
        assert!(Args::try_parse_from(["gitway-server", "--server", "127.0.0.1"]).is_err());
    }

    #[test]
    fn test_directory_and_log_flags() {
        let config = applied(&[
            "gitway-server",
            "-d",
            "/srv/git",
            "--log-level",
            "debug",
            "--log-format",
            "json",
        ]);
        assert_eq!(config.repo_root, PathBuf::from("/srv/git"));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_format, LogFormat::Json);
    }
}
