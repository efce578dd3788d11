#![forbid(unsafe_code)]

//! vidhub API server.
//!
//! Resolves runtime configuration (CLI flags, then `.env`, then process
//! environment), opens the database under the data root and serves the
//! `/api/v1` router until Ctrl+C.

use std::{net::IpAddr, net::SocketAddr, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vidhub::{
    api::AppState,
    config::{RuntimeOverrides, resolve_runtime_config},
    routes,
    security::ensure_not_root,
    store::{DATABASE_FILE, Store},
};

const DEFAULT_LOG_FILTER: &str = "vidhub=info,backend=info";

#[derive(Debug, Parser)]
#[command(name = "backend", about = "Serve the vidhub REST API")]
struct BackendArgs {
    /// Directory holding the database and uploaded assets.
    #[arg(long, value_name = "DIR")]
    data_root: Option<PathBuf>,
    #[arg(long)]
    host: Option<IpAddr>,
    #[arg(long)]
    port: Option<u16>,
    /// Dotenv file read before the process environment.
    #[arg(long, value_name = "FILE")]
    env_file: Option<PathBuf>,
}

impl BackendArgs {
    fn overrides(self) -> RuntimeOverrides {
        RuntimeOverrides {
            data_root: self.data_root,
            host: self.host.map(|host| host.to_string()),
            port: self.port,
            env_path: self.env_file,
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = BackendArgs::parse();
    init_tracing();
    ensure_not_root("backend")?;

    let config = resolve_runtime_config(args.overrides())?;
    let host: IpAddr = config
        .host
        .parse()
        .with_context(|| format!("expected an IP address for the listen host, got {:?}", config.host))?;

    let store = Store::open(&config.data_root.join(DATABASE_FILE)).await?;
    let state = AppState::new(store, &config);
    state.assets.prepare().await?;
    let app = routes::router(state);

    let addr = SocketAddr::new(host, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!(
        %addr,
        data_root = %config.data_root.display(),
        public_url = %config.public_url,
        "API server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    // Only graceful shutdown depends on this; Ctrl+C still terminates.
    if let Err(err) = signal::ctrl_c().await {
        error!(%err, "failed to install Ctrl+C handler");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_become_overrides() {
        let args = BackendArgs::try_parse_from([
            "backend",
            "--data-root",
            "/srv/vidhub",
            "--host",
            "0.0.0.0",
            "--port=9000",
            "--env-file",
            "prod.env",
        ])
        .unwrap();
        let overrides = args.overrides();
        assert_eq!(overrides.data_root, Some(PathBuf::from("/srv/vidhub")));
        assert_eq!(overrides.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(overrides.port, Some(9000));
        assert_eq!(overrides.env_path, Some(PathBuf::from("prod.env")));
    }

    #[test]
    fn no_flags_leave_config_to_environment() {
        let overrides = BackendArgs::try_parse_from(["backend"]).unwrap().overrides();
        assert!(overrides.data_root.is_none());
        assert!(overrides.host.is_none());
        assert!(overrides.port.is_none());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(BackendArgs::try_parse_from(["backend", "--port", "70000"]).is_err());
        assert!(BackendArgs::try_parse_from(["backend", "--host", "not-an-ip"]).is_err());
        assert!(BackendArgs::try_parse_from(["backend", "--media-root", "x"]).is_err());
    }
}
