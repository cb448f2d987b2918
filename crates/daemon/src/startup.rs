// Daemon startup: data paths, PID file, Unix socket creation.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::net::UnixListener;
use tracing::info;

use crate::config::{global_dir, DaemonConfig};

/// Default socket path: ~/.plenum/daemon.sock
const SOCKET_NAME: &str = "daemon.sock";
/// PID file: ~/.plenum/daemon.pid (diagnostics only)
const PID_FILE_NAME: &str = "daemon.pid";
/// Document database: ~/.plenum/poll.db
const DB_NAME: &str = "poll.db";
/// Client identity blob: ~/.plenum/identity.json
const IDENTITY_NAME: &str = "identity.json";

/// Resolved paths for daemon runtime files.
pub struct DaemonPaths {
    pub base_dir: PathBuf,
    pub socket_path: PathBuf,
    pub pid_path: PathBuf,
    pub db_path: PathBuf,
    pub identity_path: PathBuf,
}

impl DaemonPaths {
    /// Resolve paths under `~/.plenum/`, honoring the config's data-dir
    /// override.
    pub fn resolve(config: &DaemonConfig) -> Result<Self> {
        let base = match &config.data_dir {
            Some(dir) => dir.clone(),
            None => global_dir().context("could not determine home directory")?,
        };
        fs::create_dir_all(&base)
            .with_context(|| format!("failed to create data directory `{}`", base.display()))?;
        Ok(Self::in_dir(base))
    }

    /// Paths rooted at a specific directory (used by tests).
    pub fn in_dir(base_dir: PathBuf) -> Self {
        Self {
            socket_path: base_dir.join(SOCKET_NAME),
            pid_path: base_dir.join(PID_FILE_NAME),
            db_path: base_dir.join(DB_NAME),
            identity_path: base_dir.join(IDENTITY_NAME),
            base_dir,
        }
    }
}

/// Write the current process PID to the PID file.
pub fn write_pid_file(path: &Path) -> Result<()> {
    let pid = std::process::id();
    let mut file = fs::File::create(path).context("failed to create PID file")?;
    write!(file, "{pid}").context("failed to write PID")?;
    info!(pid, path = %path.display(), "wrote PID file");
    Ok(())
}

/// Remove the PID file on shutdown.
pub fn remove_pid_file(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(error = %e, "failed to remove PID file");
        }
    }
}

/// Remove stale socket file and bind a new Unix listener.
/// The daemon signals readiness by accepting connections on this socket.
pub async fn bind_socket(path: &Path) -> Result<UnixListener> {
    if path.exists() {
        fs::remove_file(path).context("failed to remove stale socket")?;
    }

    let listener = UnixListener::bind(path).context("failed to bind Unix socket")?;
    info!(path = %path.display(), "daemon socket ready");
    Ok(listener)
}

/// Check if a daemon is already running by connecting to the socket.
pub async fn is_daemon_running(socket_path: &Path) -> bool {
    tokio::net::UnixStream::connect(socket_path).await.is_ok()
}
