// Daemon runtime: wires the store, trigger worker, and RPC server.

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use crate::auth::StaticAuth;
use crate::config::DaemonConfig;
use crate::identity::FileIdentityProvider;
use crate::rpc::methods::RpcServerState;
use crate::rpc::unix::serve_unix_until_shutdown;
use crate::startup::{bind_socket, remove_pid_file, write_pid_file, DaemonPaths};
use crate::store::DocStore;
use crate::trigger::spawn_vote_trigger;

pub async fn run_standalone() -> Result<()> {
    let config = DaemonConfig::load();
    let paths = DaemonPaths::resolve(&config)?;
    run_standalone_with_paths(paths, config).await
}

pub async fn run_standalone_with_paths(paths: DaemonPaths, config: DaemonConfig) -> Result<()> {
    let store = Arc::new(DocStore::open(&paths.db_path)?);
    let trigger = spawn_vote_trigger(Arc::clone(&store));

    let identity = FileIdentityProvider::new(&paths.identity_path)
        .load_or_create(Utc::now(), &mut rand::thread_rng())
        .context("failed to load client identity")?;
    let auth = Arc::new(StaticAuth::from_config(config.owner_id.clone()));

    let listener = bind_socket(&paths.socket_path).await?;
    write_pid_file(&paths.pid_path)?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
    let state = RpcServerState::new(store, auth, identity.clone())
        .with_shutdown_notifier(shutdown_tx.clone());
    let ctrl_c_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = ctrl_c_tx.send(());
    });

    info!(
        socket_path = %paths.socket_path.display(),
        client_id = %identity.client_id,
        "standalone plenum daemon started"
    );
    let result = serve_unix_until_shutdown(listener, state, shutdown_rx).await;

    trigger.abort();
    remove_pid_file(&paths.pid_path);
    let _ = std::fs::remove_file(&paths.socket_path);
    result.context("standalone daemon exited with error")
}
