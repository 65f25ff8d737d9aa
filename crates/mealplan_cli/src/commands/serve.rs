//! Serve command implementation.

use super::CommandResult;
use mealplan_server::{BackupServer, Role, ServerConfig};
use mealplan_store::MemoryStore;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Runs the HTTP server until Ctrl-C.
///
/// With `--data` the snapshot is loaded at start (when present) and written
/// back on shutdown.
pub fn run(
    data: Option<&Path>,
    bind: Option<SocketAddr>,
    secret: Option<String>,
    production: bool,
) -> CommandResult {
    let mut config = ServerConfig::from_env()?;
    if let Some(bind) = bind {
        config.bind_addr = bind;
    }
    let random_secret = secret.is_none() && std::env::var(mealplan_server::ENV_AUTH_SECRET).is_err();
    if let Some(secret) = secret {
        config = config.with_auth_secret(secret.into_bytes());
    }
    if production {
        config = config.with_production(true);
    }

    let store = match data {
        Some(path) if path.exists() => Arc::new(MemoryStore::load(path)?),
        Some(path) => {
            warn!("no snapshot at {:?}, starting empty", path);
            Arc::new(MemoryStore::new())
        }
        None => Arc::new(MemoryStore::new()),
    };

    let server = BackupServer::new(config, store.clone());
    if random_secret {
        let token = server.issue_token(Uuid::new_v4(), Role::Admin)?;
        info!("admin token for this run: {}", token);
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(server.serve())?;

    if let Some(path) = data {
        store.save(path)?;
        info!("saved snapshot to {:?}", path);
    }
    Ok(())
}
