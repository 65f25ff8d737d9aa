//! CLI command implementations.

pub mod check;
pub mod exec;
pub mod export;
pub mod info;
pub mod serve;
pub mod token;

use mealplan_store::MemoryStore;
use std::path::Path;
use std::sync::Arc;

/// Result type shared by the commands.
pub type CommandResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Loads the snapshot file named by `--data`.
pub fn load_store(data: Option<&Path>) -> CommandResult<Arc<MemoryStore>> {
    let path = data.ok_or("Snapshot path required (--data)")?;
    if !path.exists() {
        return Err(format!("No snapshot found at {:?}", path).into());
    }
    Ok(Arc::new(MemoryStore::load(path)?))
}
