//! Exec command implementation.

use super::{load_store, CommandResult};
use mealplan_backup::{SandboxConfig, ScriptSandbox};
use std::fs;
use std::path::Path;
use tracing::info;

/// Runs a script file against the snapshot.
///
/// Changes are kept only with `save`, and only when the script succeeds.
pub fn run(data: Option<&Path>, script: &Path, save: bool, step_limit: Option<u64>) -> CommandResult {
    let source = fs::read_to_string(script)?;
    let store = load_store(data)?;

    let sandbox = ScriptSandbox::new(store.clone())
        .with_config(SandboxConfig::default().with_step_limit(step_limit));
    let result = sandbox.execute(&source);

    for line in &result.output {
        println!("{line}");
    }
    if !result.success {
        let error = result.error.unwrap_or_default();
        return Err(format!("Script execution failed: {error}").into());
    }

    if save {
        if let Some(path) = data {
            store.save(path)?;
            info!("saved snapshot to {:?}", path);
        }
    }
    Ok(())
}
