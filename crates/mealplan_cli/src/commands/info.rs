//! Info command implementation.

use super::{load_store, CommandResult};
use mealplan_backup::{BackupConfig, CollectionInventory, CollectionRegistry, DatabaseInfo};
use std::fmt::Write;
use std::path::Path;
use std::sync::Arc;

/// Prints the inventory of the snapshot.
pub fn run(data: Option<&Path>, format: &str) -> CommandResult {
    let store = load_store(data)?;
    let inventory = CollectionInventory::new(store, Arc::new(CollectionRegistry::meal_planner()));
    let version = BackupConfig::default().app_version.to_string();
    let info = inventory.database_info(&version)?;
    print!("{}", render(&info, format)?);
    Ok(())
}

/// Renders the report as `text` or `json`.
pub fn render(info: &DatabaseInfo, format: &str) -> CommandResult<String> {
    match format {
        "json" => Ok(format!("{}\n", serde_json::to_string_pretty(info)?)),
        "text" => {
            let mut out = String::new();
            writeln!(out, "Database Information")?;
            writeln!(out, "====================")?;
            writeln!(out, "  App version: {}", info.app_version)?;
            writeln!(
                out,
                "  Engine: {} {} ({})",
                info.database.name, info.database.version, info.database.database
            )?;
            writeln!(out, "  Total documents: {}", info.total_documents)?;
            writeln!(out)?;
            writeln!(out, "{:<14} {:<15} {:>7}  fields", "collection", "store", "count")?;
            for (name, summary) in &info.collections {
                writeln!(
                    out,
                    "{:<14} {:<15} {:>7}  {}",
                    name,
                    summary.collection,
                    summary.count,
                    summary.schema.join(", ")
                )?;
            }
            Ok(out)
        }
        other => Err(format!("Unknown format: {other} (expected text or json)").into()),
    }
}
