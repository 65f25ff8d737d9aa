//! Export command implementation.

use super::{load_store, CommandResult};
use mealplan_backup::{BackupConfig, CollectionRegistry, ExportFormat, ExportRequest, Exporter};
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Writes an export of the snapshot to `output`, or stdout.
pub fn run(
    data: Option<&Path>,
    format: &str,
    collections: Vec<String>,
    include_indexes: bool,
    output: Option<&Path>,
) -> CommandResult {
    let format: ExportFormat = format.parse()?;
    let store = load_store(data)?;
    let exporter = Exporter::new(
        store,
        Arc::new(CollectionRegistry::meal_planner()),
        BackupConfig::default(),
    );
    let request = ExportRequest::all(format)
        .with_collections(collections)
        .with_indexes(include_indexes);
    let payload = exporter.generate(&request)?;

    match output {
        Some(path) => {
            fs::write(path, &payload.body)?;
            eprintln!("✓ Export written");
            eprintln!("  Path: {:?}", path);
            eprintln!("  Format: {}", format);
            eprintln!("  Size: {} bytes", payload.body.len());
            eprintln!("  Suggested name: {}", payload.filename);
        }
        None => print!("{}", payload.body),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mealplan_testkit::fixtures::SnapshotFile;

    #[test]
    fn writes_json_export() {
        let snapshot = SnapshotFile::seeded();
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("backup.json");

        run(Some(snapshot.path()), "json", vec!["Meal".into()], false, Some(&out)).unwrap();

        let doc: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(doc["data"]["Meal"]["count"], 3);
        assert!(doc["data"].get("User").is_none());
    }

    #[test]
    fn rejects_unknown_format() {
        let snapshot = SnapshotFile::seeded();
        assert!(run(Some(snapshot.path()), "xml", Vec::new(), false, None).is_err());
    }

    #[test]
    fn requires_snapshot() {
        assert!(run(None, "json", Vec::new(), false, None).is_err());
    }
}
