//! JSON export renderer.

use super::ExportBundle;
use crate::error::BackupResult;
use serde_json::{json, Map, Value};

/// Renders a bundle as one pretty-printed JSON document.
pub fn render_json(bundle: &ExportBundle) -> BackupResult<String> {
    let m = &bundle.manifest;

    let mut data = Map::new();
    for snapshot in &bundle.collections {
        let mut entry = json!({
            "count": snapshot.count(),
            "records": snapshot.records,
        });
        if m.include_indexes {
            entry["indexes"] = Value::Array(snapshot.indexes.iter().map(|i| i.to_json()).collect());
        }
        data.insert(snapshot.def.logical_name.to_string(), entry);
    }

    let document = json!({
        "metadata": {
            "version": m.app_version,
            "timestamp": m.generated_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            "type": "json_export",
            "appName": m.app_name,
            "collections": bundle.collections.iter().map(|c| c.def.logical_name).collect::<Vec<_>>(),
            "includeIndexes": m.include_indexes,
        },
        "data": data,
    });

    Ok(serde_json::to_string_pretty(&document)?)
}
