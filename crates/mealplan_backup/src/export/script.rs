//! Dump-script renderer.

use super::{CollectionSnapshot, ExportBundle};
use crate::shell::{quote, to_shell};
use mealplan_store::Document;
use serde_json::{json, Value};
use std::fmt::Write;

const RULE: &str = "// ==========================================================";

/// Renders a bundle as a shell script that restores it.
#[must_use]
pub fn render_script(bundle: &ExportBundle) -> String {
    let m = &bundle.manifest;
    let mut out = String::new();

    let names: Vec<&str> = bundle
        .collections
        .iter()
        .map(|c| c.def.logical_name)
        .collect();

    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(out, "// Generated backup script for {}", m.app_name);
    let _ = writeln!(out, "// Version: {}", m.app_version);
    let _ = writeln!(
        out,
        "// Generated: {}",
        m.generated_at.format("%Y-%m-%dT%H:%M:%S%.3fZ")
    );
    let _ = writeln!(out, "// Compatible with: {}", m.target_engine);
    let _ = writeln!(out, "// Collections: {}", names.join(", "));
    let _ = writeln!(
        out,
        "// Include indexes: {}",
        if m.include_indexes { "yes" } else { "no" }
    );
    let _ = writeln!(out, "{RULE}");
    out.push('\n');

    out.push_str("if (!db) {\n");
    out.push_str("  print(\"ERROR: no database handle; run this script from a connected shell\");\n");
    out.push_str("  throw new Error(\"Database handle 'db' is not available\");\n");
    out.push_str("}\n\n");

    let _ = writeln!(
        out,
        "print({});",
        quote(&format!(
            "Restoring {} backup (version {}) into {}",
            m.app_name, m.app_version, m.database_name
        ))
    );
    out.push('\n');

    for snapshot in &bundle.collections {
        write_collection(&mut out, snapshot, m.include_indexes);
    }

    let _ = writeln!(
        out,
        "print({});",
        quote(&format!(
            "Restore complete: {} documents in {} collections",
            bundle.total_records(),
            bundle.collections.len()
        ))
    );
    out.push('\n');

    out.push_str("// ========== RESTORATION INSTRUCTIONS ==========\n");
    out.push_str("// 1. Connect a shell to the target database:\n");
    let _ = writeln!(
        out,
        "//      mongosh \"mongodb://localhost:27017/{}\"",
        m.database_name
    );
    out.push_str("// 2. Load this file:\n");
    let _ = writeln!(out, "//      load(\"{}\")", m.filename());
    out.push_str("// 3. Compare the document counts printed above with the source.\n");
    out.push_str("// Every collection listed in the header is dropped before it is restored.\n");
    out
}

fn write_collection(out: &mut String, snapshot: &CollectionSnapshot, include_indexes: bool) {
    let def = &snapshot.def;
    let target = format!("db.{}", def.collection);

    let _ = writeln!(
        out,
        "// ---------- {} ({}): {} documents ----------",
        def.logical_name,
        def.collection,
        snapshot.count()
    );
    let _ = writeln!(
        out,
        "print({});",
        quote(&format!(
            "Restoring {}: {} documents",
            def.logical_name,
            snapshot.count()
        ))
    );
    let _ = writeln!(out, "{target}.drop();");

    if !snapshot.records.is_empty() {
        let _ = writeln!(out, "{target}.insertMany([");
        let last = snapshot.records.len() - 1;
        for (i, record) in snapshot.records.iter().enumerate() {
            let sep = if i == last { "" } else { "," };
            let _ = writeln!(out, "  {}{sep}", record_literal(record));
        }
        out.push_str("]);\n");
    }

    if include_indexes {
        for index in snapshot.secondary_indexes() {
            let mut options = json!({"name": index.name});
            if index.unique {
                options["unique"] = Value::Bool(true);
            }
            let _ = writeln!(
                out,
                "{target}.createIndex({}, {});",
                to_shell(&index.key_document()),
                to_shell(&options)
            );
        }
        let _ = writeln!(out, "printjson({target}.getIndexes());");
    }
    out.push('\n');
}

fn record_literal(record: &Document) -> String {
    to_shell(&Value::Object(record.clone()))
}

#[cfg(test)]
mod tests {
    use crate::config::BackupConfig;
    use crate::export::{ExportFormat, ExportRequest, Exporter};
    use crate::registry::CollectionRegistry;
    use mealplan_testkit::fixtures::seeded_store;
    use std::sync::Arc;

    fn script(request: ExportRequest) -> String {
        Exporter::new(
            seeded_store(),
            Arc::new(CollectionRegistry::meal_planner()),
            BackupConfig::default(),
        )
        .generate(&request)
        .unwrap()
        .body
    }

    #[test]
    fn header_and_structure() {
        let body = script(ExportRequest::all(ExportFormat::ScriptDump));
        assert!(body.contains("Generated backup script for Meal Planner App"));
        assert!(body.contains("// Version: "));
        assert!(body.contains("// Generated: "));
        assert!(body.contains("// Compatible with: MongoDB"));
        assert!(body.contains("if (!db) {"));
        assert!(body.contains("========== RESTORATION INSTRUCTIONS =========="));
        let instructions = body.find("RESTORATION INSTRUCTIONS").unwrap();
        let last_print = body.rfind("print(").unwrap();
        assert!(last_print < instructions);
    }

    #[test]
    fn all_collections_when_none_selected() {
        let body = script(ExportRequest::all(ExportFormat::ScriptDump));
        for def in CollectionRegistry::meal_planner().iter() {
            assert!(body.contains(&format!("Restoring {}:", def.logical_name)), "{def}");
        }
    }

    #[test]
    fn subset_only() {
        let body = script(ExportRequest::all(ExportFormat::ScriptDump).with_collections(["Meal"]));
        assert!(body.contains("db.meals.insertMany(["));
        assert!(!body.contains("db.users"));
        assert!(!body.contains("Restoring Ingredient"));
    }

    #[test]
    fn index_switch() {
        let with = script(ExportRequest::all(ExportFormat::ScriptDump).with_indexes(true));
        assert!(with.contains("printjson(db.users.getIndexes());"));
        assert!(with.contains(r#"db.users.createIndex({"email": 1}, {"name": "email_1", "unique": true});"#));
        assert!(!with.contains("\"_id_\""));

        let without = script(ExportRequest::all(ExportFormat::ScriptDump));
        assert!(!without.contains("getIndexes"));
        assert!(!without.contains("createIndex"));
    }

    #[test]
    fn records_use_shell_literals() {
        let body = script(ExportRequest::all(ExportFormat::ScriptDump).with_collections(["Ingredient"]));
        assert!(body.contains(r#"ObjectId("65f000000000000000000202")"#));
        assert!(body.contains(r#"NumberLong("9007199254740993")"#));
        assert!(!body.contains("$oid"));
    }

    #[test]
    fn empty_collection_is_dropped_not_inserted() {
        let body = script(ExportRequest::all(ExportFormat::ScriptDump).with_collections(["Audit"]));
        assert!(body.contains("db.audits.drop();"));
        assert!(!body.contains("db.audits.insertMany"));
    }
}
