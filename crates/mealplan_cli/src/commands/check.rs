//! Check command implementation.

use super::CommandResult;
use mealplan_backup::{
    BackupConfig, CollectionRegistry, CompatibilityReport, CompatibilityValidator, ForeignSchema,
    Version,
};
use std::fmt::Write;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Checks `backup_version`, optionally against a backup file's metadata.
pub fn run(backup_version: &str, metadata: Option<&Path>) -> CommandResult {
    let backup = Version::parse(backup_version)?;
    let foreign = match metadata {
        Some(path) => {
            let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(path)?)?;
            ForeignSchema::from_backup_data(&value)
        }
        None => None,
    };

    let validator = CompatibilityValidator::new(
        Arc::new(CollectionRegistry::meal_planner()),
        BackupConfig::default(),
    );
    let report = validator.validate(&backup, foreign.as_ref());
    print!("{}", render(&report)?);

    if report.is_compatible {
        Ok(())
    } else {
        Err("backup is not compatible".into())
    }
}

/// Renders a report for the terminal.
pub fn render(report: &CompatibilityReport) -> CommandResult<String> {
    let mut out = String::new();
    if report.is_compatible {
        writeln!(out, "✓ Backup {} is compatible", report.backup_version)?;
    } else {
        writeln!(out, "✗ Backup {} is not compatible", report.backup_version)?;
    }
    writeln!(out, "  Current version: {}", report.current_version)?;
    for (label, items) in [
        ("Errors", &report.errors),
        ("Warnings", &report.warnings),
        ("Recommendations", &report.recommendations),
    ] {
        if items.is_empty() {
            continue;
        }
        writeln!(out, "{label}:")?;
        for item in items {
            writeln!(out, "  - {item}")?;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_sections() {
        let validator = CompatibilityValidator::new(
            Arc::new(CollectionRegistry::meal_planner()),
            BackupConfig::default(),
        );
        let report = validator.validate(&Version::new(0, 5, 0), None);
        let text = render(&report).unwrap();
        assert!(text.contains("Warnings:"));
        assert!(text.contains("pre-1.0 version"));
        assert!(text.contains("Recommendations:"));
    }

    #[test]
    fn incompatible_backup_fails() {
        assert!(run("99.0.0", None).is_err());
        assert!(run("not-a-version", None).is_err());
    }

    #[test]
    fn reads_metadata_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.json");
        fs::write(
            &path,
            r#"{"metadata": {"statistics": {"Meal": {"schema": ["name"]}}}}"#,
        )
        .unwrap();
        let current = BackupConfig::default().app_version.to_string();
        run(&current, Some(&path)).unwrap();
    }
}
