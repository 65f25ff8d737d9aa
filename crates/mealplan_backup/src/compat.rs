//! Backup compatibility validation.
//!
//! Compares the version recorded in a backup against the running
//! application and, when the backup's metadata is available, against the
//! collection registry. The result is a [`CompatibilityReport`]; nothing here
//! touches the store.
//!
//! ## Rules
//!
//! - A backup from a newer **major** release is incompatible.
//! - Anything else is compatible, possibly with warnings:
//!   pre-1.0 versions, pre-release builds, newer minor/patch releases,
//!   versions below the configured minimum, unknown collections, and
//!   fields the current schema does not declare.

use crate::config::BackupConfig;
use crate::registry::CollectionRegistry;
use crate::version::Version;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Verdict of a compatibility check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatibilityReport {
    /// Running application version.
    pub current_version: String,
    /// Version recorded in the backup.
    pub backup_version: String,
    /// Whether the backup can be restored.
    pub is_compatible: bool,
    /// Blocking problems.
    pub errors: Vec<String>,
    /// Non-blocking concerns.
    pub warnings: Vec<String>,
    /// Suggested actions.
    pub recommendations: Vec<String>,
}

/// Collection schemas listed in a foreign backup's metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForeignSchema {
    /// Collection name to field names.
    pub collections: BTreeMap<String, Vec<String>>,
}

impl ForeignSchema {
    /// Reads `metadata.statistics.<collection>.schema` from backup data.
    ///
    /// Returns `None` if the backup carries no statistics object. Entries
    /// without a `schema` array are kept with no fields.
    #[must_use]
    pub fn from_backup_data(data: &Value) -> Option<Self> {
        let stats = data.get("metadata")?.get("statistics")?.as_object()?;
        let collections = stats
            .iter()
            .map(|(name, entry)| {
                let fields = entry
                    .get("schema")
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                (name.clone(), fields)
            })
            .collect();
        Some(Self { collections })
    }
}

/// Checks backups against the running application.
#[derive(Debug, Clone)]
pub struct CompatibilityValidator {
    registry: Arc<CollectionRegistry>,
    config: BackupConfig,
}

impl CompatibilityValidator {
    /// Creates a validator.
    #[must_use]
    pub fn new(registry: Arc<CollectionRegistry>, config: BackupConfig) -> Self {
        Self { registry, config }
    }

    /// Validates `backup` against the configured application version.
    #[must_use]
    pub fn validate(&self, backup: &Version, foreign: Option<&ForeignSchema>) -> CompatibilityReport {
        validate(
            &self.config.app_version,
            backup,
            &self.config.min_supported_version,
            foreign,
            &self.registry,
        )
    }
}

/// Pure compatibility check.
#[must_use]
pub fn validate(
    current: &Version,
    backup: &Version,
    min_supported: &Version,
    foreign: Option<&ForeignSchema>,
    registry: &CollectionRegistry,
) -> CompatibilityReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut recommendations = Vec::new();

    if backup.major > current.major {
        errors.push(format!(
            "Backup version {backup} comes from a newer major release than the running application ({current}) and cannot be restored safely"
        ));
    } else if backup.major == current.major && backup > current {
        warnings.push(format!(
            "Backup version {backup} is newer than the running application ({current}); fields added in newer releases may be ignored"
        ));
    }

    if backup.is_pre_1_0() {
        warnings.push(format!(
            "Backup was created by a pre-1.0 version ({backup}); its data model may differ from the current schema"
        ));
    }
    if backup.is_prerelease() {
        warnings.push(format!("Backup version {backup} is a pre-release build"));
    }
    if backup < min_supported {
        warnings.push(format!(
            "Backup version {backup} is older than the minimum supported version {min_supported}; a data migration may be required"
        ));
    }

    if let Some(schema) = foreign {
        for (name, fields) in &schema.collections {
            match registry.get(name) {
                None => warnings.push(format!(
                    "Backup contains unknown collection '{name}', which will not be restored"
                )),
                Some(def) => {
                    let extra: Vec<&str> = fields
                        .iter()
                        .map(String::as_str)
                        .filter(|f| !def.fields.contains(f))
                        .collect();
                    if !extra.is_empty() {
                        warnings.push(format!(
                            "Collection '{name}' in backup has fields not in the current schema: {}",
                            extra.join(", ")
                        ));
                    }
                }
            }
        }
    }

    let is_compatible = errors.is_empty();

    recommendations.push("Back up your current data before restoring".to_string());
    if !warnings.is_empty() {
        recommendations.push("Run a dry-run restore against a staging database first".to_string());
    }
    if !is_compatible {
        recommendations.push(format!(
            "Upgrade the application to version {}.0.0 or later before restoring this backup",
            backup.major
        ));
    }

    CompatibilityReport {
        current_version: current.to_string(),
        backup_version: backup.to_string(),
        is_compatible,
        errors,
        warnings,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn check(current: &str, backup: &str) -> CompatibilityReport {
        validate(
            &Version::parse(current).unwrap(),
            &Version::parse(backup).unwrap(),
            &Version::new(1, 0, 0),
            None,
            &CollectionRegistry::meal_planner(),
        )
    }

    #[test]
    fn identical_versions_are_compatible() {
        let report = check("1.4.0", "1.4.0");
        assert!(report.is_compatible);
        assert!(report.errors.is_empty());
        assert!(report.warnings.is_empty());
        assert!(!report.recommendations.is_empty());
    }

    #[test]
    fn newer_major_is_incompatible() {
        let report = check("1.4.0", "2.0.0");
        assert!(!report.is_compatible);
        assert_eq!(report.errors.len(), 1);
        assert!(report.recommendations.iter().any(|r| r.contains("2.0.0")));
    }

    #[test]
    fn newer_minor_warns_but_passes() {
        let report = check("1.4.0", "1.6.2");
        assert!(report.is_compatible);
        assert!(report.warnings.iter().any(|w| w.contains("newer")));
    }

    #[test]
    fn pre_1_0_warning() {
        let report = check("1.4.0", "0.3.1");
        assert!(report.is_compatible);
        assert!(report.warnings.iter().any(|w| w.contains("pre-1.0 version")));
        assert!(report.warnings.iter().any(|w| w.contains("minimum supported")));
    }

    #[test]
    fn prerelease_warning() {
        let report = check("1.4.0", "1.4.0-rc.1");
        assert!(report.warnings.iter().any(|w| w.contains("pre-release")));
    }

    #[test]
    fn foreign_schema_warnings() {
        let data = json!({
            "metadata": {
                "statistics": {
                    "Recipe": {"schema": ["_id", "title"]},
                    "meals": {"schema": ["_id", "name", "rating"]},
                    "Store": {"schema": ["_id", "name"]}
                }
            }
        });
        let schema = ForeignSchema::from_backup_data(&data).unwrap();
        let report = validate(
            &Version::new(1, 4, 0),
            &Version::new(1, 4, 0),
            &Version::new(1, 0, 0),
            Some(&schema),
            &CollectionRegistry::meal_planner(),
        );

        assert!(report.is_compatible);
        assert!(report.warnings.iter().any(|w| w.contains("Recipe")));
        assert!(report.warnings.iter().any(|w| w.contains("rating")));
        assert!(!report.warnings.iter().any(|w| w.contains("'Store'")));
    }

    #[test]
    fn foreign_schema_requires_statistics() {
        assert!(ForeignSchema::from_backup_data(&json!({})).is_none());
        assert!(ForeignSchema::from_backup_data(&json!({"metadata": {}})).is_none());
        let schema =
            ForeignSchema::from_backup_data(&json!({"metadata": {"statistics": {"X": {}}}})).unwrap();
        assert_eq!(schema.collections["X"], Vec::<String>::new());
    }

    fn version() -> impl Strategy<Value = Version> {
        (0u64..5, 0u64..20, 0u64..20).prop_map(|(a, b, c)| Version::new(a, b, c))
    }

    proptest! {
        #[test]
        fn newer_major_never_compatible(current in version(), bump in 1u64..4, minor in 0u64..9) {
            let backup = Version::new(current.major + bump, minor, 0);
            let report = validate(&current, &backup, &Version::new(1, 0, 0), None, &CollectionRegistry::meal_planner());
            prop_assert!(!report.is_compatible);
            prop_assert!(!report.errors.is_empty());
        }

        #[test]
        fn zero_major_always_warns(current in version(), minor in 0u64..9, patch in 0u64..9) {
            let backup = Version::new(0, minor, patch);
            let report = validate(&current, &backup, &Version::new(1, 0, 0), None, &CollectionRegistry::meal_planner());
            prop_assert!(report.warnings.iter().any(|w| w.contains("pre-1.0 version")));
        }

        #[test]
        fn same_version_compatible(current in version()) {
            let report = validate(&current, &current, &Version::new(0, 0, 0), None, &CollectionRegistry::meal_planner());
            prop_assert!(report.is_compatible);
            prop_assert!(!report.recommendations.is_empty());
        }
    }
}
