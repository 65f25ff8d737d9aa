//! Export formatter.
//!
//! Takes a snapshot of the selected collections and renders it either as a
//! shell dump script or as a single JSON document.
//!
//! ## Formats
//!
//! | format | content type | extension |
//! |---|---|---|
//! | `mongodb` (script dump) | `application/javascript` | `.js` |
//! | `json` | `application/json` | `.json` |

mod json;
mod script;

use crate::config::BackupConfig;
use crate::error::{BackupError, BackupResult};
use crate::registry::{CollectionDef, CollectionRegistry};
use chrono::{DateTime, Utc};
use mealplan_store::{Document, DocumentStore, Filter, FindOptions, IndexSpec, ID_INDEX_NAME};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

pub use json::render_json;
pub use script::render_script;

/// Output format of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// A script for the database shell.
    ScriptDump,
    /// A single JSON document.
    JsonExport,
}

impl ExportFormat {
    /// Wire name of the format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::ScriptDump => "mongodb",
            ExportFormat::JsonExport => "json",
        }
    }

    /// MIME type of the payload.
    #[must_use]
    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::ScriptDump => "application/javascript",
            ExportFormat::JsonExport => "application/json",
        }
    }

    /// File extension of the payload, without the dot.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::ScriptDump => "js",
            ExportFormat::JsonExport => "json",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mongodb" => Ok(ExportFormat::ScriptDump),
            "json" => Ok(ExportFormat::JsonExport),
            other => Err(BackupError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// What to export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    /// Output format.
    pub format: ExportFormat,
    /// Collections to include; empty means all.
    pub collections: Vec<String>,
    /// Whether index definitions are exported.
    pub include_indexes: bool,
}

impl ExportRequest {
    /// Exports every collection without indexes.
    #[must_use]
    pub fn all(format: ExportFormat) -> Self {
        Self {
            format,
            collections: Vec::new(),
            include_indexes: false,
        }
    }

    /// Restricts the export to the given collections.
    #[must_use]
    pub fn with_collections<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.collections = names.into_iter().map(Into::into).collect();
        self
    }

    /// Sets whether index definitions are exported.
    #[must_use]
    pub fn with_indexes(mut self, include: bool) -> Self {
        self.include_indexes = include;
        self
    }
}

/// Metadata embedded in every export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportManifest {
    /// Output format.
    pub format: ExportFormat,
    /// Application name.
    pub app_name: String,
    /// Application version that produced the export.
    pub app_version: String,
    /// Target engine description.
    pub target_engine: String,
    /// Database name for restoration instructions.
    pub database_name: String,
    /// Generation time.
    pub generated_at: DateTime<Utc>,
    /// Whether index definitions are included.
    pub include_indexes: bool,
    /// Requested collections (empty means all).
    pub selected_collections: Vec<String>,
}

impl ExportManifest {
    /// Suggested attachment filename.
    #[must_use]
    pub fn filename(&self) -> String {
        format!(
            "meal-planner-backup-{}.{}",
            self.generated_at.format("%Y-%m-%dT%H-%M-%S"),
            self.format.extension()
        )
    }
}

/// Records and indexes of one collection at export time.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSnapshot {
    /// Collection definition.
    pub def: CollectionDef,
    /// Records in store order.
    pub records: Vec<Document>,
    /// Index definitions (empty unless indexes were requested).
    pub indexes: Vec<IndexSpec>,
}

impl CollectionSnapshot {
    /// Number of records.
    #[must_use]
    pub fn count(&self) -> usize {
        self.records.len()
    }

    /// Indexes other than the implicit `_id_` index.
    pub fn secondary_indexes(&self) -> impl Iterator<Item = &IndexSpec> {
        self.indexes.iter().filter(|i| i.name != ID_INDEX_NAME)
    }
}

/// A complete export before rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportBundle {
    /// Export metadata.
    pub manifest: ExportManifest,
    /// Snapshots in registry order.
    pub collections: Vec<CollectionSnapshot>,
}

impl ExportBundle {
    /// Total number of records across collections.
    #[must_use]
    pub fn total_records(&self) -> usize {
        self.collections.iter().map(CollectionSnapshot::count).sum()
    }
}

/// A rendered export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPayload {
    /// Rendered text.
    pub body: String,
    /// MIME type.
    pub content_type: &'static str,
    /// Suggested attachment filename.
    pub filename: String,
}

/// Builds exports from the live store.
#[derive(Clone)]
pub struct Exporter {
    store: Arc<dyn DocumentStore>,
    registry: Arc<CollectionRegistry>,
    config: BackupConfig,
}

impl Exporter {
    /// Creates an exporter.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        registry: Arc<CollectionRegistry>,
        config: BackupConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    /// Reads the selected collections into a bundle.
    pub fn snapshot(&self, request: &ExportRequest) -> BackupResult<ExportBundle> {
        let manifest = ExportManifest {
            format: request.format,
            app_name: self.config.app_name.clone(),
            app_version: self.config.app_version.to_string(),
            target_engine: self.config.target_engine.clone(),
            database_name: self.config.database_name.clone(),
            generated_at: Utc::now(),
            include_indexes: request.include_indexes,
            selected_collections: request.collections.clone(),
        };

        let mut collections = Vec::new();
        for def in self.registry.select(&request.collections) {
            let records = self
                .store
                .find(def.collection, &Filter::All, &FindOptions::default())?;
            let indexes = if request.include_indexes {
                self.store.indexes(def.collection)?
            } else {
                Vec::new()
            };
            collections.push(CollectionSnapshot {
                def: def.clone(),
                records,
                indexes,
            });
        }

        Ok(ExportBundle {
            manifest,
            collections,
        })
    }

    /// Snapshots and renders an export.
    pub fn generate(&self, request: &ExportRequest) -> BackupResult<ExportPayload> {
        let bundle = self.snapshot(request)?;
        let body = match request.format {
            ExportFormat::ScriptDump => render_script(&bundle),
            ExportFormat::JsonExport => render_json(&bundle)?,
        };
        info!(
            "generated {} export: {} collections, {} records",
            request.format,
            bundle.collections.len(),
            bundle.total_records()
        );
        Ok(ExportPayload {
            body,
            content_type: request.format.content_type(),
            filename: bundle.manifest.filename(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mealplan_testkit::fixtures::{seeded_store, UnavailableStore};

    fn exporter(store: Arc<dyn DocumentStore>) -> Exporter {
        Exporter::new(
            store,
            Arc::new(CollectionRegistry::meal_planner()),
            BackupConfig::default(),
        )
    }

    #[test]
    fn format_parsing() {
        assert_eq!("mongodb".parse::<ExportFormat>().unwrap(), ExportFormat::ScriptDump);
        assert_eq!("json".parse::<ExportFormat>().unwrap(), ExportFormat::JsonExport);
        assert!(matches!(
            "xml".parse::<ExportFormat>(),
            Err(BackupError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn payload_metadata() {
        let exp = exporter(seeded_store());
        let script = exp.generate(&ExportRequest::all(ExportFormat::ScriptDump)).unwrap();
        assert_eq!(script.content_type, "application/javascript");
        assert!(script.filename.ends_with(".js"));

        let json = exp.generate(&ExportRequest::all(ExportFormat::JsonExport)).unwrap();
        assert_eq!(json.content_type, "application/json");
        assert!(json.filename.ends_with(".json"));
    }

    #[test]
    fn snapshot_selection() {
        let exp = exporter(seeded_store());
        let all = exp.snapshot(&ExportRequest::all(ExportFormat::JsonExport)).unwrap();
        assert_eq!(all.collections.len(), CollectionRegistry::meal_planner().len());

        let some = exp
            .snapshot(&ExportRequest::all(ExportFormat::JsonExport).with_collections(["Meal", "Nope"]))
            .unwrap();
        assert_eq!(some.collections.len(), 1);
        assert_eq!(some.collections[0].def.logical_name, "Meal");
        assert_eq!(some.collections[0].count(), 3);
        assert!(some.collections[0].indexes.is_empty());
    }

    #[test]
    fn snapshot_with_indexes() {
        let exp = exporter(seeded_store());
        let bundle = exp
            .snapshot(&ExportRequest::all(ExportFormat::ScriptDump).with_collections(["User"]).with_indexes(true))
            .unwrap();
        let users = &bundle.collections[0];
        assert_eq!(users.indexes.len(), 2);
        assert_eq!(users.secondary_indexes().count(), 1);
    }

    #[test]
    fn store_failure_propagates() {
        let exp = exporter(Arc::new(UnavailableStore));
        let err = exp.generate(&ExportRequest::all(ExportFormat::JsonExport)).unwrap_err();
        assert!(matches!(err, BackupError::Store(_)));
    }
}
