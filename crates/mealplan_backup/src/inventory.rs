//! Collection inventory.
//!
//! Reports live record counts and sample-derived field names for the
//! registered collections. Every call queries the store afresh; nothing is
//! cached between requests.

use crate::error::BackupResult;
use crate::registry::{CollectionDef, CollectionRegistry};
use mealplan_store::document::field_names;
use mealplan_store::{DocumentStore, EngineInfo, Filter, FindOptions};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Live description of one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDescriptor {
    /// Logical name.
    pub logical_name: String,
    /// Store collection name.
    pub collection: String,
    /// Number of records.
    pub record_count: u64,
    /// Whether any records exist.
    pub has_data: bool,
    /// Sorted field names of one representative record.
    pub sample_field_names: Vec<String>,
}

impl CollectionDescriptor {
    fn empty(name: &str) -> Self {
        Self {
            logical_name: name.to_string(),
            collection: name.to_string(),
            record_count: 0,
            has_data: false,
            sample_field_names: Vec::new(),
        }
    }
}

/// Per-collection entry of the database info report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSummary {
    /// Store collection name.
    pub collection: String,
    /// Number of records.
    pub count: u64,
    /// Whether any records exist.
    pub has_data: bool,
    /// Sorted field names of one representative record.
    pub schema: Vec<String>,
}

/// Database-wide inventory report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseInfo {
    /// Running application version.
    pub app_version: String,
    /// Summary per logical collection.
    pub collections: BTreeMap<String, CollectionSummary>,
    /// Sum of all record counts.
    pub total_documents: u64,
    /// Engine metadata.
    pub database: EngineInfo,
}

/// Reads collection statistics from the live store.
#[derive(Clone)]
pub struct CollectionInventory {
    store: Arc<dyn DocumentStore>,
    registry: Arc<CollectionRegistry>,
}

impl CollectionInventory {
    /// Creates an inventory over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, registry: Arc<CollectionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Describes one collection by logical or store name.
    ///
    /// Unknown names yield an empty descriptor without querying the store.
    pub fn describe(&self, name: &str) -> BackupResult<CollectionDescriptor> {
        match self.registry.get(name) {
            Some(def) => self.describe_def(def),
            None => {
                debug!("describe: {} is not a registered collection", name);
                Ok(CollectionDescriptor::empty(name))
            }
        }
    }

    /// Describes every registered collection, in registration order.
    pub fn describe_all(&self) -> BackupResult<Vec<CollectionDescriptor>> {
        self.registry.iter().map(|d| self.describe_def(d)).collect()
    }

    /// Builds the database info report.
    pub fn database_info(&self, app_version: &str) -> BackupResult<DatabaseInfo> {
        let descriptors = self.describe_all()?;
        let total_documents = descriptors.iter().map(|d| d.record_count).sum();
        let collections = descriptors
            .into_iter()
            .map(|d| {
                (
                    d.logical_name,
                    CollectionSummary {
                        collection: d.collection,
                        count: d.record_count,
                        has_data: d.has_data,
                        schema: d.sample_field_names,
                    },
                )
            })
            .collect();

        Ok(DatabaseInfo {
            app_version: app_version.to_string(),
            collections,
            total_documents,
            database: self.store.engine(),
        })
    }

    fn describe_def(&self, def: &CollectionDef) -> BackupResult<CollectionDescriptor> {
        let record_count = self.store.count(def.collection, &Filter::All)?;
        let sample_field_names = if record_count > 0 {
            self.store
                .find(def.collection, &Filter::All, &FindOptions::limit(1))?
                .first()
                .map(field_names)
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        Ok(CollectionDescriptor {
            logical_name: def.logical_name.to_string(),
            collection: def.collection.to_string(),
            record_count,
            has_data: record_count > 0,
            sample_field_names,
        })
    }
}
