//! # Meal Planner Backup
//!
//! Administrative backup tooling for the meal planner database.
//!
//! This crate provides:
//! - A static registry of the application's logical collections
//! - A collection inventory over the live store
//! - Export in two formats: a shell dump script and a JSON document
//! - Backup compatibility validation by semantic version
//! - A sandboxed interpreter for administrator scripts
//!
//! ## Example
//!
//! ```rust,ignore
//! use mealplan_backup::{BackupConfig, CollectionRegistry, ExportFormat, ExportRequest, Exporter};
//!
//! let exporter = Exporter::new(store, Arc::new(CollectionRegistry::meal_planner()), BackupConfig::default());
//! let payload = exporter.generate(&ExportRequest::all(ExportFormat::ScriptDump))?;
//! std::fs::write(&payload.filename, payload.body)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod compat;
mod config;
mod error;
mod export;
mod inventory;
mod registry;
mod sandbox;
pub mod shell;
mod version;

pub use compat::{validate, CompatibilityReport, CompatibilityValidator, ForeignSchema};
pub use config::BackupConfig;
pub use error::{BackupError, BackupResult};
pub use export::{
    render_json, render_script, CollectionSnapshot, ExportBundle, ExportFormat, ExportManifest,
    ExportPayload, ExportRequest, Exporter,
};
pub use inventory::{CollectionDescriptor, CollectionInventory, CollectionSummary, DatabaseInfo};
pub use registry::{CollectionDef, CollectionRegistry};
pub use sandbox::{
    ErrorKind, SandboxConfig, ScriptExecutionResult, ScriptSandbox, DEFAULT_MAX_CALL_DEPTH,
};
pub use version::Version;
