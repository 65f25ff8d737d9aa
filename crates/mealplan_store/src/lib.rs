//! # Meal Planner Store
//!
//! Document store access layer used by the backup subsystem.
//!
//! This crate provides:
//! - JSON documents with extended-JSON wrappers (`$oid`, `$date`, `$numberLong`)
//! - `ObjectId` generation
//! - Query filters and update documents
//! - The `DocumentStore` trait and an in-memory implementation with
//!   snapshot load/save

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub mod document;
mod error;
mod filter;
mod index;
mod memory;
mod object_id;
mod store;
mod update;

pub use document::Document;
pub use error::{StoreError, StoreResult};
pub use filter::{Condition, Filter};
pub use index::{Direction, IndexSpec, ID_INDEX_NAME};
pub use memory::MemoryStore;
pub use object_id::ObjectId;
pub use store::{DocumentStore, EngineInfo, FindOptions, UpdateOutcome};
pub use update::{Update, UpdateOp};
