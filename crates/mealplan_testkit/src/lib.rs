//! # Meal Planner Testkit
//!
//! Shared fixtures and property-test generators.
//!
//! - [`fixtures`]: seeded stores, a store that always fails, snapshot files
//! - [`generators`]: proptest strategies for documents and versions

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

pub use fixtures::{seeded_memory_store, seeded_store, SnapshotFile, UnavailableStore};
