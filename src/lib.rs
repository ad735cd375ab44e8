// Library crate for the statboard importer
// This file exposes the public API for integration tests and embedding

pub mod identity;
pub mod importer;
pub mod metrics;
pub mod shared;
pub mod snapshot;
pub mod store;

// Re-export commonly used types for easier access in tests
pub use importer::{ImportConfig, ImportService, PassSummary, StatRef};
pub use metrics::{MetricCatalog, MetricDef, MetricSource, RankPoints};
pub use shared::ImportError;
pub use store::{ImportStore, InMemoryImportStore, PostgresImportStore};
