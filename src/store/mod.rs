mod batch;
mod memory;
mod models;
mod postgres;
mod repository;

pub use batch::{BatchWriter, Buffer, FlushThresholds};
pub use memory::InMemoryImportStore;
pub use models::{
    AwardRow, CleanupCounts, MetricValueRow, ProfileColumns, ProfileRow, StatsRow,
};
pub use postgres::PostgresImportStore;
pub use repository::ImportStore;
