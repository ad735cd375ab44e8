mod canonical;
mod change;
mod normalizer;
mod scanner;

pub use canonical::{canonical_bytes, compress_payload, snapshot_digest, SnapshotDigest};
pub use change::ChangeDetector;
pub use normalizer::{normalize, StatsTree};
pub use scanner::stats_files;
