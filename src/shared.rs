use thiserror::Error;

/// Crate-wide error type. Fatal variants carry distinct process exit codes so
/// external schedulers can tell outcomes apart.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("stats directory not found: {0}")]
    StatsDirNotFound(String),

    #[error("no enabled metrics configured")]
    NoMetricsConfigured,

    #[error("could not acquire run lock '{name}' within {timeout_secs}s")]
    LockUnavailable { name: String, timeout_secs: u64 },

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ImportError {
    /// Stable exit-code contract: 2 = missing stats directory, 3 = no enabled
    /// metrics, 10 = run lock not acquired, 1 = everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            ImportError::StatsDirNotFound(_) => 2,
            ImportError::NoMetricsConfigured => 3,
            ImportError::LockUnavailable { .. } => 10,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_per_outcome() {
        assert_eq!(ImportError::StatsDirNotFound("x".into()).exit_code(), 2);
        assert_eq!(ImportError::NoMetricsConfigured.exit_code(), 3);
        assert_eq!(
            ImportError::LockUnavailable {
                name: "lock".into(),
                timeout_secs: 5
            }
            .exit_code(),
            10
        );
        assert_eq!(ImportError::DatabaseError("boom".into()).exit_code(), 1);
    }
}
