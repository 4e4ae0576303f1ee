//! Store errors

/// Job store failure
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No record for the given job id
    #[error("job not found")]
    NotFound,

    /// Underlying storage I/O failed; callers may retry a bounded number of
    /// times before escalating
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] std::io::Error),

    /// Stored bytes exist but cannot be trusted (bad JSON, digest mismatch,
    /// unknown schema version)
    #[error("stored data corrupt: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether a retry of the same call can reasonably succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }
}
