//! Crate-wide error types.

/// Top-level error surfaced to the host.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A configuration change was rejected; no state was mutated.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Resizing the flow table's bucket count failed.
    #[error("flow table resize failed: {0}")]
    Resize(#[from] ResizeError),
}

/// One variant per rejected configuration field, mirroring the validation
/// `fq_change()` performs before applying anything.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("quantum must be nonzero and at most 1 << 20 bytes, got {0}")]
    InvalidQuantum(u64),

    #[error("buckets_log must be between 1 and 18, got {0}")]
    InvalidBucketsLog(u8),

    #[error("plimit must be nonzero")]
    InvalidPlimit,
}

/// Bucket-table reallocation failure, modeling the host's allocator
/// declining to grow the table (not observable via a panic in safe Rust,
/// so it is surfaced as a `Result` instead).
#[derive(Debug, thiserror::Error)]
#[error("failed to allocate {requested} buckets")]
pub struct ResizeError {
    pub requested: usize,
}
