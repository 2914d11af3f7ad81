use thiserror::Error;

/// Error taxonomy for the crate: user errors, programmer errors,
/// and environment errors. Internal conditions -- probe collisions, full
/// tables, contention, observing IN_PROGRESS/RESIZING -- are never surfaced;
/// they are retried or migrated away internally.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum MapError {
    /// Indexing read/write of a key the map does not contain.
    #[error("key not found")]
    KeyNotFound,

    /// Capacity <= 0 or load factor outside `(0, 1]`.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// `DenseMap` construction on a target without 128-bit SIMD equality
    /// and move-mask support.
    #[error("target does not support the 128-bit SIMD operations DenseMap requires")]
    HardwareUnsupported,
}

pub type Result<T> = std::result::Result<T, MapError>;
