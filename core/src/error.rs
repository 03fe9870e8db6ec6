//! Error type shared by the filter engine and its I/O helpers.

use thiserror::Error;

/// Failures surfaced by construction, [`step`](crate::kalman::ExtendedKalmanFilter::step)
/// and the data-ingestion layer.
#[derive(Debug, Error)]
pub enum KafiError {
    /// A runtime-sized input disagrees with the compile-time dimensions `N` or `M`.
    #[error("shape mismatch in {what}: expected {expected}, found {found}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    /// New data was flagged but the producer already dropped the observation storage.
    #[error("observation flagged as new data but its storage has already been dropped")]
    ObservationExpired,
    /// `H P Hᵀ + R` is singular or ill-conditioned; the update for this step was skipped.
    #[error("innovation covariance is singular or ill-conditioned")]
    SingularInnovation,
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
