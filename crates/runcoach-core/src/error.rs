//! Error types for core exposure logic.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// Bad coordinates, ids or parameters. Raised before any I/O.
    #[error("validation error: {0}")]
    Validation(String),
    /// No usable samples; a score would be fabricated.
    #[error("insufficient data for route {route_id}: 0 of {samples_total} samples available")]
    InsufficientData {
        route_id: String,
        samples_total: usize,
    },
}
