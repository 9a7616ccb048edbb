//! Error types for cutils.

use thiserror::Error;

/// Errors surfaced by I/O, persistence and training loops.
///
/// Shape mismatches inside graph nodes are programming errors and panic
/// with an assertion message instead.
#[derive(Debug, Error)]
pub enum CutilsError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed data file (corpus line, MNIST row, ...).
    #[error("format error at {location}: {message}")]
    Format { location: String, message: String },

    /// Training produced a NaN or infinite cost.
    #[error("bad cost detected: {cost}")]
    BadCost { cost: f32 },

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CutilsError>;

impl CutilsError {
    pub fn format(location: impl Into<String>, message: impl Into<String>) -> Self {
        CutilsError::Format {
            location: location.into(),
            message: message.into(),
        }
    }
}

/// Returns the cost unchanged, or `BadCost` when it is NaN or infinite.
pub fn check_cost(cost: f32) -> Result<f32> {
    if cost.is_finite() {
        Ok(cost)
    } else {
        Err(CutilsError::BadCost { cost })
    }
}
