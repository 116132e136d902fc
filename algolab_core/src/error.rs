// algolab_core/src/error.rs

//! Error taxonomy shared by the engine, the metrics calculator and the optimizer.
//!
//! An empty optimization result is not an error; see
//! [`crate::optimization::OptimizationOutcome::is_empty`].

/// Errors raised by the backtest core.
#[derive(Debug, thiserror::Error)]
pub enum AlgoError {
    /// Malformed date range, non-positive capital, out-of-range commission, broken series invariants.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No series matches the requested symbol/interval/range.
    #[error("no data found for {symbol} {interval} between {start} and {end}")]
    DataNotFound {
        symbol: String,
        interval: String,
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },

    /// The strategy decision function failed while evaluating a bar.
    #[error("strategy '{strategy}' failed at bar {bar_index}: {message}")]
    StrategyError {
        strategy: String,
        bar_index: usize,
        message: String,
    },

    /// The optimizer target declares nothing to search.
    #[error("strategy '{0}' declares no numeric parameters to optimize")]
    NoParametersFound(String),

    /// Too many grid points failed, which points at a bug in the strategy rather than bad parameters.
    #[error(
        "grid search aborted: {failed} of {evaluated} evaluated grid points failed \
         (max failure rate {threshold:.2}); first error: {first_error}"
    )]
    FailureRateExceeded {
        failed: usize,
        evaluated: usize,
        threshold: f64,
        first_error: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl AlgoError {
    /// Shorthand for [`AlgoError::InvalidInput`].
    pub fn invalid(message: impl Into<String>) -> Self {
        AlgoError::InvalidInput(message.into())
    }

    /// Bar index of a strategy failure, if this error carries one.
    pub fn bar_index(&self) -> Option<usize> {
        match self {
            AlgoError::StrategyError { bar_index, .. } => Some(*bar_index),
            _ => None,
        }
    }
}
