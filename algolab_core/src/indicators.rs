// algolab_core/src/indicators.rs

//! Technical indicators over price slices, oldest value first.
//!
//! - Simple Moving Average (`sma`)
//! - Highest value over N periods (`highest`)
//! - Lowest value over N periods (`lowest`)
//!
//! All functions are pure and return `None` when the slice is shorter than the lookback.

/// Simple Moving Average of the last `n` values.
///
/// # Arguments
/// * `values` - Series, oldest first (e.g. closes).
/// * `n` - Lookback period. Must be >= 1.
///
/// # Returns
/// * `None` if `n == 0` or fewer than `n` values are available.
pub fn sma(values: &[f64], n: usize) -> Option<f64> {
    let window = window(values, n, 0)?;
    Some(window.iter().sum::<f64>() / n as f64)
}

/// Highest value over `n` values ending `shift` values before the last one.
///
/// `shift = 1` excludes the current bar, e.g. for a breakout over the prior `n` highs.
/// The slice must hold at least `n + shift` values.
pub fn highest(values: &[f64], n: usize, shift: usize) -> Option<f64> {
    window(values, n, shift)?.iter().copied().reduce(f64::max)
}

/// Lowest value over `n` values ending `shift` values before the last one.
pub fn lowest(values: &[f64], n: usize, shift: usize) -> Option<f64> {
    window(values, n, shift)?.iter().copied().reduce(f64::min)
}

fn window(values: &[f64], n: usize, shift: usize) -> Option<&[f64]> {
    if n == 0 {
        return None;
    }

    let need = n + shift;
    if values.len() < need {
        return None;
    }

    let start = values.len() - need;
    Some(&values[start..start + n])
}
