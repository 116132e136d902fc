// algolab_core/src/optimization.rs

//! Grid search over strategy parameters.
//!
//! The grid is derived from a strategy's declared defaults and optional min/max/step ranges.
//! Every combination runs as an independent simulation over the same immutable series, on a
//! rayon pool; results are joined in grid order, filtered and ranked by total return.

use itertools::Itertools;
use rayon::prelude::*;

use crate::backtest;
use crate::data_handler;
use crate::error::AlgoError;
use crate::performance;
use crate::strategy::{ParamValue, ParameterSet, StrategyDescriptor};

/// Upper bound on candidate values per dimension.
const MAX_VALUES_PER_DIMENSION: usize = 100_000;

/// Message reported when no grid point survives the filters.
pub const EMPTY_RESULT_MESSAGE: &str =
    "No results found that meet the specified criteria. Try relaxing your filter conditions.";

/// User-supplied bounds of one parameter. Missing fields fall back to defaults derived from the
/// strategy's declared value.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamRange {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub step: Option<f64>,
}

impl ParamRange {
    pub fn new(min: f64, max: f64, step: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
            step: Some(step),
        }
    }
}

/// Candidate values of one parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct GridDimension {
    name: String,
    min: ParamValue,
    max: ParamValue,
    step: ParamValue,
    values: Vec<ParamValue>,
}

impl GridDimension {
    /// Integer dimension over `[min, max]`. Both bounds are always candidates.
    ///
    /// # Returns
    /// * `InvalidInput` for `min > max`, a non-positive step, or a span too wide to enumerate.
    pub fn integer(name: &str, min: i64, max: i64, step: i64) -> Result<Self, AlgoError> {
        if min > max {
            return Err(AlgoError::invalid(format!(
                "parameter '{}': min {} is greater than max {}",
                name, min, max
            )));
        }

        let values: Vec<i64> = if min == max {
            vec![min]
        } else {
            if step <= 0 {
                return Err(AlgoError::invalid(format!(
                    "parameter '{}': step must be a positive integer, got {}",
                    name, step
                )));
            }
            let span = max.checked_sub(min).ok_or_else(|| {
                AlgoError::invalid(format!(
                    "parameter '{}': range {} to {} is too wide",
                    name, min, max
                ))
            })?;
            check_count(name, (span / step) as f64)?;

            let mut values: Vec<i64> = (min..=max).step_by(step as usize).collect();
            if values.last() != Some(&max) {
                values.push(max);
            }
            values
        };

        Ok(Self {
            name: name.to_string(),
            min: ParamValue::Int(min),
            max: ParamValue::Int(max),
            step: ParamValue::Int(step),
            values: values.into_iter().map(ParamValue::Int).collect(),
        })
    }

    /// Real dimension over `[min, max]`, enumerated as `min + k * step`.
    /// Values within a tiny tolerance of `max` snap to it, and `max` is appended when it is off the lattice.
    pub fn real(name: &str, min: f64, max: f64, step: f64) -> Result<Self, AlgoError> {
        if !min.is_finite() || !max.is_finite() {
            return Err(AlgoError::invalid(format!(
                "parameter '{}': bounds must be finite, got {} and {}",
                name, min, max
            )));
        }
        if min > max {
            return Err(AlgoError::invalid(format!(
                "parameter '{}': min {} is greater than max {}",
                name, min, max
            )));
        }

        let values = if min == max {
            vec![min]
        } else {
            if !step.is_finite() || step <= 0.0 {
                return Err(AlgoError::invalid(format!(
                    "parameter '{}': step must be positive, got {}",
                    name, step
                )));
            }
            check_count(name, (max - min) / step)?;

            let tolerance = step * 1e-9;
            let mut values = Vec::new();
            let mut k = 0u64;
            loop {
                let value = min + k as f64 * step;
                if value > max + tolerance {
                    break;
                }
                values.push(if (value - max).abs() <= tolerance { max } else { value });
                k += 1;
            }
            if values.last().is_some_and(|last| max - last > tolerance) {
                values.push(max);
            }
            values
        };

        Ok(Self {
            name: name.to_string(),
            min: ParamValue::Real(min),
            max: ParamValue::Real(max),
            step: ParamValue::Real(step),
            values: values.into_iter().map(ParamValue::Real).collect(),
        })
    }

    /// Resolves the dimension of a declared parameter.
    ///
    /// Without a range: integer default `d` spans `d / 4 ..= d * 4` with step `max(1, span / 10)`;
    /// a real default spans `d / 4 ..= d * 4` with step `span / 10`. Supplied fields override.
    pub fn from_default(name: &str, default: ParamValue, range: Option<&ParamRange>) -> Result<Self, AlgoError> {
        let range = range.copied().unwrap_or_default();

        match default {
            ParamValue::Int(d) => {
                let (low, high) = ordered(d / 4, d.saturating_mul(4));
                let min = range.min.map(|v| integer_bound(name, "min", v)).transpose()?.unwrap_or(low);
                let max = range.max.map(|v| integer_bound(name, "max", v)).transpose()?.unwrap_or(high);
                let step = match range.step {
                    Some(v) => integer_bound(name, "step", v)?,
                    None => (max.saturating_sub(min) / 10).max(1),
                };
                Self::integer(name, min, max, step)
            }
            ParamValue::Real(d) => {
                let (low, high) = ordered(d / 4.0, d * 4.0);
                let min = range.min.unwrap_or(low);
                let max = range.max.unwrap_or(high);
                let step = range.step.unwrap_or((max - min) / 10.0);
                Self::real(name, min, max, step)
            }
        }
    }

    /// `name: min to max, step s`
    pub fn describe(&self) -> String {
        format!("{}: {} to {}, step {}", self.name, self.min, self.max, self.step)
    }

    /// --- Getters ---
    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn get_values(&self) -> &[ParamValue] {
        &self.values
    }

    pub fn get_min(&self) -> ParamValue {
        self.min
    }

    pub fn get_max(&self) -> ParamValue {
        self.max
    }

    pub fn get_step(&self) -> ParamValue {
        self.step
    }
}

fn ordered<T: PartialOrd>(a: T, b: T) -> (T, T) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Truncates a range field of an integer parameter, rejecting values `i64` cannot hold.
fn integer_bound(name: &str, field: &str, value: f64) -> Result<i64, AlgoError> {
    let truncated = value.trunc();
    // 2^63 is exactly representable; i64::MAX as f64 rounds up to it.
    if !truncated.is_finite() || truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
        return Err(AlgoError::invalid(format!(
            "parameter '{}': {} {} is outside the integer range",
            name, field, value
        )));
    }
    Ok(truncated as i64)
}

fn check_count(name: &str, steps: f64) -> Result<(), AlgoError> {
    if steps + 1.0 > MAX_VALUES_PER_DIMENSION as f64 {
        return Err(AlgoError::invalid(format!(
            "parameter '{}': range yields more than {} values; increase the step",
            name, MAX_VALUES_PER_DIMENSION
        )));
    }
    Ok(())
}

/// Ordered parameter dimensions. The first dimension varies slowest.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParameterGrid {
    dimensions: Vec<GridDimension>,
}

impl ParameterGrid {
    pub fn new() -> Self {
        Self { dimensions: Vec::new() }
    }

    pub fn with_dimension(mut self, dimension: GridDimension) -> Self {
        self.dimensions.push(dimension);
        self
    }

    /// Builds the grid of every declared parameter of a strategy.
    ///
    /// # Arguments
    /// * `strategy` - Strategy name, used in errors.
    /// * `defaults` - Declared defaults; they fix dimension order and numeric kind.
    /// * `ranges` - Optional per-parameter ranges.
    ///
    /// # Returns
    /// * `NoParametersFound` when `defaults` is empty, `InvalidInput` for ranges naming unknown
    ///   parameters or describing an empty or unbounded interval.
    pub fn from_defaults(
        strategy: &str,
        defaults: &ParameterSet,
        ranges: &std::collections::HashMap<String, ParamRange>,
    ) -> Result<Self, AlgoError> {
        if defaults.is_empty() {
            return Err(AlgoError::NoParametersFound(strategy.to_string()));
        }

        if let Some(unknown) = ranges.keys().sorted().find(|name| defaults.get(name).is_none()) {
            return Err(AlgoError::invalid(format!(
                "range given for unknown parameter '{}' of strategy '{}'; declared parameters: [{}]",
                unknown,
                strategy,
                defaults.names().join(", ")
            )));
        }

        let mut grid = ParameterGrid::new();
        for (name, default) in defaults.iter() {
            grid = grid.with_dimension(GridDimension::from_default(name, *default, ranges.get(name))?);
        }

        Ok(grid)
    }

    /// Generates all possible combinations of parameters.
    /// Returns a vector of ParameterSet objects in grid order.
    pub fn generate_all_combinations_vec(&self) -> Vec<ParameterSet> {
        if self.dimensions.is_empty() {
            return Vec::new();
        }

        self.dimensions
            .iter()
            .map(|dimension| dimension.values.iter().copied())
            .multi_cartesian_product()
            .map(|values| {
                self.dimensions
                    .iter()
                    .zip(values)
                    .map(|(dimension, value)| (dimension.name.clone(), value))
                    .collect()
            })
            .collect()
    }

    /// Calculates the total number of parameter combinations to test.
    pub fn calculate_total_combinations(&self) -> usize {
        if self.dimensions.is_empty() {
            return 0;
        }
        self.dimensions.iter().map(|d| d.values.len()).product()
    }

    pub fn get_dimensions(&self) -> &[GridDimension] {
        &self.dimensions
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }
}

/// `result[metric] >= threshold`. An undefined metric never satisfies a condition.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterCondition {
    pub metric: performance::Metric,
    pub threshold: f64,
}

impl FilterCondition {
    pub fn new(metric: performance::Metric, threshold: f64) -> Self {
        Self { metric, threshold }
    }

    pub fn is_satisfied(&self, metrics: &performance::PerformanceMetrics) -> bool {
        metrics
            .metric_value(self.metric)
            .is_some_and(|value| value >= self.threshold)
    }
}

impl std::fmt::Display for FilterCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} >= {}", self.metric, self.threshold)
    }
}

/// One grid point that passed every filter.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationResult {
    grid_index: usize,
    parameters: ParameterSet,
    return_pct: f64,
    sharpe_ratio: Option<f64>,
    /// Negative of the drawdown magnitude.
    max_drawdown_pct: f64,
    win_rate_pct: f64,
    trades_count: usize,
    exposure_time_pct: f64,
}

impl OptimizationResult {
    pub fn from_metrics(
        grid_index: usize,
        parameters: ParameterSet,
        metrics: &performance::PerformanceMetrics,
    ) -> Self {
        Self {
            grid_index,
            parameters,
            return_pct: metrics.get_return_pct(),
            sharpe_ratio: metrics.get_sharpe_ratio(),
            max_drawdown_pct: -metrics.get_max_drawdown_pct(),
            win_rate_pct: metrics.get_win_rate_pct(),
            trades_count: metrics.get_trades_count(),
            exposure_time_pct: metrics.get_exposure_time_pct(),
        }
    }

    /// --- Getters ---
    pub fn get_grid_index(&self) -> usize {
        self.grid_index
    }

    pub fn get_parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    pub fn get_return_pct(&self) -> f64 {
        self.return_pct
    }

    pub fn get_sharpe_ratio(&self) -> Option<f64> {
        self.sharpe_ratio
    }

    pub fn get_max_drawdown_pct(&self) -> f64 {
        self.max_drawdown_pct
    }

    pub fn get_win_rate_pct(&self) -> f64 {
        self.win_rate_pct
    }

    pub fn get_trades_count(&self) -> usize {
        self.trades_count
    }

    pub fn get_exposure_time_pct(&self) -> f64 {
        self.exposure_time_pct
    }
}

/// A grid point whose simulation failed.
#[derive(Debug, Clone, PartialEq)]
pub struct GridFailure {
    pub grid_index: usize,
    pub parameters: ParameterSet,
    pub error: String,
    pub bar_index: Option<usize>,
}

/// Everything a grid search produced.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OptimizationOutcome {
    /// Surviving rows, best return first.
    pub results: Vec<OptimizationResult>,
    /// Failed grid points, in grid order.
    pub failures: Vec<GridFailure>,
    /// Grid points that ran, failed or not.
    pub evaluated: usize,
    pub total: usize,
    /// Successful grid points rejected by a filter.
    pub filtered_out: usize,
    pub cancelled: bool,
}

impl OptimizationOutcome {
    /// No grid point survived. A normal outcome, not an error.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Explanation for an empty result set.
    pub fn message(&self) -> Option<&'static str> {
        if self.is_empty() {
            Some(EMPTY_RESULT_MESSAGE)
        } else {
            None
        }
    }

    pub fn top(&self, n: usize) -> &[OptimizationResult] {
        &self.results[..n.min(self.results.len())]
    }

    pub fn best(&self) -> Option<&OptimizationResult> {
        self.results.first()
    }
}

/// Cooperative cancellation flag shared with a running search.
/// Points already evaluated are kept; the rest are skipped.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(std::sync::atomic::Ordering::SeqCst)
    }
}

enum Evaluation {
    Skipped,
    Done(usize, ParameterSet, performance::PerformanceMetrics),
    Failed(GridFailure),
}

// --- GRID SEARCH OPTIMIZER ---

/// A simple, exhaustive optimizer that tests every combination of parameters.
#[derive(Debug, Clone)]
pub struct GridSearchOptimizer {
    grid: ParameterGrid,
    filters: Vec<FilterCondition>,
    threads: usize,
    max_failure_rate: f64,
}

impl GridSearchOptimizer {
    pub fn new(grid: ParameterGrid) -> Self {
        Self {
            grid,
            filters: Vec::new(),
            threads: num_cpus::get(),
            max_failure_rate: 0.5,
        }
    }

    pub fn with_filters(mut self, filters: Vec<FilterCondition>) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Share of the grid allowed to fail before the search aborts, in `(0, 1]`.
    pub fn with_max_failure_rate(mut self, rate: f64) -> Self {
        self.max_failure_rate = rate;
        self
    }

    pub fn get_grid(&self) -> &ParameterGrid {
        &self.grid
    }

    pub fn get_filters(&self) -> &[FilterCondition] {
        &self.filters
    }

    pub fn get_threads(&self) -> usize {
        self.threads
    }

    pub fn calculate_total_combinations(&self) -> usize {
        self.grid.calculate_total_combinations()
    }

    /// Runs `descriptor` over every grid point of `series`.
    ///
    /// Input errors (config, series, empty grid) are raised before any simulation starts.
    ///
    /// # Arguments
    /// * `series` - Shared, read-only input of every simulation.
    /// * `descriptor` - Builds a fresh strategy instance per grid point.
    /// * `config` - Account and execution settings applied to every point.
    /// * `metrics_config` - Annualization settings.
    /// * `cancel` - Checked before each grid point.
    ///
    /// # Returns
    /// * The filtered and ranked outcome.
    pub fn optimize(
        &self,
        series: &data_handler::PriceSeries,
        descriptor: &StrategyDescriptor,
        config: backtest::BacktestConfig,
        metrics_config: performance::MetricsConfig,
        cancel: &CancellationToken,
    ) -> Result<OptimizationOutcome, AlgoError> {
        config.validate()?;
        if series.is_empty() {
            return Err(AlgoError::invalid(format!(
                "price series {} {} is empty",
                series.get_symbol(),
                series.get_interval()
            )));
        }
        series.validate()?;
        if self.grid.is_empty() {
            return Err(AlgoError::NoParametersFound(descriptor.get_name().to_string()));
        }

        let engine = backtest::Backtest::new(series, config).with_metrics_config(metrics_config);

        self.run_optimization(
            |params| {
                let mut instance = descriptor.build(params)?;
                engine.run(instance.as_mut()).map(|report| report.metrics)
            },
            cancel,
        )
    }

    /// Runs the grid search optimization.
    /// Evaluates each parameter set in parallel using the provided fitness function.
    ///
    /// # Arguments
    /// * `fitness_function` - Runs one simulation for a parameter set.
    /// * `cancel` - Checked before each grid point.
    ///
    /// # Returns
    /// * The filtered and ranked outcome, or `FailureRateExceeded` once failures exceed
    ///   `max_failure_rate` of the grid.
    pub fn run_optimization<F>(
        &self,
        fitness_function: F,
        cancel: &CancellationToken,
    ) -> Result<OptimizationOutcome, AlgoError>
    where
        F: Fn(&ParameterSet) -> Result<performance::PerformanceMetrics, AlgoError> + Send + Sync,
    {
        if !(self.max_failure_rate > 0.0 && self.max_failure_rate <= 1.0) {
            return Err(AlgoError::invalid(format!(
                "max failure rate must be in (0, 1], got {}",
                self.max_failure_rate
            )));
        }

        // Materialize the grid so rayon can index it and results come back in grid order.
        let combinations = self.grid.generate_all_combinations_vec();
        let total = combinations.len();
        let allowed_failures = (self.max_failure_rate * total as f64).floor() as usize;

        let counter = std::sync::atomic::AtomicUsize::new(0);
        let failure_count = std::sync::atomic::AtomicUsize::new(0);
        let aborted = std::sync::atomic::AtomicBool::new(false);

        tracing::info!(total, threads = self.threads, "grid search started");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
            .map_err(|e| AlgoError::invalid(format!("cannot create thread pool: {}", e)))?;

        let evaluations: Vec<Evaluation> = pool.install(|| {
            combinations
                .into_par_iter()
                .enumerate()
                .map(|(grid_index, params)| {
                    // Stop picking up new points once cancelled or past the failure threshold.
                    if cancel.is_cancelled() || aborted.load(std::sync::atomic::Ordering::Relaxed) {
                        return Evaluation::Skipped;
                    }

                    let current_count = counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
                    tracing::info!("# {} from {} {}", current_count, total, params.format_for_display());
                    let start_time = std::time::Instant::now();

                    match fitness_function(&params) {
                        Ok(metrics) => {
                            tracing::info!(
                                "# {} from {} is done in {:.3} seconds",
                                current_count,
                                total,
                                start_time.elapsed().as_secs_f64()
                            );
                            Evaluation::Done(grid_index, params, metrics)
                        }
                        Err(e) => {
                            tracing::warn!(
                                grid_index,
                                params = %params.format_for_display(),
                                error = %e,
                                "grid point failed"
                            );
                            let failed = failure_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
                            if failed > allowed_failures {
                                aborted.store(true, std::sync::atomic::Ordering::Relaxed);
                            }
                            Evaluation::Failed(GridFailure {
                                grid_index,
                                bar_index: e.bar_index(),
                                parameters: params,
                                error: e.to_string(),
                            })
                        }
                    }
                })
                .collect()
        });

        // Sequential pass over the joined results: count, record failures, apply the filters.
        let mut outcome = OptimizationOutcome {
            total,
            cancelled: cancel.is_cancelled(),
            ..OptimizationOutcome::default()
        };

        for evaluation in evaluations {
            match evaluation {
                Evaluation::Skipped => {}
                Evaluation::Failed(failure) => {
                    outcome.evaluated += 1;
                    outcome.failures.push(failure);
                }
                Evaluation::Done(grid_index, params, metrics) => {
                    outcome.evaluated += 1;
                    if self.filters.iter().all(|filter| filter.is_satisfied(&metrics)) {
                        outcome
                            .results
                            .push(OptimizationResult::from_metrics(grid_index, params, &metrics));
                    } else {
                        outcome.filtered_out += 1;
                    }
                }
            }
        }

        // Systemic failure wins over partial results.
        if aborted.load(std::sync::atomic::Ordering::Relaxed) {
            let first_error = outcome
                .failures
                .first()
                .map(|f| format!("{} (parameters {})", f.error, f.parameters.format_for_display()))
                .unwrap_or_default();
            return Err(AlgoError::FailureRateExceeded {
                failed: outcome.failures.len(),
                evaluated: outcome.evaluated,
                threshold: self.max_failure_rate,
                first_error,
            });
        }

        outcome.results.sort_by(|a, b| compare_return_desc(a.return_pct, b.return_pct));

        tracing::info!(
            evaluated = outcome.evaluated,
            passed = outcome.results.len(),
            filtered_out = outcome.filtered_out,
            failed = outcome.failures.len(),
            cancelled = outcome.cancelled,
            "grid search finished"
        );

        Ok(outcome)
    }
}

/// Descending by return, NaN last.
fn compare_return_desc(a: f64, b: f64) -> std::cmp::Ordering {
    match (a.is_nan(), b.is_nan()) {
        (false, false) => b.total_cmp(&a),
        (true, false) => std::cmp::Ordering::Greater,
        (false, true) => std::cmp::Ordering::Less,
        (true, true) => std::cmp::Ordering::Equal,
    }
}

/// Exhaustive search with default threads and failure threshold.
///
/// # Returns
/// * Rows that satisfy every filter, sorted by total return descending; an empty outcome is not an error.
pub fn optimize(
    series: &data_handler::PriceSeries,
    descriptor: &StrategyDescriptor,
    grid: ParameterGrid,
    config: backtest::BacktestConfig,
    filters: Vec<FilterCondition>,
) -> Result<OptimizationOutcome, AlgoError> {
    GridSearchOptimizer::new(grid)
        .with_filters(filters)
        .optimize(
            series,
            descriptor,
            config,
            performance::MetricsConfig::default(),
            &CancellationToken::new(),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn values_f64(dimension: &GridDimension) -> Vec<f64> {
        dimension.get_values().iter().map(|v| v.as_f64()).collect()
    }

    fn metrics_with_return(return_pct: f64) -> performance::PerformanceMetrics {
        let start = chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap();
        let point = |day: i64, equity: f64| crate::portfolio::EquityPoint {
            datetime: start + chrono::Duration::days(day),
            cash: equity,
            position: 0.0,
            position_value: 0.0,
            equity,
            drawdown_pct: 0.0,
        };
        let curve = vec![point(0, 100.0), point(1, 100.0 + return_pct)];
        performance::compute(&curve, &[], 100.0, 0.0, &performance::MetricsConfig::default())
    }

    fn single_dimension_grid(n: i64) -> ParameterGrid {
        ParameterGrid::new().with_dimension(GridDimension::integer("x", 1, n, 1).unwrap())
    }

    #[test]
    fn integer_grid_includes_off_lattice_max() {
        let dimension = GridDimension::integer("window", 5, 80, 7).unwrap();
        let values = values_f64(&dimension);
        assert_eq!(values.first(), Some(&5.0));
        assert_eq!(values.last(), Some(&80.0));
        assert_eq!(values[values.len() - 2], 75.0);
    }

    #[test]
    fn real_grid_is_inclusive_without_drift() {
        let dimension = GridDimension::real("buffer", 0.1, 0.5, 0.1).unwrap();
        let values = values_f64(&dimension);
        assert_eq!(values.len(), 5);
        assert_eq!(values.last(), Some(&0.5));

        let dimension = GridDimension::real("buffer", 0.0, 1.0, 0.3).unwrap();
        assert_eq!(values_f64(&dimension).last(), Some(&1.0));
        assert_eq!(dimension.get_values().len(), 5);
    }

    #[test]
    fn default_ranges_follow_declared_value() {
        let dimension = GridDimension::from_default("window", ParamValue::Int(20), None).unwrap();
        assert_eq!(dimension.get_min(), ParamValue::Int(5));
        assert_eq!(dimension.get_max(), ParamValue::Int(80));
        assert_eq!(dimension.get_step(), ParamValue::Int(7));
        assert_eq!(dimension.describe(), "window: 5 to 80, step 7");

        let partial = ParamRange {
            min: Some(10.0),
            ..ParamRange::default()
        };
        let dimension = GridDimension::from_default("window", ParamValue::Int(20), Some(&partial)).unwrap();
        assert_eq!(dimension.get_min(), ParamValue::Int(10));
        assert_eq!(dimension.get_step(), ParamValue::Int(7));

        let dimension = GridDimension::from_default("buffer", ParamValue::Real(0.0), None).unwrap();
        assert_eq!(dimension.get_values(), &[ParamValue::Real(0.0)]);
    }

    #[test]
    fn rejects_bad_ranges() {
        assert!(GridDimension::integer("x", 10, 5, 1).is_err());
        assert!(GridDimension::integer("x", 1, 5, 0).is_err());
        assert!(GridDimension::real("x", 0.0, 1.0, -0.1).is_err());
        assert!(GridDimension::real("x", 0.0, 1.0, 1e-9).is_err());
    }

    #[test]
    fn integer_ranges_beyond_i64_are_invalid_input() {
        let huge_min = ParamRange::new(-1e30, 80.0, 7.0);
        let err = GridDimension::from_default("w", ParamValue::Int(20), Some(&huge_min)).unwrap_err();
        assert!(matches!(err, AlgoError::InvalidInput(_)));

        let huge_step = ParamRange::new(5.0, 80.0, 1e19);
        let err = GridDimension::from_default("w", ParamValue::Int(20), Some(&huge_step)).unwrap_err();
        assert!(matches!(err, AlgoError::InvalidInput(_)));

        let err = GridDimension::integer("w", i64::MIN, i64::MAX, 1).unwrap_err();
        assert!(matches!(err, AlgoError::InvalidInput(_)));

        let err = GridDimension::integer("w", -(1 << 62), 1 << 62, 1).unwrap_err();
        assert!(matches!(err, AlgoError::InvalidInput(_)));
    }

    #[test]
    fn grid_from_defaults_checks_declarations() {
        let empty = ParameterSet::new();
        let err = ParameterGrid::from_defaults("idle", &empty, &std::collections::HashMap::new()).unwrap_err();
        assert!(matches!(err, AlgoError::NoParametersFound(_)));

        let defaults = ParameterSet::new().with_param("window", ParamValue::Int(20));
        let mut ranges = std::collections::HashMap::new();
        ranges.insert("lookback".to_string(), ParamRange::new(1.0, 2.0, 1.0));
        let err = ParameterGrid::from_defaults("sma", &defaults, &ranges).unwrap_err();
        assert!(matches!(err, AlgoError::InvalidInput(_)));
    }

    #[test]
    fn combinations_vary_first_dimension_slowest() {
        let grid = ParameterGrid::new()
            .with_dimension(GridDimension::integer("a", 1, 2, 1).unwrap())
            .with_dimension(GridDimension::integer("b", 10, 30, 10).unwrap());

        let combinations = grid.generate_all_combinations_vec();
        assert_eq!(grid.calculate_total_combinations(), 6);
        assert_eq!(combinations.len(), 6);
        assert_eq!(combinations[0].format_for_display(), "{'a': 1, 'b': 10}");
        assert_eq!(combinations[2].format_for_display(), "{'a': 1, 'b': 30}");
        assert_eq!(combinations[3].format_for_display(), "{'a': 2, 'b': 10}");
    }

    #[test]
    fn results_are_filtered_and_sorted_by_return() {
        let optimizer = GridSearchOptimizer::new(single_dimension_grid(6))
            .with_threads(2)
            .with_filters(vec![FilterCondition::new(performance::Metric::Return, 0.0)]);

        // Odd x loses money, even x returns x percent.
        let outcome = optimizer
            .run_optimization(
                |params| {
                    let x = params.get_f64("x").map_err(|e| AlgoError::invalid(e.to_string()))?;
                    let r = if x as i64 % 2 == 1 { -(x - 4.0).abs() - 1.0 } else { x };
                    Ok(metrics_with_return(r))
                },
                &CancellationToken::new(),
            )
            .unwrap();

        let returns: Vec<f64> = outcome.results.iter().map(|r| r.get_return_pct()).collect();
        assert_eq!(outcome.evaluated, 6);
        assert_eq!(outcome.filtered_out, 3);
        assert_eq!(returns.len(), 3);
        assert!(returns.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(outcome.best().map(|r| r.get_grid_index()), Some(5));
    }

    #[test]
    fn ties_keep_grid_order() {
        let optimizer = GridSearchOptimizer::new(single_dimension_grid(4)).with_threads(3);
        let outcome = optimizer
            .run_optimization(|_| Ok(metrics_with_return(1.0)), &CancellationToken::new())
            .unwrap();
        let order: Vec<usize> = outcome.results.iter().map(|r| r.get_grid_index()).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn empty_result_set_is_not_an_error() {
        let optimizer = GridSearchOptimizer::new(single_dimension_grid(3))
            .with_filters(vec![FilterCondition::new(performance::Metric::Sharpe, 1.0)]);
        let outcome = optimizer
            .run_optimization(|_| Ok(metrics_with_return(5.0)), &CancellationToken::new())
            .unwrap();

        assert!(outcome.is_empty());
        assert_eq!(outcome.message(), Some(EMPTY_RESULT_MESSAGE));
        assert_eq!(outcome.filtered_out, 3);
    }

    #[test]
    fn isolated_failures_are_recorded() {
        let optimizer = GridSearchOptimizer::new(single_dimension_grid(10)).with_threads(2);
        let outcome = optimizer
            .run_optimization(
                |params| {
                    if params.get("x") == Some(ParamValue::Int(3)) {
                        return Err(AlgoError::StrategyError {
                            strategy: "t".to_string(),
                            bar_index: 7,
                            message: "boom".to_string(),
                        });
                    }
                    Ok(metrics_with_return(1.0))
                },
                &CancellationToken::new(),
            )
            .unwrap();

        assert_eq!(outcome.results.len(), 9);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].grid_index, 2);
        assert_eq!(outcome.failures[0].bar_index, Some(7));
        assert_eq!(outcome.evaluated, 10);
    }

    #[test]
    fn systemic_failures_abort_the_search() {
        let optimizer = GridSearchOptimizer::new(single_dimension_grid(10))
            .with_threads(1)
            .with_max_failure_rate(0.2);
        let err = optimizer
            .run_optimization(
                |_| Err(AlgoError::invalid("broken strategy")),
                &CancellationToken::new(),
            )
            .unwrap_err();

        match err {
            AlgoError::FailureRateExceeded { failed, first_error, .. } => {
                assert_eq!(failed, 3);
                assert!(first_error.contains("broken strategy"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn cancelled_search_keeps_collected_rows() {
        let cancel = CancellationToken::new();
        let optimizer = GridSearchOptimizer::new(single_dimension_grid(8)).with_threads(1);
        let outcome = optimizer
            .run_optimization(
                |params| {
                    if params.get("x") == Some(ParamValue::Int(3)) {
                        cancel.cancel();
                    }
                    Ok(metrics_with_return(1.0))
                },
                &cancel,
            )
            .unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.evaluated, 3);
        assert_eq!(outcome.results.len(), 3);
        assert_eq!(outcome.total, 8);
    }
}
