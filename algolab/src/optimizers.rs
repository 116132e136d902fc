// algolab/src/optimizers.rs

//! Grid-search driver: builds the parameter grid of the selected strategy, evaluates it in
//! parallel and writes the ranked results.

use anyhow::Context;

use algolab_core::data_handler::PriceSeries;
use algolab_core::optimization::{CancellationToken, GridSearchOptimizer, OptimizationOutcome, ParameterGrid};
use algolab_core::settings::Settings;

use crate::report;
use crate::strategy_loader::StrategyEntry;

pub struct OptimizationRunner<'a> {
    settings: &'a Settings,
    entry: &'a StrategyEntry,
    grid_search_optimizer: GridSearchOptimizer,
}

impl<'a> OptimizationRunner<'a> {
    /// Centers the grid on the entry's parameters, run overrides applied.
    ///
    /// # Returns
    /// * `NoParametersFound` when the strategy declares nothing to search, `InvalidInput` for bad ranges.
    pub fn new(settings: &'a Settings, entry: &'a StrategyEntry) -> anyhow::Result<Self> {
        let descriptor = entry.get_descriptor();
        let centers = entry
            .parameters_with(&settings.strategy.parameter_overrides())
            .with_context(|| format!("Invalid parameters for strategy '{}'", descriptor.get_name()))?;

        let grid = ParameterGrid::from_defaults(descriptor.get_name(), &centers, &settings.optimization.ranges)?;
        let grid_search_optimizer = GridSearchOptimizer::new(grid)
            .with_filters(settings.optimization.filters.clone())
            .with_threads(settings.threads())
            .with_max_failure_rate(settings.optimization.max_failure_rate);

        anyhow::Ok(Self {
            settings,
            entry,
            grid_search_optimizer,
        })
    }

    pub fn get_grid_search_optimizer(&self) -> &GridSearchOptimizer {
        &self.grid_search_optimizer
    }

    /// Evaluates every grid point over `series` and writes the report.
    ///
    /// # Arguments
    /// * `series` - Shared input of every grid point.
    /// * `cancel` - Stops the search early; rows collected so far are still reported.
    ///
    /// # Returns
    /// * The outcome, possibly empty. An empty outcome is logged as a warning, not an error.
    pub fn run_grid_search(&self, series: &PriceSeries, cancel: &CancellationToken) -> anyhow::Result<OptimizationOutcome> {
        let descriptor = self.entry.get_descriptor();
        let optimizer = &self.grid_search_optimizer;

        tracing::info!(
            strategy = descriptor.get_name(),
            threads = optimizer.get_threads(),
            total_combinations = optimizer.calculate_total_combinations(),
            "starting grid search optimization"
        );
        for dimension in optimizer.get_grid().get_dimensions() {
            tracing::info!("  {}", dimension.describe());
        }

        let start_time = std::time::Instant::now();
        let outcome = optimizer.optimize(
            series,
            descriptor,
            self.settings.run.backtest_config(),
            self.settings.run.metrics_config(),
            cancel,
        )?;
        tracing::info!("grid search is done in {:.3} seconds", start_time.elapsed().as_secs_f64());

        if let Some(message) = outcome.message() {
            tracing::warn!("{}", message);
        }

        // The report is written for empty and cancelled searches too.
        let data = &self.settings.data;
        let report = report::OptimizationReport {
            strategy_number: self.entry.get_number(),
            strategy: self.entry.get_label(),
            version: descriptor.get_version(),
            symbol: &data.symbol,
            interval: &data.interval,
            start: data.start_date,
            end: data.end_date,
            grid: optimizer.get_grid(),
            filters: optimizer.get_filters(),
            top_n: self.settings.optimization.top_n,
            outcome: &outcome,
        };
        report
            .write(std::path::Path::new(&self.settings.output.results_dir))
            .context("Failed to write optimization results")?;

        anyhow::Ok(outcome)
    }
}
