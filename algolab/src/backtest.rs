// algolab/src/backtest.rs

use anyhow::Context;

use algolab_core::backtest::{Backtest, BacktestReport};
use algolab_core::data_handler::PriceSeries;
use algolab_core::settings::Settings;

use crate::report;
use crate::strategy_loader::StrategyEntry;

/// Runs one backtest of the selected strategy and writes its result files.
pub struct BacktestRunner<'a> {
    settings: &'a Settings,
    entry: &'a StrategyEntry,
}

impl<'a> BacktestRunner<'a> {
    pub fn new(settings: &'a Settings, entry: &'a StrategyEntry) -> Self {
        Self { settings, entry }
    }

    /// Simulates the strategy over `series`.
    ///
    /// # Arguments
    /// * `series` - Validated bars of the configured symbol and window.
    ///
    /// # Returns
    /// * The report; the result files are written to the configured results directory.
    pub fn simulate_trading(&self, series: &PriceSeries) -> anyhow::Result<BacktestReport> {
        // Manifest overrides first, then the run's own overrides.
        let descriptor = self.entry.get_descriptor();
        let params = self
            .entry
            .parameters_with(&self.settings.strategy.parameter_overrides())
            .with_context(|| format!("Invalid parameters for strategy '{}'", descriptor.get_name()))?;

        tracing::info!(
            strategy = descriptor.get_name(),
            params = %params.format_for_display(),
            bars = series.len(),
            "starting backtest"
        );

        let mut strategy = descriptor.build_exact(&params)?;
        let start_time = std::time::Instant::now();
        let report = Backtest::new(series, self.settings.run.backtest_config())
            .with_metrics_config(self.settings.run.metrics_config())
            .run(strategy.as_mut())
            .with_context(|| format!("Backtest failed with parameters {}", params.format_for_display()))?;

        tracing::info!(
            trades = report.trades.len(),
            final_equity = report.final_equity(),
            "backtest is done in {:.3} seconds",
            start_time.elapsed().as_secs_f64()
        );

        // Files are written only for a completed run.
        let results_dir = std::path::Path::new(&self.settings.output.results_dir);
        report::write_backtest(results_dir, &report).context("Failed to write backtest results")?;

        anyhow::Ok(report)
    }
}
