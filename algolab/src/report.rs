// algolab/src/report.rs

//! Result files.
//!
//! A backtest writes `backtest_metrics.json`, `backtest_results.csv`, `trades.csv` and
//! `equity_curve.csv`. An optimization writes `optimization_results.csv` and the text report
//! `optimizer_{NN}_{ASSET}_{INTERVAL}.txt`.

use anyhow::Context;

use algolab_core::backtest::BacktestReport;
use algolab_core::optimization::{FilterCondition, OptimizationOutcome, OptimizationResult, ParameterGrid};
use algolab_core::performance::{self, PerformanceMetrics};

pub const BACKTEST_METRICS_FILE: &str = "backtest_metrics.json";
pub const BACKTEST_RESULTS_FILE: &str = "backtest_results.csv";
pub const TRADES_FILE: &str = "trades.csv";
pub const EQUITY_CURVE_FILE: &str = "equity_curve.csv";
pub const OPTIMIZATION_RESULTS_FILE: &str = "optimization_results.csv";

/// Renders the stats list as an aligned two-column table.
pub fn format_stats_table(metrics: &PerformanceMetrics) -> String {
    let stats = metrics.to_stats_list();
    let width = stats.iter().map(|(key, _)| key.len()).max().unwrap_or(0);

    stats
        .iter()
        .map(|(key, value)| format!("{:<width$}  {}", key, value, width = width))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Writes the four backtest files into `results_dir`.
pub fn write_backtest(results_dir: &std::path::Path, report: &BacktestReport) -> anyhow::Result<()> {
    std::fs::create_dir_all(results_dir)
        .with_context(|| format!("Failed to create {}", results_dir.display()))?;

    let metrics_path = results_dir.join(BACKTEST_METRICS_FILE);
    let file = std::fs::File::create(&metrics_path)
        .with_context(|| format!("Failed to create {}", metrics_path.display()))?;
    let mut json_writer = std::io::BufWriter::new(file);
    serde_json::to_writer_pretty(&mut json_writer, &report.metrics)
        .with_context(|| format!("Failed to write {}", metrics_path.display()))?;
    std::io::Write::flush(&mut json_writer)?;

    let results_path = results_dir.join(BACKTEST_RESULTS_FILE);
    let mut writer = csv_writer(&results_path)?;
    writer.write_record(["key", "value"])?;
    for (key, value) in report.metrics.to_stats_list() {
        writer.write_record([key.as_str(), value.as_str()])?;
    }
    writer.flush()?;

    let trades_path = results_dir.join(TRADES_FILE);
    let mut writer = csv_writer(&trades_path)?;
    for trade in &report.trades {
        writer.serialize(trade)?;
    }
    if report.trades.is_empty() {
        writer.write_record([
            "side", "size", "entry_bar", "exit_bar", "entry_time", "exit_time", "entry_price",
            "exit_price", "pnl", "commission",
        ])?;
    }
    writer.flush()?;

    let equity_path = results_dir.join(EQUITY_CURVE_FILE);
    let mut writer = csv_writer(&equity_path)?;
    for point in &report.equity_curve {
        writer.serialize(point)?;
    }
    writer.flush()?;

    tracing::info!(dir = %results_dir.display(), trades = report.trades.len(), "backtest results written");
    anyhow::Ok(())
}

fn csv_writer(path: &std::path::Path) -> anyhow::Result<csv::Writer<std::fs::File>> {
    csv::Writer::from_path(path).with_context(|| format!("Failed to create {}", path.display()))
}

/// Everything the optimization report shows.
pub struct OptimizationReport<'a> {
    pub strategy_number: usize,
    pub strategy: &'a str,
    pub version: &'a str,
    pub symbol: &'a str,
    pub interval: &'a str,
    pub start: chrono::NaiveDate,
    pub end: chrono::NaiveDate,
    pub grid: &'a ParameterGrid,
    pub filters: &'a [FilterCondition],
    pub top_n: usize,
    pub outcome: &'a OptimizationOutcome,
}

impl OptimizationReport<'_> {
    pub fn file_name(&self) -> String {
        format!(
            "optimizer_{:02}_{}_{}.txt",
            self.strategy_number,
            self.symbol.to_uppercase(),
            self.interval.to_uppercase()
        )
    }

    /// Human-readable report text.
    pub fn render(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Strategy: {} v{}", self.strategy, self.version));
        lines.push(format!("Asset: {}", self.symbol));
        lines.push(format!("Time window: {} to {}", self.start, self.end));
        lines.push(format!("Interval: {}", self.interval));
        lines.push(String::new());

        lines.push(format!(
            "Parameters tested ({} combinations):",
            self.grid.calculate_total_combinations()
        ));
        for dimension in self.grid.get_dimensions() {
            lines.push(format!("  {}", dimension.describe()));
        }
        lines.push(String::new());

        lines.push("Filter conditions:".to_string());
        if self.filters.is_empty() {
            lines.push("  none".to_string());
        }
        for filter in self.filters {
            lines.push(format!("  {}", filter));
        }
        lines.push(String::new());

        lines.push(format!(
            "Evaluated {} of {} grid points: {} passed, {} filtered out, {} failed",
            self.outcome.evaluated,
            self.outcome.total,
            self.outcome.results.len(),
            self.outcome.filtered_out,
            self.outcome.failures.len()
        ));
        if self.outcome.cancelled {
            lines.push("Search was cancelled; remaining grid points were skipped.".to_string());
        }
        lines.push(String::new());

        match self.outcome.message() {
            Some(message) => lines.push(message.to_string()),
            None => {
                let top = self.outcome.top(self.top_n);
                lines.push(format!("Top {} Results:", top.len()));
                lines.extend(results_table(self.grid, top));
                lines.push(String::new());

                if let Some(best) = self.outcome.best() {
                    lines.push("Best parameters:".to_string());
                    for (name, value) in best.get_parameters().iter() {
                        lines.push(format!("  {}: {}", name, value));
                    }
                }
            }
        }

        if !self.outcome.failures.is_empty() {
            lines.push(String::new());
            lines.push("Failed grid points:".to_string());
            for failure in &self.outcome.failures {
                let bar = failure
                    .bar_index
                    .map(|b| format!(" at bar {}", b))
                    .unwrap_or_default();
                lines.push(format!(
                    "  #{} {}{}: {}",
                    failure.grid_index,
                    failure.parameters.format_for_display(),
                    bar,
                    failure.error
                ));
            }
        }

        lines.push(String::new());
        lines.join("\n")
    }

    /// Writes the text report and the CSV of every surviving row.
    pub fn write(&self, results_dir: &std::path::Path) -> anyhow::Result<std::path::PathBuf> {
        std::fs::create_dir_all(results_dir)
            .with_context(|| format!("Failed to create {}", results_dir.display()))?;

        let csv_path = results_dir.join(OPTIMIZATION_RESULTS_FILE);
        let mut writer = csv_writer(&csv_path)?;
        let mut header = vec!["rank".to_string(), "grid_index".to_string()];
        header.extend(self.grid.get_dimensions().iter().map(|d| d.get_name().to_string()));
        header.extend(RESULT_COLUMNS.iter().map(|c| c.to_string()));
        writer.write_record(&header)?;
        for (rank, result) in self.outcome.results.iter().enumerate() {
            let mut record = vec![(rank + 1).to_string(), result.get_grid_index().to_string()];
            record.extend(parameter_values(self.grid, result));
            record.extend(result_values(result));
            writer.write_record(&record)?;
        }
        writer.flush()?;

        let report_path = results_dir.join(self.file_name());
        std::fs::write(&report_path, self.render())
            .with_context(|| format!("Failed to write {}", report_path.display()))?;

        tracing::info!(report = %report_path.display(), rows = self.outcome.results.len(), "optimization results written");
        anyhow::Ok(report_path)
    }
}

const RESULT_COLUMNS: [&str; 6] = [
    "Return [%]",
    "Sharpe Ratio",
    "Max. Drawdown [%]",
    "Win Rate [%]",
    "# Trades",
    "Exposure Time [%]",
];

fn parameter_values(grid: &ParameterGrid, result: &OptimizationResult) -> Vec<String> {
    grid.get_dimensions()
        .iter()
        .map(|d| {
            result
                .get_parameters()
                .get(d.get_name())
                .map(|v| v.to_string())
                .unwrap_or_default()
        })
        .collect()
}

fn result_values(result: &OptimizationResult) -> Vec<String> {
    vec![
        format!("{:.4}", result.get_return_pct()),
        performance::format_value(result.get_sharpe_ratio()),
        format!("{:.4}", result.get_max_drawdown_pct()),
        format!("{:.4}", result.get_win_rate_pct()),
        result.get_trades_count().to_string(),
        format!("{:.4}", result.get_exposure_time_pct()),
    ]
}

fn results_table(grid: &ParameterGrid, results: &[OptimizationResult]) -> Vec<String> {
    let mut header = vec!["Rank".to_string()];
    header.extend(grid.get_dimensions().iter().map(|d| d.get_name().to_string()));
    header.extend(RESULT_COLUMNS.iter().map(|c| c.to_string()));

    let rows: Vec<Vec<String>> = results
        .iter()
        .enumerate()
        .map(|(rank, result)| {
            let mut row = vec![(rank + 1).to_string()];
            row.extend(parameter_values(grid, result));
            row.extend(result_values(result));
            row
        })
        .collect();

    let widths: Vec<usize> = (0..header.len())
        .map(|col| {
            rows.iter()
                .map(|row| row[col].len())
                .chain(std::iter::once(header[col].len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let format_row = |row: &[String]| {
        row.iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:>width$}", cell, width = *width))
            .collect::<Vec<_>>()
            .join(" | ")
    };

    let mut lines = vec![format_row(&header[..])];
    lines.push(widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("-+-"));
    lines.extend(rows.iter().map(|row| format_row(&row[..])));
    lines
}
