// algolab/src/main.rs

mod cli;
mod prompt;
mod report;
mod backtest;
mod optimizers;
mod data_handler;
mod strategy_loader;

use anyhow::Context;

use algolab_core::data_handler::{DataProvider, SeriesRequest};
use algolab_core::optimization::CancellationToken;
use algolab_core::settings::{DataSource, Settings};

const LOG_ENV: &str = "ALGOLAB_LOG";
const DEFAULT_DATA_DIR: &str = "data";

fn main() -> anyhow::Result<()> {
    let start_time = std::time::Instant::now();

    let args = cli::Args::parse();
    init_tracing(args.log_level.as_deref())?;

    if let Err(e) = run(args) {
        tracing::debug!(error = ?e, "run failed");
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    tracing::info!("The main program is finished in {:.3} seconds", start_time.elapsed().as_secs_f64());
    anyhow::Ok(())
}

/// Installs the log subscriber. `ALGOLAB_LOG` wins over `--log-level`; the default is `info`.
fn init_tracing(log_level: Option<&str>) -> anyhow::Result<()> {
    let filter = match std::env::var(LOG_ENV) {
        Ok(directives) if !directives.trim().is_empty() => tracing_subscriber::EnvFilter::try_new(directives)
            .with_context(|| format!("Invalid {} filter", LOG_ENV))?,
        _ => tracing_subscriber::EnvFilter::try_new(log_level.unwrap_or("info"))
            .context("Invalid --log-level filter")?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {}", e))
}

fn run(args: cli::Args) -> anyhow::Result<()> {
    let registry = strategy_lib::registry()?;

    let (mut settings, mode) = match &args.config {
        Some(path) => {
            let settings = Settings::load(path)?;
            let mode = args.mode.unwrap_or_else(|| settings.common.mode.into());
            (settings, mode)
        }
        None => {
            let mode = args.mode.unwrap_or(cli::RunMode::Backtest);
            let strategies_dir = args.strategies.as_deref().map(std::path::Path::new);
            let catalog = strategy_loader::StrategyCatalog::discover(strategies_dir, &registry)?;
            let stdin = std::io::stdin();
            let mut prompter = prompt::Prompter::new(stdin.lock(), std::io::stdout());
            let data_dir = args.data.as_deref().unwrap_or(DEFAULT_DATA_DIR);
            let settings = prompt::prompt_settings(&mut prompter, mode, &catalog, data_dir)?;
            (settings, mode)
        }
    };

    apply_overrides(&mut settings, &args)?;

    let request = SeriesRequest::new(
        &settings.data.symbol,
        &settings.data.interval,
        settings.data.start_date,
        settings.data.end_date,
    )?;

    if mode == cli::RunMode::Import {
        return import_series(&settings, &request, args.csv.as_deref());
    }

    let strategies_dir = settings.strategy.strategies_dir.as_deref().map(std::path::Path::new);
    let catalog = strategy_loader::StrategyCatalog::discover(strategies_dir, &registry)?;
    let entry = catalog.select(settings.strategy.selection.as_ref())?;
    tracing::info!(strategy = %entry.describe(), source = ?entry.get_source(), "strategy selected");

    let series = match settings.data.source {
        DataSource::Csv => data_handler::CsvDataProvider::new(&settings.data.data_dir).load(&request)?,
        DataSource::Store => data_handler::SeriesStore::new(&settings.data.data_dir).load(&request)?,
    };

    match mode {
        cli::RunMode::Backtest => {
            let report = backtest::BacktestRunner::new(&settings, entry).simulate_trading(&series)?;
            println!("{}", report::format_stats_table(&report.metrics));
        }
        cli::RunMode::Optimize => {
            let runner = optimizers::OptimizationRunner::new(&settings, entry)?;
            let outcome = runner.run_grid_search(&series, &CancellationToken::new())?;
            match outcome.best() {
                Some(best) => println!(
                    "Best parameters: {} (Return [%] {:.4})",
                    best.get_parameters().format_for_display(),
                    best.get_return_pct()
                ),
                None => println!("{}", algolab_core::optimization::EMPTY_RESULT_MESSAGE),
            }
        }
        cli::RunMode::Import => {}
    }

    anyhow::Ok(())
}

/// Applies directory flags over the loaded settings and re-validates them.
fn apply_overrides(settings: &mut Settings, args: &cli::Args) -> anyhow::Result<()> {
    if let Some(dir) = &args.strategies {
        settings.strategy.strategies_dir = Some(dir.clone());
    }
    if let Some(dir) = &args.data {
        settings.data.data_dir = dir.clone();
    }
    if let Some(dir) = &args.output {
        settings.output.results_dir = dir.clone();
    }
    settings.validate()
}

/// Reads CSV bars (the `--csv` file, or the data directory's matching files) into the series store.
fn import_series(settings: &Settings, request: &SeriesRequest, csv: Option<&std::path::Path>) -> anyhow::Result<()> {
    let series = match csv {
        Some(path) => data_handler::CsvDataProvider::load_file(path, &request.symbol, &request.interval)
            .with_context(|| format!("Failed to import {}", path.display()))?
            .between(request.start, request.end),
        None => data_handler::CsvDataProvider::new(&settings.data.data_dir).load(request)?,
    };

    if series.is_empty() {
        anyhow::bail!(
            "No {} {} bars between {} and {} to import",
            request.symbol,
            request.interval,
            request.start,
            request.end
        );
    }

    let path = data_handler::SeriesStore::new(&settings.data.data_dir).save(&series)?;
    println!("Imported {} bars into {}", series.len(), path.display());
    anyhow::Ok(())
}
