// algolab/src/prompt.rs

//! Interactive prompts used when no settings file is given.
//! Every question states its default, applied when the answer is blank.

use anyhow::Context;

use algolab_core::optimization::{FilterCondition, GridDimension, ParamRange};
use algolab_core::performance::Metric;
use algolab_core::settings;
use algolab_core::strategy::ParamValue;

use crate::cli::RunMode;
use crate::strategy_loader::StrategyCatalog;

/// Line-oriented question/answer session over any reader and writer.
pub struct Prompter<R, W> {
    input: R,
    output: W,
}

impl<R: std::io::BufRead, W: std::io::Write> Prompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Reads one trimmed answer. Fails once input is exhausted.
    fn ask(&mut self, question: &str, default: &str) -> anyhow::Result<String> {
        if default.is_empty() {
            write!(self.output, "{}: ", question)?;
        } else {
            write!(self.output, "{} [{}]: ", question, default)?;
        }
        self.output.flush()?;

        let mut line = String::new();
        let read = self.input.read_line(&mut line).context("Failed to read answer")?;
        if read == 0 {
            anyhow::bail!("Input ended while waiting for '{}'", question);
        }

        let answer = line.trim();
        anyhow::Ok(if answer.is_empty() { default.to_string() } else { answer.to_string() })
    }

    /// Asks until `parse` accepts the answer.
    fn ask_parsed<T>(
        &mut self,
        question: &str,
        default: &str,
        parse: impl Fn(&str) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        loop {
            let answer = self.ask(question, default)?;
            match parse(&answer) {
                Ok(value) => return anyhow::Ok(value),
                Err(e) => writeln!(self.output, "Invalid value: {:#}. Please try again.", e)?,
            }
        }
    }

    pub fn ask_string(&mut self, question: &str, default: &str) -> anyhow::Result<String> {
        self.ask_parsed(question, default, |answer| {
            if answer.is_empty() {
                anyhow::bail!("a value is required");
            }
            anyhow::Ok(answer.to_string())
        })
    }

    pub fn ask_f64(&mut self, question: &str, default: f64) -> anyhow::Result<f64> {
        self.ask_parsed(question, &default.to_string(), |answer| {
            let value: f64 = answer.parse().with_context(|| format!("'{}' is not a number", answer))?;
            if !value.is_finite() {
                anyhow::bail!("'{}' is not a finite number", answer);
            }
            anyhow::Ok(value)
        })
    }

    pub fn ask_date(&mut self, question: &str, default: &str) -> anyhow::Result<chrono::NaiveDate> {
        self.ask_parsed(question, default, algolab_core::utils::parse_date)
    }

    /// Commission as a rate; a trailing `%` divides by 100.
    pub fn ask_commission(&mut self, default: f64) -> anyhow::Result<f64> {
        self.ask_parsed(
            "Commission (rate, or percent with %)",
            &default.to_string(),
            algolab_core::utils::parse_commission,
        )
    }

    /// Asks for a value of the same numeric kind as `default`.
    fn ask_param(&mut self, question: &str, default: ParamValue) -> anyhow::Result<f64> {
        self.ask_parsed(question, &default.to_string(), |answer| {
            let value: f64 = answer.parse().with_context(|| format!("'{}' is not a number", answer))?;
            if !value.is_finite() {
                anyhow::bail!("'{}' is not a finite number", answer);
            }
            if default.is_int() && value.fract() != 0.0 {
                anyhow::bail!("'{}' must be an integer", answer);
            }
            anyhow::Ok(value)
        })
    }
}

/// Builds settings by asking for every value a run needs.
///
/// # Arguments
/// * `prompter` - Question/answer session.
/// * `mode` - Backtest and optimize ask for the run and strategy; optimize also asks for
///   ranges and filters; import only asks for the series.
/// * `catalog` - Strategies offered for selection.
/// * `data_dir` - Default data directory.
pub fn prompt_settings<R: std::io::BufRead, W: std::io::Write>(
    prompter: &mut Prompter<R, W>,
    mode: RunMode,
    catalog: &StrategyCatalog,
    data_dir: &str,
) -> anyhow::Result<settings::Settings> {
    let data = settings::DataSettings {
        data_dir: prompter.ask_string("Data directory", data_dir)?,
        symbol: prompter.ask_string("Asset symbol", "BTCUSD")?,
        interval: prompter.ask_string("Interval", "1d")?,
        start_date: prompter.ask_date("Start date (YYYYMMDD)", "20200101")?,
        end_date: prompter.ask_date("End date (YYYYMMDD)", "20241231")?,
        source: settings::DataSource::default(),
    };

    let common = settings::CommonSettings {
        mode: match mode {
            RunMode::Optimize => settings::Mode::Optimize,
            RunMode::Backtest | RunMode::Import => settings::Mode::Backtest,
        },
        threads: None,
    };

    let mut all_settings = settings::Settings {
        common,
        data,
        run: settings::RunSettings::default(),
        strategy: settings::StrategySettings::default(),
        optimization: settings::OptimizationSettings::default(),
        output: settings::OutputSettings::default(),
    };

    if mode == RunMode::Import {
        return anyhow::Ok(all_settings);
    }

    let run_defaults = settings::RunSettings::default();
    all_settings.run.initial_capital = prompter.ask_parsed(
        "Initial capital",
        &run_defaults.initial_capital.to_string(),
        |answer| {
            let value: f64 = answer.parse().with_context(|| format!("'{}' is not a number", answer))?;
            if !(value > 0.0) || !value.is_finite() {
                anyhow::bail!("initial capital must be positive");
            }
            anyhow::Ok(value)
        },
    )?;
    all_settings.run.commission = prompter.ask_commission(run_defaults.commission)?;

    let entry = select_strategy(prompter, catalog)?;
    all_settings.strategy.selection = Some(settings::StrategySelection::Number(entry.get_number()));

    if mode == RunMode::Optimize {
        let centers = entry.parameters().context("Invalid strategy parameters")?;
        for (name, default) in centers.iter() {
            let suggested = GridDimension::from_default(name, *default, None)?;
            let min = prompter.ask_param(&format!("{} min", name), suggested.get_min())?;
            let max = prompter.ask_param(&format!("{} max", name), suggested.get_max())?;
            let step = prompter.ask_parsed(
                &format!("{} step", name),
                &suggested.get_step().to_string(),
                |answer| {
                    let value: f64 = answer.parse().with_context(|| format!("'{}' is not a number", answer))?;
                    if !(value > 0.0) || !value.is_finite() {
                        anyhow::bail!("step must be positive");
                    }
                    if default.is_int() && value.fract() != 0.0 {
                        anyhow::bail!("'{}' must be an integer", answer);
                    }
                    anyhow::Ok(value)
                },
            )?;
            all_settings
                .optimization
                .ranges
                .insert(name.clone(), ParamRange::new(min, max, step));
        }

        all_settings.optimization.filters = prompt_filters(prompter)?;
    }

    anyhow::Ok(all_settings)
}

fn select_strategy<'c, R: std::io::BufRead, W: std::io::Write>(
    prompter: &mut Prompter<R, W>,
    catalog: &'c StrategyCatalog,
) -> anyhow::Result<&'c crate::strategy_loader::StrategyEntry> {
    writeln!(prompter.output, "Available strategies:")?;
    for entry in catalog.entries() {
        writeln!(prompter.output, "  {}", entry.describe())?;
    }

    let default = catalog
        .entries()
        .first()
        .map(|entry| entry.get_number().to_string())
        .unwrap_or_default();

    prompter.ask_parsed("Strategy number", &default, |answer| {
        let number: usize = answer
            .parse()
            .with_context(|| format!("'{}' is not a strategy number", answer))?;
        catalog.select(Some(&settings::StrategySelection::Number(number)))
    })
}

/// Asks for the thresholds of the default filters. Drawdown is asked as a magnitude and
/// stored negated.
fn prompt_filters<R: std::io::BufRead, W: std::io::Write>(
    prompter: &mut Prompter<R, W>,
) -> anyhow::Result<Vec<FilterCondition>> {
    let min_return = prompter.ask_f64("Minimum return [%]", 0.0)?;
    let min_sharpe = prompter.ask_f64("Minimum Sharpe ratio", 0.0)?;
    let max_drawdown = prompter.ask_parsed("Maximum drawdown [%]", "100", |answer| {
        let value: f64 = answer.parse().with_context(|| format!("'{}' is not a number", answer))?;
        if !(value >= 0.0) || !value.is_finite() {
            anyhow::bail!("drawdown must be a non-negative number");
        }
        anyhow::Ok(value)
    })?;
    let min_win_rate = prompter.ask_f64("Minimum win rate [%]", 0.0)?;

    anyhow::Ok(vec![
        FilterCondition::new(Metric::Return, min_return),
        FilterCondition::new(Metric::Sharpe, min_sharpe),
        FilterCondition::new(Metric::MaxDrawdown, -max_drawdown),
        FilterCondition::new(Metric::WinRate, min_win_rate),
    ])
}
