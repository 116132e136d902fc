// algolab_core/src/settings.rs

//! Run configuration.
//! Loads settings from JSON files and validates them before any work starts.

use serde::Deserialize;

use crate::backtest;
use crate::error::AlgoError;
use crate::execution;
use crate::optimization;
use crate::performance;
use crate::strategy;
use crate::utils;

/// What the driver does with the settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub enum Mode {
    Backtest,
    Optimize,
}

/// Where price series are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    #[default]
    Csv,
    Store,
}

/// Common settings applicable to the entire run.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CommonSettings {
    pub mode: Mode,
    /// Worker threads of a grid search. Defaults to all cores.
    #[serde(default)]
    pub threads: Option<usize>,
}

/// Series selection.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DataSettings {
    pub data_dir: String,
    pub symbol: String,
    pub interval: String,
    #[serde(deserialize_with = "deserialize_date")]
    pub start_date: chrono::NaiveDate,
    #[serde(deserialize_with = "deserialize_date")]
    pub end_date: chrono::NaiveDate,
    #[serde(default)]
    pub source: DataSource,
}

/// Account, execution and annualization settings.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RunSettings {
    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,
    /// Accepts a rate (`0.001`) or a percent string (`"0.1%"`).
    #[serde(default = "default_commission", deserialize_with = "deserialize_commission")]
    pub commission: f64,
    #[serde(default)]
    pub fill_timing: execution::FillTiming,
    #[serde(default)]
    pub periods_per_year: Option<f64>,
    #[serde(default)]
    pub risk_free_rate: f64,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            initial_capital: default_initial_capital(),
            commission: default_commission(),
            fill_timing: execution::FillTiming::default(),
            periods_per_year: None,
            risk_free_rate: 0.0,
        }
    }
}

impl RunSettings {
    pub fn backtest_config(&self) -> backtest::BacktestConfig {
        backtest::BacktestConfig::new(self.initial_capital, self.commission).with_fill_timing(self.fill_timing)
    }

    pub fn metrics_config(&self) -> performance::MetricsConfig {
        performance::MetricsConfig {
            periods_per_year: self.periods_per_year,
            risk_free_rate: self.risk_free_rate,
        }
    }
}

/// Manifest number or registered strategy name.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum StrategySelection {
    Number(usize),
    Name(String),
}

impl std::fmt::Display for StrategySelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategySelection::Number(n) => write!(f, "#{}", n),
            StrategySelection::Name(name) => write!(f, "{}", name),
        }
    }
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct StrategySettings {
    /// Directory of strategy manifests. Every registered strategy is offered when unset.
    #[serde(default)]
    pub strategies_dir: Option<String>,
    #[serde(default)]
    pub selection: Option<StrategySelection>,
    /// Overrides merged over the strategy's defaults.
    #[serde(default)]
    pub parameters: std::collections::HashMap<String, strategy::ParamValue>,
}

impl StrategySettings {
    /// Overrides as a `ParameterSet`, ordered by name.
    pub fn parameter_overrides(&self) -> strategy::ParameterSet {
        let mut names: Vec<&String> = self.parameters.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| (name.clone(), self.parameters[name]))
            .collect()
    }
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct OptimizationSettings {
    #[serde(default)]
    pub ranges: std::collections::HashMap<String, optimization::ParamRange>,
    #[serde(default)]
    pub filters: Vec<optimization::FilterCondition>,
    #[serde(default = "default_max_failure_rate")]
    pub max_failure_rate: f64,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

impl Default for OptimizationSettings {
    fn default() -> Self {
        Self {
            ranges: std::collections::HashMap::new(),
            filters: Vec::new(),
            max_failure_rate: default_max_failure_rate(),
            top_n: default_top_n(),
        }
    }
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct OutputSettings {
    pub results_dir: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            results_dir: "results".to_string(),
        }
    }
}

/// Top-level settings structure.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub common: CommonSettings,
    pub data: DataSettings,
    #[serde(default)]
    pub run: RunSettings,
    #[serde(default)]
    pub strategy: StrategySettings,
    #[serde(default)]
    pub optimization: OptimizationSettings,
    #[serde(default)]
    pub output: OutputSettings,
}

impl Settings {
    /// Loads settings from a JSON file.
    /// # Arguments
    /// * `settings_file_path` - Path to the JSON configuration file.
    /// # Returns
    /// * `anyhow::Result<Settings>` containing the validated settings.
    pub fn load<P: AsRef<std::path::Path>>(settings_file_path: P) -> anyhow::Result<Self> {
        let path = settings_file_path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read settings file {}: {}", path.display(), e))?;
        Self::from_json_str(&contents)
    }

    /// Parses and validates settings from JSON text.
    pub fn from_json_str(contents: &str) -> anyhow::Result<Self> {
        let mut settings: Settings = serde_json::from_str(contents)
            .map_err(|e| anyhow::anyhow!("Failed to parse settings JSON: {}", e))?;

        settings.validate()?;

        anyhow::Ok(settings)
    }

    /// Checks every section, caps `threads` at the core count and creates the results directory.
    pub fn validate(&mut self) -> anyhow::Result<()> {
        check_args(self).map_err(|e| anyhow::anyhow!("Settings validation failed: {:#}", e))
    }

    pub fn threads(&self) -> usize {
        self.common.threads.unwrap_or_else(num_cpus::get)
    }
}

fn check_args(settings: &mut Settings) -> anyhow::Result<()> {
    // check threads
    {
        if let Some(threads) = settings.common.threads {
            if threads == 0 {
                anyhow::bail!("'threads' cannot be zero.");
            }
            let available_threads = num_cpus::get();
            if threads > available_threads {
                tracing::debug!(threads, available_threads, "threads capped at core count");
                settings.common.threads = Some(available_threads);
            }
        }
    }

    // check data
    {
        let data = &settings.data;
        if data.symbol.trim().is_empty() {
            anyhow::bail!(AlgoError::invalid("symbol cannot be empty"));
        }
        if data.interval.trim().is_empty() {
            anyhow::bail!(AlgoError::invalid("interval cannot be empty"));
        }
        if data.start_date > data.end_date {
            anyhow::bail!(AlgoError::invalid(format!(
                "start date {} is after end date {}",
                data.start_date, data.end_date
            )));
        }
    }

    // check run
    {
        settings.run.backtest_config().validate()?;

        if let Some(periods) = settings.run.periods_per_year {
            if !periods.is_finite() || periods <= 0.0 {
                anyhow::bail!(AlgoError::invalid(format!(
                    "periods_per_year must be positive, got {}",
                    periods
                )));
            }
        }
        if !settings.run.risk_free_rate.is_finite() {
            anyhow::bail!(AlgoError::invalid("risk_free_rate must be finite"));
        }
    }

    // check optimization
    {
        let optimization = &settings.optimization;
        if !(optimization.max_failure_rate > 0.0 && optimization.max_failure_rate <= 1.0) {
            anyhow::bail!("max_failure_rate must be in (0, 1], got {}", optimization.max_failure_rate);
        }
        if optimization.top_n == 0 {
            anyhow::bail!("top_n must be greater than 0");
        }
        for filter in &optimization.filters {
            if !filter.threshold.is_finite() {
                anyhow::bail!("Filter '{}' needs a finite threshold", filter);
            }
        }
    }

    // check exit path of results
    {
        let normalized_path = settings.output.results_dir.trim_end_matches('/');
        if normalized_path.is_empty() {
            anyhow::bail!("Results directory cannot be empty!")
        }

        let path = std::path::Path::new(normalized_path);
        if !path.exists() {
            std::fs::create_dir_all(path)?;
        } else if !path.is_dir() {
            anyhow::bail!("Results path {} is not a directory!", path.display())
        }
    }

    anyhow::Ok(())
}

fn default_initial_capital() -> f64 {
    100_000.0
}

fn default_commission() -> f64 {
    0.001
}

fn default_max_failure_rate() -> f64 {
    0.5
}

fn default_top_n() -> usize {
    10
}

// --- Deserialization Helpers ---

/// Deserializes a date given as `YYYYMMDD` or `YYYY-MM-DD`.
fn deserialize_date<'de, D>(deserializer: D) -> Result<chrono::NaiveDate, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    utils::parse_date(&raw).map_err(|e| serde::de::Error::custom(format!("{:#}", e)))
}

/// Deserializes a commission given as a number or as a string with an optional `%` suffix.
fn deserialize_commission<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum Commission {
        Rate(f64),
        Text(String),
    }

    match Commission::deserialize(deserializer)? {
        Commission::Rate(rate) => Ok(rate),
        Commission::Text(text) => {
            utils::parse_commission(&text).map_err(|e| serde::de::Error::custom(format!("{:#}", e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results_dir(name: &str) -> String {
        std::env::temp_dir()
            .join(format!("algolab_settings_{}_{}", name, std::process::id()))
            .to_string_lossy()
            .into_owned()
    }

    fn minimal(extra: &str, dir: &str) -> String {
        format!(
            r#"{{
                "common": {{ "mode": "Optimize", "threads": 1 }},
                "data": {{
                    "data_dir": "data",
                    "symbol": "BTCUSD",
                    "interval": "1d",
                    "start_date": "20230101",
                    "end_date": "2023-12-31"
                }},
                "output": {{ "results_dir": "{}" }}{}
            }}"#,
            dir.replace('\\', "\\\\"),
            extra
        )
    }

    #[test]
    fn loads_with_defaults() {
        let dir = results_dir("defaults");
        let settings = Settings::from_json_str(&minimal("", &dir)).unwrap();

        assert_eq!(settings.common.mode, Mode::Optimize);
        assert_eq!(settings.data.source, DataSource::Csv);
        assert_eq!(settings.data.start_date, chrono::NaiveDate::from_ymd_opt(2023, 1, 1).unwrap());
        assert_eq!(settings.run.initial_capital, 100_000.0);
        assert_eq!(settings.run.commission, 0.001);
        assert_eq!(settings.optimization.top_n, 10);
        assert_eq!(settings.optimization.max_failure_rate, 0.5);
        assert!(std::path::Path::new(&dir).is_dir());
        assert_eq!(settings.threads(), 1);
    }

    #[test]
    fn parses_run_strategy_and_optimization_sections() {
        let dir = results_dir("sections");
        let extra = r#",
            "run": { "initial_capital": 5000, "commission": "0.2%", "fill_timing": "same_bar_close" },
            "strategy": { "selection": 2, "parameters": { "short_window": 5, "buffer_pct": 0.25 } },
            "optimization": {
                "ranges": { "short_window": { "min": 2, "max": 10, "step": 2 } },
                "filters": [ { "metric": "Sharpe Ratio", "threshold": 1.0 },
                             { "metric": "Max. Drawdown [%]", "threshold": -20 } ]
            }"#;
        let settings = Settings::from_json_str(&minimal(extra, &dir)).unwrap();

        assert!((settings.run.commission - 0.002).abs() < 1e-15);
        assert_eq!(settings.run.fill_timing, execution::FillTiming::SameBarClose);
        assert_eq!(settings.strategy.selection, Some(StrategySelection::Number(2)));

        let overrides = settings.strategy.parameter_overrides();
        assert_eq!(overrides.names(), vec!["buffer_pct", "short_window"]);
        assert_eq!(overrides.get("short_window"), Some(strategy::ParamValue::Int(5)));

        assert_eq!(settings.optimization.filters.len(), 2);
        assert_eq!(settings.optimization.filters[1].metric, performance::Metric::MaxDrawdown);
        assert_eq!(settings.optimization.ranges["short_window"].step, Some(2.0));
    }

    #[test]
    fn rejects_invalid_values() {
        let dir = results_dir("invalid");

        let reversed = minimal("", &dir).replace("20230101", "20240101");
        assert!(Settings::from_json_str(&reversed).is_err());

        let zero_threads = minimal("", &dir).replace("\"threads\": 1", "\"threads\": 0");
        assert!(Settings::from_json_str(&zero_threads).is_err());

        let capital = minimal(r#", "run": { "initial_capital": -1 }"#, &dir);
        assert!(Settings::from_json_str(&capital).is_err());

        let commission = minimal(r#", "run": { "commission": 1.5 }"#, &dir);
        assert!(Settings::from_json_str(&commission).is_err());

        let unknown = minimal(r#", "extra": true"#, &dir);
        assert!(Settings::from_json_str(&unknown).is_err());
    }
}
