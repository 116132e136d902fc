// algolab_core/src/performance.rs

//! Performance metrics calculation engine.
//! Pure functions over a completed equity curve and trade log.
//! Uses SIMD for bar-over-bar returns.

use chrono::Datelike;

use crate::portfolio;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Metrics addressable by filters and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Metric {
    #[serde(rename = "Return [%]")]
    Return,
    #[serde(rename = "Return (Ann.) [%]")]
    ReturnAnn,
    #[serde(rename = "Buy & Hold Return [%]")]
    BuyAndHoldReturn,
    #[serde(rename = "Exposure Time [%]")]
    ExposureTime,
    #[serde(rename = "Equity Final [$]")]
    EquityFinal,
    #[serde(rename = "Max. Drawdown [%]")]
    MaxDrawdown,
    #[serde(rename = "Avg. Drawdown [%]")]
    AvgDrawdown,
    #[serde(rename = "# Trades")]
    Trades,
    #[serde(rename = "Win Rate [%]")]
    WinRate,
    #[serde(rename = "Best Trade [%]")]
    BestTrade,
    #[serde(rename = "Worst Trade [%]")]
    WorstTrade,
    #[serde(rename = "Avg. Trade [%]")]
    AvgTrade,
    #[serde(rename = "Profit Factor")]
    ProfitFactor,
    #[serde(rename = "Expectancy [%]")]
    Expectancy,
    #[serde(rename = "SQN")]
    Sqn,
    #[serde(rename = "Sharpe Ratio")]
    Sharpe,
    #[serde(rename = "Sortino Ratio")]
    Sortino,
    #[serde(rename = "Calmar Ratio")]
    Calmar,
}

impl Metric {
    pub fn label(&self) -> &'static str {
        match self {
            Metric::Return => "Return [%]",
            Metric::ReturnAnn => "Return (Ann.) [%]",
            Metric::BuyAndHoldReturn => "Buy & Hold Return [%]",
            Metric::ExposureTime => "Exposure Time [%]",
            Metric::EquityFinal => "Equity Final [$]",
            Metric::MaxDrawdown => "Max. Drawdown [%]",
            Metric::AvgDrawdown => "Avg. Drawdown [%]",
            Metric::Trades => "# Trades",
            Metric::WinRate => "Win Rate [%]",
            Metric::BestTrade => "Best Trade [%]",
            Metric::WorstTrade => "Worst Trade [%]",
            Metric::AvgTrade => "Avg. Trade [%]",
            Metric::ProfitFactor => "Profit Factor",
            Metric::Expectancy => "Expectancy [%]",
            Metric::Sqn => "SQN",
            Metric::Sharpe => "Sharpe Ratio",
            Metric::Sortino => "Sortino Ratio",
            Metric::Calmar => "Calmar Ratio",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Settings of the risk-adjusted ratios.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Bars per year used for annualization. Inferred from bar spacing when `None`.
    #[serde(default)]
    pub periods_per_year: Option<f64>,
    /// Annual risk-free rate as a fraction.
    #[serde(default)]
    pub risk_free_rate: f64,
}

/// Statistics of one completed simulation. Created once, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceMetrics {
    start: chrono::DateTime<chrono::Utc>,
    end: chrono::DateTime<chrono::Utc>,
    duration: chrono::Duration,
    exposure_time_pct: f64,
    equity_final: f64,
    equity_peak: f64,
    return_pct: f64,
    buy_and_hold_return_pct: f64,
    return_ann_pct: Option<f64>,
    /// Magnitude, positive.
    max_drawdown_pct: f64,
    avg_drawdown_pct: f64,
    max_drawdown_duration: chrono::Duration,
    avg_drawdown_duration: chrono::Duration,
    trades_count: usize,
    win_rate_pct: f64,
    best_trade_pct: Option<f64>,
    worst_trade_pct: Option<f64>,
    avg_trade_pct: Option<f64>,
    max_trade_duration: Option<chrono::Duration>,
    avg_trade_duration: Option<chrono::Duration>,
    profit_factor: Option<f64>,
    expectancy_pct: Option<f64>,
    sqn: Option<f64>,
    sharpe_ratio: Option<f64>,
    sortino_ratio: Option<f64>,
    calmar_ratio: Option<f64>,
}

impl PerformanceMetrics {
    /// Converts the performance metrics into a list of key-value pairs for display.
    pub fn to_stats_list(&self) -> Vec<(String, String)> {
        let mut stats = Vec::new();

        stats.push(("Start".to_string(), self.start.format("%Y-%m-%d %H:%M:%S").to_string()));
        stats.push(("End".to_string(), self.end.format("%Y-%m-%d %H:%M:%S").to_string()));
        stats.push(("Duration".to_string(), format_duration(self.duration)));
        stats.push(("Exposure Time [%]".to_string(), format!("{:.4}", self.exposure_time_pct)));
        stats.push(("Equity Final [$]".to_string(), format!("{:.2}", self.equity_final)));
        stats.push(("Equity Peak [$]".to_string(), format!("{:.2}", self.equity_peak)));
        stats.push(("Return [%]".to_string(), format!("{:.4}", self.return_pct)));
        stats.push(("Buy & Hold Return [%]".to_string(), format!("{:.4}", self.buy_and_hold_return_pct)));
        stats.push(("Return (Ann.) [%]".to_string(), format_value(self.return_ann_pct)));
        stats.push(("Max. Drawdown [%]".to_string(), format!("{:.4}", negated(self.max_drawdown_pct))));
        stats.push(("Avg. Drawdown [%]".to_string(), format!("{:.4}", negated(self.avg_drawdown_pct))));
        stats.push(("Max. Drawdown Duration".to_string(), format_duration(self.max_drawdown_duration)));
        stats.push(("Avg. Drawdown Duration".to_string(), format_duration(self.avg_drawdown_duration)));
        stats.push(("# Trades".to_string(), self.trades_count.to_string()));
        stats.push(("Win Rate [%]".to_string(), format!("{:.4}", self.win_rate_pct)));
        stats.push(("Best Trade [%]".to_string(), format_value(self.best_trade_pct)));
        stats.push(("Worst Trade [%]".to_string(), format_value(self.worst_trade_pct)));
        stats.push(("Avg. Trade [%]".to_string(), format_value(self.avg_trade_pct)));
        stats.push(("Max. Trade Duration".to_string(), format_opt_duration(self.max_trade_duration)));
        stats.push(("Avg. Trade Duration".to_string(), format_opt_duration(self.avg_trade_duration)));
        stats.push(("Profit Factor".to_string(), format_value(self.profit_factor)));
        stats.push(("Expectancy [%]".to_string(), format_value(self.expectancy_pct)));
        stats.push(("SQN".to_string(), format_value(self.sqn)));
        stats.push(("Sharpe Ratio".to_string(), format_value(self.sharpe_ratio)));
        stats.push(("Sortino Ratio".to_string(), format_value(self.sortino_ratio)));
        stats.push(("Calmar Ratio".to_string(), format_value(self.calmar_ratio)));

        stats
    }

    /// Value of `metric` as seen by filters.
    /// Drawdowns are negated so that a bound like "at most 20%" reads `>= -20`.
    pub fn metric_value(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Return => Some(self.return_pct),
            Metric::ReturnAnn => self.return_ann_pct,
            Metric::BuyAndHoldReturn => Some(self.buy_and_hold_return_pct),
            Metric::ExposureTime => Some(self.exposure_time_pct),
            Metric::EquityFinal => Some(self.equity_final),
            Metric::MaxDrawdown => Some(negated(self.max_drawdown_pct)),
            Metric::AvgDrawdown => Some(negated(self.avg_drawdown_pct)),
            Metric::Trades => Some(self.trades_count as f64),
            Metric::WinRate => Some(self.win_rate_pct),
            Metric::BestTrade => self.best_trade_pct,
            Metric::WorstTrade => self.worst_trade_pct,
            Metric::AvgTrade => self.avg_trade_pct,
            Metric::ProfitFactor => self.profit_factor,
            Metric::Expectancy => self.expectancy_pct,
            Metric::Sqn => self.sqn,
            Metric::Sharpe => self.sharpe_ratio,
            Metric::Sortino => self.sortino_ratio,
            Metric::Calmar => self.calmar_ratio,
        }
    }

    // Getters

    pub fn get_start(&self) -> chrono::DateTime<chrono::Utc> {
        self.start
    }

    pub fn get_end(&self) -> chrono::DateTime<chrono::Utc> {
        self.end
    }

    pub fn get_duration(&self) -> chrono::Duration {
        self.duration
    }

    pub fn get_exposure_time_pct(&self) -> f64 {
        self.exposure_time_pct
    }

    pub fn get_equity_final(&self) -> f64 {
        self.equity_final
    }

    pub fn get_equity_peak(&self) -> f64 {
        self.equity_peak
    }

    pub fn get_return_pct(&self) -> f64 {
        self.return_pct
    }

    pub fn get_buy_and_hold_return_pct(&self) -> f64 {
        self.buy_and_hold_return_pct
    }

    pub fn get_return_ann_pct(&self) -> Option<f64> {
        self.return_ann_pct
    }

    /// Maximum drawdown magnitude in percent (positive).
    pub fn get_max_drawdown_pct(&self) -> f64 {
        self.max_drawdown_pct
    }

    pub fn get_avg_drawdown_pct(&self) -> f64 {
        self.avg_drawdown_pct
    }

    pub fn get_max_drawdown_duration(&self) -> chrono::Duration {
        self.max_drawdown_duration
    }

    pub fn get_avg_drawdown_duration(&self) -> chrono::Duration {
        self.avg_drawdown_duration
    }

    pub fn get_trades_count(&self) -> usize {
        self.trades_count
    }

    pub fn get_win_rate_pct(&self) -> f64 {
        self.win_rate_pct
    }

    pub fn get_best_trade_pct(&self) -> Option<f64> {
        self.best_trade_pct
    }

    pub fn get_worst_trade_pct(&self) -> Option<f64> {
        self.worst_trade_pct
    }

    pub fn get_avg_trade_pct(&self) -> Option<f64> {
        self.avg_trade_pct
    }

    pub fn get_max_trade_duration(&self) -> Option<chrono::Duration> {
        self.max_trade_duration
    }

    pub fn get_avg_trade_duration(&self) -> Option<chrono::Duration> {
        self.avg_trade_duration
    }

    pub fn get_profit_factor(&self) -> Option<f64> {
        self.profit_factor
    }

    pub fn get_expectancy_pct(&self) -> Option<f64> {
        self.expectancy_pct
    }

    pub fn get_sqn(&self) -> Option<f64> {
        self.sqn
    }

    pub fn get_sharpe_ratio(&self) -> Option<f64> {
        self.sharpe_ratio
    }

    pub fn get_sortino_ratio(&self) -> Option<f64> {
        self.sortino_ratio
    }

    pub fn get_calmar_ratio(&self) -> Option<f64> {
        self.calmar_ratio
    }
}

/// Flat object with the keys and sign conventions of [`PerformanceMetrics::to_stats_list`].
/// Undefined values are `null`, infinite ones the strings `"inf"` / `"-inf"`.
impl serde::Serialize for PerformanceMetrics {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let timestamp = |t: chrono::DateTime<chrono::Utc>| t.format("%Y-%m-%d %H:%M:%S").to_string();

        let mut map = serializer.serialize_map(Some(26))?;
        map.serialize_entry("Start", &timestamp(self.start))?;
        map.serialize_entry("End", &timestamp(self.end))?;
        map.serialize_entry("Duration", &format_duration(self.duration))?;
        map.serialize_entry("Exposure Time [%]", &JsonNumber(Some(self.exposure_time_pct)))?;
        map.serialize_entry("Equity Final [$]", &JsonNumber(Some(self.equity_final)))?;
        map.serialize_entry("Equity Peak [$]", &JsonNumber(Some(self.equity_peak)))?;
        map.serialize_entry("Return [%]", &JsonNumber(Some(self.return_pct)))?;
        map.serialize_entry("Buy & Hold Return [%]", &JsonNumber(Some(self.buy_and_hold_return_pct)))?;
        map.serialize_entry("Return (Ann.) [%]", &JsonNumber(self.return_ann_pct))?;
        map.serialize_entry("Max. Drawdown [%]", &JsonNumber(Some(negated(self.max_drawdown_pct))))?;
        map.serialize_entry("Avg. Drawdown [%]", &JsonNumber(Some(negated(self.avg_drawdown_pct))))?;
        map.serialize_entry("Max. Drawdown Duration", &format_duration(self.max_drawdown_duration))?;
        map.serialize_entry("Avg. Drawdown Duration", &format_duration(self.avg_drawdown_duration))?;
        map.serialize_entry("# Trades", &self.trades_count)?;
        map.serialize_entry("Win Rate [%]", &JsonNumber(Some(self.win_rate_pct)))?;
        map.serialize_entry("Best Trade [%]", &JsonNumber(self.best_trade_pct))?;
        map.serialize_entry("Worst Trade [%]", &JsonNumber(self.worst_trade_pct))?;
        map.serialize_entry("Avg. Trade [%]", &JsonNumber(self.avg_trade_pct))?;
        map.serialize_entry("Max. Trade Duration", &self.max_trade_duration.map(format_duration))?;
        map.serialize_entry("Avg. Trade Duration", &self.avg_trade_duration.map(format_duration))?;
        map.serialize_entry("Profit Factor", &JsonNumber(self.profit_factor))?;
        map.serialize_entry("Expectancy [%]", &JsonNumber(self.expectancy_pct))?;
        map.serialize_entry("SQN", &JsonNumber(self.sqn))?;
        map.serialize_entry("Sharpe Ratio", &JsonNumber(self.sharpe_ratio))?;
        map.serialize_entry("Sortino Ratio", &JsonNumber(self.sortino_ratio))?;
        map.serialize_entry("Calmar Ratio", &JsonNumber(self.calmar_ratio))?;
        map.end()
    }
}

/// A metric value as JSON: a number, `null` when undefined, `"inf"` / `"-inf"` when infinite.
struct JsonNumber(Option<f64>);

impl serde::Serialize for JsonNumber {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Some(v) if v.is_infinite() => serializer.serialize_str(if v > 0.0 { "inf" } else { "-inf" }),
            Some(v) if v.is_nan() => serializer.serialize_none(),
            Some(v) => serializer.serialize_f64(v),
            None => serializer.serialize_none(),
        }
    }
}

/// Drawdown magnitude as reported: negative, and `0` rather than `-0`.
fn negated(magnitude: f64) -> f64 {
    0.0 - magnitude
}

/// A stretch of the equity curve below its running peak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawdownEpisode {
    /// Time of the peak the episode fell from.
    pub start: chrono::DateTime<chrono::Utc>,
    /// Recovery time, or the last point when never recovered.
    pub end: chrono::DateTime<chrono::Utc>,
    pub depth_pct: f64,
    pub recovered: bool,
}

impl DrawdownEpisode {
    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }
}

/// Decline of `equity` from `peak`, in percent.
pub fn drawdown_pct(peak: f64, equity: f64) -> f64 {
    if peak > 0.0 {
        (peak - equity) / peak * 100.0
    } else {
        0.0
    }
}

/// Computes the metrics of a completed run.
///
/// # Arguments
/// * `equity_curve` - One point per bar.
/// * `trades` - Closed trades; a position still open at the end is not included.
/// * `initial_capital` - Starting cash, also the initial running peak.
/// * `buy_and_hold_return_pct` - Return of holding the instrument over the same window.
/// * `config` - Annualization settings.
///
/// # Returns
/// * The metrics record. Ratios that need more data than the run provides are `None`.
pub fn compute(
    equity_curve: &[portfolio::EquityPoint],
    trades: &[portfolio::Trade],
    initial_capital: f64,
    buy_and_hold_return_pct: f64,
    config: &MetricsConfig,
) -> PerformanceMetrics {
    let start = equity_curve.first().map(|p| p.datetime).unwrap_or_default();
    let end = equity_curve.last().map(|p| p.datetime).unwrap_or_default();
    let equity: Vec<f64> = equity_curve.iter().map(|p| p.equity).collect();

    let equity_final = equity.last().copied().unwrap_or(initial_capital);
    let equity_peak = equity.iter().copied().fold(initial_capital, f64::max);
    let return_pct = (equity_final / initial_capital - 1.0) * 100.0;

    // Exposure: share of bars that ended with a position.
    let exposure_time_pct = if equity_curve.is_empty() {
        0.0
    } else {
        let exposed = equity_curve.iter().filter(|p| p.position != 0.0).count();
        exposed as f64 / equity_curve.len() as f64 * 100.0
    };

    // Drawdowns: averaged per episode, not per bar.
    let episodes = drawdown_episodes(equity_curve, initial_capital);
    let max_drawdown_pct = episodes.iter().map(|e| e.depth_pct).fold(0.0, f64::max);
    let avg_drawdown_pct = mean(&episodes.iter().map(|e| e.depth_pct).collect::<Vec<_>>()).unwrap_or(0.0);
    let max_drawdown_duration = episodes
        .iter()
        .map(|e| e.duration())
        .max()
        .unwrap_or_else(chrono::Duration::zero);
    let avg_drawdown_duration = mean_duration(episodes.iter().map(|e| e.duration())).unwrap_or_else(chrono::Duration::zero);

    // Risk-adjusted ratios from per-bar returns; the first bar has no return.
    let periods_per_year = config
        .periods_per_year
        .filter(|p| *p > 0.0)
        .unwrap_or_else(|| infer_periods_per_year(equity_curve));
    let returns = calculate_returns_simd(&equity);
    let bar_returns = if returns.len() > 1 { &returns[1..] } else { &returns[..0] };
    let sharpe_ratio = sharpe(bar_returns, periods_per_year, config.risk_free_rate);
    let sortino_ratio = sortino(bar_returns, periods_per_year, config.risk_free_rate);

    let return_ann_pct = annualized_return_pct(equity_final / initial_capital, end - start);
    let calmar_ratio = return_ann_pct.and_then(|ann| {
        if max_drawdown_pct > 0.0 {
            Some(ann / max_drawdown_pct)
        } else {
            None
        }
    });

    // Trade statistics use net P&L.
    let trade_returns: Vec<f64> = trades.iter().map(|t| t.return_pct()).collect();
    let pnls: Vec<f64> = trades.iter().map(|t| t.pnl).collect();
    let trades_count = trades.len();
    let wins = pnls.iter().filter(|p| **p > 0.0).count();
    let win_rate_pct = if trades_count == 0 {
        0.0
    } else {
        wins as f64 / trades_count as f64 * 100.0
    };

    PerformanceMetrics {
        start,
        end,
        duration: end - start,
        exposure_time_pct,
        equity_final,
        equity_peak,
        return_pct,
        buy_and_hold_return_pct,
        return_ann_pct,
        max_drawdown_pct,
        avg_drawdown_pct,
        max_drawdown_duration,
        avg_drawdown_duration,
        trades_count,
        win_rate_pct,
        best_trade_pct: trade_returns.iter().copied().reduce(f64::max),
        worst_trade_pct: trade_returns.iter().copied().reduce(f64::min),
        avg_trade_pct: geometric_mean_pct(&trade_returns),
        max_trade_duration: trades.iter().map(|t| t.duration()).max(),
        avg_trade_duration: mean_duration(trades.iter().map(|t| t.duration())),
        profit_factor: profit_factor(&pnls),
        expectancy_pct: mean(&trade_returns),
        sqn: sqn(&pnls),
        sharpe_ratio,
        sortino_ratio,
        calmar_ratio,
    }
}

/// Splits the curve into drawdown episodes. The running peak starts at `initial_capital`.
///
/// An episode starts at the peak it fell from and ends at the first point back at or above
/// that peak, or at the last point when equity never recovers.
pub fn drawdown_episodes(
    equity_curve: &[portfolio::EquityPoint],
    initial_capital: f64,
) -> Vec<DrawdownEpisode> {
    let mut episodes = Vec::new();
    let Some(first) = equity_curve.first() else {
        return episodes;
    };

    let mut peak = initial_capital;
    let mut peak_time = first.datetime;
    let mut current: Option<DrawdownEpisode> = None;

    for point in equity_curve {
        if point.equity >= peak {
            if let Some(mut episode) = current.take() {
                episode.end = point.datetime;
                episode.recovered = true;
                episodes.push(episode);
            }
            peak = point.equity;
            peak_time = point.datetime;
            continue;
        }

        let depth = drawdown_pct(peak, point.equity);
        match current.as_mut() {
            Some(episode) => {
                episode.depth_pct = episode.depth_pct.max(depth);
                episode.end = point.datetime;
            }
            None => {
                current = Some(DrawdownEpisode {
                    start: peak_time,
                    end: point.datetime,
                    depth_pct: depth,
                    recovered: false,
                });
            }
        }
    }

    if let Some(episode) = current {
        episodes.push(episode);
    }

    episodes
}

/// Bars per year implied by the curve's median bar spacing.
/// Daily-or-faster bars scale 252 trading days (365 when weekend bars exist); slower bars use calendar time.
pub fn infer_periods_per_year(equity_curve: &[portfolio::EquityPoint]) -> f64 {
    let mut spacings: Vec<f64> = equity_curve
        .windows(2)
        .map(|w| (w[1].datetime - w[0].datetime).num_seconds() as f64)
        .filter(|s| *s > 0.0)
        .collect();

    if spacings.is_empty() {
        return 252.0;
    }

    spacings.sort_by(|a, b| a.total_cmp(b));
    let median = spacings[spacings.len() / 2];

    let has_weekend_bars = equity_curve
        .iter()
        .any(|p| matches!(p.datetime.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun));
    let days_per_year = if has_weekend_bars { 365.0 } else { 252.0 };

    if median <= SECONDS_PER_DAY {
        days_per_year * SECONDS_PER_DAY / median
    } else {
        365.25 * SECONDS_PER_DAY / median
    }
}

/// Renders a duration as `D days HH:MM:SS`.
pub fn format_duration(duration: chrono::Duration) -> String {
    let total = duration.num_seconds();
    let sign = if total < 0 { "-" } else { "" };
    let total = total.abs();
    let days = total / 86_400;
    let rest = total % 86_400;
    format!(
        "{}{} days {:02}:{:02}:{:02}",
        sign,
        days,
        rest / 3_600,
        (rest % 3_600) / 60,
        rest % 60
    )
}

fn format_opt_duration(duration: Option<chrono::Duration>) -> String {
    duration.map(format_duration).unwrap_or_else(|| "NaN".to_string())
}

/// `NaN` for undefined values, `inf` for infinite ones.
pub fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_infinite() => if v > 0.0 { "inf".to_string() } else { "-inf".to_string() },
        Some(v) => format!("{:.4}", v),
        None => "NaN".to_string(),
    }
}

fn annualized_return_pct(growth: f64, span: chrono::Duration) -> Option<f64> {
    let years = span.num_seconds() as f64 / (365.25 * SECONDS_PER_DAY);
    if years <= 0.0 || !growth.is_finite() {
        return None;
    }
    if growth <= 0.0 {
        return Some(-100.0);
    }
    Some((growth.powf(1.0 / years) - 1.0) * 100.0)
}

fn sharpe(returns: &[f64], periods_per_year: f64, risk_free_rate: f64) -> Option<f64> {
    let (mean, stdev) = mean_stdev(returns)?;
    if !(stdev > 0.0) {
        return None;
    }
    Some((mean - risk_free_rate / periods_per_year) / stdev * periods_per_year.sqrt())
}

fn sortino(returns: &[f64], periods_per_year: f64, risk_free_rate: f64) -> Option<f64> {
    let mean = mean(returns)?;
    let negative: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    let (_, downside) = mean_stdev(&negative)?;
    if !(downside > 0.0) {
        return None;
    }
    Some((mean - risk_free_rate / periods_per_year) / downside * periods_per_year.sqrt())
}

fn profit_factor(pnls: &[f64]) -> Option<f64> {
    if pnls.is_empty() {
        return None;
    }
    let gross_profit: f64 = pnls.iter().filter(|p| **p > 0.0).sum();
    let gross_loss: f64 = pnls.iter().filter(|p| **p < 0.0).map(|p| p.abs()).sum();
    if gross_loss == 0.0 {
        return Some(f64::INFINITY);
    }
    Some(gross_profit / gross_loss)
}

fn sqn(pnls: &[f64]) -> Option<f64> {
    let (mean, stdev) = mean_stdev(pnls)?;
    if !(stdev > 0.0) {
        return None;
    }
    Some(mean / stdev * (pnls.len() as f64).sqrt())
}

fn geometric_mean_pct(returns_pct: &[f64]) -> Option<f64> {
    if returns_pct.is_empty() {
        return None;
    }
    let factors: Vec<f64> = returns_pct.iter().map(|r| 1.0 + r / 100.0).collect();
    if factors.iter().any(|f| *f <= 0.0) {
        return None;
    }
    let log_mean = factors.iter().map(|f| f.ln()).sum::<f64>() / factors.len() as f64;
    Some((log_mean.exp() - 1.0) * 100.0)
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Mean and sample standard deviation. Needs at least two values.
fn mean_stdev(values: &[f64]) -> Option<(f64, f64)> {
    if values.len() < 2 {
        return None;
    }
    let mean = mean(values)?;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some((mean, variance.sqrt()))
}

fn mean_duration<I: Iterator<Item = chrono::Duration>>(durations: I) -> Option<chrono::Duration> {
    let seconds: Vec<i64> = durations.map(|d| d.num_seconds()).collect();
    if seconds.is_empty() {
        return None;
    }
    let avg = seconds.iter().sum::<i64>() / seconds.len() as i64;
    Some(chrono::Duration::seconds(avg))
}

/// Bar-over-bar simple returns. Element 0 is zero.
fn calculate_returns_simd(equity: &[f64]) -> Vec<f64> {
    let n = equity.len();
    if n < 2 {
        return vec![0.0; n];
    }

    let mut returns = vec![0.0; n];

    let chunks = (n - 1) / 4;
    for i in 0..chunks {
        let start = i * 4 + 1;

        let prev_values = wide::f64x4::from([
            equity[start - 1],
            equity[start],
            equity[start + 1],
            equity[start + 2],
        ]);

        let curr_values = wide::f64x4::from([
            equity[start],
            equity[start + 1],
            equity[start + 2],
            equity[start + 3],
        ]);

        let ret_values = (curr_values / prev_values) - wide::f64x4::splat(1.0);

        let result_array: [f64; 4] = ret_values.into();
        returns[start..start + 4].copy_from_slice(&result_array);
    }

    for i in chunks * 4 + 1..n {
        let prev = equity[i - 1];
        returns[i] = if prev != 0.0 { (equity[i] / prev) - 1.0 } else { 0.0 };
    }

    returns
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: i64) -> chrono::DateTime<chrono::Utc> {
        // 2024-01-01 is a Monday
        chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap() + chrono::Duration::days(day)
    }

    fn curve(values: &[f64]) -> Vec<portfolio::EquityPoint> {
        let mut peak = values[0];
        values
            .iter()
            .enumerate()
            .map(|(i, &equity)| {
                peak = peak.max(equity);
                portfolio::EquityPoint {
                    datetime: ts(i as i64),
                    cash: equity,
                    position: 0.0,
                    position_value: 0.0,
                    equity,
                    drawdown_pct: drawdown_pct(peak, equity),
                }
            })
            .collect()
    }

    fn trade(pnl: f64, entry_price: f64, size: f64, days: i64) -> portfolio::Trade {
        portfolio::Trade {
            side: portfolio::PositionSide::Long,
            size,
            entry_bar: 0,
            exit_bar: days as usize,
            entry_time: ts(0),
            exit_time: ts(days),
            entry_price,
            exit_price: entry_price + pnl / size,
            pnl,
            commission: 0.0,
        }
    }

    #[test]
    fn flat_curve_has_undefined_ratios() {
        let points = curve(&[100.0; 10]);
        let metrics = compute(&points, &[], 100.0, 5.0, &MetricsConfig::default());

        assert_eq!(metrics.get_return_pct(), 0.0);
        assert_eq!(metrics.get_trades_count(), 0);
        assert_eq!(metrics.get_win_rate_pct(), 0.0);
        assert_eq!(metrics.get_sharpe_ratio(), None);
        assert_eq!(metrics.get_sortino_ratio(), None);
        assert_eq!(metrics.get_profit_factor(), None);
        assert_eq!(metrics.get_max_drawdown_pct(), 0.0);
        assert_eq!(metrics.get_buy_and_hold_return_pct(), 5.0);
    }

    #[test]
    fn average_drawdown_is_per_episode() {
        // Episode 1: 100 -> 90 -> 80 -> 100 (depth 20%), episode 2: 100 -> 90 -> 100 (depth 10%)
        let points = curve(&[100.0, 90.0, 80.0, 100.0, 90.0, 100.0]);
        let episodes = drawdown_episodes(&points, 100.0);
        assert_eq!(episodes.len(), 2);
        assert!(episodes.iter().all(|e| e.recovered));
        assert_eq!(episodes[0].duration(), chrono::Duration::days(3));
        assert_eq!(episodes[1].duration(), chrono::Duration::days(2));

        let metrics = compute(&points, &[], 100.0, 0.0, &MetricsConfig::default());
        assert!((metrics.get_max_drawdown_pct() - 20.0).abs() < 1e-12);
        assert!((metrics.get_avg_drawdown_pct() - 15.0).abs() < 1e-12);
        assert_eq!(metrics.get_max_drawdown_duration(), chrono::Duration::days(3));
        assert_eq!(metrics.get_avg_drawdown_duration(), chrono::Duration::hours(60));
        assert_eq!(metrics.metric_value(Metric::MaxDrawdown), Some(-20.0));
        assert_eq!(metrics.metric_value(Metric::AvgDrawdown), Some(-15.0));
    }

    #[test]
    fn unrecovered_drawdown_runs_to_last_point() {
        let points = curve(&[100.0, 110.0, 99.0, 104.5]);
        let episodes = drawdown_episodes(&points, 100.0);
        assert_eq!(episodes.len(), 1);
        assert!(!episodes[0].recovered);
        assert_eq!(episodes[0].start, ts(1));
        assert_eq!(episodes[0].end, ts(3));
        assert!((episodes[0].depth_pct - 10.0).abs() < 1e-9);
    }

    #[test]
    fn sharpe_matches_hand_computation() {
        let values = [100.0, 110.0, 99.0, 108.9];
        let points = curve(&values);
        let config = MetricsConfig {
            periods_per_year: Some(252.0),
            risk_free_rate: 0.0,
        };
        let metrics = compute(&points, &[], 100.0, 0.0, &config);

        let returns = [0.1, -0.1, 0.1];
        let mean = returns.iter().sum::<f64>() / 3.0;
        let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / 2.0;
        let expected = mean / var.sqrt() * 252f64.sqrt();
        assert!((metrics.get_sharpe_ratio().unwrap() - expected).abs() < 1e-9);
        // A single negative return has no sample deviation.
        assert_eq!(metrics.get_sortino_ratio(), None);
    }

    #[test]
    fn sortino_uses_sample_deviation_of_losing_bars() {
        let values = [100.0, 110.0, 99.0, 108.9, 87.12];
        let points = curve(&values);
        let config = MetricsConfig {
            periods_per_year: Some(252.0),
            risk_free_rate: 0.0,
        };
        let metrics = compute(&points, &[], 100.0, 0.0, &config);

        let returns: Vec<f64> = values.windows(2).map(|w| w[1] / w[0] - 1.0).collect();
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let negative: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
        assert_eq!(negative.len(), 2);
        let neg_mean = negative.iter().sum::<f64>() / 2.0;
        let downside = (negative.iter().map(|r| (r - neg_mean).powi(2)).sum::<f64>() / 1.0).sqrt();
        let expected = mean / downside * 252f64.sqrt();

        let sortino = metrics.get_sortino_ratio().unwrap();
        assert!((sortino - expected).abs() < 1e-9);
        assert_eq!(metrics.metric_value(Metric::Sortino), Some(sortino));
    }

    #[test]
    fn calmar_divides_annualized_return_by_max_drawdown() {
        // Two years of wall-clock time: 100 -> 80 -> 121.
        let mut points = curve(&[100.0, 80.0, 121.0]);
        points[2].datetime = ts(0) + chrono::Duration::hours(2 * 36_525 * 24 / 100);
        let metrics = compute(&points, &[], 100.0, 0.0, &MetricsConfig::default());

        let ann = metrics.get_return_ann_pct().unwrap();
        assert!((ann - 10.0).abs() < 1e-9);
        assert!((metrics.get_max_drawdown_pct() - 20.0).abs() < 1e-12);
        assert!((metrics.get_calmar_ratio().unwrap() - 0.5).abs() < 1e-9);
        assert_eq!(metrics.get_duration(), chrono::Duration::hours(17_532));
    }

    #[test]
    fn calmar_is_undefined_without_drawdown() {
        let metrics = compute(&curve(&[100.0, 101.0, 102.0]), &[], 100.0, 0.0, &MetricsConfig::default());
        assert!(metrics.get_return_ann_pct().is_some());
        assert_eq!(metrics.get_calmar_ratio(), None);
    }

    #[test]
    fn exposure_counts_bars_with_a_position() {
        let mut points = curve(&[100.0; 8]);
        for point in &mut points[2..5] {
            point.position = 4.0;
        }
        points[6].position = -1.0;
        let metrics = compute(&points, &[], 100.0, 0.0, &MetricsConfig::default());
        assert!((metrics.get_exposure_time_pct() - 50.0).abs() < 1e-12);
        assert_eq!(metrics.metric_value(Metric::ExposureTime), Some(50.0));
    }

    #[test]
    fn json_keeps_report_signs_and_infinite_profit_factor() {
        let winners = vec![trade(10.0, 100.0, 1.0, 1), trade(5.0, 100.0, 1.0, 2)];
        let metrics = compute(&curve(&[100.0, 90.0, 115.0]), &winners, 100.0, 0.0, &MetricsConfig::default());
        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["Profit Factor"], serde_json::json!("inf"));
        assert_eq!(json["Max. Drawdown [%]"].as_f64(), Some(-10.0));
        assert_eq!(json["Avg. Drawdown [%]"].as_f64(), Some(-10.0));
        assert_eq!(json["# Trades"], serde_json::json!(2));

        let idle = compute(&curve(&[100.0, 100.0]), &[], 100.0, 0.0, &MetricsConfig::default());
        let json = serde_json::to_value(&idle).unwrap();
        assert!(json["Profit Factor"].is_null());
        assert!(json["Max. Trade Duration"].is_null());
        assert_eq!(json["Max. Drawdown [%]"].as_f64(), Some(0.0));
        assert!(!json["Max. Drawdown [%]"].to_string().starts_with('-'));
    }

    #[test]
    fn trade_statistics() {
        let trades = vec![
            trade(100.0, 100.0, 10.0, 2),
            trade(-50.0, 100.0, 10.0, 4),
            trade(150.0, 100.0, 10.0, 6),
        ];
        let points = curve(&[1_000.0, 1_200.0]);
        let metrics = compute(&points, &trades, 1_000.0, 0.0, &MetricsConfig::default());

        assert_eq!(metrics.get_trades_count(), 3);
        assert!((metrics.get_win_rate_pct() - 200.0 / 3.0).abs() < 1e-9);
        assert!((metrics.get_profit_factor().unwrap() - 5.0).abs() < 1e-12);
        assert_eq!(metrics.get_best_trade_pct(), Some(15.0));
        assert_eq!(metrics.get_worst_trade_pct(), Some(-5.0));
        assert!((metrics.get_expectancy_pct().unwrap() - 20.0 / 3.0).abs() < 1e-9);
        assert_eq!(metrics.get_max_trade_duration(), Some(chrono::Duration::days(6)));
        assert_eq!(metrics.get_avg_trade_duration(), Some(chrono::Duration::days(4)));

        let pnls: [f64; 3] = [100.0, -50.0, 150.0];
        let mean = 200.0 / 3.0;
        let sd = (pnls.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / 2.0).sqrt();
        assert!((metrics.get_sqn().unwrap() - mean / sd * 3f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn profit_factor_is_infinite_without_losers() {
        let trades = vec![trade(10.0, 100.0, 1.0, 1), trade(5.0, 100.0, 1.0, 2)];
        let points = curve(&[100.0, 115.0]);
        let metrics = compute(&points, &trades, 100.0, 0.0, &MetricsConfig::default());
        assert_eq!(metrics.get_profit_factor(), Some(f64::INFINITY));
        assert_eq!(metrics.get_win_rate_pct(), 100.0);
        assert_eq!(format_value(metrics.get_profit_factor()), "inf");
    }

    #[test]
    fn infers_daily_and_intraday_frequencies() {
        let weekdays = curve(&[1.0, 1.0, 1.0, 1.0, 1.0]);
        assert_eq!(infer_periods_per_year(&weekdays), 252.0);

        let mut hourly = curve(&[1.0, 1.0, 1.0]);
        for (i, point) in hourly.iter_mut().enumerate() {
            point.datetime = ts(0) + chrono::Duration::hours(i as i64);
        }
        assert_eq!(infer_periods_per_year(&hourly), 252.0 * 24.0);
    }

    #[test]
    fn stats_list_uses_report_keys() {
        let points = curve(&[100.0, 90.0, 95.0]);
        let metrics = compute(&points, &[], 100.0, 0.0, &MetricsConfig::default());
        let stats = metrics.to_stats_list();
        let keys: Vec<&str> = stats.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys.first(), Some(&"Start"));
        assert!(keys.contains(&"Sharpe Ratio"));
        assert!(keys.contains(&"# Trades"));
        let dd = stats.iter().find(|(k, _)| k == "Max. Drawdown [%]").unwrap();
        assert_eq!(dd.1, "-10.0000");
    }

    #[test]
    fn simd_returns_match_scalar() {
        let equity: Vec<f64> = (0..11).map(|i| 100.0 + (i as f64).sin() * 5.0).collect();
        let simd = calculate_returns_simd(&equity);
        for i in 1..equity.len() {
            assert!((simd[i] - (equity[i] / equity[i - 1] - 1.0)).abs() < 1e-12);
        }
        assert_eq!(simd[0], 0.0);
    }

    #[test]
    fn format_duration_prints_days_and_clock() {
        let d = chrono::Duration::days(2) + chrono::Duration::hours(3) + chrono::Duration::seconds(5);
        assert_eq!(format_duration(d), "2 days 03:00:05");
    }
}
