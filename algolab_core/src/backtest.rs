// algolab_core/src/backtest.rs

//! Simulation engine.
//!
//! Walks a price series bar by bar, asks the strategy for a decision on every bar past its
//! warmup, routes position changes through the execution handler and keeps the portfolio's
//! mark-to-market equity curve. Under next-bar fill timing a decision taken on bar `i` fills
//! at the open of bar `i + 1`, so no fill ever uses information beyond the decision bar.

use crate::data_handler;
use crate::error::AlgoError;
use crate::event;
use crate::execution::{self, ExecutionHandler};
use crate::performance;
use crate::portfolio;
use crate::pos_sizers;
use crate::strategy;

/// Account and execution settings of one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    /// Flat rate applied to both legs, in `[0, 1)`.
    pub commission_rate: f64,
    pub fill_timing: execution::FillTiming,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: 100_000.0,
            commission_rate: 0.001,
            fill_timing: execution::FillTiming::NextBarOpen,
        }
    }
}

impl BacktestConfig {
    pub fn new(initial_capital: f64, commission_rate: f64) -> Self {
        Self {
            initial_capital,
            commission_rate,
            ..Self::default()
        }
    }

    pub fn with_fill_timing(mut self, fill_timing: execution::FillTiming) -> Self {
        self.fill_timing = fill_timing;
        self
    }

    /// Capital must be positive and finite, commission in `[0, 1)`.
    pub fn validate(&self) -> Result<(), AlgoError> {
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(AlgoError::invalid(format!(
                "initial capital must be a positive number, got {}",
                self.initial_capital
            )));
        }
        if !(0.0..1.0).contains(&self.commission_rate) {
            return Err(AlgoError::invalid(format!(
                "commission rate must be in [0, 1), got {}",
                self.commission_rate
            )));
        }
        Ok(())
    }
}

/// Everything a completed run produced.
#[derive(Debug, Clone)]
pub struct BacktestReport {
    pub equity_curve: Vec<portfolio::EquityPoint>,
    pub trades: Vec<portfolio::Trade>,
    /// Position still held after the last bar. Marked to market, never realized.
    pub open_position: Option<portfolio::OpenPosition>,
    pub total_commission: f64,
    pub metrics: performance::PerformanceMetrics,
}

impl BacktestReport {
    pub fn final_equity(&self) -> f64 {
        self.metrics.get_equity_final()
    }

    /// Sum of closed-trade P&L, net of commission.
    pub fn realized_pnl(&self) -> f64 {
        self.trades.iter().map(|t| t.pnl).sum()
    }
}

/// One simulation over one series.
#[derive(Debug, Clone)]
pub struct Backtest<'a> {
    series: &'a data_handler::PriceSeries,
    config: BacktestConfig,
    metrics_config: performance::MetricsConfig,
}

impl<'a> Backtest<'a> {
    pub fn new(series: &'a data_handler::PriceSeries, config: BacktestConfig) -> Self {
        Self {
            series,
            config,
            metrics_config: performance::MetricsConfig::default(),
        }
    }

    pub fn with_metrics_config(mut self, metrics_config: performance::MetricsConfig) -> Self {
        self.metrics_config = metrics_config;
        self
    }

    /// Builds a fresh strategy from `descriptor` with `overrides` merged over its defaults and runs it.
    pub fn run_with(
        &self,
        descriptor: &strategy::StrategyDescriptor,
        overrides: &strategy::ParameterSet,
    ) -> Result<BacktestReport, AlgoError> {
        self.config.validate()?;
        let mut instance = descriptor.build(overrides)?;
        self.run(instance.as_mut())
    }

    /// Runs `strategy` over the whole series.
    ///
    /// # Arguments
    /// * `strategy` - A fresh instance; its internal state is advanced bar by bar.
    ///
    /// # Returns
    /// * `InvalidInput` for an empty or malformed series or a bad config, before any bar is processed.
    /// * `StrategyError` with the bar index when the decision function fails or returns an invalid action.
    pub fn run(&self, strategy: &mut dyn strategy::Strategy) -> Result<BacktestReport, AlgoError> {
        self.config.validate()?;
        if self.series.is_empty() {
            return Err(AlgoError::invalid(format!(
                "price series {} {} is empty",
                self.series.get_symbol(),
                self.series.get_interval()
            )));
        }
        self.series.validate()?;

        let strategy_name = strategy.name().to_string();
        let bars = self.series.get_bars();
        let execution = execution::SimulatedExecutionHandler::new(self.config.commission_rate, self.config.fill_timing);
        let mut portfolio = portfolio::Portfolio::new(self.config.initial_capital);
        let warmup = strategy.warmup_bars().max(1);
        let mut pending: Option<event::OrderEvent> = None;

        tracing::debug!(
            strategy = %strategy_name,
            symbol = self.series.get_symbol(),
            bars = bars.len(),
            warmup,
            "backtest started"
        );

        for (index, bar) in bars.iter().enumerate() {
            // 1. Fill what the previous bar decided, at this bar's open.
            if let Some(order) = pending.take() {
                self.execute_action(order.action, &execution, &mut portfolio, bar, index)?;
            }

            // 2. Ask the strategy, once it has enough history.
            if index + 1 >= warmup {
                let ctx = strategy::StrategyContext {
                    history: &bars[..=index],
                    position: portfolio.position(),
                    cash: portfolio.get_cash(),
                    equity: portfolio.equity_at(bar.close),
                };

                let action = strategy.next(&ctx).map_err(|e| AlgoError::StrategyError {
                    strategy: strategy_name.clone(),
                    bar_index: index,
                    message: format!("{:#}", e),
                })?;
                action.validate().map_err(|message| AlgoError::StrategyError {
                    strategy: strategy_name.clone(),
                    bar_index: index,
                    message,
                })?;

                // 3. Route the decision according to the fill timing.
                if action != strategy::Action::Hold {
                    let order = event::OrderEvent::new(bar.datetime, index, action);
                    match self.config.fill_timing {
                        execution::FillTiming::SameBarClose => {
                            self.execute_action(order.action, &execution, &mut portfolio, bar, index)?;
                        }
                        execution::FillTiming::NextBarOpen => {
                            if index + 1 < bars.len() {
                                pending = Some(order);
                            } else {
                                tracing::debug!(?order, "order on the final bar has no fill bar; dropped");
                            }
                        }
                    }
                }
            }

            // 4. Mark to market at the close.
            portfolio.update_timeindex(bar);
        }

        let buy_and_hold_return_pct = match (self.series.first_close(), self.series.last_close()) {
            (Some(first), Some(last)) => (last / first - 1.0) * 100.0,
            _ => 0.0,
        };

        let (equity_curve, trades, open_position, total_commission) = portfolio.into_parts();
        let metrics = performance::compute(
            &equity_curve,
            &trades,
            self.config.initial_capital,
            buy_and_hold_return_pct,
            &self.metrics_config,
        );

        tracing::debug!(
            strategy = %strategy_name,
            trades = trades.len(),
            final_equity = metrics.get_equity_final(),
            "backtest finished"
        );

        Ok(BacktestReport {
            equity_curve,
            trades,
            open_position,
            total_commission,
            metrics,
        })
    }

    /// Applies one action at `bar`. Exits without a matching position are no-ops.
    fn execute_action(
        &self,
        action: strategy::Action,
        execution: &execution::SimulatedExecutionHandler,
        portfolio: &mut portfolio::Portfolio,
        bar: &data_handler::MarketBar,
        bar_index: usize,
    ) -> Result<(), AlgoError> {
        match action {
            strategy::Action::Hold => Ok(()),
            strategy::Action::EnterLong(size) => {
                self.enter(portfolio::PositionSide::Long, size, execution, portfolio, bar, bar_index)
            }
            strategy::Action::EnterShort(size) => {
                self.enter(portfolio::PositionSide::Short, size, execution, portfolio, bar, bar_index)
            }
            strategy::Action::ExitLong if portfolio.is_long() => {
                Self::close(execution, portfolio, bar, bar_index)
            }
            strategy::Action::ExitShort if portfolio.is_short() => {
                Self::close(execution, portfolio, bar, bar_index)
            }
            strategy::Action::ExitLong | strategy::Action::ExitShort => {
                tracing::trace!(bar_index, ?action, "no matching position; exit ignored");
                Ok(())
            }
        }
    }

    /// Opens `side`, closing an opposite position first. Same-side entries are ignored.
    fn enter(
        &self,
        side: portfolio::PositionSide,
        size: strategy::OrderSize,
        execution: &execution::SimulatedExecutionHandler,
        portfolio: &mut portfolio::Portfolio,
        bar: &data_handler::MarketBar,
        bar_index: usize,
    ) -> Result<(), AlgoError> {
        let current_side = portfolio.get_open_position().map(|open| open.side);
        if let Some(current) = current_side {
            if current == side {
                tracing::trace!(bar_index, ?side, "already positioned; entry ignored");
                return Ok(());
            }
            Self::close(execution, portfolio, bar, bar_index)?;
        }

        let price = execution.reference_price(bar);
        let quantity = pos_sizers::resolve_quantity(size, portfolio.get_cash(), price, self.config.commission_rate);
        if !(quantity > 0.0) {
            tracing::warn!(bar_index, cash = portfolio.get_cash(), price, "nothing affordable; entry skipped");
            return Ok(());
        }

        let fill = execution.execute_order(side.entry_direction(), quantity, bar, bar_index);
        tracing::trace!(?fill, "entry filled");
        portfolio.update_fill(&fill);
        Self::check_state(portfolio, bar_index)
    }

    fn close(
        execution: &execution::SimulatedExecutionHandler,
        portfolio: &mut portfolio::Portfolio,
        bar: &data_handler::MarketBar,
        bar_index: usize,
    ) -> Result<(), AlgoError> {
        let Some(open) = portfolio.get_open_position() else {
            return Ok(());
        };

        let fill = execution.execute_order(open.side.exit_direction(), open.size, bar, bar_index);
        tracing::trace!(?fill, "exit filled");
        portfolio.update_fill(&fill);
        Self::check_state(portfolio, bar_index)
    }

    /// Cash and position must stay finite after every fill.
    fn check_state(portfolio: &portfolio::Portfolio, bar_index: usize) -> Result<(), AlgoError> {
        if !portfolio.get_cash().is_finite() || !portfolio.position().is_finite() {
            return Err(AlgoError::invalid(format!(
                "account state became non-finite at bar {} (cash {}, position {})",
                bar_index,
                portfolio.get_cash(),
                portfolio.position()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn series(prices: &[(f64, f64)]) -> data_handler::PriceSeries {
        let start = chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap();
        let bars = prices
            .iter()
            .enumerate()
            .map(|(i, &(open, close))| {
                data_handler::MarketBar::new(
                    start + chrono::Duration::days(i as i64),
                    open,
                    open.max(close),
                    open.min(close),
                    close,
                )
            })
            .collect();
        data_handler::PriceSeries::new("TEST", "1d", bars).unwrap()
    }

    /// Replays a fixed list of actions, one per bar.
    struct Script {
        actions: Vec<strategy::Action>,
    }

    impl strategy::Strategy for Script {
        fn name(&self) -> &str {
            "script"
        }

        fn next(&mut self, ctx: &strategy::StrategyContext<'_>) -> anyhow::Result<strategy::Action> {
            Ok(self.actions.get(ctx.bar_index()).copied().unwrap_or_default())
        }
    }

    struct FailsAt(usize);

    impl strategy::Strategy for FailsAt {
        fn name(&self) -> &str {
            "fails"
        }

        fn next(&mut self, ctx: &strategy::StrategyContext<'_>) -> anyhow::Result<strategy::Action> {
            if ctx.bar_index() == self.0 {
                anyhow::bail!("indicator blew up");
            }
            Ok(strategy::Action::Hold)
        }
    }

    use crate::strategy::Action::{ExitLong, ExitShort, Hold};

    #[test]
    fn rejects_bad_config_and_empty_series() {
        let data = series(&[(10.0, 10.0)]);
        let mut script = Script { actions: vec![] };

        let bad_capital = Backtest::new(&data, BacktestConfig::new(0.0, 0.0)).run(&mut script);
        assert!(matches!(bad_capital, Err(AlgoError::InvalidInput(_))));

        let bad_commission = Backtest::new(&data, BacktestConfig::new(100.0, 1.0)).run(&mut script);
        assert!(matches!(bad_commission, Err(AlgoError::InvalidInput(_))));

        let empty = data_handler::PriceSeries::new("TEST", "1d", vec![]).unwrap();
        let result = Backtest::new(&empty, BacktestConfig::new(100.0, 0.0)).run(&mut script);
        assert!(matches!(result, Err(AlgoError::InvalidInput(_))));
    }

    #[test]
    fn next_bar_open_fills_on_following_bar() {
        let data = series(&[(10.0, 10.0), (11.0, 12.0), (12.0, 12.0), (13.0, 14.0)]);
        let mut script = Script {
            actions: vec![strategy::Action::enter_long(), Hold, ExitLong],
        };
        let report = Backtest::new(&data, BacktestConfig::new(1_100.0, 0.0))
            .run(&mut script)
            .unwrap();

        assert_eq!(report.trades.len(), 1);
        let trade = &report.trades[0];
        assert_eq!(trade.entry_bar, 1);
        assert_eq!(trade.exit_bar, 3);
        assert_eq!(trade.entry_price, 11.0);
        assert_eq!(trade.exit_price, 13.0);
        assert!((trade.size - 100.0).abs() < 1e-9);
        assert!((report.final_equity() - 1_300.0).abs() < 1e-9);
        assert!(report.open_position.is_none());
    }

    #[test]
    fn same_bar_close_round_trip_costs_two_commissions() {
        let data = series(&[(50.0, 50.0), (50.0, 50.0), (50.0, 50.0)]);
        let mut script = Script {
            actions: vec![strategy::Action::EnterLong(strategy::OrderSize::Units(10.0)), ExitLong],
        };
        let config = BacktestConfig::new(10_000.0, 0.01).with_fill_timing(execution::FillTiming::SameBarClose);
        let report = Backtest::new(&data, config).run(&mut script).unwrap();

        assert_eq!(report.trades.len(), 1);
        assert!((report.trades[0].pnl - (-2.0 * 50.0 * 10.0 * 0.01)).abs() < 1e-9);
        assert!((report.total_commission - 10.0).abs() < 1e-9);
        assert!((report.final_equity() - 9_990.0).abs() < 1e-9);
    }

    #[test]
    fn opposite_entry_flips_position() {
        let data = series(&[(10.0, 10.0), (10.0, 10.0), (8.0, 8.0), (8.0, 8.0)]);
        let mut script = Script {
            actions: vec![strategy::Action::enter_long(), strategy::Action::enter_short()],
        };
        let report = Backtest::new(&data, BacktestConfig::new(1_000.0, 0.0))
            .run(&mut script)
            .unwrap();

        assert_eq!(report.trades.len(), 1);
        assert_eq!(report.trades[0].side, portfolio::PositionSide::Long);
        assert!((report.trades[0].pnl + 200.0).abs() < 1e-9);

        let open = report.open_position.as_ref().unwrap();
        assert_eq!(open.side, portfolio::PositionSide::Short);
        assert_eq!(open.entry_bar, 2);
        assert!((open.size - 100.0).abs() < 1e-9);
    }

    #[test]
    fn repeated_entries_do_not_pyramid() {
        let data = series(&[(10.0, 10.0); 4]);
        let mut script = Script {
            actions: vec![
                strategy::Action::EnterLong(strategy::OrderSize::Units(1.0)),
                strategy::Action::EnterLong(strategy::OrderSize::Units(1.0)),
                strategy::Action::EnterLong(strategy::OrderSize::Units(1.0)),
            ],
        };
        let report = Backtest::new(&data, BacktestConfig::new(1_000.0, 0.0))
            .run(&mut script)
            .unwrap();

        assert_eq!(report.open_position.as_ref().map(|p| p.size), Some(1.0));
        assert!(report.equity_curve.iter().all(|p| p.position <= 1.0));
    }

    #[test]
    fn order_on_final_bar_is_dropped() {
        let data = series(&[(10.0, 10.0), (10.0, 11.0)]);
        let mut script = Script {
            actions: vec![Hold, strategy::Action::enter_long()],
        };
        let report = Backtest::new(&data, BacktestConfig::new(1_000.0, 0.0))
            .run(&mut script)
            .unwrap();

        assert!(report.open_position.is_none());
        assert_eq!(report.final_equity(), 1_000.0);
    }

    #[test]
    fn strategy_failure_reports_bar_index() {
        let data = series(&[(10.0, 10.0); 6]);
        let err = Backtest::new(&data, BacktestConfig::new(1_000.0, 0.0))
            .run(&mut FailsAt(4))
            .unwrap_err();

        assert_eq!(err.bar_index(), Some(4));
        assert!(err.to_string().contains("indicator blew up"));
    }

    #[test]
    fn invalid_action_is_a_strategy_error() {
        let data = series(&[(10.0, 10.0); 3]);
        let mut script = Script {
            actions: vec![Hold, strategy::Action::EnterLong(strategy::OrderSize::Fraction(1.5))],
        };
        let err = Backtest::new(&data, BacktestConfig::new(1_000.0, 0.0))
            .run(&mut script)
            .unwrap_err();
        assert_eq!(err.bar_index(), Some(1));
    }

    #[test]
    fn exits_while_flat_are_ignored() {
        let data = series(&[(10.0, 10.0); 3]);
        let mut script = Script {
            actions: vec![ExitLong, ExitShort],
        };
        let report = Backtest::new(&data, BacktestConfig::new(1_000.0, 0.0))
            .run(&mut script)
            .unwrap();
        assert!(report.trades.is_empty());
        assert_eq!(report.total_commission, 0.0);
    }
}
