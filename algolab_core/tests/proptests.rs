use algolab_core::backtest::{Backtest, BacktestConfig};
use algolab_core::data_handler::{MarketBar, PriceSeries};
use algolab_core::execution::FillTiming;
use algolab_core::performance;
use algolab_core::strategy::{Action, OrderSize, Strategy, StrategyContext};
use chrono::TimeZone;
use proptest::prelude::*;
use proptest::strategy::Strategy as _;

fn series_from(prices: &[(f64, f64)]) -> PriceSeries {
    let start = chrono::Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).single().unwrap();
    let bars = prices
        .iter()
        .enumerate()
        .map(|(i, &(open, close))| {
            MarketBar::new(
                start + chrono::Duration::hours(i as i64),
                open,
                open.max(close),
                open.min(close),
                close,
            )
        })
        .collect();
    PriceSeries::new("SOLUSD", "1h", bars).unwrap()
}

/// Replays a fixed script of actions, one per bar.
struct Scripted {
    script: Vec<u8>,
}

impl Strategy for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn next(&mut self, ctx: &StrategyContext<'_>) -> anyhow::Result<Action> {
        let code = self.script.get(ctx.bar_index()).copied().unwrap_or(0);
        Ok(match code {
            1 => Action::enter_long(),
            2 => Action::ExitLong,
            3 => Action::EnterShort(OrderSize::Fraction(0.5)),
            4 => Action::ExitShort,
            _ => Action::Hold,
        })
    }
}

fn scenario() -> impl proptest::strategy::Strategy<Value = (Vec<(f64, f64)>, Vec<u8>)> {
    prop::collection::vec((1.0f64..1_000.0, 1.0f64..1_000.0), 2..80).prop_flat_map(|prices| {
        let n = prices.len();
        (Just(prices), prop::collection::vec(0u8..5, n))
    })
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    #[test]
    fn equity_reconciles_for_any_action_sequence(
        (prices, script) in scenario(),
        rate in 0.0f64..0.01,
        same_bar in any::<bool>(),
    ) {
        let data = series_from(&prices);
        let timing = if same_bar { FillTiming::SameBarClose } else { FillTiming::NextBarOpen };
        let initial = 50_000.0;
        let config = BacktestConfig::new(initial, rate).with_fill_timing(timing);
        let report = Backtest::new(&data, config).run(&mut Scripted { script }).unwrap();

        let last_close = prices[prices.len() - 1].1;
        let gross_realized: f64 = report.trades.iter().map(|t| t.pnl + t.commission).sum();
        let unrealized = report
            .open_position
            .as_ref()
            .map(|open| open.unrealized_pnl(last_close))
            .unwrap_or(0.0);
        let expected = initial + gross_realized + unrealized - report.total_commission;

        prop_assert_eq!(report.equity_curve.len(), prices.len());
        prop_assert!((report.final_equity() - expected).abs() <= 1e-6 * initial.max(report.final_equity().abs()));
    }

    #[test]
    fn max_drawdown_bounds_every_bar(
        (prices, script) in scenario(),
    ) {
        let data = series_from(&prices);
        let report = Backtest::new(&data, BacktestConfig::new(10_000.0, 0.001))
            .run(&mut Scripted { script })
            .unwrap();

        let max_dd = report.metrics.get_max_drawdown_pct();
        prop_assert!(max_dd >= 0.0);
        for point in &report.equity_curve {
            prop_assert!(point.drawdown_pct <= max_dd + 1e-9);
        }
    }

    #[test]
    fn holding_cash_never_changes_equity(
        prices in prop::collection::vec((1.0f64..1_000.0, 1.0f64..1_000.0), 1..60),
    ) {
        let data = series_from(&prices);
        let report = Backtest::new(&data, BacktestConfig::new(1_000.0, 0.002))
            .run(&mut Scripted { script: Vec::new() })
            .unwrap();

        prop_assert!(report.equity_curve.iter().all(|p| p.equity == 1_000.0));
        prop_assert_eq!(report.metrics.get_return_pct(), 0.0);
        prop_assert_eq!(report.metrics.get_max_drawdown_pct(), 0.0);
    }

    #[test]
    fn drawdown_episodes_never_exceed_one_hundred_percent_for_positive_equity(
        equity in prop::collection::vec(1.0f64..10_000.0, 1..100),
    ) {
        let start = chrono::Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).single().unwrap();
        let curve: Vec<_> = equity
            .iter()
            .enumerate()
            .map(|(i, &equity)| algolab_core::portfolio::EquityPoint {
                datetime: start + chrono::Duration::days(i as i64),
                cash: equity,
                position: 0.0,
                position_value: 0.0,
                equity,
                drawdown_pct: 0.0,
            })
            .collect();

        for episode in performance::drawdown_episodes(&curve, 5_000.0) {
            prop_assert!(episode.depth_pct > 0.0 && episode.depth_pct < 100.0);
            prop_assert!(episode.end >= episode.start);
        }
    }
}
