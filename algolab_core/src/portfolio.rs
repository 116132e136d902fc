// algolab_core/src/portfolio.rs

//! Simulated account state for one run: cash, the open position, the trade log and the
//! mark-to-market equity curve. Mutated only through fills and bar updates.

use crate::event;
use crate::data_handler;
use crate::performance;

/// Side of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn sign(&self) -> f64 {
        match self {
            PositionSide::Long => 1.0,
            PositionSide::Short => -1.0,
        }
    }

    /// Fill direction that opens this side.
    pub fn entry_direction(&self) -> event::Direction {
        match self {
            PositionSide::Long => event::Direction::Buy,
            PositionSide::Short => event::Direction::Sell,
        }
    }

    /// Fill direction that closes this side.
    pub fn exit_direction(&self) -> event::Direction {
        match self {
            PositionSide::Long => event::Direction::Sell,
            PositionSide::Short => event::Direction::Buy,
        }
    }
}

/// A closed round trip.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Trade {
    pub side: PositionSide,
    /// Always positive.
    pub size: f64,
    pub entry_bar: usize,
    pub exit_bar: usize,
    pub entry_time: chrono::DateTime<chrono::Utc>,
    pub exit_time: chrono::DateTime<chrono::Utc>,
    /// Commission-adjusted entry fill price.
    pub entry_price: f64,
    /// Commission-adjusted exit fill price.
    pub exit_price: f64,
    /// Realized P&L net of commission on both legs.
    pub pnl: f64,
    /// Commission paid on both legs.
    pub commission: f64,
}

impl Trade {
    /// P&L relative to the entry notional, in percent.
    pub fn return_pct(&self) -> f64 {
        let notional = self.entry_price * self.size;
        if notional == 0.0 {
            return 0.0;
        }
        self.pnl / notional * 100.0
    }

    pub fn duration(&self) -> chrono::Duration {
        self.exit_time - self.entry_time
    }
}

/// The position held at some point of the run.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct OpenPosition {
    pub side: PositionSide,
    pub size: f64,
    pub entry_bar: usize,
    pub entry_time: chrono::DateTime<chrono::Utc>,
    /// Commission-adjusted entry fill price.
    pub entry_price: f64,
    /// Market price of the entry fill.
    pub entry_market_price: f64,
    pub entry_commission: f64,
}

impl OpenPosition {
    pub fn signed_quantity(&self) -> f64 {
        self.side.sign() * self.size
    }

    /// Unrealized P&L against the entry market price, before commission.
    pub fn unrealized_pnl(&self, mark: f64) -> f64 {
        (mark - self.entry_market_price) * self.signed_quantity()
    }
}

/// One equity-curve sample, taken at a bar's close.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct EquityPoint {
    pub datetime: chrono::DateTime<chrono::Utc>,
    pub cash: f64,
    /// Signed quantity held.
    pub position: f64,
    pub position_value: f64,
    pub equity: f64,
    /// Decline from the running peak, in percent.
    pub drawdown_pct: f64,
}

/// Run-state of the simulated account.
#[derive(Debug, Clone)]
pub struct Portfolio {
    cash: f64,
    open_position: Option<OpenPosition>,
    trades: Vec<Trade>,
    equity_curve: Vec<EquityPoint>,
    peak_equity: f64,
    total_commission: f64,
}

impl Portfolio {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            cash: initial_capital,
            open_position: None,
            trades: Vec::new(),
            equity_curve: Vec::new(),
            peak_equity: initial_capital,
            total_commission: 0.0,
        }
    }

    /// Applies a fill: opens a position when flat, closes it when the fill is on the exit side.
    ///
    /// # Returns
    /// * The closed `Trade`, if the fill closed a position.
    pub fn update_fill(&mut self, fill: &event::FillEvent) -> Option<Trade> {
        self.cash += fill.cash_delta();
        self.total_commission += fill.commission;

        match self.open_position.take() {
            None => {
                let side = match fill.direction {
                    event::Direction::Buy => PositionSide::Long,
                    event::Direction::Sell => PositionSide::Short,
                };
                self.open_position = Some(OpenPosition {
                    side,
                    size: fill.quantity,
                    entry_bar: fill.bar_index,
                    entry_time: fill.timeindex,
                    entry_price: fill.fill_price,
                    entry_market_price: fill.market_price,
                    entry_commission: fill.commission,
                });
                None
            }
            Some(open) => {
                let pnl = (fill.fill_price - open.entry_price) * open.signed_quantity();
                let trade = Trade {
                    side: open.side,
                    size: open.size,
                    entry_bar: open.entry_bar,
                    exit_bar: fill.bar_index,
                    entry_time: open.entry_time,
                    exit_time: fill.timeindex,
                    entry_price: open.entry_price,
                    exit_price: fill.fill_price,
                    pnl,
                    commission: open.entry_commission + fill.commission,
                };
                tracing::trace!(?trade, "position closed");
                self.trades.push(trade.clone());
                Some(trade)
            }
        }
    }

    /// Appends the equity point of `bar`, marked at its close.
    pub fn update_timeindex(&mut self, bar: &data_handler::MarketBar) -> &EquityPoint {
        let position = self.position();
        let position_value = position * bar.close;
        let equity = self.cash + position_value;
        self.peak_equity = self.peak_equity.max(equity);

        self.equity_curve.push(EquityPoint {
            datetime: bar.datetime,
            cash: self.cash,
            position,
            position_value,
            equity,
            drawdown_pct: performance::drawdown_pct(self.peak_equity, equity),
        });

        &self.equity_curve[self.equity_curve.len() - 1]
    }

    /// Consumes the run-state.
    pub fn into_parts(self) -> (Vec<EquityPoint>, Vec<Trade>, Option<OpenPosition>, f64) {
        (
            self.equity_curve,
            self.trades,
            self.open_position,
            self.total_commission,
        )
    }

    // --- Getters ---

    pub fn position(&self) -> f64 {
        self.open_position
            .as_ref()
            .map(|open| open.signed_quantity())
            .unwrap_or(0.0)
    }

    pub fn is_long(&self) -> bool {
        self.position() > 0.0
    }

    pub fn is_short(&self) -> bool {
        self.position() < 0.0
    }

    pub fn get_open_position(&self) -> Option<&OpenPosition> {
        self.open_position.as_ref()
    }

    pub fn get_cash(&self) -> f64 {
        self.cash
    }

    pub fn get_trades(&self) -> &[Trade] {
        &self.trades
    }

    /// Equity marked at `price`.
    pub fn equity_at(&self, price: f64) -> f64 {
        self.cash + self.position() * price
    }
}
