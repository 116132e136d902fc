// algolab_core/src/execution.rs

//! Order execution simulation.
//!
//! The ExecutionHandler trait defines the contract for turning an order into a fill.
//! The SimulatedExecutionHandler fills at the bar price selected by the fill-timing policy
//! and folds a flat commission rate into the fill price.

use crate::event;
use crate::data_handler;

/// Which bar price an order fills at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillTiming {
    /// Open of the bar after the decision bar. No look-ahead.
    #[default]
    NextBarOpen,
    /// Close of the decision bar.
    SameBarClose,
}

/// Defines the interface for an execution handler.
pub trait ExecutionHandler {
    /// Market price an order fills at on `bar`.
    fn reference_price(&self, bar: &data_handler::MarketBar) -> f64;

    /// Executes `quantity` units in `direction` on `bar`.
    /// # Arguments
    /// * `direction` - Buy or sell.
    /// * `quantity` - Positive quantity.
    /// * `bar` - The fill bar.
    /// * `bar_index` - Index of the fill bar in the series.
    /// # Returns
    /// * The resulting `FillEvent`.
    fn execute_order(
        &self,
        direction: event::Direction,
        quantity: f64,
        bar: &data_handler::MarketBar,
        bar_index: usize,
    ) -> event::FillEvent;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedExecutionHandler {
    commission_rate: f64,
    fill_timing: FillTiming,
}

impl SimulatedExecutionHandler {
    pub fn new(commission_rate: f64, fill_timing: FillTiming) -> Self {
        Self {
            commission_rate,
            fill_timing,
        }
    }

    /// Commission-adjusted price for `direction`.
    pub fn adjusted_price(&self, direction: event::Direction, price: f64) -> f64 {
        price * (1.0 + direction.sign() * self.commission_rate)
    }
}

impl ExecutionHandler for SimulatedExecutionHandler {
    fn reference_price(&self, bar: &data_handler::MarketBar) -> f64 {
        match self.fill_timing {
            FillTiming::NextBarOpen => bar.open,
            FillTiming::SameBarClose => bar.close,
        }
    }

    fn execute_order(
        &self,
        direction: event::Direction,
        quantity: f64,
        bar: &data_handler::MarketBar,
        bar_index: usize,
    ) -> event::FillEvent {
        let market_price = self.reference_price(bar);
        let fill_price = self.adjusted_price(direction, market_price);
        let commission = quantity * market_price * self.commission_rate;

        event::FillEvent::new(
            bar.datetime,
            bar_index,
            direction,
            quantity,
            market_price,
            fill_price,
            commission,
        )
    }
}
