// algolab_core/src/event.rs

//! Order and fill records passed between the engine, the execution handler and the portfolio.

use crate::strategy;

/// Side of a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    /// `+1` for buys, `-1` for sells.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Buy => 1.0,
            Direction::Sell => -1.0,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Buy => write!(f, "BUY"),
            Direction::Sell => write!(f, "SELL"),
        }
    }
}

// ORDER EVENT
/// A strategy decision that changes the position, waiting for its fill bar.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderEvent {
    /// Time of the decision bar.
    pub timeindex: chrono::DateTime<chrono::Utc>,
    /// Index of the decision bar.
    pub bar_index: usize,
    pub action: strategy::Action,
}

impl OrderEvent {
    pub fn new(
        timeindex: chrono::DateTime<chrono::Utc>,
        bar_index: usize,
        action: strategy::Action,
    ) -> Self {
        Self {
            timeindex,
            bar_index,
            action,
        }
    }
}

// FILL EVENT
/// A simulated execution.
#[derive(Debug, Clone, PartialEq)]
pub struct FillEvent {
    pub timeindex: chrono::DateTime<chrono::Utc>,
    pub bar_index: usize,
    pub direction: Direction,
    /// Always positive.
    pub quantity: f64,
    /// Market price before commission.
    pub market_price: f64,
    /// Price after commission: `market_price * (1 ± commission_rate)`.
    pub fill_price: f64,
    /// Commission paid on this fill.
    pub commission: f64,
}

impl FillEvent {
    pub fn new(
        timeindex: chrono::DateTime<chrono::Utc>,
        bar_index: usize,
        direction: Direction,
        quantity: f64,
        market_price: f64,
        fill_price: f64,
        commission: f64,
    ) -> Self {
        Self {
            timeindex,
            bar_index,
            direction,
            quantity,
            market_price,
            fill_price,
            commission,
        }
    }

    /// Cash change caused by the fill.
    pub fn cash_delta(&self) -> f64 {
        -self.direction.sign() * self.quantity * self.fill_price
    }
}
