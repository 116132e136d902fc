// algolab_core/src/lib.rs

//! Backtesting core: price series, the strategy contract, the bar-by-bar simulation engine,
//! the metrics calculator and the parameter-grid optimizer.

pub mod error;
pub mod event;
pub mod utils;
pub mod backtest;
pub mod strategy;
pub mod settings;
pub mod portfolio;
pub mod execution;
pub mod indicators;
pub mod pos_sizers;
pub mod performance;
pub mod data_handler;
pub mod optimization;

pub use error::AlgoError;
