//! Backtester
//!
//! Replays a historical series of prices and composite scores through the
//! decision engine, the strategy layer and the static risk checks, using a
//! simulated portfolio and the bar timestamps as its clock.

mod config;
mod runner;

pub use config::{load_bars, BacktestConfig, HistoricalBar};
pub use runner::{BacktestError, BacktestResult, BacktestTrade, Backtester, EquityPoint};
