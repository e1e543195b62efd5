//! Autonomous trading engine for NBA moneyline prediction markets.
//!
//! For each scheduled game the engine acquires two opposing positions (a
//! directional leg and a hedge leg), accumulates each via dollar-cost
//! averaging, redeems matched pairs back to collateral when the combined
//! cost basis leaves room, and settles the residue after the game.
//!
//! The process is a stateless heartbeat: every invocation reads state
//! from the SQLite store, performs bounded work, writes state back, and
//! exits. Nothing in memory survives across ticks.
//!
//! ## Modules
//!
//! - `config`: TOML + env + CLI configuration
//! - `store`: SQLite persistence (jobs, signals, merges, results, risk)
//! - `calibration`: price -> win-probability curve with uncertainty
//! - `sizing`: Kelly x capital x liquidity position sizing
//! - `strategy`: opportunity scanning, DCA cadence, merge economics
//! - `risk`: four-level circuit breaker with graded recovery
//! - `scheduler`: per-tick dispatch through the executors
//! - `order_manager`: maker-order TTL and cancel-and-reprice
//! - `settlement`: per-signal PnL after games resolve

pub mod calibration;
pub mod config;
pub mod heartbeat;
pub mod lock;
pub mod notify;
pub mod order_manager;
pub mod risk;
pub mod scheduler;
pub mod settlement;
pub mod sizing;
pub mod store;
pub mod strategy;

pub use calibration::{CalibrationCurve, WinRateEstimate};
pub use config::{BotConfig, ExecutionMode};
pub use notify::Notifier;
pub use scheduler::{run_tick, TickContext, TickReport};
pub use store::Store;
