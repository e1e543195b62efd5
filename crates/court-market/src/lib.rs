//! Prediction-market integration library.
//!
//! Provides the external interfaces of the trading engine:
//! - `MarketClient`: abstract capability set (price, book, orders, redeem)
//! - CLOB HTTP client with L1 (EIP-712) / L2 (HMAC) auth
//! - CTF redeem path for EOA and 1-of-1 proxy wallets
//! - NBA schedule discovery
//!
//! The engine crate (`court-bot`) depends only on the trait and types;
//! live wiring happens at the binary boundary.

pub mod auth;
pub mod client;
pub mod clob;
pub mod ctf;
pub mod discovery;
pub mod orderbook;
pub mod types;

pub use auth::{ApiCredentials, AuthHeaders, ClobAuth};
pub use client::{MarketClient, MarketError};
pub use clob::{ClobClient, ClobConfig};
pub use ctf::{CtfConfig, CtfMerger, WalletKind};
pub use discovery::{fetch_games_for_date, DiscoveryConfig, DiscoveryError};
pub use orderbook::{LiquiditySnapshot, OrderBook};
pub use types::{
    GameInfo, GamePrice, GameStatus, MergeReceipt, MoneylineMarket, OrderLifecycle, OrderState,
};
