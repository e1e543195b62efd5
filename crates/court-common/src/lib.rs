//! Shared types and utilities for the NBA prediction-market trading engine.
//!
//! This crate contains:
//! - Common types (Side, LegSide, OrderBookLevel)
//! - The event-slug convention (`nba-{away}-{home}-YYYY-MM-DD`, ET date)
//! - Cost-weighted-mean (VWAP) helpers shared by sizing, merge, and settlement

pub mod slug;
pub mod types;
pub mod vwap;

pub use slug::{build_event_slug, eastern_game_date, parse_event_slug, SlugParts};
pub use types::{LegSide, OrderBookLevel, Side};
pub use vwap::{shares_from_costs, vwap, vwap_from_costs};
