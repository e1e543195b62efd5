//! Trading strategy: calibration scanning, DCA cadence, merge economics.

pub mod dca;
pub mod merge;
pub mod scanner;

pub use dca::{should_add_entry, DcaDecision, DcaEntry, DcaTrigger};
pub use merge::{combined_vwap, mergeable_shares, min_margin, should_merge, MergeDecision, MergeEconomics};
pub use scanner::{evaluate_game, ev_per_dollar, Opportunity, GameEvaluation};
