//! Position sizing: Kelly at the calibration lower bound, constrained by
//! capital, liquidity, and hard caps.

pub mod position;
pub mod score;

pub use position::{
    dca_budget, size_position, target_order_size, Binding, CompletionReason, DcaBudget,
    SizingInputs, SizingResult, TargetOrderResult,
};
pub use score::{score_liquidity, LiquidityScore};
