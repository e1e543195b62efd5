//! Risk engine: four-level circuit breaker with graded recovery and a
//! degraded-mode fallback.

pub mod drift;
pub mod engine;

pub use drift::{max_drift_z, DriftReading};
pub use engine::{evaluate_risk, evaluate_risk_or_degrade, RiskVerdict};
