//! DCA entry cadence: a TWAP schedule with an adaptive price overlay.
//!
//! Pure logic, no store or market access. The executor supplies the
//! group's existing entries and the decision comes back with a reason
//! string that lands in the logs.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::DcaConfig;

/// One existing entry of a DCA group.
#[derive(Debug, Clone)]
pub struct DcaEntry {
    pub price: Decimal,
    pub size_usd: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Why (or why not) an entry fires now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DcaTrigger {
    /// The next TWAP slice is due.
    Scheduled,
    /// Price dipped below the favorable threshold; buy ahead of schedule.
    FavorablePrice,
    MaxReached,
    NoPreviousEntry,
    PriceSpreadExceeded,
    WindowClosed,
    TooSoon,
    /// Slice due but price is unfavorable; wait one tick.
    Deferred,
    SliceNotDue,
}

impl DcaTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            DcaTrigger::Scheduled => "scheduled",
            DcaTrigger::FavorablePrice => "favorable_price",
            DcaTrigger::MaxReached => "max_reached",
            DcaTrigger::NoPreviousEntry => "no_previous_entry",
            DcaTrigger::PriceSpreadExceeded => "price_spread_exceeded",
            DcaTrigger::WindowClosed => "window_closed",
            DcaTrigger::TooSoon => "too_soon",
            DcaTrigger::Deferred => "deferred",
            DcaTrigger::SliceNotDue => "slice_not_due",
        }
    }
}

/// Outcome of a DCA check.
#[derive(Debug, Clone)]
pub struct DcaDecision {
    pub should_buy: bool,
    pub trigger: DcaTrigger,
    pub current_price: Decimal,
    pub vwap: Decimal,
    /// Sequence number the next entry would take.
    pub next_sequence: u32,
}

/// Decide whether to add a DCA entry.
///
/// Priority order: max-entries, first-entry precondition, drift guard,
/// tipoff cutoff, minimum interval, then the TWAP schedule with the
/// favorable/unfavorable overlay.
pub fn should_add_entry(
    current_price: Decimal,
    entries: &[DcaEntry],
    tipoff: DateTime<Utc>,
    now: DateTime<Utc>,
    config: &DcaConfig,
) -> DcaDecision {
    let next_sequence = entries.len() as u32 + 1;
    let vwap = court_common::vwap_from_costs(
        &entries.iter().map(|e| e.size_usd).collect::<Vec<_>>(),
        &entries.iter().map(|e| e.price).collect::<Vec<_>>(),
    );
    let decision = |should_buy, trigger| DcaDecision {
        should_buy,
        trigger,
        current_price,
        vwap,
        next_sequence,
    };

    if entries.len() as u32 >= config.max_entries {
        return decision(false, DcaTrigger::MaxReached);
    }
    // The first entry is the scheduler's job, not DCA's.
    let Some(first) = entries.first() else {
        return decision(false, DcaTrigger::NoPreviousEntry);
    };
    let Some(last) = entries.last() else {
        return decision(false, DcaTrigger::NoPreviousEntry);
    };

    if first.price > Decimal::ZERO && (current_price - first.price).abs() > config.max_price_spread {
        return decision(false, DcaTrigger::PriceSpreadExceeded);
    }

    let cutoff = tipoff - Duration::minutes(config.cutoff_before_tipoff_min);
    if now >= cutoff {
        return decision(false, DcaTrigger::WindowClosed);
    }

    if now - last.created_at < Duration::minutes(config.min_interval_min) {
        return decision(false, DcaTrigger::TooSoon);
    }

    let favorable = first.price > Decimal::ZERO
        && current_price <= first.price * (Decimal::ONE - config.favorable_price_pct / dec!(100));
    let unfavorable = first.price > Decimal::ZERO
        && current_price > first.price * (Decimal::ONE + config.unfavorable_price_pct / dec!(100));

    if slice_due(entries, tipoff, now, config) {
        if unfavorable {
            return decision(false, DcaTrigger::Deferred);
        }
        return decision(true, DcaTrigger::Scheduled);
    }
    if favorable {
        return decision(true, DcaTrigger::FavorablePrice);
    }
    decision(false, DcaTrigger::SliceNotDue)
}

/// Whether the next TWAP slice time has arrived.
///
/// Slices are spaced evenly from the first entry to the cutoff; slice 0
/// is the initial entry itself.
fn slice_due(entries: &[DcaEntry], tipoff: DateTime<Utc>, now: DateTime<Utc>, config: &DcaConfig) -> bool {
    let Some(first) = entries.first() else {
        return false;
    };
    if config.max_entries <= 1 {
        return false;
    }
    let cutoff = tipoff - Duration::minutes(config.cutoff_before_tipoff_min);
    let window = (cutoff - first.created_at).num_seconds();
    if window <= 0 {
        return false;
    }
    let interval = window / i64::from(config.max_entries - 1);
    let next_index = entries.len() as i64; // entries[0] is slice 0
    if next_index >= i64::from(config.max_entries) {
        return false;
    }
    let due_at = first.created_at + Duration::seconds(interval * next_index);
    now >= due_at
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> DcaConfig {
        DcaConfig {
            max_entries: 5,
            min_interval_min: 30,
            max_price_spread: dec!(0.15),
            favorable_price_pct: dec!(0),
            unfavorable_price_pct: dec!(10),
            cutoff_before_tipoff_min: 30,
            per_entry_cap_mult: dec!(2.0),
            min_order_usd: dec!(1),
        }
    }

    fn entry(price: Decimal, at: DateTime<Utc>) -> DcaEntry {
        DcaEntry {
            price,
            size_usd: dec!(20),
            created_at: at,
        }
    }

    #[test]
    fn test_max_entries_stops() {
        let now = Utc::now();
        let tipoff = now + Duration::hours(5);
        let entries: Vec<DcaEntry> = (0..5)
            .map(|i| entry(dec!(0.40), now - Duration::hours(5 - i)))
            .collect();
        let d = should_add_entry(dec!(0.40), &entries, tipoff, now, &cfg());
        assert!(!d.should_buy);
        assert_eq!(d.trigger, DcaTrigger::MaxReached);
    }

    #[test]
    fn test_no_first_entry() {
        let now = Utc::now();
        let d = should_add_entry(dec!(0.40), &[], now + Duration::hours(5), now, &cfg());
        assert_eq!(d.trigger, DcaTrigger::NoPreviousEntry);
    }

    #[test]
    fn test_drift_guard() {
        let now = Utc::now();
        let tipoff = now + Duration::hours(5);
        let entries = vec![entry(dec!(0.40), now - Duration::hours(2))];
        let d = should_add_entry(dec!(0.60), &entries, tipoff, now, &cfg());
        assert_eq!(d.trigger, DcaTrigger::PriceSpreadExceeded);
        // Downward drift trips the same guard.
        let d = should_add_entry(dec!(0.20), &entries, tipoff, now, &cfg());
        assert_eq!(d.trigger, DcaTrigger::PriceSpreadExceeded);
    }

    #[test]
    fn test_cutoff_closes_window() {
        let now = Utc::now();
        let tipoff = now + Duration::minutes(20); // inside the 30-min cutoff
        let entries = vec![entry(dec!(0.40), now - Duration::hours(2))];
        let d = should_add_entry(dec!(0.40), &entries, tipoff, now, &cfg());
        assert_eq!(d.trigger, DcaTrigger::WindowClosed);
    }

    #[test]
    fn test_min_interval() {
        let now = Utc::now();
        let tipoff = now + Duration::hours(5);
        let entries = vec![entry(dec!(0.40), now - Duration::minutes(10))];
        let d = should_add_entry(dec!(0.40), &entries, tipoff, now, &cfg());
        assert_eq!(d.trigger, DcaTrigger::TooSoon);
    }

    #[test]
    fn test_scheduled_slice_fires() {
        let now = Utc::now();
        // First entry 4h ago, tipoff in 2h30 => cutoff in 2h, window 6h,
        // slice interval 1.5h; slice 1 was due 2.5h ago.
        let tipoff = now + Duration::minutes(150);
        let entries = vec![entry(dec!(0.40), now - Duration::hours(4))];
        let d = should_add_entry(dec!(0.41), &entries, tipoff, now, &cfg());
        assert!(d.should_buy);
        assert_eq!(d.trigger, DcaTrigger::Scheduled);
        assert_eq!(d.next_sequence, 2);
    }

    #[test]
    fn test_unfavorable_defers_scheduled_slice() {
        let now = Utc::now();
        let tipoff = now + Duration::minutes(150);
        let entries = vec![entry(dec!(0.40), now - Duration::hours(4))];
        // +12.5% > unfavorable threshold 10%
        let d = should_add_entry(dec!(0.45), &entries, tipoff, now, &cfg());
        assert!(!d.should_buy);
        assert_eq!(d.trigger, DcaTrigger::Deferred);
    }

    #[test]
    fn test_favorable_price_pulls_forward() {
        let now = Utc::now();
        // Slice not due yet: first entry 31 min ago with a long window.
        let tipoff = now + Duration::hours(10);
        let entries = vec![entry(dec!(0.40), now - Duration::minutes(31))];
        let d = should_add_entry(dec!(0.38), &entries, tipoff, now, &cfg());
        assert!(d.should_buy);
        assert_eq!(d.trigger, DcaTrigger::FavorablePrice);
    }

    #[test]
    fn test_slice_not_due_flat_price() {
        let now = Utc::now();
        let tipoff = now + Duration::hours(10);
        let mut config = cfg();
        // favorable requires a real dip
        config.favorable_price_pct = dec!(2);
        let entries = vec![entry(dec!(0.40), now - Duration::minutes(31))];
        let d = should_add_entry(dec!(0.40), &entries, tipoff, now, &config);
        assert!(!d.should_buy);
        assert_eq!(d.trigger, DcaTrigger::SliceNotDue);
    }

    #[test]
    fn test_vwap_carried_on_decision() {
        let now = Utc::now();
        let tipoff = now + Duration::hours(5);
        let entries = vec![
            entry(dec!(0.40), now - Duration::hours(3)),
            entry(dec!(0.50), now - Duration::hours(1)),
        ];
        let d = should_add_entry(dec!(0.45), &entries, tipoff, now, &cfg());
        // vwap of $20@0.40 (50 sh) + $20@0.50 (40 sh) = 40/90
        let expected = dec!(40) / dec!(90);
        assert!((d.vwap - expected).abs() < dec!(0.0000001));
        assert_eq!(d.next_sequence, 3);
    }
}
