//! Property tests for bar aggregation and canonical hashing.

use proptest::prelude::*;
use types::bar::{Bar, BarState};
use types::hashing::canonical_f64;
use types::tick::{CanonicalTick, TickSourceKind};
use types::timeframe::Timeframe;

fn arb_timeframe() -> impl Strategy<Value = Timeframe> {
    prop::sample::select(Timeframe::all().to_vec())
}

fn arb_prices() -> impl Strategy<Value = Vec<(f64, f64)>> {
    prop::collection::vec((0.01f64..10_000.0, 0.0f64..500.0), 1..64)
}

fn build_bar(prices: &[(f64, f64)]) -> Bar {
    let mut bar = Bar::new("AAPL", Timeframe::M1, 7, 420_000, 480_000);
    for (i, (price, size)) in prices.iter().enumerate() {
        let tick = CanonicalTick::new(TickSourceKind::Mock, "AAPL", 420_000 + i as i64, *price, *size);
        bar.apply(&tick).unwrap();
    }
    bar
}

proptest! {
    /// Any sequence of ticks leaves high and low bracketing open and close.
    #[test]
    fn prop_ohlc_bounds_hold(prices in arb_prices()) {
        let bar = build_bar(&prices);
        prop_assert!(bar.is_valid());
        prop_assert_eq!(bar.tick_count(), prices.len() as u64);
        prop_assert_eq!(bar.open(), Some(prices[0].0));
        prop_assert_eq!(bar.close(), Some(prices[prices.len() - 1].0));

        let high = bar.high().unwrap();
        let low = bar.low().unwrap();
        prop_assert!(prices.iter().all(|(p, _)| *p <= high && *p >= low));
    }

    /// Rebuilding from the projection never changes the hash, whatever the state.
    #[test]
    fn prop_projection_rebuild_keeps_hash(prices in arb_prices()) {
        let mut bar = build_bar(&prices);
        bar.confirm().unwrap();
        let rebuilt = Bar::from_parts(bar.canonical_projection(), BarState::Historical);
        prop_assert_eq!(rebuilt.hash(), bar.hash());
    }

    /// The canonical float text parses back to the same value.
    #[test]
    fn prop_canonical_f64_round_trips(value in prop::num::f64::NORMAL | prop::num::f64::ZERO) {
        let parsed: f64 = canonical_f64(value).parse().unwrap();
        prop_assert_eq!(parsed, if value == 0.0 { 0.0 } else { value });
    }

    /// Aligned starts are boundaries and contain the timestamp.
    #[test]
    fn prop_alignment_contains_timestamp(
        timeframe in arb_timeframe(),
        ts in -10_000_000_000_000i64..10_000_000_000_000,
    ) {
        let start = timeframe.align_to_boundary(ts);
        let duration = timeframe.duration_ms();
        prop_assert_eq!(start.rem_euclid(duration), 0);
        prop_assert!(start <= ts && ts < start + duration);
    }
}
