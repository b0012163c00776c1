//! Property tests for the tick normalizer.
//!
//! Checks the guarantees downstream stages rely on: identical input gives
//! identical output, counters always balance, and the accepted stream is
//! ordered and duplicate-free.

use std::collections::{HashMap, HashSet};

use ingestion::{NormalizerConfig, TickNormalizer};
use proptest::prelude::*;
use types::tick::RawTick;

fn arb_raw_tick() -> impl Strategy<Value = RawTick> {
    (
        prop::sample::select(vec!["mock", "finnhub", "alpaca-ws", "polygon"]),
        prop::sample::select(vec!["aapl", "MSFT", "tsla"]),
        0i64..50,
        prop::sample::select(vec![100.0, 100.5, 101.0, -1.0]),
        prop::sample::select(vec![1.0, 10.0, 0.0]),
    )
        .prop_map(|(source, symbol, ts, price, size)| {
            RawTick::new(source, symbol, 1_700_000_000_000 + ts * 250, price, size)
        })
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn run(config: &NormalizerConfig, ticks: &[RawTick]) -> (Vec<String>, TickNormalizer) {
    let mut normalizer = TickNormalizer::new(config.clone());
    let hashes = normalizer
        .process_batch(ticks)
        .iter()
        .map(|t| t.tick_hash().to_hex())
        .collect();
    (hashes, normalizer)
}

proptest! {
    /// Same input, same configuration: same accepted stream.
    #[test]
    fn prop_normalization_is_deterministic(
        ticks in prop::collection::vec(arb_raw_tick(), 0..200),
        window in 0usize..64,
        enforce in any::<bool>(),
    ) {
        let config = NormalizerConfig { dedup_window: window, enforce_ordering: enforce };
        init_tracing();
        let (first, a) = run(&config, &ticks);
        let (second, b) = run(&config, &ticks);
        prop_assert_eq!(first, second);
        prop_assert_eq!(a.stats(), b.stats());
    }

    /// Every received tick is accounted for exactly once.
    #[test]
    fn prop_counters_balance(ticks in prop::collection::vec(arb_raw_tick(), 0..200)) {
        let (_, normalizer) = run(&NormalizerConfig::default(), &ticks);
        let stats = normalizer.stats();
        prop_assert_eq!(stats.received, ticks.len() as u64);
        prop_assert!(stats.is_balanced());
    }

    /// With ordering on, each symbol's accepted timestamps never decrease.
    #[test]
    fn prop_accepted_ticks_are_ordered(ticks in prop::collection::vec(arb_raw_tick(), 0..200)) {
        let mut normalizer = TickNormalizer::new(NormalizerConfig {
            dedup_window: 1_000,
            enforce_ordering: true,
        });
        let mut last: HashMap<String, i64> = HashMap::new();
        for tick in normalizer.process_batch(&ticks) {
            if let Some(prev) = last.get(&tick.symbol) {
                prop_assert!(tick.ts_ms >= *prev);
            }
            last.insert(tick.symbol.clone(), tick.ts_ms);
        }
    }

    /// A window larger than the input never lets a duplicate through.
    #[test]
    fn prop_no_duplicates_within_window(ticks in prop::collection::vec(arb_raw_tick(), 0..200)) {
        let config = NormalizerConfig { dedup_window: 1_000, enforce_ordering: false };
        let (hashes, _) = run(&config, &ticks);
        let unique: HashSet<&String> = hashes.iter().collect();
        prop_assert_eq!(unique.len(), hashes.len());
    }
}
