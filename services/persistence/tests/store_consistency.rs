//! Store consistency tests
//!
//! Whatever tier answers, a read must hash like a repository-only read.
//! Covered here across cache sizes, repository kinds and concurrent writers.

use std::sync::Arc;
use std::thread;

use persistence::{
    BarRepository, JournalBarRepository, JournalConfig, MemoryBarRepository, TieredBarStore,
};
use proptest::prelude::*;
use tempfile::TempDir;
use types::bar::Bar;
use types::tick::{CanonicalTick, TickSourceKind};
use types::timeframe::Timeframe;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn confirmed_bar(symbol: &str, index: i64, prices: &[f64]) -> Bar {
    let start = index * 60_000;
    let mut bar = Bar::new(symbol, Timeframe::M1, index, start, start + 60_000);
    for (i, price) in prices.iter().enumerate() {
        let tick = CanonicalTick::new(TickSourceKind::Mock, symbol, start + i as i64, *price, 1.0);
        bar.apply(&tick).unwrap();
    }
    bar.confirm().unwrap();
    bar
}

fn assert_tiers_agree(store: &TieredBarStore, repository: &dyn BarRepository, bars: &[Bar]) {
    for bar in bars {
        let key = bar.key();
        let via_store = store
            .get(&key.symbol, key.timeframe, key.bar_index)
            .unwrap()
            .unwrap();
        let via_repo = repository.get(&key).unwrap().unwrap();
        assert_eq!(via_store.hash(), via_repo.hash());
        assert_eq!(via_store.hash(), bar.hash());
    }
}

/// Reads agree with the repository before and after the cache is cleared.
#[test]
fn test_journal_backed_store_consistency() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let repository = Arc::new(JournalBarRepository::open(JournalConfig::new(dir.path())).unwrap());
    let store = TieredBarStore::new(repository.clone(), 3);

    let bars: Vec<Bar> = (0..12)
        .map(|i| confirmed_bar("MSFT", i, &[400.0 + i as f64, 401.0, 399.5]))
        .collect();
    store.save_all(&bars).unwrap();

    assert_tiers_agree(&store, repository.as_ref(), &bars);
    store.clear_cache().unwrap();
    assert_tiers_agree(&store, repository.as_ref(), &bars);
}

/// Concurrent writers on disjoint symbols never corrupt each other.
#[test]
fn test_concurrent_saves_and_reads() {
    init_tracing();
    let repository = Arc::new(MemoryBarRepository::new());
    let store = Arc::new(TieredBarStore::new(repository.clone(), 32));
    let symbols = ["AAPL", "MSFT", "NVDA", "TSLA", "AMZN", "META"];

    let handles: Vec<_> = symbols
        .iter()
        .map(|symbol| {
            let store = store.clone();
            let symbol = symbol.to_string();
            thread::spawn(move || {
                for index in 0..200 {
                    let bar = confirmed_bar(&symbol, index, &[100.0 + index as f64]);
                    store.save(&bar).unwrap();
                    let read = store.get(&symbol, Timeframe::M1, index).unwrap().unwrap();
                    assert_eq!(read.hash(), bar.hash());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(repository.len().unwrap(), symbols.len() * 200);
    for symbol in symbols {
        let series = store
            .get_range(symbol, Timeframe::M1, i64::MIN, i64::MAX)
            .unwrap();
        assert_eq!(series.len(), 200);
        assert!(series.windows(2).all(|w| w[0].bar_index() < w[1].bar_index()));
    }
}

proptest! {
    /// For any cache capacity and save order, every read matches the repository.
    #[test]
    fn prop_cache_never_diverges_from_repository(
        capacity in 1usize..8,
        order in Just((0..20i64).collect::<Vec<_>>()).prop_shuffle(),
        prices in prop::collection::vec(1.0f64..500.0, 20),
    ) {
        let repository = Arc::new(MemoryBarRepository::new());
        let store = TieredBarStore::new(repository.clone(), capacity);
        let bars: Vec<Bar> = order
            .iter()
            .map(|&i| confirmed_bar("AAPL", i, &[prices[i as usize]]))
            .collect();
        store.save_all(&bars).unwrap();

        for bar in &bars {
            let got = store.get("AAPL", Timeframe::M1, bar.bar_index()).unwrap().unwrap();
            prop_assert_eq!(got.hash(), repository.get(&bar.key()).unwrap().unwrap().hash());
        }
        prop_assert!(store.stats().unwrap().cache.len <= capacity);
    }
}
