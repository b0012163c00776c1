//! Tick sources
//!
//! A source is a finite, restartable sequence of canonical ticks in
//! ascending `ts_ms` order. Sources sort themselves on load with a stable
//! sort, so ticks sharing a timestamp keep their recorded order.

use std::fs::File;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use types::tick::{CanonicalTick, TickSourceKind};

use crate::error::SourceError;

pub trait TickSource: Send {
    /// Total ticks in the source.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewind to the first tick.
    fn reset(&mut self) -> Result<(), SourceError>;

    /// Next tick, or `None` once exhausted.
    fn next_tick(&mut self) -> Result<Option<CanonicalTick>, SourceError>;
}

/// In-memory source.
#[derive(Debug, Clone, Default)]
pub struct MemoryTickSource {
    ticks: Vec<CanonicalTick>,
    position: usize,
}

impl MemoryTickSource {
    pub fn new(mut ticks: Vec<CanonicalTick>) -> Self {
        ticks.sort_by_key(|t| t.ts_ms);
        Self { ticks, position: 0 }
    }

    pub fn ticks(&self) -> &[CanonicalTick] {
        &self.ticks
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

impl TickSource for MemoryTickSource {
    fn len(&self) -> usize {
        self.ticks.len()
    }

    fn reset(&mut self) -> Result<(), SourceError> {
        self.position = 0;
        Ok(())
    }

    fn next_tick(&mut self) -> Result<Option<CanonicalTick>, SourceError> {
        let tick = self.ticks.get(self.position).cloned();
        if tick.is_some() {
            self.position += 1;
        }
        Ok(tick)
    }
}

/// One row of a tick CSV: `source,symbol,ts_ms,price,size`.
#[derive(Debug, Serialize, Deserialize)]
struct TickRow {
    source: String,
    symbol: String,
    ts_ms: i64,
    price: f64,
    size: f64,
}

impl From<&CanonicalTick> for TickRow {
    fn from(tick: &CanonicalTick) -> Self {
        Self {
            source: tick.source.canonical_tag(),
            symbol: tick.symbol.clone(),
            ts_ms: tick.ts_ms,
            price: tick.price,
            size: tick.size,
        }
    }
}

/// File-backed source. `reset` re-reads the file.
#[derive(Debug)]
pub struct CsvTickSource {
    path: PathBuf,
    inner: MemoryTickSource,
}

impl CsvTickSource {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SourceError> {
        let path = path.into();
        let inner = MemoryTickSource::new(Self::load(&path)?);
        info!(path = %path.display(), ticks = inner.len(), "opened tick file");
        Ok(Self { path, inner })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write ticks in this source's file format.
    pub fn write(path: impl AsRef<Path>, ticks: &[CanonicalTick]) -> Result<(), SourceError> {
        let mut wtr = csv::Writer::from_writer(File::create(path.as_ref())?);
        for tick in ticks {
            wtr.serialize(TickRow::from(tick))?;
        }
        wtr.flush()?;
        Ok(())
    }

    fn load(path: &Path) -> Result<Vec<CanonicalTick>, SourceError> {
        let mut rdr = csv::Reader::from_reader(File::open(path)?);
        let mut ticks = Vec::new();
        for row in rdr.deserialize::<TickRow>() {
            let row = row?;
            if row.symbol.is_empty() {
                return Err(SourceError::Malformed {
                    line: ticks.len() as u64 + 2,
                    reason: "empty symbol".into(),
                });
            }
            ticks.push(CanonicalTick::new(
                TickSourceKind::from_canonical_tag(&row.source),
                row.symbol,
                row.ts_ms,
                row.price,
                row.size,
            ));
        }
        Ok(ticks)
    }
}

impl TickSource for CsvTickSource {
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn reset(&mut self) -> Result<(), SourceError> {
        self.inner = MemoryTickSource::new(Self::load(&self.path)?);
        debug!(path = %self.path.display(), ticks = self.inner.len(), "reloaded tick file");
        Ok(())
    }

    fn next_tick(&mut self) -> Result<Option<CanonicalTick>, SourceError> {
        self.inner.next_tick()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(ts_ms: i64, price: f64) -> CanonicalTick {
        CanonicalTick::new(TickSourceKind::Alpaca, "AAPL", ts_ms, price, 1.0)
    }

    fn drain(source: &mut dyn TickSource) -> Vec<CanonicalTick> {
        let mut out = Vec::new();
        while let Some(t) = source.next_tick().unwrap() {
            out.push(t);
        }
        out
    }

    #[test]
    fn test_memory_source_sorts_stably() {
        let mut source = MemoryTickSource::new(vec![
            tick(3_000, 3.0),
            tick(1_000, 1.0),
            tick(2_000, 2.1),
            tick(2_000, 2.2),
        ]);
        let prices: Vec<f64> = drain(&mut source).iter().map(|t| t.price).collect();
        assert_eq!(prices, vec![1.0, 2.1, 2.2, 3.0]);
        assert_eq!(source.next_tick().unwrap(), None);
    }

    #[test]
    fn test_memory_source_restarts() {
        let mut source = MemoryTickSource::new(vec![tick(1, 1.0), tick(2, 2.0)]);
        let first = drain(&mut source);
        source.reset().unwrap();
        assert_eq!(source.position(), 0);
        assert_eq!(drain(&mut source), first);
    }

    #[test]
    fn test_csv_source_round_trip_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ticks.csv");
        CsvTickSource::write(&path, &[tick(2_000, 2.0), tick(1_000, 1.0)]).unwrap();

        let mut source = CsvTickSource::open(&path).unwrap();
        assert_eq!(source.len(), 2);
        let ticks = drain(&mut source);
        assert_eq!(ticks[0], tick(1_000, 1.0));
        assert_eq!(ticks[0].source, TickSourceKind::Alpaca);

        CsvTickSource::write(&path, &[tick(5_000, 5.0)]).unwrap();
        source.reset().unwrap();
        assert_eq!(drain(&mut source), vec![tick(5_000, 5.0)]);
    }

    #[test]
    fn test_csv_source_reports_failures() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            CsvTickSource::open(dir.path().join("missing.csv")),
            Err(SourceError::Io(_))
        ));

        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "source,symbol,ts_ms,price,size\nmock,AAPL,abc,1.0,1.0\n").unwrap();
        assert!(matches!(CsvTickSource::open(&path), Err(SourceError::Csv(_))));
    }
}
