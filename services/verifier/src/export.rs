//! Canonical bar export
//!
//! The CSV produced here is both the interchange format for reference
//! fixtures and the byte stream the content hash is taken over. Rows are
//! sorted by `(symbol, timeframe, bar_index)` and floats are rendered in
//! their shortest round-trip form, so equal bar sets export to equal bytes
//! regardless of arrival order.

use std::fs;
use std::path::Path;

use tracing::debug;
use types::bar::{Bar, BarState, CanonicalBar};
use types::hashing::{canonical_f64, sha256_hex};
use types::timeframe::Timeframe;

use crate::error::VerifierError;

/// Fixed column order of the canonical CSV.
pub const CSV_COLUMNS: [&str; 11] = [
    "symbol",
    "timeframe",
    "bar_index",
    "ts_start_ms",
    "ts_end_ms",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "tick_count",
];

/// Stateless exporter for canonical bar sets.
#[derive(Debug, Clone, Copy, Default)]
pub struct CanonicalExporter;

impl CanonicalExporter {
    pub fn new() -> Self {
        Self
    }

    /// Bars in canonical order.
    ///
    /// Ties on the key (the same bar exported twice with different values)
    /// are broken by bar hash so the order never depends on the input order.
    pub fn sorted<'a>(&self, bars: &'a [Bar]) -> Vec<&'a Bar> {
        let mut keyed: Vec<_> = bars.iter().map(|bar| (bar.key(), bar.hash(), bar)).collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        keyed.into_iter().map(|(_, _, bar)| bar).collect()
    }

    // ─── CSV export ──────────────────────────────────────────────────────

    pub fn export(&self, bars: &[Bar]) -> Result<Vec<u8>, VerifierError> {
        let mut wtr = csv::Writer::from_writer(vec![]);
        wtr.write_record(CSV_COLUMNS)?;

        for bar in self.sorted(bars) {
            let p = bar.canonical_projection();
            wtr.write_record([
                p.symbol.clone(),
                p.timeframe.to_string(),
                p.bar_index.to_string(),
                p.ts_start_ms.to_string(),
                p.ts_end_ms.to_string(),
                optional_price(p.open),
                optional_price(p.high),
                optional_price(p.low),
                optional_price(p.close),
                canonical_f64(p.volume),
                p.tick_count.to_string(),
            ])?;
        }

        wtr.into_inner()
            .map_err(|e| VerifierError::Io(e.into_error()))
    }

    /// SHA-256 over the canonical export, hex-encoded.
    pub fn compute_hash(&self, bars: &[Bar]) -> Result<String, VerifierError> {
        let bytes = self.export(bars)?;
        let hash = sha256_hex(&bytes);
        debug!(bars = bars.len(), bytes = bytes.len(), %hash, "computed export hash");
        Ok(hash)
    }

    pub fn write_csv(&self, bars: &[Bar], path: impl AsRef<Path>) -> Result<(), VerifierError> {
        let bytes = self.export(bars)?;
        fs::write(path.as_ref(), bytes)?;
        debug!(path = %path.as_ref().display(), bars = bars.len(), "wrote canonical CSV");
        Ok(())
    }

    // ─── CSV import ──────────────────────────────────────────────────────

    /// Parse canonical CSV back into CONFIRMED bars, in file order.
    pub fn import(&self, bytes: &[u8]) -> Result<Vec<Bar>, VerifierError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(bytes);

        let headers = rdr.headers()?.clone();
        if headers.iter().ne(CSV_COLUMNS.iter().copied()) {
            return Err(VerifierError::Malformed {
                line: 1,
                reason: format!(
                    "unexpected header {:?}, expected {:?}",
                    headers.iter().collect::<Vec<_>>(),
                    CSV_COLUMNS
                ),
            });
        }

        let mut bars = Vec::new();
        for record in rdr.records() {
            let record = record?;
            let line = record.position().map(|p| p.line()).unwrap_or_default();
            bars.push(parse_record(&record, line)?);
        }
        Ok(bars)
    }

    pub fn read_csv(&self, path: impl AsRef<Path>) -> Result<Vec<Bar>, VerifierError> {
        let bytes = fs::read(path.as_ref())?;
        self.import(&bytes)
    }
}

fn optional_price(value: Option<f64>) -> String {
    value.map(canonical_f64).unwrap_or_default()
}

fn parse_record(record: &csv::StringRecord, line: u64) -> Result<Bar, VerifierError> {
    if record.len() != CSV_COLUMNS.len() {
        return Err(VerifierError::Malformed {
            line,
            reason: format!("expected {} fields, got {}", CSV_COLUMNS.len(), record.len()),
        });
    }
    let field = |i: usize| record.get(i).unwrap_or_default();
    let malformed = |column: &str, value: &str| VerifierError::Malformed {
        line,
        reason: format!("invalid {column}: {value:?}"),
    };

    let symbol = field(0).to_string();
    if symbol.is_empty() {
        return Err(malformed("symbol", ""));
    }
    let timeframe: Timeframe = field(1)
        .parse()
        .map_err(|_| malformed("timeframe", field(1)))?;

    let int = |i: usize| -> Result<i64, VerifierError> {
        field(i).parse().map_err(|_| malformed(CSV_COLUMNS[i], field(i)))
    };
    let price = |i: usize| -> Result<Option<f64>, VerifierError> {
        match field(i) {
            "" => Ok(None),
            raw => raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(Some)
                .ok_or_else(|| malformed(CSV_COLUMNS[i], raw)),
        }
    };

    let parts = CanonicalBar {
        bar_index: int(2)?,
        close: price(8)?,
        high: price(6)?,
        low: price(7)?,
        open: price(5)?,
        symbol,
        tick_count: field(10)
            .parse()
            .map_err(|_| malformed("tick_count", field(10)))?,
        timeframe,
        ts_end_ms: int(4)?,
        ts_start_ms: int(3)?,
        volume: price(9)?.ok_or_else(|| malformed("volume", ""))?,
    };
    Ok(Bar::from_parts(parts, BarState::Confirmed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::tick::{CanonicalTick, TickSourceKind};

    fn bar(symbol: &str, timeframe: Timeframe, index: i64, prices: &[f64]) -> Bar {
        let tf = timeframe.duration_ms();
        let start = index * tf;
        let mut bar = Bar::new(symbol, timeframe, index, start, start + tf);
        for (i, price) in prices.iter().enumerate() {
            let tick = CanonicalTick::new(TickSourceKind::Mock, symbol, start + i as i64, *price, 2.5);
            bar.apply(&tick).unwrap();
        }
        bar.confirm().unwrap();
        bar
    }

    fn sample() -> Vec<Bar> {
        vec![
            bar("MSFT", Timeframe::M1, 3, &[410.1, 410.4]),
            bar("AAPL", Timeframe::M5, 1, &[185.5]),
            bar("AAPL", Timeframe::M1, 2, &[185.5, 185.75, 185.3, 185.6]),
            bar("AAPL", Timeframe::M1, 1, &[0.1 + 0.2]),
        ]
    }

    #[test]
    fn test_export_header_and_order() {
        let exporter = CanonicalExporter::new();
        let text = String::from_utf8(exporter.export(&sample()).unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines[0],
            "symbol,timeframe,bar_index,ts_start_ms,ts_end_ms,open,high,low,close,volume,tick_count"
        );
        assert!(lines[1].starts_with("AAPL,1m,1,"));
        assert!(lines[2].starts_with("AAPL,1m,2,"));
        assert!(lines[3].starts_with("AAPL,5m,1,"));
        assert!(lines[4].starts_with("MSFT,1m,3,"));
        assert_eq!(
            lines[2],
            "AAPL,1m,2,120000,180000,185.5,185.75,185.3,185.6,10.0,4"
        );
    }

    #[test]
    fn test_empty_bar_exports_empty_prices() {
        let mut empty = Bar::new("AAPL", Timeframe::M1, 0, 0, 60_000);
        empty.confirm().unwrap();
        let exporter = CanonicalExporter::new();
        let text = String::from_utf8(exporter.export(&[empty.clone()]).unwrap()).unwrap();
        assert_eq!(text.lines().nth(1), Some("AAPL,1m,0,0,60000,,,,,0.0,0"));

        let back = exporter.import(text.as_bytes()).unwrap();
        assert_eq!(back[0].hash(), empty.hash());
    }

    #[test]
    fn test_hash_ignores_input_order() {
        let exporter = CanonicalExporter::new();
        let forward = sample();
        let mut reversed = sample();
        reversed.reverse();
        assert_eq!(
            exporter.compute_hash(&forward).unwrap(),
            exporter.compute_hash(&reversed).unwrap()
        );
    }

    #[test]
    fn test_hash_changes_with_values() {
        let exporter = CanonicalExporter::new();
        let mut changed = sample();
        changed[0] = bar("MSFT", Timeframe::M1, 3, &[410.1, 410.5]);
        assert_ne!(
            exporter.compute_hash(&sample()).unwrap(),
            exporter.compute_hash(&changed).unwrap()
        );
    }

    #[test]
    fn test_import_restores_exact_hashes() {
        let exporter = CanonicalExporter::new();
        let bars = sample();
        let imported = exporter.import(&exporter.export(&bars).unwrap()).unwrap();

        let sorted: Vec<String> = exporter.sorted(&bars).iter().map(|b| b.hash()).collect();
        let restored: Vec<String> = imported.iter().map(Bar::hash).collect();
        assert_eq!(sorted, restored);
        assert!(imported.iter().all(|b| b.state() == BarState::Confirmed));
    }

    #[test]
    fn test_negative_zero_volume_survives_round_trip() {
        let mut bar = Bar::new("AAPL", Timeframe::M1, 0, 0, 60_000);
        bar.apply(&CanonicalTick::new(TickSourceKind::Mock, "AAPL", 0, 185.5, -0.0))
            .unwrap();
        bar.confirm().unwrap();

        let exporter = CanonicalExporter::new();
        let imported = exporter.import(&exporter.export(&[bar.clone()]).unwrap()).unwrap();
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].hash(), bar.hash());
    }

    #[test]
    fn test_import_rejects_bad_header() {
        let err = CanonicalExporter::new()
            .import(b"symbol,tf\nAAPL,1m\n")
            .unwrap_err();
        assert!(matches!(err, VerifierError::Malformed { line: 1, .. }));
    }

    #[test]
    fn test_import_reports_bad_line() {
        let csv = "symbol,timeframe,bar_index,ts_start_ms,ts_end_ms,open,high,low,close,volume,tick_count\n\
                   AAPL,1m,0,0,60000,1.0,1.0,1.0,1.0,1.0,1\n\
                   AAPL,7m,1,60000,120000,1.0,1.0,1.0,1.0,1.0,1\n";
        let err = CanonicalExporter::new().import(csv.as_bytes()).unwrap_err();
        match err {
            VerifierError::Malformed { line, reason } => {
                assert_eq!(line, 3);
                assert!(reason.contains("timeframe"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bars.csv");
        let exporter = CanonicalExporter::new();
        exporter.write_csv(&sample(), &path).unwrap();
        let back = exporter.read_csv(&path).unwrap();
        assert_eq!(
            exporter.compute_hash(&back).unwrap(),
            exporter.compute_hash(&sample()).unwrap()
        );
    }
}
