//! Parity comparison
//!
//! Aligns a computed bar set with a trusted reference by `BarKey` and
//! reports every field that differs. A mismatch is a result, not an error:
//! callers decide whether a non-identical report fails their run.

use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{info, warn};
use types::bar::{Bar, BarKey};
use types::config::CoreConfig;

use crate::error::VerifierError;
use crate::export::CanonicalExporter;

/// Anything that can produce the reference side of a comparison.
pub trait ReferenceSource {
    fn load_reference(&self) -> Result<Vec<Bar>, VerifierError>;
}

impl ReferenceSource for [Bar] {
    fn load_reference(&self) -> Result<Vec<Bar>, VerifierError> {
        Ok(self.to_vec())
    }
}

impl ReferenceSource for Vec<Bar> {
    fn load_reference(&self) -> Result<Vec<Bar>, VerifierError> {
        Ok(self.clone())
    }
}

/// Canonical CSV held in memory.
#[derive(Debug, Clone)]
pub struct CsvBytes(pub Vec<u8>);

impl ReferenceSource for CsvBytes {
    fn load_reference(&self) -> Result<Vec<Bar>, VerifierError> {
        CanonicalExporter::new().import(&self.0)
    }
}

/// Canonical CSV fixture on disk.
#[derive(Debug, Clone)]
pub struct CsvFile(pub PathBuf);

impl ReferenceSource for CsvFile {
    fn load_reference(&self) -> Result<Vec<Bar>, VerifierError> {
        CanonicalExporter::new().read_csv(&self.0)
    }
}

/// Compared bar field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BarField {
    Open,
    High,
    Low,
    Close,
    Volume,
    TickCount,
    TsStartMs,
    TsEndMs,
}

impl BarField {
    pub fn as_str(&self) -> &'static str {
        match self {
            BarField::Open => "open",
            BarField::High => "high",
            BarField::Low => "low",
            BarField::Close => "close",
            BarField::Volume => "volume",
            BarField::TickCount => "tick_count",
            BarField::TsStartMs => "ts_start_ms",
            BarField::TsEndMs => "ts_end_ms",
        }
    }
}

impl fmt::Display for BarField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One differing field. `None` is an absent price (empty bar).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldMismatch {
    pub key: BarKey,
    pub field: BarField,
    pub expected: Option<f64>,
    pub actual: Option<f64>,
}

impl fmt::Display for FieldMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: expected {} actual {}",
            self.key,
            self.field,
            render(self.expected),
            render(self.actual)
        )
    }
}

fn render(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

#[derive(Debug, Clone, Serialize)]
pub struct ParityReport {
    pub is_identical: bool,
    pub bars_compared: usize,
    pub tolerance: f64,
    /// Ordered by key, then field.
    pub mismatches: Vec<FieldMismatch>,
    pub only_in_computed: Vec<BarKey>,
    pub only_in_reference: Vec<BarKey>,
    /// One entry per extra occurrence of a key already seen on that side.
    pub duplicate_in_computed: Vec<BarKey>,
    pub duplicate_in_reference: Vec<BarKey>,
    pub computed_hash: String,
    pub reference_hash: String,
}

impl ParityReport {
    /// Both sides exported to the same bytes.
    pub fn hashes_match(&self) -> bool {
        self.computed_hash == self.reference_hash
    }

    pub fn to_json(&self) -> Result<String, VerifierError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Human-readable diff.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let verdict = if self.is_identical { "IDENTICAL" } else { "DIVERGED" };
        let _ = writeln!(
            out,
            "parity {verdict}: {} bars compared, {} field mismatches, tolerance {}",
            self.bars_compared,
            self.mismatches.len(),
            self.tolerance
        );
        let _ = writeln!(out, "  computed  {}", self.computed_hash);
        let _ = writeln!(out, "  reference {}", self.reference_hash);
        for mismatch in &self.mismatches {
            let _ = writeln!(out, "  ~ {mismatch}");
        }
        for key in &self.only_in_computed {
            let _ = writeln!(out, "  + {key} (computed only)");
        }
        for key in &self.only_in_reference {
            let _ = writeln!(out, "  - {key} (reference only)");
        }
        for key in &self.duplicate_in_computed {
            let _ = writeln!(out, "  ! {key} (repeated in computed)");
        }
        for key in &self.duplicate_in_reference {
            let _ = writeln!(out, "  ! {key} (repeated in reference)");
        }
        out
    }
}

/// Compares OHLCV fields within an absolute tolerance (0 = exact).
///
/// Tick count and window bounds are always compared exactly.
#[derive(Debug, Clone, Copy)]
pub struct ParityComparator {
    tolerance: f64,
    exporter: CanonicalExporter,
}

impl Default for ParityComparator {
    fn default() -> Self {
        Self {
            tolerance: 0.0,
            exporter: CanonicalExporter,
        }
    }
}

impl ParityComparator {
    pub fn new(tolerance: f64) -> Result<Self, VerifierError> {
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(VerifierError::InvalidTolerance(tolerance));
        }
        Ok(Self {
            tolerance,
            exporter: CanonicalExporter,
        })
    }

    pub fn exact() -> Self {
        Self::default()
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn compare_with_reference<R>(
        &self,
        computed: &[Bar],
        reference: &R,
    ) -> Result<ParityReport, VerifierError>
    where
        R: ReferenceSource + ?Sized,
    {
        let reference = reference.load_reference()?;
        self.compare(computed, &reference)
    }

    pub fn compare(&self, computed: &[Bar], reference: &[Bar]) -> Result<ParityReport, VerifierError> {
        let computed_hash = self.exporter.compute_hash(computed)?;
        let reference_hash = self.exporter.compute_hash(reference)?;

        let (computed_map, duplicate_in_computed) = index_by_key(computed);
        let (reference_map, duplicate_in_reference) = index_by_key(reference);

        let mut mismatches = Vec::new();
        let mut only_in_computed = Vec::new();
        let mut bars_compared = 0;

        for (key, actual) in &computed_map {
            match reference_map.get(key) {
                Some(expected) => {
                    bars_compared += 1;
                    self.diff_bar(key, expected, actual, &mut mismatches);
                }
                None => only_in_computed.push(key.clone()),
            }
        }
        let only_in_reference: Vec<BarKey> = reference_map
            .keys()
            .filter(|key| !computed_map.contains_key(*key))
            .cloned()
            .collect();

        let is_identical = mismatches.is_empty()
            && only_in_computed.is_empty()
            && only_in_reference.is_empty()
            && duplicate_in_computed.is_empty()
            && duplicate_in_reference.is_empty();

        if is_identical {
            info!(bars_compared, tolerance = self.tolerance, "parity check identical");
        } else {
            warn!(
                bars_compared,
                mismatches = mismatches.len(),
                only_in_computed = only_in_computed.len(),
                only_in_reference = only_in_reference.len(),
                duplicate_in_computed = duplicate_in_computed.len(),
                duplicate_in_reference = duplicate_in_reference.len(),
                "parity check diverged"
            );
        }

        Ok(ParityReport {
            is_identical,
            bars_compared,
            tolerance: self.tolerance,
            mismatches,
            only_in_computed,
            only_in_reference,
            duplicate_in_computed,
            duplicate_in_reference,
            computed_hash,
            reference_hash,
        })
    }

    fn diff_bar(&self, key: &BarKey, expected: &Bar, actual: &Bar, out: &mut Vec<FieldMismatch>) {
        let mut push = |field, e: Option<f64>, a: Option<f64>| {
            out.push(FieldMismatch {
                key: key.clone(),
                field,
                expected: e,
                actual: a,
            })
        };

        let prices = [
            (BarField::Open, expected.open(), actual.open()),
            (BarField::High, expected.high(), actual.high()),
            (BarField::Low, expected.low(), actual.low()),
            (BarField::Close, expected.close(), actual.close()),
            (BarField::Volume, Some(expected.volume()), Some(actual.volume())),
        ];
        for (field, e, a) in prices {
            if !self.within_tolerance(e, a) {
                push(field, e, a);
            }
        }

        let exact = [
            (BarField::TickCount, expected.tick_count() as f64, actual.tick_count() as f64),
            (BarField::TsStartMs, expected.ts_start_ms() as f64, actual.ts_start_ms() as f64),
            (BarField::TsEndMs, expected.ts_end_ms() as f64, actual.ts_end_ms() as f64),
        ];
        for (field, e, a) in exact {
            if e != a {
                push(field, Some(e), Some(a));
            }
        }
    }

    fn within_tolerance(&self, expected: Option<f64>, actual: Option<f64>) -> bool {
        match (expected, actual) {
            (None, None) => true,
            (Some(e), Some(a)) => e == a || (e - a).abs() <= self.tolerance,
            _ => false,
        }
    }
}

/// Index bars by key, keeping the first occurrence. Later occurrences are
/// returned as duplicates, sorted by key.
fn index_by_key(bars: &[Bar]) -> (BTreeMap<BarKey, &Bar>, Vec<BarKey>) {
    let mut index = BTreeMap::new();
    let mut duplicates = Vec::new();
    for bar in bars {
        let key = bar.key();
        if index.contains_key(&key) {
            duplicates.push(key);
        } else {
            index.insert(key, bar);
        }
    }
    duplicates.sort();
    (index, duplicates)
}

impl TryFrom<&CoreConfig> for ParityComparator {
    type Error = VerifierError;

    fn try_from(config: &CoreConfig) -> Result<Self, Self::Error> {
        Self::new(config.parity_tolerance)
    }
}

/// A position where two hash sequences disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashDivergence {
    pub position: usize,
    /// `None` when that side ended first.
    pub left: Option<String>,
    pub right: Option<String>,
}

/// First position where two ordered bar sequences differ by bar hash.
pub fn first_hash_divergence(left: &[Bar], right: &[Bar]) -> Option<HashDivergence> {
    let longest = left.len().max(right.len());
    (0..longest).find_map(|position| {
        let l = left.get(position).map(Bar::hash);
        let r = right.get(position).map(Bar::hash);
        (l != r).then_some(HashDivergence {
            position,
            left: l,
            right: r,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::bar::{BarState, CanonicalBar};
    use types::timeframe::Timeframe;

    fn bar(index: i64, close: f64) -> Bar {
        Bar::from_parts(
            CanonicalBar {
                bar_index: index,
                close: Some(close),
                high: Some(close.max(100.0)),
                low: Some(close.min(100.0)),
                open: Some(100.0),
                symbol: "AAPL".into(),
                tick_count: 3,
                timeframe: Timeframe::M1,
                ts_end_ms: (index + 1) * 60_000,
                ts_start_ms: index * 60_000,
                volume: 30.0,
            },
            BarState::Confirmed,
        )
    }

    #[test]
    fn test_identical_sets() {
        let bars: Vec<Bar> = (0..5).map(|i| bar(i, 100.0 + i as f64)).collect();
        let mut shuffled = bars.clone();
        shuffled.rotate_left(2);

        let report = ParityComparator::exact().compare(&bars, &shuffled).unwrap();
        assert!(report.is_identical);
        assert!(report.hashes_match());
        assert_eq!(report.bars_compared, 5);
        assert!(report.mismatches.is_empty());
    }

    #[test]
    fn test_field_mismatch_reported() {
        let reference = vec![bar(0, 101.0), bar(1, 102.0)];
        let computed = vec![bar(0, 101.0), bar(1, 102.5)];

        let report = ParityComparator::exact()
            .compare_with_reference(&computed, &reference)
            .unwrap();
        assert!(!report.is_identical);
        assert!(!report.hashes_match());
        assert_eq!(
            report.mismatches,
            vec![
                FieldMismatch {
                    key: BarKey::new("AAPL", Timeframe::M1, 1),
                    field: BarField::High,
                    expected: Some(102.0),
                    actual: Some(102.5),
                },
                FieldMismatch {
                    key: BarKey::new("AAPL", Timeframe::M1, 1),
                    field: BarField::Close,
                    expected: Some(102.0),
                    actual: Some(102.5),
                },
            ]
        );
        assert!(report.summary().contains("AAPL/1m#1 close: expected 102 actual 102.5"));
    }

    #[test]
    fn test_tolerance_absorbs_small_drift() {
        let reference = vec![bar(0, 101.0)];
        let computed = vec![bar(0, 101.0 + 1e-9)];

        assert!(!ParityComparator::exact().compare(&computed, &reference).unwrap().is_identical);
        let loose = ParityComparator::new(1e-6).unwrap();
        let report = loose.compare(&computed, &reference).unwrap();
        assert!(report.is_identical);
        assert!(!report.hashes_match());
    }

    #[test]
    fn test_one_sided_keys() {
        let reference = vec![bar(0, 101.0), bar(1, 102.0)];
        let computed = vec![bar(1, 102.0), bar(2, 103.0)];

        let report = ParityComparator::exact().compare(&computed, &reference).unwrap();
        assert!(!report.is_identical);
        assert_eq!(report.bars_compared, 1);
        assert_eq!(report.only_in_computed, vec![BarKey::new("AAPL", Timeframe::M1, 2)]);
        assert_eq!(report.only_in_reference, vec![BarKey::new("AAPL", Timeframe::M1, 0)]);
    }

    #[test]
    fn test_repeated_keys_are_not_identical() {
        let reference = vec![bar(0, 101.0), bar(1, 102.0)];
        let computed = vec![bar(0, 101.0), bar(1, 102.0), bar(1, 102.0)];

        let report = ParityComparator::exact().compare(&computed, &reference).unwrap();
        assert!(!report.is_identical);
        assert!(!report.hashes_match());
        assert!(report.mismatches.is_empty());
        assert_eq!(report.bars_compared, 2);
        assert_eq!(report.duplicate_in_computed, vec![BarKey::new("AAPL", Timeframe::M1, 1)]);
        assert!(report.duplicate_in_reference.is_empty());
        assert!(report.summary().contains("AAPL/1m#1 (repeated in computed)"));

        let flipped = ParityComparator::exact().compare(&reference, &computed).unwrap();
        assert!(!flipped.is_identical);
        assert_eq!(flipped.duplicate_in_reference, vec![BarKey::new("AAPL", Timeframe::M1, 1)]);
    }

    #[test]
    fn test_empty_vs_populated_prices() {
        let mut empty = Bar::new("AAPL", Timeframe::M1, 0, 0, 60_000);
        empty.confirm().unwrap();
        let report = ParityComparator::exact().compare(&[empty], &[bar(0, 100.0)]).unwrap();
        let fields: Vec<BarField> = report.mismatches.iter().map(|m| m.field).collect();
        assert_eq!(
            fields,
            vec![
                BarField::Open,
                BarField::High,
                BarField::Low,
                BarField::Close,
                BarField::Volume,
                BarField::TickCount
            ]
        );
        assert_eq!(report.mismatches[0].actual, None);
    }

    #[test]
    fn test_invalid_tolerance() {
        assert!(ParityComparator::new(-1.0).is_err());
        assert!(ParityComparator::new(f64::NAN).is_err());
    }

    #[test]
    fn test_from_config() {
        let config = CoreConfig {
            parity_tolerance: 0.01,
            ..CoreConfig::default()
        };
        let comparator = ParityComparator::try_from(&config).unwrap();
        assert_eq!(comparator.tolerance(), 0.01);
    }

    #[test]
    fn test_csv_reference() {
        let bars: Vec<Bar> = (0..3).map(|i| bar(i, 99.0 + i as f64)).collect();
        let csv = CanonicalExporter::new().export(&bars).unwrap();
        let report = ParityComparator::exact()
            .compare_with_reference(&bars, &CsvBytes(csv))
            .unwrap();
        assert!(report.is_identical);
        assert!(report.hashes_match());
    }

    #[test]
    fn test_first_hash_divergence() {
        let a: Vec<Bar> = (0..4).map(|i| bar(i, 100.0)).collect();
        let mut b = a.clone();
        assert_eq!(first_hash_divergence(&a, &b), None);

        b[2] = bar(2, 100.5);
        assert_eq!(first_hash_divergence(&a, &b).unwrap().position, 2);

        let short = &a[..3];
        let divergence = first_hash_divergence(&a, short).unwrap();
        assert_eq!(divergence.position, 3);
        assert!(divergence.right.is_none());
    }
}
