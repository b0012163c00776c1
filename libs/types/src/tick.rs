//! Tick records
//!
//! `RawTick` is whatever a vendor adapter hands us: untrusted, possibly
//! duplicated or out of order. `CanonicalTick` is the normalized form the
//! bar engine consumes. Its `tick_hash` is a pure function of its five
//! fields, so identical ticks hash identically in any process.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::hashing::{canonical_f64, sha256, Digest256};

/// A vendor-specific trade/quote event before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTick {
    pub source: String,
    pub symbol: String,
    pub ts_ms: i64,
    pub price: f64,
    pub size: f64,
}

impl RawTick {
    pub fn new(
        source: impl Into<String>,
        symbol: impl Into<String>,
        ts_ms: i64,
        price: f64,
        size: f64,
    ) -> Self {
        Self {
            source: source.into(),
            symbol: symbol.into(),
            ts_ms,
            price,
            size,
        }
    }
}

/// Canonical upstream source.
///
/// Closed set of known vendors plus a fallback that keeps the original tag,
/// so ticks from a vendor we have not mapped yet are still accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum TickSourceKind {
    Mock,
    Finnhub,
    Alpaca,
    AlpacaWs,
    YFinance,
    /// Unmapped vendor, carrying its lowercased tag.
    Unknown(String),
}

impl TickSourceKind {
    /// Canonical tag used in hashes and exports.
    pub fn canonical_tag(&self) -> String {
        match self {
            TickSourceKind::Mock => "MOCK".to_string(),
            TickSourceKind::Finnhub => "FINNHUB".to_string(),
            TickSourceKind::Alpaca => "ALPACA".to_string(),
            TickSourceKind::AlpacaWs => "ALPACA_WS".to_string(),
            TickSourceKind::YFinance => "YFINANCE".to_string(),
            TickSourceKind::Unknown(tag) => format!("UNKNOWN:{tag}"),
        }
    }

    /// Parse a canonical tag back into a kind.
    ///
    /// Anything that is not a known canonical tag becomes `Unknown`.
    pub fn from_canonical_tag(tag: &str) -> Self {
        match tag {
            "MOCK" => TickSourceKind::Mock,
            "FINNHUB" => TickSourceKind::Finnhub,
            "ALPACA" => TickSourceKind::Alpaca,
            "ALPACA_WS" => TickSourceKind::AlpacaWs,
            "YFINANCE" => TickSourceKind::YFinance,
            other => match other.strip_prefix("UNKNOWN:") {
                Some(inner) => TickSourceKind::Unknown(inner.to_string()),
                None => TickSourceKind::Unknown(other.trim().to_ascii_lowercase()),
            },
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, TickSourceKind::Unknown(_))
    }
}

impl fmt::Display for TickSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_tag())
    }
}

impl From<TickSourceKind> for String {
    fn from(kind: TickSourceKind) -> Self {
        kind.canonical_tag()
    }
}

impl From<String> for TickSourceKind {
    fn from(tag: String) -> Self {
        TickSourceKind::from_canonical_tag(&tag)
    }
}

/// Stable content hash of a canonical tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TickHash(pub Digest256);

impl TickHash {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for TickHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Normalized tick, ready for aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTick {
    pub source: TickSourceKind,
    /// Upper-cased symbol.
    pub symbol: String,
    pub ts_ms: i64,
    pub price: f64,
    pub size: f64,
}

impl CanonicalTick {
    pub fn new(
        source: TickSourceKind,
        symbol: impl Into<String>,
        ts_ms: i64,
        price: f64,
        size: f64,
    ) -> Self {
        Self {
            source,
            symbol: symbol.into(),
            ts_ms,
            price,
            size,
        }
    }

    /// Pipe-delimited canonical tuple the hash is computed over.
    pub fn canonical_tuple(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.source.canonical_tag(),
            self.symbol,
            self.ts_ms,
            canonical_f64(self.price),
            canonical_f64(self.size),
        )
    }

    /// SHA-256 over the canonical tuple.
    pub fn tick_hash(&self) -> TickHash {
        TickHash(sha256(self.canonical_tuple().as_bytes()))
    }

    /// Convert back into a raw record (used when replaying canonical ticks
    /// through a normalizer).
    pub fn to_raw(&self) -> RawTick {
        RawTick {
            source: self.source.canonical_tag(),
            symbol: self.symbol.clone(),
            ts_ms: self.ts_ms,
            price: self.price,
            size: self.size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(price: f64) -> CanonicalTick {
        CanonicalTick::new(TickSourceKind::Mock, "AAPL", 1_700_000_000_000, price, 100.0)
    }

    #[test]
    fn test_hash_is_pure_function_of_fields() {
        assert_eq!(tick(185.5).tick_hash(), tick(185.5).tick_hash());
        assert_ne!(tick(185.5).tick_hash(), tick(185.51).tick_hash());
    }

    #[test]
    fn test_hash_changes_with_source() {
        let a = tick(185.5);
        let mut b = a.clone();
        b.source = TickSourceKind::Finnhub;
        assert_ne!(a.tick_hash(), b.tick_hash());
    }

    #[test]
    fn test_negative_zero_size_hashes_like_zero() {
        let mut a = tick(10.0);
        a.size = 0.0;
        let mut b = a.clone();
        b.size = -0.0;
        assert_eq!(a.tick_hash(), b.tick_hash());
    }

    #[test]
    fn test_canonical_tuple_format() {
        assert_eq!(
            tick(185.5).canonical_tuple(),
            "MOCK|AAPL|1700000000000|185.5|100.0"
        );
    }

    #[test]
    fn test_source_tag_roundtrip() {
        for kind in [
            TickSourceKind::Mock,
            TickSourceKind::Finnhub,
            TickSourceKind::Alpaca,
            TickSourceKind::AlpacaWs,
            TickSourceKind::YFinance,
            TickSourceKind::Unknown("polygon".to_string()),
        ] {
            assert_eq!(TickSourceKind::from_canonical_tag(&kind.canonical_tag()), kind);
        }
    }

    #[test]
    fn test_unknown_tag_is_lowercased() {
        assert_eq!(
            TickSourceKind::from_canonical_tag(" Polygon "),
            TickSourceKind::Unknown("polygon".to_string())
        );
    }

    #[test]
    fn test_tick_serialization() {
        let t = tick(185.5);
        let json = serde_json::to_string(&t).unwrap();
        assert!(json.contains("\"source\":\"MOCK\""));
        let back: CanonicalTick = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}
