//! Vendor source mapping
//!
//! Maps the free-form `source` string of a raw tick onto the closed
//! `TickSourceKind` enum. New vendors are added by registering aliases here;
//! nothing else in the pipeline matches on vendor strings.

use std::collections::HashMap;

use tracing::debug;
use types::tick::TickSourceKind;

/// Errors raised while extending the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("source alias must not be empty")]
    EmptyAlias,

    #[error("alias {alias:?} cannot map to an unknown source ({kind})")]
    UnknownTarget { alias: String, kind: TickSourceKind },
}

/// Alias table from lowercased vendor tags to canonical sources.
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    aliases: HashMap<String, TickSourceKind>,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        let builtin = [
            ("mock", TickSourceKind::Mock),
            ("finnhub", TickSourceKind::Finnhub),
            ("alpaca", TickSourceKind::Alpaca),
            ("alpaca_ws", TickSourceKind::AlpacaWs),
            ("alpaca-ws", TickSourceKind::AlpacaWs),
            ("alpacaws", TickSourceKind::AlpacaWs),
            ("yfinance", TickSourceKind::YFinance),
            ("yahoo", TickSourceKind::YFinance),
        ];
        Self {
            aliases: builtin
                .into_iter()
                .map(|(alias, kind)| (alias.to_string(), kind))
                .collect(),
        }
    }
}

impl SourceRegistry {
    /// Registry with only the built-in vendor aliases.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a raw vendor tag to its canonical kind.
    ///
    /// Unrecognized tags are accepted as `Unknown` carrying the normalized
    /// tag, never rejected.
    pub fn resolve(&self, raw: &str) -> TickSourceKind {
        let key = raw.trim().to_ascii_lowercase();
        match self.aliases.get(&key) {
            Some(kind) => kind.clone(),
            // Canonical tag of an already-unknown source.
            None if key.starts_with("unknown:") => {
                TickSourceKind::Unknown(key["unknown:".len()..].to_string())
            }
            None => {
                debug!(source = %raw, "Unrecognized tick source, tagging as unknown");
                TickSourceKind::Unknown(key)
            }
        }
    }

    /// Register an additional alias. Overwrites any previous mapping.
    pub fn register(
        &mut self,
        alias: impl AsRef<str>,
        kind: TickSourceKind,
    ) -> Result<(), RegistryError> {
        let key = alias.as_ref().trim().to_ascii_lowercase();
        if key.is_empty() {
            return Err(RegistryError::EmptyAlias);
        }
        if !kind.is_known() {
            return Err(RegistryError::UnknownTarget { alias: key, kind });
        }
        self.aliases.insert(key, kind);
        Ok(())
    }

    /// Builder-style variant of [`register`](Self::register).
    pub fn with_alias(
        mut self,
        alias: impl AsRef<str>,
        kind: TickSourceKind,
    ) -> Result<Self, RegistryError> {
        self.register(alias, kind)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}
