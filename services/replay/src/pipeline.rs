//! Deterministic pipeline
//!
//! Normalizer → multi-symbol engine → optional tiered store, run
//! synchronously on the caller's thread. Every confirmed bar is collected in
//! confirmation order, and `finish` returns the collection with its export
//! hash. Two runs over the same ticks and config produce identical output.

use std::sync::Arc;

use bar_engine::{EngineConfig, EngineStats, MultiSymbolBarEngine};
use ingestion::{NormalizeOutcome, NormalizerConfig, NormalizerStats, TickNormalizer};
use persistence::TieredBarStore;
use tracing::{debug, info};
use types::bar::Bar;
use types::config::CoreConfig;
use types::tick::{CanonicalTick, RawTick};
use verifier::CanonicalExporter;

use crate::error::ReplayError;

/// Result of a finished run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Confirmed bars in confirmation order.
    pub bars: Vec<Bar>,
    pub export_hash: String,
    pub normalizer: NormalizerStats,
    pub engine: EngineStats,
}

impl PipelineOutput {
    /// Per-bar hashes in confirmation order.
    pub fn bar_hashes(&self) -> Vec<String> {
        self.bars.iter().map(Bar::hash).collect()
    }
}

pub struct DeterministicPipeline {
    normalizer: TickNormalizer,
    engine: MultiSymbolBarEngine,
    store: Option<Arc<TieredBarStore>>,
    confirmed: Vec<Bar>,
}

impl DeterministicPipeline {
    pub fn new(config: &CoreConfig) -> Result<Self, ReplayError> {
        config.validate()?;
        Ok(Self {
            normalizer: TickNormalizer::new(NormalizerConfig::from(config)),
            engine: MultiSymbolBarEngine::new(EngineConfig::try_from(config)?),
            store: None,
            confirmed: Vec::new(),
        })
    }

    /// Persist every confirmed bar to `store` as it is confirmed.
    pub fn with_store(mut self, store: Arc<TieredBarStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Run `ticks` through a fresh pipeline and finish it.
    pub fn run<'a, I>(config: &CoreConfig, ticks: I) -> Result<PipelineOutput, ReplayError>
    where
        I: IntoIterator<Item = &'a RawTick>,
    {
        let mut pipeline = Self::new(config)?;
        pipeline.ingest_all(ticks)?;
        pipeline.finish()
    }

    /// Feed one raw tick. Returns the bars it confirmed.
    ///
    /// Ticks the normalizer drops confirm nothing and are not errors.
    pub fn ingest(&mut self, raw: &RawTick) -> Result<Vec<Bar>, ReplayError> {
        match self.normalizer.process(raw) {
            NormalizeOutcome::Accepted(tick) => {
                let bars = self.engine.process_tick(&tick)?;
                self.collect(&bars)?;
                Ok(bars)
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Feed a canonical tick back through normalization.
    pub fn ingest_canonical(&mut self, tick: &CanonicalTick) -> Result<Vec<Bar>, ReplayError> {
        self.ingest(&tick.to_raw())
    }

    pub fn ingest_all<'a, I>(&mut self, ticks: I) -> Result<usize, ReplayError>
    where
        I: IntoIterator<Item = &'a RawTick>,
    {
        let mut confirmed = 0;
        for raw in ticks {
            confirmed += self.ingest(raw)?.len();
        }
        Ok(confirmed)
    }

    /// Confirm bars whose window ended by `now_ms`.
    pub fn close_elapsed(&mut self, now_ms: i64) -> Result<Vec<Bar>, ReplayError> {
        let bars = self.engine.close_elapsed(now_ms)?;
        self.collect(&bars)?;
        Ok(bars)
    }

    /// Bars confirmed so far.
    pub fn confirmed(&self) -> &[Bar] {
        &self.confirmed
    }

    pub fn normalizer_stats(&self) -> NormalizerStats {
        self.normalizer.stats()
    }

    pub fn engine_stats(&self) -> EngineStats {
        self.engine.stats()
    }

    /// Force-confirm whatever is still forming and return the full output.
    pub fn finish(mut self) -> Result<PipelineOutput, ReplayError> {
        let tail = self.engine.force_confirm_all()?;
        self.collect(&tail)?;

        let export_hash = CanonicalExporter::new().compute_hash(&self.confirmed)?;
        let output = PipelineOutput {
            bars: self.confirmed,
            export_hash,
            normalizer: self.normalizer.stats(),
            engine: self.engine.stats(),
        };
        info!(
            bars = output.bars.len(),
            ticks_normalized = output.normalizer.normalized,
            export_hash = %output.export_hash,
            "pipeline finished"
        );
        Ok(output)
    }

    fn collect(&mut self, bars: &[Bar]) -> Result<(), ReplayError> {
        if bars.is_empty() {
            return Ok(());
        }
        if let Some(store) = &self.store {
            let saved = store.save_all(bars)?;
            debug!(saved, "persisted confirmed bars");
        }
        self.confirmed.extend_from_slice(bars);
        Ok(())
    }
}
