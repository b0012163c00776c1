//! Incident bundles
//!
//! An incident bundle freezes everything needed to re-run a suspicious
//! aggregation: the config, the raw ticks as received, and the bars (with
//! per-bar and export hashes) the run produced. `reproduce` runs the ticks
//! again and says whether the recorded output comes back bit for bit.
//!
//! The bundle id is a UUID v7 for sorting and lookup only; it never enters
//! a hash.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use types::bar::Bar;
use types::config::CoreConfig;
use types::tick::RawTick;
use uuid::Uuid;
use verifier::{first_hash_divergence, HashDivergence, ParityComparator, ParityReport};

use crate::clock::Clock;
use crate::error::ReplayError;
use crate::pipeline::{DeterministicPipeline, PipelineOutput};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentBundle {
    id: Uuid,
    captured_at_ms: i64,
    description: String,
    config: CoreConfig,
    ticks: Vec<RawTick>,
    bars: Vec<Bar>,
    bar_hashes: Vec<String>,
    export_hash: String,
}

/// Outcome of re-running a bundle.
#[derive(Debug, Clone)]
pub struct Reproduction {
    /// Reproduced bars against the recorded ones.
    pub parity: ParityReport,
    /// First position where the recorded and reproduced hash sequences differ.
    pub divergence: Option<HashDivergence>,
    pub export_hash: String,
    pub export_hash_matches: bool,
}

impl Reproduction {
    pub fn is_faithful(&self) -> bool {
        self.parity.is_identical && self.divergence.is_none() && self.export_hash_matches
    }
}

impl IncidentBundle {
    /// Run `ticks` through a fresh pipeline and record the result.
    pub fn capture(
        description: impl Into<String>,
        config: &CoreConfig,
        ticks: Vec<RawTick>,
        clock: &dyn Clock,
    ) -> Result<Self, ReplayError> {
        let output = DeterministicPipeline::run(config, &ticks)?;
        Ok(Self::from_output(description, config, ticks, &output, clock.now_ms()))
    }

    /// Record an output produced elsewhere, e.g. by a live run.
    pub fn from_output(
        description: impl Into<String>,
        config: &CoreConfig,
        ticks: Vec<RawTick>,
        output: &PipelineOutput,
        captured_at_ms: i64,
    ) -> Self {
        let bundle = Self {
            id: Uuid::now_v7(),
            captured_at_ms,
            description: description.into(),
            config: config.clone(),
            ticks,
            bars: output.bars.clone(),
            bar_hashes: output.bar_hashes(),
            export_hash: output.export_hash.clone(),
        };
        info!(
            id = %bundle.id,
            ticks = bundle.ticks.len(),
            bars = bundle.bars.len(),
            export_hash = %bundle.export_hash,
            "captured incident bundle"
        );
        bundle
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn captured_at_ms(&self) -> i64 {
        self.captured_at_ms
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn ticks(&self) -> &[RawTick] {
        &self.ticks
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn bar_hashes(&self) -> &[String] {
        &self.bar_hashes
    }

    pub fn export_hash(&self) -> &str {
        &self.export_hash
    }

    /// Recorded hashes still match the recorded bars.
    pub fn is_intact(&self) -> bool {
        self.bars.len() == self.bar_hashes.len()
            && self
                .bars
                .iter()
                .zip(&self.bar_hashes)
                .all(|(bar, hash)| &bar.hash() == hash)
    }

    pub fn to_json(&self) -> Result<String, ReplayError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, ReplayError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), ReplayError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self, ReplayError> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    /// Re-run the recorded ticks under the recorded config.
    pub fn reproduce(&self) -> Result<Reproduction, ReplayError> {
        let output = DeterministicPipeline::run(&self.config, &self.ticks)?;
        let parity = ParityComparator::exact().compare(&output.bars, &self.bars)?;
        let divergence = first_hash_divergence(&self.bars, &output.bars);
        let export_hash_matches = output.export_hash == self.export_hash;

        let reproduction = Reproduction {
            parity,
            divergence,
            export_hash: output.export_hash,
            export_hash_matches,
        };
        if reproduction.is_faithful() {
            info!(id = %self.id, "incident reproduced faithfully");
        } else {
            warn!(
                id = %self.id,
                mismatches = reproduction.parity.mismatches.len(),
                divergence = ?reproduction.divergence.as_ref().map(|d| d.position),
                "incident reproduction diverged"
            );
        }
        Ok(reproduction)
    }
}
