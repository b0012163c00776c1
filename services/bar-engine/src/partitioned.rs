//! Task-per-symbol bar engine
//!
//! Each symbol gets its own tokio task owning a `BarEngine`, fed through a
//! bounded command channel. Ticks for one symbol are applied strictly in
//! submission order; different symbols proceed concurrently with no shared
//! mutable state. Confirmed bars from every partition fan in through one
//! unbounded output channel. Order is preserved per symbol; interleaving
//! across symbols depends on scheduling.

use std::collections::BTreeMap;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use types::bar::Bar;
use types::tick::CanonicalTick;

use crate::engine::{BarEngine, EngineConfig, EngineStats};
use crate::error::EngineError;

/// Default per-partition command buffer.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1_024;

/// Commands sent to a partition task.
#[derive(Debug)]
enum PartitionCommand {
    Tick(CanonicalTick),
    CloseElapsed(i64),
}

struct Partition {
    tx: mpsc::Sender<PartitionCommand>,
    handle: JoinHandle<Result<BarEngine, EngineError>>,
}

pub struct PartitionedBarEngine {
    config: EngineConfig,
    channel_capacity: usize,
    partitions: BTreeMap<String, Partition>,
    output_tx: mpsc::UnboundedSender<Bar>,
    output_rx: Option<mpsc::UnboundedReceiver<Bar>>,
}

impl PartitionedBarEngine {
    pub fn new(config: EngineConfig, channel_capacity: usize) -> Self {
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        Self {
            config,
            channel_capacity: channel_capacity.max(1),
            partitions: BTreeMap::new(),
            output_tx,
            output_rx: Some(output_rx),
        }
    }

    pub fn with_defaults(config: EngineConfig) -> Self {
        Self::new(config, DEFAULT_CHANNEL_CAPACITY)
    }

    /// Take the confirmed-bar stream. Returns `None` after the first call.
    ///
    /// The stream carries every confirmed bar exactly once, including those
    /// confirmed by `shutdown`, and closes once shutdown completes.
    pub fn take_output(&mut self) -> Option<mpsc::UnboundedReceiver<Bar>> {
        self.output_rx.take()
    }

    /// Queue a tick for its symbol's partition, spawning it on first use.
    ///
    /// Waits when the partition's buffer is full.
    pub async fn submit(&mut self, tick: CanonicalTick) -> Result<(), EngineError> {
        let symbol = tick.symbol.clone();
        let tx = self.partition_sender(&symbol);
        tx.send(PartitionCommand::Tick(tick))
            .await
            .map_err(|_| EngineError::WorkerStopped { symbol })
    }

    /// Ask every partition to confirm bars whose window ended by `now_ms`.
    pub async fn close_elapsed(&self, now_ms: i64) -> Result<(), EngineError> {
        for (symbol, partition) in &self.partitions {
            partition
                .tx
                .send(PartitionCommand::CloseElapsed(now_ms))
                .await
                .map_err(|_| EngineError::WorkerStopped {
                    symbol: symbol.clone(),
                })?;
        }
        Ok(())
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Drain every partition, force-confirm what is still forming, and stop.
    ///
    /// Returns the bars confirmed at shutdown in symbol order, plus the
    /// summed counters. A partition that failed surfaces its error here.
    pub async fn shutdown(self) -> Result<(Vec<Bar>, EngineStats), EngineError> {
        let Self {
            partitions,
            output_tx,
            ..
        } = self;

        let mut final_bars = Vec::new();
        let mut stats = EngineStats::default();
        for (symbol, partition) in partitions {
            drop(partition.tx);
            let joined = partition.handle.await.map_err(|e| EngineError::WorkerFailed {
                symbol: symbol.clone(),
                reason: e.to_string(),
            })?;
            let mut engine = joined?;
            final_bars.extend(engine.force_confirm_all()?);
            stats += engine.stats();
        }
        drop(output_tx);

        info!(
            bars = final_bars.len(),
            ticks_processed = stats.ticks_processed,
            bars_confirmed = stats.bars_confirmed,
            "PartitionedBarEngine shut down"
        );
        Ok((final_bars, stats))
    }

    fn partition_sender(&mut self, symbol: &str) -> mpsc::Sender<PartitionCommand> {
        if let Some(partition) = self.partitions.get(symbol) {
            return partition.tx.clone();
        }

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let mut engine = BarEngine::new(symbol, self.config.clone());
        let out = self.output_tx.clone();
        engine.on_confirmed(move |bar| {
            // A dropped output receiver only means nobody is listening.
            let _ = out.send(bar.clone());
        });
        let handle = tokio::spawn(run_partition(engine, rx));
        debug!(symbol = %symbol, "Spawned partition");

        self.partitions.insert(
            symbol.to_string(),
            Partition {
                tx: tx.clone(),
                handle,
            },
        );
        tx
    }
}

async fn run_partition(
    mut engine: BarEngine,
    mut rx: mpsc::Receiver<PartitionCommand>,
) -> Result<BarEngine, EngineError> {
    while let Some(command) = rx.recv().await {
        let result = match command {
            PartitionCommand::Tick(tick) => engine.process_tick(&tick),
            PartitionCommand::CloseElapsed(now_ms) => engine.close_elapsed(now_ms),
        };
        if let Err(e) = result {
            warn!(symbol = %engine.symbol(), error = %e, "Partition stopped on error");
            return Err(e);
        }
    }
    Ok(engine)
}
