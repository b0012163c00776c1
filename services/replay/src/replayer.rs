//! Deterministic tick replayer
//!
//! Emits a source's ticks in order against a `VirtualClock`. Pacing decides
//! only when a tick goes out, never which tick or what it contains, so any
//! speed multiplier yields the same emission sequence.
//!
//! Control (pause/resume/stop/speed) goes through a `watch` channel shared
//! with every `ReplayHandle`. A tick whose pacing wait is interrupted is
//! parked and re-offered first, so pause never skips or re-delivers.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use types::config::{Pacing, ReplaySettings};
use types::observer::Observers;
use types::tick::CanonicalTick;

use crate::clock::{AnyClock, Clock, VirtualClock};
use crate::error::ReplayError;
use crate::source::TickSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Paused,
    Stopped,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayStats {
    pub source_ticks: usize,
    pub emitted: u64,
    pub batches: u64,
    pub running: bool,
    pub paused: bool,
    pub speed: f64,
    pub virtual_time_ms: i64,
    pub state: RunState,
}

/// A pacing wait in progress: virtual time owed for the real time spent in it.
#[derive(Debug, Clone, Copy)]
struct PaceAnchor {
    started: Instant,
    speed: f64,
    max_credit_ms: i64,
}

/// State shared between the replayer and its handles.
#[derive(Debug)]
struct Shared {
    state: watch::Sender<RunState>,
    clock: VirtualClock,
    pace_anchor: Mutex<Option<PaceAnchor>>,
    source_ticks: AtomicUsize,
    emitted: AtomicU64,
    batches: AtomicU64,
}

impl Shared {
    fn state(&self) -> RunState {
        *self.state.borrow()
    }

    fn anchor(&self) -> MutexGuard<'_, Option<PaceAnchor>> {
        self.pace_anchor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Advance the clock by the virtual time the current pacing wait has
    /// covered so far. Applied at most once per wait.
    fn credit_pacing(&self) {
        if let Some(anchor) = self.anchor().take() {
            let progressed =
                (anchor.started.elapsed().as_secs_f64() * 1_000.0 * anchor.speed) as i64;
            self.clock.advance(progressed.min(anchor.max_credit_ms));
        }
    }

    fn pause(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state != RunState::Running {
                return false;
            }
            // Credit before freezing; a frozen clock ignores advances.
            self.credit_pacing();
            self.clock.freeze();
            *state = RunState::Paused;
            true
        })
    }

    fn resume(&self) -> bool {
        let clock = &self.clock;
        self.state.send_if_modified(|state| {
            if *state != RunState::Paused {
                return false;
            }
            clock.unfreeze();
            *state = RunState::Running;
            true
        })
    }

    fn stop(&self) -> bool {
        let clock = &self.clock;
        self.state.send_if_modified(|state| {
            if !matches!(state, RunState::Running | RunState::Paused) {
                return false;
            }
            self.anchor().take();
            clock.unfreeze();
            *state = RunState::Stopped;
            true
        })
    }

    fn set_speed(&self, speed: f64) -> Result<(), ReplayError> {
        self.clock.set_speed(speed)?;
        // Wake a pacing wait so the new speed applies to the current gap.
        self.state.send_modify(|_| {});
        Ok(())
    }

    fn stats(&self) -> ReplayStats {
        let state = self.state();
        ReplayStats {
            source_ticks: self.source_ticks.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            running: state == RunState::Running,
            paused: state == RunState::Paused,
            speed: self.clock.speed(),
            virtual_time_ms: self.clock.now_ms(),
            state,
        }
    }
}

/// Cloneable control handle, usable from any task.
#[derive(Debug, Clone)]
pub struct ReplayHandle {
    shared: Arc<Shared>,
}

impl ReplayHandle {
    /// Freeze the clock and halt emission. Returns false if not running.
    pub fn pause(&self) -> bool {
        let paused = self.shared.pause();
        if paused {
            debug!(emitted = self.shared.emitted.load(Ordering::Relaxed), "replay paused");
        }
        paused
    }

    pub fn resume(&self) -> bool {
        let resumed = self.shared.resume();
        if resumed {
            debug!("replay resumed");
        }
        resumed
    }

    /// End the current run. A later `start` rewinds the source.
    pub fn stop(&self) -> bool {
        self.shared.stop()
    }

    pub fn set_speed(&self, speed: f64) -> Result<(), ReplayError> {
        self.shared.set_speed(speed)
    }

    pub fn state(&self) -> RunState {
        self.shared.state()
    }

    pub fn stats(&self) -> ReplayStats {
        self.shared.stats()
    }
}

pub struct TickReplayer {
    clock: VirtualClock,
    settings: ReplaySettings,
    source: Option<Box<dyn TickSource>>,
    /// Tick taken from the source but not yet emitted.
    pending: Option<CanonicalTick>,
    batch: Vec<CanonicalTick>,
    tick_observers: Observers<CanonicalTick>,
    batch_observers: Observers<Vec<CanonicalTick>>,
    shared: Arc<Shared>,
    state_rx: watch::Receiver<RunState>,
}

impl TickReplayer {
    pub fn new(clock: VirtualClock) -> Self {
        let (state, state_rx) = watch::channel(RunState::Idle);
        let settings = ReplaySettings {
            speed: clock.speed(),
            ..ReplaySettings::default()
        };
        Self {
            shared: Arc::new(Shared {
                state,
                clock: clock.clone(),
                pace_anchor: Mutex::new(None),
                source_ticks: AtomicUsize::new(0),
                emitted: AtomicU64::new(0),
                batches: AtomicU64::new(0),
            }),
            clock,
            settings,
            source: None,
            pending: None,
            batch: Vec::new(),
            tick_observers: Observers::new(),
            batch_observers: Observers::new(),
            state_rx,
        }
    }

    /// Build from a clock chosen at runtime. A live clock is rejected.
    pub fn from_clock(clock: AnyClock) -> Result<Self, ReplayError> {
        match clock {
            AnyClock::Virtual(clock) => Ok(Self::new(clock)),
            AnyClock::Live(_) => Err(ReplayError::LiveClock),
        }
    }

    pub fn with_settings(mut self, settings: ReplaySettings) -> Result<Self, ReplayError> {
        if settings.batch_size == 0 {
            return Err(ReplayError::InvalidBatchSize);
        }
        self.clock.set_speed(settings.speed)?;
        self.settings = settings;
        Ok(self)
    }

    pub fn handle(&self) -> ReplayHandle {
        ReplayHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    pub fn settings(&self) -> &ReplaySettings {
        &self.settings
    }

    pub fn set_source<S>(&mut self, source: S) -> Result<(), ReplayError>
    where
        S: TickSource + 'static,
    {
        if self.is_active() {
            return Err(ReplayError::AlreadyRunning);
        }
        self.shared
            .source_ticks
            .store(source.len(), Ordering::Relaxed);
        self.source = Some(Box::new(source));
        self.pending = None;
        self.batch.clear();
        self.shared.state.send_replace(RunState::Idle);
        Ok(())
    }

    pub fn on_tick<F>(&mut self, callback: F)
    where
        F: FnMut(&CanonicalTick) + Send + 'static,
    {
        self.tick_observers.register(callback);
    }

    /// Called with every full batch, and with the final partial batch when
    /// a run ends.
    pub fn on_batch<F>(&mut self, callback: F)
    where
        F: FnMut(&Vec<CanonicalTick>) + Send + 'static,
    {
        self.batch_observers.register(callback);
    }

    pub fn subscribe_ticks(&mut self) -> mpsc::UnboundedReceiver<CanonicalTick> {
        self.tick_observers.subscribe()
    }

    pub fn subscribe_batches(&mut self) -> mpsc::UnboundedReceiver<Vec<CanonicalTick>> {
        self.batch_observers.subscribe()
    }

    /// Rewind the source and arm a new run at its first tick.
    pub fn start(&mut self) -> Result<(), ReplayError> {
        if self.is_active() {
            return Err(ReplayError::AlreadyRunning);
        }
        let source = self.source.as_mut().ok_or(ReplayError::NoSource)?;
        source.reset()?;
        let first = source.next_tick()?;
        self.shared
            .source_ticks
            .store(source.len(), Ordering::Relaxed);

        self.batch.clear();
        self.shared.emitted.store(0, Ordering::Relaxed);
        self.shared.batches.store(0, Ordering::Relaxed);
        self.clock.unfreeze();
        if let Some(tick) = &first {
            self.clock.set_time(tick.ts_ms);
        }
        self.pending = first;
        self.shared.state.send_replace(RunState::Running);

        info!(
            source_ticks = self.shared.source_ticks.load(Ordering::Relaxed),
            speed = self.clock.speed(),
            pacing = ?self.settings.pacing,
            "replay started"
        );
        Ok(())
    }

    pub fn pause(&self) -> bool {
        self.handle().pause()
    }

    pub fn resume(&self) -> bool {
        self.handle().resume()
    }

    pub fn stop(&self) -> bool {
        self.handle().stop()
    }

    pub fn set_speed(&mut self, speed: f64) -> Result<(), ReplayError> {
        self.shared.set_speed(speed)?;
        self.settings.speed = speed;
        Ok(())
    }

    pub fn state(&self) -> RunState {
        self.shared.state()
    }

    pub fn get_stats(&self) -> ReplayStats {
        self.shared.stats()
    }

    /// Drive the run until the source is exhausted or it is stopped.
    ///
    /// Starts a new run first unless one is already armed.
    pub async fn run(&mut self) -> Result<ReplayStats, ReplayError> {
        if !self.is_active() {
            self.start()?;
        }

        let ended = match self.drive().await {
            Ok(ended) => ended,
            Err(e) => {
                warn!(error = %e, "replay aborted");
                self.shared.stop();
                return Err(e);
            }
        };
        self.flush_batch();

        if ended == RunState::Finished {
            self.shared.state.send_if_modified(|state| {
                let running = *state == RunState::Running;
                if running {
                    *state = RunState::Finished;
                }
                running
            });
        }

        let stats = self.get_stats();
        info!(
            emitted = stats.emitted,
            batches = stats.batches,
            state = ?stats.state,
            virtual_time_ms = stats.virtual_time_ms,
            "replay ended"
        );
        Ok(stats)
    }

    /// Run on a new task. Take a `handle()` first to control it.
    pub fn spawn(mut self) -> JoinHandle<Result<ReplayStats, ReplayError>> {
        tokio::spawn(async move { self.run().await })
    }

    fn is_active(&self) -> bool {
        matches!(self.state(), RunState::Running | RunState::Paused)
    }

    async fn drive(&mut self) -> Result<RunState, ReplayError> {
        loop {
            let state = self.wait_until_runnable().await;
            if state != RunState::Running {
                return Ok(state);
            }

            let tick = match self.pending.take() {
                Some(tick) => tick,
                None => match self.next_from_source()? {
                    Some(tick) => tick,
                    None => return Ok(RunState::Finished),
                },
            };

            if self.settings.pacing == Pacing::Realtime && !self.pace(&tick).await {
                self.pending = Some(tick);
                continue;
            }
            if self.state() != RunState::Running {
                self.pending = Some(tick);
                continue;
            }

            self.emit(tick);
            if self.settings.pacing == Pacing::Instant {
                tokio::task::yield_now().await;
            }
        }
    }

    fn next_from_source(&mut self) -> Result<Option<CanonicalTick>, ReplayError> {
        match self.source.as_mut() {
            Some(source) => Ok(source.next_tick()?),
            None => Err(ReplayError::NoSource),
        }
    }

    /// Block while paused. Returns the first non-paused state.
    async fn wait_until_runnable(&mut self) -> RunState {
        loop {
            let state = *self.state_rx.borrow_and_update();
            if state != RunState::Paused {
                return state;
            }
            if self.state_rx.changed().await.is_err() {
                return RunState::Stopped;
            }
        }
    }

    /// Wait until virtual time reaches the tick. Returns false if a control
    /// change interrupted the wait.
    async fn pace(&mut self, tick: &CanonicalTick) -> bool {
        let gap_ms = tick.ts_ms - self.clock.now_ms();
        if gap_ms <= 0 {
            return true;
        }
        *self.shared.anchor() = Some(PaceAnchor {
            started: Instant::now(),
            speed: self.clock.speed(),
            max_credit_ms: gap_ms - 1,
        });
        let completed = tokio::select! {
            _ = sleep(self.clock.real_duration(gap_ms)) => true,
            _ = self.state_rx.changed() => false,
        };
        if completed {
            self.shared.anchor().take();
        } else {
            // Speed changes credit here, at the old speed. A pause has
            // already credited and cleared the anchor.
            self.shared.credit_pacing();
        }
        completed
    }

    fn emit(&mut self, tick: CanonicalTick) {
        self.clock.advance_to(tick.ts_ms);
        self.tick_observers.notify(&tick);
        self.shared.emitted.fetch_add(1, Ordering::Relaxed);
        self.batch.push(tick);
        if self.batch.len() >= self.settings.batch_size {
            self.flush_batch();
        }
    }

    fn flush_batch(&mut self) {
        if self.batch.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.batch);
        self.batch_observers.notify(&batch);
        self.shared.batches.fetch_add(1, Ordering::Relaxed);
    }
}
