//! Clocks
//!
//! `LiveClock` follows wall-clock time. `VirtualClock` only moves when told
//! to, can be frozen, and carries the speed multiplier replay pacing uses.
//! Clones of a `VirtualClock` share one timeline.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use crate::error::ReplayError;

pub trait Clock: Send + Sync {
    /// Current time in epoch milliseconds.
    fn now_ms(&self) -> i64;

    fn is_virtual(&self) -> bool;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveClock;

impl Clock for LiveClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    fn is_virtual(&self) -> bool {
        false
    }
}

#[derive(Debug)]
struct VirtualState {
    now_ms: i64,
    speed: f64,
    frozen: bool,
}

/// Programmatically controlled time.
#[derive(Debug, Clone)]
pub struct VirtualClock {
    state: Arc<Mutex<VirtualState>>,
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl VirtualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            state: Arc::new(Mutex::new(VirtualState {
                now_ms: start_ms,
                speed: 1.0,
                frozen: false,
            })),
        }
    }

    // No cross-field invariant, so a poisoned guard is still consistent.
    fn lock(&self) -> MutexGuard<'_, VirtualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Jump to `ts_ms`, frozen or not.
    pub fn set_time(&self, ts_ms: i64) {
        self.lock().now_ms = ts_ms;
    }

    /// Move forward by `delta_ms`. Ignored while frozen; returns whether
    /// time moved.
    pub fn advance(&self, delta_ms: i64) -> bool {
        let mut state = self.lock();
        if state.frozen || delta_ms <= 0 {
            return false;
        }
        state.now_ms = state.now_ms.saturating_add(delta_ms);
        true
    }

    /// Move forward to `ts_ms` if it is ahead. Ignored while frozen.
    pub fn advance_to(&self, ts_ms: i64) -> bool {
        let mut state = self.lock();
        if state.frozen || ts_ms <= state.now_ms {
            return false;
        }
        state.now_ms = ts_ms;
        true
    }

    pub fn freeze(&self) {
        self.lock().frozen = true;
    }

    pub fn unfreeze(&self) {
        self.lock().frozen = false;
    }

    pub fn is_frozen(&self) -> bool {
        self.lock().frozen
    }

    pub fn set_speed(&self, speed: f64) -> Result<(), ReplayError> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(ReplayError::InvalidSpeed(speed));
        }
        self.lock().speed = speed;
        debug!(speed, "virtual clock speed changed");
        Ok(())
    }

    pub fn speed(&self) -> f64 {
        self.lock().speed
    }

    /// Real time it takes for `gap_ms` of virtual time to pass at the
    /// current speed.
    pub fn real_duration(&self, gap_ms: i64) -> Duration {
        if gap_ms <= 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(gap_ms as f64 / 1_000.0 / self.speed())
    }
}

impl Clock for VirtualClock {
    fn now_ms(&self) -> i64 {
        self.lock().now_ms
    }

    fn is_virtual(&self) -> bool {
        true
    }
}

/// Either kind of clock, for callers that pick one at runtime.
#[derive(Debug, Clone)]
pub enum AnyClock {
    Live(LiveClock),
    Virtual(VirtualClock),
}

impl Clock for AnyClock {
    fn now_ms(&self) -> i64 {
        match self {
            AnyClock::Live(clock) => clock.now_ms(),
            AnyClock::Virtual(clock) => clock.now_ms(),
        }
    }

    fn is_virtual(&self) -> bool {
        matches!(self, AnyClock::Virtual(_))
    }
}

impl From<LiveClock> for AnyClock {
    fn from(clock: LiveClock) -> Self {
        AnyClock::Live(clock)
    }
}

impl From<VirtualClock> for AnyClock {
    fn from(clock: VirtualClock) -> Self {
        AnyClock::Virtual(clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_clock_tracks_wall_time() {
        let before = Utc::now().timestamp_millis();
        let now = LiveClock.now_ms();
        assert!(now >= before);
        assert!(!LiveClock.is_virtual());
    }

    #[test]
    fn test_virtual_clock_only_moves_when_told() {
        let clock = VirtualClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        assert!(clock.advance(500));
        assert_eq!(clock.now_ms(), 1_500);
        assert!(!clock.advance_to(1_200));
        assert!(clock.advance_to(2_000));
        assert_eq!(clock.now_ms(), 2_000);
    }

    #[test]
    fn test_frozen_clock_ignores_advance() {
        let clock = VirtualClock::new(0);
        clock.freeze();
        assert!(!clock.advance(10));
        assert!(!clock.advance_to(10));
        assert_eq!(clock.now_ms(), 0);

        clock.set_time(42);
        assert_eq!(clock.now_ms(), 42);

        clock.unfreeze();
        assert!(clock.advance(8));
        assert_eq!(clock.now_ms(), 50);
    }

    #[test]
    fn test_clones_share_time() {
        let a = VirtualClock::new(0);
        let b = a.clone();
        a.advance(100);
        assert_eq!(b.now_ms(), 100);
    }

    #[test]
    fn test_speed_validation_and_scaling() {
        let clock = VirtualClock::default();
        assert!(clock.set_speed(0.0).is_err());
        assert!(clock.set_speed(-2.0).is_err());
        assert!(clock.set_speed(f64::INFINITY).is_err());

        assert_eq!(clock.real_duration(1_000), Duration::from_secs(1));
        clock.set_speed(100.0).unwrap();
        assert_eq!(clock.real_duration(1_000), Duration::from_millis(10));
        assert_eq!(clock.real_duration(-5), Duration::ZERO);
    }

    #[test]
    fn test_any_clock() {
        assert!(AnyClock::from(VirtualClock::new(7)).is_virtual());
        assert_eq!(AnyClock::from(VirtualClock::new(7)).now_ms(), 7);
        assert!(!AnyClock::from(LiveClock).is_virtual());
    }
}
