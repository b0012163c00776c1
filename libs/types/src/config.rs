//! Core configuration
//!
//! Every knob the aggregation core consumes is passed explicitly through
//! `CoreConfig`. Nothing reads environment variables or process globals.
//!
//! ```toml
//! timeframes = ["1m", "5m"]
//! dedup_window = 10000
//! enforce_ordering = true
//! cache_capacity = 5000
//!
//! [repository]
//! kind = "journal"
//! dir = "/var/lib/bars"
//!
//! [calendar]
//! kind = "exchange"
//! timezone = "America/New_York"
//! open = "09:30"
//! close = "16:00"
//! ```

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{NaiveDate, NaiveTime, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::calendar::{ExchangeSessions, SessionCalendar};
use crate::errors::ConfigError;
use crate::timeframe::Timeframe;

/// Durable repository behind the tiered store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RepositoryTarget {
    /// In-process map; lost on exit.
    #[default]
    Memory,
    /// Append-only journal file under `dir`.
    Journal { dir: PathBuf },
}

/// Session calendar selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CalendarConfig {
    #[default]
    Continuous,
    Exchange {
        /// IANA timezone name, e.g. "America/New_York".
        timezone: String,
        /// Local session open, "HH:MM" or "HH:MM:SS".
        open: String,
        /// Local session close.
        close: String,
        #[serde(default = "default_weekdays")]
        weekdays: Vec<String>,
        #[serde(default)]
        holidays: Vec<NaiveDate>,
    },
}

fn default_weekdays() -> Vec<String> {
    ["mon", "tue", "wed", "thu", "fri"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn parse_session_time(value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|e| ConfigError::InvalidSessionTime {
            value: value.to_string(),
            reason: e.to_string(),
        })
}

impl CalendarConfig {
    /// Build the calendar these settings describe.
    pub fn build(&self) -> Result<SessionCalendar, ConfigError> {
        match self {
            CalendarConfig::Continuous => Ok(SessionCalendar::Continuous),
            CalendarConfig::Exchange {
                timezone,
                open,
                close,
                weekdays,
                holidays,
            } => {
                let tz: Tz = timezone
                    .parse()
                    .map_err(|_| ConfigError::UnknownTimezone(timezone.clone()))?;
                let weekdays = weekdays
                    .iter()
                    .map(|d| {
                        d.parse::<Weekday>().map_err(|_| ConfigError::Invalid {
                            field: "calendar.weekdays",
                            reason: format!("unknown weekday {d:?}"),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let sessions = ExchangeSessions::new(
                    tz,
                    parse_session_time(open)?,
                    parse_session_time(close)?,
                    weekdays,
                    holidays.iter().copied(),
                )?;
                Ok(SessionCalendar::Exchange(sessions))
            }
        }
    }
}

/// How the replayer paces emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Pacing {
    /// Sleep the (scaled) gap between tick timestamps.
    #[default]
    Realtime,
    /// Emit as fast as possible; virtual time still advances per tick.
    Instant,
}

/// Replayer defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplaySettings {
    /// Ticks per batch callback.
    pub batch_size: usize,
    /// Speed multiplier (1.0 = tick spacing in real time).
    pub speed: f64,
    pub pacing: Pacing,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            speed: 1.0,
            pacing: Pacing::Realtime,
        }
    }
}

/// Top-level configuration for the aggregation core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Timeframes every symbol engine maintains.
    pub timeframes: Vec<Timeframe>,
    /// Number of recent tick hashes remembered for dedup (0 disables).
    pub dedup_window: usize,
    /// Drop ticks older than the last accepted tick of their symbol.
    pub enforce_ordering: bool,
    /// Bars held in the store's cache tier.
    pub cache_capacity: usize,
    /// Absolute OHLCV tolerance for parity comparison (0 = exact).
    pub parity_tolerance: f64,
    pub repository: RepositoryTarget,
    pub calendar: CalendarConfig,
    pub replay: ReplaySettings,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            timeframes: vec![Timeframe::M1],
            dedup_window: 10_000,
            enforce_ordering: true,
            cache_capacity: 10_000,
            parity_tolerance: 0.0,
            repository: RepositoryTarget::Memory,
            calendar: CalendarConfig::Continuous,
            replay: ReplaySettings::default(),
        }
    }
}

impl CoreConfig {
    /// Parse TOML and validate.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: CoreConfig =
            toml::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Builder-style timeframe override.
    pub fn with_timeframes(mut self, timeframes: impl IntoIterator<Item = Timeframe>) -> Self {
        self.timeframes = timeframes.into_iter().collect();
        self
    }

    pub fn with_dedup_window(mut self, dedup_window: usize) -> Self {
        self.dedup_window = dedup_window;
        self
    }

    pub fn with_enforce_ordering(mut self, enforce_ordering: bool) -> Self {
        self.enforce_ordering = enforce_ordering;
        self
    }

    /// Configured timeframes, deduplicated and shortest first.
    pub fn timeframe_set(&self) -> BTreeSet<Timeframe> {
        self.timeframes.iter().copied().collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeframes.is_empty() {
            return Err(ConfigError::Invalid {
                field: "timeframes",
                reason: "at least one timeframe is required".to_string(),
            });
        }
        if self.timeframe_set().len() != self.timeframes.len() {
            return Err(ConfigError::Invalid {
                field: "timeframes",
                reason: "duplicate timeframe".to_string(),
            });
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "cache_capacity",
                reason: "must be > 0".to_string(),
            });
        }
        if !self.parity_tolerance.is_finite() || self.parity_tolerance < 0.0 {
            return Err(ConfigError::Invalid {
                field: "parity_tolerance",
                reason: format!("must be a finite value >= 0, got {}", self.parity_tolerance),
            });
        }
        if self.replay.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "replay.batch_size",
                reason: "must be > 0".to_string(),
            });
        }
        if !self.replay.speed.is_finite() || self.replay.speed <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "replay.speed",
                reason: format!("must be a finite value > 0, got {}", self.replay.speed),
            });
        }
        self.calendar.build()?;
        Ok(())
    }
}
