//! Session calendar
//!
//! Maps a UTC epoch-millisecond timestamp to the bar window it belongs to for
//! a given timeframe. Pure function of the calendar rules; no state.
//!
//! Two flavours:
//! - `Continuous`: 24/7 markets, epoch-aligned windows.
//! - `Exchange`: local-time sessions in an IANA timezone with trading
//!   weekdays and holidays. Timestamps outside a session map to no bar, and
//!   bar indices jump across nights, weekends and holidays instead of
//!   materializing empty bars for them.

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

use crate::errors::ConfigError;
use crate::timeframe::{Timeframe, DAY_MS};

/// Latest timestamp any calendar assigns a bar to. A window of up to one
/// day starting at or before it still ends inside `i64`.
pub const MAX_TS_MS: i64 = i64::MAX - DAY_MS;

/// The bar a timestamp falls into: `[ts_start_ms, ts_end_ms)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarWindow {
    pub bar_index: i64,
    pub ts_start_ms: i64,
    pub ts_end_ms: i64,
}

impl BarWindow {
    pub fn contains(&self, ts_ms: i64) -> bool {
        ts_ms >= self.ts_start_ms && ts_ms < self.ts_end_ms
    }
}

/// Trading-session rules used to assign bar indices.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionCalendar {
    /// Always trading; `bar_index = floor(ts / tf)`.
    #[default]
    Continuous,
    /// Exchange-local sessions.
    Exchange(ExchangeSessions),
}

impl SessionCalendar {
    /// NYSE/Nasdaq regular hours: America/New_York, 09:30-16:00, Mon-Fri.
    pub fn us_equities() -> Self {
        SessionCalendar::Exchange(ExchangeSessions {
            tz: chrono_tz::America::New_York,
            open: NaiveTime::from_hms_opt(9, 30, 0).unwrap_or_default(),
            close: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or_default(),
            weekdays: weekdays_mon_fri(),
            holidays: BTreeSet::new(),
        })
    }

    /// Window containing `ts_ms`, or `None` when the market is closed.
    ///
    /// Timestamps past [`MAX_TS_MS`] have no window under any calendar.
    pub fn window(&self, ts_ms: i64, timeframe: Timeframe) -> Option<BarWindow> {
        if ts_ms > MAX_TS_MS {
            return None;
        }
        match self {
            SessionCalendar::Continuous => {
                let tf = timeframe.duration_ms();
                let bar_index = ts_ms.div_euclid(tf);
                let ts_start_ms = bar_index.checked_mul(tf)?;
                Some(BarWindow {
                    bar_index,
                    ts_start_ms,
                    ts_end_ms: ts_start_ms.checked_add(tf)?,
                })
            }
            SessionCalendar::Exchange(sessions) => sessions.window(ts_ms, timeframe),
        }
    }

    pub fn is_trading(&self, ts_ms: i64) -> bool {
        match self {
            SessionCalendar::Continuous => ts_ms <= MAX_TS_MS,
            SessionCalendar::Exchange(sessions) => sessions.session_containing(ts_ms).is_some(),
        }
    }
}

/// Exchange-local session rules.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeSessions {
    tz: Tz,
    open: NaiveTime,
    close: NaiveTime,
    weekdays: BTreeSet<u32>,
    holidays: BTreeSet<NaiveDate>,
}

fn weekdays_mon_fri() -> BTreeSet<u32> {
    [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
    ]
    .iter()
    .map(|d| d.num_days_from_monday())
    .collect()
}

impl ExchangeSessions {
    /// Build session rules. Overnight sessions (close <= open) are rejected.
    pub fn new(
        tz: Tz,
        open: NaiveTime,
        close: NaiveTime,
        weekdays: impl IntoIterator<Item = Weekday>,
        holidays: impl IntoIterator<Item = NaiveDate>,
    ) -> Result<Self, ConfigError> {
        if close <= open {
            return Err(ConfigError::InvalidSessionTime {
                value: close.to_string(),
                reason: format!("session close must be after open ({open})"),
            });
        }
        let weekdays: BTreeSet<u32> = weekdays
            .into_iter()
            .map(|d| d.num_days_from_monday())
            .collect();
        if weekdays.is_empty() {
            return Err(ConfigError::Invalid {
                field: "calendar.weekdays",
                reason: "at least one trading weekday is required".to_string(),
            });
        }
        Ok(Self {
            tz,
            open,
            close,
            weekdays,
            holidays: holidays.into_iter().collect(),
        })
    }

    /// Add a holiday (builder style).
    pub fn with_holiday(mut self, date: NaiveDate) -> Self {
        self.holidays.insert(date);
        self
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// UTC bounds `[open_ms, close_ms)` of the session on local `date`, if
    /// that date is a trading day.
    pub fn session_bounds(&self, date: NaiveDate) -> Option<(i64, i64)> {
        if !self.weekdays.contains(&date.weekday().num_days_from_monday())
            || self.holidays.contains(&date)
        {
            return None;
        }
        let open = self
            .tz
            .from_local_datetime(&date.and_time(self.open))
            .earliest()?;
        let close = self
            .tz
            .from_local_datetime(&date.and_time(self.close))
            .earliest()?;
        Some((open.timestamp_millis(), close.timestamp_millis()))
    }

    /// Local date and UTC bounds of the session containing `ts_ms`.
    fn session_containing(&self, ts_ms: i64) -> Option<(NaiveDate, i64, i64)> {
        let utc = Utc.timestamp_millis_opt(ts_ms).single()?;
        let date = utc.with_timezone(&self.tz).date_naive();
        let (open_ms, close_ms) = self.session_bounds(date)?;
        if ts_ms < open_ms || ts_ms >= close_ms {
            return None;
        }
        Some((date, open_ms, close_ms))
    }

    fn window(&self, ts_ms: i64, timeframe: Timeframe) -> Option<BarWindow> {
        let (date, open_ms, close_ms) = self.session_containing(ts_ms)?;
        let day_number = i64::from(date.num_days_from_ce());
        let tf = timeframe.duration_ms();

        if tf >= DAY_MS {
            return Some(BarWindow {
                bar_index: day_number,
                ts_start_ms: open_ms,
                ts_end_ms: close_ms,
            });
        }

        // Slots per calendar day, rounded up so indices never collide
        // between consecutive sessions.
        let stride = (DAY_MS + tf - 1) / tf;
        let slot = (ts_ms - open_ms) / tf;
        let ts_start_ms = open_ms + slot * tf;
        Some(BarWindow {
            bar_index: day_number * stride + slot,
            ts_start_ms,
            ts_end_ms: (ts_start_ms + tf).min(close_ms),
        })
    }
}
