//! Bar intervals and the UTC calendar math behind them.
//!
//! - One stable epoch: Unix (1970-01-01T00:00:00Z).
//! - Fixed-size frames (minute/hour/day): second-based math.
//! - Week: Monday 00:00:00Z-aligned using a week epoch of 1969-12-29.
//! - Month: linear (year, month) indexing relative to 1970-01.
//!
//! All functions assume UTC input.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Datelike, Duration, Months, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of seconds in a minute.
pub const SECS_PER_MINUTE: i64 = 60;
/// Number of seconds in an hour.
pub const SECS_PER_HOUR: i64 = 60 * SECS_PER_MINUTE;
/// Number of seconds in a day.
pub const SECS_PER_DAY: i64 = 24 * SECS_PER_HOUR;
/// Number of seconds in a week.
pub const SECS_PER_WEEK: i64 = 7 * SECS_PER_DAY;

/// shift so Monday 1969-12-29 00:00Z becomes index 0
const WEEK_MONDAY_ANCHOR_OFFSET_SECS: i64 = 3 * SECS_PER_DAY;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeFrameError {
    #[error("Invalid amount for {unit:?}: {message}")]
    InvalidAmount {
        unit: TimeFrameUnit,
        message: String,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

/// Timeframe granularity (calendar-aware where needed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimeFrameUnit {
    /// UTC minute
    Minute,
    /// UTC hour
    Hour,
    /// UTC day
    Day,
    /// Monday-based, UTC
    Week,
    /// calendar months, UTC
    Month,
}

impl TimeFrameUnit {
    const fn symbol(self) -> char {
        match self {
            TimeFrameUnit::Minute => 'm',
            TimeFrameUnit::Hour => 'h',
            TimeFrameUnit::Day => 'd',
            TimeFrameUnit::Week => 'w',
            TimeFrameUnit::Month => 'M',
        }
    }

    fn from_symbol(c: char) -> Option<Self> {
        match c {
            'm' => Some(TimeFrameUnit::Minute),
            'h' => Some(TimeFrameUnit::Hour),
            'd' => Some(TimeFrameUnit::Day),
            'w' => Some(TimeFrameUnit::Week),
            'M' => Some(TimeFrameUnit::Month),
            _ => None,
        }
    }
}

/// A timeframe = amount × unit (e.g. `m5`, `h4`, `d1`, `M3`).
///
/// The canonical name (`unit symbol` followed by `amount`) is stable and is
/// used as a cache and path key, so two equal timeframes always produce the
/// same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeFrame {
    amount: u32,
    unit: TimeFrameUnit,
}

impl TimeFrame {
    /// One-minute bars.
    pub const M1: TimeFrame = TimeFrame {
        amount: 1,
        unit: TimeFrameUnit::Minute,
    };
    /// One-hour bars.
    pub const H1: TimeFrame = TimeFrame {
        amount: 1,
        unit: TimeFrameUnit::Hour,
    };
    /// One-day bars.
    pub const D1: TimeFrame = TimeFrame {
        amount: 1,
        unit: TimeFrameUnit::Day,
    };

    pub fn new(amount: u32, unit: TimeFrameUnit) -> Result<Self, TimeFrameError> {
        Self::validate(amount, unit)?;
        Ok(Self { amount, unit })
    }

    pub fn minutes(amount: u32) -> Result<Self, TimeFrameError> {
        Self::new(amount, TimeFrameUnit::Minute)
    }

    pub fn hours(amount: u32) -> Result<Self, TimeFrameError> {
        Self::new(amount, TimeFrameUnit::Hour)
    }

    fn validate(amount: u32, unit: TimeFrameUnit) -> Result<(), TimeFrameError> {
        let invalid = |message: &str| {
            Err(TimeFrameError::InvalidAmount {
                unit,
                message: message.into(),
            })
        };
        if amount == 0 {
            return invalid("amount must be > 0");
        }
        match unit {
            // Bars must tile a UTC day exactly, otherwise day-sized chunks
            // would split a bar.
            TimeFrameUnit::Minute if (SECS_PER_DAY / SECS_PER_MINUTE) % amount as i64 != 0 => {
                invalid("Minute amounts must divide 1440")
            }
            TimeFrameUnit::Hour if 24 % amount != 0 => invalid("Hour amounts must divide 24"),
            TimeFrameUnit::Day | TimeFrameUnit::Week if amount != 1 => {
                invalid("Day and Week units can only be used with amount 1")
            }
            TimeFrameUnit::Month if ![1, 2, 3, 6, 12].contains(&amount) => {
                invalid("Month units can only be used with amount 1, 2, 3, 6 and 12")
            }
            _ => Ok(()),
        }
    }

    pub const fn amount(&self) -> u32 {
        self.amount
    }

    pub const fn unit(&self) -> TimeFrameUnit {
        self.unit
    }

    /// Canonical key, e.g. `m1`, `h4`, `M1`.
    pub fn name(&self) -> String {
        format!("{}{}", self.unit.symbol(), self.amount)
    }

    /// Nominal bar width. `None` for calendar months.
    pub fn duration(&self) -> Option<Duration> {
        self.fixed_secs().map(Duration::seconds)
    }

    /// Whether every bar has the same width.
    pub fn has_fixed_duration(&self) -> bool {
        self.unit != TimeFrameUnit::Month
    }

    fn fixed_secs(&self) -> Option<i64> {
        let amount = self.amount as i64;
        match self.unit {
            TimeFrameUnit::Minute => Some(SECS_PER_MINUTE * amount),
            TimeFrameUnit::Hour => Some(SECS_PER_HOUR * amount),
            TimeFrameUnit::Day => Some(SECS_PER_DAY * amount),
            TimeFrameUnit::Week => Some(SECS_PER_WEEK * amount),
            TimeFrameUnit::Month => None,
        }
    }

    /// Seconds since this timeframe's anchor (unix epoch, or the Monday
    /// before it for weeks).
    fn anchored_secs(&self, t: DateTime<Utc>) -> i64 {
        match self.unit {
            TimeFrameUnit::Week => t.timestamp() + WEEK_MONDAY_ANCHOR_OFFSET_SECS,
            _ => t.timestamp(),
        }
    }

    /// `true` when `t` is exactly the open time of some bar.
    pub fn is_aligned(&self, t: DateTime<Utc>) -> bool {
        if t.timestamp_subsec_nanos() != 0 {
            return false;
        }
        match self.fixed_secs() {
            Some(width) => self.anchored_secs(t).rem_euclid(width) == 0,
            None => {
                t.day() == 1
                    && t.num_seconds_from_midnight() == 0
                    && month_index(t).rem_euclid(self.amount as i64) == 0
            }
        }
    }

    /// Index of the first bar opening at or after `t`.
    fn ceil_index(&self, t: DateTime<Utc>) -> i64 {
        let exact = t.timestamp_subsec_nanos() == 0;
        match self.fixed_secs() {
            Some(width) => {
                let secs = self.anchored_secs(t);
                let floor = secs.div_euclid(width);
                if exact && secs.rem_euclid(width) == 0 { floor } else { floor + 1 }
            }
            None => {
                let amount = self.amount as i64;
                let floor = month_index(t).div_euclid(amount);
                if month_start(floor * amount) == t { floor } else { floor + 1 }
            }
        }
    }

    /// Number of bars whose open time falls in `[start, end)`.
    pub fn bar_count(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> usize {
        if end <= start {
            return 0;
        }
        (self.ceil_index(end) - self.ceil_index(start)).max(0) as usize
    }

    /// Steps `n` bars forward from `t`.
    pub fn add_bars(&self, t: DateTime<Utc>, n: u32) -> Option<DateTime<Utc>> {
        match self.fixed_secs() {
            Some(width) => t.checked_add_signed(Duration::seconds(width * n as i64)),
            None => t.checked_add_months(Months::new(self.amount * n)),
        }
    }
}

/// Linear month index relative to 1970-01 (index 0).
fn month_index(t: DateTime<Utc>) -> i64 {
    (t.year() as i64 - 1970) * 12 + (t.month() as i64 - 1)
}

fn month_start(idx: i64) -> DateTime<Utc> {
    let y = 1970 + idx.div_euclid(12);
    let m = idx.rem_euclid(12) as u32 + 1;
    Utc.with_ymd_and_hms(y as i32, m, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.unit.symbol(), self.amount)
    }
}

impl FromStr for TimeFrame {
    type Err = TimeFrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let unit = chars
            .next()
            .and_then(TimeFrameUnit::from_symbol)
            .ok_or_else(|| TimeFrameError::InvalidInput {
                message: format!("unknown timeframe: {s:?}"),
            })?;
        let amount: u32 = chars
            .as_str()
            .parse()
            .map_err(|_| TimeFrameError::InvalidInput {
                message: format!("bad timeframe amount in {s:?}"),
            })?;
        Self::new(amount, unit)
    }
}

impl TryFrom<String> for TimeFrame {
    type Error = TimeFrameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeFrame> for String {
    fn from(tf: TimeFrame) -> Self {
        tf.name()
    }
}
