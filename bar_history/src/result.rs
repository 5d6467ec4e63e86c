use std::sync::Arc;

use bar_sources::{Bar, TimeFrame};
use chrono::{DateTime, Utc};

use crate::errors::ChunkError;

/// Immutable bars for one range.
///
/// Values are strictly increasing by open time, open on the timeframe's bar
/// grid and lie inside `[start, end_exclusive)`. They sit behind an `Arc`, so cloning a result
/// (into the memory cache, out to a caller) never copies bars.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkResult {
    timeframe: TimeFrame,
    start: DateTime<Utc>,
    end_exclusive: DateTime<Utc>,
    values: Arc<[Bar]>,
}

impl ChunkResult {
    pub fn new(
        timeframe: TimeFrame,
        start: DateTime<Utc>,
        end_exclusive: DateTime<Utc>,
        values: impl Into<Arc<[Bar]>>,
    ) -> Result<Self, ChunkError> {
        if end_exclusive <= start {
            return Err(ChunkError::InvalidRange {
                start,
                end: end_exclusive,
            });
        }
        let values = values.into();
        let mut previous: Option<DateTime<Utc>> = None;
        for (index, bar) in values.iter().enumerate() {
            let t = bar.open_time;
            let in_range = start <= t && t < end_exclusive;
            if !in_range || previous.is_some_and(|p| p >= t) {
                return Err(ChunkError::Unordered { index });
            }
            if !timeframe.is_aligned(t) {
                return Err(ChunkError::OffGrid {
                    index,
                    at: t,
                    timeframe,
                });
            }
            previous = Some(t);
        }
        Ok(Self {
            timeframe,
            start,
            end_exclusive,
            values,
        })
    }

    /// A result with no bars; stands in for a chunk no tier had.
    pub fn empty(
        timeframe: TimeFrame,
        start: DateTime<Utc>,
        end_exclusive: DateTime<Utc>,
    ) -> Result<Self, ChunkError> {
        Self::new(timeframe, start, end_exclusive, Vec::<Bar>::new())
    }

    pub fn timeframe(&self) -> TimeFrame {
        self.timeframe
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end_exclusive(&self) -> DateTime<Utc> {
        self.end_exclusive
    }

    pub fn values(&self) -> &[Bar] {
        &self.values
    }

    /// The shared bar buffer.
    pub fn shared_values(&self) -> Arc<[Bar]> {
        Arc::clone(&self.values)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Bars that should exist in this range as of `now`.
    pub fn expected_bar_count(&self, now: DateTime<Utc>) -> usize {
        self.timeframe
            .bar_count(self.start, self.end_exclusive.min(now))
    }

    /// Whether every bar that should exist by `now` is present.
    pub fn is_up_to_date_at(&self, now: DateTime<Utc>) -> bool {
        self.len() == self.expected_bar_count(now)
    }

    /// A new result restricted to `[start, end_exclusive)`, which must lie
    /// inside this result's range.
    ///
    /// For fixed-duration timeframes both bounds must be a whole number of bars
    /// from this result's start.
    pub fn trim(
        &self,
        start: DateTime<Utc>,
        end_exclusive: DateTime<Utc>,
    ) -> Result<ChunkResult, ChunkError> {
        if start < self.start || end_exclusive > self.end_exclusive {
            return Err(ChunkError::TrimOutOfBounds {
                start,
                end: end_exclusive,
                bound_start: self.start,
                bound_end: self.end_exclusive,
            });
        }
        if end_exclusive <= start {
            return Err(ChunkError::InvalidRange {
                start,
                end: end_exclusive,
            });
        }
        if start == self.start && end_exclusive == self.end_exclusive {
            return Ok(self.clone());
        }

        let (lo, hi) = if self.timeframe.has_fixed_duration() {
            self.fixed_trim_bounds(start, end_exclusive)?
        } else {
            self.compare_trim_bounds(start, end_exclusive)
        };

        Ok(Self {
            timeframe: self.timeframe,
            start,
            end_exclusive,
            values: Arc::from(&self.values[lo..hi]),
        })
    }

    fn fixed_trim_bounds(
        &self,
        start: DateTime<Utc>,
        end_exclusive: DateTime<Utc>,
    ) -> Result<(usize, usize), ChunkError> {
        let Some(width) = self.timeframe.duration().map(|d| d.num_seconds()) else {
            return Ok(self.compare_trim_bounds(start, end_exclusive));
        };
        let offset = |at: DateTime<Utc>| -> Result<usize, ChunkError> {
            let secs = (at - self.start).num_seconds();
            let exact = at.timestamp_subsec_nanos() == self.start.timestamp_subsec_nanos();
            if !exact || width == 0 || secs % width != 0 {
                return Err(ChunkError::Misaligned {
                    at,
                    timeframe: self.timeframe,
                });
            }
            Ok((secs / width) as usize)
        };
        let lo = offset(start)?;
        let hi = offset(end_exclusive)?;

        if self.is_dense(width) {
            let len = self.values.len();
            Ok((lo.min(len), hi.min(len)))
        } else {
            Ok(self.compare_trim_bounds(start, end_exclusive))
        }
    }

    /// Bars form an unbroken run from `start`, so bar `i` opens at
    /// `start + i * width`.
    fn is_dense(&self, width: i64) -> bool {
        self.values
            .iter()
            .zip(0i64..)
            .all(|(bar, i)| (bar.open_time - self.start).num_seconds() == i * width)
    }

    fn compare_trim_bounds(
        &self,
        start: DateTime<Utc>,
        end_exclusive: DateTime<Utc>,
    ) -> (usize, usize) {
        let lo = self.values.partition_point(|b| b.open_time < start);
        let hi = self.values.partition_point(|b| b.open_time < end_exclusive);
        (lo, hi)
    }

    /// Joins contiguous results, in order, into one.
    pub fn concat(parts: impl IntoIterator<Item = ChunkResult>) -> Result<ChunkResult, ChunkError> {
        let mut parts = parts.into_iter();
        let Some(first) = parts.next() else {
            return Err(ChunkError::InvalidRange {
                start: DateTime::<Utc>::MIN_UTC,
                end: DateTime::<Utc>::MIN_UTC,
            });
        };

        let timeframe = first.timeframe;
        let start = first.start;
        let mut end_exclusive = first.end_exclusive;
        let mut values: Vec<Bar> = first.values.to_vec();

        for part in parts {
            if part.start != end_exclusive {
                return Err(ChunkError::InvalidRange {
                    start: end_exclusive,
                    end: part.start,
                });
            }
            end_exclusive = part.end_exclusive;
            values.extend_from_slice(&part.values);
        }

        Self::new(timeframe, start, end_exclusive, values)
    }
}
