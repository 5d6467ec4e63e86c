//! Canonical chunk boundaries.
//!
//! Every range of bars is stored and cached as a sequence of calendar-aligned
//! chunks, so two callers asking for overlapping data always produce the same
//! cache keys. Each supported timeframe family has two granularities:
//!
//! | bars    | short chunk | long chunk | long chunks are used for dates before |
//! |---------|-------------|------------|---------------------------------------|
//! | minutes | UTC day     | UTC month  | the start of the current month        |
//! | hours   | UTC month   | UTC year   | the start of the current year         |
//! | days    | UTC year    | UTC decade | the start of the current decade       |
//!
//! Long chunks hold archival data that no longer changes. Short chunks cover
//! the recent past and are refreshed more often.
//!
//! Weekly and monthly bars have no chunk rule and are rejected with
//! [`ChunkError::UnsupportedTimeFrame`].

use std::{fmt, sync::Arc};

use bar_sources::{TimeFrame, TimeFrameUnit};
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc};

use crate::errors::ChunkError;

/// Source of "now" for the archival cutoff.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock stuck at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// One canonical chunk: `[start, end_exclusive)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkDescriptor {
    pub start: DateTime<Utc>,
    pub end_exclusive: DateTime<Utc>,
    pub is_long: bool,
}

impl ChunkDescriptor {
    pub fn new(
        start: DateTime<Utc>,
        end_exclusive: DateTime<Utc>,
        is_long: bool,
    ) -> Result<Self, ChunkError> {
        if end_exclusive <= start {
            return Err(ChunkError::InvalidRange {
                start,
                end: end_exclusive,
            });
        }
        Ok(Self {
            start,
            end_exclusive,
            is_long,
        })
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end_exclusive
    }
}

impl fmt::Display for ChunkDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_long { "long" } else { "short" };
        write!(
            f,
            "{kind} chunk [{}, {})",
            self.start.format("%Y-%m-%dT%H:%MZ"),
            self.end_exclusive.format("%Y-%m-%dT%H:%MZ")
        )
    }
}

/// Calendar span a chunk can cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Span {
    Day,
    Month,
    Year,
    Decade,
}

impl Span {
    /// Start of the span containing `t`.
    fn floor(self, t: DateTime<Utc>) -> DateTime<Utc> {
        let date = t.date_naive();
        let first = match self {
            Span::Day => Some(date),
            Span::Month => date.with_day(1),
            Span::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1),
            Span::Decade => NaiveDate::from_ymd_opt(date.year() - date.year().rem_euclid(10), 1, 1),
        };
        first
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Start of the next span. `start` must be a span start.
    fn next(self, start: DateTime<Utc>) -> DateTime<Utc> {
        let next = match self {
            Span::Day => start.checked_add_signed(Duration::days(1)),
            Span::Month => start.checked_add_months(Months::new(1)),
            Span::Year => start.checked_add_months(Months::new(12)),
            Span::Decade => start.checked_add_months(Months::new(120)),
        };
        next.unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn range(self, t: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.floor(t);
        (start, self.next(start))
    }
}

/// Timeframe families that have chunk rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkFamily {
    Minute,
    Hour,
    Day,
}

impl ChunkFamily {
    fn of(timeframe: TimeFrame) -> Result<Self, ChunkError> {
        match timeframe.unit() {
            TimeFrameUnit::Minute => Ok(ChunkFamily::Minute),
            TimeFrameUnit::Hour => Ok(ChunkFamily::Hour),
            TimeFrameUnit::Day => Ok(ChunkFamily::Day),
            TimeFrameUnit::Week | TimeFrameUnit::Month => {
                Err(ChunkError::UnsupportedTimeFrame(timeframe))
            }
        }
    }

    fn short_span(self) -> Span {
        match self {
            ChunkFamily::Minute => Span::Day,
            ChunkFamily::Hour => Span::Month,
            ChunkFamily::Day => Span::Year,
        }
    }

    fn long_span(self) -> Span {
        match self {
            ChunkFamily::Minute => Span::Month,
            ChunkFamily::Hour => Span::Year,
            ChunkFamily::Day => Span::Decade,
        }
    }

    /// Dates before this instant use long chunks.
    fn long_cutoff(self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.long_span().floor(now)
    }
}

/// Maps dates and ranges to canonical chunks.
#[derive(Debug, Clone)]
pub struct ChunkClassifier {
    clock: Arc<dyn Clock>,
}

impl Default for ChunkClassifier {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl ChunkClassifier {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Whether `date` is old enough to be stored in long chunks.
    pub fn is_long_range_for_date(
        &self,
        date: DateTime<Utc>,
        timeframe: TimeFrame,
    ) -> Result<bool, ChunkError> {
        let family = ChunkFamily::of(timeframe)?;
        Ok(date < family.long_cutoff(self.now()))
    }

    /// Bounds of the short chunk containing `date`.
    pub fn short_range_for_date(
        &self,
        date: DateTime<Utc>,
        timeframe: TimeFrame,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>), ChunkError> {
        Ok(ChunkFamily::of(timeframe)?.short_span().range(date))
    }

    /// Bounds of the long chunk containing `date`.
    pub fn long_range_for_date(
        &self,
        date: DateTime<Utc>,
        timeframe: TimeFrame,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>), ChunkError> {
        Ok(ChunkFamily::of(timeframe)?.long_span().range(date))
    }

    /// The chunk containing `date`, long when `date` is archival.
    pub fn range_for_date(
        &self,
        date: DateTime<Utc>,
        timeframe: TimeFrame,
    ) -> Result<ChunkDescriptor, ChunkError> {
        let family = ChunkFamily::of(timeframe)?;
        Ok(descriptor_for(family, family.long_cutoff(self.now()), date))
    }

    /// Lazily decomposes `[start, end_exclusive)` into chunks.
    ///
    /// The first chunk starts at or before `start` and the last one ends at or
    /// after `end_exclusive`. With `short_only`, long chunks are replaced by the
    /// short chunks they contain that overlap the range.
    ///
    /// Fails up front for unsupported timeframes; the iterator itself never
    /// fails.
    pub fn chunks(
        &self,
        start: DateTime<Utc>,
        end_exclusive: DateTime<Utc>,
        timeframe: TimeFrame,
        short_only: bool,
    ) -> Result<ChunkIter, ChunkError> {
        let family = ChunkFamily::of(timeframe)?;
        Ok(ChunkIter {
            family,
            long_cutoff: family.long_cutoff(self.now()),
            cursor: start,
            end_exclusive,
            short_only,
        })
    }

    /// `Ok` iff `[start, end_exclusive)` is exactly one short or one long
    /// chunk.
    pub fn validate_is_chunk_boundary(
        &self,
        start: DateTime<Utc>,
        end_exclusive: DateTime<Utc>,
        timeframe: TimeFrame,
    ) -> Result<(), ChunkError> {
        let family = ChunkFamily::of(timeframe)?;
        let exact = [family.short_span(), family.long_span()]
            .into_iter()
            .any(|span| span.range(start) == (start, end_exclusive));
        if exact {
            Ok(())
        } else {
            Err(ChunkError::ChunkAlignment {
                start,
                end: end_exclusive,
                timeframe,
            })
        }
    }

    pub fn is_valid_short_range(
        &self,
        timeframe: TimeFrame,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> bool {
        self.short_range_for_date(from, timeframe)
            .is_ok_and(|range| range == (from, to))
    }

    pub fn is_valid_long_range(
        &self,
        timeframe: TimeFrame,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> bool {
        self.long_range_for_date(from, timeframe)
            .is_ok_and(|range| range == (from, to))
    }
}

fn descriptor_for(
    family: ChunkFamily,
    long_cutoff: DateTime<Utc>,
    date: DateTime<Utc>,
) -> ChunkDescriptor {
    let is_long = date < long_cutoff;
    let span = if is_long {
        family.long_span()
    } else {
        family.short_span()
    };
    let (start, end_exclusive) = span.range(date);
    ChunkDescriptor {
        start,
        end_exclusive,
        is_long,
    }
}

/// Ordered, gap-free chunks covering a range. See [`ChunkClassifier::chunks`].
///
/// The archival cutoff is captured when the iterator is created, so a clock
/// crossing a month boundary mid-iteration cannot change chunk sizes.
#[derive(Debug, Clone)]
pub struct ChunkIter {
    family: ChunkFamily,
    long_cutoff: DateTime<Utc>,
    cursor: DateTime<Utc>,
    end_exclusive: DateTime<Utc>,
    short_only: bool,
}

impl Iterator for ChunkIter {
    type Item = ChunkDescriptor;

    fn next(&mut self) -> Option<ChunkDescriptor> {
        if self.cursor >= self.end_exclusive {
            return None;
        }
        let descriptor = if self.short_only {
            // Short chunks tile long ones, so stepping by short chunks from
            // the cursor yields exactly the part of the long chunk in range.
            let (start, end_exclusive) = self.family.short_span().range(self.cursor);
            ChunkDescriptor {
                start,
                end_exclusive,
                is_long: false,
            }
        } else {
            descriptor_for(self.family, self.long_cutoff, self.cursor)
        };

        if descriptor.end_exclusive <= self.cursor {
            // saturated at the end of representable time
            self.cursor = self.end_exclusive;
            return None;
        }
        self.cursor = descriptor.end_exclusive;
        Some(descriptor)
    }
}

impl std::iter::FusedIterator for ChunkIter {}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn classifier_at(now: DateTime<Utc>) -> ChunkClassifier {
        ChunkClassifier::new(Arc::new(FixedClock(now)))
    }

    #[test]
    fn minute_chunks_far_past_are_one_month() {
        let c = classifier_at(utc(2100, 1, 1, 0));
        let chunks: Vec<_> = c
            .chunks(utc(2024, 1, 1, 0), utc(2024, 1, 3, 0), TimeFrame::M1, false)
            .unwrap()
            .collect();
        assert_eq!(
            chunks,
            vec![ChunkDescriptor {
                start: utc(2024, 1, 1, 0),
                end_exclusive: utc(2024, 2, 1, 0),
                is_long: true,
            }]
        );
    }

    #[test]
    fn short_only_expands_the_long_chunk() {
        let c = classifier_at(utc(2100, 1, 1, 0));
        let chunks: Vec<_> = c
            .chunks(utc(2024, 1, 1, 0), utc(2024, 1, 3, 0), TimeFrame::M1, true)
            .unwrap()
            .map(|d| (d.start, d.end_exclusive, d.is_long))
            .collect();
        assert_eq!(
            chunks,
            vec![
                (utc(2024, 1, 1, 0), utc(2024, 1, 2, 0), false),
                (utc(2024, 1, 2, 0), utc(2024, 1, 3, 0), false),
            ]
        );
    }

    #[test]
    fn current_month_switches_to_day_chunks() {
        let c = classifier_at(utc(2024, 3, 15, 12));
        let chunks: Vec<_> = c
            .chunks(utc(2024, 2, 10, 0), utc(2024, 3, 3, 0), TimeFrame::M1, false)
            .unwrap()
            .map(|d| (d.start, d.is_long))
            .collect();
        assert_eq!(
            chunks,
            vec![
                (utc(2024, 2, 1, 0), true),
                (utc(2024, 3, 1, 0), false),
                (utc(2024, 3, 2, 0), false),
            ]
        );
    }

    #[test]
    fn hour_and_day_rules() {
        let c = classifier_at(utc(2024, 6, 1, 0));
        let d = utc(2023, 7, 14, 5);

        assert!(c.is_long_range_for_date(d, TimeFrame::H1).unwrap());
        assert_eq!(
            c.short_range_for_date(d, TimeFrame::H1).unwrap(),
            (utc(2023, 7, 1, 0), utc(2023, 8, 1, 0))
        );
        assert_eq!(
            c.long_range_for_date(d, TimeFrame::H1).unwrap(),
            (utc(2023, 1, 1, 0), utc(2024, 1, 1, 0))
        );

        // 2023 is inside the current decade
        assert!(!c.is_long_range_for_date(d, TimeFrame::D1).unwrap());
        assert_eq!(
            c.long_range_for_date(d, TimeFrame::D1).unwrap(),
            (utc(2020, 1, 1, 0), utc(2030, 1, 1, 0))
        );
        assert!(c.is_long_range_for_date(utc(2019, 12, 31, 0), TimeFrame::D1).unwrap());
    }

    #[test]
    fn weekly_and_monthly_are_unsupported() {
        let c = ChunkClassifier::default();
        let week: TimeFrame = "w1".parse().unwrap();
        let month: TimeFrame = "M1".parse().unwrap();
        for tf in [week, month] {
            assert_eq!(
                c.is_long_range_for_date(utc(2024, 1, 1, 0), tf),
                Err(ChunkError::UnsupportedTimeFrame(tf))
            );
            assert!(c.chunks(utc(2024, 1, 1, 0), utc(2024, 2, 1, 0), tf, false).is_err());
        }
    }

    #[test]
    fn chunk_boundary_validation() {
        let c = classifier_at(utc(2100, 1, 1, 0));
        assert!(
            c.validate_is_chunk_boundary(utc(2024, 1, 1, 0), utc(2024, 1, 2, 0), TimeFrame::M1)
                .is_ok()
        );
        assert!(
            c.validate_is_chunk_boundary(utc(2024, 1, 1, 0), utc(2024, 2, 1, 0), TimeFrame::M1)
                .is_ok()
        );
        assert!(matches!(
            c.validate_is_chunk_boundary(utc(2024, 1, 1, 12), utc(2024, 1, 2, 0), TimeFrame::M1),
            Err(ChunkError::ChunkAlignment { .. })
        ));
        assert!(matches!(
            c.validate_is_chunk_boundary(utc(2024, 1, 1, 0), utc(2024, 1, 3, 0), TimeFrame::M1),
            Err(ChunkError::ChunkAlignment { .. })
        ));
    }

    #[test]
    fn empty_range_yields_nothing() {
        let c = ChunkClassifier::default();
        let t = utc(2024, 1, 1, 0);
        assert_eq!(c.chunks(t, t, TimeFrame::M1, false).unwrap().count(), 0);
        assert_eq!(c.chunks(t, utc(2023, 1, 1, 0), TimeFrame::M1, true).unwrap().count(), 0);
    }

    #[test]
    fn iterator_is_lazy() {
        let c = classifier_at(utc(2100, 1, 1, 0));
        let mut it = c
            .chunks(utc(2000, 1, 1, 0), utc(2099, 1, 1, 0), TimeFrame::M1, true)
            .unwrap();
        assert_eq!(it.next().map(|d| d.end_exclusive), Some(utc(2000, 1, 2, 0)));
    }

    #[test]
    fn descriptor_rejects_empty_range() {
        let t = utc(2024, 1, 1, 0);
        assert!(ChunkDescriptor::new(t, t, false).is_err());
        assert!(ChunkDescriptor::new(t, utc(2024, 1, 2, 0), false).unwrap().contains(t));
    }
}
