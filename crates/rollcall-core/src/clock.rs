//! Injected time source and calendar-day computation.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, Utc};
use std::sync::{Mutex, PoisonError};

/// Source of "now". Never read the wall clock directly in attendance code.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests and replay.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(at) }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Maps instants onto the school's calendar, pinned to a fixed UTC offset
/// rather than the host's local time zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayBoundary {
    offset: FixedOffset,
}

impl DayBoundary {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn utc() -> Self {
        Self::new(Utc.fix())
    }

    /// Offset in minutes east of UTC. `None` if outside ±24h.
    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        minutes.checked_mul(60).and_then(FixedOffset::east_opt).map(Self::new)
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn day(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }

    pub fn time_of_day(&self, now: DateTime<Utc>) -> NaiveTime {
        now.with_timezone(&self.offset).time()
    }

    /// Monday and Sunday of the week containing `day`.
    pub fn week_of(day: NaiveDate) -> (NaiveDate, NaiveDate) {
        let monday = day - Duration::days(i64::from(day.weekday().num_days_from_monday()));
        (monday, monday + Duration::days(6))
    }
}

impl Default for DayBoundary {
    fn default() -> Self {
        Self::utc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::minutes(90));
        assert_eq!(clock.now(), Utc.with_ymd_and_hms(2024, 3, 4, 9, 30, 0).unwrap());
    }

    #[test]
    fn test_day_follows_offset_not_utc() {
        // 23:30 UTC on the 4th is already the 5th in UTC+05:30.
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 23, 30, 0).unwrap();
        let ist = DayBoundary::from_offset_minutes(330).unwrap();
        assert_eq!(ist.day(now), NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        assert_eq!(ist.time_of_day(now), NaiveTime::from_hms_opt(5, 0, 0).unwrap());
        assert_eq!(DayBoundary::utc().day(now), NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
    }

    #[test]
    fn test_offset_out_of_range() {
        assert!(DayBoundary::from_offset_minutes(25 * 60).is_none());
        assert!(DayBoundary::from_offset_minutes(i32::MAX).is_none());
    }

    #[test]
    fn test_week_of() {
        // 2024-03-07 is a Thursday.
        let (mon, sun) = DayBoundary::week_of(NaiveDate::from_ymd_opt(2024, 3, 7).unwrap());
        assert_eq!(mon, NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
        assert_eq!(sun, NaiveDate::from_ymd_opt(2024, 3, 10).unwrap());
        let (mon, _) = DayBoundary::week_of(mon);
        assert_eq!(mon, NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
    }
}
