//! Day-index arithmetic and the injectable source of "now".

use std::sync::Mutex;

use chrono::{DateTime, Datelike, FixedOffset, Local, NaiveDate, Utc};

use crate::registry::{MetricDefinition, TimeZonePolicy};

/// `NaiveDate::num_days_from_ce` of 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Supplies the current instant.
pub trait SystemClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The host wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct WallClock;

impl SystemClock for WallClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A settable clock for tests and replays.
#[derive(Debug)]
pub struct FakeClock {
    now: Mutex<DateTime<Utc>>,
}

impl FakeClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl SystemClock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Converts one fixed instant into day indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CobaltClock {
    instant: DateTime<Utc>,
}

impl CobaltClock {
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self { instant }
    }

    pub fn instant(&self) -> DateTime<Utc> {
        self.instant
    }

    /// Day index of the instant in the metric's time zone.
    pub fn day_index(&self, metric: &MetricDefinition) -> i32 {
        self.day_index_in(metric.time_zone)
    }

    pub fn day_index_utc(&self) -> i32 {
        days_since_epoch(self.instant.date_naive())
    }

    pub fn day_index_in(&self, policy: TimeZonePolicy) -> i32 {
        match policy {
            TimeZonePolicy::Utc => self.day_index_utc(),
            TimeZonePolicy::Local => {
                days_since_epoch(self.instant.with_timezone(&Local).date_naive())
            }
            TimeZonePolicy::FixedOffset { minutes_east } => {
                match minutes_east
                    .checked_mul(60)
                    .and_then(FixedOffset::east_opt)
                {
                    Some(offset) => {
                        days_since_epoch(self.instant.with_timezone(&offset).date_naive())
                    }
                    // Out-of-range offsets fall back to UTC.
                    None => self.day_index_utc(),
                }
            }
        }
    }
}

fn days_since_epoch(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn epoch_is_day_zero() {
        let clock = CobaltClock::new(Utc.timestamp_opt(0, 0).unwrap());
        assert_eq!(clock.day_index_utc(), 0);
    }

    #[test]
    fn known_utc_day() {
        let clock = CobaltClock::new(at("2022-07-28T14:15:30Z"));
        assert_eq!(clock.day_index_utc(), 19201);
    }

    #[test]
    fn day_boundary_differs_by_one() {
        let before = CobaltClock::new(at("2022-07-28T23:59:59Z"));
        let after = CobaltClock::new(at("2022-07-29T00:00:00Z"));
        assert_eq!(after.day_index_utc() - before.day_index_utc(), 1);
    }

    #[test]
    fn fixed_offset_shifts_day() {
        let clock = CobaltClock::new(at("2022-07-28T02:00:00Z"));
        assert_eq!(clock.day_index_in(TimeZonePolicy::Utc), 19201);
        assert_eq!(
            clock.day_index_in(TimeZonePolicy::FixedOffset { minutes_east: -180 }),
            19200
        );
        assert_eq!(
            clock.day_index_in(TimeZonePolicy::FixedOffset { minutes_east: 600 }),
            19201
        );
    }

    #[test]
    fn invalid_offset_falls_back_to_utc() {
        let clock = CobaltClock::new(at("2022-07-28T02:00:00Z"));
        let policy = TimeZonePolicy::FixedOffset {
            minutes_east: 100_000,
        };
        assert_eq!(clock.day_index_in(policy), 19201);
    }

    #[test]
    fn fake_clock_advances() {
        let clock = FakeClock::new(at("2022-07-28T14:15:30Z"));
        clock.advance(chrono::Duration::days(2));
        assert_eq!(CobaltClock::new(clock.now()).day_index_utc(), 19203);

        clock.set(at("2022-07-28T00:00:00Z"));
        assert_eq!(CobaltClock::new(clock.now()).day_index_utc(), 19201);
    }
}
