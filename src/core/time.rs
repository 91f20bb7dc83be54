//! Wall-clock primitives.
//!
//! `WallClock` is an epoch-millisecond instant used for assignment
//! timestamps and age-cap comparisons. It is a measurement, not a causal
//! ordering primitive, so `Copy` is fine.

use std::cmp::Ordering;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::{Date, Month, OffsetDateTime};

/// Milliseconds since the Unix epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WallClock(pub u64);

impl WallClock {
    pub fn as_millis(self) -> u64 {
        self.0
    }

    /// Render as RFC 3339.
    pub fn to_rfc3339(self) -> String {
        let nanos = i128::from(self.0) * 1_000_000;
        let dt = OffsetDateTime::from_unix_timestamp_nanos(nanos)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);
        dt.format(&Rfc3339).unwrap_or_else(|_| self.0.to_string())
    }

    /// Shift this instant back by `months` whole calendar months.
    ///
    /// The day-of-month is clamped to the target month's length and the
    /// time-of-day is preserved: Mar 31 minus one month is Feb 28 (or 29),
    /// never a spillover into March. Instants that would land before the
    /// epoch clamp to the epoch.
    pub fn months_earlier(self, months: u32) -> WallClock {
        let nanos = i128::from(self.0) * 1_000_000;
        let dt = OffsetDateTime::from_unix_timestamp_nanos(nanos)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);

        let total =
            i64::from(dt.year()) * 12 + i64::from(dt.month() as u8) - 1 - i64::from(months);
        let year = total.div_euclid(12) as i32;
        let month =
            Month::try_from(total.rem_euclid(12) as u8 + 1).expect("rem_euclid(12) yields a month");
        let day = dt.day().min(time::util::days_in_year_month(year, month));
        let date = Date::from_calendar_date(year, month, day)
            .expect("clamped day is valid for target month");

        let shifted = dt.replace_date(date);
        let millis = shifted.unix_timestamp_nanos() / 1_000_000;
        WallClock(millis.max(0) as u64)
    }
}

impl std::fmt::Display for WallClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_rfc3339())
    }
}

/// Source of wall time. Components take this at construction so tests can
/// drive the clock.
pub trait WallClockSource: Send + Sync {
    fn now(&self) -> WallClock;
}

pub type SharedClock = Arc<dyn WallClockSource>;

/// System wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl WallClockSource for SystemClock {
    fn now(&self) -> WallClock {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        WallClock(millis)
    }
}

pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// Settable clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn at(millis: u64) -> Arc<Self> {
        Arc::new(Self {
            millis: AtomicU64::new(millis),
        })
    }

    pub fn set(&self, clock: WallClock) {
        self.millis.store(clock.0, AtomicOrdering::SeqCst);
    }

    pub fn advance_millis(&self, delta: u64) {
        self.millis.fetch_add(delta, AtomicOrdering::SeqCst);
    }
}

impl WallClockSource for ManualClock {
    fn now(&self) -> WallClock {
        WallClock(self.millis.load(AtomicOrdering::SeqCst))
    }
}

/// Latest of two optional instants.
pub fn later_of(a: Option<WallClock>, b: Option<WallClock>) -> Option<WallClock> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if a.cmp(&b) == Ordering::Less { b } else { a }),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}
