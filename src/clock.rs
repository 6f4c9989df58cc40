use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::config::MinuteOfDay;
use crate::model::Ms;

/// Converts between absolute instants and the business's wall clock.
///
/// Every "today" or "13:00" in the engine goes through here with an explicit
/// `now`, so results never depend on the host's locale or clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessClock {
    tz: Tz,
}

impl BusinessClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Business-local calendar date at `now`.
    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.tz).date_naive()
    }

    /// Business-local wall-clock time at `now`.
    pub fn local_time(&self, now: DateTime<Utc>) -> NaiveTime {
        now.with_timezone(&self.tz).time()
    }

    /// Absolute instant of `minute` past local midnight on `date`.
    ///
    /// Ambiguous wall times (DST fall-back) resolve to the earlier instant;
    /// wall times skipped by a DST gap return `None`.
    pub fn instant_at(&self, date: NaiveDate, minute: MinuteOfDay) -> Option<Ms> {
        let local = NaiveDateTime::new(date, NaiveTime::MIN)
            .checked_add_signed(TimeDelta::minutes(minute as i64))?;
        self.tz
            .from_local_datetime(&local)
            .earliest()
            .map(|t| t.timestamp_millis())
    }

    /// Same as [`instant_at`](Self::instant_at) for a wall-clock time.
    pub fn instant_of(&self, date: NaiveDate, time: NaiveTime) -> Option<Ms> {
        self.instant_at(date, minute_of(time))
    }

    /// UTC instant of a business-local wall-clock time.
    pub fn utc_of(&self, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
        self.instant_of(date, time)
            .and_then(DateTime::<Utc>::from_timestamp_millis)
    }

    pub fn to_local(&self, t: Ms) -> Option<DateTime<Tz>> {
        DateTime::<Utc>::from_timestamp_millis(t).map(|utc| utc.with_timezone(&self.tz))
    }
}

/// Whole minutes past midnight; seconds are truncated.
pub fn minute_of(time: NaiveTime) -> MinuteOfDay {
    time.hour() * 60 + time.minute()
}

/// Wall-clock time for a minute of day. `None` past 23:59.
pub fn time_at(minute: MinuteOfDay) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(minute / 60, minute % 60, 0)
}
