use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::clock::{time_at, BusinessClock};
use crate::config::{MinuteOfDay, ShopConfig};
use crate::model::*;

const DAY_MINUTES: MinuteOfDay = 24 * 60;

/// Candidate starts for `date`, ascending.
///
/// Starts step by `slot_minutes` from opening. A candidate survives when the
/// service finishes by closing, its `[start, end)` touches no part of the
/// break, and (for the business-local today) it starts at least
/// `lead_minutes` after `now`. Dates already behind the business's today
/// produce nothing. An infeasible duration yields an empty list, not an error.
pub fn generate_slots(
    cfg: &ShopConfig,
    clock: &BusinessClock,
    date: NaiveDate,
    duration_min: u32,
    now: DateTime<Utc>,
) -> Vec<CandidateSlot> {
    if duration_min == 0 || cfg.slot_minutes == 0 {
        return Vec::new();
    }
    let today = clock.today(now);
    if date < today {
        return Vec::new();
    }
    let cutoff: Option<Ms> = (date == today)
        .then(|| now.timestamp_millis() + cfg.lead_minutes as Ms * MINUTE_MS);

    let mut slots = Vec::new();
    let mut minute = cfg.opening;
    while minute < cfg.closing {
        let Some(end_minute) = minute.checked_add(duration_min) else {
            break;
        };
        if end_minute > cfg.closing {
            // Later starts only finish later.
            break;
        }
        let hits_break = cfg.has_break() && minute < cfg.break_end && cfg.break_start < end_minute;
        if !hits_break
            && let Some(slot) = build_slot(clock, date, minute, end_minute)
            && cutoff.is_none_or(|c| slot.span.start >= c)
        {
            slots.push(slot);
        }
        let Some(next) = minute.checked_add(cfg.slot_minutes) else {
            break;
        };
        minute = next;
    }
    slots
}

fn build_slot(
    clock: &BusinessClock,
    date: NaiveDate,
    start: MinuteOfDay,
    end: MinuteOfDay,
) -> Option<CandidateSlot> {
    let start_ms = clock.instant_at(date, start)?;
    let end_ms = start_ms + (end - start) as Ms * MINUTE_MS;
    Some(CandidateSlot {
        date,
        start: time_at(start)?,
        end: time_at(end % DAY_MINUTES)?,
        span: Span::new(start_ms, end_ms),
    })
}

/// The candidate on `date` starting at `start`, if the generator would emit it.
pub fn find_slot(
    cfg: &ShopConfig,
    clock: &BusinessClock,
    date: NaiveDate,
    start: NaiveTime,
    duration_min: u32,
    now: DateTime<Utc>,
) -> Option<CandidateSlot> {
    generate_slots(cfg, clock, date, duration_min, now)
        .into_iter()
        .find(|s| s.start == start)
}
