use chrono::{NaiveTime, Timelike};
use chrono_tz::Tz;
use tracing::warn;

use crate::engine::EngineError;
use crate::limits::*;

/// Minutes since business-local midnight.
pub type MinuteOfDay = u32;

/// Shop-wide scheduling settings. Loaded once, treated as constant for a booking flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShopConfig {
    /// Named business zone; all wall-clock fields below are read in it.
    pub timezone: Tz,
    pub opening: MinuteOfDay,
    pub closing: MinuteOfDay,
    pub break_start: MinuteOfDay,
    pub break_end: MinuteOfDay,
    /// Step between candidate starts.
    pub slot_minutes: u32,
    /// Minimum gap between "now" and a bookable start.
    pub lead_minutes: u32,
    /// Used when the booking-window setting is absent.
    pub default_window_days: u32,
}

impl Default for ShopConfig {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::Europe::Lisbon,
            opening: 9 * 60,
            closing: 19 * 60,
            break_start: 13 * 60,
            break_end: 15 * 60,
            slot_minutes: 15,
            lead_minutes: 60,
            default_window_days: 7,
        }
    }
}

impl ShopConfig {
    /// Defaults overlaid with `CHAIRTIME_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns. Unparsable values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(raw) = lookup("CHAIRTIME_TZ") {
            match raw.parse::<Tz>() {
                Ok(tz) => cfg.timezone = tz,
                Err(e) => warn!(value = %raw, "ignoring CHAIRTIME_TZ: {e}"),
            }
        }
        overlay_time(&lookup, "CHAIRTIME_OPEN", &mut cfg.opening);
        overlay_time(&lookup, "CHAIRTIME_CLOSE", &mut cfg.closing);
        overlay_time(&lookup, "CHAIRTIME_BREAK_START", &mut cfg.break_start);
        overlay_time(&lookup, "CHAIRTIME_BREAK_END", &mut cfg.break_end);
        overlay_u32(&lookup, "CHAIRTIME_SLOT_MINUTES", &mut cfg.slot_minutes);
        overlay_u32(&lookup, "CHAIRTIME_LEAD_MINUTES", &mut cfg.lead_minutes);
        overlay_u32(&lookup, "CHAIRTIME_WINDOW_DAYS", &mut cfg.default_window_days);

        cfg
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.closing > 24 * 60 || self.opening >= self.closing {
            return Err(EngineError::InvalidInput("opening must be before closing"));
        }
        if self.break_start > self.break_end {
            return Err(EngineError::InvalidInput("break ends before it starts"));
        }
        if self.break_start < self.opening || self.break_end > self.closing {
            return Err(EngineError::InvalidInput("break outside opening hours"));
        }
        if self.slot_minutes == 0 {
            return Err(EngineError::InvalidInput("slot granularity must be positive"));
        }
        if self.default_window_days > MAX_ADVANCE_DAYS {
            return Err(EngineError::LimitExceeded("booking window too wide"));
        }
        Ok(())
    }

    pub fn has_break(&self) -> bool {
        self.break_start < self.break_end
    }
}

/// Parse `HH:MM` into minutes since midnight. `24:00` is accepted as end of day.
pub fn parse_minute_of_day(raw: &str) -> Option<MinuteOfDay> {
    if raw.trim() == "24:00" {
        return Some(24 * 60);
    }
    let t = NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()?;
    Some(t.hour() * 60 + t.minute())
}

fn overlay_time(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut MinuteOfDay) {
    if let Some(raw) = lookup(key) {
        match parse_minute_of_day(&raw) {
            Some(m) => *slot = m,
            None => warn!(key, value = %raw, "ignoring unparsable time, expected HH:MM"),
        }
    }
}

fn overlay_u32(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut u32) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(v) => *slot = v,
            Err(e) => warn!(key, value = %raw, "ignoring unparsable number: {e}"),
        }
    }
}
