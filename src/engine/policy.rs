use chrono::{DateTime, TimeDelta, Utc};

use crate::clock::BusinessClock;
use crate::config::ShopConfig;
use crate::model::*;

use super::PolicyRejection;

/// Stateless admission rules for a proposed booking.
///
/// Gates run in a fixed order and the first failure wins:
/// 1. subscriber with a subscription booking still pending
/// 2. start closer to `now` than the lead time
/// 3. non-subscriber past the advance-booking window (inclusive of the last day)
///
/// Re-run at submission time: the clock may have moved past the lead time or
/// over midnight since the slot was offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingPolicyGuard {
    clock: BusinessClock,
    lead_minutes: u32,
}

impl BookingPolicyGuard {
    pub fn new(clock: BusinessClock, lead_minutes: u32) -> Self {
        Self { clock, lead_minutes }
    }

    pub fn from_config(cfg: &ShopConfig) -> Self {
        Self::new(BusinessClock::new(cfg.timezone), cfg.lead_minutes)
    }

    pub fn validate_proposed_booking(
        &self,
        proposed_start: DateTime<Utc>,
        duration_min: u32,
        subscription: &SubscriptionState,
        window: &BookingWindowPolicy,
        now: DateTime<Utc>,
    ) -> Result<ValidatedSlot, PolicyRejection> {
        let subscriber = subscription.is_subscriber_at(now);

        if subscriber && subscription.pending_booking {
            return Err(PolicyRejection::PendingSubscriptionBooking);
        }

        if proposed_start < now + TimeDelta::minutes(self.lead_minutes as i64) {
            return Err(PolicyRejection::InsufficientLeadTime);
        }

        let tz = self.clock.timezone();
        let local_start = proposed_start.with_timezone(&tz);
        if !subscriber {
            let days_ahead = (local_start.date_naive() - self.clock.today(now)).num_days();
            if days_ahead > window.max_advance_days as i64 {
                return Err(PolicyRejection::OutsideBookingWindow);
            }
        }

        let local_end = (proposed_start + TimeDelta::minutes(duration_min as i64)).with_timezone(&tz);
        let start_ms = proposed_start.timestamp_millis();
        Ok(ValidatedSlot {
            date: local_start.date_naive(),
            start: local_start.time(),
            end: local_end.time(),
            span: Span::new(start_ms, start_ms + duration_min as Ms * MINUTE_MS),
        })
    }
}
