mod availability;
mod conflict;
mod error;
mod policy;
mod slots;
#[cfg(test)]
mod tests;

pub use availability::{
    BarberSelection, BusyIndex, DaySnapshot, SelectionChange, SlotAvailability, merge_overlapping,
    qualified_roster, resolve_day_availability, resolve_day_counts, resolve_slot_availability,
};
pub(crate) use conflict::check_no_conflict;
pub use error::{BookingOutcome, EngineError, PolicyRejection, SinkError, SourceError};
pub use policy::BookingPolicyGuard;
pub use slots::{find_slot, generate_slots};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::clock::BusinessClock;
use crate::config::ShopConfig;
use crate::limits::*;
use crate::model::*;
use crate::observability::*;
use crate::ports::Backend;

/// Everything a client needs to draw one day for one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayView {
    pub date: NaiveDate,
    pub service_id: Ulid,
    /// Candidate slots in start order with their free-barber counts.
    pub slots: Vec<SlotAvailability>,
    pub fully_booked: BTreeSet<NaiveTime>,
}

/// A booking as submitted by a client or guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    /// `None` books as a guest.
    pub client_id: Option<Ulid>,
    pub service_id: Ulid,
    pub barber_id: Ulid,
    pub slot: ProposedBooking,
}

/// Runs the slot generator, resolver and policy gate against a backend.
///
/// Holds no appointment state of its own: each call reads a fresh snapshot.
pub struct BookingDesk<B> {
    backend: Arc<B>,
    config: ShopConfig,
    clock: BusinessClock,
    guard: BookingPolicyGuard,
}

impl<B: Backend> BookingDesk<B> {
    pub fn new(backend: Arc<B>, config: ShopConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let clock = BusinessClock::new(config.timezone);
        let guard = BookingPolicyGuard::from_config(&config);
        Ok(Self {
            backend,
            config,
            clock,
            guard,
        })
    }

    pub fn clock(&self) -> BusinessClock {
        self.clock
    }

    pub fn config(&self) -> &ShopConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    async fn load_service(&self, service_id: Ulid) -> Result<Service, EngineError> {
        let service = self
            .backend
            .service(service_id)
            .await
            .map_err(|e| unavailable("service", e.into()))?
            .ok_or(EngineError::NotFound(service_id))?;
        if !service.active {
            return Err(EngineError::InvalidInput("service is not bookable"));
        }
        if service.duration_min == 0 || service.duration_min > MAX_SERVICE_DURATION_MIN {
            return Err(EngineError::InvalidInput("service duration out of range"));
        }
        Ok(service)
    }

    /// Roster and appointments for one day. Any read failure leaves availability unknown.
    async fn load_day(&self, date: NaiveDate, service_id: Ulid) -> Result<(Vec<Barber>, DaySnapshot), EngineError> {
        let roster = self
            .backend
            .barbers_for_service(service_id)
            .await
            .map_err(|e| unavailable("roster", e.into()))?;
        let appointments = self
            .backend
            .appointments_on(date)
            .await
            .map_err(|e| unavailable("appointments", e.into()))?;
        let snapshot = DaySnapshot::new(date, appointments).map_err(|e| unavailable("appointments", e))?;
        Ok((roster, snapshot))
    }

    /// The configured advance-booking window, or the shop default when the setting
    /// is absent or unreadable.
    pub async fn booking_window(&self) -> BookingWindowPolicy {
        let fallback = BookingWindowPolicy::new(self.config.default_window_days);
        match self.backend.booking_window_days().await {
            Ok(Some(days)) => BookingWindowPolicy::new(days.min(MAX_ADVANCE_DAYS)),
            Ok(None) => {
                debug!(days = fallback.max_advance_days, "booking window unset, using default");
                fallback
            }
            Err(e) => {
                warn!(days = fallback.max_advance_days, "booking window unreadable, using default: {e}");
                fallback
            }
        }
    }

    /// Subscription facts for `client_id`; guests are never subscribers.
    pub async fn subscription_state(
        &self,
        client_id: Option<Ulid>,
        now: DateTime<Utc>,
    ) -> Result<SubscriptionState, EngineError> {
        let Some(client_id) = client_id else {
            return Ok(SubscriptionState::none());
        };
        let Some(sub) = self
            .backend
            .subscription(client_id)
            .await
            .map_err(|e| unavailable("subscription", e.into()))?
        else {
            return Ok(SubscriptionState::none());
        };
        if !sub.active || now >= sub.period_end {
            return Ok(SubscriptionState::none());
        }
        let pending = self
            .backend
            .has_pending_subscription_booking(client_id)
            .await
            .map_err(|e| unavailable("subscription", e.into()))?;
        Ok(SubscriptionState::subscriber(Some(sub.period_end), pending))
    }

    /// Candidate slots for `date` with free-barber counts and the fully-booked set.
    pub async fn day_view(
        &self,
        date: NaiveDate,
        service_id: Ulid,
        now: DateTime<Utc>,
    ) -> Result<DayView, EngineError> {
        let service = self.load_service(service_id).await?;
        let candidates = generate_slots(&self.config, &self.clock, date, service.duration_min, now);
        let (roster, snapshot) = self.load_day(date, service_id).await?;

        let started = Instant::now();
        let slots = resolve_day_counts(&candidates, &roster, &service_id, &snapshot)?;
        metrics::histogram!(RESOLVE_DURATION_SECONDS, "view" => "day").record(started.elapsed().as_secs_f64());
        metrics::counter!(DAY_VIEWS_TOTAL).increment(1);

        let fully_booked: BTreeSet<NaiveTime> = slots
            .iter()
            .filter(|s| s.fully_booked())
            .map(|s| s.start)
            .collect();
        debug!(
            %date,
            service = %service_id,
            candidates = slots.len(),
            fully_booked = fully_booked.len(),
            "day view resolved"
        );
        Ok(DayView {
            date,
            service_id,
            slots,
            fully_booked,
        })
    }

    /// Barbers free for the slot starting at `start`, in roster order.
    ///
    /// A start the generator would not offer (break, after closing, inside the
    /// lead time) has nobody free.
    pub async fn free_barbers(
        &self,
        date: NaiveDate,
        start: NaiveTime,
        service_id: Ulid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Ulid>, EngineError> {
        let service = self.load_service(service_id).await?;
        let Some(slot) = find_slot(&self.config, &self.clock, date, start, service.duration_min, now) else {
            debug!(%date, %start, "not an offered slot");
            return Ok(Vec::new());
        };
        let (roster, snapshot) = self.load_day(date, service_id).await?;

        let started = Instant::now();
        let free = resolve_slot_availability(&slot, &roster, &service_id, &snapshot)?;
        metrics::histogram!(RESOLVE_DURATION_SECONDS, "view" => "slot").record(started.elapsed().as_secs_f64());
        metrics::counter!(SLOT_LOOKUPS_TOTAL).increment(1);
        Ok(free)
    }

    /// Gate, re-check and write a booking.
    ///
    /// The policy gate and the barber check both run against state read now,
    /// not whatever the client saw when it picked the slot. A refused write is
    /// answered with the re-resolved free set; the payload is never resent.
    pub async fn submit(&self, req: &BookingRequest, now: DateTime<Utc>) -> Result<BookingOutcome, EngineError> {
        let service = self.load_service(req.service_id).await?;
        let subscription = self.subscription_state(req.client_id, now).await?;
        let window = self.booking_window().await;

        let proposed_start = self
            .clock
            .utc_of(req.slot.date, req.slot.start)
            .ok_or(EngineError::InvalidInput("start does not exist on the local clock"))?;

        let validated = match self.guard.validate_proposed_booking(
            proposed_start,
            service.duration_min,
            &subscription,
            &window,
            now,
        ) {
            Ok(v) => v,
            Err(reason) => {
                metrics::counter!(POLICY_REJECTIONS_TOTAL, "reason" => reason.code()).increment(1);
                info!(client = ?req.client_id, reason = reason.code(), "booking rejected by policy");
                return Ok(BookingOutcome::Rejected(reason));
            }
        };

        let slot = find_slot(
            &self.config,
            &self.clock,
            validated.date,
            validated.start,
            service.duration_min,
            now,
        )
        .ok_or(EngineError::InvalidInput("not a bookable slot"))?;

        let free = self.resolve_fresh(&slot, req.service_id).await?;
        if !free.contains(&req.barber_id) {
            metrics::counter!(BARBER_UNAVAILABLE_TOTAL).increment(1);
            info!(barber = %req.barber_id, start = %slot.start, "barber busy at submission");
            return Ok(BookingOutcome::BarberUnavailable { free_barbers: free });
        }

        let subscriber = subscription.is_subscriber_at(now);
        let new = NewAppointment {
            id: Ulid::new(),
            barber_id: req.barber_id,
            service_id: req.service_id,
            client_id: req.client_id,
            date: validated.date,
            span: validated.span,
            status: if subscriber {
                AppointmentStatus::Pending
            } else {
                AppointmentStatus::Confirmed
            },
            subscription: subscriber,
        };

        match self.backend.insert_appointment(new).await {
            Ok(appt) => {
                metrics::counter!(BOOKINGS_TOTAL).increment(1);
                info!(appointment = %appt.id, barber = %appt.barber_id, date = %appt.date, "booking written");
                Ok(BookingOutcome::Booked(appt))
            }
            Err(SinkError::Conflict(existing)) => {
                metrics::counter!(SUBMISSION_CONFLICTS_TOTAL).increment(1);
                warn!(barber = %req.barber_id, %existing, "slot taken between read and write");
                let free_barbers = self.resolve_fresh(&slot, req.service_id).await?;
                Ok(BookingOutcome::SlotTaken { free_barbers })
            }
            Err(SinkError::SubscriptionPending(existing)) => {
                let reason = PolicyRejection::PendingSubscriptionBooking;
                metrics::counter!(POLICY_REJECTIONS_TOTAL, "reason" => reason.code()).increment(1);
                info!(client = ?req.client_id, %existing, "booking rejected by sink: subscription booking pending");
                Ok(BookingOutcome::Rejected(reason))
            }
            Err(SinkError::NotFound(id)) => Err(EngineError::NotFound(id)),
            Err(SinkError::Invalid(msg)) => Err(EngineError::InvalidInput(msg)),
            Err(SinkError::Unavailable(msg)) => Err(EngineError::DataUnavailable(msg)),
        }
    }

    async fn resolve_fresh(&self, slot: &CandidateSlot, service_id: Ulid) -> Result<Vec<Ulid>, EngineError> {
        let (roster, snapshot) = self.load_day(slot.date, service_id).await?;
        resolve_slot_availability(slot, &roster, &service_id, &snapshot)
    }
}

fn unavailable(what: &'static str, e: EngineError) -> EngineError {
    metrics::counter!(DATA_UNAVAILABLE_TOTAL).increment(1);
    warn!(source = what, "read failed, availability unknown: {e}");
    e
}
