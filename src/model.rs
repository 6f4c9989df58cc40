use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only instant type inside the engine.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Back-to-back spans (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub name: String,
    /// Fixed duration in minutes, > 0.
    pub duration_min: u32,
    pub active: bool,
}

impl Service {
    pub fn duration_ms(&self) -> Ms {
        self.duration_min as Ms * MINUTE_MS
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Barber {
    pub id: Ulid,
    pub name: String,
    pub active: bool,
    /// Services this barber is qualified to perform.
    pub services: Vec<Ulid>,
    /// Monthly-plan seats; not used by scheduling.
    #[serde(default)]
    pub subscription_capacity: u32,
}

impl Barber {
    /// Active and qualified for `service_id`.
    pub fn can_perform(&self, service_id: &Ulid) -> bool {
        self.active && self.services.contains(service_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    /// Whether an appointment in this status holds the barber's chair.
    ///
    /// Pending counts alongside confirmed and completed: an unconfirmed
    /// booking still has to be honoured if the shop accepts it.
    pub fn occupies(self) -> bool {
        matches!(
            self,
            AppointmentStatus::Pending | AppointmentStatus::Confirmed | AppointmentStatus::Completed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }
}

/// An existing appointment. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub barber_id: Ulid,
    pub service_id: Ulid,
    /// `None` for guest bookings.
    pub client_id: Option<Ulid>,
    /// Business-local date the appointment falls on.
    pub date: NaiveDate,
    pub span: Span,
    pub status: AppointmentStatus,
    /// Covered by the client's monthly plan.
    #[serde(default)]
    pub subscription: bool,
}

impl Appointment {
    pub fn occupies(&self) -> bool {
        self.status.occupies()
    }
}

/// One barber's appointments across all dates, sorted by `span.start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarberLedger {
    pub barber_id: Ulid,
    pub appointments: Vec<Appointment>,
}

impl BarberLedger {
    pub fn new(barber_id: Ulid) -> Self {
        Self {
            barber_id,
            appointments: Vec::new(),
        }
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert(&mut self, appt: Appointment) {
        let pos = self
            .appointments
            .binary_search_by_key(&appt.span.start, |a| a.span.start)
            .unwrap_or_else(|e| e);
        self.appointments.insert(pos, appt);
    }

    pub fn get_mut(&mut self, id: &Ulid) -> Option<&mut Appointment> {
        self.appointments.iter_mut().find(|a| a.id == *id)
    }

    /// Appointments of any status whose span overlaps `query`.
    /// Uses binary search to skip appointments starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Appointment> {
        let right_bound = self
            .appointments
            .partition_point(|a| a.span.start < query.end);
        self.appointments[..right_bound]
            .iter()
            .filter(move |a| a.span.end > query.start)
    }

    pub fn on_date(&self, date: NaiveDate) -> impl Iterator<Item = &Appointment> {
        self.appointments.iter().filter(move |a| a.date == date)
    }
}

/// A candidate start on a business day. Pure value, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateSlot {
    pub date: NaiveDate,
    /// Business-local start and end wall-clock times.
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingWindowPolicy {
    /// Furthest day ahead a non-subscriber may book, inclusive.
    pub max_advance_days: u32,
}

impl BookingWindowPolicy {
    pub const DEFAULT_DAYS: u32 = 7;

    pub fn new(max_advance_days: u32) -> Self {
        Self { max_advance_days }
    }
}

impl Default for BookingWindowPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DAYS)
    }
}

/// Monthly-plan record as stored for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub active: bool,
    pub period_end: DateTime<Utc>,
}

/// Subscription facts for the booking user, supplied from outside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubscriptionState {
    pub active: bool,
    /// End of the paid period; `None` means open-ended.
    pub period_end: Option<DateTime<Utc>>,
    /// A subscription-covered booking is still awaiting confirmation.
    pub pending_booking: bool,
}

impl SubscriptionState {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn subscriber(period_end: Option<DateTime<Utc>>, pending_booking: bool) -> Self {
        Self {
            active: true,
            period_end,
            pending_booking,
        }
    }

    pub fn is_subscriber_at(&self, now: DateTime<Utc>) -> bool {
        self.active && self.period_end.is_none_or(|end| now < end)
    }
}

/// A user-selected slot awaiting the policy gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedBooking {
    pub date: NaiveDate,
    pub start: NaiveTime,
}

/// Slot that passed the policy gate, ready to be paired with a barber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedSlot {
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub span: Span,
}

/// Insert payload handed to the booking sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAppointment {
    pub id: Ulid,
    pub barber_id: Ulid,
    pub service_id: Ulid,
    pub client_id: Option<Ulid>,
    pub date: NaiveDate,
    pub span: Span,
    pub status: AppointmentStatus,
    pub subscription: bool,
}

impl From<NewAppointment> for Appointment {
    fn from(n: NewAppointment) -> Self {
        Appointment {
            id: n.id,
            barber_id: n.barber_id,
            service_id: n.service_id,
            client_id: n.client_id,
            date: n.date,
            span: n.span,
            status: n.status,
            subscription: n.subscription,
        }
    }
}

/// Appointment changes published per barber. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentEvent {
    Booked {
        id: Ulid,
        barber_id: Ulid,
        date: NaiveDate,
        span: Span,
    },
    StatusChanged {
        id: Ulid,
        barber_id: Ulid,
        status: AppointmentStatus,
    },
}
