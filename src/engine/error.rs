use ulid::Ulid;

use crate::model::Appointment;

/// Failure of an external read.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
}

/// Failure of the external insert.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The write-side overlap check found a counted appointment in the way.
    #[error("conflict with appointment: {0}")]
    Conflict(Ulid),
    /// The client already holds a pending subscription booking (its id).
    #[error("subscription booking already pending: {0}")]
    SubscriptionPending(Ulid),
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("invalid appointment: {0}")]
    Invalid(&'static str),
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Appointments, roster or catalog could not be read. Availability is unknown.
    #[error("availability unknown: {0}")]
    DataUnavailable(String),
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(&'static str),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
}

impl From<SourceError> for EngineError {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::Unavailable(msg) => EngineError::DataUnavailable(msg),
        }
    }
}

/// Why the policy gate refused a proposed booking. An expected outcome, not a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum PolicyRejection {
    #[error("a subscription booking is already awaiting confirmation")]
    PendingSubscriptionBooking,
    #[error("appointments must be booked at least an hour ahead")]
    InsufficientLeadTime,
    #[error("date is outside the booking window")]
    OutsideBookingWindow,
}

impl PolicyRejection {
    /// Stable label for metrics and client-side lookup.
    pub fn code(self) -> &'static str {
        match self {
            PolicyRejection::PendingSubscriptionBooking => "pending_subscription_booking",
            PolicyRejection::InsufficientLeadTime => "insufficient_lead_time",
            PolicyRejection::OutsideBookingWindow => "outside_booking_window",
        }
    }
}

/// Result of a submission attempt that reached a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingOutcome {
    /// Written by the sink; subscription bookings land as `Pending`.
    Booked(Appointment),
    Rejected(PolicyRejection),
    /// The chosen barber was already busy in the fresh pre-submit snapshot.
    BarberUnavailable { free_barbers: Vec<Ulid> },
    /// The write was refused after a stale read; `free_barbers` is re-resolved.
    SlotTaken { free_barbers: Vec<Ulid> },
}

impl BookingOutcome {
    pub fn is_booked(&self) -> bool {
        matches!(self, BookingOutcome::Booked(_))
    }
}
