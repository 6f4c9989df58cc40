//! Seams to the systems around the engine: storage reads, configuration,
//! subscription lookups and the appointment insert.

use async_trait::async_trait;
use chrono::NaiveDate;
use ulid::Ulid;

use crate::engine::{SinkError, SourceError};
use crate::model::*;

#[async_trait]
pub trait AppointmentSource: Send + Sync {
    /// Every appointment dated `date`, whatever its status.
    async fn appointments_on(&self, date: NaiveDate) -> Result<Vec<Appointment>, SourceError>;
}

#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn service(&self, id: Ulid) -> Result<Option<Service>, SourceError>;

    /// Barbers linked to `service_id`, active or not.
    async fn barbers_for_service(&self, service_id: Ulid) -> Result<Vec<Barber>, SourceError>;
}

#[async_trait]
pub trait SettingsSource: Send + Sync {
    /// `Ok(None)` when the setting was never written.
    async fn booking_window_days(&self) -> Result<Option<u32>, SourceError>;
}

#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    async fn subscription(&self, client_id: Ulid) -> Result<Option<Subscription>, SourceError>;

    async fn has_pending_subscription_booking(&self, client_id: Ulid) -> Result<bool, SourceError>;
}

#[async_trait]
pub trait BookingSink: Send + Sync {
    /// Persist `appt`. The sink's own checks are the final authority: it
    /// answers `SinkError::Conflict` rather than writing a double booking, and
    /// `SinkError::SubscriptionPending` rather than a second pending
    /// subscription booking for one client.
    async fn insert_appointment(&self, appt: NewAppointment) -> Result<Appointment, SinkError>;
}

/// Everything [`BookingDesk`](crate::engine::BookingDesk) talks to.
pub trait Backend:
    AppointmentSource + CatalogSource + SettingsSource + SubscriptionSource + BookingSink
{
}

impl<T> Backend for T where
    T: AppointmentSource + CatalogSource + SettingsSource + SubscriptionSource + BookingSink
{
}
