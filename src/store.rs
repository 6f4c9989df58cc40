use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};
use ulid::Ulid;

use crate::clock::BusinessClock;
use crate::engine::{EngineError, SinkError, SourceError, check_no_conflict};
use crate::limits::*;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::ports::*;

pub type SharedLedger = Arc<RwLock<BarberLedger>>;

/// Reference backend: catalog, settings, subscriptions and one ledger per barber.
///
/// Inserts and reactivations take the barber's write lock and re-check overlap,
/// so two racing bookings for the same chair cannot both land. Pending
/// subscription bookings are claimed per client before any ledger is touched,
/// so two racing subscriber bookings on different chairs cannot both land either.
pub struct InMemoryStore {
    services: DashMap<Ulid, Service>,
    barbers: DashMap<Ulid, Barber>,
    ledgers: DashMap<Ulid, SharedLedger>,
    /// Reverse lookup: appointment id → barber id
    appointment_to_barber: DashMap<Ulid, Ulid>,
    subscriptions: DashMap<Ulid, Subscription>,
    /// client id → their one pending subscription appointment
    pending_subscription: DashMap<Ulid, Ulid>,
    booking_window_days: RwLock<Option<u32>>,
    pub notify: Arc<NotifyHub>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(NotifyHub::new()))
    }
}

impl InMemoryStore {
    pub fn new(notify: Arc<NotifyHub>) -> Self {
        Self {
            services: DashMap::new(),
            barbers: DashMap::new(),
            ledgers: DashMap::new(),
            appointment_to_barber: DashMap::new(),
            subscriptions: DashMap::new(),
            pending_subscription: DashMap::new(),
            booking_window_days: RwLock::new(None),
            notify,
        }
    }

    // ── Catalog ──────────────────────────────────────────────

    pub fn upsert_service(&self, service: Service) -> Result<(), EngineError> {
        if service.name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("service name too long"));
        }
        if service.duration_min == 0 {
            return Err(EngineError::InvalidInput("service duration must be positive"));
        }
        if service.duration_min > MAX_SERVICE_DURATION_MIN {
            return Err(EngineError::LimitExceeded("service too long"));
        }
        self.services.insert(service.id, service);
        Ok(())
    }

    pub fn upsert_barber(&self, barber: Barber) -> Result<(), EngineError> {
        if barber.name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("barber name too long"));
        }
        if !self.barbers.contains_key(&barber.id) && self.barbers.len() >= MAX_BARBERS_PER_QUERY {
            return Err(EngineError::LimitExceeded("too many barbers"));
        }
        self.ledgers
            .entry(barber.id)
            .or_insert_with(|| Arc::new(RwLock::new(BarberLedger::new(barber.id))));
        self.barbers.insert(barber.id, barber);
        Ok(())
    }

    /// Take a barber off the roster. Their appointments stay on record; anyone
    /// watching the barber sees the channel close.
    pub fn retire_barber(&self, barber_id: Ulid) -> Result<Barber, EngineError> {
        let retired = {
            let mut barber = self
                .barbers
                .get_mut(&barber_id)
                .ok_or(EngineError::NotFound(barber_id))?;
            barber.active = false;
            barber.clone()
        };
        self.notify.remove(&barber_id);
        info!(barber = %barber_id, "barber retired");
        Ok(retired)
    }

    pub fn set_subscription(&self, client_id: Ulid, subscription: Subscription) {
        self.subscriptions.insert(client_id, subscription);
    }

    pub async fn set_booking_window_days(&self, days: Option<u32>) {
        *self.booking_window_days.write().await = days;
    }

    fn get_ledger(&self, barber_id: &Ulid) -> Option<SharedLedger> {
        self.ledgers.get(barber_id).map(|e| e.value().clone())
    }

    /// Record `appointment_id` as the client's pending subscription booking.
    fn claim_subscription(&self, client_id: Ulid, appointment_id: Ulid) -> Result<(), SinkError> {
        match self.pending_subscription.entry(client_id) {
            Entry::Occupied(held) if *held.get() != appointment_id => Err(SinkError::SubscriptionPending(*held.get())),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                slot.insert(appointment_id);
                Ok(())
            }
        }
    }

    fn release_subscription(&self, client_id: Ulid, appointment_id: Ulid) {
        self.pending_subscription
            .remove_if(&client_id, |_, held| *held == appointment_id);
    }

    // ── Status transitions ───────────────────────────────────

    pub async fn confirm(&self, id: Ulid) -> Result<Appointment, SinkError> {
        self.set_status(id, AppointmentStatus::Confirmed).await
    }

    pub async fn complete(&self, id: Ulid) -> Result<Appointment, SinkError> {
        self.set_status(id, AppointmentStatus::Completed).await
    }

    pub async fn cancel(&self, id: Ulid) -> Result<Appointment, SinkError> {
        self.set_status(id, AppointmentStatus::Cancelled).await
    }

    /// Moving a non-counted appointment back into a counted status re-runs the overlap check.
    pub async fn set_status(&self, id: Ulid, status: AppointmentStatus) -> Result<Appointment, SinkError> {
        let barber_id = self
            .appointment_to_barber
            .get(&id)
            .map(|e| *e.value())
            .ok_or(SinkError::NotFound(id))?;
        let ledger = self.get_ledger(&barber_id).ok_or(SinkError::NotFound(barber_id))?;
        let mut guard = ledger.write().await;

        let (was_counted, span, old_claim) = {
            let appt = guard.get_mut(&id).ok_or(SinkError::NotFound(id))?;
            (appt.occupies(), appt.span, subscription_claim(appt.subscription, appt.status, appt.client_id))
        };
        if !was_counted && status.occupies() {
            check_no_conflict(&guard, &span)?;
        }

        let appt = guard.get_mut(&id).ok_or(SinkError::NotFound(id))?;
        let new_claim = subscription_claim(appt.subscription, status, appt.client_id);
        match (old_claim, new_claim) {
            (None, Some(client)) => self.claim_subscription(client, id)?,
            (Some(client), None) => self.release_subscription(client, id),
            _ => {}
        }
        appt.status = status;
        let updated = appt.clone();
        drop(guard);

        info!(appointment = %id, barber = %barber_id, status = status.as_str(), "appointment status changed");
        self.notify.send(
            barber_id,
            &AppointmentEvent::StatusChanged { id, barber_id, status },
        );
        Ok(updated)
    }

    // ── Seeding ──────────────────────────────────────────────

    /// Load a fixture. Appointment times are business-local; the clock turns them into spans.
    pub async fn load_seed(&self, seed: Seed, clock: &BusinessClock) -> Result<usize, EngineError> {
        for service in seed.services {
            self.upsert_service(service)?;
        }
        for barber in seed.barbers {
            self.upsert_barber(barber)?;
        }
        for sub in seed.subscriptions {
            self.set_subscription(
                sub.client_id,
                Subscription {
                    active: sub.active,
                    period_end: sub.period_end,
                },
            );
        }
        if seed.booking_window_days.is_some() {
            self.set_booking_window_days(seed.booking_window_days).await;
        }

        let mut loaded = 0;
        for row in seed.appointments {
            let start = clock
                .instant_of(row.date, row.start)
                .ok_or(EngineError::InvalidInput("seed start time does not exist locally"))?;
            let end = clock
                .instant_of(row.date, row.end)
                .ok_or(EngineError::InvalidInput("seed end time does not exist locally"))?;
            if start >= end {
                return Err(EngineError::InvalidInput("seed appointment ends before it starts"));
            }
            let appt = NewAppointment {
                id: row.id.unwrap_or_else(Ulid::new),
                barber_id: row.barber_id,
                service_id: row.service_id,
                client_id: row.client_id,
                date: row.date,
                span: Span::new(start, end),
                status: row.status,
                subscription: row.subscription,
            };
            self.insert_appointment(appt).await.map_err(|e| match e {
                SinkError::Conflict(_) => EngineError::InvalidInput("seed appointments overlap"),
                SinkError::SubscriptionPending(_) => {
                    EngineError::InvalidInput("seed holds two pending subscription bookings for one client")
                }
                SinkError::NotFound(id) => EngineError::NotFound(id),
                SinkError::Invalid(msg) => EngineError::InvalidInput(msg),
                SinkError::Unavailable(msg) => EngineError::DataUnavailable(msg),
            })?;
            loaded += 1;
        }
        info!(appointments = loaded, "seed loaded");
        Ok(loaded)
    }
}

// ── Ports ────────────────────────────────────────────────────────

#[async_trait]
impl AppointmentSource for InMemoryStore {
    async fn appointments_on(&self, date: NaiveDate) -> Result<Vec<Appointment>, SourceError> {
        let ledgers: Vec<SharedLedger> = self.ledgers.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for ledger in ledgers {
            let guard = ledger.read().await;
            out.extend(guard.on_date(date).cloned());
        }
        out.sort_by(|a, b| a.span.start.cmp(&b.span.start).then(a.id.cmp(&b.id)));
        Ok(out)
    }
}

#[async_trait]
impl CatalogSource for InMemoryStore {
    async fn service(&self, id: Ulid) -> Result<Option<Service>, SourceError> {
        Ok(self.services.get(&id).map(|e| e.value().clone()))
    }

    async fn barbers_for_service(&self, service_id: Ulid) -> Result<Vec<Barber>, SourceError> {
        let mut roster: Vec<Barber> = self
            .barbers
            .iter()
            .filter(|e| e.value().services.contains(&service_id))
            .map(|e| e.value().clone())
            .collect();
        roster.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(roster)
    }
}

#[async_trait]
impl SettingsSource for InMemoryStore {
    async fn booking_window_days(&self) -> Result<Option<u32>, SourceError> {
        Ok(*self.booking_window_days.read().await)
    }
}

#[async_trait]
impl SubscriptionSource for InMemoryStore {
    async fn subscription(&self, client_id: Ulid) -> Result<Option<Subscription>, SourceError> {
        Ok(self.subscriptions.get(&client_id).map(|e| *e.value()))
    }

    async fn has_pending_subscription_booking(&self, client_id: Ulid) -> Result<bool, SourceError> {
        Ok(self.pending_subscription.contains_key(&client_id))
    }
}

#[async_trait]
impl BookingSink for InMemoryStore {
    async fn insert_appointment(&self, appt: NewAppointment) -> Result<Appointment, SinkError> {
        if appt.span.start >= appt.span.end {
            return Err(SinkError::Invalid("appointment ends before it starts"));
        }
        if self.appointment_to_barber.contains_key(&appt.id) {
            return Err(SinkError::Invalid("duplicate appointment id"));
        }
        let ledger = self
            .get_ledger(&appt.barber_id)
            .ok_or(SinkError::NotFound(appt.barber_id))?;

        let claim = subscription_claim(appt.subscription, appt.status, appt.client_id);
        if let Some(client) = claim
            && let Err(e) = self.claim_subscription(client, appt.id)
        {
            debug!(client = %client, "insert refused: {e}");
            return Err(e);
        }

        let mut guard = ledger.write().await;
        if appt.status.occupies()
            && let Err(e) = check_no_conflict(&guard, &appt.span)
        {
            drop(guard);
            if let Some(client) = claim {
                self.release_subscription(client, appt.id);
            }
            debug!(barber = %appt.barber_id, start = appt.span.start, "insert refused: {e}");
            return Err(e);
        }

        let stored: Appointment = appt.into();
        guard.insert(stored.clone());
        self.appointment_to_barber.insert(stored.id, stored.barber_id);
        drop(guard);

        info!(appointment = %stored.id, barber = %stored.barber_id, date = %stored.date, "appointment booked");
        self.notify.send(
            stored.barber_id,
            &AppointmentEvent::Booked {
                id: stored.id,
                barber_id: stored.barber_id,
                date: stored.date,
                span: stored.span,
            },
        );
        Ok(stored)
    }
}

/// The client a pending, subscription-covered appointment holds a claim for.
fn subscription_claim(subscription: bool, status: AppointmentStatus, client_id: Option<Ulid>) -> Option<Ulid> {
    (subscription && status == AppointmentStatus::Pending)
        .then_some(client_id)
        .flatten()
}

// ── Seed format ──────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub barbers: Vec<Barber>,
    #[serde(default)]
    pub appointments: Vec<SeedAppointment>,
    #[serde(default)]
    pub subscriptions: Vec<SeedSubscription>,
    #[serde(default)]
    pub booking_window_days: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SeedAppointment {
    #[serde(default)]
    pub id: Option<Ulid>,
    pub barber_id: Ulid,
    pub service_id: Ulid,
    #[serde(default)]
    pub client_id: Option<Ulid>,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub status: AppointmentStatus,
    #[serde(default)]
    pub subscription: bool,
}

#[derive(Debug, Deserialize)]
pub struct SeedSubscription {
    pub client_id: Ulid,
    pub active: bool,
    pub period_end: DateTime<Utc>,
}
