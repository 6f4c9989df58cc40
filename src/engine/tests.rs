use async_trait::async_trait;
use chrono::TimeZone;

use super::*;
use crate::ports::*;
use crate::store::InMemoryStore;

// ── Fixtures ─────────────────────────────────────────────

/// Lisbon wall clock.
fn lisbon(month: u32, day: u32, h: u32, m: u32) -> DateTime<Utc> {
    chrono_tz::Europe::Lisbon
        .with_ymd_and_hms(2025, month, day, h, m, 0)
        .unwrap()
        .with_timezone(&Utc)
}

fn june(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
}

fn at(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

/// Store plus the faults a real backend can throw at the desk.
#[derive(Default)]
struct TestBackend {
    store: InMemoryStore,
    fail_appointments: bool,
    fail_roster: bool,
    fail_settings: bool,
    /// Pending-booking lookups lag behind writes and always answer `false`.
    stale_pending: bool,
    /// Another client books the same chair just before every insert.
    race: bool,
}

#[async_trait]
impl AppointmentSource for TestBackend {
    async fn appointments_on(&self, date: NaiveDate) -> Result<Vec<Appointment>, SourceError> {
        if self.fail_appointments {
            return Err(SourceError::Unavailable("appointments timed out".into()));
        }
        self.store.appointments_on(date).await
    }
}

#[async_trait]
impl CatalogSource for TestBackend {
    async fn service(&self, id: Ulid) -> Result<Option<Service>, SourceError> {
        self.store.service(id).await
    }

    async fn barbers_for_service(&self, service_id: Ulid) -> Result<Vec<Barber>, SourceError> {
        if self.fail_roster {
            return Err(SourceError::Unavailable("roster timed out".into()));
        }
        self.store.barbers_for_service(service_id).await
    }
}

#[async_trait]
impl SettingsSource for TestBackend {
    async fn booking_window_days(&self) -> Result<Option<u32>, SourceError> {
        if self.fail_settings {
            return Err(SourceError::Unavailable("settings timed out".into()));
        }
        self.store.booking_window_days().await
    }
}

#[async_trait]
impl SubscriptionSource for TestBackend {
    async fn subscription(&self, client_id: Ulid) -> Result<Option<Subscription>, SourceError> {
        self.store.subscription(client_id).await
    }

    async fn has_pending_subscription_booking(&self, client_id: Ulid) -> Result<bool, SourceError> {
        if self.stale_pending {
            return Ok(false);
        }
        self.store.has_pending_subscription_booking(client_id).await
    }
}

#[async_trait]
impl BookingSink for TestBackend {
    async fn insert_appointment(&self, appt: NewAppointment) -> Result<Appointment, SinkError> {
        if self.race {
            let rival = NewAppointment {
                id: Ulid::new(),
                client_id: None,
                subscription: false,
                status: AppointmentStatus::Confirmed,
                ..appt.clone()
            };
            self.store.insert_appointment(rival).await?;
        }
        self.store.insert_appointment(appt).await
    }
}

struct Shop {
    desk: BookingDesk<TestBackend>,
    cut: Ulid,
    ana: Ulid,
    bruno: Ulid,
}

impl Shop {
    fn store(&self) -> &InMemoryStore {
        &self.desk.backend().store
    }

    /// Confirmed appointment for `barber` between two local times on `date`.
    async fn book(&self, barber: Ulid, date: NaiveDate, from: NaiveTime, to: NaiveTime) -> Appointment {
        let clock = self.desk.clock();
        let span = Span::new(
            clock.instant_of(date, from).unwrap(),
            clock.instant_of(date, to).unwrap(),
        );
        self.store()
            .insert_appointment(NewAppointment {
                id: Ulid::new(),
                barber_id: barber,
                service_id: self.cut,
                client_id: None,
                date,
                span,
                status: AppointmentStatus::Confirmed,
                subscription: false,
            })
            .await
            .unwrap()
    }

    fn request(&self, client_id: Option<Ulid>, barber_id: Ulid, date: NaiveDate, start: NaiveTime) -> BookingRequest {
        BookingRequest {
            client_id,
            service_id: self.cut,
            barber_id,
            slot: ProposedBooking { date, start },
        }
    }
}

fn shop_with(backend: TestBackend) -> Shop {
    let cut = Ulid::new();
    backend
        .store
        .upsert_service(Service {
            id: cut,
            name: "Cut".into(),
            duration_min: 30,
            active: true,
        })
        .unwrap();
    let ana = Ulid::new();
    let bruno = Ulid::new();
    for (id, name) in [(ana, "Ana"), (bruno, "Bruno")] {
        backend
            .store
            .upsert_barber(Barber {
                id,
                name: name.into(),
                active: true,
                services: vec![cut],
                subscription_capacity: 3,
            })
            .unwrap();
    }
    let desk = BookingDesk::new(Arc::new(backend), ShopConfig::default()).unwrap();
    Shop { desk, cut, ana, bruno }
}

fn shop() -> Shop {
    shop_with(TestBackend::default())
}

// ── Construction ─────────────────────────────────────────

#[test]
fn desk_rejects_invalid_config() {
    let cfg = ShopConfig {
        opening: 20 * 60,
        ..ShopConfig::default()
    };
    let result = BookingDesk::new(Arc::new(TestBackend::default()), cfg);
    assert!(matches!(result, Err(EngineError::InvalidInput(_))));
}

// ── Day view ─────────────────────────────────────────────

#[tokio::test]
async fn day_view_flags_only_fully_booked_slots() {
    let shop = shop();
    shop.book(shop.ana, june(2), at(10, 0), at(11, 0)).await;
    shop.book(shop.bruno, june(2), at(10, 30), at(11, 0)).await;

    let view = shop.desk.day_view(june(2), shop.cut, lisbon(6, 1, 12, 0)).await.unwrap();

    assert_eq!(view.fully_booked, BTreeSet::from([at(10, 15), at(10, 30)]));
    let ten = view.slots.iter().find(|s| s.start == at(10, 0)).unwrap();
    assert_eq!(ten.free_barbers, 1);
    let eleven = view.slots.iter().find(|s| s.start == at(11, 0)).unwrap();
    assert_eq!(eleven.free_barbers, 2);
    assert_eq!(view.slots.len(), 30);
}

#[tokio::test]
async fn day_view_for_today_respects_lead_time() {
    let shop = shop();
    let view = shop.desk.day_view(june(1), shop.cut, lisbon(6, 1, 14, 10)).await.unwrap();
    assert_eq!(view.slots.first().map(|s| s.start), Some(at(15, 15)));
}

#[tokio::test]
async fn cancelled_appointments_free_the_slot() {
    let shop = shop();
    let a = shop.book(shop.ana, june(2), at(10, 0), at(10, 30)).await;
    let b = shop.book(shop.bruno, june(2), at(10, 0), at(10, 30)).await;
    let now = lisbon(6, 1, 12, 0);

    let view = shop.desk.day_view(june(2), shop.cut, now).await.unwrap();
    assert!(view.fully_booked.contains(&at(10, 0)));

    shop.store().cancel(a.id).await.unwrap();
    shop.store().cancel(b.id).await.unwrap();
    let view = shop.desk.day_view(june(2), shop.cut, now).await.unwrap();
    assert!(view.fully_booked.is_empty());
}

#[tokio::test]
async fn day_view_fails_closed_when_appointments_unreadable() {
    let shop = shop_with(TestBackend {
        fail_appointments: true,
        ..TestBackend::default()
    });
    let result = shop.desk.day_view(june(2), shop.cut, lisbon(6, 1, 12, 0)).await;
    assert!(matches!(result, Err(EngineError::DataUnavailable(_))));
}

#[tokio::test]
async fn day_view_fails_closed_when_roster_unreadable() {
    let shop = shop_with(TestBackend {
        fail_roster: true,
        ..TestBackend::default()
    });
    let result = shop.desk.free_barbers(june(2), at(10, 0), shop.cut, lisbon(6, 1, 12, 0)).await;
    assert!(matches!(result, Err(EngineError::DataUnavailable(_))));
}

#[tokio::test]
async fn unknown_and_inactive_services() {
    let shop = shop();
    let ghost = Ulid::new();
    let now = lisbon(6, 1, 12, 0);
    assert_eq!(
        shop.desk.day_view(june(2), ghost, now).await,
        Err(EngineError::NotFound(ghost))
    );

    let retired = Ulid::new();
    shop.store()
        .upsert_service(Service {
            id: retired,
            name: "Hot towel".into(),
            duration_min: 20,
            active: false,
        })
        .unwrap();
    assert!(matches!(
        shop.desk.day_view(june(2), retired, now).await,
        Err(EngineError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn inactive_barber_is_not_offered() {
    let shop = shop();
    shop.store()
        .upsert_barber(Barber {
            id: shop.bruno,
            name: "Bruno".into(),
            active: false,
            services: vec![shop.cut],
            subscription_capacity: 3,
        })
        .unwrap();
    let free = shop
        .desk
        .free_barbers(june(2), at(10, 0), shop.cut, lisbon(6, 1, 12, 0))
        .await
        .unwrap();
    assert_eq!(free, vec![shop.ana]);
}

// ── Slot detail ──────────────────────────────────────────

#[tokio::test]
async fn free_barbers_follow_half_open_overlap() {
    let shop = shop();
    shop.book(shop.ana, june(2), at(10, 0), at(10, 45)).await;
    let now = lisbon(6, 1, 12, 0);

    let at_1030 = shop.desk.free_barbers(june(2), at(10, 30), shop.cut, now).await.unwrap();
    assert_eq!(at_1030, vec![shop.bruno]);
    let at_1045 = shop.desk.free_barbers(june(2), at(10, 45), shop.cut, now).await.unwrap();
    assert_eq!(at_1045, vec![shop.ana, shop.bruno]);
}

#[tokio::test]
async fn starts_off_the_grid_have_nobody_free() {
    let shop = shop();
    let now = lisbon(6, 1, 12, 0);
    let in_break = shop.desk.free_barbers(june(2), at(13, 30), shop.cut, now).await.unwrap();
    assert!(in_break.is_empty());
    let too_late = shop.desk.free_barbers(june(2), at(18, 45), shop.cut, now).await.unwrap();
    assert!(too_late.is_empty());
}

#[tokio::test]
async fn selection_cleared_when_barber_gets_booked() {
    let shop = shop();
    let now = lisbon(6, 1, 12, 0);
    let free = shop.desk.free_barbers(june(2), at(11, 0), shop.cut, now).await.unwrap();
    let mut selection = BarberSelection::new();
    assert_eq!(selection.reconcile(&free), SelectionChange::Unchanged);
    assert!(selection.select(shop.ana, &free));

    shop.book(shop.ana, june(2), at(11, 0), at(11, 30)).await;
    let free = shop.desk.free_barbers(june(2), at(11, 0), shop.cut, now).await.unwrap();
    assert_eq!(
        selection.reconcile(&free),
        SelectionChange::Replaced {
            previous: shop.ana,
            with: shop.bruno
        }
    );
}

// ── Submission ───────────────────────────────────────────

#[tokio::test]
async fn guest_booking_is_written_confirmed() {
    let shop = shop();
    let req = shop.request(None, shop.ana, june(2), at(10, 0));
    let outcome = shop.desk.submit(&req, lisbon(6, 1, 12, 0)).await.unwrap();

    let BookingOutcome::Booked(appt) = outcome else {
        panic!("expected booking, got {outcome:?}");
    };
    assert_eq!(appt.status, AppointmentStatus::Confirmed);
    assert!(!appt.subscription);
    assert_eq!(appt.date, june(2));
    assert_eq!(appt.span.duration_ms(), 30 * MINUTE_MS);
    assert_eq!(shop.store().appointments_on(june(2)).await.unwrap(), vec![appt]);
}

#[tokio::test]
async fn second_booking_for_same_chair_is_turned_away() {
    let shop = shop();
    let now = lisbon(6, 1, 12, 0);
    let first = shop.request(None, shop.ana, june(2), at(10, 0));
    assert!(shop.desk.submit(&first, now).await.unwrap().is_booked());

    let overlapping = shop.request(None, shop.ana, june(2), at(10, 15));
    assert_eq!(
        shop.desk.submit(&overlapping, now).await.unwrap(),
        BookingOutcome::BarberUnavailable {
            free_barbers: vec![shop.bruno]
        }
    );
}

#[tokio::test]
async fn stale_read_reports_slot_taken_with_fresh_state() {
    let shop = shop_with(TestBackend {
        race: true,
        ..TestBackend::default()
    });
    let req = shop.request(None, shop.ana, june(2), at(10, 0));
    let outcome = shop.desk.submit(&req, lisbon(6, 1, 12, 0)).await.unwrap();
    assert_eq!(
        outcome,
        BookingOutcome::SlotTaken {
            free_barbers: vec![shop.bruno]
        }
    );
    // Only the rival landed.
    assert_eq!(shop.store().appointments_on(june(2)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn submission_fails_closed_when_appointments_unreadable() {
    let shop = shop_with(TestBackend {
        fail_appointments: true,
        ..TestBackend::default()
    });
    let req = shop.request(None, shop.ana, june(2), at(10, 0));
    let result = shop.desk.submit(&req, lisbon(6, 1, 12, 0)).await;
    assert!(matches!(result, Err(EngineError::DataUnavailable(_))));
    assert!(shop.store().appointments_on(june(2)).await.unwrap().is_empty());
}

#[tokio::test]
async fn lead_time_is_rechecked_at_submission() {
    let shop = shop();
    let req = shop.request(None, shop.ana, june(1), at(11, 0));
    // Offered at 09:55, submitted at 10:05.
    let offered = shop.desk.free_barbers(june(1), at(11, 0), shop.cut, lisbon(6, 1, 9, 55)).await.unwrap();
    assert_eq!(offered.len(), 2);
    assert_eq!(
        shop.desk.submit(&req, lisbon(6, 1, 10, 5)).await.unwrap(),
        BookingOutcome::Rejected(PolicyRejection::InsufficientLeadTime)
    );
}

#[tokio::test]
async fn window_defaults_to_seven_days() {
    let shop = shop();
    let now = lisbon(6, 1, 10, 0);
    let ninth = shop.request(None, shop.ana, june(9), at(10, 0));
    assert_eq!(
        shop.desk.submit(&ninth, now).await.unwrap(),
        BookingOutcome::Rejected(PolicyRejection::OutsideBookingWindow)
    );
    let eighth = shop.request(None, shop.ana, june(8), at(10, 0));
    assert!(shop.desk.submit(&eighth, now).await.unwrap().is_booked());
}

#[tokio::test]
async fn window_setting_overrides_default() {
    let shop = shop();
    shop.store().set_booking_window_days(Some(14)).await;
    assert_eq!(shop.desk.booking_window().await.max_advance_days, 14);
    let req = shop.request(None, shop.ana, june(12), at(10, 0));
    assert!(shop.desk.submit(&req, lisbon(6, 1, 10, 0)).await.unwrap().is_booked());
}

#[tokio::test]
async fn unreadable_window_setting_falls_back() {
    let shop = shop_with(TestBackend {
        fail_settings: true,
        ..TestBackend::default()
    });
    shop.store().set_booking_window_days(Some(30)).await;
    assert_eq!(shop.desk.booking_window().await, BookingWindowPolicy::new(7));
}

#[tokio::test]
async fn subscriber_books_pending_and_only_once() {
    let shop = shop();
    let client = Ulid::new();
    shop.store().set_subscription(
        client,
        Subscription {
            active: true,
            period_end: lisbon(6, 30, 0, 0),
        },
    );
    let now = lisbon(6, 1, 10, 0);

    // Beyond the seven-day window: subscribers are exempt.
    let far = shop.request(Some(client), shop.ana, june(20), at(10, 0));
    let BookingOutcome::Booked(appt) = shop.desk.submit(&far, now).await.unwrap() else {
        panic!("subscriber booking should be written");
    };
    assert_eq!(appt.status, AppointmentStatus::Pending);
    assert!(appt.subscription);

    let again = shop.request(Some(client), shop.bruno, june(3), at(10, 0));
    assert_eq!(
        shop.desk.submit(&again, now).await.unwrap(),
        BookingOutcome::Rejected(PolicyRejection::PendingSubscriptionBooking)
    );

    shop.store().confirm(appt.id).await.unwrap();
    assert!(shop.desk.submit(&again, now).await.unwrap().is_booked());
}

#[tokio::test]
async fn lapsed_subscriber_is_treated_as_regular_client() {
    let shop = shop();
    let client = Ulid::new();
    shop.store().set_subscription(
        client,
        Subscription {
            active: true,
            period_end: lisbon(5, 31, 0, 0),
        },
    );
    let now = lisbon(6, 1, 10, 0);
    let state = shop.desk.subscription_state(Some(client), now).await.unwrap();
    assert_eq!(state, SubscriptionState::none());

    let far = shop.request(Some(client), shop.ana, june(20), at(10, 0));
    assert_eq!(
        shop.desk.submit(&far, now).await.unwrap(),
        BookingOutcome::Rejected(PolicyRejection::OutsideBookingWindow)
    );
}

#[tokio::test]
async fn off_grid_submission_is_invalid() {
    let shop = shop();
    let now = lisbon(6, 1, 10, 0);
    let in_break = shop.request(None, shop.ana, june(2), at(13, 30));
    assert!(matches!(
        shop.desk.submit(&in_break, now).await,
        Err(EngineError::InvalidInput(_))
    ));
    let odd_minute = shop.request(None, shop.ana, june(2), at(10, 7));
    assert!(matches!(
        shop.desk.submit(&odd_minute, now).await,
        Err(EngineError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn unqualified_barber_cannot_be_booked() {
    let shop = shop();
    let stranger = Ulid::new();
    shop.store()
        .upsert_barber(Barber {
            id: stranger,
            name: "Carla".into(),
            active: true,
            services: vec![],
            subscription_capacity: 0,
        })
        .unwrap();
    let req = shop.request(None, stranger, june(2), at(10, 0));
    assert_eq!(
        shop.desk.submit(&req, lisbon(6, 1, 10, 0)).await.unwrap(),
        BookingOutcome::BarberUnavailable {
            free_barbers: vec![shop.ana, shop.bruno]
        }
    );
}

fn subscribe_client(shop: &Shop) -> Ulid {
    let client = Ulid::new();
    shop.store().set_subscription(
        client,
        Subscription {
            active: true,
            period_end: lisbon(6, 30, 0, 0),
        },
    );
    client
}

#[tokio::test]
async fn stale_pending_read_is_caught_by_the_store() {
    let shop = shop_with(TestBackend {
        stale_pending: true,
        ..TestBackend::default()
    });
    let client = subscribe_client(&shop);
    let now = lisbon(6, 1, 10, 0);

    let first = shop.request(Some(client), shop.ana, june(3), at(10, 0));
    assert!(shop.desk.submit(&first, now).await.unwrap().is_booked());
    let second = shop.request(Some(client), shop.bruno, june(4), at(10, 0));
    assert_eq!(
        shop.desk.submit(&second, now).await.unwrap(),
        BookingOutcome::Rejected(PolicyRejection::PendingSubscriptionBooking)
    );
    assert!(shop.store().appointments_on(june(4)).await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_subscriber_submissions_book_once() {
    let shop = shop();
    let client = subscribe_client(&shop);
    let now = lisbon(6, 1, 10, 0);
    let on_ana = shop.request(Some(client), shop.ana, june(3), at(10, 0));
    let on_bruno = shop.request(Some(client), shop.bruno, june(3), at(11, 0));

    let (a, b) = tokio::join!(shop.desk.submit(&on_ana, now), shop.desk.submit(&on_bruno, now));
    let mut outcomes = [a.unwrap(), b.unwrap()];
    outcomes.sort_by_key(|o| !o.is_booked());
    assert!(outcomes[0].is_booked());
    assert_eq!(
        outcomes[1],
        BookingOutcome::Rejected(PolicyRejection::PendingSubscriptionBooking)
    );
}

#[tokio::test]
async fn retired_barber_drops_out_of_free_set() {
    let shop = shop();
    let now = lisbon(6, 1, 10, 0);
    shop.store().retire_barber(shop.bruno).unwrap();
    let free = shop.desk.free_barbers(june(2), at(10, 0), shop.cut, now).await.unwrap();
    assert_eq!(free, vec![shop.ana]);
    let req = shop.request(None, shop.bruno, june(2), at(10, 0));
    assert_eq!(
        shop.desk.submit(&req, now).await.unwrap(),
        BookingOutcome::BarberUnavailable {
            free_barbers: vec![shop.ana]
        }
    );
}
