use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

// ── Snapshot ──────────────────────────────────────────────────────

/// Appointments for one business day, as read at a single point in time.
///
/// Every resolution takes one of these explicitly; nothing is cached between
/// calls, so a stale snapshot is the caller's to refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySnapshot {
    date: NaiveDate,
    appointments: Vec<Appointment>,
}

impl DaySnapshot {
    /// Rows dated elsewhere are dropped. A malformed row rejects the whole snapshot.
    pub fn new(date: NaiveDate, appointments: Vec<Appointment>) -> Result<Self, EngineError> {
        if appointments.len() > MAX_APPOINTMENTS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many appointments in snapshot"));
        }
        if appointments.iter().any(|a| a.span.start >= a.span.end) {
            return Err(EngineError::InvalidSnapshot("appointment ends before it starts"));
        }
        let appointments = appointments.into_iter().filter(|a| a.date == date).collect();
        Ok(Self { date, appointments })
    }

    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            appointments: Vec::new(),
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn appointments(&self) -> &[Appointment] {
        &self.appointments
    }
}

// ── Busy index ────────────────────────────────────────────────────

/// Per-barber occupied time, sorted and merged into disjoint spans.
#[derive(Debug, Default)]
pub struct BusyIndex {
    busy: HashMap<Ulid, Vec<Span>>,
}

impl BusyIndex {
    pub fn build(snapshot: &DaySnapshot) -> Self {
        let mut busy: HashMap<Ulid, Vec<Span>> = HashMap::new();
        for appt in snapshot.appointments().iter().filter(|a| a.occupies()) {
            busy.entry(appt.barber_id).or_default().push(appt.span);
        }
        for spans in busy.values_mut() {
            spans.sort_by_key(|s| s.start);
            *spans = merge_overlapping(spans);
        }
        Self { busy }
    }

    /// Half-open overlap against the barber's counted appointments.
    pub fn is_busy(&self, barber_id: &Ulid, span: &Span) -> bool {
        let Some(spans) = self.busy.get(barber_id) else {
            return false;
        };
        // Disjoint and sorted: only the last span starting before `span.end` can reach it.
        let right_bound = spans.partition_point(|s| s.start < span.end);
        spans[..right_bound]
            .last()
            .is_some_and(|s| s.end > span.start)
    }

    pub fn busy_spans(&self, barber_id: &Ulid) -> &[Span] {
        self.busy.get(barber_id).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

// ── Resolution ────────────────────────────────────────────────────

/// Active barbers qualified for `service_id`, in roster order, without duplicates.
pub fn qualified_roster<'a>(barbers: &'a [Barber], service_id: &Ulid) -> Vec<&'a Barber> {
    let mut seen = HashSet::new();
    barbers
        .iter()
        .filter(|b| b.can_perform(service_id) && seen.insert(b.id))
        .collect()
}

const SNAPSHOT_DATE_MISMATCH: EngineError = EngineError::InvalidSnapshot("snapshot is for a different date");

fn check_roster(barbers: &[Barber]) -> Result<(), EngineError> {
    if barbers.len() > MAX_BARBERS_PER_QUERY {
        return Err(EngineError::LimitExceeded("too many barbers"));
    }
    Ok(())
}

fn free_for(roster: &[&Barber], index: &BusyIndex, slot: &CandidateSlot) -> Vec<Ulid> {
    roster
        .iter()
        .filter(|b| !index.is_busy(&b.id, &slot.span))
        .map(|b| b.id)
        .collect()
}

/// Free-barber count for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotAvailability {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub free_barbers: usize,
}

impl SlotAvailability {
    pub fn fully_booked(&self) -> bool {
        self.free_barbers == 0
    }
}

/// Free-barber counts for every candidate, in candidate order.
pub fn resolve_day_counts(
    slots: &[CandidateSlot],
    barbers: &[Barber],
    service_id: &Ulid,
    snapshot: &DaySnapshot,
) -> Result<Vec<SlotAvailability>, EngineError> {
    check_roster(barbers)?;
    if slots.iter().any(|s| s.date != snapshot.date()) {
        return Err(SNAPSHOT_DATE_MISMATCH);
    }
    let roster = qualified_roster(barbers, service_id);
    let index = BusyIndex::build(snapshot);
    Ok(slots
        .iter()
        .map(|slot| SlotAvailability {
            start: slot.start,
            end: slot.end,
            free_barbers: free_for(&roster, &index, slot).len(),
        })
        .collect())
}

/// Starts of candidates with zero free qualified barbers.
///
/// Partially booked candidates are not reported; per-barber detail is only
/// worked out for a selected slot via [`resolve_slot_availability`].
pub fn resolve_day_availability(
    slots: &[CandidateSlot],
    barbers: &[Barber],
    service_id: &Ulid,
    snapshot: &DaySnapshot,
) -> Result<BTreeSet<NaiveTime>, EngineError> {
    Ok(resolve_day_counts(slots, barbers, service_id, snapshot)?
        .into_iter()
        .filter(SlotAvailability::fully_booked)
        .map(|s| s.start)
        .collect())
}

/// Ids of qualified barbers free for `slot`, in roster order.
pub fn resolve_slot_availability(
    slot: &CandidateSlot,
    barbers: &[Barber],
    service_id: &Ulid,
    snapshot: &DaySnapshot,
) -> Result<Vec<Ulid>, EngineError> {
    check_roster(barbers)?;
    if slot.date != snapshot.date() {
        return Err(SNAPSHOT_DATE_MISMATCH);
    }
    let roster = qualified_roster(barbers, service_id);
    let index = BusyIndex::build(snapshot);
    Ok(free_for(&roster, &index, slot))
}

// ── Selection ─────────────────────────────────────────────────────

/// What [`BarberSelection::reconcile`] did to the current choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionChange {
    Unchanged,
    /// Nothing was selected and exactly one barber is free.
    Defaulted(Ulid),
    /// The selected barber is no longer free and there is no single replacement.
    Cleared { previous: Ulid },
    /// The selected barber is no longer free; the only free barber took its place.
    Replaced { previous: Ulid, with: Ulid },
}

/// The client's barber choice for a selected slot.
///
/// Never left pointing at a barber outside the latest free set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BarberSelection {
    selected: Option<Ulid>,
}

impl BarberSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected(&self) -> Option<Ulid> {
        self.selected
    }

    /// Accepts `barber_id` only if it is in `free`.
    pub fn select(&mut self, barber_id: Ulid, free: &[Ulid]) -> bool {
        if free.contains(&barber_id) {
            self.selected = Some(barber_id);
            true
        } else {
            false
        }
    }

    pub fn clear(&mut self) {
        self.selected = None;
    }

    /// Re-apply the selection rules against a freshly resolved free set.
    pub fn reconcile(&mut self, free: &[Ulid]) -> SelectionChange {
        let stale = match self.selected {
            Some(current) if free.contains(&current) => return SelectionChange::Unchanged,
            other => other,
        };
        self.selected = None;

        if let [only] = free {
            self.selected = Some(*only);
            return match stale {
                Some(previous) => SelectionChange::Replaced { previous, with: *only },
                None => SelectionChange::Defaulted(*only),
            };
        }

        match stale {
            Some(previous) => SelectionChange::Cleared { previous },
            None => SelectionChange::Unchanged,
        }
    }
}
