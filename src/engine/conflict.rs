use crate::model::*;

use super::SinkError;

/// Write-side guard: refuse `span` if any counted appointment on the ledger overlaps it.
///
/// Reports the earliest blocking appointment.
pub(crate) fn check_no_conflict(ledger: &BarberLedger, span: &Span) -> Result<(), SinkError> {
    match ledger.overlapping(span).find(|a| a.occupies()) {
        Some(blocking) => Err(SinkError::Conflict(blocking.id)),
        None => Ok(()),
    }
}
