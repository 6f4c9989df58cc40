/// Max barbers considered in a single availability query.
pub const MAX_BARBERS_PER_QUERY: usize = 256;

/// Max appointments accepted in a single day snapshot.
pub const MAX_APPOINTMENTS_PER_DAY: usize = 10_000;

/// Longest service the generator will lay out (a full day).
pub const MAX_SERVICE_DURATION_MIN: u32 = 24 * 60;

/// Upper bound on any configured advance-booking window.
pub const MAX_ADVANCE_DAYS: u32 = 366;

/// Max length of a service or barber name.
pub const MAX_NAME_LEN: usize = 256;
