//! Hard caps on catalog and reservation sizes.

pub const MAX_RESOURCES: usize = 10_000;
pub const MAX_RESERVATIONS_PER_RESOURCE: usize = 100_000;

pub const MAX_RESOURCE_NAME_LEN: usize = 200;
pub const MAX_BOOKER_NAME_LEN: usize = 100;
pub const MAX_PHONE_LEN: usize = 20;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_NOTES_LEN: usize = 2_000;

/// Widest span `availability_calendar` will compute in one call.
pub const MAX_CALENDAR_DAYS: u32 = 62;

/// Shortest free window that still counts as bookable for the calendar.
pub const MIN_BOOKABLE_MINUTES: i64 = 60;
