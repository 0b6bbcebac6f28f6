use crate::model::{Appointment, Ms, Status};
use crate::time::{BusinessHours, MINUTE_MS, OperatingZone};

/// Bookings allowed at one exact `(start, end)` slot.
pub const MAX_CAPACITY: u32 = 3;
pub const GRANULARITY_MINUTES: u32 = 10;
pub const MIN_DURATION_MINUTES: u32 = 60;
pub const MAX_DURATION_MINUTES: u32 = 9 * 60;
/// Window length used when enumerating bookable slots.
pub const DEFAULT_SLOT_MINUTES: u32 = 60;
/// Operating timezone offset (UTC+09:00).
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 9 * 60;

/// Business rules applied by the availability engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulePolicy {
    pub zone: OperatingZone,
    pub hours: BusinessHours,
    pub granularity_minutes: u32,
    pub min_duration_minutes: u32,
    pub max_duration_minutes: u32,
    pub max_capacity: u32,
    /// Whether cancelled bookings still occupy their slot.
    pub count_cancelled_toward_capacity: bool,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            zone: OperatingZone::from_offset_minutes(DEFAULT_UTC_OFFSET_MINUTES)
                .unwrap_or_else(|_| OperatingZone::utc()),
            hours: BusinessHours::default(),
            granularity_minutes: GRANULARITY_MINUTES,
            min_duration_minutes: MIN_DURATION_MINUTES,
            max_duration_minutes: MAX_DURATION_MINUTES,
            max_capacity: MAX_CAPACITY,
            count_cancelled_toward_capacity: true,
        }
    }
}

impl SchedulePolicy {
    /// Does `appointment` take one unit of its slot's capacity?
    pub fn occupies(&self, appointment: &Appointment) -> bool {
        self.count_cancelled_toward_capacity || appointment.status != Status::Cancelled
    }

    pub fn min_duration_ms(&self) -> Ms {
        Ms::from(self.min_duration_minutes) * MINUTE_MS
    }

    pub fn max_duration_ms(&self) -> Ms {
        Ms::from(self.max_duration_minutes) * MINUTE_MS
    }
}
