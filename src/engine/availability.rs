use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;
use crate::policy::SchedulePolicy;
use crate::time::slot_windows;

use super::{ScheduleError, ValidationError};

/// Read access to the appointments already holding a slot.
///
/// Capacity is keyed on exact `(start, end)` equality: two bookings that
/// merely overlap never count against each other.
pub trait SlotOccupancy {
    /// Appointments whose span equals `slot` exactly.
    fn at_slot(&self, slot: &Span) -> Vec<&Appointment>;
}

impl SlotOccupancy for [Appointment] {
    fn at_slot(&self, slot: &Span) -> Vec<&Appointment> {
        self.iter().filter(|a| a.span == *slot).collect()
    }
}

impl SlotOccupancy for Vec<Appointment> {
    fn at_slot(&self, slot: &Span) -> Vec<&Appointment> {
        self.as_slice().at_slot(slot)
    }
}

/// Occupants of `slot` that count toward capacity, ignoring `exclude`.
pub fn occupancy_count<O>(
    occupancy: &O,
    slot: &Span,
    exclude: Option<Ulid>,
    policy: &SchedulePolicy,
) -> u32
where
    O: SlotOccupancy + ?Sized,
{
    occupancy
        .at_slot(slot)
        .into_iter()
        .filter(|a| Some(a.id) != exclude && policy.occupies(a))
        .count() as u32
}

/// Check a draft against every booking rule and return the validated span.
///
/// All rules are evaluated and every failure is reported, in the order
/// presence, business hours, granularity, ordering/duration, capacity.
/// `exclude` is the draft's own id when revalidating an update.
pub fn validate<O>(
    draft: &AppointmentDraft,
    exclude: Option<Ulid>,
    occupancy: &O,
    policy: &SchedulePolicy,
) -> Result<Span, Vec<ValidationError>>
where
    O: SlotOccupancy + ?Sized,
{
    let mut errors = Vec::new();

    if draft.start.is_none() {
        errors.push(ValidationError::MissingStart);
    }
    if draft.end.is_none() {
        errors.push(ValidationError::MissingEnd);
    }
    if draft
        .customer_name
        .as_deref()
        .is_none_or(|name| name.trim().is_empty())
    {
        errors.push(ValidationError::MissingCustomerName);
    }

    let (Some(start), Some(end)) = (draft.start, draft.end) else {
        return Err(errors);
    };

    if !within_business_hours(start, end, policy) {
        errors.push(ValidationError::OutsideBusinessHours { hours: policy.hours });
    }

    if !aligned(start, policy) || !aligned(end, policy) {
        errors.push(ValidationError::Misaligned {
            minutes: policy.granularity_minutes,
        });
    }

    // The raw key; not a valid `Span` when end <= start, but capacity still
    // counts occupants at exactly this pair.
    let slot = Span { start, end };
    if end <= start {
        errors.push(ValidationError::EndNotAfterStart);
    } else {
        let duration = slot.duration_ms();
        if duration < policy.min_duration_ms() {
            errors.push(ValidationError::TooShort {
                min_minutes: policy.min_duration_minutes,
            });
        } else if duration > policy.max_duration_ms() {
            errors.push(ValidationError::TooLong {
                max_minutes: policy.max_duration_minutes,
            });
        }
    }

    if occupancy_count(occupancy, &slot, exclude, policy) >= policy.max_capacity {
        errors.push(ValidationError::CapacityReached {
            limit: policy.max_capacity,
        });
    }

    if errors.is_empty() { Ok(slot) } else { Err(errors) }
}

/// Business hours are anchored to the calendar day of `start`.
fn within_business_hours(start: Ms, end: Ms, policy: &SchedulePolicy) -> bool {
    let Some(date) = policy.zone.date_of(start) else {
        return false;
    };
    let Some(open) = policy.hours.on(&policy.zone, date) else {
        return false;
    };
    start >= open.start && end <= open.end
}

fn aligned(t: Ms, policy: &SchedulePolicy) -> bool {
    policy.granularity_minutes > 0
        && policy
            .zone
            .minute_of(t)
            .is_some_and(|minute| minute % policy.granularity_minutes == 0)
}

/// Bookable windows on `date`, back to back from opening time, each
/// `duration_minutes` long. Windows with no remaining capacity are omitted.
pub fn available_slots<O>(
    date: NaiveDate,
    duration_minutes: u32,
    occupancy: &O,
    policy: &SchedulePolicy,
) -> Result<Vec<SlotAvailability>, ScheduleError>
where
    O: SlotOccupancy + ?Sized,
{
    let open = policy
        .hours
        .on(&policy.zone, date)
        .ok_or_else(|| ScheduleError::InvalidDate(date.to_string()))?;

    let slots = slot_windows(open, duration_minutes)?
        .filter_map(|span| {
            let taken = occupancy_count(occupancy, &span, None, policy);
            let remaining = policy.max_capacity.saturating_sub(taken);
            (remaining > 0).then_some(SlotAvailability {
                span,
                available: true,
                available_count: remaining,
                total_capacity: policy.max_capacity,
            })
        })
        .collect();
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::MINUTE_MS;

    fn policy() -> SchedulePolicy {
        SchedulePolicy::default()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, 20).unwrap()
    }

    /// Local wall-clock time on the test day.
    fn at(hour: i64, minute: i64) -> Ms {
        policy().zone.midnight(day()).unwrap() + (hour * 60 + minute) * MINUTE_MS
    }

    fn draft(start: Ms, end: Ms) -> AppointmentDraft {
        AppointmentDraft::new(start, end, "Tanaka")
    }

    fn stored(start: Ms, end: Ms, status: Status) -> Appointment {
        Appointment {
            id: Ulid::new(),
            span: Span::new(start, end),
            customer_name: "Suzuki".into(),
            customer_email: None,
            customer_phone: None,
            notes: None,
            status,
            owner_id: None,
            created_at: 0,
        }
    }

    fn none() -> Vec<Appointment> {
        Vec::new()
    }

    #[test]
    fn valid_booking_returns_span() {
        let span = validate(&draft(at(9, 0), at(10, 0)), None, &none(), &policy()).unwrap();
        assert_eq!(span, Span::new(at(9, 0), at(10, 0)));
    }

    #[test]
    fn capacity_ceiling_at_exact_slot() {
        let mut existing = Vec::new();
        for _ in 0..3 {
            let d = draft(at(9, 0), at(10, 0));
            let span = validate(&d, None, &existing, &policy()).unwrap();
            existing.push(stored(span.start, span.end, Status::Confirmed));
        }
        let errors = validate(&draft(at(9, 0), at(10, 0)), None, &existing, &policy()).unwrap_err();
        assert_eq!(errors, vec![ValidationError::CapacityReached { limit: 3 }]);
        assert!(errors[0].to_string().contains("3組の予約で満員"));
    }

    #[test]
    fn overlapping_but_different_slot_does_not_count() {
        let existing: Vec<_> = (0..3)
            .map(|_| stored(at(9, 0), at(10, 0), Status::Confirmed))
            .collect();
        assert!(validate(&draft(at(9, 30), at(10, 30)), None, &existing, &policy()).is_ok());
        assert!(validate(&draft(at(9, 0), at(11, 0)), None, &existing, &policy()).is_ok());
    }

    #[test]
    fn revalidation_excludes_own_record() {
        let existing: Vec<_> = (0..3)
            .map(|_| stored(at(9, 0), at(10, 0), Status::Confirmed))
            .collect();
        let own = existing[0].id;
        assert!(validate(&draft(at(9, 0), at(10, 0)), Some(own), &existing, &policy()).is_ok());
    }

    #[test]
    fn cancelled_counts_unless_policy_says_otherwise() {
        let mut existing: Vec<_> = (0..2)
            .map(|_| stored(at(9, 0), at(10, 0), Status::Confirmed))
            .collect();
        existing.push(stored(at(9, 0), at(10, 0), Status::Cancelled));

        let strict = policy();
        assert!(validate(&draft(at(9, 0), at(10, 0)), None, &existing, &strict).is_err());

        let lenient = SchedulePolicy {
            count_cancelled_toward_capacity: false,
            ..policy()
        };
        assert!(validate(&draft(at(9, 0), at(10, 0)), None, &existing, &lenient).is_ok());
    }

    #[test]
    fn business_hours_boundaries() {
        let p = policy();
        let outside = ValidationError::OutsideBusinessHours { hours: p.hours };
        let early = validate(&draft(at(8, 50), at(9, 50)), None, &none(), &p).unwrap_err();
        assert_eq!(early, vec![outside.clone()]);
        let late = validate(&draft(at(17, 30), at(18, 30)), None, &none(), &p).unwrap_err();
        assert_eq!(late, vec![outside]);
        assert!(validate(&draft(at(9, 0), at(18, 0)), None, &none(), &p).is_ok());
    }

    #[test]
    fn end_on_next_day_is_outside_hours() {
        let errors = validate(&draft(at(17, 0), at(24 + 10, 0)), None, &none(), &policy()).unwrap_err();
        assert!(errors.contains(&ValidationError::OutsideBusinessHours { hours: policy().hours }));
    }

    #[test]
    fn ten_minute_granularity() {
        let errors = validate(&draft(at(9, 5), at(10, 5)), None, &none(), &policy()).unwrap_err();
        assert_eq!(errors, vec![ValidationError::Misaligned { minutes: 10 }]);
        assert!(validate(&draft(at(9, 10), at(10, 10)), None, &none(), &policy()).is_ok());
    }

    #[test]
    fn duration_bounds() {
        let short = validate(&draft(at(9, 0), at(9, 30)), None, &none(), &policy()).unwrap_err();
        assert_eq!(short, vec![ValidationError::TooShort { min_minutes: 60 }]);

        assert!(validate(&draft(at(9, 0), at(18, 0)), None, &none(), &policy()).is_ok());

        let long = validate(&draft(at(9, 0), at(19, 10)), None, &none(), &policy()).unwrap_err();
        assert_eq!(
            long,
            vec![
                ValidationError::OutsideBusinessHours { hours: policy().hours },
                ValidationError::TooLong { max_minutes: 540 },
            ]
        );
    }

    #[test]
    fn end_before_start_skips_duration_only() {
        let errors = validate(&draft(at(11, 0), at(10, 0)), None, &none(), &policy()).unwrap_err();
        assert_eq!(errors, vec![ValidationError::EndNotAfterStart]);
        let equal = validate(&draft(at(11, 0), at(11, 0)), None, &none(), &policy()).unwrap_err();
        assert_eq!(equal, vec![ValidationError::EndNotAfterStart]);

        // Capacity is still checked on the exact (start, end) pair.
        let reversed: Vec<_> = (0..3)
            .map(|_| Appointment {
                span: Span {
                    start: at(11, 0),
                    end: at(10, 0),
                },
                ..stored(at(9, 0), at(10, 0), Status::Confirmed)
            })
            .collect();
        let full = validate(&draft(at(11, 0), at(10, 0)), None, &reversed, &policy()).unwrap_err();
        assert_eq!(
            full,
            vec![
                ValidationError::EndNotAfterStart,
                ValidationError::CapacityReached { limit: 3 },
            ]
        );
    }

    #[test]
    fn presence_failures_stop_time_rules() {
        let errors = validate(&AppointmentDraft::default(), None, &none(), &policy()).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::MissingStart,
                ValidationError::MissingEnd,
                ValidationError::MissingCustomerName,
            ]
        );
        let mut blank_name = draft(at(9, 0), at(10, 0));
        blank_name.customer_name = Some("  ".into());
        assert_eq!(
            validate(&blank_name, None, &none(), &policy()).unwrap_err(),
            vec![ValidationError::MissingCustomerName]
        );
    }

    #[test]
    fn every_violation_reported_in_order() {
        let existing: Vec<_> = (0..3)
            .map(|_| stored(at(8, 5), at(8, 35), Status::Confirmed))
            .collect();
        let errors = validate(&draft(at(8, 5), at(8, 35)), None, &existing, &policy()).unwrap_err();
        let rules: Vec<_> = errors.iter().map(ValidationError::rule).collect();
        assert_eq!(rules, vec!["business_hours", "granularity", "duration", "capacity"]);
    }

    #[test]
    fn revalidation_is_idempotent() {
        let existing: Vec<_> = (0..3)
            .map(|_| stored(at(9, 5), at(9, 35), Status::Confirmed))
            .collect();
        let d = draft(at(9, 5), at(9, 35));
        let first = validate(&d, None, &existing, &policy());
        let second = validate(&d, None, &existing, &policy());
        assert_eq!(first, second);
    }

    #[test]
    fn empty_day_offers_nine_hourly_windows() {
        let slots = available_slots(day(), 60, &none(), &policy()).unwrap();
        assert_eq!(slots.len(), 9);
        assert_eq!(slots[0].span, Span::new(at(9, 0), at(10, 0)));
        assert_eq!(slots[8].span, Span::new(at(17, 0), at(18, 0)));
        assert!(slots.iter().all(|s| s.available && s.available_count == 3 && s.total_capacity == 3));
    }

    #[test]
    fn partially_booked_window_reports_remaining() {
        let existing = vec![
            stored(at(10, 0), at(11, 0), Status::Confirmed),
            stored(at(10, 0), at(11, 0), Status::Pending),
            // overlaps the 10:00 window but is not the same slot
            stored(at(10, 30), at(11, 30), Status::Confirmed),
        ];
        let slots = available_slots(day(), 60, &existing, &policy()).unwrap();
        let ten = slots.iter().find(|s| s.span.start == at(10, 0)).unwrap();
        assert_eq!(ten.available_count, 1);
    }

    #[test]
    fn fully_booked_day_has_no_windows() {
        let existing: Vec<_> = (9..18)
            .flat_map(|h| (0..3).map(move |_| stored(at(h, 0), at(h + 1, 0), Status::Confirmed)))
            .collect();
        assert!(available_slots(day(), 60, &existing, &policy()).unwrap().is_empty());
    }

    #[test]
    fn other_durations_truncate_trailing_window() {
        let slots = available_slots(day(), 120, &none(), &policy()).unwrap();
        assert_eq!(slots.len(), 4);
        assert_eq!(slots[3].span, Span::new(at(15, 0), at(17, 0)));
        assert!(matches!(
            available_slots(day(), 0, &none(), &policy()),
            Err(ScheduleError::InvalidDuration(0))
        ));
    }
}
