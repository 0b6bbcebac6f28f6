//! Calendar and slot payloads for the booking front end.

use serde::Serialize;
use ulid::Ulid;

use crate::access::{Requester, MASKED_TITLE};
use crate::engine::{assign_lanes, Lane};
use crate::model::{Appointment, SlotAvailability, Status};
use crate::time::OperatingZone;

/// One event in the calendar widget's wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: Ulid,
    pub title: String,
    pub start: String,
    pub end: String,
    /// Display column, 1-based.
    pub resource_id: Lane,
    pub class_name: String,
    pub extended_props: EventProps,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventProps {
    pub customer: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub notes: Option<String>,
    pub status: Status,
    pub user_id: Option<Ulid>,
    pub slot_index: Lane,
    pub is_other_user: bool,
}

/// Lay out `appointments` and render them for `requester`. Bookings the
/// requester may not view keep their time and lane but lose their details.
pub fn render_calendar(
    requester: &Requester,
    appointments: &[Appointment],
    zone: &OperatingZone,
) -> Vec<CalendarEvent> {
    let lanes = assign_lanes(appointments);
    let mut ordered: Vec<&Appointment> = appointments.iter().collect();
    ordered.sort_by(|a, b| crate::model::schedule_order(a, b));

    ordered
        .into_iter()
        .map(|a| {
            let lane = lanes.get(&a.id).copied().unwrap_or_default();
            let masked = requester.masks(a);
            let props = if masked {
                EventProps {
                    customer: None,
                    email: None,
                    phone: None,
                    notes: None,
                    status: a.status,
                    user_id: None,
                    slot_index: lane,
                    is_other_user: true,
                }
            } else {
                EventProps {
                    customer: Some(a.customer_name.clone()),
                    email: a.customer_email.clone(),
                    phone: a.customer_phone.clone(),
                    notes: a.notes.clone(),
                    status: a.status,
                    user_id: a.owner_id,
                    slot_index: lane,
                    is_other_user: false,
                }
            };
            CalendarEvent {
                id: a.id,
                title: if masked {
                    MASKED_TITLE.to_string()
                } else {
                    a.customer_name.clone()
                },
                start: zone.iso8601(a.span.start),
                end: zone.iso8601(a.span.end),
                resource_id: lane + 1,
                class_name: a.status.class_name(),
                extended_props: props,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotPayload {
    pub start: String,
    pub end: String,
    pub available: bool,
    pub available_count: u32,
    pub total_capacity: u32,
}

pub fn render_slots(slots: &[SlotAvailability], zone: &OperatingZone) -> Vec<SlotPayload> {
    slots
        .iter()
        .map(|s| SlotPayload {
            start: zone.iso8601(s.span.start),
            end: zone.iso8601(s.span.end),
            available: s.available,
            available_count: s.available_count,
            total_capacity: s.total_capacity,
        })
        .collect()
}
