use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

use crate::engine::SlotOccupancy;
use crate::time::DAY_MS;

/// Unix milliseconds — the only stored time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Booking status. Records entered without one are confirmed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Confirmed,
    Pending,
    Cancelled,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Confirmed => "confirmed",
            Status::Pending => "pending",
            Status::Cancelled => "cancelled",
        }
    }

    /// Display text shown to staff.
    pub fn label(&self) -> &'static str {
        match self {
            Status::Confirmed => "確定",
            Status::Pending => "保留",
            Status::Cancelled => "キャンセル",
        }
    }

    pub fn badge_class(&self) -> &'static str {
        match self {
            Status::Confirmed => "badge-success",
            Status::Pending => "badge-warning",
            Status::Cancelled => "badge-secondary",
        }
    }

    /// Calendar CSS class, e.g. `status-confirmed`.
    pub fn class_name(&self) -> String {
        format!("status-{}", self.as_str())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown status: {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for Status {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "confirmed" => Ok(Status::Confirmed),
            "pending" => Ok(Status::Pending),
            "cancelled" | "canceled" => Ok(Status::Cancelled),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

/// A stored booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub span: Span,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub notes: Option<String>,
    pub status: Status,
    pub owner_id: Option<Ulid>,
    /// Strictly increasing with insertion order.
    pub created_at: Ms,
}

impl Appointment {
    pub fn overlaps(&self, other: &Appointment) -> bool {
        self.span.overlaps(&other.span)
    }

    /// When the pre-appointment reminder becomes due.
    pub fn reminder_at(&self) -> Ms {
        self.span.start - DAY_MS
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == Status::Cancelled
    }

    /// Draft carrying this appointment's current values, with `changes`
    /// layered on top.
    pub fn merged_with(&self, changes: AppointmentDraft) -> AppointmentDraft {
        AppointmentDraft {
            start: changes.start.or(Some(self.span.start)),
            end: changes.end.or(Some(self.span.end)),
            customer_name: changes.customer_name.or_else(|| Some(self.customer_name.clone())),
            customer_email: changes.customer_email.or_else(|| self.customer_email.clone()),
            customer_phone: changes.customer_phone.or_else(|| self.customer_phone.clone()),
            notes: changes.notes.or_else(|| self.notes.clone()),
            status: changes.status.or(Some(self.status)),
        }
    }
}

/// The single tie-break policy for ordering appointments:
/// `(start, created_at, id)` ascending.
pub fn schedule_order(a: &Appointment, b: &Appointment) -> Ordering {
    a.span
        .start
        .cmp(&b.span.start)
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}

/// A proposed appointment as submitted by a caller. Every field is optional
/// because presence is itself a validation rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppointmentDraft {
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub notes: Option<String>,
    pub status: Option<Status>,
}

impl AppointmentDraft {
    pub fn new(start: Ms, end: Ms, customer_name: impl Into<String>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            customer_name: Some(customer_name.into()),
            ..Self::default()
        }
    }

    /// Build the record once validation has produced `span`.
    pub(crate) fn into_appointment(
        self,
        id: Ulid,
        span: Span,
        owner_id: Option<Ulid>,
        created_at: Ms,
    ) -> Appointment {
        Appointment {
            id,
            span,
            customer_name: self.customer_name.unwrap_or_default().trim().to_string(),
            customer_email: non_blank(self.customer_email),
            customer_phone: non_blank(self.customer_phone),
            notes: non_blank(self.notes),
            status: self.status.unwrap_or_default(),
            owner_id,
            created_at,
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// One bookable window reported by slot enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotAvailability {
    pub span: Span,
    pub available: bool,
    pub available_count: u32,
    pub total_capacity: u32,
}

/// All appointments starting on one calendar day, kept in `schedule_order`.
#[derive(Debug, Clone)]
pub struct DayBook {
    pub date: NaiveDate,
    pub appointments: Vec<Appointment>,
}

impl DayBook {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            appointments: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.appointments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.appointments.is_empty()
    }

    /// Insert maintaining `schedule_order`.
    pub fn insert(&mut self, appointment: Appointment) {
        let pos = self
            .appointments
            .binary_search_by(|a| schedule_order(a, &appointment))
            .unwrap_or_else(|e| e);
        self.appointments.insert(pos, appointment);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Appointment> {
        let pos = self.appointments.iter().position(|a| a.id == id)?;
        Some(self.appointments.remove(pos))
    }

    pub fn get(&self, id: Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == id)
    }

    pub fn get_mut(&mut self, id: Ulid) -> Option<&mut Appointment> {
        self.appointments.iter_mut().find(|a| a.id == id)
    }

    /// Appointments overlapping the query window.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Appointment> {
        let right_bound = self
            .appointments
            .partition_point(|a| a.span.start < query.end);
        self.appointments[..right_bound]
            .iter()
            .filter(move |a| a.span.end > query.start)
    }
}

impl SlotOccupancy for DayBook {
    fn at_slot(&self, slot: &Span) -> Vec<&Appointment> {
        let lo = self
            .appointments
            .partition_point(|a| a.span.start < slot.start);
        self.appointments[lo..]
            .iter()
            .take_while(|a| a.span.start == slot.start)
            .filter(|a| a.span.end == slot.end)
            .collect()
    }
}

/// WAL record format. Revisions carry the full snapshot so replay never
/// depends on the previous value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    AppointmentBooked { appointment: Appointment },
    AppointmentRevised { appointment: Appointment },
    StatusChanged { id: Ulid, status: Status },
    AppointmentDeleted { id: Ulid },
    ReminderSent { id: Ulid },
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
}

impl<T> Page<T> {
    /// Slice `all` into page `page` (1-based; 0 is treated as 1).
    pub fn slice(all: Vec<T>, page: usize, per_page: usize) -> Self {
        let page = page.max(1);
        let total = all.len();
        let items = all
            .into_iter()
            .skip((page - 1).saturating_mul(per_page))
            .take(per_page)
            .collect();
        Self {
            items,
            page,
            per_page,
            total,
        }
    }

    pub fn total_pages(&self) -> usize {
        if self.per_page == 0 {
            return 0;
        }
        self.total.div_ceil(self.per_page)
    }
}
