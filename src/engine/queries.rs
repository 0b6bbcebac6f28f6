use chrono::{Days, NaiveDate, NaiveTime};
use serde::Deserialize;
use ulid::Ulid;

use crate::access::Requester;
use crate::limits::*;
use crate::model::*;
use crate::render::{render_calendar, CalendarEvent};

use super::availability::{available_slots, SlotOccupancy};
use super::{Engine, EngineError};

/// Admin search criteria. Text fields match as case-insensitive substrings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SearchFilter {
    pub date: Option<NaiveDate>,
    /// Local start time of day.
    pub time: Option<NaiveTime>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

fn contains_ci(haystack: Option<&str>, needle: &str) -> bool {
    haystack.is_some_and(|h| h.to_lowercase().contains(&needle.to_lowercase()))
}

fn newest_first(mut appointments: Vec<Appointment>) -> Vec<Appointment> {
    appointments.sort_by(|a, b| schedule_order(b, a));
    appointments
}

impl Engine {
    /// Unscoped lookup.
    pub async fn find(&self, id: Ulid) -> Option<Appointment> {
        let date = self.index.get(&id).map(|d| *d)?;
        let day = self.existing_day(date)?;
        let book = day.read().await;
        book.get(id).cloned()
    }

    pub async fn get(&self, requester: &Requester, id: Ulid) -> Result<Appointment, EngineError> {
        let appointment = self.find(id).await.ok_or(EngineError::NotFound(id))?;
        if !requester.can_view(&appointment) {
            return Err(EngineError::Forbidden(id));
        }
        Ok(appointment)
    }

    /// Every appointment starting on `date`, in `schedule_order`.
    pub async fn appointments_on(&self, date: NaiveDate) -> Vec<Appointment> {
        match self.existing_day(date) {
            Some(day) => day.read().await.appointments.clone(),
            None => Vec::new(),
        }
    }

    /// Appointments overlapping `[from, to)`, in `schedule_order`.
    pub async fn appointments_between(&self, from: Ms, to: Ms) -> Result<Vec<Appointment>, EngineError> {
        if to - from > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        if to <= from {
            return Ok(Vec::new());
        }
        let query = Span::new(from, to);
        // An appointment may start the day before the window opens.
        let first = self.date_of(from)?.checked_sub_days(Days::new(1)).unwrap_or(NaiveDate::MIN);
        let last = self.date_of(to - 1)?;

        let mut found = Vec::new();
        for date in first.iter_days().take_while(|d| *d <= last) {
            if let Some(day) = self.existing_day(date) {
                let book = day.read().await;
                found.extend(book.overlapping(&query).cloned());
            }
        }
        found.sort_by(schedule_order);
        Ok(found)
    }

    /// Appointments holding exactly `slot`, cancelled ones included.
    pub async fn appointments_at_slot(&self, slot: Span) -> Result<Vec<Appointment>, EngineError> {
        let date = self.date_of(slot.start)?;
        let Some(day) = self.existing_day(date) else {
            return Ok(Vec::new());
        };
        let book = day.read().await;
        Ok(book.at_slot(&slot).into_iter().cloned().collect())
    }

    pub async fn available_slots(
        &self,
        date: NaiveDate,
        duration_minutes: u32,
    ) -> Result<Vec<SlotAvailability>, EngineError> {
        let slots = match self.existing_day(date) {
            Some(day) => {
                let book = day.read().await;
                available_slots(date, duration_minutes, &*book, &self.policy)?
            }
            None => available_slots(date, duration_minutes, &DayBook::new(date), &self.policy)?,
        };
        Ok(slots)
    }

    /// Calendar events for `[from, to)` as the requester may see them.
    pub async fn calendar(
        &self,
        requester: &Requester,
        from: Ms,
        to: Ms,
    ) -> Result<Vec<CalendarEvent>, EngineError> {
        let appointments = self.appointments_between(from, to).await?;
        Ok(render_calendar(requester, &appointments, &self.policy.zone))
    }

    /// The requester's own bookings, newest first.
    pub async fn list_for(&self, requester: &Requester, page: usize) -> Page<Appointment> {
        let mut mine = Vec::new();
        for day in self.all_days() {
            let book = day.read().await;
            mine.extend(book.appointments.iter().filter(|a| requester.owns(a)).cloned());
        }
        Page::slice(newest_first(mine), page, PAGE_SIZE)
    }

    /// Admin listing across every booking, newest first.
    pub async fn search(
        &self,
        requester: &Requester,
        filter: &SearchFilter,
        page: usize,
    ) -> Result<Page<Appointment>, EngineError> {
        if !requester.is_admin() {
            return Err(EngineError::AdminOnly);
        }
        let days = match filter.date {
            Some(date) => self.existing_day(date).into_iter().collect(),
            None => self.all_days(),
        };
        let zone = &self.policy.zone;
        let mut hits = Vec::new();
        for day in days {
            let book = day.read().await;
            hits.extend(
                book.appointments
                    .iter()
                    .filter(|a| {
                        filter.time.is_none_or(|t| {
                            zone.local(a.span.start).is_some_and(|l| l.time() == t)
                        })
                    })
                    .filter(|a| {
                        filter
                            .name
                            .as_deref()
                            .is_none_or(|n| contains_ci(Some(a.customer_name.as_str()), n))
                    })
                    .filter(|a| {
                        filter
                            .phone
                            .as_deref()
                            .is_none_or(|p| contains_ci(a.customer_phone.as_deref(), p))
                    })
                    .filter(|a| {
                        filter
                            .email
                            .as_deref()
                            .is_none_or(|e| contains_ci(a.customer_email.as_deref(), e))
                    })
                    .cloned(),
            );
        }
        Ok(Page::slice(newest_first(hits), page, PAGE_SIZE))
    }

    /// Non-cancelled appointments whose reminder time has passed but which
    /// have not started and have not been reminded yet.
    pub async fn collect_due_reminders(&self, now: Ms) -> Vec<Appointment> {
        let mut due = Vec::new();
        for day in self.all_days() {
            let book = day.read().await;
            due.extend(
                book.appointments
                    .iter()
                    .filter(|a| {
                        !a.is_cancelled()
                            && a.reminder_at() <= now
                            && now < a.span.start
                            && !self.reminded.contains(&a.id)
                    })
                    .cloned(),
            );
        }
        due.sort_by(schedule_order);
        due
    }

    fn all_days(&self) -> Vec<super::SharedDayBook> {
        self.days.iter().map(|e| e.value().clone()).collect()
    }
}
