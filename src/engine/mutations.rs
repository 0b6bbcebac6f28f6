use tokio::sync::oneshot;
use ulid::Ulid;

use crate::access::Requester;
use crate::limits::*;
use crate::model::*;
use crate::notify::NoticeKind;

use super::availability::{occupancy_count, validate};
use super::{Engine, EngineError, ValidationError, WalCommand};

const NO_OCCUPANTS: &[Appointment] = &[];

fn check_draft_limits(draft: &AppointmentDraft) -> Result<(), EngineError> {
    if draft.customer_name.as_ref().is_some_and(|n| n.len() > MAX_NAME_LEN) {
        return Err(EngineError::LimitExceeded("customer name too long"));
    }
    if draft.customer_email.as_ref().is_some_and(|e| e.len() > MAX_CONTACT_LEN)
        || draft.customer_phone.as_ref().is_some_and(|p| p.len() > MAX_CONTACT_LEN)
    {
        return Err(EngineError::LimitExceeded("contact field too long"));
    }
    if draft.notes.as_ref().is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    Ok(())
}

fn rejected(operation: &'static str, errors: Vec<ValidationError>) -> EngineError {
    for error in &errors {
        metrics::counter!(
            crate::observability::VALIDATION_FAILURES_TOTAL,
            "operation" => operation,
            "rule" => error.rule()
        )
        .increment(1);
    }
    tracing::debug!("{operation} rejected: {} rule(s) broken", errors.len());
    EngineError::Invalid(errors)
}

impl Engine {
    /// Book a slot for the requester. Members always book for themselves as
    /// `Confirmed`; blank contact fields are filled from their account.
    pub async fn book(
        &self,
        requester: &Requester,
        mut draft: AppointmentDraft,
    ) -> Result<Appointment, EngineError> {
        requester.fill_contact(&mut draft);
        if !requester.is_admin() {
            draft.status = Some(Status::Confirmed);
        }
        self.insert_draft(draft, Some(requester.id())).await
    }

    /// Admin-entered booking with no owning account.
    pub async fn book_walk_in(
        &self,
        requester: &Requester,
        draft: AppointmentDraft,
    ) -> Result<Appointment, EngineError> {
        if !requester.is_admin() {
            return Err(EngineError::AdminOnly);
        }
        self.insert_draft(draft, None).await
    }

    async fn insert_draft(
        &self,
        draft: AppointmentDraft,
        owner_id: Option<Ulid>,
    ) -> Result<Appointment, EngineError> {
        check_draft_limits(&draft)?;
        let Some(start) = draft.start else {
            let errors = validate(&draft, None, NO_OCCUPANTS, &self.policy).err().unwrap_or_default();
            return Err(rejected("book", errors));
        };
        let date = self.date_of(start)?;
        let _gate = self.compaction_gate.read().await;
        let mut book = self.day_book(date).write_owned().await;
        if book.len() >= MAX_APPOINTMENTS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many appointments on day"));
        }

        let span = validate(&draft, None, &*book, &self.policy).map_err(|e| rejected("book", e))?;
        let appointment = draft.into_appointment(Ulid::new(), span, owner_id, self.next_created_at());
        let event = Event::AppointmentBooked {
            appointment: appointment.clone(),
        };
        self.persist_and_apply(&mut [&mut *book], &event).await?;
        drop(book);

        metrics::counter!(crate::observability::APPOINTMENTS_BOOKED_TOTAL).increment(1);
        tracing::info!(id = %appointment.id, %date, "booked {}", appointment.customer_name);
        self.publish(NoticeKind::Confirmation, &appointment);
        Ok(appointment)
    }

    /// Change time, contact details or notes. The result goes through the
    /// same rules as a new booking, ignoring its own slot occupancy. Only
    /// admins may change the status this way.
    pub async fn revise(
        &self,
        requester: &Requester,
        id: Ulid,
        changes: AppointmentDraft,
    ) -> Result<Appointment, EngineError> {
        check_draft_limits(&changes)?;
        loop {
            let old_date = self.locate(id)?;
            let current = {
                let day = self.existing_day(old_date).ok_or(EngineError::NotFound(id))?;
                let book = day.read().await;
                book.get(id).cloned()
            };
            let Some(current) = current else {
                if self.locate(id)? == old_date {
                    return Err(EngineError::NotFound(id));
                }
                continue;
            };
            if !requester.can_edit(&current) {
                return Err(EngineError::Forbidden(id));
            }

            let mut merged = current.merged_with(changes.clone());
            if !requester.is_admin() {
                merged.status = Some(current.status);
            }
            let new_date = match merged.start {
                Some(start) => self.date_of(start)?,
                None => old_date,
            };

            let gate = self.compaction_gate.read().await;
            let (mut old_book, mut new_book) = self.lock_days(old_date, new_date).await;
            if old_book.get(id) != Some(&current) {
                // Changed while unlocked; start over from the fresh copy.
                continue;
            }
            if new_book.as_ref().is_some_and(|b| b.len() >= MAX_APPOINTMENTS_PER_DAY) {
                return Err(EngineError::LimitExceeded("too many appointments on day"));
            }

            let target: &DayBook = new_book.as_deref().unwrap_or(&*old_book);
            let span = validate(&merged, Some(id), target, &self.policy)
                .map_err(|e| rejected("revise", e))?;
            let revised = merged.into_appointment(id, span, current.owner_id, current.created_at);
            let event = Event::AppointmentRevised {
                appointment: revised.clone(),
            };
            match new_book.as_deref_mut() {
                Some(new_book) => {
                    self.persist_and_apply(&mut [&mut *old_book, new_book], &event).await?
                }
                None => self.persist_and_apply(&mut [&mut *old_book], &event).await?,
            }
            drop((old_book, new_book, gate));

            metrics::counter!(crate::observability::APPOINTMENTS_REVISED_TOTAL).increment(1);
            tracing::info!(%id, moved = old_date != new_date, "revised appointment");
            self.publish(NoticeKind::Change, &revised);
            return Ok(revised);
        }
    }

    /// Admins set any status; owners may cancel their own booking.
    /// Reactivating a cancelled booking re-checks capacity when cancelled
    /// bookings do not hold their slot.
    pub async fn set_status(
        &self,
        requester: &Requester,
        id: Ulid,
        status: Status,
    ) -> Result<Appointment, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let (mut book, current) = self.lock_appointment(id).await?;
        if !requester.can_set_status(&current, status) {
            return Err(EngineError::Forbidden(id));
        }
        if current.status == status {
            return Ok(current);
        }
        if !self.policy.occupies(&current)
            && status != Status::Cancelled
            && occupancy_count(&*book, &current.span, Some(id), &self.policy) >= self.policy.max_capacity
        {
            return Err(rejected(
                "set_status",
                vec![ValidationError::CapacityReached {
                    limit: self.policy.max_capacity,
                }],
            ));
        }

        let event = Event::StatusChanged { id, status };
        self.persist_and_apply(&mut [&mut *book], &event).await?;
        drop(book);

        let updated = Appointment { status, ..current };
        metrics::counter!(crate::observability::STATUS_CHANGES_TOTAL, "status" => status.as_str())
            .increment(1);
        tracing::info!(%id, "status set to {status}");
        let kind = if status == Status::Cancelled {
            NoticeKind::Cancellation
        } else {
            NoticeKind::Change
        };
        self.publish(kind, &updated);
        Ok(updated)
    }

    /// Hard delete. The customer is told their booking was cancelled.
    pub async fn delete(&self, requester: &Requester, id: Ulid) -> Result<Appointment, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let (mut book, current) = self.lock_appointment(id).await?;
        if !requester.can_delete(&current) {
            return Err(EngineError::Forbidden(id));
        }
        let event = Event::AppointmentDeleted { id };
        self.persist_and_apply(&mut [&mut *book], &event).await?;
        drop(book);

        metrics::counter!(crate::observability::APPOINTMENTS_DELETED_TOTAL).increment(1);
        tracing::info!(%id, "deleted appointment");
        self.publish(NoticeKind::Cancellation, &current);
        Ok(current)
    }

    /// Record and publish the reminder for `id`. Returns false when it was
    /// already sent.
    pub async fn send_reminder(&self, id: Ulid) -> Result<bool, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let (book, current) = self.lock_appointment(id).await?;
        if self.reminded.contains(&id) {
            return Ok(false);
        }
        let event = Event::ReminderSent { id };
        self.persist_and_apply(&mut [], &event).await?;
        drop(book);

        metrics::counter!(crate::observability::REMINDERS_SENT_TOTAL).increment(1);
        self.publish(NoticeKind::Reminder, &current);
        Ok(true)
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.write().await;
        // Date order, the same order revisions lock in.
        let mut days: Vec<_> = self.days.iter().map(|e| (*e.key(), e.value().clone())).collect();
        days.sort_by_key(|(date, _)| *date);
        let mut guards = Vec::with_capacity(days.len());
        for (_, day) in &days {
            guards.push(day.read().await);
        }
        let mut events = Vec::new();
        for book in &guards {
            for appointment in &book.appointments {
                events.push(Event::AppointmentBooked {
                    appointment: appointment.clone(),
                });
                if self.reminded.contains(&appointment.id) {
                    events.push(Event::ReminderSent { id: appointment.id });
                }
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        drop(guards);
        tracing::info!("compacted WAL to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
