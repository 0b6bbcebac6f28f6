mod availability;
mod error;
mod lanes;
mod mutations;
mod queries;

pub use availability::{available_slots, occupancy_count, validate, SlotOccupancy};
pub use error::{EngineError, ScheduleError, ValidationError};
pub use lanes::{assign_lanes, Lane};
pub use queries::SearchFilter;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::{DashMap, DashSet};
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::{Notice, NoticeKind, NotifyHub};
use crate::policy::SchedulePolicy;
use crate::time::{now_ms, OperatingZone};
use crate::wal::Wal;

pub type SharedDayBook = Arc<RwLock<DayBook>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued behind it.
/// 3. One flush_sync for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        respond_batch(batch, &result);

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after a failed append so the partial batch is not carried
    // into the next one.
    let flush_result = wal.flush_sync();
    match append_err {
        Some(e) => Err(e),
        None => flush_result,
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let result = wal.append_buffered(&event).and_then(|()| wal.flush_sync());
            let _ = response.send(result);
        }
    }
}

/// The appointment store: one lock per calendar day, so booking checks on
/// different days never contend.
pub struct Engine {
    pub(super) days: DashMap<NaiveDate, SharedDayBook>,
    /// Appointment id → the day its book lives under.
    pub(super) index: DashMap<Ulid, NaiveDate>,
    /// Appointments whose reminder has gone out.
    pub(super) reminded: DashSet<Ulid>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) policy: SchedulePolicy,
    last_created: AtomicI64,
    /// Mutations hold it shared from before their day locks until their WAL
    /// append is applied; compaction holds it exclusively, so no event can
    /// land between the snapshot and the swap.
    pub(super) compaction_gate: RwLock<()>,
}

/// Apply an event to one day's book (no locking, caller holds the lock).
fn apply_to_day(book: &mut DayBook, event: &Event, zone: &OperatingZone) {
    match event {
        Event::AppointmentBooked { appointment } => {
            if zone.date_of(appointment.span.start) == Some(book.date) {
                book.insert(appointment.clone());
            }
        }
        Event::AppointmentRevised { appointment } => {
            book.remove(appointment.id);
            if zone.date_of(appointment.span.start) == Some(book.date) {
                book.insert(appointment.clone());
            }
        }
        Event::StatusChanged { id, status } => {
            if let Some(appointment) = book.get_mut(*id) {
                appointment.status = *status;
            }
        }
        Event::AppointmentDeleted { id } => {
            book.remove(*id);
        }
        Event::ReminderSent { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, policy: SchedulePolicy) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            days: DashMap::new(),
            index: DashMap::new(),
            reminded: DashSet::new(),
            wal_tx,
            notify,
            policy,
            last_created: AtomicI64::new(0),
            compaction_gate: RwLock::new(()),
        };

        // Replay into plain books first; nothing else can see them yet.
        let mut books: HashMap<NaiveDate, DayBook> = HashMap::new();
        for event in &events {
            for date in engine.days_touched(event) {
                let book = books.entry(date).or_insert_with(|| DayBook::new(date));
                apply_to_day(book, event, &engine.policy.zone);
            }
            engine.track(event);
        }
        for (date, book) in books {
            engine.days.insert(date, Arc::new(RwLock::new(book)));
        }
        if !events.is_empty() {
            tracing::info!(
                "replayed {} events, {} appointments on {} days",
                events.len(),
                engine.index.len(),
                engine.days.len()
            );
        }

        Ok(engine)
    }

    pub fn policy(&self) -> &SchedulePolicy {
        &self.policy
    }

    /// Number of stored appointments.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append, then apply to every locked book the event touches.
    pub(super) async fn persist_and_apply(
        &self,
        books: &mut [&mut DayBook],
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        for book in books.iter_mut() {
            apply_to_day(book, event, &self.policy.zone);
        }
        self.track(event);
        Ok(())
    }

    pub(super) fn publish(&self, kind: NoticeKind, appointment: &Appointment) {
        self.notify.send(Notice::new(kind, appointment));
    }

    /// Keep the id index and reminder set in step with an applied event.
    fn track(&self, event: &Event) {
        match event {
            Event::AppointmentBooked { appointment } | Event::AppointmentRevised { appointment } => {
                if let Some(date) = self.policy.zone.date_of(appointment.span.start) {
                    self.index.insert(appointment.id, date);
                }
                if matches!(event, Event::AppointmentRevised { .. }) {
                    self.reminded.remove(&appointment.id);
                }
                self.last_created.fetch_max(appointment.created_at, Ordering::SeqCst);
            }
            Event::AppointmentDeleted { id } => {
                self.index.remove(id);
                self.reminded.remove(id);
            }
            Event::ReminderSent { id } => {
                self.reminded.insert(*id);
            }
            Event::StatusChanged { .. } => {}
        }
    }

    /// Days whose books an event changes, judged before `track` runs.
    fn days_touched(&self, event: &Event) -> Vec<NaiveDate> {
        let stored = |id: &Ulid| self.index.get(id).map(|d| *d);
        let mut days: Vec<NaiveDate> = match event {
            Event::AppointmentBooked { appointment } => {
                self.policy.zone.date_of(appointment.span.start).into_iter().collect()
            }
            Event::AppointmentRevised { appointment } => stored(&appointment.id)
                .into_iter()
                .chain(self.policy.zone.date_of(appointment.span.start))
                .collect(),
            Event::StatusChanged { id, .. } | Event::AppointmentDeleted { id } => {
                stored(id).into_iter().collect()
            }
            Event::ReminderSent { .. } => Vec::new(),
        };
        days.dedup();
        days
    }

    /// Creation stamps are strictly increasing even when the clock is not.
    pub(super) fn next_created_at(&self) -> Ms {
        let now = now_ms();
        let mut last = self.last_created.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self
                .last_created
                .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(current) => last = current,
            }
        }
    }

    pub(super) fn date_of(&self, t: Ms) -> Result<NaiveDate, EngineError> {
        self.policy
            .zone
            .date_of(t)
            .ok_or_else(|| EngineError::Schedule(ScheduleError::InvalidTime(t.to_string())))
    }

    /// Get or create the book for `date`.
    pub(super) fn day_book(&self, date: NaiveDate) -> SharedDayBook {
        self.days
            .entry(date)
            .or_insert_with(|| Arc::new(RwLock::new(DayBook::new(date))))
            .clone()
    }

    pub(super) fn existing_day(&self, date: NaiveDate) -> Option<SharedDayBook> {
        self.days.get(&date).map(|e| e.value().clone())
    }

    pub(super) fn locate(&self, id: Ulid) -> Result<NaiveDate, EngineError> {
        self.index.get(&id).map(|d| *d).ok_or(EngineError::NotFound(id))
    }

    /// Lock the book holding `id` and return it with a copy of the record.
    /// Retries when the appointment moves day between lookup and lock.
    pub(super) async fn lock_appointment(
        &self,
        id: Ulid,
    ) -> Result<(OwnedRwLockWriteGuard<DayBook>, Appointment), EngineError> {
        loop {
            let date = self.locate(id)?;
            let book = self.day_book(date).write_owned().await;
            if let Some(appointment) = book.get(id) {
                let appointment = appointment.clone();
                return Ok((book, appointment));
            }
            drop(book);
            if self.index.get(&id).is_none_or(|d| *d == date) {
                return Err(EngineError::NotFound(id));
            }
        }
    }

    /// Write-lock the books of `from` and `to` in date order. The second
    /// guard is `None` when both are the same day.
    pub(super) async fn lock_days(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> (OwnedRwLockWriteGuard<DayBook>, Option<OwnedRwLockWriteGuard<DayBook>>) {
        let from_day = self.day_book(from);
        if from == to {
            return (from_day.write_owned().await, None);
        }
        let to_day = self.day_book(to);
        if from < to {
            let from_guard = from_day.write_owned().await;
            let to_guard = to_day.write_owned().await;
            (from_guard, Some(to_guard))
        } else {
            let to_guard = to_day.write_owned().await;
            let from_guard = from_day.write_owned().await;
            (from_guard, Some(to_guard))
        }
    }
}
