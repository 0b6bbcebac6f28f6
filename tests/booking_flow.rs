use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::Mutex;
use tokio_test::{assert_err, assert_ok};
use ulid::Ulid;

use slotwise::access::{Account, Requester, MASKED_TITLE};
use slotwise::engine::{Engine, EngineError, SearchFilter, ValidationError};
use slotwise::model::{AppointmentDraft, Ms, Status};
use slotwise::notify::{self, DeliveryError, Notice, NoticeKind, NoticeSink, NotifyHub};
use slotwise::policy::SchedulePolicy;
use slotwise::render;

const HOUR: Ms = 3_600_000;

// ── Test infrastructure ──────────────────────────────────────

#[derive(Default)]
struct RecordingSink {
    delivered: Mutex<Vec<(NoticeKind, String)>>,
}

#[async_trait]
impl NoticeSink for RecordingSink {
    async fn deliver(&self, notice: &Notice) -> Result<(), DeliveryError> {
        let recipient = notice.recipient.clone().unwrap_or_default();
        self.delivered.lock().await.push((notice.kind, recipient));
        Ok(())
    }
}

fn wal_path() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("slotwise_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join("appointments.wal")
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 9, 2).unwrap()
}

fn at(hour: i64) -> Ms {
    SchedulePolicy::default().zone.midnight(day()).unwrap() + hour * HOUR
}

fn member(name: &str) -> Requester {
    Requester::member(Account {
        id: Ulid::new(),
        name: Some(name.to_string()),
        email: Some(format!("{}@example.com", name.to_lowercase())),
        phone: Some("03-0000-0000".to_string()),
    })
}

async fn wait_for_deliveries(sink: &RecordingSink, count: usize) -> Vec<(NoticeKind, String)> {
    for _ in 0..100 {
        {
            let delivered = sink.delivered.lock().await;
            if delivered.len() >= count {
                return delivered.clone();
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    sink.delivered.lock().await.clone()
}

// ── Flows ────────────────────────────────────────────────────

#[tokio::test]
async fn member_books_and_admin_manages() {
    let notify = Arc::new(NotifyHub::new());
    let sink = Arc::new(RecordingSink::default());
    let dispatcher = tokio::spawn(notify::run_dispatcher(notify.subscribe(), sink.clone()));
    let engine = Engine::new(wal_path(), notify, SchedulePolicy::default()).unwrap();

    let admin = Requester::admin(Account::new(Ulid::new()));
    let sato = member("Sato");

    let blank = AppointmentDraft {
        start: Some(at(10)),
        end: Some(at(11)),
        ..AppointmentDraft::default()
    };
    let booked = assert_ok!(engine.book(&sato, blank).await);
    assert_eq!(booked.customer_name, "Sato");
    assert_eq!(booked.customer_phone.as_deref(), Some("03-0000-0000"));

    // A walk-in has no recipient and is never dispatched.
    assert_ok!(
        engine
            .book_walk_in(&admin, AppointmentDraft::new(at(10), at(11), "Walk-in"))
            .await
    );

    let found = assert_ok!(
        engine
            .search(
                &admin,
                &SearchFilter {
                    email: Some("SATO@".into()),
                    ..SearchFilter::default()
                },
                1
            )
            .await
    );
    assert_eq!(found.items, vec![booked.clone()]);

    let cancelled = assert_ok!(engine.set_status(&sato, booked.id, Status::Cancelled).await);
    assert_eq!(cancelled.status, Status::Cancelled);
    assert_ok!(engine.delete(&admin, booked.id).await);

    let delivered = wait_for_deliveries(&sink, 3).await;
    assert_eq!(
        delivered,
        vec![
            (NoticeKind::Confirmation, "sato@example.com".to_string()),
            (NoticeKind::Cancellation, "sato@example.com".to_string()),
            (NoticeKind::Cancellation, "sato@example.com".to_string()),
        ]
    );

    drop(engine);
    dispatcher.abort();
}

#[tokio::test]
async fn calendar_payload_shape() {
    let engine = Engine::new(wal_path(), Arc::new(NotifyHub::new()), SchedulePolicy::default()).unwrap();
    let sato = member("Sato");
    let ito = member("Ito");

    let theirs = assert_ok!(
        engine
            .book(&ito, AppointmentDraft::new(at(13), at(15), "Ito"))
            .await
    );
    let mine = assert_ok!(
        engine
            .book(&sato, AppointmentDraft::new(at(14), at(15), "Sato"))
            .await
    );

    let events = assert_ok!(engine.calendar(&sato, at(0), at(24)).await);
    let json = serde_json::to_value(&events).unwrap();

    assert_eq!(json[0]["id"], theirs.id.to_string());
    assert_eq!(json[0]["title"], MASKED_TITLE);
    assert_eq!(json[0]["start"], "2030-09-02T13:00:00+09:00");
    assert_eq!(json[0]["resourceId"], 1);
    assert_eq!(json[0]["extendedProps"]["is_other_user"], true);
    assert!(json[0]["extendedProps"]["email"].is_null());

    assert_eq!(json[1]["id"], mine.id.to_string());
    assert_eq!(json[1]["title"], "Sato");
    assert_eq!(json[1]["resourceId"], 2);
    assert_eq!(json[1]["extendedProps"]["slot_index"], 1);
    assert_eq!(json[1]["extendedProps"]["email"], "sato@example.com");
}

#[tokio::test]
async fn slots_and_capacity_through_public_api() {
    let engine = Engine::new(wal_path(), Arc::new(NotifyHub::new()), SchedulePolicy::default()).unwrap();
    let admin = Requester::admin(Account::new(Ulid::new()));

    for i in 0..3 {
        assert_ok!(
            engine
                .book_walk_in(&admin, AppointmentDraft::new(at(17), at(18), format!("g{i}")))
                .await
        );
    }
    let err = assert_err!(
        engine
            .book_walk_in(&admin, AppointmentDraft::new(at(17), at(18), "g3"))
            .await
    );
    assert!(matches!(&err, EngineError::Invalid(v) if v == &[ValidationError::CapacityReached { limit: 3 }]));

    // Ends past closing time.
    let late = assert_err!(
        engine
            .book_walk_in(&admin, AppointmentDraft::new(at(17) + HOUR / 2, at(18) + HOUR / 2, "late"))
            .await
    );
    assert!(matches!(
        late.violations().first(),
        Some(ValidationError::OutsideBusinessHours { .. })
    ));

    let slots = assert_ok!(engine.available_slots(day(), 60).await);
    let payload = render::render_slots(&slots, &engine.policy().zone);
    assert_eq!(payload.len(), 8);
    assert!(slots.iter().all(|s| s.span.start != at(17)));
    assert!(slots.iter().all(|s| s.available && s.total_capacity == 3));

    let partial = assert_ok!(engine.available_slots(day(), 120).await);
    assert_eq!(partial.len(), 4);
}

#[tokio::test]
async fn restart_keeps_bookings() {
    let path = wal_path();
    let admin = Requester::admin(Account::new(Ulid::new()));
    let booked = {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new()), SchedulePolicy::default()).unwrap();
        let booked = assert_ok!(
            engine
                .book_walk_in(&admin, AppointmentDraft::new(at(9), at(10), "Mori"))
                .await
        );
        assert_ok!(engine.compact_wal().await);
        booked
    };

    let engine = Engine::new(path, Arc::new(NotifyHub::new()), SchedulePolicy::default()).unwrap();
    assert_eq!(assert_ok!(engine.get(&admin, booked.id).await), booked);
    assert_err!(engine.get(&member("Other"), booked.id).await);
}

#[tokio::test]
async fn queued_notices_drain_before_shutdown() {
    let notify = Arc::new(NotifyHub::new());
    let sink = Arc::new(RecordingSink::default());
    let dispatcher = tokio::spawn(notify::run_dispatcher(notify.subscribe(), sink.clone()));
    let engine = Engine::new(wal_path(), notify.clone(), SchedulePolicy::default()).unwrap();

    let kato = member("Kato");
    let booked = assert_ok!(
        engine
            .book(&kato, AppointmentDraft::new(at(12), at(13), "Kato"))
            .await
    );
    assert_ok!(engine.delete(&kato, booked.id).await);

    // Shutdown order used by the binary: drop every hub handle, then wait.
    drop(engine);
    drop(notify);
    assert_ok!(dispatcher.await);

    let delivered = sink.delivered.lock().await.clone();
    assert_eq!(
        delivered,
        vec![
            (NoticeKind::Confirmation, "kato@example.com".to_string()),
            (NoticeKind::Cancellation, "kato@example.com".to_string()),
        ]
    );
}
