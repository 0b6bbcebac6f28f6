use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use ulid::Ulid;

use slotwise::access::{Account, Requester};
use slotwise::engine::{assign_lanes, Engine};
use slotwise::model::{Appointment, AppointmentDraft, Ms, Span, Status};
use slotwise::notify::NotifyHub;
use slotwise::policy::SchedulePolicy;

const HOUR: Ms = 3_600_000; // 1 hour in ms
const MINUTE: Ms = 60_000;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.3}ms, p50={:.3}ms, p95={:.3}ms, p99={:.3}ms, max={:.3}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn bench_engine(name: &str) -> Engine {
    let dir = std::env::temp_dir().join(format!("slotwise_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).expect("create bench dir");
    Engine::new(dir.join(name), Arc::new(NotifyHub::new()), SchedulePolicy::default())
        .expect("open engine")
}

fn first_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2031, 1, 6).expect("valid date")
}

/// Local 09:00 on the `n`th day after `first_day()`.
fn opening(policy: &SchedulePolicy, n: u64) -> Ms {
    let date = first_day() + Days::new(n);
    policy.zone.midnight(date).expect("midnight") + 9 * HOUR
}

/// Synthetic dense day: staggered bookings of varying length.
fn dense_day(count: usize) -> Vec<Appointment> {
    (0..count)
        .map(|i| {
            let start = (i as Ms % 48) * 10 * MINUTE;
            let len = HOUR + (i as Ms % 4) * 30 * MINUTE;
            Appointment {
                id: Ulid::new(),
                span: Span::new(start, start + len),
                customer_name: format!("guest{i}"),
                customer_email: None,
                customer_phone: None,
                notes: None,
                status: Status::Confirmed,
                owner_id: None,
                created_at: i as Ms,
            }
        })
        .collect()
}

fn phase1_lanes() {
    for size in [10, 100, 1_000, 10_000] {
        let appointments = dense_day(size);
        let rounds = (100_000 / size).max(1);
        let start = Instant::now();
        let mut widest = 0;
        for _ in 0..rounds {
            let lanes = assign_lanes(&appointments);
            widest = widest.max(lanes.values().copied().max().unwrap_or(0) + 1);
        }
        let per_round = start.elapsed() / rounds as u32;
        println!(
            "  {size:>6} appointments: {:.3}ms per layout, {widest} lanes",
            per_round.as_secs_f64() * 1000.0
        );
    }
}

async fn phase2_sequential(admin: &Requester) {
    let engine = bench_engine("sequential.wal");
    let policy = engine.policy().clone();
    let mut latencies = Vec::new();
    let mut rejected = 0;

    let start = Instant::now();
    for day in 0..30 {
        let open = opening(&policy, day);
        for hour in 0..9 {
            for seat in 0..4 {
                let slot = open + hour * HOUR;
                let draft = AppointmentDraft::new(slot, slot + HOUR, format!("seq{day}-{hour}-{seat}"));
                let t = Instant::now();
                match engine.book_walk_in(admin, draft).await {
                    Ok(_) => latencies.push(t.elapsed()),
                    Err(_) => rejected += 1,
                }
            }
        }
    }
    let elapsed = start.elapsed();
    println!(
        "  booked {} ({} rejected at capacity) in {:.2}s = {:.0} ops/s",
        latencies.len(),
        rejected,
        elapsed.as_secs_f64(),
        (latencies.len() + rejected) as f64 / elapsed.as_secs_f64()
    );
    print_latency("book", &mut latencies);
}

async fn phase3_concurrent(admin: &Requester) {
    let engine = Arc::new(bench_engine("concurrent.wal"));
    let policy = engine.policy().clone();
    let workers = 32;

    let start = Instant::now();
    let mut handles = Vec::new();
    for w in 0..workers {
        let engine = engine.clone();
        let admin = admin.clone();
        let policy = policy.clone();
        handles.push(tokio::spawn(async move {
            let mut latencies = Vec::new();
            let mut rejected = 0usize;
            // Workers share days so slots contend.
            for day in 0..10 {
                let open = opening(&policy, day);
                for hour in 0..9 {
                    let slot = open + hour * HOUR;
                    let draft = AppointmentDraft::new(slot, slot + HOUR, format!("w{w}"));
                    let t = Instant::now();
                    match engine.book_walk_in(&admin, draft).await {
                        Ok(_) => latencies.push(t.elapsed()),
                        Err(_) => rejected += 1,
                    }
                }
            }
            (latencies, rejected)
        }));
    }

    let mut latencies = Vec::new();
    let mut rejected = 0;
    for handle in handles {
        let (l, r) = handle.await.expect("worker panicked");
        latencies.extend(l);
        rejected += r;
    }
    let elapsed = start.elapsed();
    println!(
        "  {workers} workers: {} booked, {} rejected, {:.2}s, {:.0} ops/s",
        latencies.len(),
        rejected,
        elapsed.as_secs_f64(),
        (latencies.len() + rejected) as f64 / elapsed.as_secs_f64()
    );
    assert_eq!(latencies.len(), 10 * 9 * policy.max_capacity as usize);
    print_latency("book under contention", &mut latencies);
}

async fn phase4_reads(admin: &Requester) {
    let engine = bench_engine("reads.wal");
    let policy = engine.policy().clone();
    for day in 0..14 {
        let open = opening(&policy, day);
        for hour in 0..9 {
            for seat in 0..3 {
                let slot = open + hour * HOUR;
                let draft = AppointmentDraft::new(slot, slot + HOUR, format!("r{seat}"));
                engine.book_walk_in(admin, draft).await.expect("seed booking");
            }
        }
    }

    let mut slots = Vec::new();
    let mut calendar = Vec::new();
    for i in 0..500u64 {
        let date = first_day() + Days::new(i % 14);
        let t = Instant::now();
        engine.available_slots(date, 60).await.expect("slots");
        slots.push(t.elapsed());

        let from = opening(&policy, i % 7);
        let t = Instant::now();
        engine
            .calendar(admin, from, from + 7 * 24 * HOUR)
            .await
            .expect("calendar");
        calendar.push(t.elapsed());
    }
    print_latency("available_slots", &mut slots);
    print_latency("calendar (7 days)", &mut calendar);
}

#[tokio::main]
async fn main() {
    println!("=== slotwise stress benchmark ===");
    let admin = Requester::admin(Account::new(Ulid::new()));

    println!("\n[phase 1] lane assignment");
    phase1_lanes();

    println!("\n[phase 2] sequential booking throughput");
    phase2_sequential(&admin).await;

    println!("\n[phase 3] concurrent booking on shared slots");
    phase3_concurrent(&admin).await;

    println!("\n[phase 4] read latency");
    phase4_reads(&admin).await;

    println!("\n=== benchmark complete ===");
}
