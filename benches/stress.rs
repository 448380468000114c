use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use ulid::Ulid;

use slotcheck::config::EngineConfig;
use slotcheck::engine::{Engine, EngineError, SystemClock};
use slotcheck::model::*;

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
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

const PATTERNS: [&str; 4] = ["Mon/Wed/Fri", "Tue/Thu", "Sat/Sun", "daily"];

fn today() -> NaiveDate {
    chrono::Utc::now().date_naive()
}

fn contact() -> Contact {
    Contact {
        name: "Bench Student".into(),
        phone: "+91 90000 00000".into(),
        email: None,
    }
}

fn seat(batch_id: Ulid) -> Candidate {
    Candidate {
        target: BookingTarget::Batch { batch_id },
        slot: None,
        tier: PassTier::Monthly,
        start_date: today(),
        price: 1500,
        auto_renew: false,
    }
}

async fn open_engine(label: &str) -> Arc<Engine> {
    let dir = std::env::temp_dir().join(format!("slotcheck_bench_{label}_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Engine::open(
        &dir.join("slotcheck.wal"),
        EngineConfig::default(),
        Arc::new(SystemClock),
    )
    .await
    .unwrap();
    Arc::new(engine)
}

/// One business with `capacities.len()` batches, each under its own teacher.
async fn setup(engine: &Engine, capacities: &[u32]) -> Vec<Batch> {
    let business_id = Ulid::new();
    engine
        .register_business(business_id, "Bench Academy".into(), WeekdaySet::ALL)
        .await
        .unwrap();

    let mut batches = Vec::with_capacity(capacities.len());
    for (i, &capacity) in capacities.iter().enumerate() {
        let hour = 6 + (i % 14);
        let batch = engine
            .create_or_edit_batch(BatchSpec {
                id: None,
                business_id,
                name: format!("Batch {i}"),
                teacher: format!("Teacher {i}"),
                pattern: PATTERNS[i % PATTERNS.len()].into(),
                start_time: format!("{hour:02}:00"),
                end_time: format!("{hour:02}:45"),
                capacity,
                start_date: today(),
                end_date: today() + Days::new(180),
            })
            .await
            .unwrap();
        batches.push(batch);
    }
    batches
}

async fn phase1_sequential() {
    let engine = open_engine("seq").await;
    let batches = setup(&engine, &[10_000]).await;
    let batch_id = batches[0].id;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for _ in 0..n {
        let student = Ulid::new();
        let t = Instant::now();
        engine.add_to_reservation(student, seat(batch_id)).await.unwrap();
        engine.checkout(student, contact()).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} checkouts in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("reserve + checkout latency", &mut latencies);
}

async fn phase2_contention() {
    let engine = open_engine("contention").await;
    let capacities = [1, 1, 1, 1, 1, 5, 5, 5, 10, 10];
    let batches = setup(&engine, &capacities).await;
    let n_students = 400;

    // Everyone reserves first, then everyone races for the seats.
    let mut students = Vec::with_capacity(n_students);
    for i in 0..n_students {
        let student = Ulid::new();
        let batch = &batches[i % batches.len()];
        engine.add_to_reservation(student, seat(batch.id)).await.unwrap();
        students.push(student);
    }

    let won = Arc::new(AtomicUsize::new(0));
    let full = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();
    for student in students {
        let engine = engine.clone();
        let won = won.clone();
        let full = full.clone();
        handles.push(tokio::spawn(async move {
            let t = Instant::now();
            match engine.checkout(student, contact()).await {
                Ok(_) => {
                    won.fetch_add(1, Ordering::Relaxed);
                }
                Err(EngineError::CapacityFull { .. }) => {
                    full.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => panic!("unexpected checkout error: {e}"),
            }
            t.elapsed()
        }));
    }

    let mut latencies = Vec::with_capacity(handles.len());
    for h in handles {
        latencies.push(h.await.unwrap());
    }
    let elapsed = start.elapsed();

    let seats: u32 = capacities.iter().sum();
    let won = won.load(Ordering::Relaxed);
    println!(
        "  {n_students} students racing for {seats} seats: {won} won, {} turned away in {:.2}s",
        full.load(Ordering::Relaxed),
        elapsed.as_secs_f64()
    );
    assert_eq!(won, seats as usize, "seats oversold or left empty");
    for batch in &batches {
        let now = engine.get_batch(&batch.id).await.unwrap();
        assert_eq!(now.enrolled_count, now.capacity);
    }
    print_latency("checkout latency", &mut latencies);
}

async fn phase3_checks_under_load() {
    let engine = open_engine("reads").await;
    let batches = setup(&engine, &[5_000, 5_000, 5_000, 5_000]).await;

    // Writers keep checking students into the first two batches.
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5 {
        let engine = engine.clone();
        let stop = stop.clone();
        let batch_id = batches[w % 2].id;
        writer_handles.push(tokio::spawn(async move {
            while !stop.load(Ordering::Relaxed) {
                let student = Ulid::new();
                if engine.add_to_reservation(student, seat(batch_id)).await.is_ok() {
                    let _ = engine.checkout(student, contact()).await;
                }
            }
        }));
    }

    // Readers hold an enrollment each and probe the other batches.
    let n_readers = 10;
    let checks_per_reader = 500;
    let mut reader_handles = Vec::new();
    for r in 0..n_readers {
        let engine = engine.clone();
        let held = batches[2].id;
        let probes: Vec<Ulid> = batches.iter().map(|b| b.id).collect();
        reader_handles.push(tokio::spawn(async move {
            let student = Ulid::new();
            engine.add_to_reservation(student, seat(held)).await.unwrap();
            engine.checkout(student, contact()).await.unwrap();

            let mut latencies = Vec::with_capacity(checks_per_reader);
            for i in 0..checks_per_reader {
                let candidate = seat(probes[(r + i) % probes.len()]);
                let t = Instant::now();
                engine.check_add(student, &candidate).await.unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("check_add under write load", &mut all_latencies);
}

async fn phase4_compaction() {
    let engine = open_engine("compact").await;
    let batches = setup(&engine, &[1_000]).await;
    for _ in 0..500 {
        let student = Ulid::new();
        engine.add_to_reservation(student, seat(batches[0].id)).await.unwrap();
        engine.checkout(student, contact()).await.unwrap();
    }

    let appends = engine.log_appends_since_compact().await;
    let t = Instant::now();
    engine.compact_log().await.unwrap();
    println!(
        "  compacted {appends} append(s) in {:.2}ms",
        t.elapsed().as_secs_f64() * 1000.0
    );
}

#[tokio::main]
async fn main() {
    println!("=== slotcheck stress benchmark ===\n");

    println!("[phase 1] sequential checkout throughput");
    phase1_sequential().await;

    println!("\n[phase 2] last-seat contention");
    phase2_contention().await;

    println!("\n[phase 3] conflict checks under checkout load");
    phase3_checks_under_load().await;

    println!("\n[phase 4] log compaction");
    phase4_compaction().await;

    println!("\n=== done ===");
}
