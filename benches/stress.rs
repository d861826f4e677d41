use std::time::{Duration, Instant};

use tokio_postgres::{Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

const HOUR: i64 = 3_600_000;
const T0: i64 = 1_700_000_000_000;

async fn connect(host: &str, port: u16, dbname: &str, uid: Ulid) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(dbname)
        .user(uid.to_string())
        .password("slotd");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

async fn register(client: &tokio_postgres::Client, uid: Ulid, role: &str) {
    client
        .batch_execute(&format!(
            "INSERT INTO users (id, role) VALUES ('{uid}', '{role}')"
        ))
        .await
        .unwrap();
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
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
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

fn slot_ids(messages: Vec<SimpleQueryMessage>) -> Vec<String> {
    messages
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(r) => r.get("id").map(|s| s.to_string()),
            _ => None,
        })
        .collect()
}

async fn phase1_sequential_publish(host: &str, port: u16) {
    let db = format!("bench_{}", Ulid::new());
    let expert = Ulid::new();
    let client = connect(host, port, &db, expert).await;
    register(&client, expert, "expert").await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let s = T0 + (i as i64) * 2 * HOUR;
        let e = s + HOUR;
        let t = Instant::now();
        client
            .batch_execute(&format!(
                r#"INSERT INTO slots (start, "end") VALUES ({s}, {e})"#
            ))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!(
        "  {n} slot inserts in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
    print_latency("write latency", &mut latencies);
}

async fn phase2_booking_race(host: &str, port: u16) {
    // Many students race for the same batch of slots; the engine must hand
    // each slot to exactly one of them.
    let db = format!("bench_{}", Ulid::new());
    let expert = Ulid::new();
    let expert_client = connect(host, port, &db, expert).await;
    register(&expert_client, expert, "expert").await;

    let n_slots = 50;
    let values: Vec<String> = (0..n_slots)
        .map(|i| {
            let s = T0 + (i as i64) * 2 * HOUR;
            format!("({s}, {})", s + HOUR)
        })
        .collect();
    expert_client
        .batch_execute(&format!(
            r#"INSERT INTO slots (start, "end") VALUES {}"#,
            values.join(", ")
        ))
        .await
        .unwrap();

    let ids = slot_ids(
        expert_client
            .simple_query(&format!(
                r#"SELECT * FROM availability WHERE expert = '{expert}' AND start >= {T0} AND "end" <= {}"#,
                T0 + (n_slots as i64) * 2 * HOUR,
            ))
            .await
            .unwrap(),
    );
    assert_eq!(ids.len(), n_slots);

    let n_students = 20;
    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_students {
        let host = host.to_string();
        let db = db.clone();
        let ids = ids.clone();
        handles.push(tokio::spawn(async move {
            let uid = Ulid::new();
            let client = connect(&host, port, &db, uid).await;
            register(&client, uid, "student").await;

            let mut wins = 0usize;
            for slot_id in &ids {
                if client
                    .batch_execute(&format!(
                        "INSERT INTO bookings (slot_id) VALUES ('{slot_id}')"
                    ))
                    .await
                    .is_ok()
                {
                    wins += 1;
                }
            }
            wins
        }));
    }

    let mut total_wins = 0usize;
    for h in handles {
        total_wins += h.await.unwrap();
    }
    let elapsed = start.elapsed();
    let attempts = n_students * n_slots;

    println!(
        "  {n_students} students x {n_slots} slots: {attempts} attempts, {total_wins} wins in {:.2}s",
        elapsed.as_secs_f64()
    );
    assert_eq!(total_wins, n_slots, "each slot must be booked exactly once");
}

async fn phase3_read_under_load(host: &str, port: u16) {
    let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));

    // Writers publish slots in their own tenants
    let mut writer_handles = Vec::new();
    for _ in 0..5 {
        let host = host.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let db = format!("bench_{}", Ulid::new());
            let uid = Ulid::new();
            let client = connect(&host, port, &db, uid).await;
            register(&client, uid, "expert").await;

            let mut i = 0i64;
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                let s = T0 + i * 2 * HOUR;
                let _ = client
                    .batch_execute(&format!(
                        r#"INSERT INTO slots (start, "end") VALUES ({s}, {})"#,
                        s + HOUR
                    ))
                    .await;
                i += 1;
            }
        }));
    }

    // Readers query availability in their own tenants and measure latency
    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();

    for _ in 0..n_readers {
        let host = host.to_string();
        reader_handles.push(tokio::spawn(async move {
            let db = format!("bench_{}", Ulid::new());
            let uid = Ulid::new();
            let client = connect(&host, port, &db, uid).await;
            register(&client, uid, "expert").await;

            let values: Vec<String> = (0..50)
                .map(|i| {
                    let s = T0 + (i as i64) * 2 * HOUR;
                    format!("({s}, {})", s + HOUR)
                })
                .collect();
            client
                .batch_execute(&format!(
                    r#"INSERT INTO slots (start, "end") VALUES {}"#,
                    values.join(", ")
                ))
                .await
                .unwrap();

            let window_end = T0 + 100 * 2 * HOUR;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client
                    .batch_execute(&format!(
                        r#"SELECT * FROM availability WHERE expert = '{uid}' AND start >= {T0} AND "end" <= {window_end}"#
                    ))
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("availability query", &mut all_latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let db = format!("bench_{}", Ulid::new());
            let uid = Ulid::new();
            let client = connect(&host, port, &db, uid).await;
            register(&client, uid, "expert").await;

            for i in 0..ops_per_conn {
                let s = T0 + (i as i64) * 2 * HOUR;
                client
                    .batch_execute(&format!(
                        r#"INSERT INTO slots (start, "end") VALUES ({s}, {})"#,
                        s + HOUR
                    ))
                    .await
                    .unwrap();
            }
            success.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(std::sync::atomic::Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("SLOTD_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("SLOTD_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid SLOTD_PORT");

    println!("=== slotd stress benchmark ===");
    println!("target: {host}:{port}\n");

    // Each phase uses its own tenant (unique dbname) to avoid interference

    println!("[phase 1] sequential slot publish throughput");
    phase1_sequential_publish(&host, port).await;

    println!("\n[phase 2] concurrent booking race");
    phase2_booking_race(&host, port).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
