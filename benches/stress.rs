use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Utc};
use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let password = std::env::var("ROOMBOOK_PASSWORD").unwrap_or_else(|_| "roombook".into());
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname("roombook")
        .user("roombook")
        .password(password);

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

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

/// Start of the next full UTC day: every slot handed out is in the future.
fn epoch() -> DateTime<Utc> {
    (Utc::now() + ChronoDuration::days(1))
        .duration_trunc(ChronoDuration::days(1))
        .expect("day truncation")
}

/// One-hour slot `n` hours after `epoch`.
fn slot(epoch: DateTime<Utc>, n: i64) -> (String, String) {
    let start = epoch + ChronoDuration::hours(n);
    let end = start + ChronoDuration::hours(1);
    (start.to_rfc3339(), end.to_rfc3339())
}

fn insert_sql(room: &str, (start, end): &(String, String)) -> String {
    format!(
        "INSERT INTO reservations (room_id, start_time, end_time) VALUES ('{room}', '{start}', '{end}')"
    )
}

async fn phase1_sequential(host: &str, port: u16, run: &str, epoch: DateTime<Utc>) {
    let client = connect(host, port).await;
    let room = format!("{run}-seq");

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let sql = insert_sql(&room, &slot(epoch, i as i64));
        let t = Instant::now();
        client.simple_query(&sql).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} reservations in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent_rooms(host: &str, port: u16, run: &str, epoch: DateTime<Utc>) {
    let n_tasks = 10;
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();

    for i in 0..n_tasks {
        let host = host.to_string();
        let room = format!("{run}-room-{i}");

        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            for j in 0..n_per_task {
                client
                    .simple_query(&insert_sql(&room, &slot(epoch, j)))
                    .await
                    .unwrap();
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task as usize;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} rooms x {n_per_task} reservations = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

/// Many clients race for the same slots in one room; exactly one wins each.
async fn phase3_contention(host: &str, port: u16, run: &str, epoch: DateTime<Utc>) {
    let n_clients = 20;
    let n_slots = 100;
    let room = format!("{run}-contended");
    let admitted = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_clients {
        let host = host.to_string();
        let room = room.clone();
        let admitted = admitted.clone();
        let overlaps = overlaps.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            for s in 0..n_slots {
                match client.simple_query(&insert_sql(&room, &slot(epoch, s))).await {
                    Ok(_) => {
                        admitted.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) if e.code().map(|c| c.code()) == Some("23P01") => {
                        overlaps.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let admitted = admitted.load(Ordering::Relaxed);
    let overlaps = overlaps.load(Ordering::Relaxed);
    println!(
        "  {n_clients} clients x {n_slots} slots in {:.2}s: {admitted} admitted, {overlaps} overlaps",
        start.elapsed().as_secs_f64()
    );
    assert_eq!(admitted, n_slots as usize, "each slot must be admitted exactly once");
}

async fn phase4_read_under_load(host: &str, port: u16, run: &str, epoch: DateTime<Utc>) {
    let read_room = format!("{run}-read");
    let setup_client = connect(host, port).await;
    for i in 0..200 {
        setup_client
            .simple_query(&insert_sql(&read_room, &slot(epoch, i)))
            .await
            .unwrap();
    }
    drop(setup_client);

    // Writers keep booking and cancelling in their own rooms
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5 {
        let host = host.to_string();
        let stop = stop.clone();
        let room = format!("{run}-writer-{w}");
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) {
                let _ = client
                    .simple_query(&insert_sql(&room, &slot(epoch, i % 1000)))
                    .await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();

    for _ in 0..n_readers {
        let host = host.to_string();
        let sql = format!("SELECT * FROM reservations WHERE room_id = '{read_room}'");
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client.simple_query(&sql).await.unwrap();
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

    print_latency("room listing", &mut all_latencies);
}

async fn phase5_connection_storm(host: &str, port: u16, run: &str, epoch: DateTime<Utc>) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for c in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        let room = format!("{run}-storm-{c}");
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut ids = Vec::with_capacity(ops_per_conn);
            for i in 0..ops_per_conn {
                let messages = client
                    .simple_query(&insert_sql(&room, &slot(epoch, i as i64)))
                    .await
                    .unwrap();
                ids.extend(messages.into_iter().filter_map(|m| match m {
                    tokio_postgres::SimpleQueryMessage::Row(row) => {
                        row.get("id").map(str::to_string)
                    }
                    _ => None,
                }));
            }
            for id in ids {
                client
                    .simple_query(&format!("DELETE FROM reservations WHERE id = '{id}'"))
                    .await
                    .unwrap();
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} create+cancel each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("ROOMBOOK_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("ROOMBOOK_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid ROOMBOOK_PORT");

    println!("=== roombook stress benchmark ===");
    println!("target: {host}:{port}\n");

    // Room names are prefixed per run so repeated runs don't collide
    let run = format!("bench-{}", Ulid::new());
    let epoch = epoch();

    println!("[phase 1] sequential write throughput");
    phase1_sequential(&host, port, &run, epoch).await;

    println!("\n[phase 2] concurrent writes across rooms");
    phase2_concurrent_rooms(&host, port, &run, epoch).await;

    println!("\n[phase 3] contended writes in one room");
    phase3_contention(&host, port, &run, epoch).await;

    println!("\n[phase 4] read latency under write load");
    phase4_read_under_load(&host, port, &run, epoch).await;

    println!("\n[phase 5] connection storm");
    phase5_connection_storm(&host, port, &run, epoch).await;

    println!("\n=== benchmark complete ===");
}
