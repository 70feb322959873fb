use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};

use bizdir::backend::InMemoryBackend;
use bizdir::directory::Directory;
use bizdir::error::DirectoryError;
use bizdir::filter::{FilterAction, FilterState};
use bizdir::model::{BusinessListing, UserIdentity};
use bizdir::pipeline;
use bizdir::reservation::{OccupancyPolicy, time_slots};
use bizdir::sort::SortKey;

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

fn listing(i: usize) -> BusinessListing {
    const LOCATIONS: [&str; 4] = ["Downtown", "West End", "East Side", "North District"];
    const CATEGORIES: [&str; 4] = ["Restaurants", "Retail", "Services", "Entertainment"];
    BusinessListing {
        id: format!("b{i}"),
        name: format!("Business {i:05}"),
        image: String::new(),
        category: vec![CATEGORIES[i % 4].to_string()],
        rating: 1.0 + (i % 41) as f64 / 10.0,
        price_range: format!("{}만원대", 1 + i % 5),
        description: format!("listing number {i}"),
        location: LOCATIONS[i % 4].to_string(),
    }
}

async fn setup(n_businesses: usize) -> (Arc<InMemoryBackend>, Directory) {
    let backend = Arc::new(InMemoryBackend::with_listings((0..n_businesses).map(listing)));
    backend
        .sign_in(UserIdentity {
            id: "bench".into(),
            email: "bench@example.com".into(),
        })
        .await;
    let directory = Directory::new(
        backend.clone(),
        Duration::from_secs(10),
        OccupancyPolicy::default(),
    );
    println!("  created {n_businesses} businesses");
    (backend, directory)
}

/// Every task targets the same slot; exactly one may win.
async fn phase1_same_slot(directory: &Directory) {
    let n_tasks = 200;
    let day = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
    let time = time_slots()[2];

    let created = Arc::new(AtomicUsize::new(0));
    let conflicts = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let directory = directory.clone();
        let created = created.clone();
        let conflicts = conflicts.clone();
        handles.push(tokio::spawn(async move {
            let mut checker = directory.open_checker("b0").await.unwrap();
            let t = Instant::now();
            match directory.reserve(&mut checker, Some(day), Some(time)).await {
                Ok(_) => created.fetch_add(1, Ordering::Relaxed),
                Err(DirectoryError::Conflict { .. }) => conflicts.fetch_add(1, Ordering::Relaxed),
                Err(e) => panic!("unexpected error: {e}"),
            };
            t.elapsed()
        }));
    }

    let mut latencies = Vec::with_capacity(n_tasks);
    for h in handles {
        latencies.push(h.await.unwrap());
    }

    let created = created.load(Ordering::Relaxed);
    let conflicts = conflicts.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} submissions in {:.2}s: {created} created, {conflicts} conflicts",
        start.elapsed().as_secs_f64()
    );
    assert_eq!(created, 1, "slot uniqueness violated");
    print_latency("submit latency", &mut latencies);
}

/// Tasks spread over many businesses and slots, with deliberate collisions.
async fn phase2_spread(directory: &Directory, n_businesses: usize) {
    let n_tasks = 16;
    let n_per_task = 500;
    let base = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
    let slots = time_slots();

    let start = Instant::now();
    let mut handles = Vec::new();

    for task in 0..n_tasks {
        let directory = directory.clone();
        let slots = slots.clone();
        handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(n_per_task);
            let mut created = 0usize;
            for i in 0..n_per_task {
                // two tasks share each key space, so about half collide
                let k = (task / 2) * n_per_task + i;
                let business = format!("b{}", k % n_businesses);
                let round = k / n_businesses;
                let day = base + Days::new((round / slots.len()) as u64);
                let time = slots[round % slots.len()];

                let mut checker = directory.open_checker(&business).await.unwrap();
                let t = Instant::now();
                match directory.reserve(&mut checker, Some(day), Some(time)).await {
                    Ok(_) => created += 1,
                    Err(DirectoryError::Conflict { .. }) => {}
                    Err(e) => panic!("unexpected error: {e}"),
                }
                latencies.push(t.elapsed());
            }
            (created, latencies)
        }));
    }

    let mut total_created = 0;
    let mut all_latencies = Vec::new();
    for h in handles {
        let (created, latencies) = h.await.unwrap();
        total_created += created;
        all_latencies.extend(latencies);
    }

    let elapsed = start.elapsed();
    let ops = all_latencies.len() as f64 / elapsed.as_secs_f64();
    println!(
        "  {} submissions in {:.2}s = {ops:.0} ops/sec, {total_created} created",
        all_latencies.len(),
        elapsed.as_secs_f64()
    );
    assert_eq!(total_created, n_tasks / 2 * n_per_task, "collision accounting off");
    print_latency("submit latency", &mut all_latencies);
}

fn phase3_pipeline(backend_listings: &[BusinessListing]) {
    let filters = [
        FilterState::default(),
        FilterState::default().reduce(FilterAction::SetLocation {
            location: "Downtown".into(),
            selected: true,
        }),
        FilterState::default()
            .reduce(FilterAction::SetQuery("business 00".into()))
            .reduce(FilterAction::SetSort(SortKey::Alphabetical)),
        FilterState::default()
            .reduce(FilterAction::SetMinRating(4.0))
            .reduce(FilterAction::SetSort(SortKey::Rating)),
    ];

    let rounds = 50;
    let mut latencies = Vec::with_capacity(rounds * filters.len());
    for _ in 0..rounds {
        for f in &filters {
            let t = Instant::now();
            let view = pipeline::apply(backend_listings, f);
            latencies.push(t.elapsed());
            std::hint::black_box(view);
        }
    }
    println!("  {} listings per snapshot", backend_listings.len());
    print_latency("pipeline latency", &mut latencies);
}

#[tokio::main]
async fn main() {
    let n_businesses: usize = std::env::var("BIZDIR_BENCH_BUSINESSES")
        .unwrap_or_else(|_| "2000".into())
        .parse()
        .expect("invalid BIZDIR_BENCH_BUSINESSES");

    println!("=== bizdir stress benchmark ===\n");

    println!("[setup]");
    let (_backend, directory) = setup(n_businesses).await;

    println!("\n[phase 1] concurrent submissions for one slot");
    phase1_same_slot(&directory).await;

    println!("\n[phase 2] concurrent submissions across businesses");
    phase2_spread(&directory, n_businesses).await;

    println!("\n[phase 3] filter + sort pipeline");
    let listings: Vec<BusinessListing> = (0..n_businesses).map(listing).collect();
    phase3_pipeline(&listings);

    println!("\n=== benchmark complete ===");
}
