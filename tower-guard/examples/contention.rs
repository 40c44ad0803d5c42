use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use clap::Parser;
use guard_limit::AdmissionConfig;
use guard_limit::AdmissionController;
use guard_store::MemoryBackend;
use guard_store::RecordKey;
use guard_store::RecordStore;
use hdrhistogram::Histogram;
use tokio::sync::Barrier;
use tokio::task::JoinSet;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::ServiceExt;
use tower::service_fn;
use tower_guard::CallerInfo;
use tower_guard::GuardError;
use tower_guard::ManagedGuardLayer;
use tracing_subscriber::EnvFilter;

/// Hammer one record with concurrent optimistic updates, then push a burst of calls through the
/// admission layer.
#[derive(Parser, Debug)]
#[command(about)]
struct Args {
    /// Concurrent updaters racing on the same record
    #[arg(long, default_value_t = 200)]
    updaters: usize,

    /// Time budget for each update
    #[arg(long, default_value = "500ms", value_parser = humantime::parse_duration)]
    budget: Duration,

    /// Upper bound of the simulated backend round-trip
    #[arg(long, default_value = "2ms", value_parser = humantime::parse_duration)]
    latency: Duration,

    /// Calls per caller in the admission burst
    #[arg(long, default_value_t = 100)]
    burst: usize,

    /// Distinct callers in the admission burst
    #[arg(long, default_value_t = 8)]
    callers: usize,
}

#[derive(Default)]
struct Outcomes {
    rejected: usize,
    timeouts: usize,
    inner: usize,
}

async fn run_update_race(args: &Args) -> Result<(), BoxError> {
    let backend = Arc::new(MemoryBackend::new().with_latency(args.latency));
    let store = RecordStore::new(backend);
    let key = RecordKey::new("counters/race.json");

    let mut hist_attempts = Histogram::<u64>::new_with_bounds(1, 100_000, 3)?;
    let mut hist_elapsed = Histogram::<u64>::new_with_bounds(1, 60_000_000, 3)?;
    let barrier = Arc::new(Barrier::new(args.updaters));
    let mut tasks = JoinSet::new();
    let budget = args.budget;

    let start = Instant::now();
    for _ in 0..args.updaters {
        let store = store.clone();
        let key = key.clone();
        let bar = barrier.clone();
        tasks.spawn(async move {
            bar.wait().await;
            let req_start = Instant::now();
            let mut attempts = 0;
            let res = store
                .optimistic_update(
                    &key,
                    |n: u64, attempt| {
                        attempts = attempt + 1;
                        async move { Ok::<_, BoxError>(n + 1) }
                    },
                    budget,
                )
                .await;
            (res, attempts, req_start.elapsed())
        });
    }

    let mut committed = 0;
    let mut timeouts = 0;
    let mut failures = 0;
    while let Some(task) = tasks.join_next().await {
        let (res, attempts, elapsed) = task?;
        match res {
            Ok(_) => {
                committed += 1;
                hist_attempts.record(attempts.into())?;
                hist_elapsed.record(elapsed.as_micros() as u64)?;
            }
            Err(err) if err.is_timeout() => timeouts += 1,
            Err(_) => failures += 1,
        }
    }
    let total_duration = start.elapsed();
    let stored: Option<u64> = store.read_as(&key).await?;

    println!("--- Optimistic Update Race ---");
    println!("Total Duration:  {:.2?}", total_duration);
    println!("Committed/Total: {}/{}", committed, args.updaters);
    println!("Stored Value:    {}", stored.unwrap_or_default());
    if committed > 0 {
        println!("P50 (Attempts):  {}", hist_attempts.value_at_quantile(0.5));
        println!("P99 (Attempts):  {}", hist_attempts.value_at_quantile(0.99));
        println!("Max (Attempts):  {}", hist_attempts.max());
        println!("P50 (Elapsed):   {}µs", hist_elapsed.value_at_quantile(0.5));
        println!("P99 (Elapsed):   {}µs", hist_elapsed.value_at_quantile(0.99));
    }
    println!("Timeouts:        {}", timeouts);
    if failures > 0 {
        println!("Failures:        {}", failures);
    }
    println!();
    Ok(())
}

async fn run_admission_burst(args: &Args) -> Result<(), BoxError> {
    let controller = Arc::new(AdmissionController::new(AdmissionConfig::default()));
    let layer = ManagedGuardLayer::<_, String>::new(Arc::clone(&controller), |caller: &String| {
        CallerInfo::from_parts(Some(caller.as_str()), "/api/burst", "GET")
    });
    let svc = layer.layer(service_fn(|_caller: String| async {
        Ok::<&'static str, BoxError>("ok")
    }));

    let mut tasks = JoinSet::new();
    let start = Instant::now();
    for caller in 0..args.callers {
        for _ in 0..args.burst {
            let mut local_svc = svc.clone();
            let caller = format!("10.0.0.{caller}");
            tasks.spawn(async move { local_svc.ready().await?.call(caller).await });
        }
    }

    let mut admitted = 0;
    let mut outcomes = Outcomes::default();
    while let Some(task) = tasks.join_next().await {
        match task? {
            Ok(_) => admitted += 1,
            Err(e) => match e.downcast_ref::<GuardError>() {
                Some(GuardError::Rejected { .. }) => outcomes.rejected += 1,
                Some(GuardError::Timeout) => outcomes.timeouts += 1,
                _ => outcomes.inner += 1,
            },
        }
    }

    println!("--- Admission Burst ---");
    println!("Total Duration:  {:.2?}", start.elapsed());
    println!(
        "Admitted/Total:  {}/{}",
        admitted,
        args.callers * args.burst
    );
    println!("Tracked Callers: {}", controller.tracked_identities());
    println!("Rejected:        {}", outcomes.rejected);
    if outcomes.timeouts + outcomes.inner > 0 {
        println!("  └─ Timeouts:   {}", outcomes.timeouts);
        println!("  └─ Inner:      {}", outcomes.inner);
    }
    println!();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    run_update_race(&args).await?;
    run_admission_burst(&args).await?;
    Ok(())
}
