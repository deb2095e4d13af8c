//! taskman-stress: drive a TaskScheduler with concurrent producers.
//!
//! Each producer thread owns one queue (a distinct `(TaskType, VMType)`
//! pair), registers it, then floods it with a mix of foreground and
//! background tasks. Some tasks enqueue a follow-up task through the
//! scheduler. After finalize the statistics snapshot is printed as JSON.

use std::hint::black_box;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{info, warn};

use taskman_core::config::load_dotenv;
use taskman_scheduler::{
    SchedulerConfig, StatisticsKind, StatisticsSnapshot, Task, TaskExecutionMode, TaskProperties,
    TaskQueue, TaskScheduler, TaskType, VMType, MAX_QUEUE_PRIORITY, MIN_QUEUE_PRIORITY,
};

// ── CLI ─────────────────────────────────────────────────────────────

/// Stress the task scheduler and report its lifecycle counters.
#[derive(Parser, Debug)]
#[command(name = "taskman-stress", version, about)]
struct Cli {
    /// Path to a scheduler TOML config. Falls back to TASKMAN_* env vars.
    #[arg(long, env = "TASKMAN_CONFIG")]
    config: Option<PathBuf>,

    /// Worker threads (overrides config; 0 = available parallelism).
    #[arg(long)]
    workers: Option<usize>,

    /// Statistics collector (simple, fine-grained, lock-free).
    #[arg(long)]
    statistics: Option<StatisticsKind>,

    /// Queue-selection seed (overrides config).
    #[arg(long)]
    seed: Option<u64>,

    /// Producer threads, one queue each.
    #[arg(long, default_value_t = 4)]
    producers: usize,

    /// Tasks each producer enqueues.
    #[arg(long, default_value_t = 100_000)]
    tasks: usize,

    /// Share of tasks submitted in foreground mode.
    #[arg(long, default_value_t = 0.1)]
    foreground_ratio: f64,

    /// Share of tasks that enqueue one follow-up task when run.
    #[arg(long, default_value_t = 0.05)]
    follow_up_ratio: f64,

    /// Busy-work iterations per task.
    #[arg(long, default_value_t = 64)]
    work: u32,
}

// ── Report ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct QueueReport {
    queue: String,
    priority: u8,
    submitted: usize,
}

#[derive(Debug, Serialize)]
struct Report {
    workers: usize,
    statistics_kind: StatisticsKind,
    elapsed_ms: u128,
    tasks_run: usize,
    queues: Vec<QueueReport>,
    statistics: StatisticsSnapshot,
}

fn load_config(cli: &Cli) -> Result<SchedulerConfig> {
    let mut config = match &cli.config {
        Some(path) => SchedulerConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => SchedulerConfig::from_env().context("invalid TASKMAN_* environment")?,
    };
    if let Some(workers) = cli.workers {
        config.worker_threads = workers;
    }
    if let Some(kind) = cli.statistics {
        config.statistics = kind;
    }
    if cli.seed.is_some() {
        config.rng_seed = cli.seed;
    }
    Ok(config)
}

/// Every queue id a producer can own, in a fixed order.
fn classifications() -> Vec<(TaskType, VMType)> {
    TaskType::ALL
        .into_iter()
        .flat_map(|t| VMType::ALL.into_iter().map(move |v| (t, v)))
        .collect()
}

fn busy_work(iterations: u32) {
    let mut acc: u64 = 0;
    for i in 0..iterations {
        acc = acc.wrapping_mul(31).wrapping_add(u64::from(i));
    }
    black_box(acc);
}

fn make_task(
    properties: TaskProperties,
    work: u32,
    follow_up: Option<Arc<TaskScheduler>>,
    tasks_run: Arc<AtomicUsize>,
) -> Task {
    Task::create(properties, move || {
        busy_work(work);
        tasks_run.fetch_add(1, Ordering::Relaxed);
        if let Some(scheduler) = follow_up {
            let background = TaskProperties::new(
                properties.task_type(),
                properties.vm_type(),
                TaskExecutionMode::Background,
            );
            let child = make_task(background, work, None, Arc::clone(&tasks_run));
            if let Err(e) = scheduler.add_task(child) {
                warn!(error = %e, "follow-up task rejected");
            }
        }
    })
}

// ── main ────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let ids = classifications();
    if cli.producers == 0 || cli.producers > ids.len() {
        bail!("--producers must be between 1 and {}", ids.len());
    }
    if !(0.0..=1.0).contains(&cli.foreground_ratio) || !(0.0..=1.0).contains(&cli.follow_up_ratio) {
        bail!("ratios must be within 0.0..=1.0");
    }

    let mut rng = match config.rng_seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
        None => StdRng::from_entropy(),
    };
    let workers = config.resolved_worker_threads();
    let statistics_kind = config.statistics;
    let scheduler = Arc::new(TaskScheduler::new(config));
    let tasks_run = Arc::new(AtomicUsize::new(0));

    // Producers + main thread meet at each phase boundary.
    let registered = Arc::new(Barrier::new(cli.producers + 1));
    let submitted = Arc::new(Barrier::new(cli.producers + 1));
    let finalized = Arc::new(Barrier::new(cli.producers + 1));

    let mut queues = Vec::with_capacity(cli.producers);
    let mut producers = Vec::with_capacity(cli.producers);
    for (index, &(task_type, vm_type)) in ids.iter().take(cli.producers).enumerate() {
        let priority = rng.gen_range(MIN_QUEUE_PRIORITY..=MAX_QUEUE_PRIORITY);
        let producer_seed: u64 = rng.gen();
        queues.push(QueueReport {
            queue: format!("{task_type:?}/{vm_type:?}"),
            priority,
            submitted: cli.tasks,
        });

        let scheduler = Arc::clone(&scheduler);
        let tasks_run = Arc::clone(&tasks_run);
        let registered = Arc::clone(&registered);
        let submitted = Arc::clone(&submitted);
        let finalized = Arc::clone(&finalized);
        let (tasks, work) = (cli.tasks, cli.work);
        let (foreground_ratio, follow_up_ratio) = (cli.foreground_ratio, cli.follow_up_ratio);

        let handle = thread::Builder::new()
            .name(format!("taskman-producer-{index}"))
            .spawn(move || -> Result<()> {
                let queue = TaskQueue::new(task_type, vm_type, priority);
                let registration = scheduler.register_queue(&queue);
                registered.wait();

                // Keep meeting the barriers even when registration failed so
                // the main thread never waits on a missing producer.
                if let Ok(id) = &registration {
                    let mut rng = StdRng::seed_from_u64(producer_seed);
                    for _ in 0..tasks {
                        let mode = if rng.gen_bool(foreground_ratio) {
                            TaskExecutionMode::Foreground
                        } else {
                            TaskExecutionMode::Background
                        };
                        let follow_up = rng
                            .gen_bool(follow_up_ratio)
                            .then(|| Arc::clone(&scheduler));
                        let properties = TaskProperties::new(task_type, vm_type, mode);
                        queue.add_task(make_task(properties, work, follow_up, Arc::clone(&tasks_run)));
                    }
                    info!(queue = %id, priority, tasks, "producer done");
                }
                submitted.wait();
                finalized.wait();
                registration.map(|_| ()).map_err(Into::into)
            })
            .context("failed to spawn producer thread")?;
        producers.push(handle);
    }

    registered.wait();
    let started = Instant::now();
    scheduler.initialize()?;
    submitted.wait();
    scheduler.finalize()?;
    let elapsed = started.elapsed();
    finalized.wait();

    for handle in producers {
        match handle.join() {
            Ok(result) => result?,
            Err(_) => bail!("producer thread panicked"),
        }
    }

    let statistics = scheduler.statistics().snapshot();
    let report = Report {
        workers,
        statistics_kind,
        elapsed_ms: elapsed.as_millis(),
        tasks_run: tasks_run.load(Ordering::Relaxed),
        queues,
        statistics,
    };
    info!(
        tasks_run = report.tasks_run,
        elapsed_ms = report.elapsed_ms,
        in_system = report.statistics.tasks_in_system,
        "stress run complete"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
