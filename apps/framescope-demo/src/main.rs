//! framescope demo
//!
//! Runs a synthetic frame loop: the main thread updates, hands batches of
//! jobs to a pool of workers over a channel, waits for them and "renders".
//! Every stage is instrumented. At the end the newest complete frame is
//! dumped to the console together with the collated call ranking.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p framescope-demo -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `-f, --frames <N>`: Frames to run (default: 120)
//! - `-w, --workers <N>`: Worker threads (default: 3)
//! - `-s, --serve <PORT>`: Stream reports to viewers on this port and pace
//!   the loop at 60 fps
//! - `-h, --help`: Print help message
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

use std::hint::black_box;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use framescope_profiler::{
    dump_tree, profile_function, profile_scope, track_draw_call, uninstall_current, with_current,
    Collator, Profiler, ProfilerConfig, ScopeSource, ThreadRecorder, TimedMutex,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_FRAMES: u64 = 120;
const DEFAULT_WORKERS: usize = 3;
const JOBS_PER_FRAME: u32 = 8;
const TARGET_FRAME_TIME: Duration = Duration::from_millis(16);

struct Args {
    frames: u64,
    workers: usize,
    serve: Option<u16>,
}

/// One batch of simulated work.
struct Job {
    frame: u64,
    items: u32,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = parse_args();

    let mut config = ProfilerConfig::default();
    if let Some(port) = args.serve {
        config = config.with_ipc_port(port);
    }
    let profiler = Profiler::new(config)?;
    let _ = profiler.register_main_thread()?.install();
    if let Some(addr) = profiler.server_addr() {
        info!("Serving frame reports on {}", addr);
    }

    let (job_tx, job_rx) = channel::unbounded::<Job>();
    let (done_tx, done_rx) = channel::unbounded::<()>();
    let world = Arc::new(TimedMutex::new(0u64));

    let workers = (0..args.workers)
        .map(|index| {
            let profiler = profiler.clone();
            let jobs = job_rx.clone();
            let done = done_tx.clone();
            let world = Arc::clone(&world);
            thread::Builder::new()
                .name(format!("worker-{index}"))
                .spawn(move || worker_loop(&profiler, index, &jobs, &done, &world))
        })
        .collect::<std::io::Result<Vec<JoinHandle<anyhow::Result<()>>>>>()?;
    drop(done_tx);

    info!("Running {} frames on {} workers", args.frames, args.workers);

    let mut collator = Collator::new(profiler.config());
    for frame in 0..args.frames {
        let start = Instant::now();
        run_frame(&profiler, frame, args.workers, &job_tx, &done_rx)?;
        let frame_ms = start.elapsed().as_secs_f64() * 1000.0;
        with_current(|main| main.advance_main_frame(frame_ms));

        if args.serve.is_some() {
            collator.apply_pending(&profiler);
            if profiler.select_frontier().is_ok() {
                match collator.collate(&profiler) {
                    Ok(report) => {
                        profiler.publish(&report);
                    }
                    Err(e) => warn!("Failed to collate frame {}: {}", frame, e),
                }
            }
            if let Some(rest) = TARGET_FRAME_TIME.checked_sub(start.elapsed()) {
                thread::sleep(rest);
            }
        }
    }

    drop(job_tx);
    for worker in workers {
        match worker.join() {
            Ok(result) => result?,
            Err(_) => warn!("Worker thread panicked"),
        }
    }

    print_newest_frame(&profiler, &mut collator)?;

    drop(uninstall_current());
    profiler.shutdown();
    Ok(())
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        frames: DEFAULT_FRAMES,
        workers: DEFAULT_WORKERS,
        serve: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--frames" | "-f" => {
                if let Some(n) = args.get(i + 1).and_then(|s| s.parse().ok()) {
                    parsed.frames = n;
                    i += 1;
                }
            }
            "--workers" | "-w" => {
                if let Some(n) = args.get(i + 1).and_then(|s| s.parse().ok()) {
                    parsed.workers = n;
                    i += 1;
                }
            }
            "--serve" | "-s" => {
                if let Some(port) = args.get(i + 1).and_then(|s| s.parse().ok()) {
                    parsed.serve = Some(port);
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("framescope demo");
                println!();
                println!("Usage: framescope-demo [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -f, --frames <N>     Frames to run (default: {DEFAULT_FRAMES})");
                println!("  -w, --workers <N>    Worker threads (default: {DEFAULT_WORKERS})");
                println!(
                    "  -s, --serve <PORT>   Stream reports on PORT (e.g. {})",
                    framescope_profiler::DEFAULT_PORT
                );
                println!("  -h, --help           Show this help message");
                std::process::exit(0);
            }
            other => warn!("Ignoring unknown argument {}", other),
        }
        i += 1;
    }

    parsed
}

fn run_frame(
    profiler: &Profiler,
    frame: u64,
    workers: usize,
    jobs: &Sender<Job>,
    done: &Receiver<()>,
) -> anyhow::Result<()> {
    profile_scope!("frame");

    {
        profile_scope!("update");
        black_box(simulate(2_000));
    }

    let batches = if workers == 0 { 0 } else { JOBS_PER_FRAME };
    {
        profile_scope!("dispatch");
        for _ in 0..batches {
            jobs.send(Job { frame, items: 4 })?;
        }
        for _ in 0..batches {
            done.recv()?;
        }
    }

    {
        profile_scope!("render");
        for mesh in 0..3u32 {
            track_draw_call!(profiler, 300 * (mesh + 1));
        }
        track_draw_call!(profiler, 36);
        black_box(simulate(1_000));
    }
    Ok(())
}

fn worker_loop(
    profiler: &Profiler,
    index: usize,
    jobs: &Receiver<Job>,
    done: &Sender<()>,
    world: &TimedMutex<u64>,
) -> anyhow::Result<()> {
    let _ = profiler
        .register_worker_thread(format!("worker-{index}"))?
        .install();

    for job in jobs {
        with_current(ThreadRecorder::advance_frame);
        run_job(&job, world);
        if done.send(()).is_err() {
            break;
        }
    }

    drop(uninstall_current());
    Ok(())
}

fn run_job(job: &Job, world: &TimedMutex<u64>) {
    profile_scope!("job");
    for _ in 0..job.items {
        let value = {
            profile_scope!("item");
            simulate(500 + job.frame % 7 * 100)
        };
        *world.lock() ^= value;
    }
}

fn simulate(iterations: u64) -> u64 {
    profile_function!();
    (0..iterations).fold(0x9e37_79b9_7f4a_7c15_u64, |h, i| {
        (h ^ i).wrapping_mul(0x0100_0000_01b3).rotate_left(5)
    })
}

fn print_newest_frame(profiler: &Profiler, collator: &mut Collator) -> anyhow::Result<()> {
    let frame = profiler.select_frontier()?;
    let read = profiler.read_frame()?;
    info!(
        "Frame {} ({:.2} ms, {} cycles)",
        frame, read.stats.frame_ms, read.stats.total_cycles
    );

    for view in &read.threads {
        println!("== {} ({} scopes)", view.thread_name(), view.scope_count());
        print!("{}", dump_tree(view, read.stats.starting_cycle));
    }
    for skipped in &read.skipped {
        println!("== {} skipped: {:?}", skipped.thread_name, skipped.reason);
    }

    let report = collator.collate_frame(profiler, &read);
    println!("== hottest scopes");
    for hot in report.hot_functions.iter().take(5) {
        println!("{:>8}  {}", hot.calls, hot.name);
    }
    for thread in &report.threads {
        if !thread.contention.is_empty() {
            let waited: u64 = thread.contention.iter().map(|w| w.wait_cycles()).sum();
            println!(
                "{}: {} lock waits, {} cycles waiting",
                thread.thread_name,
                thread.contention.len(),
                waited
            );
        }
    }
    println!("== draw calls");
    for call in &report.draw_calls {
        println!("{:>8}  {} ({} vertices)", call.calls, call.caller, call.vertex_count);
    }

    let summary = profiler.frame_time_summary();
    info!(
        "{} frames: avg {:.2} ms, min {:.2} ms, max {:.2} ms",
        summary.frames, summary.avg_ms, summary.min_ms, summary.max_ms
    );
    Ok(())
}
