use std::io::Write as _;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel;
use framescope_profiler::ipc::protocol::{encode, read_message};
use framescope_profiler::{
    dump_tree, uninstall_current, with_current, ClientMessage, Collator, MutexOp, Profiler,
    ProfilerConfig, ScopeGuard, ScopeSource, ServerMessage, ThreadRecorder, TimedMutex,
    PROTOCOL_VERSION,
};

const WORKERS: usize = 3;
const FRAMES: u64 = 40;
const ITEMS: usize = 4;

fn config() -> ProfilerConfig {
    ProfilerConfig::default()
        .with_frames_tracked(8)
        .with_max_scopes_per_thread(1024)
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn pinned_frames_stay_stable_while_threads_record() {
    let profiler = Profiler::new(config()).unwrap();
    let main = profiler.register_main_thread().unwrap();
    let counter = TimedMutex::new(0u64);
    let stop = AtomicBool::new(false);
    let (done_tx, done_rx) = channel::unbounded::<()>();

    thread::scope(|s| {
        let mut senders = Vec::new();
        let mut workers = Vec::new();
        for w in 0..WORKERS {
            let (tx, rx) = channel::unbounded::<u64>();
            senders.push(tx);
            let done_tx = done_tx.clone();
            let profiler = &profiler;
            let counter = &counter;
            workers.push(s.spawn(move || {
                let recorder = profiler
                    .register_worker_thread(format!("worker-{w}"))
                    .unwrap();
                assert!(recorder.install().is_none());
                for _frame in rx.iter() {
                    with_current(ThreadRecorder::advance_frame);
                    {
                        let _batch = ScopeGuard::current("batch");
                        for _ in 0..ITEMS {
                            let _item = ScopeGuard::current("item");
                            *counter.lock() += 1;
                        }
                    }
                    done_tx.send(()).unwrap();
                }
                drop(uninstall_current());
            }));
        }

        let reader = s.spawn(|| {
            let mut checked = 0usize;
            while !stop.load(Ordering::Relaxed) {
                if profiler.select_frontier().is_err() {
                    thread::yield_now();
                    continue;
                }
                let Ok(frame) = profiler.read_frame() else {
                    continue;
                };
                let before: Vec<String> = frame.threads.iter().map(|v| dump_tree(v, 0)).collect();
                thread::sleep(Duration::from_micros(200));
                let after: Vec<String> = frame.threads.iter().map(|v| dump_tree(v, 0)).collect();
                assert_eq!(before, after);
                for view in &frame.threads {
                    assert_eq!(view.frame(), frame.frame);
                }
                checked += 1;
            }
            checked
        });
        let mut reader = Some(reader);

        for frame in 0..FRAMES {
            if frame == FRAMES - 2 {
                stop.store(true, Ordering::Relaxed);
                if let Some(reader) = reader.take() {
                    reader.join().unwrap();
                }
            }
            {
                let _frame = main.scope("frame");
                for tx in &senders {
                    tx.send(frame).unwrap();
                }
                for _ in 0..WORKERS {
                    done_rx.recv().unwrap();
                }
            }
            main.advance_main_frame(1.0);
        }

        drop(senders);
        for worker in workers {
            worker.join().unwrap();
        }
    });

    assert_eq!(counter.into_inner(), WORKERS as u64 * FRAMES * ITEMS as u64);

    let frame = profiler.select_frontier().unwrap();
    assert_eq!(frame, FRAMES - 1);
    let read = profiler.read_frame().unwrap();
    assert_eq!(read.frame, FRAMES - 1);
    assert!(read.skipped.is_empty(), "{:?}", read.skipped);
    assert_eq!(read.threads.len(), WORKERS + 1);
    assert!(read.stats.is_recorded());

    let top: Vec<_> = read.threads[0].top_level().map(|(_, n)| n.name.as_str()).collect();
    assert_eq!(top, ["frame"]);

    for view in &read.threads[1..] {
        let batches: Vec<_> = view.top_level().collect();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].1.name.as_str(), "batch");
        assert_eq!(view.children(batches[0].0).count(), ITEMS);

        let ops = view.mutex_ops();
        assert_eq!(ops.len(), ITEMS * 3);
        assert_eq!(ops[0].op, MutexOp::Waiting);
        assert_eq!(ops[1].op, MutexOp::Acquired);
        assert_eq!(ops[2].op, MutexOp::Released);
        assert!(!view.has_open_scope());
    }

    for stats in profiler.thread_stats() {
        assert_eq!(stats.misnested_closes, 0);
        assert_eq!(stats.stale_closes, 0);
    }
}

fn nest(depth: u32, fan_out: u32) -> u64 {
    let _scope = ScopeGuard::current("nest");
    let mut acc = u64::from(depth);
    for i in 0..fan_out {
        acc = acc.wrapping_mul(31).wrapping_add(u64::from(i));
        if depth > 0 {
            acc ^= nest(depth - 1, fan_out);
        }
    }
    std::hint::black_box(acc)
}

fn assert_nested_within_parents(view: &framescope_profiler::FrameView) -> usize {
    let mut checked = 0;
    for (id, _) in view.walk_depth_first() {
        let node = view.node(id);
        let Some(parent) = node.parent else {
            continue;
        };
        let parent = view.node(parent);
        assert!(
            node.cycle_count <= parent.cycle_count,
            "{} ran {} cycles inside a parent of {}",
            node.name,
            node.cycle_count,
            parent.cycle_count
        );
        assert!(node.starting_cycle >= parent.starting_cycle);
        checked += 1;
    }
    checked
}

#[test]
fn recorded_durations_nest_within_their_parents() {
    let profiler = Profiler::new(config()).unwrap();
    let main = profiler.register_main_thread().unwrap();
    assert!(main.install().is_none());

    thread::scope(|s| {
        s.spawn(|| {
            let worker = profiler.register_worker_thread("nester").unwrap();
            assert!(worker.install().is_none());
            nest(4, 3);
            drop(uninstall_current());
        })
        .join()
        .unwrap();
        nest(5, 2);
    });

    let main = uninstall_current().unwrap();
    main.advance_main_frame(1.0);
    profiler.select_frontier().unwrap();
    let read = profiler.read_frame().unwrap();
    assert_eq!(read.threads.len(), 2);

    // 2 + 4 + 8 + 16 + 32 under the main root, 3 + 9 + 27 + 81 under the worker.
    assert_eq!(assert_nested_within_parents(&read.threads[0]), 62);
    assert_eq!(assert_nested_within_parents(&read.threads[1]), 120);
}

#[test]
fn reports_stream_to_connected_viewers() {
    let profiler = Profiler::new(config().with_ipc_port(0)).unwrap();
    let addr = profiler.server_addr().unwrap();

    let main = profiler.register_main_thread().unwrap();
    {
        let _frame = main.scope("frame");
        let _update = main.scope("update");
    }
    main.advance_main_frame(16.0);

    let mut client = TcpStream::connect(addr).unwrap();
    match read_message::<ServerMessage>(&mut client).unwrap() {
        ServerMessage::Hello { version } => assert_eq!(version, PROTOCOL_VERSION),
        other => panic!("expected hello, got {other:?}"),
    }
    assert!(wait_until(|| profiler.client_count() == 1));

    profiler.select_frontier().unwrap();
    let mut collator = Collator::new(profiler.config());
    let report = collator.collate(&profiler).unwrap();
    assert_eq!(report.frame, 0);
    assert_eq!(profiler.publish(&report), 1);

    let received = match read_message::<ServerMessage>(&mut client).unwrap() {
        ServerMessage::Report(report) => report,
        other => panic!("expected report, got {other:?}"),
    };
    assert_eq!(received, report);
    let frame_row = &received.threads[0].call_graph[0];
    assert_eq!(frame_row.name, "frame");
    assert!(!frame_row.expanded);

    client
        .write_all(&encode(&ClientMessage::ToggleScope(frame_row.path)).unwrap())
        .unwrap();
    let mut commands = Vec::new();
    assert!(wait_until(|| {
        commands.extend(profiler.drain_commands());
        !commands.is_empty()
    }));
    for command in &commands {
        collator.apply(&profiler, command).unwrap();
    }

    let report = collator.collate(&profiler).unwrap();
    let names: Vec<_> = report.threads[0]
        .call_graph
        .iter()
        .map(|r| r.name.as_str())
        .collect();
    assert_eq!(names, ["frame", "update"]);

    profiler.shutdown();
    assert!(profiler.server_addr().is_none());
}
