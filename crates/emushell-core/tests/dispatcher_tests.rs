//! Integration tests for main-thread dispatch.
//!
//! The test thread plays the main thread: it creates the `MainLoop` and
//! drives it while worker threads submit calls.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use emushell_core::{
    CallId, CounterUnderflow, DispatcherBuilder, HasPendingSaves, Invocation, LoopExit, MainLoop,
    MethodError, PendingSaveCounter, RpcError,
};
use parking_lot::Mutex;

struct TestApp {
    pending_saves: PendingSaveCounter,
    executed: Mutex<Vec<(CallId, u32)>>,
    counter: AtomicU32,
}

impl TestApp {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            pending_saves: PendingSaveCounter::new(),
            executed: Mutex::new(Vec::new()),
            counter: AtomicU32::new(0),
        })
    }
}

impl HasPendingSaves for TestApp {
    fn pending_saves(&self) -> &PendingSaveCounter {
        &self.pending_saves
    }
}

/// Route logs to the test harness; filter with `RUST_LOG`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Drive the main loop until every worker has finished, then drain it.
fn pump_until_done<T>(main_loop: &mut MainLoop<TestApp>, workers: &[JoinHandle<T>]) {
    while !workers.iter().all(|w| w.is_finished()) {
        main_loop.run_for(Duration::from_millis(5)).unwrap();
    }
    main_loop.process_until_idle();
}

#[test]
fn concurrent_async_calls_run_in_queue_order() {
    init_tracing();
    const WORKERS: u32 = 8;
    const CALLS_PER_WORKER: u32 = 25;

    let mut main_loop = MainLoop::new(TestApp::new());
    let dispatcher = main_loop.dispatcher();
    let ids = Arc::new(Mutex::new(Vec::new()));

    let workers: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let dispatcher = dispatcher.clone();
            let ids = ids.clone();
            std::thread::spawn(move || {
                for _ in 0..CALLS_PER_WORKER {
                    // The call records its own ID, which the queue assigned in
                    // enqueue order.
                    let slot = Arc::new(Mutex::new(None::<CallId>));
                    let reader = slot.clone();
                    let invocation = dispatcher
                        .try_invoke_async(move |app: &TestApp| {
                            let id = reader.lock().expect("id recorded before execution");
                            app.executed.lock().push((id, worker));
                            Ok(())
                        })
                        .unwrap();
                    let Invocation::Dispatched(id) = invocation else {
                        panic!("worker threads must dispatch");
                    };
                    *slot.lock() = Some(id);
                    ids.lock().push(id);
                }
            })
        })
        .collect();

    // Let every worker finish submitting before draining, so each call's
    // slot is filled by the time it executes.
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(dispatcher.pending_count(), (WORKERS * CALLS_PER_WORKER) as usize);

    main_loop.process_until_idle();
    assert_eq!(dispatcher.pending_count(), 0);

    let executed = main_loop.context().executed.lock().clone();
    assert_eq!(executed.len(), (WORKERS * CALLS_PER_WORKER) as usize);
    assert!(
        executed.windows(2).all(|pair| pair[0].0 < pair[1].0),
        "execution order must follow queue order"
    );

    let mut submitted = ids.lock().clone();
    submitted.sort();
    let executed_ids: Vec<CallId> = executed.iter().map(|(id, _)| *id).collect();
    assert_eq!(submitted, executed_ids);
}

#[test]
fn blocking_call_returns_after_method_completes() {
    init_tracing();
    let mut main_loop = MainLoop::new(TestApp::new());
    let dispatcher = main_loop.dispatcher();
    let finished = Arc::new(AtomicBool::new(false));

    let worker = {
        let finished = finished.clone();
        std::thread::spawn(move || {
            let invocation = dispatcher
                .try_invoke_blocking(move |app: &TestApp| {
                    std::thread::sleep(Duration::from_millis(20));
                    app.counter.fetch_add(1, Ordering::SeqCst);
                    finished.store(true, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
            (invocation, dispatcher.context().counter.load(Ordering::SeqCst))
        })
    };

    let workers = [worker];
    pump_until_done(&mut main_loop, &workers);
    let [worker] = workers;
    let (invocation, observed) = worker.join().unwrap();

    assert!(invocation.is_dispatched());
    assert_eq!(observed, 1, "method effects must be visible on return");
    assert!(finished.load(Ordering::SeqCst));
}

#[test]
fn blocking_call_reports_method_error() {
    init_tracing();
    let mut main_loop = MainLoop::new(TestApp::new());
    let dispatcher = main_loop.dispatcher();

    let worker = std::thread::spawn(move || {
        dispatcher.try_invoke_blocking(|_: &TestApp| Err(MethodError::new("plugin init failed")))
    });

    let workers = [worker];
    pump_until_done(&mut main_loop, &workers);
    let [worker] = workers;

    match worker.join().unwrap() {
        Err(RpcError::MethodFailed(err)) => assert_eq!(err.message(), "plugin init failed"),
        other => panic!("expected MethodFailed, got {other:?}"),
    }
    // A blocking failure goes to its caller, not the report channel.
    assert!(main_loop.dispatcher().failed_calls().try_recv().is_err());
}

#[test]
fn panicking_method_fails_the_caller_and_loop_continues() {
    init_tracing();
    let mut main_loop = MainLoop::new(TestApp::new());
    let dispatcher = main_loop.dispatcher();
    let failures = dispatcher.failed_calls();

    let worker = {
        let dispatcher = dispatcher.clone();
        std::thread::spawn(move || {
            let blocking = dispatcher
                .try_invoke_blocking(|_: &TestApp| -> emushell_core::MethodResult {
                    panic!("memcard write exploded")
                });
            dispatcher
                .try_invoke_async(|_: &TestApp| -> emushell_core::MethodResult {
                    panic!("snapshot encoder died")
                })
                .unwrap();
            let after = dispatcher.try_invoke_blocking(|app: &TestApp| {
                app.counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            (blocking, after)
        })
    };

    let workers = [worker];
    pump_until_done(&mut main_loop, &workers);
    let [worker] = workers;
    let (blocking, after) = worker.join().unwrap();

    match blocking {
        Err(RpcError::MethodFailed(err)) => assert!(err.message().contains("memcard write exploded")),
        other => panic!("expected MethodFailed, got {other:?}"),
    }
    let failure = failures.try_recv().expect("async panic should be reported");
    assert!(failure.error.message().contains("snapshot encoder died"));

    assert!(after.unwrap().is_dispatched());
    assert_eq!(main_loop.context().counter.load(Ordering::SeqCst), 1);
    assert_eq!(dispatcher.pending_count(), 0);
    assert!(!main_loop.is_closed());
}

#[test]
fn user_handler_panic_still_settles_pending_count() {
    init_tracing();
    let mut main_loop = MainLoop::new(TestApp::new());
    main_loop.set_user_event_handler(|_: &TestApp, _| panic!("handler bug"));
    let dispatcher = main_loop.dispatcher();
    dispatcher.post_user_event(emushell_core::UserEvent::new(1)).unwrap();

    let result = panic::catch_unwind(AssertUnwindSafe(|| main_loop.process_until_idle()));
    assert!(result.is_err());
    assert_eq!(dispatcher.pending_count(), 0);
}

#[test]
fn mixed_async_and_blocking_calls_run_in_queue_order() {
    init_tracing();
    const ASYNC_WORKERS: u32 = 4;
    const BLOCKING_WORKERS: u32 = 4;
    const CALLS_PER_WORKER: u32 = 20;

    /// Identifies one submission: (worker, sequence within worker).
    type Token = (u32, u32);

    let mut main_loop = MainLoop::new(TestApp::new());
    let dispatcher = main_loop.dispatcher();
    let executed = Arc::new(Mutex::new(Vec::<Token>::new()));
    let assigned = Arc::new(Mutex::new(std::collections::HashMap::<Token, (CallId, bool)>::new()));

    let workers: Vec<_> = (0..ASYNC_WORKERS + BLOCKING_WORKERS)
        .map(|worker| {
            let dispatcher = dispatcher.clone();
            let executed = executed.clone();
            let assigned = assigned.clone();
            let blocking = worker >= ASYNC_WORKERS;
            std::thread::spawn(move || {
                for seq in 0..CALLS_PER_WORKER {
                    let token = (worker, seq);
                    let executed = executed.clone();
                    let method = move |_: &TestApp| -> emushell_core::MethodResult {
                        executed.lock().push(token);
                        Ok(())
                    };
                    let invocation = if blocking {
                        dispatcher.try_invoke_blocking(method)
                    } else {
                        dispatcher.try_invoke_async(method)
                    };
                    let id = invocation.unwrap().call_id().expect("worker threads must dispatch");
                    assigned.lock().insert(token, (id, blocking));
                }
            })
        })
        .collect();

    // Drain while submissions are still arriving.
    pump_until_done(&mut main_loop, &workers);
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(dispatcher.pending_count(), 0);

    let executed = executed.lock().clone();
    let assigned = assigned.lock().clone();
    let total = ((ASYNC_WORKERS + BLOCKING_WORKERS) * CALLS_PER_WORKER) as usize;
    assert_eq!(executed.len(), total);
    assert_eq!(assigned.len(), total);

    let order: Vec<(CallId, bool)> = executed.iter().map(|token| assigned[token]).collect();
    assert!(
        order.windows(2).all(|pair| pair[0].0 < pair[1].0),
        "execution order must follow queue order across call kinds"
    );
    assert!(order.iter().any(|(_, blocking)| *blocking));
    assert!(order.iter().any(|(_, blocking)| !*blocking));
}

#[test]
fn main_thread_calls_short_circuit_and_run_once() {
    init_tracing();
    let main_loop = MainLoop::new(TestApp::new());
    let dispatcher = main_loop.dispatcher();

    let bump = |app: &TestApp| -> emushell_core::MethodResult {
        app.counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    };

    if dispatcher.try_invoke_blocking(bump).unwrap() == Invocation::NotDispatched {
        bump(main_loop.context()).unwrap();
    }
    if dispatcher.try_invoke_async(bump).unwrap() == Invocation::NotDispatched {
        bump(main_loop.context()).unwrap();
    }
    dispatcher.process_method(bump).unwrap();

    assert_eq!(main_loop.context().counter.load(Ordering::SeqCst), 3);
    assert_eq!(dispatcher.pending_count(), 0);
}

#[test]
fn process_method_from_worker_blocks_until_done() {
    init_tracing();
    let mut main_loop = MainLoop::new(TestApp::new());
    let dispatcher = main_loop.dispatcher();

    let worker = std::thread::spawn(move || {
        dispatcher.process_method(|app: &TestApp| {
            app.counter.fetch_add(5, Ordering::SeqCst);
            Ok(())
        })
    });

    let workers = [worker];
    pump_until_done(&mut main_loop, &workers);
    let [worker] = workers;
    worker.join().unwrap().unwrap();
    assert_eq!(main_loop.context().counter.load(Ordering::SeqCst), 5);
}

#[test]
fn three_workers_start_pending_saves() {
    init_tracing();
    let mut main_loop = MainLoop::new(TestApp::new());
    let dispatcher = main_loop.dispatcher();
    assert!(!dispatcher.has_pending_saves());

    let workers: Vec<_> = (0..3)
        .map(|_| {
            let dispatcher = dispatcher.clone();
            std::thread::spawn(move || dispatcher.start_pending_save().unwrap())
        })
        .collect();
    pump_until_done(&mut main_loop, &workers);

    assert_eq!(main_loop.context().pending_saves.count(), 3);
    assert!(dispatcher.has_pending_saves());
}

#[test]
fn start_and_clear_from_different_threads_balance() {
    init_tracing();
    let mut main_loop = MainLoop::new(TestApp::new());
    let dispatcher = main_loop.dispatcher();

    // Main thread starts one save immediately.
    dispatcher.start_pending_save().unwrap();
    assert_eq!(main_loop.context().pending_saves.count(), 1);

    // A worker clears it and starts/clears its own.
    let worker = {
        let dispatcher = dispatcher.clone();
        std::thread::spawn(move || {
            dispatcher.start_pending_save().unwrap();
            dispatcher.clear_pending_save().unwrap();
            dispatcher.clear_pending_save().unwrap();
        })
    };
    let workers = [worker];
    pump_until_done(&mut main_loop, &workers);

    assert_eq!(main_loop.context().pending_saves.count(), 0);
    assert!(!dispatcher.has_pending_saves());
}

#[test]
#[cfg(debug_assertions)]
fn unmatched_clear_panics_in_debug() {
    init_tracing();
    let main_loop = MainLoop::new(TestApp::new());
    let dispatcher = main_loop.dispatcher();
    dispatcher.start_pending_save().unwrap();
    dispatcher.clear_pending_save().unwrap();

    let payload = panic::catch_unwind(AssertUnwindSafe(|| dispatcher.clear_pending_save()))
        .expect_err("unmatched clear must panic");
    assert!(payload.is::<CounterUnderflow>());
    assert_eq!(main_loop.context().pending_saves.count(), 0);
}

#[test]
#[cfg(debug_assertions)]
fn unmatched_clear_from_worker_stops_the_loop() {
    init_tracing();
    let mut main_loop = MainLoop::new(TestApp::new());
    let dispatcher = main_loop.dispatcher();

    std::thread::spawn(move || dispatcher.clear_pending_save().unwrap())
        .join()
        .unwrap();

    // Unlike method panics, an underflow is not converted into a failure.
    let payload = panic::catch_unwind(AssertUnwindSafe(|| main_loop.process_until_idle()))
        .expect_err("underflow must propagate out of the loop");
    assert!(payload.is::<CounterUnderflow>());
}

#[test]
fn has_pending_saves_rejects_worker_threads() {
    init_tracing();
    let main_loop = MainLoop::new(TestApp::new());
    let dispatcher = main_loop.dispatcher();

    let result = std::thread::spawn(move || dispatcher.has_pending_saves()).join();
    assert!(result.is_err(), "has_pending_saves must assert main-thread affinity");
}

#[test]
fn shutdown_releases_blocked_callers_and_rejects_new_work() {
    init_tracing();
    let mut main_loop = MainLoop::new(TestApp::new());
    let dispatcher = main_loop.dispatcher();

    let blocked = {
        let dispatcher = dispatcher.clone();
        std::thread::spawn(move || dispatcher.try_invoke_blocking(|_: &TestApp| Ok(())))
    };

    // Wait until the blocking call is queued, then shut down without running it.
    while dispatcher.pending_count() == 0 {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(main_loop.shutdown(), 1);

    assert!(matches!(blocked.join().unwrap(), Err(RpcError::Abandoned)));

    let late = std::thread::spawn(move || {
        (
            dispatcher.try_invoke_async(|_: &TestApp| Ok(())).unwrap_err(),
            dispatcher.try_invoke_blocking(|_: &TestApp| Ok(())).unwrap_err(),
            dispatcher.start_pending_save().unwrap_err(),
        )
    })
    .join()
    .unwrap();
    assert!(matches!(late.0, RpcError::DispatchUnavailable));
    assert!(matches!(late.1, RpcError::DispatchUnavailable));
    assert!(matches!(late.2, RpcError::DispatchUnavailable));
}

#[test]
fn bounded_wait_times_out_but_call_still_runs() {
    init_tracing();
    let mut main_loop = DispatcherBuilder::new()
        .name("bounded")
        .blocking_timeout(Duration::from_millis(10))
        .build(TestApp::new());
    let dispatcher = main_loop.dispatcher();

    let worker = std::thread::spawn(move || {
        dispatcher.try_invoke_blocking(|app: &TestApp| {
            app.counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    });

    // Nobody drives the loop until the worker has given up.
    let result = worker.join().unwrap();
    assert!(matches!(result, Err(RpcError::TimedOut)));
    assert_eq!(main_loop.context().counter.load(Ordering::SeqCst), 0);

    main_loop.process_until_idle();
    assert_eq!(main_loop.context().counter.load(Ordering::SeqCst), 1);
}

#[test]
fn async_failures_reach_report_channel() {
    init_tracing();
    let mut main_loop = MainLoop::new(TestApp::new());
    let dispatcher = main_loop.dispatcher();
    let failures = dispatcher.failed_calls();

    let worker = {
        let dispatcher = dispatcher.clone();
        std::thread::spawn(move || {
            dispatcher
                .try_invoke_async(|_: &TestApp| Err(MethodError::new("memory card locked")))
                .unwrap()
        })
    };
    let workers = [worker];
    pump_until_done(&mut main_loop, &workers);
    let [worker] = workers;
    let id = worker.join().unwrap().call_id();

    let failure = failures.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(failure.id, id);
    assert_eq!(failure.error.to_string(), "memory card locked");
}

#[test]
fn run_returns_after_worker_quits() {
    init_tracing();
    let mut main_loop = MainLoop::new(TestApp::new());
    let dispatcher = main_loop.dispatcher();

    let worker = std::thread::spawn(move || {
        for _ in 0..10 {
            dispatcher
                .try_invoke_async(|app: &TestApp| {
                    app.counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }
        dispatcher.quit().unwrap();
    });

    main_loop.run().unwrap();
    worker.join().unwrap();

    assert_eq!(main_loop.context().counter.load(Ordering::SeqCst), 10);
    assert!(main_loop.is_closed());
    assert!(matches!(
        main_loop.run_for(Duration::from_millis(1)),
        Err(RpcError::DispatchUnavailable)
    ));
}

#[test]
fn idle_loop_times_out() {
    init_tracing();
    let mut main_loop = MainLoop::new(TestApp::new());
    assert_eq!(
        main_loop.run_for(Duration::from_millis(5)).unwrap(),
        LoopExit::TimedOut
    );
}
