//! End-to-end pipeline scenarios against the collector stub sink.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::level::Severity;
use crate::registry::{self, logger, LoggerSpec};
use crate::sink::{AsyncSink, DispatcherSink, OverflowPolicy, Sink, SinkMetrics};
use crate::tests::support::{self, CollectorSink};
use crate::{debug, info, log, shutdown, warning};

fn install_root(threshold: Severity, sinks: Vec<Arc<dyn Sink>>) {
    registry::install_loggers(vec![LoggerSpec {
        name: String::new(),
        threshold: Some(threshold),
        disabled: false,
        sinks: Some(sinks),
    }]);
}

fn wait_until(what: &str, deadline: Duration, mut done: impl FnMut() -> bool) {
    let start = Instant::now();
    while !done() {
        assert!(start.elapsed() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn wait_for_written(metrics: &SinkMetrics, expected: u64) {
    wait_until("worker drain", Duration::from_secs(10), || {
        metrics.written() == expected
    });
}

#[test]
fn test_threshold_discard_writes_nothing_and_allocates_nothing() {
    let _lock = support::config_lock();
    let collector = CollectorSink::new("c", "{severity} {msg}");
    let tee = AsyncSink::new("tee", vec![collector.clone() as Arc<dyn Sink>], 64, OverflowPolicy::DropNewest);
    tee.start();
    install_root(
        Severity::INFO,
        vec![collector.clone() as Arc<dyn Sink>, tee.clone() as Arc<dyn Sink>],
    );

    let handle = logger("discard.app");
    // Warm up thread-local machinery (slot guards, task ids) outside the
    // measured window.
    debug!(handle, "x=", 1);

    let allocations = support::count_allocations(|| {
        for _ in 0..100 {
            debug!(handle, "x=", 1);
        }
    });

    assert_eq!(allocations, 0, "discarded records must not allocate");
    assert!(collector.lines().is_empty());
    assert_eq!(tee.metrics().enqueued(), 0);
    tee.close();
}

#[test]
fn test_sync_single_sink_formats_one_write() {
    let _lock = support::config_lock();
    let collector = CollectorSink::new("file", "{severity} {msg}");
    install_root(Severity::INFO, vec![collector.clone() as Arc<dyn Sink>]);

    let handle = logger("sync.app");
    warning!(handle, "hello ", 42);

    assert_eq!(collector.lines(), vec!["WARNING hello 42\n".to_string()]);
}

#[test]
fn test_async_ordering_under_block_policy() {
    let _lock = support::config_lock();
    let collector = CollectorSink::new("ordered", "{msg}");
    let sink = AsyncSink::new(
        "ordered-q",
        vec![collector.clone() as Arc<dyn Sink>],
        8,
        OverflowPolicy::Block,
    );
    sink.start();
    install_root(Severity::INFO, vec![sink.clone() as Arc<dyn Sink>]);

    let handle = logger("async.app");
    for i in 0..1000i64 {
        info!(handle, "n=", i);
    }
    sink.close();

    let lines = collector.lines();
    assert_eq!(lines.len(), 1000);
    for (i, line) in lines.iter().enumerate() {
        assert_eq!(line, &format!("n={}\n", i));
    }
    assert_eq!(sink.metrics().written(), 1000);
    assert_eq!(sink.metrics().dropped_overflow(), 0);
}

#[test]
fn test_dispatcher_fans_out_to_both_sinks() {
    let _lock = support::config_lock();
    let first = CollectorSink::with_floor("first", "{severity} {msg}", Some(Severity::INFO));
    let second = CollectorSink::with_floor("second", "{severity} {msg}", Some(Severity::INFO));
    let dispatcher = DispatcherSink::new(
        "tee".to_string(),
        None,
        vec![first.clone() as Arc<dyn Sink>, second.clone() as Arc<dyn Sink>],
    );
    install_root(Severity::INFO, vec![Arc::new(dispatcher) as Arc<dyn Sink>]);

    let handle = logger("fanout.app");
    warning!(handle, "event");

    assert_eq!(first.lines(), vec!["WARNING event\n".to_string()]);
    assert_eq!(second.lines(), vec!["WARNING event\n".to_string()]);
}

#[test]
fn test_overflow_drop_newest_keeps_first_and_reports_once() {
    let _lock = support::config_lock();
    let collector = CollectorSink::new("drops", "{msg}");
    let sink = AsyncSink::new(
        "drops-q",
        vec![collector.clone() as Arc<dyn Sink>],
        4,
        OverflowPolicy::DropNewest,
    );
    // Worker deliberately not started: producers fill the queue.
    install_root(Severity::INFO, vec![sink.clone() as Arc<dyn Sink>]);

    let handle = logger("overflow.app");
    for i in 0..10i64 {
        warning!(handle, "n=", i);
    }
    assert_eq!(sink.metrics().enqueued(), 4);
    assert_eq!(sink.metrics().dropped_overflow(), 6);

    sink.start();
    wait_for_written(&sink.metrics(), 4);

    let lines = collector.lines();
    let payload: Vec<&String> = lines.iter().filter(|l| l.starts_with("n=")).collect();
    let diagnostics: Vec<&String> = lines.iter().filter(|l| !l.starts_with("n=")).collect();
    assert_eq!(payload, ["n=0\n", "n=1\n", "n=2\n", "n=3\n"]);
    assert_eq!(diagnostics.len(), 1, "exactly one coalesced drop diagnostic");
    assert!(diagnostics[0].contains("6 records dropped"));
    sink.close();
}

#[test]
fn test_overflow_drop_oldest_keeps_latest() {
    let _lock = support::config_lock();
    let collector = CollectorSink::new("evict", "{msg}");
    let sink = AsyncSink::new(
        "evict-q",
        vec![collector.clone() as Arc<dyn Sink>],
        4,
        OverflowPolicy::DropOldest,
    );
    install_root(Severity::INFO, vec![sink.clone() as Arc<dyn Sink>]);

    let handle = logger("evict.app");
    for i in 0..10i64 {
        warning!(handle, "n=", i);
    }
    assert_eq!(sink.metrics().dropped_overflow(), 6);

    sink.start();
    wait_for_written(&sink.metrics(), 4);
    let payload: Vec<String> = collector
        .lines()
        .into_iter()
        .filter(|l| l.starts_with("n="))
        .collect();
    assert_eq!(payload, ["n=6\n", "n=7\n", "n=8\n", "n=9\n"]);
    sink.close();
}

#[test]
fn test_shutdown_drains_everything_and_closes_once() {
    let _lock = support::config_lock();
    let collector = CollectorSink::new("drain", "{msg}");
    let sink = AsyncSink::new(
        "drain-q",
        vec![collector.clone() as Arc<dyn Sink>],
        1024,
        OverflowPolicy::Block,
    );
    sink.start();
    shutdown::install_sinks(
        vec![sink.clone() as Arc<dyn Sink>],
        vec![sink.clone()],
    );
    install_root(Severity::INFO, vec![sink.clone() as Arc<dyn Sink>]);

    let handle = logger("drain.app");
    for i in 0..512i64 {
        info!(handle, "n=", i);
    }
    let lost = shutdown::shutdown();

    assert_eq!(lost, 0);
    assert_eq!(collector.lines().len(), 512);
    assert_eq!(collector.close_count(), 1);
    assert!(collector.flush_count() >= 1);

    // Emission after teardown hits the disabled fast path.
    info!(handle, "late");
    assert_eq!(collector.lines().len(), 512);

    // A second shutdown is a no-op; the sink stays closed exactly once.
    shutdown::shutdown();
    assert_eq!(collector.close_count(), 1);
}

#[test]
fn test_shutdown_deadline_counts_lost_frames() {
    let _lock = support::config_lock();
    let slow = support::SlowSink::new(Duration::from_millis(300));
    let sink = AsyncSink::new(
        "slow-q",
        vec![slow.clone() as Arc<dyn Sink>],
        64,
        OverflowPolicy::Block,
    );
    install_root(Severity::INFO, vec![sink.clone() as Arc<dyn Sink>]);

    let handle = logger("deadline.app");
    for i in 0..40i64 {
        warning!(handle, "n=", i);
    }

    // The worker starts with shutdown already pending: it can drain about
    // sixteen 300 ms writes inside the 5 s deadline, never all forty.
    sink.start();
    let started = Instant::now();
    sink.close();

    assert!(started.elapsed() < Duration::from_secs(8), "shutdown must not hang");
    let written = sink.metrics().written();
    let lost = sink.metrics().dropped_shutdown();
    assert!(lost > 0, "deadline should abandon some frames");
    assert_eq!(written + lost, 40);
    // The one extra write is the lost-at-shutdown notice.
    assert_eq!(slow.written(), written + 1);
}

#[test]
fn test_per_sink_filter_runs_on_worker() {
    let _lock = support::config_lock();
    let collector = CollectorSink::new("filtered", "{logger} {msg}");
    let filter = crate::filter::CompiledFilter::compile("logger = \"keep.me\"").unwrap();
    let sink = AsyncSink::with_filter(
        "filtered-q",
        Some(filter),
        vec![collector.clone() as Arc<dyn Sink>],
        64,
        OverflowPolicy::Block,
    );
    sink.start();
    install_root(Severity::INFO, vec![sink.clone() as Arc<dyn Sink>]);

    let keep = logger("keep.me");
    let drop_it = logger("drop.me");
    warning!(keep, "in");
    warning!(drop_it, "out");
    sink.close();

    assert_eq!(collector.lines(), vec!["keep.me in\n".to_string()]);
    // Both frames crossed the queue; the filter ran at the worker.
    assert_eq!(sink.metrics().enqueued(), 2);
}

#[test]
fn test_emission_decorators_survive_the_queue() {
    let _lock = support::config_lock();
    let collector = CollectorSink::new("scoped", "{scope_indent}{msg} [{task_id}]");
    let sink = AsyncSink::new(
        "scoped-q",
        vec![collector.clone() as Arc<dyn Sink>],
        64,
        OverflowPolicy::Block,
    );
    sink.start();
    install_root(Severity::INFO, vec![sink.clone() as Arc<dyn Sink>]);

    let handle = logger("scoped.app");
    {
        let _outer = crate::scope();
        let _inner = crate::scope();
        info!(handle, "deep");
    }
    info!(handle, "flat");
    sink.close();

    let lines = collector.lines();
    assert_eq!(lines.len(), 2);
    // Two scopes deep at emission, rendered by the worker thread.
    assert!(lines[0].starts_with("    deep ["), "got {:?}", lines[0]);
    assert!(lines[1].starts_with("flat ["), "got {:?}", lines[1]);
    // The task id is the emitting thread's, not the worker's.
    assert_eq!(lines[0].split('[').nth(1), lines[1].split('[').nth(1));
}

#[test]
fn test_saturated_record_reaches_sink_with_marker() {
    let _lock = support::config_lock();
    let collector = CollectorSink::new("sat", "{msg}");
    install_root(Severity::INFO, vec![collector.clone() as Arc<dyn Sink>]);

    let handle = logger("sat.app");
    let record = handle.record(Severity::WARNING, crate::location!(), "m");
    let mut record = record;
    for i in 0..30i64 {
        record = record.with(i);
    }
    record.commit();

    let lines = collector.lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].ends_with("...\n"), "got {:?}", lines[0]);
}

#[test]
fn test_runtime_control_surface() {
    let _lock = support::config_lock();
    let collector = CollectorSink::new("ctl", "{severity} {logger} {msg}");
    install_root(Severity::WARNING, vec![collector.clone() as Arc<dyn Sink>]);

    let handle = logger("ctl.app");
    info!(handle, "dropped");
    assert!(collector.lines().is_empty());

    registry::set_threshold("ctl.app", Severity::INFO);
    info!(handle, "kept");
    assert_eq!(collector.lines(), vec!["INFO ctl.app kept\n".to_string()]);

    let loggers = registry::list_loggers();
    assert!(loggers.iter().any(|(name, eff)| name == "ctl.app" && *eff == Severity::INFO));
    assert!(loggers.iter().any(|(name, eff)| name.is_empty() && *eff == Severity::WARNING));
}

#[test]
fn test_log_macro_levels() {
    let _lock = support::config_lock();
    let collector = CollectorSink::new("levels", "{severity} {msg}");
    install_root(Severity::TRACE, vec![collector.clone() as Arc<dyn Sink>]);

    let handle = logger("levels.app");
    log!(handle, Severity::NOTICE, "notice");
    crate::critical!(handle, "boom");
    crate::trace!(handle, "fine");

    assert_eq!(
        collector.lines(),
        vec![
            "NOTICE notice\n".to_string(),
            "CRITICAL boom\n".to_string(),
            "TRACE fine\n".to_string(),
        ]
    );
}
