//! Shared test fixtures: a collector sink that records write calls, a
//! lock serializing tests that swap the global configuration, and a
//! counting allocator for the no-allocation properties.

use parking_lot::{Mutex, MutexGuard};
use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::decor::FormatTemplate;
use crate::level::Severity;
use crate::record::Composed;
use crate::sink::Sink;

/// Serializes tests that install configurations or trigger shutdown; the
/// registry and coordinator are process-wide.
pub(crate) fn config_lock() -> MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock()
}

/// A stub sink recording every write as a formatted line.
pub(crate) struct CollectorSink {
    name: String,
    floor: Option<Severity>,
    template: FormatTemplate,
    lines: Mutex<Vec<String>>,
    flushes: AtomicU64,
    closes: AtomicU64,
}

impl CollectorSink {
    pub(crate) fn new(name: &str, format: &str) -> Arc<CollectorSink> {
        CollectorSink::with_floor(name, format, None)
    }

    pub(crate) fn with_floor(
        name: &str,
        format: &str,
        floor: Option<Severity>,
    ) -> Arc<CollectorSink> {
        Arc::new(CollectorSink {
            name: name.to_string(),
            floor,
            template: FormatTemplate::compile(format).unwrap(),
            lines: Mutex::new(Vec::new()),
            flushes: AtomicU64::new(0),
            closes: AtomicU64::new(0),
        })
    }

    pub(crate) fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub(crate) fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::SeqCst)
    }

    pub(crate) fn close_count(&self) -> u64 {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Sink for CollectorSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn maybe_accepts(&self, severity: Severity, _logger: &str) -> bool {
        match self.floor {
            Some(floor) => severity >= floor,
            None => true,
        }
    }

    fn write_record(&self, view: &Composed<'_>) {
        if let Some(floor) = self.floor {
            if view.severity < floor {
                return;
            }
        }
        let mut line = String::new();
        self.template.render(view, &mut line);
        line.push('\n');
        self.lines.lock().push(line);
    }

    fn flush(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// A sink whose writes take a fixed amount of time, for exercising drain
/// deadlines.
pub(crate) struct SlowSink {
    delay: std::time::Duration,
    written: AtomicU64,
}

impl SlowSink {
    pub(crate) fn new(delay: std::time::Duration) -> Arc<SlowSink> {
        Arc::new(SlowSink { delay, written: AtomicU64::new(0) })
    }

    pub(crate) fn written(&self) -> u64 {
        self.written.load(Ordering::SeqCst)
    }
}

impl Sink for SlowSink {
    fn name(&self) -> &str {
        "slow"
    }

    fn write_record(&self, _view: &Composed<'_>) {
        std::thread::sleep(self.delay);
        self.written.fetch_add(1, Ordering::SeqCst);
    }
}

// Allocation tracking is per thread so tests running in parallel cannot
// disturb each other's counts. The cells are const-initialized: the first
// access from inside the allocator must not itself allocate.
thread_local! {
    static TRACKING: Cell<bool> = const { Cell::new(false) };
    static ALLOCATIONS: Cell<u64> = const { Cell::new(0) };
}

pub(crate) struct CountingAllocator;

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        note_allocation();
        System.alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout)
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        note_allocation();
        System.realloc(ptr, layout, new_size)
    }
}

fn note_allocation() {
    let _ = TRACKING.try_with(|tracking| {
        if tracking.get() {
            let _ = ALLOCATIONS.try_with(|count| count.set(count.get() + 1));
        }
    });
}

#[global_allocator]
static GLOBAL: CountingAllocator = CountingAllocator;

/// Run `f` and return the number of heap allocations it performed on this
/// thread.
pub(crate) fn count_allocations(f: impl FnOnce()) -> u64 {
    ALLOCATIONS.with(|count| count.set(0));
    TRACKING.with(|tracking| tracking.set(true));
    f();
    TRACKING.with(|tracking| tracking.set(false));
    ALLOCATIONS.with(|count| count.get())
}
