//! Async sink wrapper.
//!
//! Wraps a list of child sinks behind a bounded frame queue and one
//! background worker. The emitting thread's write encodes the record into
//! an owned frame and enqueues it; the worker does everything else. The
//! overflow policy decides what happens when producers outrun the worker.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::filter::CompiledFilter;
use crate::frame::{Frame, MAX_FRAME_LEN};
use crate::level::Severity;
use crate::queue::FrameQueue;
use crate::record::Composed;
use crate::sink::Sink;
use crate::worker::{Worker, DRAIN_DEADLINE};

/// What a producer does when the sink's queue is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Back off, then park until the worker frees space.
    Block,
    /// Drop the record being enqueued.
    DropNewest,
    /// Evict the oldest queued record to make room.
    DropOldest,
}

impl OverflowPolicy {
    pub fn parse(name: &str) -> Result<OverflowPolicy> {
        match name {
            "block" => Ok(OverflowPolicy::Block),
            "drop_newest" => Ok(OverflowPolicy::DropNewest),
            "drop_oldest" => Ok(OverflowPolicy::DropOldest),
            other => Err(Error::InvalidConfig(format!(
                "unknown overflow policy '{}' (expected block, drop_newest or drop_oldest)",
                other
            ))),
        }
    }
}

/// Counters tracking one async sink's pipeline.
#[derive(Default)]
pub struct SinkMetrics {
    enqueued: AtomicU64,
    written: AtomicU64,
    dropped_overflow: AtomicU64,
    dropped_shutdown: AtomicU64,
}

impl SinkMetrics {
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn dropped_overflow(&self) -> u64 {
        self.dropped_overflow.load(Ordering::Relaxed)
    }

    pub fn dropped_shutdown(&self) -> u64 {
        self.dropped_shutdown.load(Ordering::Relaxed)
    }

    pub(crate) fn add_written(&self, n: u64) {
        self.written.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_dropped_shutdown(&self, n: u64) {
        self.dropped_shutdown.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn dropped_overflow_raw(&self) -> &AtomicU64 {
        &self.dropped_overflow
    }
}

pub struct AsyncSink {
    name: String,
    queue: Arc<FrameQueue>,
    policy: OverflowPolicy,
    max_frame_len: usize,
    // The full per-sink filter runs on the worker, not the emitting
    // thread; only its severity floor participates in maybe_accepts.
    filter: Option<Arc<CompiledFilter>>,
    floor: Option<Severity>,
    children: Arc<Vec<Arc<dyn Sink>>>,
    metrics: Arc<SinkMetrics>,
    worker: Mutex<Option<JoinHandle<()>>>,
    drain_deadline: Duration,
    closed: AtomicBool,
}

impl AsyncSink {
    /// Build an async sink without starting its worker; call
    /// [`AsyncSink::start`] to attach the consumer.
    pub fn new(
        name: impl Into<String>,
        children: Vec<Arc<dyn Sink>>,
        queue_capacity: usize,
        policy: OverflowPolicy,
    ) -> Arc<AsyncSink> {
        AsyncSink::with_filter(name, None, children, queue_capacity, policy)
    }

    pub(crate) fn with_filter(
        name: impl Into<String>,
        filter: Option<CompiledFilter>,
        children: Vec<Arc<dyn Sink>>,
        queue_capacity: usize,
        policy: OverflowPolicy,
    ) -> Arc<AsyncSink> {
        let floor = filter.as_ref().and_then(|f| f.severity_floor());
        Arc::new(AsyncSink {
            name: name.into(),
            queue: Arc::new(FrameQueue::with_capacity(queue_capacity)),
            policy,
            max_frame_len: MAX_FRAME_LEN,
            filter: filter.map(Arc::new),
            floor,
            children: Arc::new(children),
            metrics: Arc::new(SinkMetrics::default()),
            worker: Mutex::new(None),
            drain_deadline: DRAIN_DEADLINE,
            closed: AtomicBool::new(false),
        })
    }

    /// Spawn the worker thread if it is not already running.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.worker.lock();
        if slot.is_some() {
            return;
        }
        let worker = Worker {
            sink_name: self.name.clone(),
            queue: Arc::clone(&self.queue),
            filter: self.filter.clone(),
            children: Arc::clone(&self.children),
            metrics: Arc::clone(&self.metrics),
            drain_deadline: self.drain_deadline,
        };
        let handle = std::thread::Builder::new()
            .name(format!("blazelog-{}", self.name))
            .spawn(move || worker.run())
            .expect("failed to spawn sink worker thread");
        *slot = Some(handle);
    }

    pub fn metrics(&self) -> Arc<SinkMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn signal_shutdown(&self) {
        self.queue.signal_shutdown();
    }

    fn enqueue(&self, frame: Frame) {
        match self.policy {
            OverflowPolicy::DropNewest => match self.queue.try_enqueue(frame) {
                Ok(()) => {
                    self.metrics.enqueued.fetch_add(1, Ordering::Relaxed);
                }
                Err(rejected) => {
                    rejected.recycle();
                    self.metrics.dropped_overflow.fetch_add(1, Ordering::Relaxed);
                }
            },
            OverflowPolicy::DropOldest => {
                let mut frame = frame;
                loop {
                    match self.queue.try_enqueue(frame) {
                        Ok(()) => {
                            self.metrics.enqueued.fetch_add(1, Ordering::Relaxed);
                            return;
                        }
                        Err(back) => {
                            if self.queue.is_shutdown() {
                                back.recycle();
                                self.metrics.dropped_shutdown.fetch_add(1, Ordering::Relaxed);
                                return;
                            }
                            if let Some(evicted) = self.queue.pop_front() {
                                evicted.recycle();
                                self.metrics.dropped_overflow.fetch_add(1, Ordering::Relaxed);
                            }
                            frame = back;
                        }
                    }
                }
            }
            OverflowPolicy::Block => match self.queue.enqueue_blocking(frame) {
                Ok(()) => {
                    self.metrics.enqueued.fetch_add(1, Ordering::Relaxed);
                }
                Err(rejected) => {
                    // Only reachable when shutdown latches while blocked.
                    rejected.recycle();
                    self.metrics.dropped_shutdown.fetch_add(1, Ordering::Relaxed);
                }
            },
        }
    }
}

impl Sink for AsyncSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn maybe_accepts(&self, severity: Severity, logger: &str) -> bool {
        if let Some(floor) = self.floor {
            if severity < floor {
                return false;
            }
        }
        self.children.iter().any(|c| c.maybe_accepts(severity, logger))
    }

    fn write_record(&self, view: &Composed<'_>) {
        let frame = Frame::encode(view, self.max_frame_len);
        self.enqueue(frame);
    }

    fn flush(&self) {
        // Best effort: give the worker a moment to drain, then flush the
        // children it writes to.
        let deadline = Instant::now() + Duration::from_secs(1);
        while !self.queue.is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        for child in self.children.iter() {
            child.flush();
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.queue.signal_shutdown();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            // The worker exits on its own within the drain deadline.
            let _ = handle.join();
        }
        for child in self.children.iter() {
            child.flush();
            child.close();
        }
    }
}
