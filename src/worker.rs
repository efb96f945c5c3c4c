//! Background worker: the single consumer attached to an async sink.
//!
//! The worker loop dequeues with a 100 ms wake interval so shutdown is
//! observed promptly, decodes each frame into a composed view, runs the
//! child sinks' filters and formats, and recycles the frame's storage.
//! Once shutdown is latched it keeps draining until the queue is empty or
//! the drain deadline expires, after which remaining frames are counted as
//! lost and dropped. Workers never block process exit on their own; the
//! termination coordinator is what joins them.

use smallvec::SmallVec;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::component::{Component, MAX_COMPONENTS};
use crate::filter::CompiledFilter;
use crate::frame::Frame;
use crate::level::Severity;
use crate::queue::{Dequeue, FrameQueue};
use crate::record::{now_ns, Composed};
use crate::registry;
use crate::sink::{Sink, SinkMetrics};

/// Dequeue wake interval; bounds how long shutdown can go unnoticed.
pub(crate) const WAKE_INTERVAL: Duration = Duration::from_millis(100);

/// Default hard deadline for draining a queue at shutdown.
pub(crate) const DRAIN_DEADLINE: Duration = Duration::from_secs(5);

/// Interval between coalesced dropped-record diagnostics.
const DROP_REPORT_INTERVAL: Duration = Duration::from_secs(1);

pub(crate) struct Worker {
    pub sink_name: String,
    pub queue: Arc<FrameQueue>,
    /// The owning async sink's per-sink filter, evaluated here so the
    /// emitting thread only pays for the cheap severity-floor check.
    pub filter: Option<Arc<CompiledFilter>>,
    pub children: Arc<Vec<Arc<dyn Sink>>>,
    pub metrics: Arc<SinkMetrics>,
    pub drain_deadline: Duration,
}

impl Worker {
    pub(crate) fn run(self) {
        let mut reported_drops = 0u64;
        let mut last_report: Option<Instant> = None;
        let mut drain_started: Option<Instant> = None;

        loop {
            match self.queue.dequeue_blocking(WAKE_INTERVAL) {
                Dequeue::Frame(frame) => self.deliver(frame),
                Dequeue::Timeout => {}
                Dequeue::Shutdown => break,
            }
            self.report_drops(&mut reported_drops, &mut last_report, false);

            if self.queue.is_shutdown() {
                let started = *drain_started.get_or_insert_with(Instant::now);
                if started.elapsed() > self.drain_deadline {
                    let mut lost = 0u64;
                    while let Some(frame) = self.queue.pop_front() {
                        frame.recycle();
                        lost += 1;
                    }
                    if lost > 0 {
                        self.metrics.add_dropped_shutdown(lost);
                        self.emit_notice(&format!("{} records lost at shutdown", lost));
                    }
                    break;
                }
            }
        }

        self.report_drops(&mut reported_drops, &mut last_report, true);
    }

    fn deliver(&self, frame: Frame) {
        {
            let view = frame.view();
            let logger_name = registry::logger_name(view.logger_id());
            let components: SmallVec<[Component<'_>; MAX_COMPONENTS]> =
                view.components().collect();
            let scope = view.scope();
            let composed = Composed {
                severity: view.severity(),
                logger_id: view.logger_id(),
                logger_name: &logger_name,
                timestamp_ns: view.timestamp_ns(),
                loc_file: view.loc_file(),
                loc_entity: view.loc_entity(),
                components: &components,
                task_id: view.task_id(),
                scope_depth: scope.map(|(depth, _)| depth).unwrap_or(0),
                scope_elapsed_ns: scope.map(|(_, elapsed)| elapsed),
                truncated: view.truncated(),
            };
            let accepted = match &self.filter {
                Some(filter) => filter.accepts(&composed),
                None => true,
            };
            if accepted {
                for child in self.children.iter() {
                    if child.maybe_accepts(composed.severity, composed.logger_name) {
                        child.write_composed(&composed);
                    }
                }
            }
        }
        self.metrics.add_written(1);
        frame.recycle();
    }

    /// Emit the coalesced "N records dropped" diagnostic at most once per
    /// report interval.
    fn report_drops(&self, reported: &mut u64, last: &mut Option<Instant>, force: bool) {
        let total = self.metrics.dropped_overflow_raw().load(Ordering::Relaxed);
        let pending = total - *reported;
        if pending == 0 {
            return;
        }
        let due = match last {
            None => true,
            Some(at) => at.elapsed() >= DROP_REPORT_INTERVAL,
        };
        if force || due {
            *reported = total;
            *last = Some(Instant::now());
            self.emit_notice(&format!("{} records dropped", pending));
        }
    }

    /// Write a synthesized diagnostic record through the child sinks.
    fn emit_notice(&self, message: &str) {
        let components = [Component::Str(message)];
        let composed = Composed {
            severity: Severity::WARNING,
            logger_id: 0,
            logger_name: &self.sink_name,
            timestamp_ns: now_ns(),
            loc_file: "",
            loc_entity: "",
            components: &components,
            task_id: None,
            scope_depth: 0,
            scope_elapsed_ns: None,
            truncated: false,
        };
        for child in self.children.iter() {
            if child.maybe_accepts(composed.severity, composed.logger_name) {
                child.write_composed(&composed);
            }
        }
    }
}
