//! Sink interface and shared sink plumbing.
//!
//! A sink is an output endpoint behind a small capability surface: a cheap
//! pre-filter, two write operations (one for live records on the emitting
//! thread, one for composed views decoded from frames by a worker), and
//! flush/close. Concrete sinks live in the submodules; the async wrapper
//! and dispatcher are sinks too, which is what lets configuration nest
//! them freely.

pub mod asynch;
pub mod dispatcher;
pub mod file;
pub mod stderr;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::decor::FormatTemplate;
use crate::filter::CompiledFilter;
use crate::level::Severity;
use crate::record::Composed;

pub use asynch::{AsyncSink, OverflowPolicy, SinkMetrics};
pub use dispatcher::DispatcherSink;
pub use file::FileSink;
pub use stderr::StderrSink;

/// The capability interface every output endpoint implements.
///
/// Sinks are shared: a sink is referenced by the loggers that dispatch to
/// it and, when asynchronous, by exactly one worker. `close` must be
/// idempotent because shutdown and dispatcher fan-in can both reach it.
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    /// Cheap pre-filter on severity and logger name, run before any
    /// formatting or encoding work. Returning `true` here does not commit
    /// the sink to writing; the full per-sink filter still runs later.
    fn maybe_accepts(&self, severity: Severity, logger: &str) -> bool {
        let _ = (severity, logger);
        true
    }

    /// Sync path: a live record view borrowing the emitting caller's
    /// stack. Must not let the borrow escape the call.
    fn write_record(&self, view: &Composed<'_>);

    /// Async path: a view decoded from an owned frame by a worker. The
    /// default forwards to the live-record path, which is correct for
    /// every terminal sink.
    fn write_composed(&self, view: &Composed<'_>) {
        self.write_record(view)
    }

    fn flush(&self) {}

    fn close(&self) {}
}

/// Filter plus format shared by the terminal sinks. The severity floor is
/// extracted from the filter once at build time and answers
/// `maybe_accepts` without running the predicate.
pub(crate) struct Pipeline {
    filter: Option<CompiledFilter>,
    template: FormatTemplate,
    floor: Option<Severity>,
}

impl Pipeline {
    pub(crate) fn new(filter: Option<CompiledFilter>, template: FormatTemplate) -> Pipeline {
        let floor = filter.as_ref().and_then(|f| f.severity_floor());
        Pipeline { filter, template, floor }
    }

    pub(crate) fn accepts_quick(&self, severity: Severity) -> bool {
        match self.floor {
            Some(floor) => severity >= floor,
            None => true,
        }
    }

    /// Run the filter and render the line. `None` means the record was
    /// filtered out.
    pub(crate) fn render(&self, view: &Composed<'_>) -> Option<String> {
        if let Some(filter) = &self.filter {
            if !filter.accepts(view) {
                return None;
            }
        }
        let mut line = String::with_capacity(96);
        self.template.render(view, &mut line);
        Some(line)
    }
}

/// Coalesces repeated write-error diagnostics to one stderr line per
/// second, with a count of suppressed occurrences.
pub(crate) struct ErrorThrottle {
    last_sec: AtomicU64,
    suppressed: AtomicU64,
}

impl ErrorThrottle {
    pub(crate) const fn new() -> ErrorThrottle {
        ErrorThrottle { last_sec: AtomicU64::new(0), suppressed: AtomicU64::new(0) }
    }

    pub(crate) fn report(&self, sink: &str, err: &std::io::Error) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let last = self.last_sec.load(Ordering::Relaxed);
        if now != last
            && self
                .last_sec
                .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            let suppressed = self.suppressed.swap(0, Ordering::Relaxed);
            if suppressed > 0 {
                eprintln!(
                    "blazelog: sink '{}' write failed: {} ({} similar suppressed)",
                    sink, err, suppressed
                );
            } else {
                eprintln!("blazelog: sink '{}' write failed: {}", sink, err);
            }
        } else {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
        }
    }
}
