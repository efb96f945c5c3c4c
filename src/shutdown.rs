//! Termination coordinator.
//!
//! Worker threads never hold the process open by themselves: nothing joins
//! them implicitly, so an application that exits without touching the
//! coordinator is never blocked by logging. The coordinator is the scoped
//! resource that makes the opposite guarantee: acquire it near the process
//! entry point, and its release signals shutdown to every async sink,
//! drains each queue within its deadline, joins the workers, and closes
//! every sink exactly once. A worker that cannot drain in time has its
//! remaining frames counted and dropped; shutdown never deadlocks.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::registry;
use crate::sink::{AsyncSink, Sink};

struct Coordinator {
    sinks: Mutex<Vec<Arc<dyn Sink>>>,
    asyncs: Mutex<Vec<Arc<AsyncSink>>>,
}

static COORDINATOR: Lazy<Coordinator> = Lazy::new(|| Coordinator {
    sinks: Mutex::new(Vec::new()),
    asyncs: Mutex::new(Vec::new()),
});

/// Acquire the process-wide shutdown guard. Dropping it runs
/// [`shutdown`]; install it as the outermost scoped value in `main` so the
/// release happens after application code has emitted its last record.
pub fn init() -> ShutdownGuard {
    Lazy::force(&COORDINATOR);
    ShutdownGuard { _priv: () }
}

/// Scoped handle whose drop drains and closes every sink.
pub struct ShutdownGuard {
    _priv: (),
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        shutdown();
    }
}

/// Flush every registered sink. Async sinks wait briefly for their queue
/// to drain before flushing the underlying outputs.
pub fn flush_all() {
    let sinks = COORDINATOR.sinks.lock().clone();
    for sink in sinks {
        sink.flush();
    }
}

/// Signal shutdown, drain every async queue within its deadline, join the
/// workers, and close all sinks. Returns the number of frames lost to
/// drain deadlines. Safe to call more than once; sinks close once.
pub fn shutdown() -> u64 {
    registry::disable_all();

    let asyncs = std::mem::take(&mut *COORDINATOR.asyncs.lock());
    let sinks = std::mem::take(&mut *COORDINATOR.sinks.lock());

    // Latch shutdown on every queue first so all workers start draining
    // concurrently, then close (which joins) one by one.
    for sink in &asyncs {
        sink.signal_shutdown();
    }
    let mut lost = 0;
    for sink in &asyncs {
        sink.close();
        lost += sink.metrics().dropped_shutdown();
    }
    for sink in &sinks {
        sink.flush();
        sink.close();
    }
    lost
}

/// Replace the registered sink set after a configuration install. Old
/// sinks are drained and closed; the new async sinks are not started
/// here, the configuration loader does that once everything is wired.
pub(crate) fn install_sinks(all: Vec<Arc<dyn Sink>>, asyncs: Vec<Arc<AsyncSink>>) {
    let old_asyncs = {
        let mut slot = COORDINATOR.asyncs.lock();
        std::mem::replace(&mut *slot, asyncs)
    };
    let old_sinks = {
        let mut slot = COORDINATOR.sinks.lock();
        std::mem::replace(&mut *slot, all)
    };
    for sink in old_asyncs {
        sink.close();
    }
    for sink in old_sinks {
        sink.flush();
        sink.close();
    }
}
