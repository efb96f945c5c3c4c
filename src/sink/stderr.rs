//! Console sink writing formatted lines to stderr.

use parking_lot::Mutex;
use std::io::Write;

use crate::level::Severity;
use crate::record::Composed;
use crate::sink::{Pipeline, Sink};

pub struct StderrSink {
    name: String,
    pipeline: Pipeline,
    // Serializes whole lines across threads sharing this sink. The
    // critical section covers only the single write call.
    lock: Mutex<()>,
}

impl StderrSink {
    pub(crate) fn new(name: String, pipeline: Pipeline) -> StderrSink {
        StderrSink { name, pipeline, lock: Mutex::new(()) }
    }
}

impl Sink for StderrSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn maybe_accepts(&self, severity: Severity, _logger: &str) -> bool {
        self.pipeline.accepts_quick(severity)
    }

    fn write_record(&self, view: &Composed<'_>) {
        if let Some(mut line) = self.pipeline.render(view) {
            line.push('\n');
            let _guard = self.lock.lock();
            let _ = std::io::stderr().write_all(line.as_bytes());
        }
    }

    fn flush(&self) {
        let _guard = self.lock.lock();
        let _ = std::io::stderr().flush();
    }
}
