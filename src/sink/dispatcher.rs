//! Dispatcher sink: ordered fan-out over child sinks.

use std::sync::Arc;

use crate::filter::CompiledFilter;
use crate::level::Severity;
use crate::record::Composed;
use crate::sink::Sink;

pub struct DispatcherSink {
    name: String,
    filter: Option<CompiledFilter>,
    floor: Option<Severity>,
    children: Vec<Arc<dyn Sink>>,
}

impl DispatcherSink {
    pub(crate) fn new(
        name: String,
        filter: Option<CompiledFilter>,
        children: Vec<Arc<dyn Sink>>,
    ) -> DispatcherSink {
        let floor = filter.as_ref().and_then(|f| f.severity_floor());
        DispatcherSink { name, filter, floor, children }
    }

    fn accepts(&self, view: &Composed<'_>) -> bool {
        match &self.filter {
            Some(filter) => filter.accepts(view),
            None => true,
        }
    }
}

impl Sink for DispatcherSink {
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
        if !self.accepts(view) {
            return;
        }
        for child in &self.children {
            if child.maybe_accepts(view.severity, view.logger_name) {
                child.write_record(view);
            }
        }
    }

    fn write_composed(&self, view: &Composed<'_>) {
        if !self.accepts(view) {
            return;
        }
        for child in &self.children {
            if child.maybe_accepts(view.severity, view.logger_name) {
                child.write_composed(view);
            }
        }
    }

    fn flush(&self) {
        for child in &self.children {
            child.flush();
        }
    }

    fn close(&self) {
        for child in &self.children {
            child.close();
        }
    }
}
