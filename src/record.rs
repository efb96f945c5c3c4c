//! Record construction and the emission hot path.
//!
//! A record is built component by component on the emitting thread. The
//! builder has two states: an active record holding a fixed-capacity
//! component array, and a disabled state that absorbs every operation.
//! Extending a disabled record is a single predictable branch, which is
//! what makes the discard path cheap enough to leave verbose call sites in
//! production builds.

use std::sync::Arc;

use crate::component::{Component, ELLIPSIS, MAX_COMPONENTS};
use crate::level::Severity;
use crate::registry::Logger;
use crate::scope;

/// Source location captured at the emission call site.
///
/// `file` carries the file path and line joined as one literal
/// (`"src/job.rs:42"`); `entity` names the enclosing module or symbol.
/// Both are static strings produced by the [`location!`](crate::location)
/// macro.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: &'static str,
    pub entity: &'static str,
}

impl SourceLocation {
    pub const UNKNOWN: SourceLocation = SourceLocation { file: "", entity: "" };
}

/// A record under construction.
pub enum Record<'a> {
    /// Absorbing state: the logger is disabled or the severity is below
    /// threshold. Every operation on it is a no-op.
    Disabled,
    Active(ActiveRecord<'a>),
}

/// The captured state of an accepted record.
pub struct ActiveRecord<'a> {
    logger: Arc<Logger>,
    severity: Severity,
    location: SourceLocation,
    timestamp_ns: u64,
    components: [Component<'a>; MAX_COMPONENTS],
    len: u8,
    saturated: bool,
}

impl<'a> Record<'a> {
    pub(crate) fn active(
        logger: Arc<Logger>,
        severity: Severity,
        location: SourceLocation,
        message: &'a str,
    ) -> Record<'a> {
        let mut components = [Component::Empty; MAX_COMPONENTS];
        components[0] = Component::Str(message);
        Record::Active(ActiveRecord {
            logger,
            severity,
            location,
            timestamp_ns: now_ns(),
            components,
            len: 1,
            saturated: false,
        })
    }

    /// Append one component. Absorbing on a disabled record; saturates with
    /// a trailing `"..."` once the component array fills up.
    #[inline]
    pub fn with<C: Into<Component<'a>>>(mut self, component: C) -> Record<'a> {
        if let Record::Active(rec) = &mut self {
            rec.push(component.into());
        }
        self
    }

    /// True when the record will reach sinks on commit.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        matches!(self, Record::Active(_))
    }

    /// Number of captured components, zero for a disabled record.
    pub fn component_count(&self) -> usize {
        match self {
            Record::Disabled => 0,
            Record::Active(rec) => rec.len as usize,
        }
    }

    /// Dispatch the record to its logger's sinks. A disabled record
    /// vanishes without side effects.
    pub fn commit(self) {
        if let Record::Active(rec) = self {
            rec.dispatch();
        }
    }
}

impl<'a> ActiveRecord<'a> {
    #[inline]
    fn push(&mut self, component: Component<'a>) {
        if self.saturated {
            return;
        }
        let len = self.len as usize;
        if len < MAX_COMPONENTS - 1 {
            self.components[len] = component;
            self.len += 1;
        } else {
            // The append that would fill the final slot writes the marker
            // instead; everything after it is dropped.
            self.components[MAX_COMPONENTS - 1] = Component::Str(ELLIPSIS);
            self.len = MAX_COMPONENTS as u8;
            self.saturated = true;
        }
    }

    pub(crate) fn components(&self) -> &[Component<'a>] {
        &self.components[..self.len as usize]
    }

    fn dispatch(&self) {
        let scope = scope::current_scope();
        let view = Composed {
            severity: self.severity,
            logger_id: self.logger.id(),
            logger_name: self.logger.name(),
            timestamp_ns: self.timestamp_ns,
            loc_file: self.location.file,
            loc_entity: self.location.entity,
            components: self.components(),
            task_id: Some(scope::task_id()),
            scope_depth: scope.map(|(depth, _)| depth).unwrap_or(0),
            scope_elapsed_ns: scope.map(|(_, elapsed)| elapsed),
            truncated: false,
        };
        for sink in self.logger.sinks() {
            if sink.maybe_accepts(view.severity, view.logger_name) {
                sink.write_record(&view);
            }
        }
    }
}

/// A fully resolved record view, shared by the sync write path (borrowing
/// the emitting caller's stack) and the async write path (borrowing a
/// decoded frame). Sinks, filters, and decorators all consume this shape.
#[derive(Clone, Copy)]
pub struct Composed<'a> {
    pub severity: Severity,
    pub logger_id: u64,
    pub logger_name: &'a str,
    pub timestamp_ns: u64,
    pub loc_file: &'a str,
    pub loc_entity: &'a str,
    pub components: &'a [Component<'a>],
    pub task_id: Option<u64>,
    pub scope_depth: u16,
    pub scope_elapsed_ns: Option<u64>,
    /// Set when the frame encoder had to drop components to respect the
    /// per-sink frame size cap.
    pub truncated: bool,
}

impl<'a> Composed<'a> {
    /// The leading message component, empty if the record has none.
    pub fn message(&self) -> &'a str {
        match self.components.first() {
            Some(Component::Str(msg)) => msg,
            _ => "",
        }
    }
}

pub(crate) fn now_ns() -> u64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0) as u64
}
