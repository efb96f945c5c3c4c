//! # blazelog - High-Performance Structured Multi-Sink Logging
//!
//! blazelog is a logging library built around one idea: the cost of a log
//! statement should be set by what happens to it. A record below its
//! logger's threshold costs a pointer test and nothing else; an accepted
//! record is captured as typed components without formatting, and only
//! crosses a thread boundary as a self-contained binary frame through a
//! lock-free queue into a per-sink background worker.
//!
//! ## Architecture
//!
//! - `record` / `component`: zero-allocation builder over typed payloads
//! - `registry`: copy-on-write logger tree with inherited thresholds
//! - `frame` / `pool`: owned binary encoding with pooled buffers
//! - `queue` / `worker`: bounded MPSC ring and one consumer per async sink
//! - `sink`: file, stderr, dispatcher and async endpoints behind one trait
//! - `decor` / `filter`: format templates and compiled filter expressions
//! - `config`: validated configuration install and reload
//! - `shutdown`: coordinator draining every queue before process exit
//!
//! ## Example
//!
//! ```no_run
//! use blazelog::{info, logger, Severity};
//!
//! let _guard = blazelog::init();
//! blazelog::set_threshold("db", Severity::DEBUG);
//!
//! let log = logger("db.pool");
//! info!(log, "connections open: ", 42);
//! ```

mod component;
mod config;
mod decor;
mod error;
mod filter;
mod frame;
mod level;
mod pool;
mod queue;
mod record;
mod registry;
mod scope;
mod shutdown;
mod sink;
mod types;
mod worker;

#[cfg(test)]
mod tests;

pub use component::{Capture, Component, ELLIPSIS, MAX_COMPONENTS};
pub use config::{
    apply_config, reload_config, Config, DispatchRef, LoggerConfig, StreamConfig, StreamRefs,
};
pub use decor::{register_decorator, Decorator, FormatTemplate, DEFAULT_FORMAT};
pub use error::{Error, Result};
pub use filter::{register_filter_fn, CompiledFilter, FilterFn, Literal};
pub use frame::{Frame, FrameView, MAX_FRAME_LEN};
pub use level::Severity;
pub use queue::{Dequeue, FrameQueue, DEFAULT_CAPACITY};
pub use record::{Composed, Record, SourceLocation};
pub use registry::{list_loggers, logger, set_threshold, Logger, LoggerHandle};
pub use scope::{scope, ScopeGuard};
pub use shutdown::{flush_all, init, shutdown, ShutdownGuard};
pub use sink::{
    AsyncSink, DispatcherSink, FileSink, OverflowPolicy, Sink, SinkMetrics, StderrSink,
};
pub use types::{register_type, Attributes, UserType};

/// Capture the current source location as a [`SourceLocation`].
#[macro_export]
macro_rules! location {
    () => {
        $crate::SourceLocation {
            file: concat!(file!(), ":", line!()),
            entity: module_path!(),
        }
    };
}

/// Emit a record at an explicit severity.
///
/// The first component is the message string; further expressions become
/// typed components via `Into<Component>`. Arguments are still evaluated
/// when the severity gate rejects the record, but each lands on the
/// absorbing empty record, so keep component expressions cheap.
#[macro_export]
macro_rules! log {
    ($handle:expr, $severity:expr, $message:expr $(, $component:expr)* $(,)?) => {{
        let record = $handle.record($severity, $crate::location!(), $message);
        $(let record = record.with($component);)*
        record.commit();
    }};
}

#[macro_export]
macro_rules! trace {
    ($handle:expr, $message:expr $(, $component:expr)* $(,)?) => {
        $crate::log!($handle, $crate::Severity::TRACE, $message $(, $component)*)
    };
}

#[macro_export]
macro_rules! debug {
    ($handle:expr, $message:expr $(, $component:expr)* $(,)?) => {
        $crate::log!($handle, $crate::Severity::DEBUG, $message $(, $component)*)
    };
}

#[macro_export]
macro_rules! info {
    ($handle:expr, $message:expr $(, $component:expr)* $(,)?) => {
        $crate::log!($handle, $crate::Severity::INFO, $message $(, $component)*)
    };
}

#[macro_export]
macro_rules! notice {
    ($handle:expr, $message:expr $(, $component:expr)* $(,)?) => {
        $crate::log!($handle, $crate::Severity::NOTICE, $message $(, $component)*)
    };
}

#[macro_export]
macro_rules! warning {
    ($handle:expr, $message:expr $(, $component:expr)* $(,)?) => {
        $crate::log!($handle, $crate::Severity::WARNING, $message $(, $component)*)
    };
}

#[macro_export]
macro_rules! error {
    ($handle:expr, $message:expr $(, $component:expr)* $(,)?) => {
        $crate::log!($handle, $crate::Severity::ERROR, $message $(, $component)*)
    };
}

#[macro_export]
macro_rules! critical {
    ($handle:expr, $message:expr $(, $component:expr)* $(,)?) => {
        $crate::log!($handle, $crate::Severity::CRITICAL, $message $(, $component)*)
    };
}
