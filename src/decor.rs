//! Decorators and format templates.
//!
//! A decorator is a named producer of one formatted fragment for a record
//! view. A sink's format string is a template with `{name}` placeholders
//! resolved against the decorator registry at configuration time; unknown
//! names fail validation, so a bad template never reaches the write path.
//!
//! Values that must reflect the emission moment (`date_time`, `time`,
//! `task_id`, `scope_indent`, `scope_elapsed`) read fields the encoder
//! captured into the frame; the rest (`pid`, `logger`, `severity`) are
//! resolved where the write happens.

use ahash::AHashMap;
use chrono::DateTime;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::component::Component;
use crate::error::{Error, Result};
use crate::record::Composed;
use crate::types;

/// Format used when a stream's configuration does not name one.
pub const DEFAULT_FORMAT: &str = "{date_time} [{severity}] {logger} {msg}";

/// A named producer of one formatted fragment.
pub trait Decorator: Send + Sync {
    fn name(&self) -> &'static str;
    fn emit(&self, view: &Composed<'_>, out: &mut String);
}

static REGISTRY: Lazy<RwLock<AHashMap<&'static str, Arc<dyn Decorator>>>> = Lazy::new(|| {
    let mut table: AHashMap<&'static str, Arc<dyn Decorator>> = AHashMap::new();
    let standard: [Arc<dyn Decorator>; 10] = [
        Arc::new(DateTimeDecor),
        Arc::new(TimeDecor),
        Arc::new(LoggerDecor),
        Arc::new(SeverityDecor),
        Arc::new(TaskIdDecor),
        Arc::new(PidDecor),
        Arc::new(SourceLocationDecor),
        Arc::new(ScopeIndentDecor),
        Arc::new(ScopeElapsedDecor),
        Arc::new(MsgDecor),
    ];
    for decor in standard {
        table.insert(decor.name(), decor);
    }
    RwLock::new(table)
});

/// Register a user decorator. Fails if the name is already taken.
pub fn register_decorator(decor: Arc<dyn Decorator>) -> Result<()> {
    let mut table = REGISTRY.write();
    let name = decor.name();
    if table.contains_key(name) {
        return Err(Error::DuplicateName(name.to_string()));
    }
    table.insert(name, decor);
    Ok(())
}

fn lookup(name: &str) -> Option<Arc<dyn Decorator>> {
    REGISTRY.read().get(name).cloned()
}

enum Segment {
    Literal(String),
    Decor(Arc<dyn Decorator>),
}

/// A compiled format template.
pub struct FormatTemplate {
    segments: Vec<Segment>,
}

impl FormatTemplate {
    /// Compile a template, resolving every `{name}` against the decorator
    /// registry. Unknown names are a configuration error.
    pub fn compile(template: &str) -> Result<FormatTemplate> {
        static PLACEHOLDER: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"\{([a-z_][a-z0-9_]*)\}").unwrap());

        let mut segments = Vec::new();
        let mut last = 0;
        for caps in PLACEHOLDER.captures_iter(template) {
            let whole = caps.get(0).unwrap();
            let name = &caps[1];
            if whole.start() > last {
                segments.push(Segment::Literal(template[last..whole.start()].to_string()));
            }
            let decor =
                lookup(name).ok_or_else(|| Error::UnknownPlaceholder(name.to_string()))?;
            segments.push(Segment::Decor(decor));
            last = whole.end();
        }
        if last < template.len() {
            segments.push(Segment::Literal(template[last..].to_string()));
        }
        Ok(FormatTemplate { segments })
    }

    /// Render one record view into `out`.
    pub fn render(&self, view: &Composed<'_>, out: &mut String) {
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Decor(decor) => decor.emit(view, out),
            }
        }
    }
}

/// Render a single component as display text.
pub(crate) fn render_component(out: &mut String, component: &Component<'_>) {
    match component {
        Component::Empty => {}
        Component::Int(v) => {
            let _ = write!(out, "{}", v);
        }
        Component::Float(v) => {
            let _ = write!(out, "{}", v);
        }
        Component::Bool(v) => out.push_str(if *v { "true" } else { "false" }),
        Component::Str(s) => out.push_str(s),
        Component::Bytes(b) => {
            for byte in *b {
                let _ = write!(out, "{:02x}", byte);
            }
        }
        Component::Address(a) => {
            let _ = write!(out, "0x{:x}", a);
        }
        Component::Instant(ns) => {
            let stamp = DateTime::from_timestamp_nanos(*ns as i64);
            let _ = write!(out, "{}", stamp.format("%Y-%m-%d %H:%M:%S%.6f"));
        }
        Component::User(id, wire) => types::render(*id, wire, out),
    }
}

struct DateTimeDecor;

impl Decorator for DateTimeDecor {
    fn name(&self) -> &'static str {
        "date_time"
    }

    fn emit(&self, view: &Composed<'_>, out: &mut String) {
        let stamp = DateTime::from_timestamp_nanos(view.timestamp_ns as i64);
        let _ = write!(out, "{}", stamp.format("%Y-%m-%d %H:%M:%S%.3f"));
    }
}

struct TimeDecor;

impl Decorator for TimeDecor {
    fn name(&self) -> &'static str {
        "time"
    }

    fn emit(&self, view: &Composed<'_>, out: &mut String) {
        let stamp = DateTime::from_timestamp_nanos(view.timestamp_ns as i64);
        let _ = write!(out, "{}", stamp.format("%H:%M:%S%.3f"));
    }
}

struct LoggerDecor;

impl Decorator for LoggerDecor {
    fn name(&self) -> &'static str {
        "logger"
    }

    fn emit(&self, view: &Composed<'_>, out: &mut String) {
        out.push_str(view.logger_name);
    }
}

struct SeverityDecor;

impl Decorator for SeverityDecor {
    fn name(&self) -> &'static str {
        "severity"
    }

    fn emit(&self, view: &Composed<'_>, out: &mut String) {
        let _ = write!(out, "{}", view.severity);
    }
}

struct TaskIdDecor;

impl Decorator for TaskIdDecor {
    fn name(&self) -> &'static str {
        "task_id"
    }

    fn emit(&self, view: &Composed<'_>, out: &mut String) {
        match view.task_id {
            Some(id) => {
                let _ = write!(out, "{:016x}", id);
            }
            None => out.push('-'),
        }
    }
}

struct PidDecor;

impl Decorator for PidDecor {
    fn name(&self) -> &'static str {
        "pid"
    }

    fn emit(&self, _view: &Composed<'_>, out: &mut String) {
        let _ = write!(out, "{}", std::process::id());
    }
}

struct SourceLocationDecor;

impl Decorator for SourceLocationDecor {
    fn name(&self) -> &'static str {
        "source_location"
    }

    fn emit(&self, view: &Composed<'_>, out: &mut String) {
        out.push_str(view.loc_file);
        if !view.loc_entity.is_empty() {
            let _ = write!(out, " ({})", view.loc_entity);
        }
    }
}

struct ScopeIndentDecor;

impl Decorator for ScopeIndentDecor {
    fn name(&self) -> &'static str {
        "scope_indent"
    }

    fn emit(&self, view: &Composed<'_>, out: &mut String) {
        for _ in 0..view.scope_depth {
            out.push_str("  ");
        }
    }
}

struct ScopeElapsedDecor;

impl Decorator for ScopeElapsedDecor {
    fn name(&self) -> &'static str {
        "scope_elapsed"
    }

    fn emit(&self, view: &Composed<'_>, out: &mut String) {
        match view.scope_elapsed_ns {
            Some(ns) if ns < 1_000 => {
                let _ = write!(out, "{}ns", ns);
            }
            Some(ns) if ns < 1_000_000 => {
                let _ = write!(out, "{:.1}us", ns as f64 / 1_000.0);
            }
            Some(ns) if ns < 1_000_000_000 => {
                let _ = write!(out, "{:.1}ms", ns as f64 / 1_000_000.0);
            }
            Some(ns) => {
                let _ = write!(out, "{:.3}s", ns as f64 / 1_000_000_000.0);
            }
            None => out.push('-'),
        }
    }
}

struct MsgDecor;

impl Decorator for MsgDecor {
    fn name(&self) -> &'static str {
        "msg"
    }

    fn emit(&self, view: &Composed<'_>, out: &mut String) {
        for component in view.components {
            render_component(out, component);
        }
        if view.truncated {
            out.push_str(" ...");
        }
    }
}
