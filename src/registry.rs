//! Logger registry.
//!
//! Loggers form a tree keyed by dotted names, rooted at the empty name. A
//! logger with an explicit threshold uses it; everything else inherits the
//! nearest configured ancestor's effective threshold and sink list. The
//! whole tree is immutable once built: configuration changes build a new
//! tree and swap an atomic pointer, so emitters read a consistent snapshot
//! without locks or allocation.
//!
//! Each handle owns a slot holding the resolved logger for its name. The
//! slot is empty when the logger is disabled, which makes the emission
//! wrapper a single pointer test; threshold changes repoint every slot
//! before the swap returns, so they take effect for the next emission.

use ahash::AHashMap;
use arc_swap::{ArcSwap, ArcSwapOption};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use crate::decor::{FormatTemplate, DEFAULT_FORMAT};
use crate::level::Severity;
use crate::record::{Record, SourceLocation};
use crate::sink::{Pipeline, Sink, StderrSink};

/// An immutable node of the logger tree.
pub struct Logger {
    name: Arc<str>,
    id: u64,
    threshold: Option<Severity>,
    effective: Severity,
    disabled: bool,
    sinks: Vec<Arc<dyn Sink>>,
}

impl Logger {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// The explicitly configured threshold, `None` when inherited.
    pub fn threshold(&self) -> Option<Severity> {
        self.threshold
    }

    pub fn effective_threshold(&self) -> Severity {
        self.effective
    }

    pub(crate) fn sinks(&self) -> &[Arc<dyn Sink>] {
        &self.sinks
    }
}

/// A cheap, clonable handle to one named logger. Obtain with [`logger`],
/// typically once, and reuse it at the emission sites.
#[derive(Clone)]
pub struct LoggerHandle {
    slot: Arc<ArcSwapOption<Logger>>,
}

impl LoggerHandle {
    /// Begin a record. This wrapper performs only the disabled-slot test;
    /// the registry guarantees an empty slot means the logger is disabled,
    /// so the common discard is one predictable branch.
    #[inline]
    pub fn record<'a>(
        &self,
        severity: Severity,
        location: SourceLocation,
        message: &'a str,
    ) -> Record<'a> {
        if self.slot.load().is_none() {
            return Record::Disabled;
        }
        self.record_slow(severity, location, message)
    }

    #[inline(never)]
    fn record_slow<'a>(
        &self,
        severity: Severity,
        location: SourceLocation,
        message: &'a str,
    ) -> Record<'a> {
        let guard = self.slot.load();
        match guard.as_ref() {
            None => Record::Disabled,
            Some(node) if severity < node.effective_threshold() => Record::Disabled,
            Some(node) => Record::active(Arc::clone(node), severity, location, message),
        }
    }

    /// Whether a record at `severity` would currently be accepted.
    pub fn enabled(&self, severity: Severity) -> bool {
        match self.slot.load().as_ref() {
            None => false,
            Some(node) => severity >= node.effective_threshold(),
        }
    }

    /// The handle's current effective threshold, when enabled.
    pub fn effective_threshold(&self) -> Option<Severity> {
        self.slot.load().as_ref().map(|node| node.effective_threshold())
    }
}

/// Configuration input for one logger node.
pub(crate) struct LoggerSpec {
    pub name: String,
    pub threshold: Option<Severity>,
    pub disabled: bool,
    /// `None` inherits the parent's sink list.
    pub sinks: Option<Vec<Arc<dyn Sink>>>,
}

struct LoggerTree {
    nodes: AHashMap<Arc<str>, Arc<Logger>>,
}

impl LoggerTree {
    /// Resolve a name to its logger: the configured node, or an implicit
    /// node inheriting from the nearest configured ancestor. Disabled
    /// loggers resolve to `None`.
    fn resolve(&self, name: &str) -> Option<Arc<Logger>> {
        if let Some(node) = self.nodes.get(name) {
            if node.disabled {
                return None;
            }
            return Some(Arc::clone(node));
        }
        let ancestor = self.nearest_ancestor(name)?;
        if ancestor.disabled {
            return None;
        }
        Some(Arc::new(Logger {
            name: intern_name(name),
            id: intern_id(name),
            threshold: None,
            effective: ancestor.effective,
            disabled: false,
            sinks: ancestor.sinks.clone(),
        }))
    }

    fn nearest_ancestor(&self, name: &str) -> Option<&Arc<Logger>> {
        let mut current = name;
        loop {
            let parent = parent_name(current);
            if let Some(node) = self.nodes.get(parent) {
                return Some(node);
            }
            if parent.is_empty() {
                // The install paths always seed a root node.
                debug_assert!(false, "logger tree has no root");
                return None;
            }
            current = parent;
        }
    }
}

fn parent_name(name: &str) -> &str {
    match name.rfind('.') {
        Some(dot) => &name[..dot],
        None => "",
    }
}

struct IdTable {
    by_name: AHashMap<String, u64>,
    by_id: AHashMap<u64, Arc<str>>,
    next: u64,
}

struct Registry {
    specs: Mutex<AHashMap<String, LoggerSpec>>,
    tree: ArcSwap<LoggerTree>,
    slots: Mutex<AHashMap<String, Arc<ArcSwapOption<Logger>>>>,
    ids: RwLock<IdTable>,
}

static EMPTY_NAME: Lazy<Arc<str>> = Lazy::new(|| Arc::from(""));

static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut specs = AHashMap::new();
    specs.insert(String::new(), default_root_spec());
    let tree = build_tree(&specs);
    Registry {
        specs: Mutex::new(specs),
        tree: ArcSwap::from_pointee(tree),
        slots: Mutex::new(AHashMap::new()),
        ids: RwLock::new(IdTable {
            by_name: AHashMap::new(),
            by_id: AHashMap::new(),
            next: 1,
        }),
    }
});

fn default_root_spec() -> LoggerSpec {
    let template = FormatTemplate::compile(DEFAULT_FORMAT).expect("default format must compile");
    let stderr: Arc<dyn Sink> =
        Arc::new(StderrSink::new("stderr".to_string(), Pipeline::new(None, template)));
    LoggerSpec {
        name: String::new(),
        threshold: Some(Severity::WARNING),
        disabled: false,
        sinks: Some(vec![stderr]),
    }
}

/// Get a handle for a named logger, creating its slot on first use.
pub fn logger(name: &str) -> LoggerHandle {
    let registry = &*REGISTRY;
    let mut slots = registry.slots.lock();
    if let Some(slot) = slots.get(name) {
        return LoggerHandle { slot: Arc::clone(slot) };
    }
    let resolved = registry.tree.load().resolve(name);
    let slot = Arc::new(ArcSwapOption::from(resolved));
    slots.insert(name.to_string(), Arc::clone(&slot));
    LoggerHandle { slot }
}

/// Set a logger's explicit threshold. Takes effect for subsequent
/// emissions on every handle.
pub fn set_threshold(name: &str, severity: Severity) {
    let registry = &*REGISTRY;
    {
        let mut specs = registry.specs.lock();
        match specs.get_mut(name) {
            Some(spec) => {
                spec.threshold = Some(severity);
                spec.disabled = false;
            }
            None => {
                specs.insert(
                    name.to_string(),
                    LoggerSpec {
                        name: name.to_string(),
                        threshold: Some(severity),
                        disabled: false,
                        sinks: None,
                    },
                );
            }
        }
        let tree = build_tree(&specs);
        swap_tree(registry, tree);
    }
}

/// Configured loggers and their effective thresholds, root first.
pub fn list_loggers() -> Vec<(String, Severity)> {
    let tree = REGISTRY.tree.load();
    let mut entries: Vec<(String, Severity)> = tree
        .nodes
        .values()
        .filter(|node| !node.disabled)
        .map(|node| (node.name.to_string(), node.effective))
        .collect();
    entries.sort();
    entries
}

/// Disable every logger: used by the termination coordinator so emission
/// after teardown hits the null-slot fast path and vanishes.
pub(crate) fn disable_all() {
    let registry = &*REGISTRY;
    let mut specs = registry.specs.lock();
    specs.clear();
    specs.insert(
        String::new(),
        LoggerSpec {
            name: String::new(),
            threshold: Some(Severity::WARNING),
            disabled: true,
            sinks: Some(Vec::new()),
        },
    );
    let tree = build_tree(&specs);
    swap_tree(registry, tree);
}

/// Replace the configured logger set wholesale (configuration load).
pub(crate) fn install_loggers(new_specs: Vec<LoggerSpec>) {
    let registry = &*REGISTRY;
    let mut specs = registry.specs.lock();
    specs.clear();
    let mut has_root = false;
    for spec in new_specs {
        if spec.name.is_empty() {
            has_root = true;
        }
        specs.insert(spec.name.clone(), spec);
    }
    if !has_root {
        specs.insert(String::new(), default_root_spec());
    }
    let tree = build_tree(&specs);
    swap_tree(registry, tree);
}

/// Swap in a new tree and repoint every existing handle slot.
fn swap_tree(registry: &Registry, tree: LoggerTree) {
    let tree = Arc::new(tree);
    registry.tree.store(Arc::clone(&tree));
    let slots = registry.slots.lock();
    for (name, slot) in slots.iter() {
        slot.store(tree.resolve(name));
    }
}

fn build_tree(specs: &AHashMap<String, LoggerSpec>) -> LoggerTree {
    // Effective values resolve through the nearest configured ancestor, so
    // parents must be computed first; sorting by name length guarantees
    // every proper ancestor precedes its descendants.
    let mut names: Vec<&String> = specs.keys().collect();
    names.sort_by_key(|name| name.len());

    let mut nodes: AHashMap<Arc<str>, Arc<Logger>> = AHashMap::new();
    for name in names {
        let spec = &specs[name];
        let (parent_effective, parent_sinks, parent_disabled) = if name.is_empty() {
            (Severity::WARNING, Vec::new(), false)
        } else {
            let mut current = name.as_str();
            loop {
                current = parent_name(current);
                if let Some(node) = nodes.get(current) {
                    break (node.effective, node.sinks.clone(), node.disabled);
                }
                if current.is_empty() {
                    break (Severity::WARNING, Vec::new(), false);
                }
            }
        };
        let node = Logger {
            name: intern_name(name),
            id: intern_id(name),
            threshold: spec.threshold,
            effective: spec.threshold.unwrap_or(parent_effective),
            disabled: spec.disabled || parent_disabled,
            sinks: spec.sinks.clone().unwrap_or(parent_sinks),
        };
        nodes.insert(Arc::clone(&node.name), Arc::new(node));
    }
    LoggerTree { nodes }
}

/// Stable process-wide id for a logger name. Ids survive configuration
/// reloads so frames already queued keep resolving to the right name.
pub(crate) fn intern_id(name: &str) -> u64 {
    {
        let table = REGISTRY.ids.read();
        if let Some(id) = table.by_name.get(name) {
            return *id;
        }
    }
    let mut table = REGISTRY.ids.write();
    if let Some(id) = table.by_name.get(name) {
        return *id;
    }
    let id = table.next;
    table.next += 1;
    let interned: Arc<str> = Arc::from(name);
    table.by_name.insert(name.to_string(), id);
    table.by_id.insert(id, interned);
    id
}

fn intern_name(name: &str) -> Arc<str> {
    let id = intern_id(name);
    logger_name(id)
}

/// Resolve a frame's logger id back to its name. Unknown ids resolve to
/// the empty name.
pub(crate) fn logger_name(id: u64) -> Arc<str> {
    REGISTRY
        .ids
        .read()
        .by_id
        .get(&id)
        .cloned()
        .unwrap_or_else(|| Arc::clone(&EMPTY_NAME))
}

/// A logger node outside any tree, for exercising record construction in
/// tests without touching global state.
#[cfg(test)]
pub(crate) fn detached_logger(name: &str) -> Arc<Logger> {
    Arc::new(Logger {
        name: Arc::from(name),
        id: 0,
        threshold: None,
        effective: Severity::TRACE,
        disabled: false,
        sinks: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_name() {
        assert_eq!(parent_name("a.b.c"), "a.b");
        assert_eq!(parent_name("a"), "");
        assert_eq!(parent_name(""), "");
    }

    #[test]
    fn test_threshold_inheritance() {
        let mut specs = AHashMap::new();
        specs.insert(String::new(), LoggerSpec {
            name: String::new(),
            threshold: Some(Severity::WARNING),
            disabled: false,
            sinks: Some(Vec::new()),
        });
        specs.insert("db".to_string(), LoggerSpec {
            name: "db".to_string(),
            threshold: Some(Severity::DEBUG),
            disabled: false,
            sinks: None,
        });
        specs.insert("db.pool.conn".to_string(), LoggerSpec {
            name: "db.pool.conn".to_string(),
            threshold: None,
            disabled: false,
            sinks: None,
        });

        let tree = build_tree(&specs);
        assert_eq!(tree.nodes[""].effective, Severity::WARNING);
        assert_eq!(tree.nodes["db"].effective, Severity::DEBUG);
        // Unconfigured middle level falls through to "db".
        assert_eq!(tree.nodes["db.pool.conn"].effective, Severity::DEBUG);

        // Implicit resolution for names that were never configured.
        let web = tree.resolve("web.http").unwrap();
        assert_eq!(web.effective_threshold(), Severity::WARNING);
        assert_eq!(web.name(), "web.http");
    }

    #[test]
    fn test_disabled_resolves_to_none() {
        let mut specs = AHashMap::new();
        specs.insert(String::new(), LoggerSpec {
            name: String::new(),
            threshold: Some(Severity::WARNING),
            disabled: false,
            sinks: Some(Vec::new()),
        });
        specs.insert("noisy".to_string(), LoggerSpec {
            name: "noisy".to_string(),
            threshold: None,
            disabled: true,
            sinks: None,
        });

        let tree = build_tree(&specs);
        assert!(tree.resolve("noisy").is_none());
        assert!(tree.resolve("noisy.child").is_none());
        assert!(tree.resolve("fine").is_some());
    }

    #[test]
    fn test_intern_ids_are_stable() {
        let a = intern_id("stable.one");
        let b = intern_id("stable.two");
        assert_ne!(a, b);
        assert_eq!(intern_id("stable.one"), a);
        assert_eq!(&*logger_name(a), "stable.one");
        assert_eq!(&*logger_name(u64::MAX), "");
    }

    #[test]
    fn test_set_threshold_takes_effect_on_existing_handle() {
        let _lock = crate::tests::support::config_lock();
        let handle = logger("registry_test.live");
        set_threshold("registry_test.live", Severity::TRACE);
        assert!(handle.enabled(Severity::TRACE));
        set_threshold("registry_test.live", Severity::ERROR);
        assert!(!handle.enabled(Severity::INFO));
        assert!(handle.enabled(Severity::ERROR));
    }
}
