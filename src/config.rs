//! Configuration loading.
//!
//! The configuration document has two top-level maps: `streams` describing
//! output endpoints and `loggers` assigning thresholds and streams to
//! logger names (the empty name is the root). The host application owns
//! the file format and parsing; this module consumes the parsed document,
//! validates it completely, and only then swaps it in. A failed load
//! leaves the running configuration untouched.
//!
//! ```json
//! {
//!   "streams": {
//!     "app": { "type": "file", "filename": "logs/app-$D.log",
//!              "format": "{date_time} [{severity}] {logger} {msg}" },
//!     "tee": { "type": "async", "dispatch": ["app"],
//!              "queue_capacity": 8192, "overflow": "drop_newest" }
//!   },
//!   "loggers": {
//!     "": { "threshold": "warning", "stream": "tee" },
//!     "db": { "threshold": "debug" }
//!   }
//! }
//! ```
//!
//! Stream types `zip`, `socket` and `syslog` belong to host-provided sink
//! implementations and are rejected here by the schema; a logger whose
//! threshold is `"off"` is disabled outright.

use ahash::AHashMap;
use serde::Deserialize;
use std::sync::Arc;

use crate::decor::{FormatTemplate, DEFAULT_FORMAT};
use crate::error::{Error, Result};
use crate::filter::CompiledFilter;
use crate::level::Severity;
use crate::queue::DEFAULT_CAPACITY;
use crate::registry::{self, LoggerSpec};
use crate::shutdown;
use crate::sink::{
    AsyncSink, DispatcherSink, FileSink, OverflowPolicy, Pipeline, Sink, StderrSink,
};

/// Default buffering for file sinks, in bytes.
const DEFAULT_BUFFERING: usize = 8192;

/// The parsed configuration document.
#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub loggers: AHashMap<String, LoggerConfig>,
    #[serde(default)]
    pub streams: AHashMap<String, StreamConfig>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggerConfig {
    /// Severity name, or `"off"` to disable the logger subtree.
    pub threshold: Option<String>,
    /// One or more stream names; omitted inherits the parent's streams.
    pub stream: Option<StreamRefs>,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub enum StreamRefs {
    One(String),
    Many(Vec<String>),
}

impl StreamRefs {
    fn names(&self) -> &[String] {
        match self {
            StreamRefs::One(name) => std::slice::from_ref(name),
            StreamRefs::Many(names) => names,
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamConfig {
    File {
        filename: String,
        format: Option<String>,
        filter: Option<String>,
        buffering: Option<usize>,
        #[serde(default)]
        create_dirs: bool,
        #[serde(default)]
        compress_on_close: bool,
    },
    Stderr {
        format: Option<String>,
        filter: Option<String>,
    },
    Dispatcher {
        dispatch: Vec<DispatchRef>,
        filter: Option<String>,
        /// Accepted only to produce a precise error: formatting happens on
        /// terminal streams.
        format: Option<String>,
    },
    Async {
        dispatch: Vec<DispatchRef>,
        queue_capacity: Option<usize>,
        overflow: Option<String>,
        filter: Option<String>,
        format: Option<String>,
    },
}

/// A dispatch target: a named stream or an inline stream definition.
#[derive(Deserialize)]
#[serde(untagged)]
pub enum DispatchRef {
    Named(String),
    Inline(Box<StreamConfig>),
}

/// Parse a JSON configuration text and apply it. This is the runtime
/// control surface's `reload_config`.
pub fn reload_config(text: &str) -> Result<()> {
    let config: Config =
        serde_json::from_str(text).map_err(|err| Error::InvalidConfig(err.to_string()))?;
    apply_config(&config)
}

/// Validate and install a configuration. On error nothing is installed
/// and the previous configuration keeps running.
pub fn apply_config(config: &Config) -> Result<()> {
    // Logger-side validation first: thresholds parse and stream
    // references exist. Nothing is constructed yet.
    let mut parsed_loggers = Vec::new();
    for (name, logger) in &config.loggers {
        let (threshold, disabled) = match &logger.threshold {
            None => (None, false),
            Some(text) if text.eq_ignore_ascii_case("off") => (None, true),
            Some(text) => (Some(Severity::parse(text)?), false),
        };
        if let Some(refs) = &logger.stream {
            for stream in refs.names() {
                if !config.streams.contains_key(stream) {
                    return Err(Error::UnknownStream(stream.clone()));
                }
            }
        }
        parsed_loggers.push((name.clone(), threshold, disabled));
    }

    // Build every named stream. Construction compiles filters and format
    // templates and detects dispatch cycles; the sinks it creates stay
    // inert (no worker threads, no files opened) until installed, so an
    // error here changes no runtime state.
    let mut builder = StreamBuilder {
        streams: &config.streams,
        built: AHashMap::new(),
        building: Vec::new(),
        all: Vec::new(),
        asyncs: Vec::new(),
    };
    for name in config.streams.keys() {
        builder.build_named(name)?;
    }

    let mut specs = Vec::new();
    for (name, threshold, disabled) in parsed_loggers {
        let logger = &config.loggers[&name];
        let sinks = logger.stream.as_ref().map(|refs| {
            refs.names()
                .iter()
                .map(|stream| Arc::clone(&builder.built[stream]))
                .collect::<Vec<_>>()
        });
        let threshold = if name.is_empty() && threshold.is_none() && !disabled {
            // The root always carries an explicit threshold.
            Some(Severity::WARNING)
        } else {
            threshold
        };
        specs.push(LoggerSpec { name, threshold, disabled, sinks });
    }

    // Attach workers before any emitter can reach the new sinks, then
    // swap the logger tree and retire the previous sink set.
    for sink in &builder.asyncs {
        sink.start();
    }
    registry::install_loggers(specs);
    shutdown::install_sinks(builder.all, builder.asyncs);
    Ok(())
}

struct StreamBuilder<'a> {
    streams: &'a AHashMap<String, StreamConfig>,
    built: AHashMap<String, Arc<dyn Sink>>,
    building: Vec<String>,
    all: Vec<Arc<dyn Sink>>,
    asyncs: Vec<Arc<AsyncSink>>,
}

impl StreamBuilder<'_> {
    fn build_named(&mut self, name: &str) -> Result<Arc<dyn Sink>> {
        if let Some(sink) = self.built.get(name) {
            return Ok(Arc::clone(sink));
        }
        if self.building.iter().any(|n| n == name) {
            return Err(Error::CyclicDispatch(name.to_string()));
        }
        let config = self
            .streams
            .get(name)
            .ok_or_else(|| Error::UnknownStream(name.to_string()))?;
        self.building.push(name.to_string());
        let sink = self.build(name, config);
        self.building.pop();
        let sink = sink?;
        self.built.insert(name.to_string(), Arc::clone(&sink));
        Ok(sink)
    }

    fn build(&mut self, name: &str, config: &StreamConfig) -> Result<Arc<dyn Sink>> {
        let sink: Arc<dyn Sink> = match config {
            StreamConfig::File {
                filename,
                format,
                filter,
                buffering,
                create_dirs,
                compress_on_close,
            } => Arc::new(FileSink::new(
                name.to_string(),
                self.pipeline(format.as_deref(), filter.as_deref())?,
                filename.clone(),
                buffering.unwrap_or(DEFAULT_BUFFERING),
                *create_dirs,
                *compress_on_close,
            )),
            StreamConfig::Stderr { format, filter } => Arc::new(StderrSink::new(
                name.to_string(),
                self.pipeline(format.as_deref(), filter.as_deref())?,
            )),
            StreamConfig::Dispatcher { dispatch, filter, format } => {
                reject_format(name, format)?;
                let children = self.build_children(name, dispatch)?;
                Arc::new(DispatcherSink::new(
                    name.to_string(),
                    self.filter(filter.as_deref())?,
                    children,
                ))
            }
            StreamConfig::Async { dispatch, queue_capacity, overflow, filter, format } => {
                reject_format(name, format)?;
                let children = self.build_children(name, dispatch)?;
                let policy = match overflow.as_deref() {
                    Some(name) => OverflowPolicy::parse(name)?,
                    None => OverflowPolicy::DropNewest,
                };
                let sink = AsyncSink::with_filter(
                    name.to_string(),
                    self.filter(filter.as_deref())?,
                    children,
                    queue_capacity.unwrap_or(DEFAULT_CAPACITY),
                    policy,
                );
                self.asyncs.push(Arc::clone(&sink));
                sink
            }
        };
        self.all.push(Arc::clone(&sink));
        Ok(sink)
    }

    fn build_children(
        &mut self,
        parent: &str,
        dispatch: &[DispatchRef],
    ) -> Result<Vec<Arc<dyn Sink>>> {
        let mut children = Vec::with_capacity(dispatch.len());
        for (index, target) in dispatch.iter().enumerate() {
            let child = match target {
                DispatchRef::Named(name) => self.build_named(name)?,
                DispatchRef::Inline(config) => {
                    let inline_name = format!("{}#{}", parent, index);
                    let sink = self.build(&inline_name, config)?;
                    self.built.insert(inline_name, Arc::clone(&sink));
                    sink
                }
            };
            children.push(child);
        }
        Ok(children)
    }

    fn pipeline(&self, format: Option<&str>, filter: Option<&str>) -> Result<Pipeline> {
        let template = FormatTemplate::compile(format.unwrap_or(DEFAULT_FORMAT))?;
        Ok(Pipeline::new(self.filter(filter)?, template))
    }

    fn filter(&self, filter: Option<&str>) -> Result<Option<CompiledFilter>> {
        filter.map(CompiledFilter::compile).transpose()
    }
}

fn reject_format(name: &str, format: &Option<String>) -> Result<()> {
    match format {
        Some(_) => Err(Error::InvalidConfig(format!(
            "stream '{}': 'format' is only valid on terminal streams",
            name
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Config {
        serde_json::from_str(text).unwrap()
    }

    fn build_all(config: &Config) -> Result<()> {
        let mut builder = StreamBuilder {
            streams: &config.streams,
            built: AHashMap::new(),
            building: Vec::new(),
            all: Vec::new(),
            asyncs: Vec::new(),
        };
        for name in config.streams.keys() {
            builder.build_named(name)?;
        }
        Ok(())
    }

    #[test]
    fn test_parse_shapes() {
        let config = parse(
            r#"{
                "streams": {
                    "console": { "type": "stderr", "format": "{severity} {msg}" },
                    "tee": { "type": "dispatcher", "dispatch": [
                        "console",
                        { "type": "file", "filename": "x.log" }
                    ] }
                },
                "loggers": {
                    "": { "threshold": "info", "stream": "tee" },
                    "db": { "threshold": "debug", "stream": ["console", "tee"] },
                    "noisy": { "threshold": "off" }
                }
            }"#,
        );
        assert_eq!(config.streams.len(), 2);
        assert_eq!(config.loggers.len(), 3);
        assert!(matches!(
            config.loggers["db"].stream,
            Some(StreamRefs::Many(ref names)) if names.len() == 2
        ));
    }

    #[test]
    fn test_unknown_stream_type_rejected() {
        let parsed: std::result::Result<Config, _> = serde_json::from_str(
            r#"{ "streams": { "s": { "type": "syslog", "facility": "daemon" } } }"#,
        );
        assert!(parsed.is_err());
        assert!(parsed.err().unwrap().to_string().contains("syslog"));
    }

    #[test]
    fn test_cycle_detection() {
        let config = parse(
            r#"{
                "streams": {
                    "a": { "type": "dispatcher", "dispatch": ["b"] },
                    "b": { "type": "dispatcher", "dispatch": ["a"] }
                }
            }"#,
        );
        match build_all(&config) {
            Err(Error::CyclicDispatch(_)) => {}
            other => panic!("expected cycle error, got ok={}", other.is_ok()),
        }
    }

    #[test]
    fn test_self_cycle_detection() {
        let config = parse(
            r#"{ "streams": { "a": { "type": "async", "dispatch": ["a"] } } }"#,
        );
        assert!(matches!(build_all(&config), Err(Error::CyclicDispatch(_))));
    }

    #[test]
    fn test_unknown_placeholder_rejected() {
        let config = parse(
            r#"{ "streams": { "s": { "type": "stderr", "format": "{wat}" } } }"#,
        );
        match build_all(&config) {
            Err(Error::UnknownPlaceholder(name)) => assert_eq!(name, "wat"),
            other => panic!("expected placeholder error, got ok={}", other.is_ok()),
        }
    }

    #[test]
    fn test_format_rejected_on_dispatcher() {
        let config = parse(
            r#"{
                "streams": {
                    "out": { "type": "stderr" },
                    "tee": { "type": "dispatcher", "dispatch": ["out"],
                             "format": "{msg}" }
                }
            }"#,
        );
        match build_all(&config) {
            Err(Error::InvalidConfig(msg)) => assert!(msg.contains("tee")),
            other => panic!("expected config error, got ok={}", other.is_ok()),
        }
    }

    #[test]
    fn test_bad_filter_rejected() {
        let config = parse(
            r#"{ "streams": { "s": { "type": "stderr", "filter": "severity >" } } }"#,
        );
        assert!(matches!(build_all(&config), Err(Error::FilterSyntax(_))));
    }

    #[test]
    fn test_unknown_logger_stream_ref() {
        let config = parse(
            r#"{ "loggers": { "db": { "threshold": "info", "stream": "missing" } } }"#,
        );
        match apply_config(&config) {
            Err(Error::UnknownStream(name)) => assert_eq!(name, "missing"),
            other => panic!("expected unknown stream error, got ok={}", other.is_ok()),
        }
    }

    #[test]
    fn test_bad_threshold_rejected() {
        let config = parse(r#"{ "loggers": { "db": { "threshold": "loud" } } }"#);
        assert!(matches!(apply_config(&config), Err(Error::InvalidSeverity(_))));
    }
}
