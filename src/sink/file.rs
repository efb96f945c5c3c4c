//! File sink.
//!
//! The target path is a template expanded when the file is opened, not
//! when the configuration is loaded, and the file itself is not created
//! until the first record is written to it. Supported template escapes:
//!
//! - `$D` current date (`YYYY-MM-DD`)
//! - `$T` current time (`HHMMSS`)
//! - `$$` process id
//! - `$N` process-wide unique sequence number
//! - `${VAR}` environment variable (empty when unset)

use chrono::Local;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::level::Severity;
use crate::record::Composed;
use crate::sink::{ErrorThrottle, Pipeline, Sink};

/// Process-wide counter backing the `$N` template escape.
static SEQUENCE: AtomicU64 = AtomicU64::new(1);

struct FileState {
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
}

pub struct FileSink {
    name: String,
    pipeline: Pipeline,
    path_template: String,
    create_dirs: bool,
    buffering: usize,
    compress_on_close: bool,
    state: Mutex<FileState>,
    throttle: ErrorThrottle,
    closed: AtomicBool,
}

impl FileSink {
    pub(crate) fn new(
        name: String,
        pipeline: Pipeline,
        path_template: String,
        buffering: usize,
        create_dirs: bool,
        compress_on_close: bool,
    ) -> FileSink {
        FileSink {
            name,
            pipeline,
            path_template,
            create_dirs,
            buffering,
            compress_on_close,
            state: Mutex::new(FileState { writer: None, path: None }),
            throttle: ErrorThrottle::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// The path the sink opened, once the first record has been written.
    pub fn current_path(&self) -> Option<PathBuf> {
        self.state.lock().path.clone()
    }

    fn open(&self, state: &mut FileState) -> io::Result<()> {
        if state.writer.is_some() {
            return Ok(());
        }
        let path = PathBuf::from(expand_path(&self.path_template));
        if self.create_dirs {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let capacity = if self.buffering == 0 { 1 } else { self.buffering };
        state.writer = Some(BufWriter::with_capacity(capacity, file));
        state.path = Some(path);
        Ok(())
    }

    fn write_line(&self, line: &str) {
        if self.closed.load(Ordering::Relaxed) {
            return;
        }
        let mut state = self.state.lock();
        let result = self.open(&mut state).and_then(|_| {
            let writer = state.writer.as_mut().unwrap();
            writer.write_all(line.as_bytes())?;
            if self.buffering == 0 {
                writer.flush()?;
            }
            Ok(())
        });
        if let Err(err) = result {
            self.throttle.report(&self.name, &err);
        }
    }

    fn compress(&self, path: &Path) -> io::Result<()> {
        let mut source = File::open(path)?;
        let mut target_path = path.as_os_str().to_owned();
        target_path.push(".gz");
        let target = File::create(&target_path)?;
        let mut encoder = GzEncoder::new(BufWriter::new(target), Compression::default());
        io::copy(&mut source, &mut encoder)?;
        encoder.finish()?.flush()?;
        std::fs::remove_file(path)?;
        Ok(())
    }
}

impl Sink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn maybe_accepts(&self, severity: Severity, _logger: &str) -> bool {
        self.pipeline.accepts_quick(severity)
    }

    fn write_record(&self, view: &Composed<'_>) {
        if let Some(mut line) = self.pipeline.render(view) {
            line.push('\n');
            self.write_line(&line);
        }
    }

    fn flush(&self) {
        let mut state = self.state.lock();
        if let Some(writer) = state.writer.as_mut() {
            if let Err(err) = writer.flush() {
                self.throttle.report(&self.name, &err);
            }
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.state.lock();
        let path = state.path.clone();
        if let Some(mut writer) = state.writer.take() {
            if let Err(err) = writer.flush() {
                self.throttle.report(&self.name, &err);
            }
        }
        drop(state);
        if self.compress_on_close {
            if let Some(path) = path {
                if let Err(err) = self.compress(&path) {
                    self.throttle.report(&self.name, &err);
                }
            }
        }
    }
}

/// Expand a path template. Runs at open time so `$D`/`$T` reflect the
/// first write, not configuration load.
pub(crate) fn expand_path(template: &str) -> String {
    let mut out = String::with_capacity(template.len() + 16);
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('D') => {
                chars.next();
                out.push_str(&Local::now().format("%Y-%m-%d").to_string());
            }
            Some('T') => {
                chars.next();
                out.push_str(&Local::now().format("%H%M%S").to_string());
            }
            Some('$') => {
                chars.next();
                out.push_str(&std::process::id().to_string());
            }
            Some('N') => {
                chars.next();
                out.push_str(&SEQUENCE.fetch_add(1, Ordering::Relaxed).to_string());
            }
            Some('{') => {
                chars.next();
                let mut var = String::new();
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    var.push(c);
                }
                out.push_str(&std::env::var(&var).unwrap_or_default());
            }
            _ => out.push('$'),
        }
    }
    out
}
