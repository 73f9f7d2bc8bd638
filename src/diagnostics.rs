//! Diagnostic output sink
//!
//! A `DiagnosticSink` is a cheap, cloneable handle over shared, mutex-guarded
//! writers. It is passed explicitly to whatever needs to report messages
//! (stores, worker threads) instead of swapping process-wide hooks.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Verbosity threshold for the sink
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum LogLevel {
    Quiet = 0,
    #[default]
    Error = 1,
    Info = 2,
    Debug = 3,
}

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

struct Shared {
    app_name: String,
    level: LogLevel,
    out: SharedWriter,
    err: SharedWriter,
    active: AtomicUsize,
}

/// Thread-safe handle for print/error/inform/debug output
#[derive(Clone)]
pub struct DiagnosticSink {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for DiagnosticSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticSink")
            .field("app_name", &self.shared.app_name)
            .field("level", &self.shared.level)
            .field("active", &self.active_count())
            .finish()
    }
}

impl DiagnosticSink {
    /// Sink writing to the process stdout/stderr
    pub fn stdio(app_name: impl Into<String>, level: LogLevel) -> Self {
        Self::with_writers(app_name, level, Box::new(io::stdout()), Box::new(io::stderr()))
    }

    /// Sink writing to arbitrary writers
    pub fn with_writers(
        app_name: impl Into<String>,
        level: LogLevel,
        out: Box<dyn Write + Send>,
        err: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                app_name: app_name.into(),
                level,
                out: Arc::new(Mutex::new(out)),
                err: Arc::new(Mutex::new(err)),
                active: AtomicUsize::new(0),
            }),
        }
    }

    pub fn level(&self) -> LogLevel {
        self.shared.level
    }

    pub fn app_name(&self) -> &str {
        &self.shared.app_name
    }

    /// Write `msg` verbatim to the output writer
    pub fn print(&self, msg: &str) {
        let mut out = self.shared.out.lock();
        let _ = out.write_all(msg.as_bytes());
        let _ = out.flush();
    }

    pub fn error(&self, msg: &str) {
        if self.shared.level >= LogLevel::Error {
            self.emit(&format!("{}: {}\n", self.shared.app_name, msg));
        }
    }

    pub fn inform(&self, msg: &str) {
        if self.shared.level >= LogLevel::Info {
            self.emit(&format!("{} [INFO]: {}\n", self.shared.app_name, msg));
        }
    }

    pub fn debug(&self, msg: &str) {
        if self.shared.level >= LogLevel::Debug {
            self.emit(&format!("{} [DEBUG]: {}\n", self.shared.app_name, msg));
        }
    }

    fn emit(&self, line: &str) {
        let mut err = self.shared.err.lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }

    /// Mark the sink as in use by a worker for the lifetime of the guard.
    ///
    /// The first activation and the last release are reported at debug level.
    pub fn activate(&self) -> SinkActivation {
        if self.shared.active.fetch_add(1, Ordering::SeqCst) == 0 {
            self.debug("initialising threads...");
        }
        SinkActivation { sink: self.clone() }
    }

    /// Number of live activations
    pub fn active_count(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }
}

/// RAII guard returned by [`DiagnosticSink::activate`]
pub struct SinkActivation {
    sink: DiagnosticSink,
}

impl SinkActivation {
    pub fn sink(&self) -> &DiagnosticSink {
        &self.sink
    }
}

impl Drop for SinkActivation {
    fn drop(&mut self) {
        if self.sink.shared.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.sink.debug("uninitialising threads...");
        }
    }
}
