//! ---
//! uah_section: "03-logging-tracing"
//! uah_subsection: "module"
//! uah_type: "source"
//! uah_scope: "code"
//! uah_description: "Process logging and server trace file control."
//! uah_version: "v0.1.0"
//! uah_owner: "tbd"
//! ---
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{daily, RollingFileAppender, Rotation};
use tracing_subscriber::filter::{EnvFilter, LevelFilter, Targets};
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, Registry};

use crate::config::{LoggingConfig, ServerTraceSettings, StackTraceSettings};

const LOG_ENV: &str = "UAHOST_LOG";

/// Target used by protocol stack implementations for their own events.
pub const STACK_TRACE_TARGET: &str = "uahost::stack";

static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();
static STDOUT_GUARD: OnceCell<WorkerGuard> = OnceCell::new();
static TRACE_CONTROL: OnceCell<TraceControl> = OnceCell::new();

/// Available log formats for the daemon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Initialize the process-wide tracing subscriber.
///
/// * `UAHOST_LOG` (or `LoggingConfig::filter`) overrides the stdout filter. When unset the
///   standard `RUST_LOG` variable is honoured, defaulting to `info`.
/// * With `LoggingConfig::directory` set, the same events are also written as JSON to a
///   daily rolling `<service_name>.log` file in that directory.
/// * A second, initially silent, layer receives the server trace once a started server
///   enables it through [`ServerTrace::open`].
///
/// Calling it again after a successful initialisation is a no-op. When another global
/// subscriber is already installed, that subscriber is kept and the server trace stays
/// unavailable.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    if TRACE_CONTROL.get().is_some() {
        return Ok(());
    }
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(io::stdout());
    let _ = STDOUT_GUARD.set(stdout_guard);

    let (trace_layer, control) = server_trace_layer();

    let stdout_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
    };

    let file_layer = match &config.directory {
        Some(directory) => {
            std::fs::create_dir_all(directory).with_context(|| {
                format!("unable to create log directory {}", directory.display())
            })?;
            let (file_writer, file_guard) =
                tracing_appender::non_blocking(daily(directory, format!("{service_name}.log")));
            let _ = FILE_GUARD.set(file_guard);
            let layer = fmt::layer()
                .with_target(true)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .json()
                .with_writer(file_writer)
                .with_filter(process_filter(config));
            Some(layer)
        }
        None => None,
    };

    match tracing_subscriber::registry()
        .with(trace_layer)
        .with(stdout_layer.with_filter(process_filter(config)))
        .with(file_layer)
        .try_init()
    {
        Ok(()) => {
            let _ = TRACE_CONTROL.set(control);
        }
        Err(err) => {
            warn!(error = %err, "a global subscriber is already installed; server trace unavailable");
            return Ok(());
        }
    }

    info!(
        service = %service_name,
        format = ?config.format,
        log_dir = ?config.directory,
        "tracing initialised"
    );
    Ok(())
}

/// Filter for the process sinks: `LoggingConfig::filter`, then `UAHOST_LOG`, then
/// `RUST_LOG`, then `info`.
fn process_filter(config: &LoggingConfig) -> EnvFilter {
    let directive = config
        .filter
        .clone()
        .or_else(|| std::env::var(LOG_ENV).ok());
    match directive {
        Some(directive) => EnvFilter::try_new(&directive).unwrap_or_else(|err| {
            eprintln!("invalid log directive '{directive}' ({err}); defaulting to info logging");
            EnvFilter::new("info")
        }),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

/// Map a numeric server trace level onto a tracing level filter.
///
/// `0` disables tracing, `1..=3` map to error/warn/info, `4` to debug and anything
/// higher to trace.
pub fn trace_level_filter(level: u32) -> LevelFilter {
    match level {
        0 => LevelFilter::OFF,
        1 => LevelFilter::ERROR,
        2 => LevelFilter::WARN,
        3 => LevelFilter::INFO,
        4 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Build the per-layer filter for the server trace file.
pub fn server_trace_targets(server: &ServerTraceSettings, stack: &StackTraceSettings) -> Targets {
    let stack_level = if stack.enabled {
        trace_level_filter(stack.level)
    } else {
        LevelFilter::OFF
    };
    Targets::new()
        .with_default(trace_level_filter(server.level))
        .with_target(STACK_TRACE_TARGET, stack_level)
}

struct TraceControl {
    filter: reload::Handle<Targets, Registry>,
    writer: TraceWriter,
}

impl TraceControl {
    fn silence(&self) {
        self.writer.replace(None);
        if let Err(err) = self.filter.reload(Targets::new()) {
            warn!(error = %err, "failed to disable server trace filter");
        }
    }
}

fn server_trace_layer() -> (impl Layer<Registry> + Send + Sync + 'static, TraceControl) {
    let (filter, handle) = reload::Layer::new(Targets::new());
    let writer = TraceWriter::default();
    let layer = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .json()
        .with_writer(writer.clone())
        .with_filter(filter);
    (
        layer,
        TraceControl {
            filter: handle,
            writer,
        },
    )
}

/// Swappable sink behind the server trace layer.
#[derive(Clone, Default)]
struct TraceWriter {
    inner: Arc<Mutex<Option<NonBlocking>>>,
}

impl TraceWriter {
    fn replace(&self, writer: Option<NonBlocking>) {
        *self.inner.lock() = writer;
    }
}

impl<'a> MakeWriter<'a> for TraceWriter {
    type Writer = TraceSink;

    fn make_writer(&'a self) -> Self::Writer {
        match self.inner.lock().clone() {
            Some(writer) => TraceSink::File(writer),
            None => TraceSink::Discard,
        }
    }
}

enum TraceSink {
    File(NonBlocking),
    Discard,
}

impl io::Write for TraceSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            TraceSink::File(writer) => writer.write(buf),
            TraceSink::Discard => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            TraceSink::File(writer) => writer.flush(),
            TraceSink::Discard => Ok(()),
        }
    }
}

/// An open server trace file. Dropping it flushes and silences the trace layer.
#[derive(Debug)]
pub struct ServerTrace {
    file: PathBuf,
    _guard: WorkerGuard,
}

impl ServerTrace {
    /// Route server (and optionally stack) events into the configured trace file.
    ///
    /// Returns `Ok(None)` when server tracing is disabled, or when [`init_tracing`] has not
    /// installed the trace layer. Library code never installs a global subscriber itself.
    /// The file rotates daily and at most `max_backup_files` files are retained;
    /// `max_entries` is informational only.
    pub fn open(
        server: &ServerTraceSettings,
        stack: &StackTraceSettings,
        server_uri: &str,
    ) -> Result<Option<Self>> {
        if !server.enabled {
            return Ok(None);
        }
        let Some(control) = TRACE_CONTROL.get() else {
            warn!(
                server_uri = %server_uri,
                trace_file = %server.file.display(),
                "server trace requested before init_tracing; trace file not opened"
            );
            return Ok(None);
        };
        let directory = server
            .file
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let prefix = server
            .file
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("uahost-server.log");
        std::fs::create_dir_all(directory).with_context(|| {
            format!("unable to create trace directory {}", directory.display())
        })?;
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(prefix)
            .max_log_files(server.max_backup_files.max(1) as usize)
            .build(directory)
            .with_context(|| format!("unable to open trace file {}", server.file.display()))?;
        let (writer, guard) = tracing_appender::non_blocking(appender);

        control.writer.replace(Some(writer));
        if let Err(err) = control.filter.reload(server_trace_targets(server, stack)) {
            warn!(error = %err, "failed to apply server trace level");
        }

        info!(
            server_uri = %server_uri,
            trace_file = %server.file.display(),
            level = server.level,
            stack_enabled = stack.enabled,
            max_entries = server.max_entries,
            max_backup_files = server.max_backup_files,
            "server trace opened"
        );
        Ok(Some(Self {
            file: server.file.clone(),
            _guard: guard,
        }))
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Flush and close the trace file.
    pub fn close(self) {}
}

impl Drop for ServerTrace {
    fn drop(&mut self) {
        info!(trace_file = %self.file.display(), "server trace closed");
        if let Some(control) = TRACE_CONTROL.get() {
            control.silence();
        }
    }
}
