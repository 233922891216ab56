use migrator_config::Environment;
use std::io::Error;
use std::io::Write;
use std::sync::OnceLock;
use std::{
    backtrace::{Backtrace, BacktraceStatus},
    panic::PanicHookInfo,
    sync::Once,
};
use thiserror::Error;
use tracing::field::display;
use tracing::subscriber::{SetGlobalDefaultError, set_global_default};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{self, InitError},
};
use tracing_log::{LogTracer, log_tracer::SetLoggerError};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, FmtSubscriber, Registry, fmt, layer::SubscriberExt};

/// Key identifying the cluster in every production log line.
const CLUSTER_KEY_IN_LOG: &str = "cluster_id";

/// Key identifying the migration in every production log line.
const MIGRATION_KEY_IN_LOG: &str = "migration_id";

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to build rolling file appender: {0}")]
    InitAppender(#[from] InitError),

    #[error("failed to init log tracer: {0}")]
    InitLogTracer(#[from] SetLoggerError),

    #[error("failed to set global default subscriber: {0}")]
    SetGlobalDefault(#[from] SetGlobalDefaultError),

    #[error("an io error occurred: {0}")]
    Io(#[from] Error),
}

#[must_use]
pub enum LogFlusher {
    Flusher(WorkerGuard),
    NullFlusher,
}

static INIT_TEST_TRACING: Once = Once::new();

/// Call this function once at the beginning of a test and then set the ENABLE_TRACING
/// environment variable to 1 to view tracing in the terminal:
///
/// ENABLE_TRACING=1 cargo test <test_name>
///
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        if std::env::var("ENABLE_TRACING").is_ok() {
            // Tests always log to the terminal, whatever APP_ENVIRONMENT says.
            let _log_flusher = init_tracing_for_environment("test", Environment::Dev, None, None)
                .expect("Failed to initialize tracing for tests");
        }
    });
}

static CLUSTER_ID: OnceLock<String> = OnceLock::new();

static MIGRATION_ID: OnceLock<String> = OnceLock::new();

/// Sets the cluster id attached to every production log line.
pub fn set_global_cluster_id(cluster_id: String) {
    let _ = CLUSTER_ID.set(cluster_id);
}

pub fn get_global_cluster_id() -> Option<&'static str> {
    CLUSTER_ID.get().map(|s| s.as_str())
}

/// Sets the migration id attached to every production log line.
pub fn set_global_migration_id(migration_id: String) {
    let _ = MIGRATION_ID.set(migration_id);
}

pub fn get_global_migration_id() -> Option<&'static str> {
    MIGRATION_ID.get().map(|s| s.as_str())
}

/// Writer wrapper injecting the global top-level fields into JSON log lines.
struct TopLevelFieldsWriter<W> {
    inner: W,
}

impl<W> TopLevelFieldsWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W> Write for TopLevelFieldsWriter<W>
where
    W: Write,
{
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let fields = [
            (CLUSTER_KEY_IN_LOG, get_global_cluster_id()),
            (MIGRATION_KEY_IN_LOG, get_global_migration_id()),
        ];

        if fields.iter().any(|(_, value)| value.is_some())
            && let Ok(json_str) = std::str::from_utf8(buf)
            && let Ok(serde_json::Value::Object(mut map)) =
                serde_json::from_str::<serde_json::Value>(json_str)
        {
            let mut modified = false;

            for (key, value) in fields {
                if let Some(value) = value
                    && !map.contains_key(key)
                {
                    map.insert(
                        key.to_string(),
                        serde_json::Value::String(value.to_string()),
                    );
                    modified = true;
                }
            }

            if modified && let Ok(modified) = serde_json::to_string(&map) {
                let output = if json_str.ends_with('\n') {
                    format!("{modified}\n")
                } else {
                    modified
                };

                // Callers expect the length of what they handed in.
                return self.inner.write(output.as_bytes()).map(|_| buf.len());
            }
        }

        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Initializes tracing for the application.
///
/// Production environments log JSON to rotating files, development pretty prints to the console.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    init_tracing_with_top_level_fields(app_name, None, None)
}

/// Like [`init_tracing`] but attaches `cluster_id` and `migration_id` to every production log
/// line.
pub fn init_tracing_with_top_level_fields(
    app_name: &str,
    cluster_id: Option<String>,
    migration_id: Option<String>,
) -> Result<LogFlusher, TracingError> {
    let environment = Environment::load()?;

    init_tracing_for_environment(app_name, environment, cluster_id, migration_id)
}

fn init_tracing_for_environment(
    app_name: &str,
    environment: Environment,
    cluster_id: Option<String>,
    migration_id: Option<String>,
) -> Result<LogFlusher, TracingError> {
    if let Some(cluster_id) = cluster_id {
        set_global_cluster_id(cluster_id);
    }
    if let Some(migration_id) = migration_id {
        set_global_migration_id(migration_id);
    }

    // Forward records of crates logging through `log`.
    LogTracer::init()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_flusher = if environment.is_prod() {
        configure_prod_tracing(filter, app_name)?
    } else {
        configure_dev_tracing(filter)?
    };

    set_tracing_panic_hook();

    // Dropping the flusher early loses buffered log lines.
    Ok(log_flusher)
}

fn configure_prod_tracing(filter: EnvFilter, app_name: &str) -> Result<LogFlusher, TracingError> {
    let file_appender = rolling::Builder::new()
        .filename_prefix(app_name)
        .filename_suffix("log")
        .rotation(rolling::Rotation::DAILY)
        .max_log_files(5)
        .build("logs")?;

    let (file_appender, guard) = tracing_appender::non_blocking(file_appender);

    let format = fmt::format()
        .with_level(true)
        .with_ansi(false)
        .with_target(false);

    let subscriber = Registry::default().with(filter).with(
        fmt::layer()
            .event_format(format)
            .with_writer(move || TopLevelFieldsWriter::new(file_appender.make_writer()))
            .json()
            .with_current_span(true)
            .with_span_list(true),
    );

    set_global_default(subscriber)?;

    Ok(LogFlusher::Flusher(guard))
}

fn configure_dev_tracing(filter: EnvFilter) -> Result<LogFlusher, TracingError> {
    let format = fmt::format()
        .with_level(true)
        .with_ansi(true)
        .pretty()
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    let subscriber = FmtSubscriber::builder()
        .event_format(format)
        .with_env_filter(filter)
        .finish();

    set_global_default(subscriber)?;

    Ok(LogFlusher::NullFlusher)
}

fn set_tracing_panic_hook() {
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        panic_hook(info);
        prev_hook(info);
    }));
}

/// Logs panics as structured events so they end up in the log files next to everything else.
fn panic_hook(panic_info: &PanicHookInfo) {
    let backtrace = Backtrace::capture();
    let (backtrace, note) = match backtrace.status() {
        BacktraceStatus::Captured => (Some(backtrace), None),
        BacktraceStatus::Disabled => (
            None,
            Some("run with RUST_BACKTRACE=1 to display backtraces"),
        ),
        BacktraceStatus::Unsupported => {
            (None, Some("backtraces are not supported on this platform"))
        }
        _ => (None, Some("backtrace status is unknown")),
    };

    let payload = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    };

    let location = panic_info.location().map(|location| location.to_string());

    tracing::error!(
        panic.payload = payload,
        payload.location = location,
        panic.backtrace = backtrace.map(display),
        panic.note = note,
        "a panic occurred",
    );
}
