//! Human-facing logging, distinct from the observation sink (`crate::sink`)
//! that writes machine-readable `RequestRecord`s. This module configures
//! `tracing` the way an operator watching the proxy in a terminal expects:
//! a detailed console format and, optionally, a mirrored file under `logs/`.

use log::LevelFilter;
use std::fs;
use std::path::Path;
use std::sync::Once;
use tracing::{Event, Subscriber};
use tracing_appender::{non_blocking, rolling};
use tracing_log::LogTracer;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

static INIT: Once = Once::new();

/// Console formatter: level, timestamp, PID/TID, file:line, target, message.
pub struct DetailedFormatter;

impl<S, N> FormatEvent<S, N> for DetailedFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        write_prefix(&mut writer, event)?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// File formatter: identical shape to [`DetailedFormatter`] but without
/// relying on a terminal (no color codes either formatter emits, since
/// colorization of the *observation* stream is `sink::TerminalSink`'s job,
/// not this one's).
pub struct FileFormatter;

impl<S, N> FormatEvent<S, N> for FileFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        write_prefix(&mut writer, event)?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn write_prefix(writer: &mut Writer<'_>, event: &Event<'_>) -> std::fmt::Result {
    let now = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f UTC");
    let level = event.metadata().level();
    let pid = std::process::id();
    let tid = format!("{:?}", std::thread::current().id())
        .replace("ThreadId(", "")
        .replace(')', "");

    let file = event.metadata().file().unwrap_or("unknown");
    let file_name = Path::new(file)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown");
    let line = event.metadata().line().unwrap_or(0);
    let target = event.metadata().target().split("::").last().unwrap_or("unknown");

    write!(
        writer,
        "{} {} PID:{} TID:{} {}:{} {} ",
        level, now, pid, tid, file_name, line, target
    )
}

/// Process-id/thread-id prefix for messages that want it inline (CONNECT
/// handling logs each connection's PID alongside its stage, matching the
/// corpus's habit of tagging concurrent connection logs by process).
pub fn process_info() -> String {
    let pid = std::process::id();
    let tid = format!("{:?}", std::thread::current().id())
        .replace("ThreadId(", "")
        .replace(')', "");
    format!("PID:{} TID:{}", pid, tid)
}

fn ensure_logs_directory() -> std::io::Result<()> {
    let dir = Path::new("logs");
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Initialize the global `tracing` subscriber once. `enable_file_logging`
/// mirrors console output to `logs/proxy.log` via a non-blocking appender;
/// the appender's worker guard is intentionally leaked for the process's
/// lifetime rather than threaded back out for explicit shutdown.
pub fn init_logger_with_config(log_level: &str, enable_file_logging: bool) {
    INIT.call_once(|| {
        let level = log_level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info);
        log::set_max_level(level);

        let console_layer = tracing_subscriber::fmt::layer().event_format(DetailedFormatter);

        if enable_file_logging {
            if let Err(e) = ensure_logs_directory() {
                eprintln!("warning: failed to create logs directory: {}", e);
            }
            let file_appender = rolling::never("logs", "proxy.log");
            let (non_blocking_file, guard) = non_blocking(file_appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .event_format(FileFormatter)
                .with_writer(non_blocking_file);

            let subscriber = Registry::default()
                .with(EnvFilter::new(log_level))
                .with(console_layer)
                .with(file_layer);
            if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!("warning: failed to set global tracing subscriber: {}", e);
            }
            Box::leak(Box::new(guard));
        } else {
            let subscriber = Registry::default()
                .with(EnvFilter::new(log_level))
                .with(console_layer);
            if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!("warning: failed to set global tracing subscriber: {}", e);
            }
        }

        if let Err(e) = LogTracer::init() {
            eprintln!("warning: failed to bridge `log` into `tracing`: {}", e);
        }
    });
}

/// Log an error message.
pub fn log_error(message: &str) {
    tracing::error!("{}", message);
}

/// Log an info message.
pub fn log_info(message: &str) {
    tracing::info!("{}", message);
}

/// Log a warning message.
pub fn log_warning(message: &str) {
    tracing::warn!("{}", message);
}

/// Log a debug message.
pub fn log_debug(message: &str) {
    tracing::debug!("{}", message);
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::log_error(&format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::log_info(&format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_warning {
    ($($arg:tt)*) => {
        $crate::logging::log_warning(&format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::log_debug(&format!($($arg)*));
    };
}
