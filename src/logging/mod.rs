use log::{debug, error, info, trace, warn, LevelFilter};
use std::sync::{Once, OnceLock};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use tracing_log::LogTracer;

static INIT: Once = Once::new();

/// Keeps the non-blocking file writer flushing for the life of the process
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize logger from configuration: a level name plus an optional directory for a
/// daily rolling log file written alongside the console output.
///
/// `RUST_LOG`, when set, takes precedence over `level`.
pub fn init_logger_with_config(level: &str, file_dir: Option<&str>) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(normalize_level(level)));

        // stderr keeps stdout clean for the line-oriented `run` mode
        let console = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_level(true)
            .with_ansi(true);

        let file = file_dir.map(|dir| {
            let appender = tracing_appender::rolling::daily(dir, "accel-router.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
        });

        tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .with(file)
            .init();

        bridge_log_crate(parse_level_filter(level));
    });
}

/// Route `log` crate records into tracing (after the subscriber is set up)
fn bridge_log_crate(max_level: LevelFilter) {
    // already installed when tracing-subscriber carries its own log bridge
    let _ = LogTracer::init();
    log::set_max_level(max_level);
}

fn normalize_level(level: &str) -> String {
    match level.trim().to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "" => "info".to_string(),
        other => other.to_string(),
    }
}

fn parse_level_filter(level: &str) -> LevelFilter {
    normalize_level(level).parse().unwrap_or(LevelFilter::Info)
}

/// Log an error message
pub fn log_error(message: &str) {
    error!("{}", message);
}

/// Log an info message
pub fn log_info(message: &str) {
    info!("{}", message);
}

/// Log a warning message
pub fn log_warning(message: &str) {
    warn!("{}", message);
}

/// Log a debug message
pub fn log_debug(message: &str) {
    debug!("{}", message);
}

/// Log a trace message
pub fn log_trace(message: &str) {
    trace!("{}", message);
}

/// Convenience macro for logging errors
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::log_error(&format!($($arg)*));
    };
}

/// Convenience macro for logging info messages
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::log_info(&format!($($arg)*));
    };
}

/// Convenience macro for logging warning messages
#[macro_export]
macro_rules! log_warning {
    ($($arg:tt)*) => {
        $crate::logging::log_warning(&format!($($arg)*));
    };
}

/// Convenience macro for logging debug messages
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::log_debug(&format!($($arg)*));
    };
}

/// Convenience macro for logging trace messages
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {
        $crate::logging::log_trace(&format!($($arg)*));
    };
}
