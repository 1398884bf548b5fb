//! # Logging Setup
//!
//! Builds the global slog logger and bridges the `log` facade into it so the
//! rest of the crate can use `log::debug!` and friends. The drain is selected
//! by cargo features: `termlog` (default) writes to the terminal, `syslog`
//! and `journald` route to the respective system facilities.

use slog::{Drain, Logger, o};
use slog_scope::GlobalLoggerGuard;

use super::app_config::AppConfig;
use super::error::{Error, Result};
use super::types::LogLevel;

/// Install the global logger and the stdlog bridge. The returned guard must
/// be kept alive for the duration of the program.
pub fn setup_logging() -> Result<GlobalLoggerGuard> {
    let level = AppConfig::get::<LogLevel>("log_level").unwrap_or_default();

    let logger = root_logger(level.into());
    let guard = slog_scope::set_global_logger(logger);
    slog_stdlog::init()
        .map_err(|e| Error::with_source("failed to initialize stdlog bridge", Box::new(e)))?;

    Ok(guard)
}

#[cfg(feature = "termlog")]
fn root_logger(level: slog::Level) -> Logger {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let drain = slog::LevelFilter::new(drain, level).fuse();

    Logger::root(drain, o!())
}

#[cfg(all(feature = "syslog", not(feature = "termlog")))]
fn root_logger(level: slog::Level) -> Logger {
    match slog_syslog::unix_3164(slog_syslog::Facility::LOG_USER) {
        Ok(drain) => {
            let drain = slog_async::Async::new(drain.fuse()).build().fuse();
            let drain = slog::LevelFilter::new(drain, level).fuse();
            Logger::root(drain, o!())
        }
        Err(_) => Logger::root(slog::Discard, o!()),
    }
}

#[cfg(all(
    feature = "journald",
    target_os = "linux",
    not(any(feature = "termlog", feature = "syslog"))
))]
fn root_logger(level: slog::Level) -> Logger {
    let drain = slog_journald::JournaldDrain.ignore_res();
    let drain = slog_async::Async::new(drain).build().fuse();
    let drain = slog::LevelFilter::new(drain, level).fuse();

    Logger::root(drain, o!())
}

#[cfg(not(any(
    feature = "termlog",
    feature = "syslog",
    all(feature = "journald", target_os = "linux")
)))]
fn root_logger(_level: slog::Level) -> Logger {
    Logger::root(slog::Discard, o!())
}
