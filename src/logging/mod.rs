//! The structured logger (C8): level-filtered, column-separated records with
//! a reentrant filter chain.
//!
//! Grounded on `tlstesttool`'s `Tooling::Logger` (`logging/Logger.h`/`.cpp`):
//! a singleton that formats `timestamp SEP level SEP origin SEP message` and
//! then runs a chain of `LogFilter`s over every accepted record, guarding
//! against a filter's own log call re-entering the filter chain with a
//! `processingFilters` flag. This rendition keeps `log4rs` as the sink that
//! does the timestamping, levelling, and formatting, and adds the filter
//! chain as a thin wrapper around it -- `log4rs`'s own `Filter` trait can
//! only accept/neutralize/reject a record, it cannot emit new ones, so the
//! reentrant-filter behaviour is built here instead of inside `log4rs`'s
//! config.

use std::sync::atomic::{AtomicBool, Ordering};

use log::{Level, LevelFilter, Log, Metadata, Record};
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

use crate::config::LogLevel;
use crate::error::Error;

/// Maps the four-level `LogLevel` onto `log`'s five levels so that the
/// original's verbosity ordering survives the facade's fixed vocabulary.
///
/// The original filters by `(HIGH - recordLevel) < configuredLevel`: a HIGH
/// record (the common case -- most `logger.log` call sites in the original
/// pass HIGH) shows at almost any non-OFF verbosity, while a LOW record (the
/// rare, highly detailed case) only shows at the most verbose setting. `log`
/// levels work the same way once HIGH/MEDIUM/LOW are mapped onto
/// Info/Debug/Trace: a `LevelFilter::Info` threshold lets `info!` through
/// but not `debug!`/`trace!`, exactly mirroring "HIGH shows, LOW doesn't"
/// at the least verbose non-OFF setting.
pub fn level_filter(level: LogLevel) -> LevelFilter {
    match level {
        LogLevel::Off => LevelFilter::Off,
        LogLevel::Low => LevelFilter::Info,
        LogLevel::Medium => LevelFilter::Debug,
        LogLevel::High => LevelFilter::Trace,
    }
}

/// Wraps a `log4rs` logger (which does the actual formatting/writing) with
/// the reentrant regex filter chain from §4.7.
struct StructuredLogger {
    inner: log4rs::Logger,
    filter: Option<regex::Regex>,
    processing: AtomicBool,
}

impl Log for StructuredLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        self.inner.log(record);
        let Some(filter) = &self.filter else { return };
        if !self.inner.enabled(record.metadata()) {
            return;
        }
        // Mirrors `processingFilters`: a filter's own log call must not
        // re-enter this branch, or a message that keeps matching would
        // recurse until the stack overflows.
        if self.processing.swap(true, Ordering::SeqCst) {
            return;
        }
        let message = record.args().to_string();
        if filter.is_match(&message) {
            log::log!(target: "Tool", Level::Info, "Matched message: {}", message);
        }
        self.processing.store(false, Ordering::SeqCst);
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Installs the process-wide logger per the configured level, column
/// separator, and optional filter-chain regex. Mirrors the original main's
/// one-time `Logger::getInstance().configure(...)` call.
pub fn init(
    level: LogLevel,
    column_separator: &str,
    filter_regex: Option<&str>,
) -> Result<(), Error> {
    let level_filter = level_filter(level);
    let pattern = format!(
        "{{d(%Y-%m-%dT%H:%M:%S%.3f)(utc)}}{sep}{{l}}{sep}{{t}}({{f}}:{{L}}){sep}{{m}}{{n}}",
        sep = column_separator,
    );
    let encoder = Box::new(PatternEncoder::new(&pattern));
    let appender = ConsoleAppender::builder().encoder(encoder).build();
    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(appender)))
        .build(Root::builder().appender("stdout").build(level_filter))
        .map_err(|e| Error::config(format!("failed to build logger: {}", e)))?;

    let filter = match filter_regex {
        Some(pattern) => Some(regex::Regex::new(pattern)?),
        None => None,
    };

    let logger = StructuredLogger {
        inner: log4rs::Logger::new(config),
        filter,
        processing: AtomicBool::new(false),
    };

    log::set_max_level(level_filter);
    log::set_boxed_logger(Box::new(logger))
        .map_err(|e| Error::config(format!("logger already initialized: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_mapping_preserves_ordering() {
        assert_eq!(level_filter(LogLevel::Off), LevelFilter::Off);
        assert_eq!(level_filter(LogLevel::Low), LevelFilter::Info);
        assert_eq!(level_filter(LogLevel::Medium), LevelFilter::Debug);
        assert_eq!(level_filter(LogLevel::High), LevelFilter::Trace);
    }
}
