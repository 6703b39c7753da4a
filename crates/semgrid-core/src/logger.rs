//! Logging setup for binaries and tests.
//!
//! Library code only uses the `log` macros. Executables pick a sink:
//! [`init_with_level`] installs a stderr logger, [`init_tracing`] (behind the
//! `tracing` feature) a `tracing-subscriber` pipeline that also receives
//! `log` records. Both apply the requested level to the `semgrid*` crates
//! only; decoder and other dependency chatter is capped at `warn`.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

const OWN_CRATES: [&str; 4] = ["semgrid", "semgrid_core", "semgrid_register", "semgrid_discover"];
const FOREIGN_CAP: LevelFilter = LevelFilter::Warn;

fn own_crate(target: &str) -> bool {
    let root = target.split("::").next().unwrap_or(target);
    OWN_CRATES.contains(&root)
}

/// Effective filter for records emitted under `target`.
fn target_filter(target: &str, level: LevelFilter) -> LevelFilter {
    if own_crate(target) {
        level
    } else {
        level.min(FOREIGN_CAP)
    }
}

/// Short origin label: `semgrid_discover::pyramid` becomes `discover/pyramid`.
fn origin(target: &str) -> String {
    if !own_crate(target) {
        return target.to_string();
    }
    let mut parts = target.split("::");
    let head = parts.next().unwrap_or(target);
    let head = head.strip_prefix("semgrid_").unwrap_or(head);
    std::iter::once(head)
        .chain(parts)
        .collect::<Vec<_>>()
        .join("/")
}

fn format_line(elapsed_s: f64, level: Level, target: &str, message: &str) -> String {
    format!("[{elapsed_s:8.3}s {level:>5} {}] {message}", origin(target))
}

struct StderrLogger {
    level: LevelFilter,
    started: Instant,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= target_filter(metadata.target(), self.level)
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(
            self.started.elapsed().as_secs_f64(),
            record.level(),
            record.target(),
            &record.args().to_string(),
        );
        let _ = writeln!(std::io::stderr(), "{line}");
    }

    fn flush(&self) {}
}

static LOGGER: OnceLock<StderrLogger> = OnceLock::new();

/// Install the stderr logger with the provided level filter.
///
/// Only the first call installs a logger; later calls are no-ops.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let logger = LOGGER.get_or_init(|| StderrLogger {
            level,
            started: Instant::now(),
        });
        log::set_logger(logger)?;
        log::set_max_level(level);
    }
    Ok(())
}

/// `EnvFilter` directives equivalent to the stderr logger's filtering.
#[cfg(feature = "tracing")]
fn default_directives(level: LevelFilter) -> String {
    let own = level.to_string().to_lowercase();
    let foreign = level.min(FOREIGN_CAP).to_string().to_lowercase();
    std::iter::once(foreign)
        .chain(OWN_CRATES.iter().map(|c| format!("{c}={own}")))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install a `tracing` subscriber.
///
/// `RUST_LOG` overrides `level` when set. `json = true` emits one flattened
/// JSON object per event, suitable for batch runs whose logs are collected
/// by other tools.
#[cfg(feature = "tracing")]
pub fn init_tracing(level: LevelFilter, json: bool) {
    let _ = tracing_log::LogTracer::init();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));
    if json {
        let _ = fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .json()
            .flatten_event(true)
            .finish()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init();
    }
}
