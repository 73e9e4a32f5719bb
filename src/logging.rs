//! Logging setup.
//!
//! The library logs through the [`log`] facade. When `NETRESOLVE_VERBOSE`
//! is set in the environment, a minimal stderr logger is installed at debug
//! level so the library is observable without any embedder setup. An
//! embedder that already installed a logger wins; the installation attempt
//! is silently skipped.

use std::sync::Once;

struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::Level::Debug
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            eprintln!("netresolve: {}", record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;
static INIT: Once = Once::new();

pub(crate) fn env_bool(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    Some(matches!(
        value.to_ascii_lowercase().as_str(),
        "yes" | "true" | "1"
    ))
}

/// Installs the stderr logger if `NETRESOLVE_VERBOSE` asks for it.
pub(crate) fn init_from_env() {
    if env_bool("NETRESOLVE_VERBOSE") != Some(true) {
        return;
    }
    INIT.call_once(|| {
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(log::LevelFilter::Debug);
        }
    });
}
