//! Log output of a peer: tracing events to stderr, stamped with local time.

use std::fmt;

use clap::ValueEnum;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{Layer, Registry};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(val: LogLevel) -> Self {
        match val {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

/// Wall clock of the host, without timezone suffix.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write!(w, "{}", chrono::Local::now().naive_local())
    }
}

fn set_panic_hook() {
    std::panic::set_hook(Box::new(|panic| {
        tracing::error!("{}", panic);
    }));
}

/// Install the global subscriber. Calling it twice keeps the first one.
pub fn init_logging(level: LogLevel) {
    set_panic_hook();

    let level_filter = LevelFilter::from_level(level.into());
    let subscriber = Registry::default().with(
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_timer(LocalTimer)
            .with_filter(level_filter),
    );

    // a subscriber set earlier (e.g. by a test harness) wins
    let _ = tracing::subscriber::set_global_default(subscriber);
}
