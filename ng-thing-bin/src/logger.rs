use anyhow::{anyhow, Result};
use std::{
    path::Path,
    str::FromStr,
    sync::{Arc, RwLock},
};
use tracing::{subscriber::set_global_default, Level};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{filter::DynFilterFn, fmt, layer::SubscriberExt, Layer, Registry};

const LOG_FILE_PREFIX: &str = "ng-thing.log";

/// Console + daily rolling file logger sharing one adjustable level.
pub struct Logger {
    level: Arc<RwLock<Level>>,
    _file_guard: Option<WorkerGuard>,
}

impl Logger {
    pub fn new(level: Level) -> Self {
        Logger {
            level: Arc::new(RwLock::new(level)),
            _file_guard: None,
        }
    }

    /// Parse `info`, `debug`, ... falling back to `INFO`.
    pub fn parse_level(level: &str) -> Level {
        Level::from_str(level).unwrap_or(Level::INFO)
    }

    pub fn set_level(&self, new_level: Level) {
        if let Ok(mut level) = self.level.write() {
            *level = new_level;
        }
    }

    pub fn level(&self) -> Level {
        self.level.read().map(|l| *l).unwrap_or(Level::INFO)
    }

    /// Install the global subscriber, writing rolled files under `dir`.
    ///
    /// The returned guard must stay alive (it is kept inside `self`) or buffered
    /// file output is lost.
    pub fn initialize(&mut self, dir: impl AsRef<Path>) -> Result<()> {
        let file_appender = rolling::daily(dir, LOG_FILE_PREFIX);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        self._file_guard = Some(guard);

        let console_filter = {
            let level = Arc::clone(&self.level);
            DynFilterFn::new(move |metadata, _| enabled(&level, metadata.level()))
        };
        let file_filter = {
            let level = Arc::clone(&self.level);
            DynFilterFn::new(move |metadata, _| enabled(&level, metadata.level()))
        };

        let console_layer = {
            let layer = fmt::layer()
                .with_writer(std::io::stdout)
                .with_target(false);
            #[cfg(debug_assertions)]
            let layer = layer.with_file(true).with_line_number(true);
            layer.with_filter(console_filter)
        };

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_file(false)
            .with_line_number(false)
            .with_filter(file_filter);

        let subscriber = Registry::default().with(console_layer).with(file_layer);
        set_global_default(subscriber).map_err(|e| anyhow!("Failed to set logger: {e}"))?;
        Ok(())
    }
}

#[inline]
fn enabled(level: &RwLock<Level>, candidate: &Level) -> bool {
    level
        .read()
        .map(|current| candidate <= &*current)
        .unwrap_or(true)
}
