use chrono::Local;
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError, set_logger, set_max_level};

/// Installs [`Logger`] as the global logger.
///
/// Fails when a logger is already installed.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    set_logger(&Logger)?;
    set_max_level(level);
    Ok(())
}

#[derive(Copy, Clone, Debug)]
pub struct Logger;

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let now = Local::now().format("%Y-%m-%d %H:%M:%S");

        let level = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };

        eprintln!(
            "[{}] [{}:{}] [{}] {}",
            now,
            record.file().unwrap_or("???"),
            record.line().unwrap_or(0),
            level,
            record.args()
        );
    }

    fn flush(&self) {}
}
