//! Process-wide colored logger. Warnings and errors go to stderr, the rest
//! to stdout, each line prefixed with a padded, colored level name.

use colored::Colorize;
use log::{Level, LevelFilter, Log, Metadata, Record};

struct ColorLogger;

static LOGGER: ColorLogger = ColorLogger;

impl Log for ColorLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let name = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARNING",
            Level::Info => "INFO",
            Level::Debug | Level::Trace => "DEBUG",
        };
        let padding = " ".repeat(8usize.saturating_sub(name.len()));
        let colored_name = match record.level() {
            Level::Error => name.bright_red().bold(),
            Level::Warn => name.yellow().bold(),
            Level::Info => name.green(),
            Level::Debug | Level::Trace => name.cyan(),
        };
        let line = format!("{colored_name}:{padding} {}", record.args());
        if record.level() <= Level::Warn {
            eprintln!("{line}");
        } else {
            println!("{line}");
        }
    }

    fn flush(&self) {}
}

pub fn init() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Info);
    }
}
