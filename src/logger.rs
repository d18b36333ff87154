// A minimal stderr logger for the `log` crate. Levels are filtered by the
// `log` crate's global max level, which `main` sets from `RECUR_LOG`.

use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
};

use log::Log;

use crate::style::Theme;

/// Logs every record it receives to stderr.
#[derive(Debug)]
pub struct Logger(());

impl Logger {
    /// Create a new logger and install it as the global logger.
    pub fn init() -> Result<&'static Logger, log::SetLoggerError> {
        static LOGGER: Logger = Logger(());
        log::set_logger(&LOGGER)?;
        Ok(&LOGGER)
    }
}

impl Log for Logger {
    fn enabled(&self, _: &log::Metadata<'_>) -> bool {
        // Filtering happens via `log::set_max_level`.
        true
    }

    fn log(&self, record: &log::Record<'_>) {
        // Recurrences have no time zone, and neither does this. Logging in
        // UTC also means never reading the system time zone from in here.
        let now = jiff::Timestamp::now();
        let theme = Theme::stderr();
        let (now, level) = (theme.highlight(now), theme.level(record.level()));
        match (record.file(), record.line()) {
            (Some(file), Some(line)) => {
                eprintln!(
                    "{}|{}|{}:{}: {}",
                    now,
                    level,
                    relative(file),
                    line,
                    record.args()
                );
            }
            (Some(file), None) => {
                eprintln!(
                    "{}|{}|{}: {}",
                    now,
                    level,
                    relative(file),
                    record.args()
                );
            }
            _ => {
                eprintln!("{}|{}: {}", now, level, record.args());
            }
        }
    }

    fn flush(&self) {
        // `eprintln!` flushes on every call.
    }
}

fn relative<'p>(path: &'p str) -> &'p str {
    let Some(cwd) = cwd() else { return path };
    let Ok(relative) = Path::new(path).strip_prefix(cwd) else { return path };
    let Some(relative) = relative.to_str() else { return path };
    relative
}

fn cwd() -> Option<&'static Path> {
    static CWD: LazyLock<Option<PathBuf>> =
        LazyLock::new(|| std::env::current_dir().ok());
    CWD.as_deref()
}
