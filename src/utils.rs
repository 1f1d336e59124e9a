use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use log::{LevelFilter, Record};
use std::fs::OpenOptions;
use std::io::Write;

/// Current time as epoch milliseconds, used for enqueue timestamps
pub fn epoch_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Minimal logger that writes either to a file or to stdout.
/// Kept deliberately simple; UI hosts embedding this crate usually
/// install their own logger instead.
pub struct FileLogger {
    log_file: Option<std::fs::File>,
}

impl FileLogger {
    pub fn new(log_file_path: Option<&str>) -> Result<Self> {
        let log_file = if let Some(path) = log_file_path {
            Some(OpenOptions::new().create(true).append(true).open(path)?)
        } else {
            None
        };

        Ok(FileLogger { log_file })
    }
}

impl log::Log for FileLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now: DateTime<Local> = Local::now();
            let log_message = format!(
                "[{}] {} [{}:{}] {}\n",
                now.format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            );

            if let Some(file) = &self.log_file {
                if let Ok(mut file) = file.try_clone() {
                    let _ = file.write_all(log_message.as_bytes());
                }
            } else {
                print!("{}", log_message);
            }
        }
    }

    fn flush(&self) {
        if let Some(file) = &self.log_file {
            if let Ok(mut file) = file.try_clone() {
                let _ = file.flush();
            }
        } else {
            let _ = std::io::stdout().flush();
        }
    }
}

/// Initialize logging for the client.
///
/// With a file path, log lines go to that file; without one, env_logger
/// takes over so RUST_LOG works as usual.
pub fn setup_logging(log_file: Option<&str>, level: LevelFilter) -> Result<()> {
    match log_file {
        Some(path) => {
            let logger = FileLogger::new(Some(path))?;
            log::set_boxed_logger(Box::new(logger)).map(|()| log::set_max_level(level))?;
        }
        None => {
            env_logger::Builder::new().filter_level(level).try_init()?;
        }
    }

    log::info!(
        "{} v{} logging initialized at level {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        level
    );
    Ok(())
}
