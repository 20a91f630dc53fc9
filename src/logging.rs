use std::path::Path;

use crate::config;

const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024; // 10 MB
const LOG_FILE: &str = "iron-mode.log";

fn rotate_file(path: &Path) {
    if let Ok(meta) = std::fs::metadata(path) {
        if meta.len() >= MAX_LOG_SIZE {
            let old = path.with_extension("old");
            let _ = std::fs::rename(path, old);
        }
    }
}

/// Log to stderr and `iron-mode.log` beside the executable.
pub fn setup_logging(level: log::LevelFilter) -> Result<(), log::SetLoggerError> {
    setup_logging_in(&config::config_dir(), level)
}

/// Same as [`setup_logging`] with the log file placed in `dir`.
pub fn setup_logging_in(dir: &Path, level: log::LevelFilter) -> Result<(), log::SetLoggerError> {
    let log_path = dir.join(LOG_FILE);
    rotate_file(&log_path);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path);

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339_millis(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        // The HTTP stack logs every connection at debug.
        .level_for("hyper", log::LevelFilter::Warn)
        .level_for("hyper_util", log::LevelFilter::Warn)
        .level_for("reqwest", log::LevelFilter::Warn)
        .chain(std::io::stderr());

    if let Ok(file) = log_file {
        dispatch = dispatch.chain(file);
    } else {
        eprintln!("Warning: could not open log file {}", log_path.display());
    }

    dispatch.apply()
}
