use std::{
    io,
    path::Path,
    time::{Duration, SystemTime},
};

use tracing_subscriber::{
    fmt::{self, time::UtcTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::cli::ColorChoice;

/// Log files older than this are deleted on startup.
const MAX_LOG_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub struct LogGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

pub fn init_logging(
    verbosity: u8,
    color: ColorChoice,
    debug_mode: bool,
    log_dir: Option<&Path>,
    command_name: &str,
) -> LogGuard {
    tracing_log::LogTracer::init().expect("Failed to set log tracer");

    let console_filter = match (verbosity, debug_mode) {
        (0, false) => "info",
        (0, true) | (1, _) => "info,libazul=debug",
        (2, _) => "info,libazul=trace",
        _ => "trace",
    };

    let console_env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(console_filter));

    let console_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(color.use_ansi())
        .without_time()
        .with_target(false)
        .with_thread_names(false)
        .with_level(true)
        .with_filter(console_env_filter);

    let mut file_guard: Option<tracing_appender::non_blocking::WorkerGuard> = None;

    let file_layer = if let Some(dir) = log_dir {
        match std::fs::create_dir_all(dir) {
            Ok(()) => {
                remove_stale_logs(dir);

                match tracing_appender::rolling::Builder::new()
                    .rotation(tracing_appender::rolling::Rotation::DAILY)
                    .filename_prefix(command_name)
                    .filename_suffix("log")
                    .build(dir)
                {
                    Ok(file_appender) => {
                        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                        file_guard = Some(guard);

                        let layer = fmt::layer()
                            .with_writer(non_blocking)
                            .with_ansi(false)
                            .with_timer(UtcTime::rfc_3339())
                            .with_target(true)
                            .with_thread_names(true)
                            .with_level(true)
                            .with_filter(EnvFilter::new("debug"));

                        Some(layer)
                    }
                    Err(e) => {
                        eprintln!("Warning: could not create log file appender: {e}");
                        None
                    }
                }
            }
            Err(e) => {
                eprintln!(
                    "Warning: could not create log directory {}: {e}",
                    dir.display()
                );
                None
            }
        }
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    LogGuard {
        _file_guard: file_guard,
    }
}

/// Deletes `.log` files in `log_dir` past the retention window.
fn remove_stale_logs(log_dir: &Path) {
    let entries = match std::fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };

    let now = SystemTime::now();

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("log") {
            continue;
        }

        let modified = match entry.metadata().and_then(|meta| meta.modified()) {
            Ok(modified) => modified,
            Err(_) => continue,
        };

        if now
            .duration_since(modified)
            .map(|age| age > MAX_LOG_AGE)
            .unwrap_or(false)
        {
            let _ = std::fs::remove_file(&path);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn remove_stale_logs_keeps_fresh_files() {
        let dir = tempfile::tempdir().unwrap();
        let fresh = dir.path().join("azul-serve.today.log");
        std::fs::write(&fresh, "fresh").unwrap();

        remove_stale_logs(dir.path());

        assert!(fresh.exists());
    }

    #[test]
    fn remove_stale_logs_ignores_other_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let other = dir.path().join("notes.txt");
        std::fs::write(&other, "keep me").unwrap();

        remove_stale_logs(dir.path());

        assert!(other.exists());
    }
}
