// Logging module
// Console + optional rolling file output on top of the tracing ecosystem
//
// Numeric levels from the command line follow the classic tool convention:
// 0=Minimum, 1=Error, 2=Detail, 3=Full/Debug, 4=Trace

use std::path::Path;

use tracing::warn;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Map a numeric console level to a tracing filter directive
pub fn map_log_level(level: i32) -> &'static str {
    match level {
        i32::MIN..=0 => "warn",
        1 => "error",
        2 => "info",
        3 => "debug",
        _ => "trace",
    }
}

/// Initialize the logging system.
///
/// `RUST_LOG` takes precedence over `log_level`. When `log_dir` is given a
/// second, non-ANSI layer writes to a daily-rolling `file_name` in it.
pub fn initialize_logging(log_dir: Option<&Path>, log_level: &str, file_name: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    let console = fmt::layer()
        .with_ansi(true)
        .with_target(false)
        .with_thread_ids(false);

    match log_dir {
        Some(dir) => {
            let dir_error = std::fs::create_dir_all(dir).err();

            let file_appender = rolling::daily(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            // The guard flushes on drop; it has to live as long as the process.
            std::mem::forget(guard);

            let result = tracing_subscriber::registry()
                .with(env_filter)
                .with(console)
                .with(
                    fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true)
                        .with_thread_ids(true),
                )
                .try_init();
            if let Err(e) = result {
                warn!("Logging already initialized: {}", e);
            }
            if let Some(e) = dir_error {
                warn!("Could not create log directory {}: {}", dir.display(), e);
            }
        }
        None => {
            let result = tracing_subscriber::registry()
                .with(env_filter)
                .with(console)
                .try_init();
            if let Err(e) = result {
                warn!("Logging already initialized: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_log_level() {
        assert_eq!(map_log_level(-3), "warn");
        assert_eq!(map_log_level(0), "warn");
        assert_eq!(map_log_level(1), "error");
        assert_eq!(map_log_level(2), "info");
        assert_eq!(map_log_level(3), "debug");
        assert_eq!(map_log_level(4), "trace");
        assert_eq!(map_log_level(99), "trace");
    }

    #[test]
    fn test_repeated_initialization_creates_log_dir() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("logs");

        initialize_logging(None, "info", "navgen.log");
        initialize_logging(Some(&dir), "info", "navgen.log");
        assert!(dir.is_dir());
    }
}
