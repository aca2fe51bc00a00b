//! Log output for merge runs.
//!
//! Diagnostics go to stderr and to a file under the configured log
//! directory; stdout stays free for merge results. Run summaries use their
//! own target, [`REPORT_TARGET`], so they can be kept or filtered apart
//! from engine chatter.

use std::fmt::Display;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogRotation, LoggingSettings};

/// Target of the one-line summary logged at the end of every run.
pub const REPORT_TARGET: &str = "treemerge::report";

/// Installs the global subscriber. The returned guard flushes the file
/// writer on drop and has to live as long as the process logs.
pub fn init_logging(settings: &LoggingSettings) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all(&settings.dir)?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender(settings));

    // Run summaries stay visible even when the default level is raised.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},{REPORT_TARGET}=info", settings.level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(guard)
}

fn appender(settings: &LoggingSettings) -> RollingFileAppender {
    let (dir, file) = (&settings.dir, &settings.file);
    match settings.rotation {
        LogRotation::Never => rolling::never(dir, file),
        LogRotation::Daily => rolling::daily(dir, file),
        LogRotation::Hourly => rolling::hourly(dir, file),
    }
}

/// Logs the summary of a finished run under [`REPORT_TARGET`].
pub fn log_report(
    run_id: impl Display,
    command: &str,
    scenarios: usize,
    conflicts: usize,
    failures: usize,
) {
    if failures > 0 {
        tracing::warn!(
            target: REPORT_TARGET,
            %run_id,
            command,
            scenarios,
            conflicts,
            failures,
            "merge run finished with failures"
        );
    } else {
        tracing::info!(
            target: REPORT_TARGET,
            %run_id,
            command,
            scenarios,
            conflicts,
            "merge run finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn settings(dir: &std::path::Path, rotation: LogRotation) -> LoggingSettings {
        LoggingSettings {
            dir: dir.to_path_buf(),
            rotation,
            ..Default::default()
        }
    }

    fn log_files(dir: &std::path::Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_appender_names_files_after_settings() {
        for rotation in [LogRotation::Never, LogRotation::Daily, LogRotation::Hourly] {
            let dir = tempfile::tempdir().unwrap();
            let mut writer = appender(&settings(dir.path(), rotation));
            writer.write_all(b"line\n").unwrap();
            writer.flush().unwrap();

            let files = log_files(dir.path());
            assert_eq!(files.len(), 1, "{rotation:?}: {files:?}");
            assert!(files[0].starts_with("treemerge.log"), "{files:?}");
        }
    }

    #[test]
    fn test_report_uses_report_target() {
        let dir = tempfile::tempdir().unwrap();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(appender(&settings(dir.path(), LogRotation::Never)))
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            log_report("run-1", "batch", 3, 2, 1);
        });

        let content = std::fs::read_to_string(dir.path().join("treemerge.log")).unwrap();
        assert!(content.contains(REPORT_TARGET), "{content}");
        assert!(content.contains("run_id=run-1"), "{content}");
        assert!(content.contains("conflicts=2"), "{content}");
        assert!(content.contains("failures=1"), "{content}");
    }
}
