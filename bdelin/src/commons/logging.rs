use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::Result;
use crate::geo_core::GeoCore;
use crate::settings::Settings;

/// Install the global `tracing` subscriber: console output when
/// `show_console_logging` is set, plus a plain-text log file in the temp
/// directory when `log_file_name` is set.
///
/// Returns the log file path. Calling it again once a subscriber is
/// installed leaves the existing one in place.
pub fn init_logging(settings: &Settings, verbose: bool) -> Result<Option<PathBuf>> {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let console = settings
        .show_console_logging
        .then(|| fmt::layer().with_target(false));

    let mut log_path = None;
    let file_layer = match settings.log_file_name.as_deref() {
        Some(name) => {
            let path = GeoCore::from_settings(settings).temp_file_path(name)?;
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            log_path = Some(path);
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    let _ = tracing_subscriber::registry()
        .with(level)
        .with(console)
        .with(file_layer)
        .try_init();
    Ok(log_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_creates_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            temp_data_path: dir.path().join("temp"),
            show_console_logging: false,
            ..Settings::default()
        };
        let path = init_logging(&settings, false).unwrap().unwrap();
        assert_eq!(path, dir.path().join("temp").join("bdelin.log"));
        assert!(path.is_file());
        // second call is a no-op
        assert!(init_logging(&settings, true).is_ok());
    }

    #[test]
    fn test_init_logging_without_file() {
        let settings = Settings {
            log_file_name: None,
            ..Settings::default()
        };
        assert_eq!(init_logging(&settings, false).unwrap(), None);
    }
}
