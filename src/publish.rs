//! Durable state files read by other processes
//!
//! `init.txt` holds the time the camera came up, `output.txt` the latest
//! accepted text. Both are replaced whole through a temp file and a rename in
//! the same directory, so a reader sees either the old or the new content.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::error::CaptureError;

pub const RESULT_FILE: &str = "output.txt";
pub const INIT_FILE: &str = "init.txt";

/// Format used for the heartbeat file
pub fn format_timestamp(time: &DateTime<Local>) -> String {
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Single writer of the published state
#[derive(Debug)]
pub struct StatePublisher {
    data_dir: PathBuf,
    initialized: bool,
}

impl StatePublisher {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            initialized: false,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn result_path(&self) -> PathBuf {
        self.data_dir.join(RESULT_FILE)
    }

    pub fn init_path(&self) -> PathBuf {
        self.data_dir.join(INIT_FILE)
    }

    /// Create the data directory if needed
    pub fn ensure_dir(&self) -> Result<(), CaptureError> {
        std::fs::create_dir_all(&self.data_dir).map_err(|source| CaptureError::Publish {
            path: self.data_dir.clone(),
            source,
        })
    }

    /// Remove state left over from a previous run
    ///
    /// Missing files are fine. Both removals are attempted; the first failure
    /// is returned.
    pub fn init_publish(&self) -> Result<(), CaptureError> {
        let results = [self.result_path(), self.init_path()].map(|path| remove_if_exists(&path));
        results.into_iter().collect()
    }

    /// Write the heartbeat timestamp; only the first call per run writes
    pub fn mark_initialized(&mut self, time: &DateTime<Local>) -> Result<(), CaptureError> {
        if self.initialized {
            log::warn!("Heartbeat already written for this run, ignoring");
            return Ok(());
        }
        write_atomic(&self.init_path(), &format_timestamp(time))?;
        self.initialized = true;
        Ok(())
    }

    /// Replace the result file with `text`
    pub fn publish(&self, text: &str) -> Result<(), CaptureError> {
        write_atomic(&self.result_path(), text)
    }

    /// Current published text, if any
    pub fn read_result(&self) -> Option<String> {
        std::fs::read_to_string(self.result_path()).ok()
    }
}

fn remove_if_exists(path: &Path) -> Result<(), CaptureError> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            log::debug!("Removed stale {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(CaptureError::Publish {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Write `contents` to a temp file next to `path` and rename it into place
fn write_atomic(path: &Path, contents: &str) -> Result<(), CaptureError> {
    let publish_err = |source: std::io::Error| CaptureError::Publish {
        path: path.to_path_buf(),
        source,
    };
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut file = tempfile::Builder::new()
        .prefix(".roicap-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(publish_err)?;
    file.write_all(contents.as_bytes()).map_err(publish_err)?;
    file.as_file().sync_all().map_err(publish_err)?;
    // Dropping the temp file on any error above removes it
    file.persist(path).map_err(|e| publish_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDateTime, TimeZone};

    fn publisher() -> (tempfile::TempDir, StatePublisher) {
        let dir = tempfile::tempdir().unwrap();
        let publisher = StatePublisher::new(dir.path().join("data"));
        publisher.ensure_dir().unwrap();
        (dir, publisher)
    }

    #[test]
    fn test_init_publish_removes_stale_files() {
        let (_dir, publisher) = publisher();
        std::fs::write(publisher.result_path(), "old").unwrap();
        std::fs::write(publisher.init_path(), "2020-01-01 00:00:00").unwrap();

        publisher.init_publish().unwrap();
        assert!(!publisher.result_path().exists());
        assert!(!publisher.init_path().exists());

        // Nothing left to delete is not an error
        publisher.init_publish().unwrap();
    }

    #[test]
    fn test_mark_initialized_writes_once() {
        let (_dir, mut publisher) = publisher();
        let first = Local.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        let second = Local.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

        publisher.mark_initialized(&first).unwrap();
        publisher.mark_initialized(&second).unwrap();

        let written = std::fs::read_to_string(publisher.init_path()).unwrap();
        assert_eq!(written, "2024-03-05 07:08:09");
        assert!(NaiveDateTime::parse_from_str(&written, "%Y-%m-%d %H:%M:%S").is_ok());
    }

    #[test]
    fn test_publish_overwrites_whole_file() {
        let (_dir, publisher) = publisher();
        publisher.publish("AB12345").unwrap();
        publisher.publish("AB1").unwrap();
        assert_eq!(publisher.read_result().as_deref(), Some("AB1"));

        // No temp files left behind
        let leftovers: Vec<_> = std::fs::read_dir(publisher.data_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_publish_into_missing_dir_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = StatePublisher::new(dir.path().join("missing"));
        let err = publisher.publish("AB12").unwrap_err();
        assert!(matches!(err, CaptureError::Publish { .. }));
    }
}
