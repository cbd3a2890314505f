// Date-rotated log file plus a fan-out writer.
// The active file is `<path>-YYYYMMDD`; `<path>` itself is kept as a symlink to
// it. Files whose date suffix falls outside the retention window are removed
// whenever a new file is opened.

use chrono::{Local, NaiveDate};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DATE_SUFFIX_FORMAT: &str = "%Y%m%d";
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Error, Debug)]
pub enum WriterError {
    #[error("invalid log path: {path:?}")]
    InvalidPath { path: PathBuf },
    #[error("failed to open log file {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub struct RotatingFile {
    link: PathBuf,
    directory: PathBuf,
    base_name: String,
    max_age: Duration,
    current_date: NaiveDate,
    file: File,
}

impl RotatingFile {
    pub fn new(path: impl AsRef<Path>, max_age: Duration) -> Result<Self, WriterError> {
        let link = std::path::absolute(path.as_ref()).map_err(|_| WriterError::InvalidPath {
            path: path.as_ref().to_path_buf(),
        })?;
        let directory = link
            .parent()
            .ok_or_else(|| WriterError::InvalidPath { path: link.clone() })?
            .to_path_buf();
        let base_name = link
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| WriterError::InvalidPath { path: link.clone() })?;

        let today = Local::now().date_naive();
        let file = Self::open_for(&directory, &base_name, today)?;

        let writer = Self {
            link,
            directory,
            base_name,
            max_age,
            current_date: today,
            file,
        };
        writer.refresh_link();
        writer.purge_expired(today);

        Ok(writer)
    }

    /// Path of the file currently written to.
    pub fn current_path(&self) -> PathBuf {
        self.dated_path(self.current_date)
    }

    pub fn link_path(&self) -> &Path {
        &self.link
    }

    fn dated_path(&self, date: NaiveDate) -> PathBuf {
        Self::path_for(&self.directory, &self.base_name, date)
    }

    fn path_for(directory: &Path, base_name: &str, date: NaiveDate) -> PathBuf {
        directory.join(format!("{base_name}-{}", date.format(DATE_SUFFIX_FORMAT)))
    }

    fn open_for(directory: &Path, base_name: &str, date: NaiveDate) -> Result<File, WriterError> {
        let path = Self::path_for(directory, base_name, date);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| WriterError::Open { path, source })
    }

    fn rotate_if_needed(&mut self) -> io::Result<()> {
        let today = Local::now().date_naive();
        if today == self.current_date {
            return Ok(());
        }

        self.file.flush()?;
        self.file = Self::open_for(&self.directory, &self.base_name, today)
            .map_err(|e| io::Error::other(e.to_string()))?;
        self.current_date = today;
        self.refresh_link();
        self.purge_expired(today);
        Ok(())
    }

    #[cfg(unix)]
    fn refresh_link(&self) {
        match fs::symlink_metadata(&self.link) {
            Ok(meta) if meta.file_type().is_symlink() => {
                if let Err(e) = fs::remove_file(&self.link) {
                    eprintln!("failed to remove stale log link {:?}: {e}", self.link);
                    return;
                }
            }
            Ok(_) => {
                eprintln!("log link {:?} exists and is not a symlink, leaving it", self.link);
                return;
            }
            Err(_) => {}
        }
        if let Err(e) = std::os::unix::fs::symlink(self.current_path(), &self.link) {
            eprintln!("failed to link {:?}: {e}", self.link);
        }
    }

    #[cfg(not(unix))]
    fn refresh_link(&self) {}

    /// Deletes rotated files whose date suffix is older than `max_age`.
    fn purge_expired(&self, today: NaiveDate) {
        let max_age_days = (self.max_age.as_secs() / 86_400) as i64;
        let Some(cutoff) = today.checked_sub_signed(chrono::Duration::days(max_age_days)) else {
            return;
        };

        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(e) => {
                eprintln!("failed to scan log directory {:?}: {e}", self.directory);
                return;
            }
        };

        let prefix = format!("{}-", self.base_name);
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(suffix) = name.strip_prefix(&prefix) else {
                continue;
            };
            let Ok(date) = NaiveDate::parse_from_str(suffix, DATE_SUFFIX_FORMAT) else {
                continue;
            };
            if date < cutoff {
                if let Err(e) = fs::remove_file(entry.path()) {
                    eprintln!("failed to remove expired log {:?}: {e}", entry.path());
                }
            }
        }
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.rotate_if_needed()?;
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Writes every buffer to each destination in order. The first failing
/// destination aborts the write.
#[derive(Default)]
pub struct MultiWriter {
    writers: Vec<Box<dyn Write + Send>>,
}

impl MultiWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, writer: impl Write + Send + 'static) -> Self {
        self.writers.push(Box::new(writer));
        self
    }

    pub fn len(&self) -> usize {
        self.writers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writers.is_empty()
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for writer in &mut self.writers {
            writer.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        for writer in &mut self.writers {
            writer.flush()?;
        }
        Ok(())
    }
}
