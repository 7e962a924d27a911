use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Append-only text log of descriptions, one `<timestamp>: <text>` per line.
///
/// The file is opened in append mode and never truncated, so lines from
/// earlier runs are kept in order.
pub struct DescriptionLog {
    file: File,
    path: PathBuf,
    appended: u64,
}

impl DescriptionLog {
    pub async fn open(path: &Path) -> Result<Self, JournalError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| JournalError::Open(path.display().to_string(), e))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            appended: 0,
        })
    }

    /// Append one record stamped with the current local time.
    pub async fn append(&mut self, description: &str) -> Result<(), JournalError> {
        self.append_at(Local::now(), description).await
    }

    pub async fn append_at(
        &mut self,
        at: DateTime<Local>,
        description: &str,
    ) -> Result<(), JournalError> {
        let line = format_record(at, description);
        self.file
            .write_all(line.as_bytes())
            .await
            .map_err(|e| JournalError::Write(self.path.display().to_string(), e))?;
        self.file
            .flush()
            .await
            .map_err(|e| JournalError::Write(self.path.display().to_string(), e))?;
        self.appended += 1;
        debug!(
            path = self.path.display().to_string(),
            appended = self.appended,
            "description logged"
        );
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Render one log line, newline-terminated. Runs of whitespace inside the
/// description, line breaks included, are folded into single spaces.
pub fn format_record(at: DateTime<Local>, description: &str) -> String {
    let text = description.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("{}: {}\n", at.format(TIMESTAMP_FORMAT), text)
}

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("failed to open log file {0}: {1}")]
    Open(String, std::io::Error),
    #[error("failed to write log file {0}: {1}")]
    Write(String, std::io::Error),
}
