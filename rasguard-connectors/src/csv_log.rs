//! Append-only CSV cycle log with a backup copy
//!
//! One row per cycle, columns in configured sensor order:
//!
//! ```text
//! date,time,temperature,ph,oxygen
//! 2024-03-02,14:10:00,24.31,7.12,
//! ```
//!
//! Date and time are the cycle start in the host's local time zone. An
//! unavailable sensor leaves its cell empty so spreadsheets show a gap
//! instead of a zero. After every successful append the whole file is
//! copied to the backup path (typically a USB stick or a second disk).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{Local, TimeZone};
use log::debug;
use rasguard_core::cycle::CycleResult;
use rasguard_core::errors::CollaboratorError;
use rasguard_core::sensor::SensorId;
use rasguard_core::traits::CycleLog;
use tokio::io::AsyncWriteExt;

use crate::ConnectorError;

pub struct CsvLog {
    path: PathBuf,
    backup: Option<PathBuf>,
    columns: Vec<SensorId>,
}

impl CsvLog {
    pub fn new(path: impl Into<PathBuf>, columns: Vec<SensorId>) -> Self {
        Self {
            path: path.into(),
            backup: None,
            columns,
        }
    }

    pub fn with_backup(mut self, backup: impl Into<PathBuf>) -> Self {
        self.backup = Some(backup.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> String {
        let mut line = String::from("date,time");
        for column in &self.columns {
            line.push(',');
            line.push_str(column.as_str());
        }
        line
    }

    /// Format one row, without the trailing newline
    pub fn row(&self, result: &CycleResult) -> String {
        let mut line = match Local.timestamp_millis_opt(result.started_at as i64).single() {
            Some(started) => started.format("%Y-%m-%d,%H:%M:%S").to_string(),
            None => String::from(","),
        };
        for column in &self.columns {
            line.push(',');
            let value = result
                .report(column.as_str())
                .and_then(|report| report.reading.as_ref())
                .map(|reading| reading.value);
            if let Some(value) = value {
                line.push_str(&value.to_string());
            }
        }
        line
    }

    async fn write_row(&self, row: &str) -> Result<(), ConnectorError> {
        let io = |e| ConnectorError::io(&self.path, e);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io)?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(io)?;

        let mut contents = String::new();
        if file.metadata().await.map_err(io)?.len() == 0 {
            debug!("starting new cycle log {}", self.path.display());
            contents.push_str(&self.header());
            contents.push('\n');
        }
        contents.push_str(row);
        contents.push('\n');

        file.write_all(contents.as_bytes()).await.map_err(io)?;
        file.flush().await.map_err(io)?;
        Ok(())
    }

    async fn copy_to_backup(&self, backup: &Path) -> Result<(), ConnectorError> {
        let io = |e| ConnectorError::io(backup, e);
        if let Some(parent) = backup.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io)?;
        }
        tokio::fs::copy(&self.path, backup).await.map_err(io)?;
        Ok(())
    }
}

#[async_trait]
impl CycleLog for CsvLog {
    async fn append(&mut self, result: &CycleResult) -> Result<(), CollaboratorError> {
        let row = self.row(result);
        self.write_row(&row).await?;
        Ok(())
    }

    async fn backup(&mut self) -> Result<(), CollaboratorError> {
        if let Some(backup) = &self.backup {
            self.copy_to_backup(backup).await?;
        }
        Ok(())
    }
}
