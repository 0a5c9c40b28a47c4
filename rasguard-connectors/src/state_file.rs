//! Alert suppression state persisted as JSON
//!
//! Written to a sibling temp file and renamed into place, so a power cut
//! mid-write leaves either the old state or the new one, never half of each.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::debug;
use rasguard_core::alert::DispatchState;
use rasguard_core::errors::CollaboratorError;
use rasguard_core::traits::DispatchStateStore;

use crate::ConnectorError;

#[derive(Debug, Clone)]
pub struct JsonStateFile {
    path: PathBuf,
}

impl JsonStateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl DispatchStateStore for JsonStateFile {
    async fn load(&mut self) -> Result<Option<DispatchState>, CollaboratorError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no state file at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(ConnectorError::io(&self.path, e).into()),
        };

        let state = serde_json::from_str(&contents)
            .map_err(|e| ConnectorError::Parse(format!("{}: {}", self.path.display(), e)))?;
        Ok(Some(state))
    }

    async fn save(&mut self, state: &DispatchState) -> Result<(), CollaboratorError> {
        let json = serde_json::to_string_pretty(state).map_err(|e| CollaboratorError::Serialization(e.to_string()))?;
        let temp = self.temp_path();

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ConnectorError::io(parent, e))?;
        }
        tokio::fs::write(&temp, json)
            .await
            .map_err(|e| ConnectorError::io(&temp, e))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| ConnectorError::io(&self.path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rasguard_core::alert::{AlertDispatcher, ReNotify};
    use rasguard_core::cycle::{CycleResult, SensorReport};
    use rasguard_core::threshold::{Direction, Evaluation, Violation};

    fn suppressed_state() -> DispatchState {
        let mut dispatcher = AlertDispatcher::new(ReNotify::Never);
        let result = CycleResult {
            index: 3,
            started_at: 0,
            reports: vec![SensorReport {
                sensor: "oxygen".into(),
                reading: None,
                evaluation: Evaluation::Violating(Violation {
                    sensor: "oxygen".into(),
                    label: "Oxygen".into(),
                    value: 4.1,
                    unit: "mg/L".into(),
                    bound: 5.0,
                    direction: Direction::Low,
                }),
            }],
            battery: None,
        };
        let batch = dispatcher.prepare(&result, 1_700_000_000_000).unwrap();
        dispatcher.confirm(&batch);
        dispatcher.state().clone()
    }

    #[tokio::test]
    async fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonStateFile::new(dir.path().join("absent.json"));
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn saved_state_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonStateFile::new(dir.path().join("state/alerts.json"));
        let state = suppressed_state();

        store.save(&state).await.unwrap();
        assert!(!store.temp_path().exists());

        let loaded = store.load().await.unwrap().unwrap();
        assert!(loaded.is_suppressed("oxygen"));
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn corrupt_file_is_a_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = JsonStateFile::new(&path).load().await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Serialization(_)));
    }
}
