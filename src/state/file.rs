use super::{MigrationState, MigrationStateStore};
use crate::config::EngineConfig;
use crate::core::{MigrationError, MigrationVersion, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

const STATE_FORMAT_VERSION: u16 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    format_version: u16,
    migrations: BTreeMap<u64, MigrationState>,
}

/// JSON file holding every migration's state.
///
/// Each save rewrites the whole file through a temp file in the same
/// directory followed by a rename, so a crash leaves either the old or the
/// new contents on disk.
pub struct FileStateStore {
    path: PathBuf,
    records: Mutex<BTreeMap<u64, MigrationState>>,
}

impl FileStateStore {
    /// Opens the store, loading existing state if the file is present.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = if path.exists() {
            let file = File::open(&path).map_err(|e| {
                MigrationError::State(format!("Failed to open state file '{}': {}", path.display(), e))
            })?;
            let parsed: StateFile = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
                MigrationError::State(format!("Failed to parse state file '{}': {}", path.display(), e))
            })?;
            if parsed.format_version > STATE_FORMAT_VERSION {
                return Err(MigrationError::State(format!(
                    "State file format {} is newer than supported {}",
                    parsed.format_version, STATE_FORMAT_VERSION
                )));
            }
            parsed.migrations
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// Opens the store at the configured `state_path`.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let path = config
            .state_path
            .as_ref()
            .ok_or_else(|| MigrationError::Config("state_path is not configured".to_string()))?;
        Self::open(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_atomically(&self, records: &BTreeMap<u64, MigrationState>) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)
            .map_err(|e| MigrationError::State(format!("Failed to create state directory: {}", e)))?;

        let temp = NamedTempFile::new_in(&dir)
            .map_err(|e| MigrationError::State(format!("Failed to create temp file: {}", e)))?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            let snapshot = StateFile {
                format_version: STATE_FORMAT_VERSION,
                migrations: records.clone(),
            };
            serde_json::to_writer_pretty(&mut writer, &snapshot)?;
            writer
                .flush()
                .map_err(|e| MigrationError::State(format!("Failed to flush state: {}", e)))?;
        }
        temp.as_file()
            .sync_all()
            .map_err(|e| MigrationError::State(format!("Failed to sync state: {}", e)))?;
        temp.persist(&self.path)
            .map_err(|e| MigrationError::State(format!("Failed to replace state file: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl MigrationStateStore for FileStateStore {
    async fn load(&self, version: MigrationVersion) -> Result<Option<MigrationState>> {
        Ok(self.records.lock().await.get(&version.get()).cloned())
    }

    async fn save(&self, version: MigrationVersion, state: &MigrationState) -> Result<()> {
        let mut records = self.records.lock().await;
        let previous = records.insert(version.get(), state.clone());
        if let Err(err) = self.write_atomically(&records) {
            // Keep memory consistent with what is on disk.
            match previous {
                Some(previous) => records.insert(version.get(), previous),
                None => records.remove(&version.get()),
            };
            return Err(err);
        }
        Ok(())
    }

    async fn all(&self) -> Result<BTreeMap<MigrationVersion, MigrationState>> {
        Ok(self
            .records
            .lock()
            .await
            .iter()
            .map(|(version, state)| (MigrationVersion::new(*version), state.clone()))
            .collect())
    }
}
