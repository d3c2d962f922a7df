use crate::traits::{CredentialStore, MaxWireError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const SESSION_FILE: &str = "session.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SessionRecord {
    device_id: String,
    auth_token: Option<String>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    fn fresh() -> Self {
        Self {
            device_id: uuid::Uuid::new_v4().to_string(),
            auth_token: None,
            updated_at: Some(Utc::now()),
        }
    }
}

/// [`CredentialStore`] persisted as JSON in `<work_dir>/session.json`
///
/// The device id is generated on first open and kept from then on. Every
/// write goes to `session.tmp` first and is renamed over the real file, so
/// a crash mid-write leaves the previous record intact.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    record: Mutex<SessionRecord>,
}

fn storage_error(context: &str, path: &Path, e: impl std::fmt::Display) -> MaxWireError {
    MaxWireError::Storage(format!("{} {}: {}", context, path.display(), e))
}

/// Write to a temp file, then rename over `path`
fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, data).map_err(|e| storage_error("Failed to write", &temp_path, e))?;
    fs::rename(&temp_path, path).map_err(|e| storage_error("Failed to replace", path, e))
}

impl FileStore {
    /// Open (or create) the store in `work_dir`
    pub fn open(work_dir: impl AsRef<Path>) -> Result<Self> {
        let work_dir = work_dir.as_ref();
        fs::create_dir_all(work_dir)
            .map_err(|e| storage_error("Failed to create", work_dir, e))?;
        let path = work_dir.join(SESSION_FILE);

        let record = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<SessionRecord>(&content) {
                Ok(record) => {
                    debug!("Loaded session from {}", path.display());
                    record
                }
                Err(e) => {
                    warn!("Corrupt session file {}, starting fresh: {}", path.display(), e);
                    SessionRecord::fresh()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Creating new session at {}", path.display());
                SessionRecord::fresh()
            }
            Err(e) => return Err(storage_error("Failed to read", &path, e)),
        };

        let store = Self {
            path,
            record: Mutex::new(record),
        };
        store.persist(&store.record.lock())?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, record: &SessionRecord) -> Result<()> {
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| MaxWireError::Storage(e.to_string()))?;
        atomic_write(&self.path, &json)
    }
}

impl CredentialStore for FileStore {
    fn device_id(&self) -> Result<String> {
        Ok(self.record.lock().device_id.clone())
    }

    fn auth_token(&self) -> Result<Option<String>> {
        Ok(self.record.lock().auth_token.clone())
    }

    fn update_auth_token(&self, device_id: &str, token: Option<&str>) -> Result<()> {
        let mut record = self.record.lock();
        if record.device_id != device_id {
            return Err(MaxWireError::Storage(format!(
                "Unknown device id {}",
                device_id
            )));
        }
        let mut updated = record.clone();
        updated.auth_token = token.map(str::to_string);
        updated.updated_at = Some(Utc::now());
        self.persist(&updated)?;
        *record = updated;
        Ok(())
    }
}
