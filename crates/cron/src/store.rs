use crate::error::CronError;
use crate::types::{Job, StoreFile};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn load(&self) -> Result<Vec<Job>, CronError>;
    async fn save(&self, jobs: &[Job]) -> Result<(), CronError>;
}

/// File-backed job store using the atomic temp-file + backup + rename
/// protocol (spec §4.C). A missing file yields an empty job set; a
/// malformed file fails with `ErrStoreCorrupt`.
pub struct FileJobStore {
    path: PathBuf,
}

impl FileJobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension(format!(
            "{}.tmp",
            self.path.extension().and_then(|e| e.to_str()).unwrap_or("json")
        ))
    }

    fn backup_path(&self) -> PathBuf {
        let mut s = self.path.as_os_str().to_os_string();
        s.push(".bak");
        PathBuf::from(s)
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn load(&self) -> Result<Vec<Job>, CronError> {
        load_from_path(&self.path).await
    }

    async fn save(&self, jobs: &[Job]) -> Result<(), CronError> {
        save_to_path(&self.path, &self.temp_path(), &self.backup_path(), jobs).await
    }
}

async fn load_from_path(path: &Path) -> Result<Vec<Job>, CronError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => {
            let store: StoreFile = serde_json::from_str(&contents)
                .map_err(|e| CronError::StoreCorrupt(format!("{}: {e}", path.display())))?;
            Ok(store.jobs)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(CronError::StoreCorrupt(format!("{}: {e}", path.display()))),
    }
}

async fn save_to_path(
    path: &Path,
    temp_path: &Path,
    backup_path: &Path,
    jobs: &[Job],
) -> Result<(), CronError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CronError::StoreCorrupt(format!("creating store dir: {e}")))?;
    }

    let snapshot = StoreFile::new(jobs.to_vec());
    let serialized = serde_json::to_string_pretty(&snapshot)
        .map_err(|e| CronError::StoreCorrupt(format!("serializing store: {e}")))?;

    tokio::fs::write(temp_path, &serialized)
        .await
        .map_err(|e| CronError::StoreCorrupt(format!("writing temp file: {e}")))?;

    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        tokio::fs::copy(path, backup_path)
            .await
            .map_err(|e| CronError::StoreCorrupt(format!("writing backup file: {e}")))?;
    }

    tokio::fs::rename(temp_path, path)
        .await
        .map_err(|e| CronError::StoreCorrupt(format!("renaming temp file into place: {e}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobState, Payload, Schedule};

    fn sample_job(id: &str) -> Job {
        Job {
            id: id.to_string(),
            name: "job".to_string(),
            enabled: true,
            schedule: Schedule::Every { every_ms: 60_000 },
            payload: Payload::SystemEvent {
                message: "hi".to_string(),
            },
            created_at_ms: 1,
            updated_at_ms: 1,
            state: JobState::default(),
        }
    }

    #[tokio::test]
    async fn missing_file_yields_empty_job_set() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path().join("jobs.json"));
        let jobs = store.load().await.unwrap();
        assert!(jobs.is_empty());
    }

    #[tokio::test]
    async fn round_trips_job_set_field_wise() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path().join("jobs.json"));
        let jobs = vec![sample_job("j1"), sample_job("j2")];
        store.save(&jobs).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, "j1");
        assert_eq!(loaded[1].id, "j2");
    }

    #[tokio::test]
    async fn save_writes_backup_of_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        let store = FileJobStore::new(&path);
        store.save(&[sample_job("j1")]).await.unwrap();
        store.save(&[sample_job("j1"), sample_job("j2")]).await.unwrap();

        let backup = dir.path().join("jobs.json.bak");
        let backup_contents: StoreFile =
            serde_json::from_str(&tokio::fs::read_to_string(backup).await.unwrap()).unwrap();
        assert_eq!(backup_contents.jobs.len(), 1);
    }

    #[tokio::test]
    async fn malformed_file_fails_with_store_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        tokio::fs::write(&path, "not json").await.unwrap();
        let store = FileJobStore::new(&path);
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, CronError::StoreCorrupt(_)));
    }
}
