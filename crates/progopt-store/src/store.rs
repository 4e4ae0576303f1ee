//! Storage contract and JSON-file implementation
//!
//! Layout under the store root:
//! - `jobs/<id>.json`: one record per job
//! - `checkpoints/<id>.json`: one checkpoint blob per job
//!
//! All writes go through temp-file-plus-rename in the target directory, so a
//! crash mid-write leaves the previous content (or nothing) visible, never a
//! half-written file. Checkpoint blobs additionally carry a content digest;
//! a mismatch on read is reported as corrupt rather than misinterpreted.

use crate::checkpoint::{to_hex, Checkpoint};
use crate::error::StoreError;
use crate::record::{JobId, JobRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Durable job state contract
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a fresh record
    async fn create(&self, record: &JobRecord) -> Result<(), StoreError>;

    /// Replace the record for `record.id`; last-write-wins, replay-safe
    async fn update(&self, record: &JobRecord) -> Result<(), StoreError>;

    /// Load one record
    async fn get(&self, id: JobId) -> Result<JobRecord, StoreError>;

    /// Load all records, sorted by id
    async fn list(&self) -> Result<Vec<JobRecord>, StoreError>;

    /// Atomically persist a checkpoint blob for the job
    async fn write_checkpoint(&self, id: JobId, checkpoint: &Checkpoint)
        -> Result<(), StoreError>;

    /// Load the job's checkpoint, if one has ever fully landed
    async fn read_checkpoint(&self, id: JobId) -> Result<Option<Checkpoint>, StoreError>;

    /// Drop the job's checkpoint blob, if any
    async fn delete_checkpoint(&self, id: JobId) -> Result<(), StoreError>;
}

/// Integrity envelope around a checkpoint payload
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    digest: String,
    payload: serde_json::Value,
}

/// JSON-file job store
#[derive(Debug, Clone)]
pub struct FileJobStore {
    jobs_dir: PathBuf,
    checkpoints_dir: PathBuf,
}

impl FileJobStore {
    /// Open (creating directories as needed) a store rooted at `root`
    ///
    /// # Errors
    /// `StorageUnavailable` if the directories cannot be created.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        let jobs_dir = root.join("jobs");
        let checkpoints_dir = root.join("checkpoints");
        tokio::fs::create_dir_all(&jobs_dir).await?;
        tokio::fs::create_dir_all(&checkpoints_dir).await?;
        Ok(Self {
            jobs_dir,
            checkpoints_dir,
        })
    }

    fn record_path(&self, id: JobId) -> PathBuf {
        self.jobs_dir.join(format!("{id}.json"))
    }

    fn checkpoint_path(&self, id: JobId) -> PathBuf {
        self.checkpoints_dir.join(format!("{id}.json"))
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn create(&self, record: &JobRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(record)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        write_atomic(&self.record_path(record.id), &bytes).await
    }

    async fn update(&self, record: &JobRecord) -> Result<(), StoreError> {
        let path = self.record_path(record.id);
        if !tokio::fs::try_exists(&path).await? {
            return Err(StoreError::NotFound);
        }
        let bytes = serde_json::to_vec_pretty(record)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        write_atomic(&path, &bytes).await
    }

    async fn get(&self, id: JobId) -> Result<JobRecord, StoreError> {
        let bytes = read_existing(&self.record_path(id)).await?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    async fn list(&self) -> Result<Vec<JobRecord>, StoreError> {
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.jobs_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<JobRecord>(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable job record");
                }
            }
        }
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    async fn write_checkpoint(
        &self,
        id: JobId,
        checkpoint: &Checkpoint,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_value(checkpoint)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let envelope = Envelope {
            digest: payload_digest(&payload),
            payload,
        };
        let bytes = serde_json::to_vec_pretty(&envelope)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        write_atomic(&self.checkpoint_path(id), &bytes).await?;
        tracing::debug!(job_id = %id, iteration = checkpoint.iteration, "checkpoint written");
        Ok(())
    }

    async fn read_checkpoint(&self, id: JobId) -> Result<Option<Checkpoint>, StoreError> {
        let bytes = match read_existing(&self.checkpoint_path(id)).await {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };
        let envelope: Envelope =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        if payload_digest(&envelope.payload) != envelope.digest {
            return Err(StoreError::Corrupt("checkpoint digest mismatch".to_string()));
        }
        serde_json::from_value(envelope.payload)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    async fn delete_checkpoint(&self, id: JobId) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.checkpoint_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Digest over the canonical (sorted-key) JSON form of the payload
fn payload_digest(payload: &serde_json::Value) -> String {
    to_hex(&Sha256::digest(payload.to_string().as_bytes()))
}

/// Write via a sibling temp file and rename, so readers never observe a
/// partially written file
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_existing(path: &Path) -> Result<Vec<u8>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{config_fingerprint, CHECKPOINT_VERSION};
    use crate::record::JobStatus;
    use pretty_assertions::assert_eq;
    use progopt_eval::Candidate;

    async fn store(dir: &tempfile::TempDir) -> FileJobStore {
        FileJobStore::open(dir.path()).await.unwrap()
    }

    fn sample_record() -> JobRecord {
        JobRecord::new(JobId::new(), serde_json::json!({"max_iterations": 3}))
    }

    fn sample_checkpoint(iteration: u32) -> Checkpoint {
        let fp = config_fingerprint(&serde_json::json!({"max_iterations": 3}));
        Checkpoint {
            version: CHECKPOINT_VERSION,
            config_fingerprint: fp,
            iteration,
            best_candidate: Some(Candidate::new("echo 42")),
            best_score: Some(0.5),
            strategy_state: serde_json::json!({"seed": 7}),
        }
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let record = sample_record();

        store(&dir).await.create(&record).await.unwrap();

        // Fresh handle over the same root sees the record.
        let reopened = store(&dir).await;
        assert_eq!(reopened.get(record.id).await.unwrap(), record);
        assert_eq!(reopened.list().await.unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn get_unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = store(&dir).await.get(JobId::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn update_is_replay_safe() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir).await;
        let mut record = sample_record();
        s.create(&record).await.unwrap();

        record.status = JobStatus::Running;
        record.iteration = 2;
        s.update(&record).await.unwrap();
        // Replaying the same update must not corrupt anything.
        s.update(&record).await.unwrap();

        assert_eq!(s.get(record.id).await.unwrap(), record);
    }

    #[tokio::test]
    async fn update_unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = store(&dir).await.update(&sample_record()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn checkpoint_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir).await;
        let id = JobId::new();

        assert!(s.read_checkpoint(id).await.unwrap().is_none());

        let checkpoint = sample_checkpoint(2);
        s.write_checkpoint(id, &checkpoint).await.unwrap();
        assert_eq!(s.read_checkpoint(id).await.unwrap(), Some(checkpoint));

        s.delete_checkpoint(id).await.unwrap();
        assert!(s.read_checkpoint(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn torn_write_leaves_previous_checkpoint_readable() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir).await;
        let id = JobId::new();

        let good = sample_checkpoint(3);
        s.write_checkpoint(id, &good).await.unwrap();

        // Simulated crash mid-write: garbage in the temp file, rename never
        // happened. The previous checkpoint must stay visible.
        let tmp = s.checkpoint_path(id).with_extension("json.tmp");
        tokio::fs::write(&tmp, b"{ torn").await.unwrap();

        assert_eq!(s.read_checkpoint(id).await.unwrap(), Some(good));
    }

    #[tokio::test]
    async fn tampered_checkpoint_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir).await;
        let id = JobId::new();
        s.write_checkpoint(id, &sample_checkpoint(1)).await.unwrap();

        let path = s.checkpoint_path(id);
        let text = tokio::fs::read_to_string(&path).await.unwrap();
        tokio::fs::write(&path, text.replace("\"iteration\": 1", "\"iteration\": 9"))
            .await
            .unwrap();

        let err = s.read_checkpoint(id).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[tokio::test]
    async fn list_skips_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir).await;
        let record = sample_record();
        s.create(&record).await.unwrap();
        tokio::fs::write(s.jobs_dir.join("stray.json.tmp"), b"{ partial")
            .await
            .unwrap();

        assert_eq!(s.list().await.unwrap(), vec![record]);
    }
}
