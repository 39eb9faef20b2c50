//! Versioned, content-addressed candidate persistence shared across runs.
//!
//! ```text
//! <root>/locks/<candidate_id>.lock            held while a writer is active
//! <root>/candidates/
//!   <candidate_id>/candidate.json             current fields + version list
//!   <candidate_id>/versions/<version_id>.json
//!   <candidate_id>/versions/<version_id>/artifacts/<artifact_id>.json
//! ```
//!
//! Writers to the same candidate are serialized by an exclusive lock file
//! recording the owner pid and acquisition time. A lock older than the stale
//! age is assumed to belong to a dead writer and is broken.
//! Every file write inside the lock is atomic (temp file + rename).

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::candidates::{Candidate, version_id_for};
use crate::core::ids::{IdProblem, content_hash, id_problem};

const DEFAULT_LOCK_RETRIES: u32 = 200;
const DEFAULT_LOCK_DELAY: Duration = Duration::from_millis(10);
const DEFAULT_STALE_LOCK_AGE: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} required")]
    MissingId(&'static str),

    #[error("Unsafe {field}: {value}")]
    UnsafeId { field: &'static str, value: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("candidate already exists: {0}")]
    AlreadyExists(String),

    #[error("candidate {0} is locked by another writer")]
    Locked(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid json at {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Current candidate fields plus the ordered version history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub candidate: Candidate,
    pub versions: Vec<String>,
}

impl CandidateRecord {
    pub fn latest_version(&self) -> Option<&str> {
        self.versions.last().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateVersion {
    pub version_id: String,
    pub candidate_id: String,
    pub index: u32,
    pub parent: Option<String>,
    pub payload: Candidate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredArtifact {
    pub artifact_id: String,
    pub kind: String,
    pub name: String,
    pub payload: Value,
}

/// Contents of a lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOwner {
    pub pid: u32,
    pub acquired_at: String,
}

#[derive(Debug, Clone)]
pub struct CandidateStore {
    root: PathBuf,
    lock_retries: u32,
    lock_delay: Duration,
    stale_lock_age: Duration,
}

impl CandidateStore {
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        for dir in [root.join("candidates"), root.join("locks")] {
            fs::create_dir_all(&dir).map_err(|source| StoreError::Io { path: dir.clone(), source })?;
        }
        Ok(Self {
            root: root.to_path_buf(),
            lock_retries: DEFAULT_LOCK_RETRIES,
            lock_delay: DEFAULT_LOCK_DELAY,
            stale_lock_age: DEFAULT_STALE_LOCK_AGE,
        })
    }

    /// Override how long a writer waits for a contended candidate lock.
    pub fn with_lock_policy(mut self, retries: u32, delay: Duration) -> Self {
        self.lock_retries = retries;
        self.lock_delay = delay;
        self
    }

    /// Age after which a lock left behind by a dead writer is broken.
    pub fn with_stale_lock_age(mut self, age: Duration) -> Self {
        self.stale_lock_age = age;
        self
    }

    /// Path of the lock file guarding `candidate_id`.
    pub fn lock_path(&self, candidate_id: &str) -> PathBuf {
        self.root.join("locks").join(format!("{candidate_id}.lock"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    #[instrument(skip_all, fields(candidate = %candidate.candidate_id))]
    pub fn create(&self, candidate: &Candidate) -> Result<CandidateRecord, StoreError> {
        check_id("candidate_id", &candidate.candidate_id)?;
        let _lock = self.lock(&candidate.candidate_id)?;
        if self.record_path(&candidate.candidate_id).exists() {
            return Err(StoreError::AlreadyExists(candidate.candidate_id.clone()));
        }
        let record = self.append_version(None, candidate)?;
        info!(version = ?record.latest_version(), "created candidate");
        Ok(record)
    }

    pub fn get(&self, candidate_id: &str) -> Result<CandidateRecord, StoreError> {
        check_id("candidate_id", candidate_id)?;
        let path = self.record_path(candidate_id);
        if !path.exists() {
            return Err(StoreError::NotFound(format!("candidate {candidate_id}")));
        }
        read_file(&path)
    }

    /// Candidate ids in sorted order.
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        let dir = self.candidates_dir();
        let entries = fs::read_dir(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            if !path.join("candidate.json").exists() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                ids.push(name.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Append a new version. Updating with the current payload is a no-op.
    #[instrument(skip_all, fields(candidate = %candidate.candidate_id))]
    pub fn update(&self, candidate: &Candidate) -> Result<CandidateRecord, StoreError> {
        check_id("candidate_id", &candidate.candidate_id)?;
        let _lock = self.lock(&candidate.candidate_id)?;
        let record = self.get(&candidate.candidate_id)?;
        if record.candidate == *candidate {
            debug!("payload unchanged; no new version");
            return Ok(record);
        }
        let record = self.append_version(Some(record), candidate)?;
        info!(version = ?record.latest_version(), "appended candidate version");
        Ok(record)
    }

    /// Create the candidate if absent, otherwise append a version.
    pub fn upsert(&self, candidate: &Candidate) -> Result<CandidateRecord, StoreError> {
        check_id("candidate_id", &candidate.candidate_id)?;
        let _lock = self.lock(&candidate.candidate_id)?;
        let existing = if self.record_path(&candidate.candidate_id).exists() {
            Some(self.get(&candidate.candidate_id)?)
        } else {
            None
        };
        match existing {
            Some(record) if record.candidate == *candidate => Ok(record),
            existing => self.append_version(existing, candidate),
        }
    }

    /// Remove a candidate with all its versions and artifacts.
    #[instrument(skip(self))]
    pub fn delete_candidate(&self, candidate_id: &str) -> Result<(), StoreError> {
        check_id("candidate_id", candidate_id)?;
        let _lock = self.lock(candidate_id)?;
        let dir = self.candidate_dir(candidate_id);
        if !dir.exists() {
            return Err(StoreError::NotFound(format!("candidate {candidate_id}")));
        }
        fs::remove_dir_all(&dir).map_err(|source| StoreError::Io { path: dir, source })?;
        warn!("deleted candidate");
        Ok(())
    }

    /// Version ids in append order.
    pub fn list_versions(&self, candidate_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.get(candidate_id)?.versions)
    }

    pub fn get_version(
        &self,
        candidate_id: &str,
        version_id: &str,
    ) -> Result<CandidateVersion, StoreError> {
        check_id("candidate_id", candidate_id)?;
        check_id("version_id", version_id)?;
        let path = self.version_path(candidate_id, version_id);
        if !path.exists() {
            return Err(StoreError::NotFound(format!(
                "version {version_id} of candidate {candidate_id}"
            )));
        }
        read_file(&path)
    }

    /// Store `payload` under its content hash. Rewriting the same payload returns the same id.
    pub fn create_artifact(
        &self,
        candidate_id: &str,
        version_id: &str,
        kind: &str,
        name: &str,
        payload: &Value,
    ) -> Result<String, StoreError> {
        self.get_version(candidate_id, version_id)?;
        let artifact_id = content_hash(payload)?;
        let _lock = self.lock(candidate_id)?;
        let path = self
            .artifacts_dir(candidate_id, version_id)
            .join(format!("{artifact_id}.json"));
        if !path.exists() {
            write_file(
                &path,
                &StoredArtifact {
                    artifact_id: artifact_id.clone(),
                    kind: kind.to_string(),
                    name: name.to_string(),
                    payload: payload.clone(),
                },
            )?;
            debug!(candidate = candidate_id, version = version_id, artifact = %artifact_id, kind, name, "stored artifact");
        }
        Ok(artifact_id)
    }

    pub fn get_artifact(
        &self,
        candidate_id: &str,
        version_id: &str,
        artifact_id: &str,
    ) -> Result<StoredArtifact, StoreError> {
        check_id("candidate_id", candidate_id)?;
        check_id("version_id", version_id)?;
        check_id("artifact_id", artifact_id)?;
        let path = self
            .artifacts_dir(candidate_id, version_id)
            .join(format!("{artifact_id}.json"));
        if !path.exists() {
            return Err(StoreError::NotFound(format!("artifact {artifact_id}")));
        }
        read_file(&path)
    }

    /// Artifact ids for a version in sorted order.
    pub fn list_artifacts(
        &self,
        candidate_id: &str,
        version_id: &str,
    ) -> Result<Vec<String>, StoreError> {
        self.get_version(candidate_id, version_id)?;
        let dir = self.artifacts_dir(candidate_id, version_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Must be called with the candidate lock held.
    fn append_version(
        &self,
        existing: Option<CandidateRecord>,
        candidate: &Candidate,
    ) -> Result<CandidateRecord, StoreError> {
        let mut versions = existing.map(|record| record.versions).unwrap_or_default();
        let parent = versions.last().cloned();
        let version_id = version_id_for(candidate, parent.as_deref())?;
        let index = u32::try_from(versions.len()).unwrap_or(u32::MAX);
        write_file(
            &self.version_path(&candidate.candidate_id, &version_id),
            &CandidateVersion {
                version_id: version_id.clone(),
                candidate_id: candidate.candidate_id.clone(),
                index,
                parent,
                payload: candidate.clone(),
            },
        )?;
        versions.push(version_id);
        let record = CandidateRecord {
            candidate: candidate.clone(),
            versions,
        };
        write_file(&self.record_path(&candidate.candidate_id), &record)?;
        Ok(record)
    }

    fn lock(&self, candidate_id: &str) -> Result<CandidateLock, StoreError> {
        let path = self.lock_path(candidate_id);
        for attempt in 0..=self.lock_retries {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let owner = LockOwner {
                        pid: std::process::id(),
                        acquired_at: Utc::now().to_rfc3339(),
                    };
                    let lock = CandidateLock { path };
                    let payload = serde_json::to_vec(&owner)?;
                    file.write_all(&payload).map_err(|source| StoreError::Io {
                        path: lock.path.clone(),
                        source,
                    })?;
                    return Ok(lock);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    if self.break_if_stale(&path) {
                        continue;
                    }
                    if attempt < self.lock_retries {
                        thread::sleep(self.lock_delay);
                    }
                }
                Err(source) => return Err(StoreError::Io { path, source }),
            }
        }
        warn!(candidate = candidate_id, "candidate lock contended");
        Err(StoreError::Locked(candidate_id.to_string()))
    }

    /// Remove `path` when it is older than the stale age. Returns whether it was removed.
    fn break_if_stale(&self, path: &Path) -> bool {
        let age = fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok());
        let Some(age) = age else {
            return false;
        };
        if age < self.stale_lock_age {
            return false;
        }
        let owner = fs::read_to_string(path)
            .ok()
            .and_then(|contents| serde_json::from_str::<LockOwner>(&contents).ok());
        match fs::remove_file(path) {
            Ok(()) => {
                warn!(
                    path = %path.display(),
                    age_ms = u64::try_from(age.as_millis()).unwrap_or(u64::MAX),
                    owner = ?owner,
                    "broke stale candidate lock"
                );
                true
            }
            Err(err) if err.kind() == ErrorKind::NotFound => true,
            Err(_) => false,
        }
    }

    fn candidates_dir(&self) -> PathBuf {
        self.root.join("candidates")
    }

    fn candidate_dir(&self, candidate_id: &str) -> PathBuf {
        self.candidates_dir().join(candidate_id)
    }

    fn record_path(&self, candidate_id: &str) -> PathBuf {
        self.candidate_dir(candidate_id).join("candidate.json")
    }

    fn version_path(&self, candidate_id: &str, version_id: &str) -> PathBuf {
        self.candidate_dir(candidate_id)
            .join("versions")
            .join(format!("{version_id}.json"))
    }

    fn artifacts_dir(&self, candidate_id: &str, version_id: &str) -> PathBuf {
        self.candidate_dir(candidate_id)
            .join("versions")
            .join(version_id)
            .join("artifacts")
    }
}

/// Exclusive per-candidate lock. Released on drop.
struct CandidateLock {
    path: PathBuf,
}

impl Drop for CandidateLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %err, "failed to release candidate lock");
        }
    }
}

/// Reject empty ids and ids that are not a single safe path segment.
fn check_id(field: &'static str, value: &str) -> Result<(), StoreError> {
    match id_problem(value) {
        None => Ok(()),
        Some(IdProblem::Empty) => Err(StoreError::MissingId(field)),
        Some(IdProblem::Traversal | IdProblem::Charset) => Err(StoreError::UnsafeId {
            field,
            value: value.to_string(),
        }),
    }
}

fn read_file<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let contents = fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn write_file<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| StoreError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf).map_err(|source| StoreError::Io {
        path: tmp_path.clone(),
        source,
    })?;
    fs::rename(&tmp_path, path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::scored_candidate;
    use serde_json::json;

    fn store() -> (tempfile::TempDir, CandidateStore) {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = CandidateStore::open(temp.path()).expect("open");
        (temp, store)
    }

    #[test]
    fn create_get_update_list() {
        let (_temp, store) = store();
        let created = store
            .create(&scored_candidate("cand-1", "ACDE", 70.0))
            .expect("create");
        assert_eq!(created.versions.len(), 1);
        assert_eq!(store.get("cand-1").expect("get"), created);

        let updated = store
            .update(&scored_candidate("cand-1", "ACDE", 82.0))
            .expect("update");
        assert_eq!(updated.versions.len(), 2);
        assert_eq!(updated.candidate.score(), 82.0);
        assert_eq!(store.list().expect("list"), vec!["cand-1"]);

        let latest = store
            .get_version("cand-1", &updated.versions[1])
            .expect("version");
        assert_eq!(latest.index, 1);
        assert_eq!(latest.parent.as_deref(), Some(updated.versions[0].as_str()));
    }

    #[test]
    fn create_twice_fails() {
        let (_temp, store) = store();
        let candidate = scored_candidate("cand-1", "ACDE", 70.0);
        store.create(&candidate).expect("create");
        assert!(matches!(
            store.create(&candidate),
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn unchanged_update_adds_no_version() {
        let (_temp, store) = store();
        let candidate = scored_candidate("cand-1", "ACDE", 70.0);
        store.create(&candidate).expect("create");
        let record = store.update(&candidate).expect("update");
        assert_eq!(record.versions.len(), 1);
    }

    #[test]
    fn rejects_empty_and_unsafe_ids_before_touching_disk() {
        let (temp, store) = store();
        let err = store.get("").unwrap_err();
        assert_eq!(err.to_string(), "candidate_id required");
        let err = store
            .create(&scored_candidate("../bad", "ACDE", 70.0))
            .unwrap_err();
        assert!(err.to_string().contains("Unsafe candidate_id"));
        assert!(!temp.path().join("bad").exists());
    }

    #[test]
    fn list_is_sorted() {
        let (_temp, store) = store();
        for id in ["cand-b", "cand-c", "cand-a"] {
            store
                .create(&scored_candidate(id, "ACDE", 70.0))
                .expect("create");
        }
        assert_eq!(
            store.list().expect("list"),
            vec!["cand-a", "cand-b", "cand-c"]
        );
    }

    #[test]
    fn artifacts_are_content_addressed() {
        let (_temp, store) = store();
        let record = store
            .create(&scored_candidate("cand-1", "ACDE", 70.0))
            .expect("create");
        let vid = record.versions[0].clone();

        let first = store
            .create_artifact("cand-1", &vid, "analysis", "report", &json!({"ok": true}))
            .expect("artifact");
        let second = store
            .create_artifact("cand-1", &vid, "analysis", "report", &json!({"ok": true}))
            .expect("artifact");
        assert_eq!(first, second);

        let stored = store.get_artifact("cand-1", &vid, &first).expect("get");
        assert_eq!(stored.payload, json!({"ok": true}));
        assert_eq!(stored.kind, "analysis");
        assert_eq!(stored.name, "report");
        assert_eq!(store.list_artifacts("cand-1", &vid).expect("list"), vec![first]);

        let missing = store.get_artifact("cand-1", &vid, "deadbeef").unwrap_err();
        assert!(matches!(missing, StoreError::NotFound(_)));
    }

    #[test]
    fn delete_removes_candidate() {
        let (_temp, store) = store();
        store
            .create(&scored_candidate("cand-1", "ACDE", 70.0))
            .expect("create");
        store.delete_candidate("cand-1").expect("delete");
        assert!(matches!(store.get("cand-1"), Err(StoreError::NotFound(_))));
        assert!(matches!(store.delete_candidate("cand-1"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn held_lock_yields_locked_error() {
        let (_temp, store) = store();
        let store = store.with_lock_policy(2, Duration::from_millis(1));
        fs::write(store.lock_path("cand-1"), "").expect("lock");
        let err = store
            .create(&scored_candidate("cand-1", "ACDE", 70.0))
            .unwrap_err();
        assert!(matches!(err, StoreError::Locked(_)));
        assert!(store.lock_path("cand-1").exists());
    }

    #[test]
    fn stale_lock_from_dead_writer_is_broken() {
        let (_temp, store) = store();
        store
            .create(&scored_candidate("cand-1", "ACDE", 70.0))
            .expect("create");
        let store = store
            .with_lock_policy(0, Duration::from_millis(1))
            .with_stale_lock_age(Duration::from_millis(200));
        fs::write(store.lock_path("cand-1"), "").expect("lock");
        assert!(matches!(
            store.update(&scored_candidate("cand-1", "ACDE", 75.0)),
            Err(StoreError::Locked(_))
        ));

        thread::sleep(Duration::from_millis(300));
        let record = store
            .update(&scored_candidate("cand-1", "ACDE", 75.0))
            .expect("update after stale lock");
        assert_eq!(record.versions.len(), 2);
        assert!(!store.lock_path("cand-1").exists());
    }

    #[test]
    fn lock_file_records_its_owner() {
        let (_temp, store) = store();
        let lock = store.lock("cand-1").expect("lock");
        let owner: LockOwner = read_file(&lock.path).expect("owner");
        assert_eq!(owner.pid, std::process::id());
        assert!(!owner.acquired_at.is_empty());
        drop(lock);
        assert!(!store.lock_path("cand-1").exists());
    }

    #[test]
    fn lock_suffixed_ids_do_not_block_other_candidates() {
        let (_temp, store) = store();
        let store = store.with_lock_policy(0, Duration::from_millis(1));
        store
            .create(&scored_candidate("foo.lock", "ACDE", 70.0))
            .expect("create foo.lock");
        store
            .create(&scored_candidate("foo", "ACDE", 70.0))
            .expect("create foo");
        assert_eq!(store.list().expect("list"), vec!["foo", "foo.lock"]);
    }

    #[test]
    fn concurrent_writers_are_serialized() {
        let (_temp, store) = store();
        store
            .create(&scored_candidate("cand-1", "ACDE", 50.0))
            .expect("create");
        thread::scope(|scope| {
            for writer in 0..8 {
                let store = &store;
                scope.spawn(move || {
                    store
                        .update(&scored_candidate("cand-1", "ACDE", 60.0 + f64::from(writer)))
                        .expect("update");
                });
            }
        });
        let record = store.get("cand-1").expect("get");
        assert_eq!(record.versions.len(), 9);
        for (index, vid) in record.versions.iter().enumerate() {
            let version = store.get_version("cand-1", vid).expect("version");
            assert_eq!(version.index as usize, index);
        }
    }
}
